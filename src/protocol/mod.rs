//! Wire protocol for the repath control plane.
//!
//! Every control packet is a plain Ethernet/IPv4/UDP frame whose UDP payload
//! is a fixed 28-byte control header. The UDP source port marks control
//! traffic; the destination port names the path the frame travels on.
//!
//! ## Frame Format
//!
//! ```text
//! ┌──────────────┬──────────────┬─────────────┬─────────────────────────┐
//! │ Ethernet (14)│  IPv4 (20)   │  UDP (8)    │  Control header (28)    │
//! └──────────────┴──────────────┴─────────────┴─────────────────────────┘
//!                                 src = control port
//!                                 dst = base port - 1 + path id
//! ```

mod codec;
mod envelope;
mod header;

pub use codec::{ControlCodec, ControlPacket, Decoded};
pub use envelope::{
    internet_checksum, Envelope, MacAddr, UdpDatagram, ETHERTYPE_IPV4, ETH_HEADER_LEN,
    IPPROTO_UDP, IPV4_HEADER_LEN, UDP_HEADER_LEN,
};
pub use header::{ControlHeader, MessageKind, Plane};

/// Control header size in bytes.
pub const HEADER_SIZE: usize = 28;

/// Length of an emitted control frame.
pub const FRAME_LEN: usize = Envelope::LEN + HEADER_SIZE;
