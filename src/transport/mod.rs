//! Frame transport between the NIC and the protocol loops.
//!
//! ```text
//!            ┌────────────── TransportPump ──────────────┐
//!   NIC ───▶ │ rx_burst ─▶ ingress FrameQueue ─▶ engine  │
//!   NIC ◀─── │ tx_burst ◀─ egress  FrameQueue ◀─ engine, │
//!            │                                   probes  │
//!            └───────────────────────────────────────────┘
//! ```
//!
//! Frames live in buffers from a bounded [`BufferPool`]; both queues are
//! fixed-capacity and never block.

mod buffer;
mod nic;
mod pump;
mod queue;

pub use buffer::{BufferPool, PacketBuffer, PoolStats, PooledBuffer, DEFAULT_BUFFER_SIZE};
pub use nic::{LinkControl, LinkFilter, MemoryNic, Nic, UdpNic};
pub use pump::TransportPump;
pub use queue::FrameQueue;
