//! Control frame encoding and decoding.

use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::Arc;

use super::envelope::{Envelope, UdpDatagram};
use super::header::ControlHeader;
use super::{FRAME_LEN, HEADER_SIZE};
use crate::config::EnvelopeConfig;
use crate::error::{ProtocolError, Result};
use crate::transport::{BufferPool, PooledBuffer};
use crate::types::PathId;
use crate::util::Clock;

/// A decoded control frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControlPacket {
    pub header: ControlHeader,
    /// Path implied by the destination port.
    pub path: PathId,
}

/// Result of inspecting a received frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decoded {
    Control(ControlPacket),
    /// Not addressed from the control port; belongs to someone else.
    NotControlTraffic,
}

/// Builds and parses control frames for one endpoint.
pub struct ControlCodec {
    envelope: EnvelopeConfig,
    pool: Arc<BufferPool>,
    clock: Arc<dyn Clock>,
    ip_id: AtomicU16,
}

impl ControlCodec {
    /// Create a codec drawing frames from `pool`.
    pub fn new(envelope: EnvelopeConfig, pool: Arc<BufferPool>, clock: Arc<dyn Clock>) -> Self {
        Self {
            envelope,
            pool,
            clock,
            ip_id: AtomicU16::new(rand::random()),
        }
    }

    /// Envelope addressing in use.
    pub fn envelope(&self) -> &EnvelopeConfig {
        &self.envelope
    }

    /// Pool that encoded frames come from.
    pub fn pool(&self) -> &Arc<BufferPool> {
        &self.pool
    }

    /// PROBE on `path`, stamped with the current time.
    pub fn encode_probe(&self, path: PathId) -> Result<PooledBuffer> {
        let header = ControlHeader::probe(self.clock.now_ns());
        self.encode(&header, path)
    }

    /// REPATH proposing `target`, sent on `via`.
    pub fn encode_repath(&self, target: PathId, via: PathId, sequence: u64) -> Result<PooledBuffer> {
        self.encode(&ControlHeader::repath(target, sequence), via)
    }

    /// REPATH_ACK echoing `ack`, sent on `via`.
    pub fn encode_repath_ack(&self, via: PathId, ack: u64) -> Result<PooledBuffer> {
        self.encode(&ControlHeader::repath_ack(ack), via)
    }

    /// Data-plane timestamp sample on `path`.
    pub fn encode_data_timestamp(&self, path: PathId) -> Result<PooledBuffer> {
        let header = ControlHeader::data_timestamp(self.clock.now_ns());
        self.encode(&header, path)
    }

    fn encode(&self, header: &ControlHeader, path: PathId) -> Result<PooledBuffer> {
        let mut frame = self.pool.try_get()?;

        let envelope = Envelope {
            src_mac: self.envelope.local_mac,
            dst_mac: self.envelope.peer_mac,
            src_ip: self.envelope.local_ip,
            dst_ip: self.envelope.peer_ip,
            src_port: self.envelope.control_port,
            dst_port: path.port(self.envelope.base_port),
            ip_id: self.ip_id.fetch_add(1, Ordering::Relaxed),
        };

        let buf = frame.as_mut_slice();
        header.encode(&mut buf[Envelope::LEN..])?;
        let len = envelope.write(buf, HEADER_SIZE)?;
        debug_assert_eq!(len, FRAME_LEN);
        frame.set_len(len);

        Ok(frame)
    }

    /// Inspect a received frame.
    ///
    /// Never reads past the frame or the UDP length; nothing is mutated.
    pub fn decode(&self, frame: &[u8]) -> std::result::Result<Decoded, ProtocolError> {
        let Some(datagram) = UdpDatagram::parse(frame) else {
            return Ok(Decoded::NotControlTraffic);
        };

        if datagram.src_port != self.envelope.control_port {
            return Ok(Decoded::NotControlTraffic);
        }

        let payload = datagram.payload()?;
        let header = ControlHeader::decode(payload)?;
        let path = PathId::from_port(datagram.dst_port, self.envelope.base_port)?;

        Ok(Decoded::Control(ControlPacket { header, path }))
    }
}

impl std::fmt::Debug for ControlCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ControlCodec")
            .field("envelope", &self.envelope)
            .finish_non_exhaustive()
    }
}
