//! Control header structure and handling.

use byteorder::{BigEndian, ByteOrder};
use serde::{Deserialize, Serialize};

use crate::error::ProtocolError;
use crate::types::PathId;

use super::HEADER_SIZE;

/// Plane flag: which half of the system produced the packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum Plane {
    /// Control-protocol packet.
    Control = 0,
    /// Data-plane packet carrying a timestamp.
    Data = 1,
}

impl Plane {
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(Self::Control),
            1 => Some(Self::Data),
            _ => None,
        }
    }
}

/// Message sub-type, scoped by plane.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageKind {
    /// Delay probe sent on one specific path.
    Probe,
    /// Proposal to move the active path.
    Repath,
    /// Confirmation that a REPATH was applied.
    RepathAck,
    /// Data-plane timestamp sample on the active path.
    Timestamp,
}

impl MessageKind {
    /// Decode the sub-type byte within a plane.
    pub fn from_wire(plane: Plane, v: u8) -> Option<Self> {
        match (plane, v) {
            (Plane::Control, 0) => Some(Self::Probe),
            (Plane::Control, 1) => Some(Self::Repath),
            (Plane::Control, 2) => Some(Self::RepathAck),
            (Plane::Data, 0) => Some(Self::Timestamp),
            _ => None,
        }
    }

    /// Sub-type byte on the wire.
    pub fn code(self) -> u8 {
        match self {
            Self::Probe | Self::Timestamp => 0,
            Self::Repath => 1,
            Self::RepathAck => 2,
        }
    }

    /// Plane this sub-type belongs to.
    pub fn plane(self) -> Plane {
        match self {
            Self::Timestamp => Plane::Data,
            _ => Plane::Control,
        }
    }
}

/// Control header, carried right after the UDP header.
///
/// ```text
/// 0       1       2               10      11              19              27      28
/// ┌───────┬───────┬───────────────┬───────┬───────────────┬───────────────┬───────┐
/// │ plane │ kind  │ timestamp     │target │ sequence      │ ack           │ rsvd  │
/// └───────┴───────┴───────────────┴───────┴───────────────┴───────────────┴───────┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlHeader {
    /// Message sub-type (implies the plane flag).
    pub kind: MessageKind,
    /// Sender send time, nanoseconds since the epoch.
    pub timestamp: u64,
    /// Proposed path; only present on REPATH.
    pub repath_target: Option<PathId>,
    /// Negotiation sequence number (REPATH).
    pub sequence: u64,
    /// Echoed negotiation sequence number (REPATH_ACK).
    pub ack: u64,
}

impl ControlHeader {
    /// Create a header with zeroed optional fields.
    pub fn new(kind: MessageKind) -> Self {
        Self {
            kind,
            timestamp: 0,
            repath_target: None,
            sequence: 0,
            ack: 0,
        }
    }

    /// PROBE header stamped with the send time.
    pub fn probe(timestamp: u64) -> Self {
        Self {
            timestamp,
            ..Self::new(MessageKind::Probe)
        }
    }

    /// REPATH header proposing `target`.
    pub fn repath(target: PathId, sequence: u64) -> Self {
        Self {
            repath_target: Some(target),
            sequence,
            ..Self::new(MessageKind::Repath)
        }
    }

    /// REPATH_ACK header echoing the REPATH sequence.
    pub fn repath_ack(ack: u64) -> Self {
        Self {
            ack,
            ..Self::new(MessageKind::RepathAck)
        }
    }

    /// Data-plane timestamp header.
    pub fn data_timestamp(timestamp: u64) -> Self {
        Self {
            timestamp,
            ..Self::new(MessageKind::Timestamp)
        }
    }

    /// Plane flag of this header.
    pub fn plane(&self) -> Plane {
        self.kind.plane()
    }

    /// Encode header to bytes.
    pub fn encode(&self, buf: &mut [u8]) -> Result<(), ProtocolError> {
        if buf.len() < HEADER_SIZE {
            return Err(ProtocolError::MalformedHeader);
        }

        buf[0] = self.plane() as u8;
        buf[1] = self.kind.code();
        BigEndian::write_u64(&mut buf[2..10], self.timestamp);
        buf[10] = self.repath_target.map_or(0, PathId::get);
        BigEndian::write_u64(&mut buf[11..19], self.sequence);
        BigEndian::write_u64(&mut buf[19..27], self.ack);
        buf[27] = 0;
        Ok(())
    }

    /// Decode header from bytes.
    pub fn decode(buf: &[u8]) -> Result<Self, ProtocolError> {
        if buf.len() < HEADER_SIZE {
            return Err(ProtocolError::MalformedHeader);
        }

        let plane = Plane::from_u8(buf[0]).ok_or(ProtocolError::InvalidPlane(buf[0]))?;
        let kind =
            MessageKind::from_wire(plane, buf[1]).ok_or(ProtocolError::InvalidMessageType(buf[1]))?;

        let repath_target = match kind {
            MessageKind::Repath => Some(PathId::new(buf[10])?),
            _ => None,
        };

        Ok(Self {
            kind,
            timestamp: BigEndian::read_u64(&buf[2..10]),
            repath_target,
            sequence: BigEndian::read_u64(&buf[11..19]),
            ack: BigEndian::read_u64(&buf[19..27]),
        })
    }
}
