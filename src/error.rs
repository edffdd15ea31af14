//! Error types for repath.

use std::io;
use std::net::SocketAddr;

use thiserror::Error;

use crate::types::PathId;

/// Result type alias for repath operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for repath.
#[derive(Error, Debug)]
pub enum Error {
    // Wire errors
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    // Resource errors
    #[error("packet buffer pool exhausted")]
    BufferExhausted,

    #[error("{queue} queue full")]
    QueueFull { queue: &'static str },

    // Negotiation errors
    #[error("repath to {target} abandoned after {attempts} attempts")]
    NegotiationAbandoned { target: PathId, attempts: u32 },

    // Timing errors
    #[error("clock anomaly: {0}")]
    ClockAnomaly(String),

    // Transport errors
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    // Configuration errors
    #[error("configuration error: {0}")]
    Config(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    // General errors
    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

/// Transport layer errors.
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("bind failed on {addr}: {reason}")]
    BindFailed { addr: SocketAddr, reason: String },

    #[error("send failed: {0}")]
    SendFailed(String),

    #[error("receive failed: {0}")]
    ReceiveFailed(String),
}

/// Control header parsing errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("malformed header")]
    MalformedHeader,

    #[error("malformed packet: {0}")]
    MalformedPacket(String),

    #[error("invalid plane flag: {0}")]
    InvalidPlane(u8),

    #[error("invalid message type: {0}")]
    InvalidMessageType(u8),

    #[error("path id out of range: {0}")]
    InvalidPath(u16),
}

impl Error {
    /// Check if the error only costs the current packet or emission cycle.
    ///
    /// Every error the engine produces while running is recoverable; only
    /// configuration and bind failures at startup are not.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Error::Protocol(_)
                | Error::BufferExhausted
                | Error::QueueFull { .. }
                | Error::NegotiationAbandoned { .. }
                | Error::ClockAnomaly(_)
                | Error::Transport(
                    TransportError::SendFailed(_) | TransportError::ReceiveFailed(_)
                )
        )
    }

    /// Check if the error means a received packet was garbled.
    pub fn is_malformed(&self) -> bool {
        matches!(self, Error::Protocol(_))
    }
}
