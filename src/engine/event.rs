//! Engine notifications.

use serde::{Deserialize, Serialize};

use crate::types::PathId;

/// How a path switch came about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SwitchCause {
    /// Our REPATH was acknowledged.
    Committed,
    /// We accepted the peer's REPATH.
    Adopted,
}

/// State changes published by the processing loop.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum EngineEvent {
    /// Lowest-delay path changed after a measurement.
    BestPathChanged { from: PathId, to: PathId },
    /// REPATH sent for a fresh negotiation.
    NegotiationStarted { target: PathId, sequence: u64 },
    /// Active path changed.
    PathSwitched {
        from: PathId,
        to: PathId,
        cause: SwitchCause,
    },
    /// Negotiation gave up without an ACK.
    NegotiationAbandoned { target: PathId, attempts: u32 },
}
