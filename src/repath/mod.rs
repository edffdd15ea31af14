//! Active-path renegotiation.
//!
//! One side proposes a new path with REPATH and retransmits until the peer
//! answers with REPATH_ACK or the retry budget runs out:
//!
//! ```text
//!            trigger / send REPATH, arm timer
//!   ┌──────┐ ─────────────────────────────────▶ ┌─────────────┐
//!   │ Idle │                                     │ AwaitingAck │ ──┐ timeout:
//!   └──────┘ ◀───────────────────────────────── └─────────────┘ ◀─┘ resend, rearm
//!          matching ACK: commit / budget exhausted: abandon
//! ```

mod coordinator;
mod timer;

pub use coordinator::{NegotiationState, RepathAction, RepathCoordinator};
pub use timer::{TimerHandle, TimerKind, TimerService, TimerWheel};
