//! # repath
//!
//! Multi-path control plane for a pair of endpoints joined by four parallel paths.
//!
//! The sender probes every path; the receiver measures one-way delays, watches the
//! delay trend on the active path and, when it degrades, negotiates a move to the
//! lowest-delay path with a REPATH / REPATH_ACK handshake.
//!
//! ## Architecture
//!
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                           Endpoint                              │
//! ├─────────────────────────────────────────────────────────────────┤
//! │   ProbeEmitter            ControlEngine                         │
//! │                ┌──────────┬───────────────┬─────────────────┐   │
//! │                │  Delay   │ Switch trigger │ Repath handshake│   │
//! │                │ estimator│  (gradients)   │  + timer wheel  │   │
//! │                └──────────┴───────────────┴─────────────────┘   │
//! ├─────────────────────────────────────────────────────────────────┤
//! │          Control codec (Ethernet / IPv4 / UDP envelope)         │
//! ├─────────────────────────────────────────────────────────────────┤
//! │        Transport pump ── ingress / egress rings ── NIC          │
//! │   ┌──────────┐  ┌──────────┐  ┌──────────┐  ┌──────────┐        │
//! │   │  Path 1  │  │  Path 2  │  │  Path 3  │  │  Path 4  │        │
//! │   └──────────┘  └──────────┘  └──────────┘  └──────────┘        │
//! └─────────────────────────────────────────────────────────────────┘

#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
// Allow stylistic lints that don't affect correctness
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::missing_const_for_fn)]
#![allow(clippy::doc_markdown)]              // ASCII diagrams in docs
#![allow(clippy::unreadable_literal)]
#![allow(clippy::cast_possible_truncation)]  // Port and path arithmetic
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::cast_precision_loss)]       // Gradients are f64
#![allow(clippy::cast_possible_wrap)]
#![allow(clippy::similar_names)]
#![allow(clippy::significant_drop_tightening)]
#![allow(clippy::option_if_let_else)]
#![allow(clippy::use_self)]
#![allow(clippy::redundant_pub_crate)]
#![allow(clippy::cognitive_complexity)]      // Handshake state machine
#![allow(clippy::too_many_lines)]
#![allow(clippy::future_not_send)]
#![allow(clippy::match_same_arms)]
#![allow(clippy::return_self_not_must_use)]
#![allow(clippy::ignored_unit_patterns)]

pub mod config;
pub mod engine;
pub mod error;
pub mod metrics;
pub mod protocol;
pub mod repath;
pub mod transport;
pub mod types;
pub mod util;

#[cfg(feature = "cli")]
pub mod cli;

pub use config::Config;
pub use error::{Error, Result};
pub use types::*;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::config::Config;
    pub use crate::engine::{ControlEngine, Endpoint, EngineEvent, ProbeEmitter};
    pub use crate::error::{Error, Result};
    pub use crate::metrics::{DelayEstimator, EngineStats, SwitchTrigger, Trigger};
    pub use crate::protocol::{ControlCodec, ControlHeader, MessageKind};
    pub use crate::repath::{RepathAction, RepathCoordinator};
    pub use crate::transport::{MemoryNic, Nic, UdpNic};
    pub use crate::types::*;
    pub use crate::util::{Clock, ManualClock, SystemClock};
}
