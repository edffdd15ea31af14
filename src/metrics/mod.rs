//! Path measurement and engine counters.
//!
//! This module provides:
//! - One-way delay per path from PROBE timestamps
//! - Switch-trigger evaluation on the active path
//! - Shared atomic counters for the worker loops

mod delay;
mod stats;
mod trigger;

pub use delay::DelayEstimator;
pub use stats::{Counter, EngineStats, StatsSnapshot};
pub use trigger::{PathHealth, SwitchTrigger, Trigger};
