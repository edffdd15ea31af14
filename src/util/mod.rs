//! Utility functions and helpers.

mod clock;
mod throttle;

pub use clock::{duration_ns, Clock, ManualClock, SystemClock};
pub use throttle::LogThrottle;

use std::time::Duration;

/// Format a nanosecond delay for humans.
pub fn format_delay(ns: u64) -> String {
    let d = Duration::from_nanos(ns);
    if d >= Duration::from_secs(1) {
        format!("{:.3}s", d.as_secs_f64())
    } else if d >= Duration::from_millis(1) {
        format!("{:.2}ms", d.as_secs_f64() * 1000.0)
    } else {
        format!("{:.1}us", d.as_secs_f64() * 1_000_000.0)
    }
}
