//! Switch-trigger evaluation on the active path.
//!
//! Each delay sample of the active path updates a short history and the
//! observed delay range. Two signals come out of it:
//!
//! - a *try* signal when the delay is either climbing steeply, or has been
//!   rising for three samples while already close to the threshold;
//! - a *force* signal once the delay reaches the threshold
//!   `min + R * (max - min)`.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Outcome of evaluating one delay sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Trigger {
    NoAction,
    TrySwitch,
    ForceSwitch,
}

impl Trigger {
    /// Whether the path should be renegotiated.
    pub fn is_switch(self) -> bool {
        !matches!(self, Trigger::NoAction)
    }
}

impl std::fmt::Display for Trigger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Trigger::NoAction => write!(f, "no-action"),
            Trigger::TrySwitch => write!(f, "try-switch"),
            Trigger::ForceSwitch => write!(f, "force-switch"),
        }
    }
}

/// Delay history of the active path.
///
/// Delays are nanoseconds; gradients are nanoseconds of delay per nanosecond
/// of elapsed time.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PathHealth {
    /// Samples observed so far.
    pub samples: u64,

    pub cur_ts: u64,
    pub last_ts: u64,
    pub delta_t: u64,

    pub cur_delay: u64,
    pub last_1_delay: u64,
    pub last_2_delay: u64,
    pub last_3_delay: u64,

    pub cur_grad: f64,
    pub last_1_grad: f64,
    pub last_2_grad: f64,
    pub last_3_grad: f64,

    pub max_delay: u64,
    pub min_delay: u64,
    pub threshold: u64,
}

impl PathHealth {
    /// Brief summary for logs.
    pub fn summary(&self) -> String {
        format!(
            "delay={}ns min={}ns max={}ns threshold={}ns grad={:.3e}",
            self.cur_delay, self.min_delay, self.max_delay, self.threshold, self.cur_grad
        )
    }
}

/// Evaluates delay samples of the active path.
#[derive(Debug, Clone)]
pub struct SwitchTrigger {
    ratio: f64,
    health: PathHealth,
}

impl SwitchTrigger {
    /// Create an evaluator with threshold ratio `R`.
    pub fn new(ratio: f64) -> Self {
        Self {
            ratio,
            health: PathHealth::default(),
        }
    }

    /// Current history.
    pub fn health(&self) -> &PathHealth {
        &self.health
    }

    /// Feed one sample taken at `ts` with delay `delay`.
    ///
    /// Samples that do not move time forward are rejected with
    /// [`Error::ClockAnomaly`] and leave the history untouched.
    pub fn observe(&mut self, ts: u64, delay: u64) -> Result<Trigger> {
        let h = &mut self.health;

        if h.samples == 0 {
            h.samples = 1;
            h.cur_ts = ts;
            h.cur_delay = delay;
            h.max_delay = delay;
            h.min_delay = delay;
            h.threshold = delay;
            return Ok(Trigger::NoAction);
        }

        if ts <= h.cur_ts {
            return Err(Error::ClockAnomaly(format!(
                "sample at {ts} does not follow {}",
                h.cur_ts
            )));
        }

        h.samples += 1;

        h.last_3_delay = h.last_2_delay;
        h.last_2_delay = h.last_1_delay;
        h.last_1_delay = h.cur_delay;
        h.cur_delay = delay;

        h.last_3_grad = h.last_2_grad;
        h.last_2_grad = h.last_1_grad;
        h.last_1_grad = h.cur_grad;

        h.last_ts = h.cur_ts;
        h.cur_ts = ts;
        h.delta_t = h.cur_ts - h.last_ts;

        h.max_delay = h.max_delay.max(delay);
        h.min_delay = h.min_delay.min(delay);

        h.threshold = threshold(h.min_delay, h.max_delay, self.ratio);

        let delta_t = h.delta_t as f64;
        h.cur_grad = (h.cur_delay as f64 - h.last_1_delay as f64) / delta_t;

        let margin = h.threshold - h.min_delay;

        let trend_near_threshold = 2 * u128::from(h.last_3_delay) >= u128::from(margin);
        let monotonic_rise = h.last_1_grad > 0.0 && h.last_2_grad > 0.0 && h.last_3_grad > 0.0;
        let steep_rise = h.cur_grad >= margin as f64 / (2.0 * delta_t);

        if h.cur_delay >= h.threshold {
            return Ok(Trigger::ForceSwitch);
        }

        if (trend_near_threshold && monotonic_rise) || steep_rise {
            return Ok(Trigger::TrySwitch);
        }

        Ok(Trigger::NoAction)
    }
}

/// `min + floor(R * (max - min))`.
///
/// `R * range` is nudged up by a few ulps before flooring so a product that
/// is an integer in exact arithmetic (0.7 * 90 = 63) is not truncated to the
/// integer below it.
fn threshold(min: u64, max: u64, ratio: f64) -> u64 {
    let scaled = ratio * (max - min) as f64;
    let margin = (scaled * (1.0 + 4.0 * f64::EPSILON)).floor() as u64;
    min + margin.min(max - min)
}
