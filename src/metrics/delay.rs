//! Per-path one-way delay table.

use std::time::Duration;

use crate::error::{Error, Result};
use crate::types::{PathId, PathTable, PATH_NB};
use crate::util::duration_ns;

/// Marker for a path that has not been measured yet.
const UNMEASURED: u64 = u64::MAX;

/// Latest probe delay per path, plus the path with the smallest one.
#[derive(Debug, Clone)]
pub struct DelayEstimator {
    delays: PathTable<u64>,
    best: PathId,
    bias_ns: u64,
}

impl DelayEstimator {
    /// Create an estimator adding `clock_bias` to every raw delay.
    ///
    /// The bias keeps delays positive when the two hosts' clocks disagree by
    /// less than that amount.
    pub fn new(clock_bias: Duration) -> Self {
        Self {
            delays: PathTable::filled(UNMEASURED),
            best: PathId::FIRST,
            bias_ns: duration_ns(clock_bias),
        }
    }

    /// Record a PROBE that left the peer at `send_ts` and arrived at `recv_ts`.
    ///
    /// Returns the biased delay stored for `path`.
    pub fn record_probe(&mut self, path: PathId, send_ts: u64, recv_ts: u64) -> Result<u64> {
        let delay = self.measure(send_ts, recv_ts)?;
        self.delays[path] = delay;
        self.recompute();
        Ok(delay)
    }

    /// Biased delay of a packet without recording it.
    pub fn measure(&self, send_ts: u64, recv_ts: u64) -> Result<u64> {
        let raw = i128::from(recv_ts) - i128::from(send_ts) + i128::from(self.bias_ns);
        let delay = u64::try_from(raw).map_err(|_| {
            Error::ClockAnomaly(format!("negative delay: send={send_ts} recv={recv_ts}"))
        })?;

        // Keep the sentinel free for "never measured"
        Ok(delay.min(UNMEASURED - 1))
    }

    /// Path with the lowest recorded delay; ties go to the lower id.
    pub fn best_path(&self) -> PathId {
        self.best
    }

    /// Take a peer's proposal as the best path until the next measurement.
    pub fn adopt(&mut self, path: PathId) {
        self.best = path;
    }

    /// Last recorded delay of `path`.
    pub fn delay(&self, path: PathId) -> Option<u64> {
        Some(self.delays[path]).filter(|&d| d != UNMEASURED)
    }

    /// Delays of all paths in ascending path order.
    pub fn snapshot(&self) -> [Option<u64>; PATH_NB] {
        let mut out = [None; PATH_NB];
        for path in PathId::all() {
            out[path.index()] = self.delay(path);
        }
        out
    }

    fn recompute(&mut self) {
        let mut best = PathId::FIRST;
        let mut min = self.delays[best];
        for (path, &delay) in self.delays.iter() {
            if delay < min {
                min = delay;
                best = path;
            }
        }
        self.best = best;
    }
}

impl Default for DelayEstimator {
    fn default() -> Self {
        Self::new(Duration::from_secs(1))
    }
}
