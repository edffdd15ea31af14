//! Periodic PROBE emission.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tracing::{debug, trace};

use crate::error::Error;
use crate::metrics::EngineStats;
use crate::protocol::ControlCodec;
use crate::transport::FrameQueue;
use crate::types::PathId;

/// Sends one PROBE per path each round.
pub struct ProbeEmitter {
    codec: Arc<ControlCodec>,
    egress: Arc<FrameQueue>,
    stats: Arc<EngineStats>,
}

impl ProbeEmitter {
    pub fn new(codec: Arc<ControlCodec>, egress: Arc<FrameQueue>, stats: Arc<EngineStats>) -> Self {
        Self {
            codec,
            egress,
            stats,
        }
    }

    /// Queue a PROBE on every path. Returns how many were queued.
    pub fn emit_round(&self) -> usize {
        let mut queued = 0;

        for path in PathId::all() {
            let frame = match self.codec.encode_probe(path) {
                Ok(frame) => frame,
                Err(Error::BufferExhausted) => {
                    self.stats.buffer_exhausted.inc();
                    debug!(%path, "no buffer for probe, skipping");
                    continue;
                }
                Err(e) => {
                    debug!(%path, error = %e, "probe encoding failed");
                    continue;
                }
            };

            match self.egress.push_or_drop(frame) {
                Ok(()) => {
                    self.stats.probes_sent.inc();
                    queued += 1;
                }
                Err(e) => {
                    self.stats.egress_dropped.inc();
                    debug!(%path, error = %e, "probe dropped");
                }
            }
        }

        trace!(queued, "probe round");
        queued
    }

    /// Emit a round every `interval` until `running` is cleared.
    pub async fn run(self, running: Arc<AtomicBool>, interval: Duration) {
        debug!(?interval, "probe emitter started");

        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            if !running.load(Ordering::SeqCst) {
                break;
            }
            self.emit_round();
        }

        debug!("probe emitter stopped");
    }
}
