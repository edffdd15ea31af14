//! Engine counters shared across the worker loops.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

/// Monotonic event counter.
#[derive(Debug, Default)]
pub struct Counter(AtomicU64);

impl Counter {
    pub fn inc(&self) {
        self.add(1);
    }

    pub fn add(&self, n: u64) {
        self.0.fetch_add(n, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

/// Counters updated by the pump, probe and processing loops.
#[derive(Debug, Default)]
pub struct EngineStats {
    // Pump
    pub frames_received: Counter,
    pub frames_sent: Counter,
    pub ingress_dropped: Counter,
    pub egress_dropped: Counter,
    pub nic_errors: Counter,

    // Probe loop
    pub probes_sent: Counter,
    pub buffer_exhausted: Counter,

    // Processing loop
    pub probes_received: Counter,
    pub timestamps_received: Counter,
    pub not_control: Counter,
    pub malformed: Counter,
    pub clock_anomalies: Counter,
    pub triggers: Counter,
    pub repaths_sent: Counter,
    pub repath_retries: Counter,
    pub repaths_received: Counter,
    pub acks_sent: Counter,
    pub acks_received: Counter,
    pub switches: Counter,
    pub abandoned: Counter,
}

impl EngineStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Point-in-time copy of every counter.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            frames_received: self.frames_received.get(),
            frames_sent: self.frames_sent.get(),
            ingress_dropped: self.ingress_dropped.get(),
            egress_dropped: self.egress_dropped.get(),
            nic_errors: self.nic_errors.get(),
            probes_sent: self.probes_sent.get(),
            buffer_exhausted: self.buffer_exhausted.get(),
            probes_received: self.probes_received.get(),
            timestamps_received: self.timestamps_received.get(),
            not_control: self.not_control.get(),
            malformed: self.malformed.get(),
            clock_anomalies: self.clock_anomalies.get(),
            triggers: self.triggers.get(),
            repaths_sent: self.repaths_sent.get(),
            repath_retries: self.repath_retries.get(),
            repaths_received: self.repaths_received.get(),
            acks_sent: self.acks_sent.get(),
            acks_received: self.acks_received.get(),
            switches: self.switches.get(),
            abandoned: self.abandoned.get(),
        }
    }
}

/// Plain copy of [`EngineStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub frames_received: u64,
    pub frames_sent: u64,
    pub ingress_dropped: u64,
    pub egress_dropped: u64,
    pub nic_errors: u64,
    pub probes_sent: u64,
    pub buffer_exhausted: u64,
    pub probes_received: u64,
    pub timestamps_received: u64,
    pub not_control: u64,
    pub malformed: u64,
    pub clock_anomalies: u64,
    pub triggers: u64,
    pub repaths_sent: u64,
    pub repath_retries: u64,
    pub repaths_received: u64,
    pub acks_sent: u64,
    pub acks_received: u64,
    pub switches: u64,
    pub abandoned: u64,
}

impl StatsSnapshot {
    /// Frames lost to full queues.
    pub fn dropped(&self) -> u64 {
        self.ingress_dropped + self.egress_dropped
    }
}

impl fmt::Display for StatsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "rx={} tx={} dropped={} probes={}/{} repath={}/{} ack={}/{} switches={} abandoned={} malformed={}",
            self.frames_received,
            self.frames_sent,
            self.dropped(),
            self.probes_sent,
            self.probes_received,
            self.repaths_sent,
            self.repaths_received,
            self.acks_sent,
            self.acks_received,
            self.switches,
            self.abandoned,
            self.malformed,
        )
    }
}
