//! NIC I/O pump.
//!
//! The only loop touching the NIC: it moves received frames into the ingress
//! queue and queued frames from the egress queue onto the wire. It never
//! looks inside a frame.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use super::{FrameQueue, Nic, PooledBuffer};
use crate::metrics::EngineStats;
use crate::util::LogThrottle;

/// Moves frames between a [`Nic`] and the two frame queues.
pub struct TransportPump<N: Nic> {
    nic: N,
    ingress: Arc<FrameQueue>,
    egress: Arc<FrameQueue>,
    stats: Arc<EngineStats>,
    burst: usize,
    rx_frames: Vec<PooledBuffer>,
    tx_frames: Vec<PooledBuffer>,
    errors: LogThrottle,
}

impl<N: Nic> TransportPump<N> {
    pub fn new(
        nic: N,
        ingress: Arc<FrameQueue>,
        egress: Arc<FrameQueue>,
        stats: Arc<EngineStats>,
        burst: usize,
    ) -> Self {
        let burst = burst.max(1);
        Self {
            nic,
            ingress,
            egress,
            stats,
            burst,
            rx_frames: Vec::with_capacity(burst),
            tx_frames: Vec::with_capacity(burst),
            errors: LogThrottle::default(),
        }
    }

    /// The NIC being pumped.
    pub fn nic(&self) -> &N {
        &self.nic
    }

    /// One receive burst and one transmit burst. Returns frames moved.
    pub fn poll_once(&mut self) -> usize {
        self.receive() + self.transmit()
    }

    fn receive(&mut self) -> usize {
        if let Err(e) = self.nic.rx_burst(&mut self.rx_frames, self.burst) {
            self.stats.nic_errors.inc();
            if let Some(suppressed) = self.errors.check() {
                warn!(error = %e, suppressed, "NIC receive failed");
            }
        }

        let received = self.rx_frames.len();
        self.stats.frames_received.add(received as u64);

        for frame in self.rx_frames.drain(..) {
            if self.ingress.push_or_drop(frame).is_err() {
                self.stats.ingress_dropped.inc();
            }
        }

        received
    }

    fn transmit(&mut self) -> usize {
        self.egress.pop_burst(&mut self.tx_frames, self.burst);
        if self.tx_frames.is_empty() {
            return 0;
        }

        let mut sent = 0;
        // First attempt plus one retry for whatever the NIC did not take
        for _ in 0..2 {
            match self.nic.tx_burst(&mut self.tx_frames) {
                Ok(n) => sent += n,
                Err(e) => {
                    self.stats.nic_errors.inc();
                    if let Some(suppressed) = self.errors.check() {
                        warn!(error = %e, suppressed, "NIC transmit failed");
                    }
                }
            }
            if self.tx_frames.is_empty() {
                break;
            }
        }

        let unsent = self.tx_frames.len();
        if unsent > 0 {
            debug!(unsent, "dropping frames the NIC would not take");
            self.stats.egress_dropped.add(unsent as u64);
            self.tx_frames.clear();
        }

        self.stats.frames_sent.add(sent as u64);
        sent + unsent
    }

    /// Pump until `running` is cleared, sleeping `idle_backoff` whenever a
    /// pass moved nothing.
    pub async fn run(mut self, running: Arc<AtomicBool>, idle_backoff: Duration) {
        debug!("transport pump started");

        while running.load(Ordering::SeqCst) {
            if self.poll_once() == 0 {
                tokio::time::sleep(idle_backoff).await;
            } else {
                tokio::task::yield_now().await;
            }
        }

        debug!("transport pump stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{Result, TransportError};
    use crate::transport::{BufferPool, MemoryNic};

    fn queues(capacity: usize) -> (Arc<FrameQueue>, Arc<FrameQueue>) {
        (
            Arc::new(FrameQueue::new("ingress", capacity)),
            Arc::new(FrameQueue::new("egress", capacity)),
        )
    }

    #[test]
    fn test_moves_frames_both_ways() {
        let pool = BufferPool::new(16, 16, 64);
        let (nic, _peer) = MemoryNic::pair(pool.clone(), pool.clone(), 16);
        let link = nic.control();
        let (ingress, egress) = queues(16);
        let stats = Arc::new(EngineStats::new());

        let mut pump = TransportPump::new(nic, ingress.clone(), egress.clone(), stats.clone(), 32);

        link.inject(vec![1, 2, 3]);
        let mut out = pool.try_get().unwrap();
        out.copy_from(&[9]);
        egress.push(out).unwrap();

        assert_eq!(pump.poll_once(), 2);
        assert_eq!(ingress.pop().unwrap().as_slice(), &[1, 2, 3]);

        let snap = stats.snapshot();
        assert_eq!(snap.frames_received, 1);
        assert_eq!(snap.frames_sent, 1);
    }

    #[test]
    fn test_ingress_overflow_counted() {
        let pool = BufferPool::new(8, 8, 64);
        let (nic, _peer) = MemoryNic::pair(pool.clone(), pool.clone(), 8);
        let link = nic.control();
        let (ingress, egress) = queues(2);
        let stats = Arc::new(EngineStats::new());
        let mut pump = TransportPump::new(nic, ingress.clone(), egress, stats.clone(), 32);

        for i in 0..5 {
            link.inject(vec![i]);
        }
        pump.poll_once();

        assert_eq!(ingress.len(), 2);
        assert_eq!(stats.snapshot().ingress_dropped, 3);
        // ingress order is receive order
        assert_eq!(ingress.pop().unwrap().as_slice(), &[0]);
    }

    #[test]
    fn test_burst_size_respected() {
        let pool = BufferPool::new(8, 8, 64);
        let (nic, _peer) = MemoryNic::pair(pool.clone(), pool.clone(), 8);
        let link = nic.control();
        let (ingress, egress) = queues(8);
        let stats = Arc::new(EngineStats::new());
        let mut pump = TransportPump::new(nic, ingress.clone(), egress, stats, 2);

        for i in 0..3 {
            link.inject(vec![i]);
        }
        assert_eq!(pump.poll_once(), 2);
        assert_eq!(pump.poll_once(), 1);
    }

    struct FailingNic;

    impl Nic for FailingNic {
        fn rx_burst(&mut self, _out: &mut Vec<PooledBuffer>, _max: usize) -> Result<usize> {
            Err(TransportError::ReceiveFailed("link down".into()).into())
        }

        fn tx_burst(&mut self, _frames: &mut Vec<PooledBuffer>) -> Result<usize> {
            Err(TransportError::SendFailed("link down".into()).into())
        }
    }

    #[test]
    fn test_nic_errors_are_survivable() {
        let pool = BufferPool::new(2, 2, 64);
        let (ingress, egress) = queues(4);
        let stats = Arc::new(EngineStats::new());
        let mut pump = TransportPump::new(FailingNic, ingress, egress.clone(), stats.clone(), 8);

        egress.push(pool.try_get().unwrap()).unwrap();
        pump.poll_once();

        let snap = stats.snapshot();
        // one receive failure, two transmit attempts
        assert_eq!(snap.nic_errors, 3);
        assert_eq!(snap.egress_dropped, 1);
        assert_eq!(pool.in_use(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_stops_on_flag() {
        let pool = BufferPool::new(4, 4, 64);
        let (nic, _peer) = MemoryNic::pair(pool.clone(), pool, 4);
        let (ingress, egress) = queues(4);
        let pump = TransportPump::new(nic, ingress, egress, Arc::new(EngineStats::new()), 8);

        let running = Arc::new(AtomicBool::new(true));
        let task = tokio::spawn(pump.run(running.clone(), Duration::from_millis(1)));

        tokio::time::sleep(Duration::from_millis(20)).await;
        running.store(false, Ordering::SeqCst);
        task.await.unwrap();
    }
}
