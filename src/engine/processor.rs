//! Control processing loop.
//!
//! Owns the delay table, the active-path history and the negotiation state.
//! Nothing here is shared with other loops except through the frame queues,
//! the [`ActivePath`] handle, the counters and the event channel.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use super::{ActivePath, EngineEvent, Shared, SwitchCause};
use crate::config::EngineConfig;
use crate::error::{Error, ProtocolError, Result};
use crate::metrics::{DelayEstimator, EngineStats, PathHealth, SwitchTrigger, Trigger};
use crate::protocol::{ControlCodec, ControlPacket, Decoded, MessageKind};
use crate::repath::{RepathAction, RepathCoordinator, TimerWheel};
use crate::transport::{FrameQueue, PooledBuffer};
use crate::types::{PathId, Role};
use crate::util::{duration_ns, format_delay, Clock, LogThrottle};

/// The processing loop of one endpoint.
pub struct ControlEngine {
    role: Role,
    codec: Arc<ControlCodec>,
    clock: Arc<dyn Clock>,
    ingress: Arc<FrameQueue>,
    egress: Arc<FrameQueue>,
    stats: Arc<EngineStats>,
    active: ActivePath,
    events: broadcast::Sender<EngineEvent>,

    estimator: DelayEstimator,
    trigger: SwitchTrigger,
    coordinator: RepathCoordinator,
    timers: TimerWheel,

    burst: usize,
    batch: Vec<PooledBuffer>,
    malformed_log: LogThrottle,

    timer_resolution_ns: u64,
    last_timer_tick: u64,
    stats_interval_ns: u64,
    last_stats_log: u64,
}

impl ControlEngine {
    pub(crate) fn new(config: &EngineConfig, role: Role, shared: &Shared) -> Self {
        let now = shared.clock.now_ns();
        let burst = config.burst_size.max(1);

        Self {
            role,
            codec: Arc::clone(&shared.codec),
            clock: Arc::clone(&shared.clock),
            ingress: Arc::clone(&shared.ingress),
            egress: Arc::clone(&shared.egress),
            stats: Arc::clone(&shared.stats),
            active: shared.active.clone(),
            events: shared.events.clone(),
            estimator: DelayEstimator::new(config.clock_bias),
            trigger: SwitchTrigger::new(config.threshold_ratio),
            coordinator: RepathCoordinator::new(config),
            timers: TimerWheel::new(Arc::clone(&shared.clock)),
            burst,
            batch: Vec::with_capacity(burst),
            malformed_log: LogThrottle::default(),
            timer_resolution_ns: duration_ns(config.timer_resolution),
            last_timer_tick: now,
            stats_interval_ns: duration_ns(config.stats_interval),
            last_stats_log: now,
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn estimator(&self) -> &DelayEstimator {
        &self.estimator
    }

    pub fn coordinator(&self) -> &RepathCoordinator {
        &self.coordinator
    }

    /// History of the active path.
    pub fn health(&self) -> &PathHealth {
        self.trigger.health()
    }

    pub fn active_path(&self) -> PathId {
        self.active.get()
    }

    /// Process one ingress burst, then run the timer and stats ticks if due.
    ///
    /// Returns the number of frames and timers handled.
    pub fn poll_once(&mut self) -> usize {
        let mut batch = std::mem::take(&mut self.batch);
        let frames = self.ingress.pop_burst(&mut batch, self.burst);

        for frame in batch.drain(..) {
            self.handle_frame(frame.as_slice());
        }
        self.batch = batch;

        let now = self.clock.now_ns();
        let mut fired = 0;

        if now.saturating_sub(self.last_timer_tick) >= self.timer_resolution_ns {
            self.last_timer_tick = now;
            fired = self.manage_timers();
        }

        if now.saturating_sub(self.last_stats_log) >= self.stats_interval_ns {
            self.last_stats_log = now;
            self.log_stats();
        }

        frames + fired
    }

    /// Classify and dispatch one received frame.
    pub fn handle_frame(&mut self, frame: &[u8]) {
        match self.codec.decode(frame) {
            Ok(Decoded::Control(packet)) => self.dispatch(packet),
            Ok(Decoded::NotControlTraffic) => self.stats.not_control.inc(),
            Err(e) => self.on_malformed(&e),
        }
    }

    fn dispatch(&mut self, packet: ControlPacket) {
        let header = packet.header;
        match header.kind {
            MessageKind::Probe => self.on_probe(packet.path, header.timestamp),
            MessageKind::Timestamp => self.on_timestamp(packet.path, header.timestamp),
            MessageKind::Repath => {
                // decode guarantees a target on REPATH
                if let Some(target) = header.repath_target {
                    self.on_repath(target, header.sequence);
                }
            }
            MessageKind::RepathAck => self.on_repath_ack(header.ack),
        }
    }

    fn on_probe(&mut self, path: PathId, send_ts: u64) {
        self.stats.probes_received.inc();
        let now = self.clock.now_ns();
        let best_before = self.estimator.best_path();

        let delay = match self.estimator.record_probe(path, send_ts, now) {
            Ok(delay) => delay,
            Err(e) => return self.on_clock_anomaly(path, &e),
        };

        let best = self.estimator.best_path();
        debug!(%path, delay = %format_delay(delay), %best, "probe");

        if best != best_before {
            info!(from = %best_before, to = %best, "best path changed");
            let _ = self.events.send(EngineEvent::BestPathChanged {
                from: best_before,
                to: best,
            });
        }

        if path == self.active.get() {
            self.evaluate(send_ts, delay);
        }
    }

    fn on_timestamp(&mut self, path: PathId, send_ts: u64) {
        self.stats.timestamps_received.inc();

        if path != self.active.get() {
            debug!(%path, active = %self.active.get(), "timestamp off the active path ignored");
            return;
        }

        match self.estimator.measure(send_ts, self.clock.now_ns()) {
            Ok(delay) => self.evaluate(send_ts, delay),
            Err(e) => self.on_clock_anomaly(path, &e),
        }
    }

    fn evaluate(&mut self, ts: u64, delay: u64) {
        let trigger = match self.trigger.observe(ts, delay) {
            Ok(trigger) => trigger,
            Err(e) => return self.on_clock_anomaly(self.active.get(), &e),
        };

        if trigger == Trigger::NoAction {
            return;
        }

        self.stats.triggers.inc();
        let best = self.estimator.best_path();
        let active = self.active.get();
        debug!(%trigger, %active, %best, health = %self.trigger.health().summary(), "switch trigger");

        let actions = self.coordinator.on_trigger(&mut self.timers, best, active);
        self.apply(actions);
    }

    fn on_repath(&mut self, target: PathId, sequence: u64) {
        self.stats.repaths_received.inc();
        debug!(%target, sequence, "REPATH received");

        let actions = self.coordinator.on_repath(&mut self.timers, target, sequence);
        self.apply(actions);
    }

    fn on_repath_ack(&mut self, ack: u64) {
        self.stats.acks_received.inc();
        debug!(ack, "REPATH_ACK received");

        let actions = self.coordinator.on_repath_ack(&mut self.timers, ack);
        self.apply(actions);
    }

    fn manage_timers(&mut self) -> usize {
        let expired = self.timers.poll_expired();
        let fired = expired.len();

        for (handle, kind) in expired {
            let best = self.estimator.best_path();
            let actions = self.coordinator.on_timer(&mut self.timers, handle, kind, best);
            self.apply(actions);
        }

        fired
    }

    fn apply(&mut self, actions: Vec<RepathAction>) {
        for action in actions {
            match action {
                RepathAction::SendRepath {
                    target,
                    via,
                    sequence,
                    attempt,
                } => {
                    self.stats.repaths_sent.inc();
                    if attempt == 1 {
                        info!(%target, %via, sequence, "proposing path switch");
                        let _ = self
                            .events
                            .send(EngineEvent::NegotiationStarted { target, sequence });
                    } else {
                        self.stats.repath_retries.inc();
                        debug!(%target, %via, sequence, attempt, "REPATH unanswered, retransmitting");
                    }
                    let frame = self.codec.encode_repath(target, via, sequence);
                    self.emit(frame, "REPATH");
                }
                RepathAction::SendRepathAck { via, ack } => {
                    self.stats.acks_sent.inc();
                    let frame = self.codec.encode_repath_ack(via, ack);
                    self.emit(frame, "REPATH_ACK");
                }
                RepathAction::Committed(path) => self.switch_to(path, SwitchCause::Committed),
                RepathAction::Adopted(path) => {
                    self.estimator.adopt(path);
                    self.switch_to(path, SwitchCause::Adopted);
                }
                RepathAction::Abandoned { target, attempts } => {
                    self.stats.abandoned.inc();
                    let e = Error::NegotiationAbandoned { target, attempts };
                    warn!(error = %e, active = %self.active.get(), "keeping current path");
                    let _ = self
                        .events
                        .send(EngineEvent::NegotiationAbandoned { target, attempts });
                }
            }
        }
    }

    fn switch_to(&mut self, path: PathId, cause: SwitchCause) {
        let Some(from) = self.active.set(path, self.clock.now_ns()) else {
            debug!(%path, ?cause, "already on path");
            return;
        };

        self.stats.switches.inc();
        info!(%from, to = %path, ?cause, "active path switched");
        let _ = self.events.send(EngineEvent::PathSwitched {
            from,
            to: path,
            cause,
        });
    }

    fn emit(&self, frame: Result<PooledBuffer>, what: &'static str) {
        let frame = match frame {
            Ok(frame) => frame,
            Err(Error::BufferExhausted) => {
                self.stats.buffer_exhausted.inc();
                debug!(what, "no buffer, skipping emission");
                return;
            }
            Err(e) => {
                warn!(what, error = %e, "encoding failed");
                return;
            }
        };

        if let Err(e) = self.egress.push_or_drop(frame) {
            self.stats.egress_dropped.inc();
            debug!(what, error = %e, "frame dropped");
        }
    }

    fn on_malformed(&mut self, e: &ProtocolError) {
        self.stats.malformed.inc();
        debug!(error = %e, "malformed control frame");
        if let Some(suppressed) = self.malformed_log.check() {
            warn!(error = %e, suppressed, "dropping malformed control frames");
        }
    }

    fn on_clock_anomaly(&self, path: PathId, e: &Error) {
        self.stats.clock_anomalies.inc();
        debug!(%path, error = %e, "sample ignored");
    }

    fn log_stats(&self) {
        let snapshot = self.stats.snapshot();
        info!(
            role = %self.role,
            active = %self.active.get(),
            best = %self.estimator.best_path(),
            "{snapshot}"
        );
    }

    /// Process until `running` is cleared, sleeping `idle_backoff` whenever
    /// a pass found nothing to do.
    pub async fn run(mut self, running: Arc<AtomicBool>, idle_backoff: Duration) {
        debug!(role = %self.role, "processing loop started");

        while running.load(Ordering::SeqCst) {
            if self.poll_once() == 0 {
                tokio::time::sleep(idle_backoff).await;
            } else {
                tokio::task::yield_now().await;
            }
        }

        debug!("processing loop stopped");
    }
}

impl std::fmt::Debug for ControlEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ControlEngine")
            .field("role", &self.role)
            .field("active", &self.active.get())
            .field("best", &self.estimator.best_path())
            .field("negotiation", &self.coordinator.state())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::engine::Endpoint;
    use crate::protocol::{ETH_HEADER_LEN, IPV4_HEADER_LEN};
    use crate::transport::BufferPool;
    use crate::util::ManualClock;

    const START: u64 = 1_700_000_000_000_000_000;

    struct Harness {
        clock: Arc<ManualClock>,
        endpoint: Endpoint,
        engine: ControlEngine,
        peer: ControlCodec,
        events: broadcast::Receiver<EngineEvent>,
    }

    impl Harness {
        fn new() -> Self {
            let clock = Arc::new(ManualClock::new(START));
            let config = Config::default();
            let peer = ControlCodec::new(
                config.envelope.mirrored(),
                BufferPool::new(0, 64, 128),
                clock.clone(),
            );
            let endpoint = Endpoint::new(config, clock.clone()).unwrap();
            let engine = endpoint.control_engine();
            let events = endpoint.subscribe();

            Self {
                clock,
                endpoint,
                engine,
                peer,
                events,
            }
        }

        /// Peer probes `path`; the frame spends `flight` on the wire.
        fn probe(&mut self, id: u8, flight: Duration) {
            let frame = self.peer.encode_probe(path(id)).unwrap();
            self.clock.advance(flight);
            self.engine.handle_frame(frame.as_slice());
        }

        fn deliver(&mut self, frame: PooledBuffer) {
            self.engine.handle_frame(frame.as_slice());
        }

        fn sent(&self) -> Vec<ControlPacket> {
            std::iter::from_fn(|| self.endpoint.egress().pop())
                .map(|frame| match self.peer.decode(frame.as_slice()).unwrap() {
                    Decoded::Control(packet) => packet,
                    Decoded::NotControlTraffic => panic!("engine sent foreign traffic"),
                })
                .collect()
        }

        fn events(&mut self) -> Vec<EngineEvent> {
            std::iter::from_fn(|| self.events.try_recv().ok()).collect()
        }

        /// Path 3 fastest, then two samples on active path 1 with a sharp rise.
        fn degrade_active_path(&mut self) {
            self.probe(3, Duration::from_micros(100));
            self.probe(1, Duration::from_micros(1_000));
            self.probe(1, Duration::from_micros(5_000));
        }
    }

    fn path(id: u8) -> PathId {
        PathId::new(id).unwrap()
    }

    #[test]
    fn test_probes_select_best_path() {
        let mut h = Harness::new();
        for (id, flight) in [(1, 400), (2, 300), (3, 100), (4, 200)] {
            h.probe(id, Duration::from_micros(flight));
        }

        assert_eq!(h.engine.estimator().best_path(), path(3));
        assert_eq!(
            h.engine.estimator().delay(path(3)),
            Some(1_000_000_000 + 100_000)
        );
        assert_eq!(
            h.events(),
            vec![
                EngineEvent::BestPathChanged {
                    from: path(1),
                    to: path(2)
                },
                EngineEvent::BestPathChanged {
                    from: path(2),
                    to: path(3)
                },
            ]
        );
        assert_eq!(h.endpoint.stats().snapshot().probes_received, 4);
        // only the active path feeds the trigger
        assert_eq!(h.engine.health().samples, 1);
    }

    #[test]
    fn test_one_microsecond_faster_path_wins() {
        let mut h = Harness::new();
        for id in 1..=4 {
            let flight = if id == 3 { 4_000 } else { 5_000 };
            h.probe(id, Duration::from_nanos(flight));
        }

        let estimator = h.engine.estimator();
        assert_eq!(estimator.best_path(), path(3));
        let d1 = estimator.delay(path(1)).unwrap();
        let d3 = estimator.delay(path(3)).unwrap();
        assert_eq!(d1 - d3, 1_000);
    }

    #[test]
    fn test_degradation_proposes_best_path() {
        let mut h = Harness::new();
        h.degrade_active_path();

        let sent = h.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].header.kind, MessageKind::Repath);
        assert_eq!(sent[0].header.repath_target, Some(path(3)));
        assert_eq!(sent[0].header.sequence, 1);
        assert_eq!(sent[0].path, path(3));

        assert_eq!(h.engine.coordinator().outstanding(), Some(path(3)));
        assert_eq!(h.engine.active_path(), path(1));
        assert!(h.events().contains(&EngineEvent::NegotiationStarted {
            target: path(3),
            sequence: 1
        }));
    }

    #[test]
    fn test_ack_commits_switch() {
        let mut h = Harness::new();
        h.degrade_active_path();
        h.sent();
        h.events();

        let ack = h.peer.encode_repath_ack(path(3), 1).unwrap();
        h.deliver(ack);

        assert_eq!(h.engine.active_path(), path(3));
        assert!(h.engine.coordinator().is_idle());
        assert_eq!(
            h.events(),
            vec![EngineEvent::PathSwitched {
                from: path(1),
                to: path(3),
                cause: SwitchCause::Committed
            }]
        );

        let active = h.endpoint.active_path().snapshot();
        assert_eq!(active.switches, 1);
        assert_eq!(h.endpoint.stats().snapshot().switches, 1);
    }

    #[test]
    fn test_stale_ack_ignored() {
        let mut h = Harness::new();
        h.degrade_active_path();

        let ack = h.peer.encode_repath_ack(path(3), 42).unwrap();
        h.deliver(ack);

        assert_eq!(h.engine.active_path(), path(1));
        assert_eq!(h.engine.coordinator().outstanding(), Some(path(3)));
    }

    #[test]
    fn test_unanswered_repath_is_abandoned() {
        let mut h = Harness::new();
        h.degrade_active_path();

        for _ in 0..4 {
            h.clock.advance(Duration::from_millis(2_001));
            h.engine.poll_once();
        }

        let sent = h.sent();
        assert_eq!(sent.len(), 4);
        assert!(sent
            .iter()
            .all(|p| p.header.kind == MessageKind::Repath && p.header.sequence == 1));

        let stats = h.endpoint.stats().snapshot();
        assert_eq!(stats.repaths_sent, 4);
        assert_eq!(stats.repath_retries, 3);
        assert_eq!(stats.abandoned, 1);

        assert_eq!(h.engine.active_path(), path(1));
        assert!(h.engine.coordinator().is_idle());
        assert!(h.events().contains(&EngineEvent::NegotiationAbandoned {
            target: path(3),
            attempts: 4
        }));
    }

    #[test]
    fn test_retransmission_follows_new_best_path() {
        let mut h = Harness::new();
        h.degrade_active_path();
        assert_eq!(h.sent()[0].path, path(3));

        // path 3 slows down and path 2 overtakes it while we wait for the ACK
        h.probe(3, Duration::from_micros(900));
        h.probe(2, Duration::from_micros(50));
        assert_eq!(h.engine.estimator().best_path(), path(2));

        h.clock.advance(Duration::from_millis(2_001));
        h.engine.poll_once();

        let sent = h.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].header.kind, MessageKind::Repath);
        assert_eq!(sent[0].header.repath_target, Some(path(3)));
        assert_eq!(sent[0].header.sequence, 1);
        assert_eq!(sent[0].path, path(2));
    }

    #[test]
    fn test_peer_repath_adopted_and_acked() {
        let mut h = Harness::new();

        let repath = h.peer.encode_repath(path(2), path(2), 7).unwrap();
        h.deliver(repath);

        assert_eq!(h.engine.active_path(), path(2));
        assert_eq!(h.engine.estimator().best_path(), path(2));

        let sent = h.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].header.kind, MessageKind::RepathAck);
        assert_eq!(sent[0].header.ack, 7);
        assert_eq!(sent[0].path, path(2));

        // retransmission is acknowledged again without a second switch
        let repath = h.peer.encode_repath(path(2), path(2), 7).unwrap();
        h.deliver(repath);
        assert_eq!(h.sent().len(), 1);
        assert_eq!(h.endpoint.active_path().snapshot().switches, 1);
        assert_eq!(h.endpoint.stats().snapshot().acks_sent, 2);
    }

    #[test]
    fn test_foreign_and_malformed_frames_counted() {
        let mut h = Harness::new();
        let udp = ETH_HEADER_LEN + IPV4_HEADER_LEN;

        let mut foreign = h.peer.encode_probe(path(1)).unwrap();
        foreign.as_mut_slice()[udp..udp + 2].copy_from_slice(&53u16.to_be_bytes());
        h.deliver(foreign);

        let mut bad_port = h.peer.encode_probe(path(1)).unwrap();
        bad_port.as_mut_slice()[udp + 2..udp + 4].copy_from_slice(&9999u16.to_be_bytes());
        h.deliver(bad_port);

        h.engine.handle_frame(&[0u8; 10]);

        let stats = h.endpoint.stats().snapshot();
        assert_eq!(stats.not_control, 2);
        assert_eq!(stats.malformed, 1);
        assert_eq!(stats.probes_received, 0);
        assert_eq!(h.engine.estimator().snapshot(), [None; crate::types::PATH_NB]);
    }

    #[test]
    fn test_clock_anomaly_leaves_state() {
        let mut h = Harness::new();
        let ahead = ControlCodec::new(
            h.endpoint.config().envelope.mirrored(),
            BufferPool::new(0, 4, 128),
            Arc::new(ManualClock::new(START + 2_000_000_000)),
        );

        let frame = ahead.encode_probe(path(2)).unwrap();
        h.deliver(frame);

        assert_eq!(h.engine.estimator().delay(path(2)), None);
        assert_eq!(h.endpoint.stats().snapshot().clock_anomalies, 1);
    }

    #[test]
    fn test_timestamps_only_on_active_path() {
        let mut h = Harness::new();

        let off = h.peer.encode_data_timestamp(path(2)).unwrap();
        h.clock.advance(Duration::from_micros(50));
        h.deliver(off);
        assert_eq!(h.engine.health().samples, 0);

        let on = h.peer.encode_data_timestamp(path(1)).unwrap();
        h.clock.advance(Duration::from_micros(50));
        h.deliver(on);
        assert_eq!(h.engine.health().samples, 1);
        assert_eq!(h.engine.health().cur_delay, 1_000_000_000 + 50_000);

        assert_eq!(h.endpoint.stats().snapshot().timestamps_received, 2);
        // timestamps never touch the delay table
        assert_eq!(h.engine.estimator().delay(path(1)), None);
    }

    #[test]
    fn test_poll_drains_ingress() {
        let mut h = Harness::new();
        let ingress = h.endpoint.ingress();
        for id in 1..=4 {
            ingress.push(h.peer.encode_probe(path(id)).unwrap()).unwrap();
        }
        h.clock.advance(Duration::from_micros(10));

        assert_eq!(h.engine.poll_once(), 4);
        assert!(ingress.is_empty());
        assert_eq!(h.endpoint.stats().snapshot().probes_received, 4);
        assert_eq!(h.engine.poll_once(), 0);
    }
}
