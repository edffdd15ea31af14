//! REPATH negotiation state machine.

use std::time::Duration;

use tracing::debug;

use super::timer::{TimerHandle, TimerKind, TimerService};
use crate::config::EngineConfig;
use crate::types::PathId;

/// Negotiation in progress, if any.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NegotiationState {
    Idle,
    AwaitingAck {
        target: PathId,
        sequence: u64,
        timer: TimerHandle,
        /// REPATH transmissions so far, including the first.
        attempts: u32,
    },
}

/// What the engine has to do after a coordinator step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepathAction {
    /// Emit a REPATH proposing `target` on `via`; `attempt` 1 is the first
    /// transmission.
    SendRepath {
        target: PathId,
        via: PathId,
        sequence: u64,
        attempt: u32,
    },
    /// Emit a REPATH_ACK on `via`.
    SendRepathAck { via: PathId, ack: u64 },
    /// Our proposal was acknowledged; `target` is now the active path.
    Committed(PathId),
    /// We took the peer's proposal; `target` is now best and active.
    Adopted(PathId),
    /// Retry budget ran out; nothing changed.
    Abandoned { target: PathId, attempts: u32 },
}

/// Recently adopted proposal, for duplicate suppression.
#[derive(Debug, Clone, Copy)]
struct Guard {
    target: PathId,
    sequence: u64,
    timer: TimerHandle,
}

/// Drives REPATH / REPATH_ACK exchanges with bounded retransmission.
#[derive(Debug)]
pub struct RepathCoordinator {
    state: NegotiationState,
    guard: Option<Guard>,
    next_sequence: u64,
    timeout: Duration,
    guard_interval: Duration,
    max_retries: u32,
}

impl RepathCoordinator {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            state: NegotiationState::Idle,
            guard: None,
            next_sequence: 1,
            timeout: config.repath_timeout,
            guard_interval: config.repath_guard,
            max_retries: config.max_retries,
        }
    }

    pub fn state(&self) -> NegotiationState {
        self.state
    }

    pub fn is_idle(&self) -> bool {
        self.state == NegotiationState::Idle
    }

    /// Target of the outstanding negotiation.
    pub fn outstanding(&self) -> Option<PathId> {
        match self.state {
            NegotiationState::Idle => None,
            NegotiationState::AwaitingAck { target, .. } => Some(target),
        }
    }

    /// The trigger evaluator asked for a switch.
    pub fn on_trigger(
        &mut self,
        timers: &mut dyn TimerService,
        best: PathId,
        active: PathId,
    ) -> Vec<RepathAction> {
        if let NegotiationState::AwaitingAck { target, .. } = self.state {
            debug!(%target, "trigger ignored, negotiation outstanding");
            return Vec::new();
        }

        if best == active {
            debug!(path = %active, "trigger ignored, active path is already best");
            return Vec::new();
        }

        let sequence = self.next_sequence;
        self.next_sequence = self.next_sequence.wrapping_add(1).max(1);

        let timer = timers.arm(TimerKind::RepathRetry, self.timeout);
        self.state = NegotiationState::AwaitingAck {
            target: best,
            sequence,
            timer,
            attempts: 1,
        };

        vec![RepathAction::SendRepath {
            target: best,
            via: best,
            sequence,
            attempt: 1,
        }]
    }

    /// The peer proposed `target`.
    pub fn on_repath(
        &mut self,
        timers: &mut dyn TimerService,
        target: PathId,
        sequence: u64,
    ) -> Vec<RepathAction> {
        let ack = RepathAction::SendRepathAck {
            via: target,
            ack: sequence,
        };

        let retransmission = matches!(
            self.guard,
            Some(guard) if guard.target == target && guard.sequence == sequence
        );
        if retransmission {
            // Retransmission of something already applied; our ACK was lost
            return vec![ack];
        }

        if let NegotiationState::AwaitingAck { target: ours, timer, .. } = self.state {
            debug!(ours = %ours, theirs = %target, "peer proposal supersedes ours");
            timers.cancel(timer);
            self.state = NegotiationState::Idle;
        }

        if let Some(old) = self.guard.take() {
            timers.cancel(old.timer);
        }
        let timer = timers.arm(TimerKind::Guard, self.guard_interval);
        self.guard = Some(Guard {
            target,
            sequence,
            timer,
        });

        vec![RepathAction::Adopted(target), ack]
    }

    /// The peer acknowledged sequence `ack`.
    pub fn on_repath_ack(&mut self, timers: &mut dyn TimerService, ack: u64) -> Vec<RepathAction> {
        match self.state {
            NegotiationState::AwaitingAck {
                target,
                sequence,
                timer,
                ..
            } if sequence == ack => {
                timers.cancel(timer);
                self.state = NegotiationState::Idle;
                vec![RepathAction::Committed(target)]
            }
            NegotiationState::AwaitingAck { sequence, .. } => {
                debug!(ack, expected = sequence, "stale REPATH_ACK ignored");
                Vec::new()
            }
            NegotiationState::Idle => {
                debug!(ack, "REPATH_ACK without negotiation ignored");
                Vec::new()
            }
        }
    }

    /// A timer armed by this coordinator expired.
    ///
    /// A retransmitted REPATH keeps its target but rides `best`, the path
    /// currently measured fastest.
    pub fn on_timer(
        &mut self,
        timers: &mut dyn TimerService,
        handle: TimerHandle,
        kind: TimerKind,
        best: PathId,
    ) -> Vec<RepathAction> {
        match kind {
            TimerKind::Guard => {
                if matches!(self.guard, Some(guard) if guard.timer == handle) {
                    self.guard = None;
                }
                Vec::new()
            }
            TimerKind::RepathRetry => self.on_retry_timer(timers, handle, best),
        }
    }

    fn on_retry_timer(
        &mut self,
        timers: &mut dyn TimerService,
        handle: TimerHandle,
        best: PathId,
    ) -> Vec<RepathAction> {
        let NegotiationState::AwaitingAck {
            target,
            sequence,
            timer,
            attempts,
        } = self.state
        else {
            return Vec::new();
        };

        if timer != handle {
            debug!(?handle, "stray retry timer ignored");
            return Vec::new();
        }

        if attempts > self.max_retries {
            self.state = NegotiationState::Idle;
            return vec![RepathAction::Abandoned { target, attempts }];
        }

        let attempt = attempts + 1;
        let timer = timers.arm(TimerKind::RepathRetry, self.timeout);
        self.state = NegotiationState::AwaitingAck {
            target,
            sequence,
            timer,
            attempts: attempt,
        };

        vec![RepathAction::SendRepath {
            target,
            via: best,
            sequence,
            attempt,
        }]
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use mockall::predicate::eq;

    use super::*;
    use crate::repath::timer::{MockTimerService, TimerWheel};
    use crate::util::ManualClock;

    fn path(id: u8) -> PathId {
        PathId::new(id).unwrap()
    }

    fn coordinator() -> RepathCoordinator {
        RepathCoordinator::new(&EngineConfig::default())
    }

    fn wheel() -> (ManualClock, TimerWheel) {
        let clock = ManualClock::new(0);
        (clock.clone(), TimerWheel::new(Arc::new(clock)))
    }

    #[test]
    fn test_trigger_sends_repath_via_best() {
        let (_, mut timers) = wheel();
        let mut coord = coordinator();

        let actions = coord.on_trigger(&mut timers, path(3), path(1));
        assert_eq!(
            actions,
            vec![RepathAction::SendRepath {
                target: path(3),
                via: path(3),
                sequence: 1,
                attempt: 1,
            }]
        );
        assert_eq!(coord.outstanding(), Some(path(3)));
        assert_eq!(timers.pending(), 1);
    }

    #[test]
    fn test_at_most_one_outstanding() {
        let (_, mut timers) = wheel();
        let mut coord = coordinator();

        coord.on_trigger(&mut timers, path(3), path(1));
        assert!(coord.on_trigger(&mut timers, path(2), path(1)).is_empty());
        assert_eq!(coord.outstanding(), Some(path(3)));
        assert_eq!(timers.pending(), 1);
    }

    #[test]
    fn test_trigger_on_best_path_ignored() {
        let mut timers = MockTimerService::new();
        timers.expect_arm().never();

        let mut coord = coordinator();
        assert!(coord.on_trigger(&mut timers, path(2), path(2)).is_empty());
        assert!(coord.is_idle());
    }

    #[test]
    fn test_ack_cancels_timer_exactly_once() {
        let handle = TimerHandle::new(7);
        let mut timers = MockTimerService::new();
        timers
            .expect_arm()
            .with(eq(TimerKind::RepathRetry), eq(Duration::from_secs(2)))
            .times(1)
            .return_const(handle);
        timers
            .expect_cancel()
            .with(eq(handle))
            .times(1)
            .return_const(true);

        let mut coord = coordinator();
        coord.on_trigger(&mut timers, path(3), path(1));

        assert_eq!(
            coord.on_repath_ack(&mut timers, 1),
            vec![RepathAction::Committed(path(3))]
        );
        assert!(coord.is_idle());

        // duplicate ACK is a no-op
        assert!(coord.on_repath_ack(&mut timers, 1).is_empty());
    }

    #[test]
    fn test_stale_ack_ignored() {
        let (_, mut timers) = wheel();
        let mut coord = coordinator();

        coord.on_trigger(&mut timers, path(3), path(1));
        assert!(coord.on_repath_ack(&mut timers, 42).is_empty());
        assert_eq!(coord.outstanding(), Some(path(3)));
    }

    #[test]
    fn test_retry_then_abandon() {
        let (clock, mut timers) = wheel();
        let mut coord = coordinator();
        coord.on_trigger(&mut timers, path(4), path(1));

        let mut resent = 0;
        let mut abandoned = None;
        for _ in 0..10 {
            clock.advance(Duration::from_secs(2));
            for (handle, kind) in timers.poll_expired() {
                for action in coord.on_timer(&mut timers, handle, kind, path(4)) {
                    match action {
                        RepathAction::SendRepath {
                            target,
                            via,
                            sequence,
                            attempt,
                        } => {
                            assert_eq!(target, path(4));
                            assert_eq!(via, path(4));
                            assert_eq!(sequence, 1);
                            resent += 1;
                            assert_eq!(attempt, resent + 1);
                        }
                        RepathAction::Abandoned { target, attempts } => {
                            abandoned = Some((target, attempts));
                        }
                        other => panic!("unexpected {other:?}"),
                    }
                }
            }
        }

        assert_eq!(resent, 3);
        assert_eq!(abandoned, Some((path(4), 4)));
        assert!(coord.is_idle());
        assert_eq!(timers.pending(), 0);

        // a later trigger starts afresh
        let actions = coord.on_trigger(&mut timers, path(4), path(1));
        assert!(matches!(
            actions[..],
            [RepathAction::SendRepath { sequence: 2, .. }]
        ));
    }

    #[test]
    fn test_stray_timer_ignored() {
        let (_, mut timers) = wheel();
        let mut coord = coordinator();
        coord.on_trigger(&mut timers, path(2), path(1));

        let actions =
            coord.on_timer(&mut timers, TimerHandle::new(999), TimerKind::RepathRetry, path(2));
        assert!(actions.is_empty());
        assert_eq!(coord.outstanding(), Some(path(2)));
    }

    #[test]
    fn test_repath_adopts_and_acks() {
        let (_, mut timers) = wheel();
        let mut coord = coordinator();

        let actions = coord.on_repath(&mut timers, path(3), 5);
        assert_eq!(
            actions,
            vec![
                RepathAction::Adopted(path(3)),
                RepathAction::SendRepathAck { via: path(3), ack: 5 }
            ]
        );
        assert_eq!(timers.pending(), 1);
    }

    #[test]
    fn test_duplicate_repath_reacked_not_readopted() {
        let (clock, mut timers) = wheel();
        let mut coord = coordinator();

        coord.on_repath(&mut timers, path(3), 5);
        assert_eq!(
            coord.on_repath(&mut timers, path(3), 5),
            vec![RepathAction::SendRepathAck { via: path(3), ack: 5 }]
        );

        // once the guard lapses the same target is a fresh proposal again
        clock.advance(Duration::from_secs(2));
        for (handle, kind) in timers.poll_expired() {
            assert!(coord.on_timer(&mut timers, handle, kind, path(1)).is_empty());
        }
        assert_eq!(coord.on_repath(&mut timers, path(3), 6).len(), 2);
    }

    #[test]
    fn test_retry_rides_current_best_path() {
        let (clock, mut timers) = wheel();
        let mut coord = coordinator();
        coord.on_trigger(&mut timers, path(3), path(1));

        // path 3 degraded while waiting; path 2 is now fastest
        clock.advance(Duration::from_secs(2));
        let expired = timers.poll_expired();
        assert_eq!(expired.len(), 1);
        let (handle, kind) = expired[0];

        assert_eq!(
            coord.on_timer(&mut timers, handle, kind, path(2)),
            vec![RepathAction::SendRepath {
                target: path(3),
                via: path(2),
                sequence: 1,
                attempt: 2,
            }]
        );
        assert_eq!(coord.outstanding(), Some(path(3)));
    }

    #[test]
    fn test_new_sequence_for_same_target_readopted() {
        let (_, mut timers) = wheel();
        let mut coord = coordinator();

        coord.on_repath(&mut timers, path(3), 5);
        assert_eq!(
            coord.on_repath(&mut timers, path(3), 6),
            vec![
                RepathAction::Adopted(path(3)),
                RepathAction::SendRepathAck { via: path(3), ack: 6 }
            ]
        );

        // repeating sequence 6 is a retransmission
        assert_eq!(coord.on_repath(&mut timers, path(3), 6).len(), 1);
        assert_eq!(timers.pending(), 1);
    }

    #[test]
    fn test_peer_proposal_supersedes_ours() {
        let (_, mut timers) = wheel();
        let mut coord = coordinator();

        coord.on_trigger(&mut timers, path(2), path(1));
        let actions = coord.on_repath(&mut timers, path(4), 9);
        assert_eq!(actions[0], RepathAction::Adopted(path(4)));
        assert!(coord.is_idle());

        // only the guard timer remains
        assert_eq!(timers.pending(), 1);
    }
}
