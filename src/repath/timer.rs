//! Single-shot timers for the processing loop.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use crate::util::{duration_ns, Clock};

/// Identifies one armed timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerHandle(u64);

impl TimerHandle {
    pub fn new(id: u64) -> Self {
        Self(id)
    }
}

/// What a timer is for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerKind {
    /// REPATH went unanswered.
    RepathRetry,
    /// Window in which a repeated REPATH is treated as a duplicate.
    Guard,
}

/// Arming and cancelling single-shot timers.
#[cfg_attr(test, mockall::automock)]
pub trait TimerService {
    /// Arm a timer firing once after `after`.
    fn arm(&mut self, kind: TimerKind, after: Duration) -> TimerHandle;

    /// Cancel a timer. Returns false if it already fired or was cancelled.
    fn cancel(&mut self, handle: TimerHandle) -> bool;
}

/// Deadline-ordered timer set, polled by its owner.
///
/// Arming, cancelling and expiry all happen on the owning loop, so a
/// cancelled timer can never be reported afterwards.
pub struct TimerWheel {
    clock: Arc<dyn Clock>,
    next_id: u64,
    by_deadline: BTreeMap<(u64, TimerHandle), TimerKind>,
    deadlines: HashMap<TimerHandle, u64>,
}

impl TimerWheel {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            next_id: 0,
            by_deadline: BTreeMap::new(),
            deadlines: HashMap::new(),
        }
    }

    /// Remove and return every timer whose deadline has passed, oldest first.
    pub fn poll_expired(&mut self) -> Vec<(TimerHandle, TimerKind)> {
        let now = self.clock.now_ns();
        let mut expired = Vec::new();

        while let Some(entry) = self.by_deadline.first_entry() {
            let (deadline, handle) = *entry.key();
            if deadline > now {
                break;
            }
            let kind = entry.remove();
            self.deadlines.remove(&handle);
            expired.push((handle, kind));
        }

        expired
    }

    /// Timers currently armed.
    pub fn pending(&self) -> usize {
        self.deadlines.len()
    }

    /// Time until the earliest deadline.
    pub fn next_deadline(&self) -> Option<Duration> {
        let now = self.clock.now_ns();
        self.by_deadline
            .keys()
            .next()
            .map(|&(deadline, _)| Duration::from_nanos(deadline.saturating_sub(now)))
    }
}

impl TimerService for TimerWheel {
    fn arm(&mut self, kind: TimerKind, after: Duration) -> TimerHandle {
        self.next_id += 1;
        let handle = TimerHandle(self.next_id);
        let deadline = self.clock.now_ns().saturating_add(duration_ns(after));

        self.by_deadline.insert((deadline, handle), kind);
        self.deadlines.insert(handle, deadline);
        handle
    }

    fn cancel(&mut self, handle: TimerHandle) -> bool {
        match self.deadlines.remove(&handle) {
            Some(deadline) => self.by_deadline.remove(&(deadline, handle)).is_some(),
            None => false,
        }
    }
}

impl std::fmt::Debug for TimerWheel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TimerWheel")
            .field("pending", &self.pending())
            .finish_non_exhaustive()
    }
}
