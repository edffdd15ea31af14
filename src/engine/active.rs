//! Active path shared with the data plane.

use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::types::PathId;

/// Snapshot of the active path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActiveState {
    pub path: PathId,
    /// Number of times the path changed.
    pub switches: u64,
    /// When the current path became active (clock nanoseconds).
    pub since_ns: u64,
}

/// Cloneable handle on the path the data plane should forward on.
///
/// Written by the processing loop only; anyone may read.
#[derive(Debug, Clone)]
pub struct ActivePath {
    inner: Arc<RwLock<ActiveState>>,
}

impl ActivePath {
    pub fn new(initial: PathId) -> Self {
        Self {
            inner: Arc::new(RwLock::new(ActiveState {
                path: initial,
                switches: 0,
                since_ns: 0,
            })),
        }
    }

    /// Path to forward on.
    pub fn get(&self) -> PathId {
        self.inner.read().path
    }

    pub fn snapshot(&self) -> ActiveState {
        *self.inner.read()
    }

    /// Move to `path`. Returns the previous path if it changed.
    pub(crate) fn set(&self, path: PathId, now_ns: u64) -> Option<PathId> {
        let mut state = self.inner.write();
        if state.path == path {
            return None;
        }

        let previous = state.path;
        state.path = path;
        state.switches += 1;
        state.since_ns = now_ns;
        Some(previous)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_reports_changes_only() {
        let active = ActivePath::new(PathId::FIRST);
        let reader = active.clone();
        let three = PathId::new(3).unwrap();

        assert_eq!(active.set(three, 42), Some(PathId::FIRST));
        assert_eq!(active.set(three, 50), None);

        let state = reader.snapshot();
        assert_eq!(state.path, three);
        assert_eq!(state.switches, 1);
        assert_eq!(state.since_ns, 42);
    }
}
