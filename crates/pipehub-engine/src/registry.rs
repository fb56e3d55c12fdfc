use std::collections::HashMap;
use std::fmt;
use std::sync::{Mutex, MutexGuard};

use crate::event::ConnectionId;

/// Lifecycle of a server engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Stopped,
    Running,
    Stopping,
}

impl fmt::Display for EngineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineState::Stopped => f.write_str("stopped"),
            EngineState::Running => f.write_str("running"),
            EngineState::Stopping => f.write_str("stopping"),
        }
    }
}

/// Live-connection directory plus the engine state, behind one lock.
///
/// Every read-modify-write that depends on the state ("still running?")
/// happens under the same lock as the map mutation, so a stop request and a
/// completing accept cannot interleave.
pub(crate) struct Registry<E> {
    inner: Mutex<Inner<E>>,
}

struct Inner<E> {
    state: EngineState,
    next_id: u64,
    entries: HashMap<ConnectionId, E>,
}

impl<E: Clone> Registry<E> {
    pub(crate) fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                state: EngineState::Stopped,
                next_id: 1,
                entries: HashMap::new(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner<E>> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub(crate) fn state(&self) -> EngineState {
        self.lock().state
    }

    pub(crate) fn is_running(&self) -> bool {
        self.state() == EngineState::Running
    }

    /// Stopped -> Running. Returns false in any other state.
    pub(crate) fn begin_start(&self) -> bool {
        let mut inner = self.lock();
        if inner.state != EngineState::Stopped {
            return false;
        }
        inner.state = EngineState::Running;
        true
    }

    /// Undo `begin_start` after the endpoint could not be created.
    pub(crate) fn abort_start(&self) {
        let mut inner = self.lock();
        debug_assert!(inner.entries.is_empty());
        inner.state = EngineState::Stopped;
    }

    /// Running -> Stopping, returning the connections live at that instant.
    /// `None` when the engine was not running.
    pub(crate) fn begin_stop(&self) -> Option<Vec<(ConnectionId, E)>> {
        let mut inner = self.lock();
        if inner.state != EngineState::Running {
            return None;
        }
        inner.state = EngineState::Stopping;
        Some(snapshot_of(&inner.entries))
    }

    /// Stopping -> Stopped.
    pub(crate) fn finish_stop(&self) {
        let mut inner = self.lock();
        debug_assert_eq!(inner.state, EngineState::Stopping);
        inner.state = EngineState::Stopped;
    }

    /// Assign the next id and insert `entry`, only while running.
    ///
    /// Returns `None` when the engine is stopping or stopped; the caller must
    /// then discard the connection instead of onboarding it.
    pub(crate) fn register(&self, entry: E) -> Option<ConnectionId> {
        let mut inner = self.lock();
        if inner.state != EngineState::Running {
            return None;
        }
        let id = ConnectionId::new(inner.next_id);
        inner.next_id += 1;
        inner.entries.insert(id, entry);
        Some(id)
    }

    /// Remove a connection. Returns whether it was present.
    pub(crate) fn remove(&self, id: ConnectionId) -> bool {
        self.lock().entries.remove(&id).is_some()
    }

    pub(crate) fn get(&self, id: ConnectionId) -> Option<E> {
        self.lock().entries.get(&id).cloned()
    }

    /// Point-in-time copy of the live connections, for use outside the lock.
    pub(crate) fn snapshot(&self) -> Vec<(ConnectionId, E)> {
        snapshot_of(&self.lock().entries)
    }

    pub(crate) fn count(&self) -> usize {
        self.lock().entries.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.lock().entries.is_empty()
    }
}

fn snapshot_of<E: Clone>(entries: &HashMap<ConnectionId, E>) -> Vec<(ConnectionId, E)> {
    let mut live: Vec<_> = entries.iter().map(|(id, e)| (*id, e.clone())).collect();
    live.sort_by_key(|(id, _)| *id);
    live
}
