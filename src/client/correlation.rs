//! Outstanding correlation identifiers
//!
//! The publish path registers an id before the message leaves; the consume
//! path clears it when a reply carrying the same id arrives. Both paths run
//! on different tasks, so the set sits behind one mutex and no lock is ever
//! held across an await.

use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;

/// Thread-safe set of correlation ids awaiting a reply
///
/// Entries whose reply never arrives stay until [`CorrelationTracker::clear`];
/// there is no expiry.
#[derive(Debug, Clone, Default)]
pub struct CorrelationTracker {
    pending: Arc<Mutex<HashSet<String>>>,
}

impl CorrelationTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an id; returns false if it was already pending
    pub fn add(&self, id: impl Into<String>) -> bool {
        self.pending.lock().insert(id.into())
    }

    /// Clear an id; returns whether it was pending
    pub fn remove(&self, id: &str) -> bool {
        self.pending.lock().remove(id)
    }

    pub fn has(&self, id: &str) -> bool {
        self.pending.lock().contains(id)
    }

    pub fn len(&self) -> usize {
        self.pending.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.lock().is_empty()
    }

    pub fn clear(&self) {
        self.pending.lock().clear();
    }

    /// Snapshot of the pending ids, in no particular order
    pub fn pending(&self) -> Vec<String> {
        self.pending.lock().iter().cloned().collect()
    }
}
