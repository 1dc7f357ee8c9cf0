use std::sync::{Arc, RwLock};

use crate::snapshot::GraphSnapshot;

/// The active-snapshot pointer.
///
/// Readers clone the `Arc` and keep working against that snapshot for as
/// long as they like; [`SnapshotHandle::replace`] swaps the pointer in one
/// step, so a reader sees either the old graph or the new one, never a
/// partially ingested mix.
#[derive(Debug)]
pub struct SnapshotHandle {
    active: RwLock<Arc<GraphSnapshot>>,
}

impl Default for SnapshotHandle {
    fn default() -> Self {
        Self::new(GraphSnapshot::empty())
    }
}

impl SnapshotHandle {
    pub fn new(snapshot: GraphSnapshot) -> Self {
        Self {
            active: RwLock::new(Arc::new(snapshot)),
        }
    }

    /// The currently active snapshot.
    pub fn current(&self) -> Arc<GraphSnapshot> {
        // A poisoned lock still holds a complete Arc; the swap is a single
        // assignment, so there is no half-written state to worry about.
        let guard = self.active.read().unwrap_or_else(|p| p.into_inner());
        Arc::clone(&guard)
    }

    /// Make `next` active and return the snapshot it replaced.
    pub fn replace(&self, next: GraphSnapshot) -> Arc<GraphSnapshot> {
        let next = Arc::new(next);
        let mut guard = self.active.write().unwrap_or_else(|p| p.into_inner());
        std::mem::replace(&mut *guard, next)
    }
}
