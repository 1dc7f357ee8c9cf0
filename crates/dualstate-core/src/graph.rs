use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::active::SnapshotHandle;
use crate::error::IngestionError;
use crate::export::SnapshotRecordSet;
use crate::ingest::{GraphBuilder, IngestionBatch, IngestionStats, InterfaceSource};
use crate::snapshot::GraphSnapshot;
use crate::store::GraphStore;
use crate::types::GraphError;

/// The interface graph service: the active snapshot plus its backing store.
///
/// Ingestions are serialized. Each builds a complete snapshot while the old
/// one stays active, persists it, and only then swaps the active pointer. A
/// failure anywhere before the swap leaves the previous snapshot in place.
pub struct InterfaceGraph {
    active: SnapshotHandle,
    store: Mutex<Box<dyn GraphStore + Send>>,
}

impl InterfaceGraph {
    /// A service with an empty active snapshot.
    pub fn new(store: Box<dyn GraphStore + Send>) -> Self {
        Self {
            active: SnapshotHandle::default(),
            store: Mutex::new(store),
        }
    }

    /// Restore the persisted snapshot, if any, and make it active.
    pub fn open(store: Box<dyn GraphStore + Send>) -> Result<Self, IngestionError> {
        let graph = Self::new(store);
        let restored = {
            let store = graph.lock_store()?;
            match store.load_snapshot()? {
                Some(records) => Some(records.rebuild()?.0),
                None => None,
            }
        };
        if let Some(snapshot) = restored {
            tracing::info!(
                version = snapshot.version(),
                nodes = snapshot.node_count(),
                "restored persisted snapshot"
            );
            graph.active.replace(snapshot);
        }
        Ok(graph)
    }

    /// The active snapshot. Callers keep it for as long as they need it.
    pub fn current(&self) -> Arc<GraphSnapshot> {
        self.active.current()
    }

    /// Replace the active snapshot with one built from `batch`.
    pub fn ingest(&self, batch: IngestionBatch) -> Result<IngestionStats, IngestionError> {
        let mut store = self.lock_store()?;
        let previous = self.active.current();
        let version = previous.version() + 1;

        let (snapshot, stats) = GraphBuilder::build(batch, version, Some(&previous))?;

        let records = SnapshotRecordSet::from_snapshot(&snapshot);
        store.save_snapshot(&records, snapshot.renames())?;
        if let Err(e) = store.record_ingestion(&stats) {
            // The snapshot itself is committed; history is best effort.
            tracing::warn!(error = %e, "failed to record ingestion history");
        }

        self.active.replace(snapshot);
        Ok(stats)
    }

    /// Scan `root` with `source` and ingest the result.
    pub fn ingest_from(
        &self,
        source: &dyn InterfaceSource,
        root: &Path,
    ) -> Result<IngestionStats, IngestionError> {
        let batch = source.scan(root)?;
        self.ingest(batch)
    }

    pub fn history(&self, limit: usize) -> Result<Vec<IngestionStats>, GraphError> {
        self.lock_store()?.ingestion_history(limit)
    }

    fn lock_store(&self) -> Result<MutexGuard<'_, Box<dyn GraphStore + Send>>, GraphError> {
        self.store
            .lock()
            .map_err(|_| GraphError::Internal("graph store lock poisoned".to_string()))
    }
}
