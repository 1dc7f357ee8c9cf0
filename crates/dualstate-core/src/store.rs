use crate::export::SnapshotRecordSet;
use crate::ingest::IngestionStats;
use crate::types::{ChangeLedgerRow, GraphError, InterfaceKey, PatternOutcome, RenameRecord, ValidationStatus};

/// Persistence of the active snapshot.
///
/// A store holds at most one snapshot: `save_snapshot` replaces whatever was
/// there before, atomically.
pub trait GraphStore {
    /// Replace the persisted snapshot with `records` (and its rename list).
    fn save_snapshot(
        &mut self,
        records: &SnapshotRecordSet,
        renames: &[RenameRecord],
    ) -> Result<(), GraphError>;

    /// The persisted snapshot, or `None` when nothing has been saved yet.
    fn load_snapshot(&self) -> Result<Option<SnapshotRecordSet>, GraphError>;

    /// Rename lineage stored alongside the snapshot.
    fn load_renames(&self) -> Result<Vec<RenameRecord>, GraphError>;

    /// Record statistics of a successful ingestion.
    fn record_ingestion(&mut self, stats: &IngestionStats) -> Result<(), GraphError>;

    /// Past ingestions, newest first.
    fn ingestion_history(&self, limit: usize) -> Result<Vec<IngestionStats>, GraphError>;
}

/// Row-level storage for the change ledger. Semantics (idempotence, the
/// create/delete invariants) live in [`crate::ledger::ChangeLedger`].
pub trait LedgerStore {
    /// Insert or replace the row for `row.key`.
    fn put_row(&mut self, row: &ChangeLedgerRow) -> Result<(), GraphError>;

    fn get_row(&self, key: &InterfaceKey) -> Result<Option<ChangeLedgerRow>, GraphError>;

    /// All rows, ordered by key.
    fn all_rows(&self) -> Result<Vec<ChangeLedgerRow>, GraphError>;

    /// Returns false when no row exists for `key`.
    fn set_status(
        &mut self,
        key: &InterfaceKey,
        status: ValidationStatus,
    ) -> Result<bool, GraphError>;

    fn mark_applied(&mut self, keys: &[InterfaceKey]) -> Result<(), GraphError>;

    /// Remove applied rows; returns how many were removed.
    fn delete_applied(&mut self) -> Result<usize, GraphError>;

    fn delete_all(&mut self) -> Result<(), GraphError>;
}

/// Accept/reject counters per pattern id.
pub trait OutcomeStore {
    fn record_outcome(&mut self, pattern_id: &str, accepted: bool) -> Result<(), GraphError>;

    /// Counters for one pattern; zeroes when the pattern was never scored.
    fn outcome(&self, pattern_id: &str) -> Result<PatternOutcome, GraphError>;

    /// Counters for every scored pattern.
    fn all_outcomes(&self) -> Result<Vec<(String, PatternOutcome)>, GraphError>;
}
