//! The apply & learning loop.
//!
//! Consumes a [`PassedGate`], writes every passed ledger row to the working
//! tree under the apply lock, commits, re-ingests the updated tree and
//! clears the ledger. File writes are all-or-nothing: a failed write, or a
//! failed commit, restores every file already written. Any error leaves the
//! unapplied ledger rows `Pending`, so the proposal has to pass the gate
//! again.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use dualstate_core::config::{ApplyConfig, STATE_DIR};
use dualstate_core::graph::InterfaceGraph;
use dualstate_core::ingest::{IngestionStats, InterfaceSource};
use dualstate_core::ledger::ChangeLedger;
use dualstate_core::snapshot::GraphSnapshot;
use dualstate_core::types::{ChangeLedgerRow, InterfaceKey, ValidationStatus};
use dualstate_enforce::splice::{group_by_file, splice_file};
use dualstate_enforce::PassedGate;
use serde::{Deserialize, Serialize};

use crate::error::ApplyError;
use crate::learning::PatternLearner;
use crate::lock::ApplyLock;
use crate::vcs::{commit_message, GitCli, VersionControl};
use crate::writer::{FsWriter, SourceWriter, WriteTransaction};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplyRequest {
    pub approved: bool,
    /// Referenced by the commit message.
    pub proposal_id: String,
}

impl ApplyRequest {
    pub fn approve(proposal_id: impl Into<String>) -> Self {
        Self {
            approved: true,
            proposal_id: proposal_id.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApplyReceipt {
    pub commit_id: String,
    pub proposal_id: String,
    pub files: Vec<String>,
    pub applied: Vec<InterfaceKey>,
    pub stats: IngestionStats,
    pub cleared_rows: usize,
    /// Idiomatic patterns credited with an accepted outcome.
    pub patterns: Vec<String>,
}

/// One file's planned write.
struct PlannedWrite {
    path: String,
    original: Option<String>,
    text: String,
}

pub struct ApplyLoop {
    root: PathBuf,
    config: ApplyConfig,
    writer: Box<dyn SourceWriter>,
    vcs: Box<dyn VersionControl>,
    source: Arc<dyn InterfaceSource>,
    learner: Option<PatternLearner>,
}

impl ApplyLoop {
    pub fn new(
        root: impl Into<PathBuf>,
        config: ApplyConfig,
        writer: Box<dyn SourceWriter>,
        vcs: Box<dyn VersionControl>,
        source: Arc<dyn InterfaceSource>,
    ) -> Self {
        Self {
            root: root.into(),
            config,
            writer,
            vcs,
            source,
            learner: None,
        }
    }

    /// Filesystem writer and git commits rooted at `root`.
    pub fn for_root(root: impl Into<PathBuf>, config: ApplyConfig, source: Arc<dyn InterfaceSource>) -> Self {
        let root = root.into();
        Self::new(
            root.clone(),
            config,
            Box::new(FsWriter::new(root.clone())),
            Box::new(GitCli::new(root)),
            source,
        )
    }

    pub fn with_learner(mut self, learner: PatternLearner) -> Self {
        self.learner = Some(learner);
        self
    }

    pub fn learner(&self) -> Option<&PatternLearner> {
        self.learner.as_ref()
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Apply the passed proposal. See the module docs for the guarantees.
    pub fn apply(
        &mut self,
        request: &ApplyRequest,
        pass: PassedGate,
        graph: &InterfaceGraph,
        ledger: &mut ChangeLedger,
    ) -> Result<ApplyReceipt, ApplyError> {
        match self.apply_passed(request, &pass, graph, ledger) {
            Ok(receipt) => Ok(receipt),
            Err(e) => {
                match ledger.reset_to_pending() {
                    Ok(reset) => tracing::warn!(error = %e, reset, "apply failed; rows back to pending"),
                    Err(store) => tracing::error!(error = %e, store_error = %store, "apply failed and rows could not be reset"),
                }
                Err(e)
            }
        }
    }

    /// Record a rejected outcome for the idioms of a declined proposal and
    /// drop it from the ledger. `future` is the proposal's simulated
    /// snapshot. Returns the patterns that were charged.
    pub fn reject(&mut self, future: &GraphSnapshot, ledger: &mut ChangeLedger) -> Result<Vec<String>, ApplyError> {
        let keys: Vec<InterfaceKey> = ledger.active_rows()?.into_iter().map(|r| r.key).collect();
        let patterns = match self.learner.as_mut() {
            Some(learner) => learner.record(future, &keys, false),
            None => Vec::new(),
        };
        ledger.clear()?;
        tracing::info!(rows = keys.len(), "proposal rejected");
        Ok(patterns)
    }

    fn apply_passed(
        &mut self,
        request: &ApplyRequest,
        pass: &PassedGate,
        graph: &InterfaceGraph,
        ledger: &mut ChangeLedger,
    ) -> Result<ApplyReceipt, ApplyError> {
        if !request.approved {
            return Err(ApplyError::NotApproved);
        }
        let current_version = graph.current().version();
        if pass.snapshot_version() != current_version {
            return Err(ApplyError::StaleGate {
                gate_version: pass.snapshot_version(),
                current_version,
            });
        }
        let rows = passed_rows(pass, ledger)?;

        let _lock = ApplyLock::acquire(
            &self.root.join(STATE_DIR),
            Duration::from_millis(self.config.lock_wait_ms),
        )?;

        let planned = self.plan(&rows)?;
        let mut tx = WriteTransaction::new(self.writer.as_ref());
        for write in planned {
            if let Err(source) = tx.write(&write.path, write.original, &write.text) {
                return Err(rollback_error(tx, write.path, source));
            }
        }
        let files = tx.files();

        let message = commit_message(&self.config.commit_prefix, &request.proposal_id, rows.len());
        let commit_id = match self.vcs.commit(&files, &message) {
            Ok(id) => id,
            Err(e) => {
                let unrestored = tx.rollback();
                if !unrestored.is_empty() {
                    tracing::error!(?unrestored, "files left modified after failed commit");
                }
                return Err(e.into());
            }
        };

        let applied: Vec<InterfaceKey> = rows.iter().map(|r| r.key.clone()).collect();
        ledger.mark_applied(&applied)?;
        let stats = graph.ingest_from(self.source.as_ref(), &self.root)?;
        let cleared_rows = ledger.clear_applied()?;

        let patterns = match self.learner.as_mut() {
            Some(learner) => learner.record(&graph.current(), &applied, true),
            None => Vec::new(),
        };

        tracing::info!(
            commit = %commit_id,
            files = files.len(),
            interfaces = applied.len(),
            snapshot_version = stats.snapshot_version,
            "proposal applied"
        );

        Ok(ApplyReceipt {
            commit_id,
            proposal_id: request.proposal_id.clone(),
            files,
            applied,
            stats,
            cleared_rows,
            patterns,
        })
    }

    /// Read and splice every touched file before anything is written.
    fn plan(&self, rows: &[ChangeLedgerRow]) -> Result<Vec<PlannedWrite>, ApplyError> {
        let mut planned = Vec::new();
        for (path, file_rows) in group_by_file(rows) {
            let original = self
                .writer
                .read(&path)
                .map_err(|source| ApplyError::Read {
                    path: path.clone(),
                    source,
                })?;
            let text = splice_file(&path, original.as_deref(), &file_rows)?;
            planned.push(PlannedWrite {
                path,
                original,
                text,
            });
        }
        Ok(planned)
    }
}

/// Active rows, which must be exactly the passed rows and still `Passed`.
fn passed_rows(pass: &PassedGate, ledger: &ChangeLedger) -> Result<Vec<ChangeLedgerRow>, ApplyError> {
    let passed: BTreeSet<&InterfaceKey> = pass.keys().iter().collect();
    let rows = ledger.active_rows()?;
    for row in &rows {
        if !passed.contains(&row.key) || row.validation_status != ValidationStatus::Passed {
            return Err(ApplyError::NotPassed { key: row.key.clone() });
        }
    }
    let present: BTreeSet<&InterfaceKey> = rows.iter().map(|r| &r.key).collect();
    if let Some(missing) = passed.iter().find(|k| !present.contains(*k)) {
        return Err(ApplyError::NotPassed {
            key: (*missing).clone(),
        });
    }
    Ok(rows)
}

fn rollback_error(tx: WriteTransaction<'_>, path: String, source: std::io::Error) -> ApplyError {
    let unrestored = tx.rollback();
    if unrestored.is_empty() {
        ApplyError::Write {
            path,
            source,
            rolled_back: true,
        }
    } else {
        ApplyError::Rollback {
            path,
            source,
            unrestored,
        }
    }
}

#[cfg(test)]
#[path = "apply_tests.rs"]
mod tests;
