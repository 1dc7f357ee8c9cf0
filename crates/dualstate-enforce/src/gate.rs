//! The safety gate.
//!
//! A [`GateSession`] walks NotStarted -> Opened -> Checked -> Passed | Failed.
//! Opening lays the proposed code of the RED ledger rows into in-memory
//! buffers ([`Overlay`]); checking hands the overlay to an external
//! [`StaticChecker`] on a blocking thread under a timeout. The gate only ever
//! reads the working tree: it holds a [`SourceTree`], which has no write
//! operation. A Passed check yields the single [`PassedGate`] token the apply
//! loop requires.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::fs;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use dualstate_core::config::GateConfig;
use dualstate_core::ledger::ChangeLedger;
use dualstate_core::snapshot::GraphSnapshot;
use dualstate_core::types::{ChangeLedgerRow, InterfaceKey, ValidationStatus};
use serde::{Deserialize, Serialize};

use crate::error::{GateError, SpliceError};
use crate::splice::{group_by_file, splice_file};
use crate::types::{codes, Diagnostic};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GateState {
    NotStarted,
    Opened,
    Checked,
    Passed,
    Failed,
}

impl fmt::Display for GateState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            GateState::NotStarted => "NotStarted",
            GateState::Opened => "Opened",
            GateState::Checked => "Checked",
            GateState::Passed => "Passed",
            GateState::Failed => "Failed",
        })
    }
}

/// Read-only access to the working tree, by repository-relative path.
pub trait SourceTree: Send + Sync {
    /// `Ok(None)` when the file does not exist.
    fn read(&self, path: &str) -> io::Result<Option<String>>;
}

pub struct FsSourceTree {
    root: PathBuf,
}

impl FsSourceTree {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl SourceTree for FsSourceTree {
    fn read(&self, path: &str) -> io::Result<Option<String>> {
        match fs::read_to_string(self.root.join(path)) {
            Ok(text) => Ok(Some(text)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }
}

/// Proposed file buffers layered over the unchanged tree.
pub struct Overlay {
    buffers: BTreeMap<String, String>,
    base: Arc<dyn SourceTree>,
}

impl Overlay {
    pub fn new(base: Arc<dyn SourceTree>) -> Self {
        Self {
            buffers: BTreeMap::new(),
            base,
        }
    }

    pub fn insert(&mut self, path: impl Into<String>, text: String) {
        self.buffers.insert(path.into(), text);
    }

    /// The buffer for `path` if one was opened, otherwise the file as it is.
    pub fn read(&self, path: &str) -> io::Result<Option<String>> {
        match self.buffers.get(path) {
            Some(text) => Ok(Some(text.clone())),
            None => self.base.read(path),
        }
    }

    pub fn buffer(&self, path: &str) -> Option<&str> {
        self.buffers.get(path).map(String::as_str)
    }

    pub fn buffered_files(&self) -> impl Iterator<Item = &str> {
        self.buffers.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.buffers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }
}

/// The external static diagnostics / compile pass.
pub trait StaticChecker: Send + Sync {
    /// Check `files` as seen through `overlay`.
    fn check(&self, overlay: &Overlay, files: &[String]) -> Vec<Diagnostic>;
}

/// Proof that a gate session passed. Only [`GateSession`] creates one.
#[derive(Debug)]
pub struct PassedGate {
    keys: Vec<InterfaceKey>,
    snapshot_version: u64,
}

impl PassedGate {
    /// Ledger rows covered by the check.
    pub fn keys(&self) -> &[InterfaceKey] {
        &self.keys
    }

    /// Version of the current snapshot the check ran against.
    pub fn snapshot_version(&self) -> u64 {
        self.snapshot_version
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GateReport {
    /// `Passed` or `Failed`.
    pub status: ValidationStatus,
    pub diagnostics: Vec<Diagnostic>,
}

impl GateReport {
    pub fn passed(&self) -> bool {
        self.status == ValidationStatus::Passed
    }

    pub fn errors(&self) -> impl Iterator<Item = &Diagnostic> {
        self.diagnostics.iter().filter(|d| d.is_error())
    }
}

pub struct GateSession {
    state: GateState,
    timeout: Duration,
    source: Arc<dyn SourceTree>,
    checker: Arc<dyn StaticChecker>,
    overlay: Option<Arc<Overlay>>,
    rows: Vec<ChangeLedgerRow>,
    files: Vec<String>,
    snapshot_version: u64,
    open_diagnostics: Vec<Diagnostic>,
    report: Option<GateReport>,
    pass: Option<PassedGate>,
}

impl GateSession {
    pub fn new(
        config: &GateConfig,
        source: Arc<dyn SourceTree>,
        checker: Arc<dyn StaticChecker>,
    ) -> Self {
        Self {
            state: GateState::NotStarted,
            timeout: Duration::from_secs(config.timeout_seconds.max(1)),
            source,
            checker,
            overlay: None,
            rows: Vec::new(),
            files: Vec::new(),
            snapshot_version: 0,
            open_diagnostics: Vec::new(),
            report: None,
            pass: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn state(&self) -> GateState {
        self.state
    }

    /// The last check's report, once Checked.
    pub fn report(&self) -> Option<&GateReport> {
        self.report.as_ref()
    }

    pub fn overlay(&self) -> Option<&Overlay> {
        self.overlay.as_deref()
    }

    /// NotStarted -> Opened.
    ///
    /// Buffers the proposed text of every file touched by an active ledger
    /// row among `candidate_keys` (all active rows when empty). Files of the
    /// other candidates are checked as they are. Splice failures are kept
    /// and reported by [`check`](Self::check).
    pub fn open(
        &mut self,
        current: &GraphSnapshot,
        ledger: &ChangeLedger,
        candidate_keys: &[InterfaceKey],
    ) -> Result<(), GateError> {
        self.expect_state(GateState::NotStarted, GateState::Opened)?;

        let wanted: BTreeSet<&InterfaceKey> = candidate_keys.iter().collect();
        let rows: Vec<ChangeLedgerRow> = ledger
            .active_rows()?
            .into_iter()
            .filter(|r| wanted.is_empty() || wanted.contains(&&r.key))
            .collect();

        let mut overlay = Overlay::new(Arc::clone(&self.source));
        let mut diagnostics = Vec::new();
        for (file, file_rows) in group_by_file(&rows) {
            let original = match self.source.read(&file) {
                Ok(text) => text,
                Err(e) => {
                    diagnostics.push(
                        Diagnostic::error(codes::SOURCE_READ, format!("cannot read {file}: {e}"))
                            .at(file.clone(), 0),
                    );
                    continue;
                }
            };
            match splice_file(&file, original.as_deref(), &file_rows) {
                Ok(text) => overlay.insert(file, text),
                Err(e) => {
                    let key = match &e {
                        SpliceError::SliceNotFound { key, .. }
                        | SpliceError::SliceAmbiguous { key, .. }
                        | SpliceError::MissingFutureCode { key } => key.clone(),
                    };
                    diagnostics.push(Diagnostic::error(codes::SPLICE, e.to_string()).for_key(key));
                }
            }
        }

        let mut files: BTreeSet<String> = overlay.buffered_files().map(str::to_string).collect();
        files.extend(
            candidate_keys
                .iter()
                .filter(|k| current.contains(k))
                .map(|k| k.file_path.clone()),
        );

        tracing::info!(
            rows = rows.len(),
            buffers = overlay.len(),
            files = files.len(),
            "gate opened"
        );

        self.rows = rows;
        self.files = files.into_iter().collect();
        self.snapshot_version = current.version();
        self.open_diagnostics = diagnostics;
        self.overlay = Some(Arc::new(overlay));
        self.state = GateState::Opened;
        Ok(())
    }

    /// Opened -> Checked -> Passed | Failed.
    ///
    /// Runs the checker under the session timeout. A timeout or a crashed
    /// checker is a Failed outcome, not an error. Ledger rows under check
    /// are marked Passed or Failed; buffers are closed afterwards.
    pub async fn check(
        &mut self,
        current: &GraphSnapshot,
        ledger: &mut ChangeLedger,
    ) -> Result<GateReport, GateError> {
        self.expect_state(GateState::Opened, GateState::Checked)?;
        let overlay = match &self.overlay {
            Some(overlay) => Arc::clone(overlay),
            None => {
                return Err(GateError::InvalidTransition {
                    from: self.state,
                    to: GateState::Checked,
                })
            }
        };
        self.state = GateState::Checked;

        let mut diagnostics = std::mem::take(&mut self.open_diagnostics);
        if diagnostics.is_empty() {
            diagnostics = self.run_checker(overlay).await;
        }
        self.attribute(current, &mut diagnostics);

        let passed = !diagnostics.iter().any(Diagnostic::is_error);
        self.record_statuses(ledger, &diagnostics, passed)?;
        self.close();

        let status = if passed {
            ValidationStatus::Passed
        } else {
            ValidationStatus::Failed
        };
        self.state = if passed {
            GateState::Passed
        } else {
            GateState::Failed
        };
        if passed {
            self.pass = Some(PassedGate {
                keys: self.rows.iter().map(|r| r.key.clone()).collect(),
                snapshot_version: self.snapshot_version,
            });
        }
        tracing::info!(
            state = %self.state,
            errors = diagnostics.iter().filter(|d| d.is_error()).count(),
            diagnostics = diagnostics.len(),
            "gate checked"
        );

        let report = GateReport {
            status,
            diagnostics,
        };
        self.report = Some(report.clone());
        Ok(report)
    }

    /// Open and check in one call.
    pub async fn run(
        &mut self,
        current: &GraphSnapshot,
        ledger: &mut ChangeLedger,
        candidate_keys: &[InterfaceKey],
    ) -> Result<GateReport, GateError> {
        self.open(current, ledger, candidate_keys)?;
        self.check(current, ledger).await
    }

    /// Hand out the pass token. `None` unless Passed, and only once.
    pub fn take_pass(&mut self) -> Option<PassedGate> {
        if self.state != GateState::Passed {
            return None;
        }
        self.pass.take()
    }

    /// Failed -> NotStarted, for a fresh proposal.
    pub fn restart(&mut self) -> Result<(), GateError> {
        self.expect_state(GateState::Failed, GateState::NotStarted)?;
        self.close();
        self.rows.clear();
        self.files.clear();
        self.open_diagnostics.clear();
        self.report = None;
        self.state = GateState::NotStarted;
        Ok(())
    }

    /// Release the ephemeral buffers. Safe to call in any state; a session
    /// abandoned while Opened is also closed on drop.
    pub fn close(&mut self) {
        if let Some(overlay) = self.overlay.take() {
            tracing::debug!(buffers = overlay.len(), "gate buffers closed");
        }
    }

    fn expect_state(&self, from: GateState, to: GateState) -> Result<(), GateError> {
        if self.state != from {
            return Err(GateError::InvalidTransition {
                from: self.state,
                to,
            });
        }
        Ok(())
    }

    async fn run_checker(&self, overlay: Arc<Overlay>) -> Vec<Diagnostic> {
        let checker = Arc::clone(&self.checker);
        let files = self.files.clone();
        let task = tokio::task::spawn_blocking(move || checker.check(&overlay, &files));
        match tokio::time::timeout(self.timeout, task).await {
            Ok(Ok(diagnostics)) => diagnostics,
            Ok(Err(e)) => vec![Diagnostic::error(
                codes::CHECKER_FAILED,
                format!("static checker did not finish: {e}"),
            )],
            Err(_) => {
                tracing::warn!(timeout_ms = self.timeout.as_millis() as u64, "gate check timed out");
                vec![Diagnostic::error(
                    codes::TIMEOUT,
                    format!("static check exceeded {} ms", self.timeout.as_millis()),
                )]
            }
        }
    }

    /// Give keyless diagnostics a key: the node whose current span holds
    /// the line, else the only row in that file.
    fn attribute(&self, current: &GraphSnapshot, diagnostics: &mut [Diagnostic]) {
        for d in diagnostics.iter_mut().filter(|d| d.key.is_none()) {
            let Some(file) = d.file.as_deref() else {
                continue;
            };
            if let Some(node) = d.line.and_then(|line| current.node_at(file, line)) {
                d.key = Some(node.key.clone());
                continue;
            }
            let mut in_file = self.rows.iter().filter(|r| r.key.file_path == file);
            if let (Some(only), None) = (in_file.next(), in_file.next()) {
                d.key = Some(only.key.clone());
            }
        }
    }

    /// Rows named by an error fail; an error naming no row fails them all.
    fn record_statuses(
        &self,
        ledger: &mut ChangeLedger,
        diagnostics: &[Diagnostic],
        passed: bool,
    ) -> Result<(), GateError> {
        let row_keys: BTreeSet<&InterfaceKey> = self.rows.iter().map(|r| &r.key).collect();
        let mut failed: BTreeSet<&InterfaceKey> = BTreeSet::new();
        let mut fail_all = false;
        for d in diagnostics.iter().filter(|d| d.is_error()) {
            match d.key.as_ref().filter(|k| row_keys.contains(k)) {
                Some(key) => {
                    failed.insert(key);
                }
                None => fail_all = true,
            }
        }

        for key in &row_keys {
            let status = if passed {
                ValidationStatus::Passed
            } else if fail_all || failed.contains(key) {
                ValidationStatus::Failed
            } else {
                ValidationStatus::Passed
            };
            ledger.set_status(key, status)?;
        }
        Ok(())
    }
}

impl Drop for GateSession {
    fn drop(&mut self) {
        if self.overlay.is_some() {
            tracing::debug!(state = %self.state, "gate session dropped with open buffers");
            self.close();
        }
    }
}

#[cfg(test)]
#[path = "gate_tests.rs"]
mod tests;
