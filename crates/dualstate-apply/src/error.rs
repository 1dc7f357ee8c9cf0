use std::io;

use dualstate_core::error::IngestionError;
use dualstate_core::types::{GraphError, InterfaceKey};
use dualstate_enforce::SpliceError;

/// A version-control command that did not succeed.
#[derive(Debug, thiserror::Error)]
pub enum CommitError {
    #[error("failed to run {command}: {source}")]
    Spawn {
        command: String,
        source: io::Error,
    },

    #[error("{command} exited with {status}: {stderr}")]
    Failed {
        command: String,
        status: String,
        stderr: String,
    },
}

/// Errors from the apply loop. Every variant raised after the first file
/// write has already rolled the written files back (or says it could not).
#[derive(Debug, thiserror::Error)]
pub enum ApplyError {
    #[error("apply requires explicit approval")]
    NotApproved,

    #[error("{key} has not passed the safety gate")]
    NotPassed { key: InterfaceKey },

    #[error("gate ran against snapshot v{gate_version}, current is v{current_version}")]
    StaleGate {
        gate_version: u64,
        current_version: u64,
    },

    #[error("another apply holds the lock (pid {holder})")]
    Locked { holder: u32 },

    #[error("cannot take the apply lock: {0}")]
    LockIo(io::Error),

    #[error("cannot read {path}: {source}")]
    Read { path: String, source: io::Error },

    #[error(transparent)]
    Splice(#[from] SpliceError),

    #[error("writing {path} failed: {source} (rolled back: {rolled_back})")]
    Write {
        path: String,
        source: io::Error,
        rolled_back: bool,
    },

    #[error("writing {path} failed ({source}) and {unrestored:?} could not be restored")]
    Rollback {
        path: String,
        source: io::Error,
        unrestored: Vec<String>,
    },

    #[error("commit failed: {0}")]
    Commit(#[from] CommitError),

    #[error("re-ingestion after commit failed: {0}")]
    Reingest(#[from] IngestionError),

    #[error("ledger update failed: {0}")]
    Ledger(#[from] GraphError),
}
