//! Errors raised by the enforcement crate.
//!
//! Gate check failures and timeouts are outcomes, not errors: they come back
//! as a Failed report with diagnostics. Only misuse of the gate state
//! machine and store faults surface here.

use std::path::PathBuf;

use dualstate_core::error::LedgerError;
use dualstate_core::types::{GraphError, InterfaceKey};

use crate::gate::GateState;

#[derive(Debug, thiserror::Error)]
pub enum GateError {
    #[error("illegal gate transition {from} -> {to}")]
    InvalidTransition { from: GateState, to: GateState },

    #[error("gate could not update the change ledger: {0}")]
    Store(#[from] GraphError),
}

/// Proposed code could not be laid into a file's text.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SpliceError {
    #[error("current code of {key} was not found in {file}")]
    SliceNotFound { key: InterfaceKey, file: String },

    #[error("current code of {key} occurs {matches} times in {file} and its span does not single one out")]
    SliceAmbiguous {
        key: InterfaceKey,
        file: String,
        matches: usize,
    },

    #[error("{key} has no future code to write")]
    MissingFutureCode { key: InterfaceKey },
}

#[derive(Debug, thiserror::Error)]
pub enum PatternError {
    #[error("cannot read pattern catalog {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("malformed pattern catalog: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("pattern {id} is listed twice in one catalog")]
    DuplicateId { id: String },
}

/// Faults that abort a planning loop. Gate failures do not; they are fed
/// back to the reasoner.
#[derive(Debug, thiserror::Error)]
pub enum PlanningError {
    #[error(transparent)]
    Gate(#[from] GateError),

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error("planning store fault: {0}")]
    Store(#[from] GraphError),
}
