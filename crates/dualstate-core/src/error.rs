//! Error taxonomy shared by the graph builder, simulator and ledger.
//!
//! Leaf faults ([`GraphError`]) are always wrapped into one of these before
//! they leave a component.

use crate::types::{EdgeType, FutureAction, GraphError, InterfaceKey, InterfaceKind, ScopeId};

/// Malformed or contradictory interface stream. Fatal to one ingestion
/// attempt; the previously active snapshot stays active.
#[derive(Debug, thiserror::Error)]
pub enum IngestionError {
    #[error("key {key} ingested as both {existing} and {incoming}")]
    KindConflict {
        key: InterfaceKey,
        existing: InterfaceKind,
        incoming: InterfaceKind,
    },

    #[error("{edge_type} edge {from} -> {to} references a missing node")]
    DanglingEdge {
        from: InterfaceKey,
        to: InterfaceKey,
        edge_type: EdgeType,
    },

    #[error("scope {scope} names unknown parent {parent}")]
    UnknownScope { scope: ScopeId, parent: ScopeId },

    #[error("scope {0} is declared twice")]
    DuplicateScope(ScopeId),

    #[error("scope parent chain starting at {0} contains a cycle")]
    ScopeCycle(ScopeId),

    #[error("binding `{name}` in scope {scope} targets missing node {target}")]
    DanglingBinding {
        scope: ScopeId,
        name: String,
        target: InterfaceKey,
    },

    #[error("binding `{name}` refers to unknown scope {scope}")]
    BindingScopeMissing { scope: ScopeId, name: String },

    #[error("unsupported snapshot format v{found} (expected v{expected})")]
    UnsupportedFormat { found: u32, expected: u32 },

    #[error("snapshot record set could not be decoded: {0}")]
    Decode(String),

    #[error("failed to persist snapshot: {0}")]
    Store(#[from] GraphError),
}

/// A proposal that cannot be represented against the current snapshot.
/// Surfaced to the caller; nothing is mutated.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum UnrepresentableChangeError {
    #[error("cannot {action} {key}: key is not present in the current graph")]
    MissingKey {
        key: InterfaceKey,
        action: FutureAction,
    },

    #[error("cannot create {key}: key is already present in the current graph")]
    AlreadyPresent { key: InterfaceKey },

    #[error("cannot create {key}: a new interface needs a signature")]
    MissingSignature { key: InterfaceKey },
}

impl UnrepresentableChangeError {
    pub fn key(&self) -> &InterfaceKey {
        match self {
            UnrepresentableChangeError::MissingKey { key, .. }
            | UnrepresentableChangeError::AlreadyPresent { key }
            | UnrepresentableChangeError::MissingSignature { key } => key,
        }
    }
}

/// Errors from change ledger operations.
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error(transparent)]
    Unrepresentable(#[from] UnrepresentableChangeError),

    #[error("ledger storage failed: {0}")]
    Store(#[from] GraphError),
}
