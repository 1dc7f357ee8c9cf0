//! Dual-state change simulation.
//!
//! [`ChangeSimulator::simulate`] takes the current snapshot by reference and
//! returns a new future snapshot plus the blast radius and RED/GREEN marking
//! of a proposal set. Nothing is written: the current snapshot, the ledger
//! and the working tree are untouched until
//! [`ChangeSimulator::record`] is asked to put the proposal in the ledger.
//!
//! Blast radius:
//! - every key with a non-`None` proposal is RED itself;
//! - keys whose signature hash changes (signature edits, deletes, creates)
//!   additionally propagate along reverse `calls` / `depends-on` /
//!   `uses-type` edges of the current snapshot.
//!
//! Both rules are evaluated over every entry of the set, so adding entries
//! can only add RED keys.

use std::collections::{BTreeMap, BTreeSet};

use dualstate_core::error::{LedgerError, UnrepresentableChangeError};
use dualstate_core::hash::{compute_body_hash, compute_signature_hash};
use dualstate_core::ingest::InterfaceRecord;
use dualstate_core::ledger::ChangeLedger;
use dualstate_core::snapshot::GraphSnapshot;
use dualstate_core::types::{
    ChangeLedgerRow, EdgeType, FutureAction, GenericParam, InterfaceFlags, InterfaceKey,
    InterfaceKind, InterfaceNode, Span, Visibility,
};
use serde::{Deserialize, Serialize};

use crate::types::Marking;

/// Edge types whose reverse direction carries breakage.
pub const PROPAGATION_EDGES: [EdgeType; 3] =
    [EdgeType::Calls, EdgeType::DependsOn, EdgeType::UsesType];

/// A replacement signature for an Edit, or the signature of a Create.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProposedSignature {
    pub signature: String,
    #[serde(default)]
    pub generics: Vec<GenericParam>,
    #[serde(default)]
    pub flags: InterfaceFlags,
    /// Defaults to the current kind, or `function` for a Create.
    #[serde(default)]
    pub kind: Option<InterfaceKind>,
    #[serde(default)]
    pub visibility: Option<Visibility>,
    #[serde(default)]
    pub span: Option<Span>,
}

impl ProposedSignature {
    pub fn new(signature: impl Into<String>) -> Self {
        Self {
            signature: signature.into(),
            generics: Vec::new(),
            flags: InterfaceFlags::default(),
            kind: None,
            visibility: None,
            span: None,
        }
    }

    fn hash(&self) -> String {
        compute_signature_hash(&self.signature, &self.generics, &self.flags)
    }
}

/// One `(key, action, future_code, new_signature?)` tuple.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProposedEdit {
    pub key: InterfaceKey,
    pub action: FutureAction,
    #[serde(default)]
    pub future_code: Option<String>,
    #[serde(default)]
    pub new_signature: Option<ProposedSignature>,
}

impl ProposedEdit {
    pub fn edit(key: InterfaceKey, future_code: impl Into<String>) -> Self {
        Self {
            key,
            action: FutureAction::Edit,
            future_code: Some(future_code.into()),
            new_signature: None,
        }
    }

    pub fn delete(key: InterfaceKey) -> Self {
        Self {
            key,
            action: FutureAction::Delete,
            future_code: None,
            new_signature: None,
        }
    }

    pub fn create(
        key: InterfaceKey,
        signature: ProposedSignature,
        future_code: impl Into<String>,
    ) -> Self {
        Self {
            key,
            action: FutureAction::Create,
            future_code: Some(future_code.into()),
            new_signature: Some(signature),
        }
    }

    pub fn with_signature(mut self, signature: ProposedSignature) -> Self {
        self.new_signature = Some(signature);
        self
    }
}

/// Future view of a proposal set.
#[derive(Debug, Clone)]
pub struct SimulationResult {
    pub future: GraphSnapshot,
    pub blast_radius: BTreeSet<InterfaceKey>,
    /// Every key of the current and future snapshots.
    pub marking: BTreeMap<InterfaceKey, Marking>,
    /// Keys whose signature hash differs between current and future.
    pub signature_changes: BTreeSet<InterfaceKey>,
}

/// Serializable summary handed back to a proposal submitter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimulationReport {
    pub blast_radius: Vec<InterfaceKey>,
    pub red_green_marking: BTreeMap<InterfaceKey, Marking>,
}

impl SimulationResult {
    pub fn is_red(&self, key: &InterfaceKey) -> bool {
        self.blast_radius.contains(key)
    }

    pub fn red_keys(&self) -> Vec<InterfaceKey> {
        self.blast_radius.iter().cloned().collect()
    }

    pub fn report(&self) -> SimulationReport {
        SimulationReport {
            blast_radius: self.red_keys(),
            red_green_marking: self.marking.clone(),
        }
    }
}

pub struct ChangeSimulator;

impl ChangeSimulator {
    /// Simulate `edits` against `current`.
    ///
    /// Fails without side effects when an Edit or Delete names a key missing
    /// from `current`, a Create names one already present, or a Create has
    /// no signature. When a key appears more than once the later entry
    /// shapes the future snapshot.
    pub fn simulate(
        current: &GraphSnapshot,
        edits: &[ProposedEdit],
    ) -> Result<SimulationResult, UnrepresentableChangeError> {
        for edit in edits {
            Self::check_representable(current, edit)?;
        }

        let mut red: BTreeSet<InterfaceKey> = BTreeSet::new();
        let mut seeds: BTreeSet<InterfaceKey> = BTreeSet::new();
        for edit in edits.iter().filter(|e| !e.action.is_inert()) {
            red.insert(edit.key.clone());
            if Self::changes_signature(current, edit) {
                seeds.insert(edit.key.clone());
            }
        }
        let seed_list: Vec<InterfaceKey> = seeds.iter().cloned().collect();
        red.extend(current.reverse_closure(&seed_list, &PROPAGATION_EDGES));

        let effective = Self::last_wins(edits);
        let mut upserts = Vec::new();
        let mut removed = BTreeSet::new();
        for edit in effective.values() {
            match edit.action {
                FutureAction::None => {}
                FutureAction::Delete => {
                    removed.insert(edit.key.clone());
                }
                FutureAction::Edit | FutureAction::Create => {
                    upserts.push(Self::future_node(current, edit)?);
                }
            }
        }
        let future = current.derive_future(upserts, &removed);

        let signature_changes: BTreeSet<InterfaceKey> = current
            .key_set()
            .union(&future.key_set())
            .filter(|k| {
                current.node(k).map(|n| &n.signature_hash)
                    != future.node(k).map(|n| &n.signature_hash)
            })
            .cloned()
            .collect();

        let marking: BTreeMap<InterfaceKey, Marking> = current
            .key_set()
            .into_iter()
            .chain(future.key_set())
            .map(|k| {
                let mark = if red.contains(&k) {
                    Marking::Red
                } else {
                    Marking::Green
                };
                (k, mark)
            })
            .collect();

        tracing::debug!(
            edits = edits.len(),
            red = red.len(),
            seeds = seeds.len(),
            "simulated proposal"
        );

        Ok(SimulationResult {
            future,
            blast_radius: red,
            marking,
            signature_changes,
        })
    }

    /// Blast radius alone.
    pub fn blast_radius(
        current: &GraphSnapshot,
        edits: &[ProposedEdit],
    ) -> Result<BTreeSet<InterfaceKey>, UnrepresentableChangeError> {
        Ok(Self::simulate(current, edits)?.blast_radius)
    }

    /// Simulate, then upsert one ledger row per key. Validation happens
    /// before the first write, so an unrepresentable set leaves the ledger
    /// as it was.
    pub fn record(
        ledger: &mut ChangeLedger,
        current: &GraphSnapshot,
        edits: &[ProposedEdit],
    ) -> Result<(SimulationResult, Vec<ChangeLedgerRow>), LedgerError> {
        let result = Self::simulate(current, edits)?;
        let mut rows = Vec::new();
        for edit in Self::last_wins(edits).into_values() {
            rows.push(ledger.upsert_proposal(
                current,
                &edit.key,
                edit.action,
                edit.future_code.clone(),
            )?);
        }
        Ok((result, rows))
    }

    fn check_representable(
        current: &GraphSnapshot,
        edit: &ProposedEdit,
    ) -> Result<(), UnrepresentableChangeError> {
        let present = current.contains(&edit.key);
        match edit.action {
            FutureAction::Edit | FutureAction::Delete if !present => {
                Err(UnrepresentableChangeError::MissingKey {
                    key: edit.key.clone(),
                    action: edit.action,
                })
            }
            FutureAction::Create if present => Err(UnrepresentableChangeError::AlreadyPresent {
                key: edit.key.clone(),
            }),
            FutureAction::Create if edit.new_signature.is_none() => {
                Err(UnrepresentableChangeError::MissingSignature {
                    key: edit.key.clone(),
                })
            }
            _ => Ok(()),
        }
    }

    fn changes_signature(current: &GraphSnapshot, edit: &ProposedEdit) -> bool {
        match edit.action {
            FutureAction::None => false,
            FutureAction::Delete | FutureAction::Create => true,
            FutureAction::Edit => match (&edit.new_signature, current.node(&edit.key)) {
                (Some(sig), Some(node)) => !Self::same_signature(sig, node),
                _ => false,
            },
        }
    }

    /// Compare a proposed signature with the current node in the node's own
    /// terms. Parsers may supply hashes from their own scheme, so the hash
    /// is only consulted when the node carries no signature text.
    fn same_signature(sig: &ProposedSignature, node: &InterfaceNode) -> bool {
        if node.signature.trim().is_empty() {
            return sig.hash() == node.signature_hash;
        }
        sig.signature
            .split_whitespace()
            .eq(node.signature.split_whitespace())
            && sig.generics == node.generics
            && sig.flags == node.flags
    }

    fn last_wins(edits: &[ProposedEdit]) -> BTreeMap<&InterfaceKey, &ProposedEdit> {
        edits.iter().map(|e| (&e.key, e)).collect()
    }

    fn future_node(
        current: &GraphSnapshot,
        edit: &ProposedEdit,
    ) -> Result<InterfaceNode, UnrepresentableChangeError> {
        let existing = current.node(&edit.key);
        let mut record = match (existing, &edit.new_signature) {
            (Some(node), _) => InterfaceRecord::from(node),
            (None, Some(sig)) => InterfaceRecord::new(
                edit.key.clone(),
                sig.kind.unwrap_or(InterfaceKind::Function),
                &sig.signature,
            ),
            (None, None) => {
                return Err(UnrepresentableChangeError::MissingSignature {
                    key: edit.key.clone(),
                })
            }
        };

        if let Some(sig) = &edit.new_signature {
            if !existing.is_some_and(|node| Self::same_signature(sig, node)) {
                record.signature = sig.signature.clone();
                record.generics = sig.generics.clone();
                record.flags = sig.flags;
                record.signature_hash = sig.hash();
            }
            if let Some(kind) = sig.kind {
                record.kind = kind;
            }
            if let Some(visibility) = sig.visibility {
                record.visibility = visibility;
            }
            if let Some(span) = sig.span {
                record.span = span;
            }
        }
        if let Some(code) = &edit.future_code {
            record.body_hash = compute_body_hash(code);
            record.code = Some(code.clone());
        }
        Ok(record.into_node())
    }
}

#[cfg(test)]
#[path = "simulator_tests.rs"]
mod tests;
