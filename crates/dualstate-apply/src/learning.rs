//! Outcome statistics for the pattern knowledge base.

use std::collections::BTreeSet;
use std::sync::Arc;

use dualstate_core::snapshot::GraphSnapshot;
use dualstate_core::store::OutcomeStore;
use dualstate_core::types::InterfaceKey;
use dualstate_enforce::PatternKnowledgeBase;

/// Records accepted/rejected outcomes for the idioms a proposal exhibits.
pub struct PatternLearner {
    patterns: Arc<PatternKnowledgeBase>,
    outcomes: Box<dyn OutcomeStore + Send>,
}

impl PatternLearner {
    pub fn new(patterns: Arc<PatternKnowledgeBase>, outcomes: Box<dyn OutcomeStore + Send>) -> Self {
        Self { patterns, outcomes }
    }

    /// Idiomatic patterns matched by any of `keys` in `snapshot`.
    pub fn matched_patterns(&self, snapshot: &GraphSnapshot, keys: &[InterfaceKey]) -> BTreeSet<String> {
        keys.iter()
            .filter_map(|k| snapshot.node(k))
            .flat_map(|node| self.patterns.matching_idioms(node, snapshot))
            .map(str::to_string)
            .collect()
    }

    /// Count one outcome per matched pattern. Store faults are logged; the
    /// ids that were recorded are returned.
    pub fn record(&mut self, snapshot: &GraphSnapshot, keys: &[InterfaceKey], accepted: bool) -> Vec<String> {
        let mut recorded = Vec::new();
        for id in self.matched_patterns(snapshot, keys) {
            match self.outcomes.record_outcome(&id, accepted) {
                Ok(()) => recorded.push(id),
                Err(e) => tracing::warn!(pattern = %id, error = %e, "failed to record pattern outcome"),
            }
        }
        tracing::info!(patterns = recorded.len(), accepted, "recorded pattern outcomes");
        recorded
    }

    pub fn outcomes(&self) -> &dyn OutcomeStore {
        &*self.outcomes
    }
}
