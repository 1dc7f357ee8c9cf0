//! Constraint & pattern validation of retrieval candidates.
//!
//! Read-only: annotations are computed from a snapshot and the knowledge
//! base, one candidate at a time in parallel.

use std::collections::BTreeSet;
use std::sync::Arc;

use dualstate_core::snapshot::GraphSnapshot;
use dualstate_core::types::{InterfaceKey, InterfaceNode};
use dualstate_search::Candidate;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::patterns::{declared_bounds, PatternCategory, PatternKnowledgeBase};

/// Required vs declared bounds of one generic parameter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoundDelta {
    pub param: String,
    pub required_bounds: BTreeSet<String>,
    pub current_bounds: BTreeSet<String>,
    pub missing_bounds: BTreeSet<String>,
    /// Constraint rules that contributed requirements.
    pub rules: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AntiPatternDistance {
    pub pattern_id: String,
    pub distance: f64,
    pub threshold: f64,
    pub flagged: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Annotation {
    pub key: InterfaceKey,
    /// One entry per non-lifetime generic parameter that some rule
    /// constrains. Empty when no constraint rule applies.
    pub bounds: Vec<BoundDelta>,
    pub anti_patterns: Vec<AntiPatternDistance>,
}

impl Annotation {
    pub fn has_missing_bounds(&self) -> bool {
        self.bounds.iter().any(|b| !b.missing_bounds.is_empty())
    }

    pub fn flagged(&self) -> impl Iterator<Item = &AntiPatternDistance> {
        self.anti_patterns.iter().filter(|a| a.flagged)
    }
}

pub struct ConstraintValidator {
    kb: Arc<PatternKnowledgeBase>,
}

impl ConstraintValidator {
    pub fn new(kb: Arc<PatternKnowledgeBase>) -> Self {
        Self { kb }
    }

    /// Annotate every candidate present in `snapshot`, in candidate order.
    pub fn annotate_candidates(
        &self,
        snapshot: &GraphSnapshot,
        candidates: &[Candidate],
    ) -> Vec<Annotation> {
        let keys: Vec<&InterfaceKey> = candidates.iter().map(|c| &c.key).collect();
        self.annotate_keys(snapshot, &keys)
    }

    pub fn annotate_keys(&self, snapshot: &GraphSnapshot, keys: &[&InterfaceKey]) -> Vec<Annotation> {
        keys.par_iter()
            .filter_map(|key| snapshot.node(key))
            .map(|node| self.annotate(snapshot, node))
            .collect()
    }

    pub fn annotate(&self, snapshot: &GraphSnapshot, node: &InterfaceNode) -> Annotation {
        Annotation {
            key: node.key.clone(),
            bounds: self.bound_deltas(node),
            anti_patterns: self.anti_pattern_distances(snapshot, node),
        }
    }

    fn bound_deltas(&self, node: &InterfaceNode) -> Vec<BoundDelta> {
        let rules: Vec<_> = self
            .kb
            .by_category(PatternCategory::ConstraintRule)
            .filter(|r| !r.params.bounds.is_empty() && r.applies_to(node))
            .collect();
        if rules.is_empty() {
            return Vec::new();
        }

        node.generics
            .iter()
            .filter(|g| !g.is_lifetime())
            .map(|param| {
                let required_bounds: BTreeSet<String> = rules
                    .iter()
                    .flat_map(|r| r.params.bounds.iter().map(|b| b.trim().to_string()))
                    .collect();
                let current_bounds = declared_bounds(param);
                let missing_bounds = required_bounds
                    .difference(&current_bounds)
                    .cloned()
                    .collect();
                BoundDelta {
                    param: param.name.clone(),
                    required_bounds,
                    current_bounds,
                    missing_bounds,
                    rules: rules.iter().map(|r| r.id.clone()).collect(),
                }
            })
            .collect()
    }

    fn anti_pattern_distances(
        &self,
        snapshot: &GraphSnapshot,
        node: &InterfaceNode,
    ) -> Vec<AntiPatternDistance> {
        self.kb
            .by_category(PatternCategory::AntiPattern)
            .filter(|r| r.applies_to(node))
            .map(|r| {
                let distance = 1.0 - self.kb.score_record(r, node, snapshot);
                AntiPatternDistance {
                    pattern_id: r.id.clone(),
                    distance,
                    threshold: r.threshold,
                    flagged: distance <= r.threshold,
                }
            })
            .collect()
    }
}
