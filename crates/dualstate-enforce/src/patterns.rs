//! Pattern knowledge base.
//!
//! A static catalog of [`PatternRecord`]s (built-in, optionally merged with a
//! project catalog) plus a [`RuleRegistry`] mapping each closed
//! [`RuleKind`] to a pure scoring function. Scores are in `[0, 1]`: how well
//! the node matches the record.
//!
//! - Idiomatic patterns match when `score >= threshold`.
//! - Anti-patterns have distance `1 - score` and are flagged when
//!   `distance <= threshold`.
//! - Constraint rules score the fraction of generic parameters that already
//!   carry the required bounds.
//!
//! Accepted/rejected outcomes from the apply loop become per-record learned
//! weights that scale the retrieval tie-break score.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::fs;

use dualstate_core::config::PatternConfig;
use dualstate_core::snapshot::GraphSnapshot;
use dualstate_core::store::OutcomeStore;
use dualstate_core::types::{
    EdgeDirection, EdgeType, GenericParam, GraphError, InterfaceKind, InterfaceNode,
    PatternOutcome,
};
use dualstate_search::embed::tokenize;
use dualstate_search::PatternAffinity;
use serde::{Deserialize, Serialize};

use crate::error::PatternError;

const BUILTIN_CATALOG: &str = include_str!("catalog.json");

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PatternCategory {
    IdiomaticPattern,
    AntiPattern,
    ConstraintRule,
}

/// The closed set of rule implementations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleKind {
    /// Generic parameters must carry `params.bounds`.
    RequireBounds,
    /// Token overlap between the node signature and the record example.
    SignatureSimilarity,
    /// Outgoing `calls` relative to `params.max_fan_out`.
    FanOut,
    /// Public and `unsafe`.
    UnsafePublic,
}

/// Rule parameters. Filters left empty match everything.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RuleParams {
    #[serde(default)]
    pub bounds: Vec<String>,
    #[serde(default)]
    pub when_async: bool,
    #[serde(default)]
    pub when_public: bool,
    #[serde(default)]
    pub kinds: Vec<InterfaceKind>,
    #[serde(default)]
    pub signature_contains: Vec<String>,
    #[serde(default)]
    pub max_fan_out: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatternRecord {
    pub id: String,
    pub category: PatternCategory,
    pub rule: RuleKind,
    #[serde(default)]
    pub description: String,
    /// Worked example. Similarity rules compare against its signature.
    pub example: String,
    pub threshold: f64,
    #[serde(default)]
    pub params: RuleParams,
}

impl PatternRecord {
    /// Whether the record's filters admit `node` at all.
    pub fn applies_to(&self, node: &InterfaceNode) -> bool {
        let p = &self.params;
        if !p.kinds.is_empty() && !p.kinds.contains(&node.kind) {
            return false;
        }
        if p.when_async && !node.flags.is_async {
            return false;
        }
        if p.when_public && !node.is_public() {
            return false;
        }
        p.signature_contains.is_empty()
            || p
                .signature_contains
                .iter()
                .any(|s| node.signature.contains(s.as_str()))
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct PatternCatalog {
    patterns: Vec<PatternRecord>,
}

impl PatternCatalog {
    fn parse(json: &str) -> Result<Self, PatternError> {
        let catalog: PatternCatalog = serde_json::from_str(json)?;
        let mut seen = HashSet::new();
        for record in &catalog.patterns {
            if !seen.insert(record.id.as_str()) {
                return Err(PatternError::DuplicateId {
                    id: record.id.clone(),
                });
            }
        }
        Ok(catalog)
    }
}

pub type RuleFn = fn(&PatternRecord, &InterfaceNode, &GraphSnapshot) -> f64;

/// Lookup table from rule kind to its scoring function.
#[derive(Clone)]
pub struct RuleRegistry {
    rules: HashMap<RuleKind, RuleFn>,
}

impl RuleRegistry {
    pub fn builtin() -> Self {
        let mut rules: HashMap<RuleKind, RuleFn> = HashMap::new();
        rules.insert(RuleKind::RequireBounds, score_required_bounds);
        rules.insert(RuleKind::SignatureSimilarity, score_signature_similarity);
        rules.insert(RuleKind::FanOut, score_fan_out);
        rules.insert(RuleKind::UnsafePublic, score_unsafe_public);
        Self { rules }
    }

    pub fn get(&self, kind: RuleKind) -> Option<RuleFn> {
        self.rules.get(&kind).copied()
    }
}

#[derive(Clone)]
pub struct PatternKnowledgeBase {
    records: Vec<PatternRecord>,
    registry: RuleRegistry,
    weights: HashMap<String, f64>,
}

impl PatternKnowledgeBase {
    pub fn builtin() -> Result<Self, PatternError> {
        Ok(Self::from_records(PatternCatalog::parse(BUILTIN_CATALOG)?.patterns))
    }

    /// Built-in catalog with `config.catalog_path` merged over it. Records
    /// with a known id replace the built-in one.
    pub fn load(config: &PatternConfig) -> Result<Self, PatternError> {
        let mut kb = Self::builtin()?;
        if let Some(path) = &config.catalog_path {
            let json = fs::read_to_string(path).map_err(|source| PatternError::Io {
                path: path.clone(),
                source,
            })?;
            let extra = PatternCatalog::parse(&json)?;
            tracing::info!(
                path = %path.display(),
                records = extra.patterns.len(),
                "merged project pattern catalog"
            );
            kb.merge(extra.patterns);
        }
        Ok(kb)
    }

    pub fn from_records(records: Vec<PatternRecord>) -> Self {
        Self {
            records,
            registry: RuleRegistry::builtin(),
            weights: HashMap::new(),
        }
    }

    fn merge(&mut self, extra: Vec<PatternRecord>) {
        for record in extra {
            match self.records.iter_mut().find(|r| r.id == record.id) {
                Some(slot) => *slot = record,
                None => self.records.push(record),
            }
        }
    }

    /// Replace learned weights with those derived from recorded outcomes.
    pub fn load_outcomes(&mut self, store: &dyn OutcomeStore) -> Result<(), GraphError> {
        self.weights = store
            .all_outcomes()?
            .into_iter()
            .map(|(id, outcome)| (id, outcome.learned_weight()))
            .collect();
        Ok(())
    }

    pub fn with_outcomes(
        mut self,
        outcomes: impl IntoIterator<Item = (String, PatternOutcome)>,
    ) -> Self {
        self.weights = outcomes
            .into_iter()
            .map(|(id, o)| (id, o.learned_weight()))
            .collect();
        self
    }

    pub fn records(&self) -> &[PatternRecord] {
        &self.records
    }

    pub fn record(&self, id: &str) -> Option<&PatternRecord> {
        self.records.iter().find(|r| r.id == id)
    }

    pub fn by_category(&self, category: PatternCategory) -> impl Iterator<Item = &PatternRecord> {
        self.records.iter().filter(move |r| r.category == category)
    }

    /// Learned weight of a record; 0.5 without history.
    pub fn weight(&self, id: &str) -> f64 {
        self.weights
            .get(id)
            .copied()
            .unwrap_or_else(|| PatternOutcome::default().learned_weight())
    }

    /// Score of `node` against `record`, 0 when its filters exclude the node.
    pub fn score_record(
        &self,
        record: &PatternRecord,
        node: &InterfaceNode,
        snapshot: &GraphSnapshot,
    ) -> f64 {
        if !record.applies_to(node) {
            return 0.0;
        }
        match self.registry.get(record.rule) {
            Some(rule) => rule(record, node, snapshot).clamp(0.0, 1.0),
            None => {
                tracing::warn!(pattern = %record.id, rule = ?record.rule, "no rule registered");
                0.0
            }
        }
    }

    /// Ids of idiomatic patterns `node` matches.
    pub fn matching_idioms(&self, node: &InterfaceNode, snapshot: &GraphSnapshot) -> Vec<&str> {
        self.by_category(PatternCategory::IdiomaticPattern)
            .filter(|r| self.score_record(r, node, snapshot) >= r.threshold)
            .map(|r| r.id.as_str())
            .collect()
    }
}

impl PatternAffinity for PatternKnowledgeBase {
    /// Weighted idiom matches minus weighted flagged anti-patterns.
    fn score(&self, node: &InterfaceNode, snapshot: &GraphSnapshot) -> f64 {
        let mut total = 0.0;
        for record in &self.records {
            let score = self.score_record(record, node, snapshot);
            match record.category {
                PatternCategory::IdiomaticPattern if score >= record.threshold => {
                    total += score * self.weight(&record.id);
                }
                PatternCategory::AntiPattern if 1.0 - score <= record.threshold => {
                    total -= score * self.weight(&record.id);
                }
                _ => {}
            }
        }
        total
    }
}

/// Bounds of a parameter, with `A + B` entries split apart.
pub(crate) fn declared_bounds(param: &GenericParam) -> BTreeSet<String> {
    param
        .bounds
        .iter()
        .flat_map(|b| b.split('+'))
        .map(|b| b.trim().to_string())
        .filter(|b| !b.is_empty())
        .collect()
}

fn score_required_bounds(record: &PatternRecord, node: &InterfaceNode, _: &GraphSnapshot) -> f64 {
    let params: Vec<&GenericParam> = node.generics.iter().filter(|g| !g.is_lifetime()).collect();
    if params.is_empty() {
        return 1.0;
    }
    let satisfied = params
        .iter()
        .filter(|g| {
            let have = declared_bounds(g);
            record.params.bounds.iter().all(|b| have.contains(b.trim()))
        })
        .count();
    satisfied as f64 / params.len() as f64
}

fn score_signature_similarity(record: &PatternRecord, node: &InterfaceNode, _: &GraphSnapshot) -> f64 {
    jaccard(&node.signature, &record.example)
}

fn score_fan_out(record: &PatternRecord, node: &InterfaceNode, snapshot: &GraphSnapshot) -> f64 {
    let max = record.params.max_fan_out.unwrap_or(12).max(1);
    let fan_out = snapshot
        .neighbors(&node.key, &[EdgeType::Calls], EdgeDirection::Outgoing)
        .len();
    fan_out as f64 / max as f64
}

fn score_unsafe_public(_: &PatternRecord, node: &InterfaceNode, _: &GraphSnapshot) -> f64 {
    if node.is_public() && node.flags.is_unsafe {
        1.0
    } else {
        0.0
    }
}

/// Jaccard index of the identifier token sets of two texts.
pub fn jaccard(a: &str, b: &str) -> f64 {
    let a: HashSet<String> = tokenize(a).into_iter().collect();
    let b: HashSet<String> = tokenize(b).into_iter().collect();
    if a.is_empty() && b.is_empty() {
        return 0.0;
    }
    let shared = a.intersection(&b).count();
    shared as f64 / a.union(&b).count() as f64
}

#[cfg(test)]
#[path = "patterns_tests.rs"]
mod tests;
