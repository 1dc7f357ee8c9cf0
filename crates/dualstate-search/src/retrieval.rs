//! Hybrid retrieval: exact graph traversal merged with vector similarity.
//!
//! Ranking is lexicographic. Graph proximity (hop count) comes first, then
//! vector similarity, then the pattern-match score supplied by a
//! [`PatternAffinity`], then the key for determinism.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::sync::Arc;

use dualstate_core::config::RetrievalConfig;
use dualstate_core::snapshot::GraphSnapshot;
use dualstate_core::types::{EdgeDirection, EdgeType, InterfaceKey, InterfaceNode};
use serde::{Deserialize, Serialize};

use crate::embed::Embedder;
use crate::vector::VectorIndex;

/// Edge types followed by the exact traversal.
pub const TRAVERSAL_EDGES: [EdgeType; 2] = [EdgeType::Calls, EdgeType::DependsOn];

/// Tie-break score from the pattern knowledge base. Implementations must be
/// pure: same node and snapshot, same score.
pub trait PatternAffinity: Send + Sync {
    fn score(&self, node: &InterfaceNode, snapshot: &GraphSnapshot) -> f64;
}

/// Affinity that scores everything equally.
pub struct NoAffinity;

impl PatternAffinity for NoAffinity {
    fn score(&self, _node: &InterfaceNode, _snapshot: &GraphSnapshot) -> f64 {
        0.0
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RetrievalQuery {
    pub seeds: Vec<InterfaceKey>,
    #[serde(default)]
    pub hints: Vec<String>,
    /// Overrides the configured K.
    #[serde(default)]
    pub k: Option<usize>,
    /// Overrides the configured hop limit (used to widen context on retry).
    #[serde(default)]
    pub max_hops: Option<u32>,
}

impl RetrievalQuery {
    pub fn from_seeds(seeds: Vec<InterfaceKey>) -> Self {
        Self {
            seeds,
            ..Default::default()
        }
    }

    pub fn with_hints(mut self, hints: Vec<String>) -> Self {
        self.hints = hints;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateScores {
    /// Hops from the nearest seed; `None` when only the vector lookup found it.
    pub graph_hops: Option<u32>,
    /// Best cosine similarity across hints; `None` when not a vector hit.
    pub vector_similarity: Option<f32>,
    pub pattern_score: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    pub key: InterfaceKey,
    /// 1-based position in the ranked list.
    pub rank: usize,
    pub scores: CandidateScores,
}

pub struct HybridRetriever {
    config: RetrievalConfig,
    embedder: Arc<dyn Embedder>,
    affinity: Arc<dyn PatternAffinity>,
}

impl HybridRetriever {
    pub fn new(config: RetrievalConfig, embedder: Arc<dyn Embedder>) -> Self {
        Self {
            config,
            embedder,
            affinity: Arc::new(NoAffinity),
        }
    }

    pub fn with_affinity(mut self, affinity: Arc<dyn PatternAffinity>) -> Self {
        self.affinity = affinity;
        self
    }

    pub fn config(&self) -> &RetrievalConfig {
        &self.config
    }

    /// Rank at most K candidates around `query.seeds`.
    ///
    /// Returns an empty list when no seed exists in `snapshot`. `index` must
    /// have been built from the same snapshot; hits for keys the snapshot
    /// does not contain are dropped.
    pub fn retrieve(
        &self,
        snapshot: &GraphSnapshot,
        index: &VectorIndex,
        query: &RetrievalQuery,
    ) -> Vec<Candidate> {
        let seeds: Vec<InterfaceKey> = query
            .seeds
            .iter()
            .filter(|k| snapshot.contains(k))
            .cloned()
            .collect();
        if seeds.is_empty() {
            tracing::debug!(requested = query.seeds.len(), "no retrieval seeds resolved");
            return Vec::new();
        }
        if index.snapshot_version() != snapshot.version() {
            tracing::debug!(
                index = index.snapshot_version(),
                snapshot = snapshot.version(),
                "vector index built from a different snapshot"
            );
        }

        let k = query.k.unwrap_or(self.config.k);
        let max_hops = query.max_hops.unwrap_or(self.config.max_hops);
        let direction = if self.config.traverse_both_directions {
            EdgeDirection::Both
        } else {
            EdgeDirection::Outgoing
        };

        let (graph_hits, vector_hits) = rayon::join(
            || snapshot.n_hop(&seeds, &TRAVERSAL_EDGES, max_hops, direction),
            || self.vector_hits(index, &query.hints, k),
        );

        let mut merged: BTreeMap<InterfaceKey, (Option<u32>, Option<f32>)> = BTreeMap::new();
        for (key, hops) in graph_hits {
            merged.entry(key).or_default().0 = Some(hops);
        }
        for (key, similarity) in vector_hits {
            if snapshot.contains(&key) {
                merged.entry(key).or_default().1 = Some(similarity);
            }
        }

        let mut candidates: Vec<Candidate> = merged
            .into_iter()
            .filter_map(|(key, (graph_hops, vector_similarity))| {
                let node = snapshot.node(&key)?;
                let pattern_score = self.affinity.score(node, snapshot);
                Some(Candidate {
                    key,
                    rank: 0,
                    scores: CandidateScores {
                        graph_hops,
                        vector_similarity,
                        pattern_score,
                    },
                })
            })
            .collect();

        candidates.sort_by(compare_candidates);
        candidates.truncate(k);
        for (i, c) in candidates.iter_mut().enumerate() {
            c.rank = i + 1;
        }
        candidates
    }

    /// Best similarity per key across all hints. Embedding or index faults
    /// degrade to fewer hits.
    fn vector_hits(&self, index: &VectorIndex, hints: &[String], k: usize) -> BTreeMap<InterfaceKey, f32> {
        let mut best: BTreeMap<InterfaceKey, f32> = BTreeMap::new();
        for hint in hints {
            let query = match self.embedder.embed(hint) {
                Ok(v) => v,
                Err(e) => {
                    tracing::warn!(hint = %hint, error = %e, "skipping retrieval hint");
                    continue;
                }
            };
            let hits = match index.search(&query, self.config.granularity, k) {
                Ok(hits) => hits,
                Err(e) => {
                    tracing::warn!(error = %e, "vector lookup failed, using graph results only");
                    continue;
                }
            };
            for (key, similarity) in hits.into_iter().filter(|(_, s)| *s > 0.0) {
                let slot = best.entry(key).or_insert(similarity);
                if similarity > *slot {
                    *slot = similarity;
                }
            }
        }
        best
    }
}

fn compare_candidates(a: &Candidate, b: &Candidate) -> Ordering {
    // Fewer hops first, graph misses after all graph hits.
    let hops = match (a.scores.graph_hops, b.scores.graph_hops) {
        (Some(x), Some(y)) => x.cmp(&y),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    };
    let similarity = match (a.scores.vector_similarity, b.scores.vector_similarity) {
        (Some(x), Some(y)) => y.total_cmp(&x),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    };
    hops.then(similarity)
        .then_with(|| b.scores.pattern_score.total_cmp(&a.scores.pattern_score))
        .then_with(|| a.key.cmp(&b.key))
}
