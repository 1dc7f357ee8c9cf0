//! Vector similarity index over interface text.
//!
//! Entries are tagged with the [`Granularity`] they were produced at so a
//! query can be filtered to one level (interface summaries, code slices or
//! modules). Search is an exhaustive cosine scan, parallel over entries;
//! results are deduplicated by key keeping the best slice.

use std::collections::HashMap;

use dualstate_core::config::Granularity;
use dualstate_core::snapshot::GraphSnapshot;
use dualstate_core::types::{InterfaceKey, InterfaceKind, InterfaceNode};
use rayon::prelude::*;

use crate::embed::{cosine, Embedder};
use crate::error::SearchError;

/// Lines per code-slice entry.
const SLICE_LINES: usize = 24;

#[derive(Debug, Clone)]
struct VectorEntry {
    key: InterfaceKey,
    granularity: Granularity,
    vector: Vec<f32>,
}

#[derive(Debug, Clone)]
pub struct VectorIndex {
    dimensions: usize,
    snapshot_version: u64,
    entries: Vec<VectorEntry>,
}

impl VectorIndex {
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions,
            snapshot_version: 0,
            entries: Vec::new(),
        }
    }

    /// Index every node of `snapshot` at all three granularities.
    ///
    /// Nodes without any embeddable text are skipped.
    pub fn build(snapshot: &GraphSnapshot, embedder: &dyn Embedder) -> Self {
        let mut index = Self::new(embedder.dimensions());
        index.snapshot_version = snapshot.version();

        let texts: Vec<(InterfaceKey, Granularity, String)> = snapshot
            .nodes()
            .flat_map(|node| {
                let mut texts = vec![(node.key.clone(), Granularity::Interface, interface_text(node))];
                texts.extend(
                    code_slices(node)
                        .into_iter()
                        .map(|s| (node.key.clone(), Granularity::CodeSlice, s)),
                );
                if node.kind == InterfaceKind::Module {
                    texts.push((node.key.clone(), Granularity::Module, module_text(snapshot, node)));
                }
                texts
            })
            .collect();

        index.entries = texts
            .into_par_iter()
            .filter_map(|(key, granularity, text)| {
                embedder.embed(&text).ok().map(|vector| VectorEntry {
                    key,
                    granularity,
                    vector,
                })
            })
            .collect();

        tracing::debug!(
            version = index.snapshot_version,
            entries = index.entries.len(),
            "built vector index"
        );
        index
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    /// Version of the snapshot this index was built from.
    pub fn snapshot_version(&self) -> u64 {
        self.snapshot_version
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn insert(
        &mut self,
        key: InterfaceKey,
        granularity: Granularity,
        vector: Vec<f32>,
    ) -> Result<(), SearchError> {
        self.check_dimensions(&vector)?;
        self.entries.push(VectorEntry {
            key,
            granularity,
            vector,
        });
        Ok(())
    }

    /// Top `limit` keys by cosine similarity to `query`, among entries at
    /// `granularity`. Sorted by descending similarity, ties by key.
    pub fn search(
        &self,
        query: &[f32],
        granularity: Granularity,
        limit: usize,
    ) -> Result<Vec<(InterfaceKey, f32)>, SearchError> {
        self.check_dimensions(query)?;

        let scored: Vec<(&InterfaceKey, f32)> = self
            .entries
            .par_iter()
            .filter(|e| e.granularity == granularity)
            .map(|e| (&e.key, cosine(query, &e.vector)))
            .collect();

        let mut best: HashMap<&InterfaceKey, f32> = HashMap::new();
        for (key, score) in scored {
            let slot = best.entry(key).or_insert(f32::MIN);
            if score > *slot {
                *slot = score;
            }
        }

        let mut results: Vec<(InterfaceKey, f32)> =
            best.into_iter().map(|(k, s)| (k.clone(), s)).collect();
        results.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        results.truncate(limit);
        Ok(results)
    }

    fn check_dimensions(&self, vector: &[f32]) -> Result<(), SearchError> {
        if vector.len() != self.dimensions {
            return Err(SearchError::DimensionMismatch {
                expected: self.dimensions,
                found: vector.len(),
            });
        }
        Ok(())
    }
}

fn interface_text(node: &InterfaceNode) -> String {
    let mut text = format!(
        "{} {} {} {}",
        node.kind, node.key.container, node.key.name, node.signature
    );
    if let Some(summary) = &node.summary {
        text.push(' ');
        text.push_str(summary);
    }
    text
}

fn code_slices(node: &InterfaceNode) -> Vec<String> {
    let Some(code) = &node.code else {
        return Vec::new();
    };
    let lines: Vec<&str> = code.lines().collect();
    lines
        .chunks(SLICE_LINES)
        .map(|chunk| chunk.join("\n"))
        .filter(|s| !s.trim().is_empty())
        .collect()
}

/// A module is described by its own text plus the names it contains.
fn module_text(snapshot: &GraphSnapshot, module: &InterfaceNode) -> String {
    let mut text = interface_text(module);
    for node in snapshot.nodes_in_file(&module.key.file_path) {
        if node.key != module.key {
            text.push(' ');
            text.push_str(&node.key.name);
        }
    }
    text
}
