//! Persisted snapshot format and visualization export.
//!
//! A [`SnapshotRecordSet`] is the versioned, self-contained serialization of
//! a snapshot. Re-ingesting it through [`GraphBuilder`] reconstructs an
//! equivalent graph (same keys, node count and edge count).

use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Write as _;

use serde::{Deserialize, Serialize};

use crate::error::IngestionError;
use crate::ingest::{EdgeRecord, GraphBuilder, IngestionBatch, IngestionStats, InterfaceRecord};
use crate::snapshot::GraphSnapshot;
use crate::types::{Binding, InterfaceKey, Scope};

pub const RECORD_SET_FORMAT_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotRecordSet {
    pub format_version: u32,
    pub snapshot_version: u64,
    pub nodes: Vec<InterfaceRecord>,
    pub edges: Vec<EdgeRecord>,
    pub scopes: Vec<Scope>,
    pub bindings: Vec<Binding>,
}

impl SnapshotRecordSet {
    pub fn from_snapshot(snapshot: &GraphSnapshot) -> Self {
        let mut nodes: Vec<InterfaceRecord> = snapshot.nodes().map(InterfaceRecord::from).collect();
        nodes.sort_by(|a, b| a.key.cmp(&b.key));
        Self {
            format_version: RECORD_SET_FORMAT_VERSION,
            snapshot_version: snapshot.version(),
            nodes,
            edges: snapshot
                .edges()
                .into_iter()
                .map(|e| EdgeRecord::new(e.from, e.to, e.edge_type))
                .collect(),
            scopes: snapshot.scopes().cloned().collect(),
            bindings: snapshot.bindings().to_vec(),
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    pub fn from_json(json: &str) -> Result<Self, IngestionError> {
        let set: SnapshotRecordSet =
            serde_json::from_str(json).map_err(|e| IngestionError::Decode(e.to_string()))?;
        set.check_format()?;
        Ok(set)
    }

    fn check_format(&self) -> Result<(), IngestionError> {
        if self.format_version != RECORD_SET_FORMAT_VERSION {
            return Err(IngestionError::UnsupportedFormat {
                found: self.format_version,
                expected: RECORD_SET_FORMAT_VERSION,
            });
        }
        Ok(())
    }

    pub fn into_batch(self) -> IngestionBatch {
        IngestionBatch {
            interfaces: self.nodes,
            edges: self.edges,
            scopes: self.scopes,
            bindings: self.bindings,
        }
    }

    /// Rebuild the snapshot this record set was taken from.
    pub fn rebuild(self) -> Result<(GraphSnapshot, IngestionStats), IngestionError> {
        self.check_format()?;
        let version = self.snapshot_version;
        GraphBuilder::build(self.into_batch(), version, None)
    }
}

/// Render a snapshot as a Graphviz digraph. Keys in `highlight` are filled
/// red (used to show a blast radius).
pub fn to_dot(snapshot: &GraphSnapshot, highlight: &BTreeSet<InterfaceKey>) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "digraph interfaces {{");
    let _ = writeln!(out, "  rankdir=LR;");
    let _ = writeln!(out, "  node [shape=box, fontname=\"monospace\"];");

    let mut by_file: BTreeMap<&str, Vec<&InterfaceKey>> = BTreeMap::new();
    for node in snapshot.nodes() {
        by_file.entry(&node.key.file_path).or_default().push(&node.key);
    }
    for (i, (file, keys)) in by_file.iter_mut().enumerate() {
        keys.sort();
        let _ = writeln!(out, "  subgraph cluster_{} {{", i);
        let _ = writeln!(out, "    label=\"{}\";", escape_dot(file));
        for key in keys.iter() {
            let label = match snapshot.node(key) {
                Some(n) => format!("{} {}", n.kind, display_name(key)),
                None => display_name(key),
            };
            let style = if highlight.contains(*key) {
                ", style=filled, fillcolor=\"#f4a6a6\""
            } else {
                ""
            };
            let _ = writeln!(
                out,
                "    \"{}\" [label=\"{}\"{}];",
                escape_dot(&key.canonical()),
                escape_dot(&label),
                style
            );
        }
        let _ = writeln!(out, "  }}");
    }

    for edge in snapshot.edges() {
        let _ = writeln!(
            out,
            "  \"{}\" -> \"{}\" [label=\"{}\"];",
            escape_dot(&edge.from.canonical()),
            escape_dot(&edge.to.canonical()),
            edge.edge_type
        );
    }
    let _ = writeln!(out, "}}");
    out
}

/// Render a snapshot as a Mermaid flowchart.
pub fn to_mermaid(snapshot: &GraphSnapshot, highlight: &BTreeSet<InterfaceKey>) -> String {
    let mut ids: BTreeMap<&InterfaceKey, String> = BTreeMap::new();
    let mut keys: Vec<&InterfaceKey> = snapshot.nodes().map(|n| &n.key).collect();
    keys.sort();
    for (i, key) in keys.iter().enumerate() {
        ids.insert(*key, format!("n{}", i));
    }

    let mut out = String::from("flowchart LR\n");
    for key in &keys {
        let _ = writeln!(
            out,
            "  {}[\"{}\"]",
            ids[key],
            display_name(key).replace('"', "'")
        );
    }
    for edge in snapshot.edges() {
        if let (Some(from), Some(to)) = (ids.get(&edge.from), ids.get(&edge.to)) {
            let _ = writeln!(out, "  {} -->|{}| {}", from, edge.edge_type, to);
        }
    }
    if !highlight.is_empty() {
        let _ = writeln!(out, "  classDef red fill:#f4a6a6,stroke:#b00;");
        for key in highlight {
            if let Some(id) = ids.get(key) {
                let _ = writeln!(out, "  class {} red;", id);
            }
        }
    }
    out
}

fn display_name(key: &InterfaceKey) -> String {
    if key.container.is_empty() {
        key.name.clone()
    } else {
        format!("{}::{}", key.container, key.name)
    }
}

fn escape_dot(s: &str) -> String {
    s.replace('\\', "\\\\").replace('"', "\\\"")
}
