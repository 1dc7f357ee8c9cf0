//! Graph builder: turns an interface stream into a validated snapshot.
//!
//! The parser that produces interface records is an external collaborator;
//! it plugs in through [`InterfaceSource`].

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;
use std::time::Instant;

use serde::{Deserialize, Serialize};

use crate::error::IngestionError;
use crate::hash::{compute_body_hash, compute_signature_hash, stable_id};
use crate::snapshot::GraphSnapshot;
use crate::types::{
    Binding, EdgeType, GenericParam, GraphEdge, InterfaceFlags, InterfaceKey, InterfaceKind,
    InterfaceNode, RenameRecord, Scope, ScopeId, Span, Visibility,
};

/// One interface as reported by the parser.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InterfaceRecord {
    pub key: InterfaceKey,
    pub kind: InterfaceKind,
    #[serde(default)]
    pub visibility: Visibility,
    /// Canonical signature text. Used to derive `signature_hash` when the
    /// parser leaves it empty.
    #[serde(default)]
    pub signature: String,
    #[serde(default)]
    pub signature_hash: String,
    #[serde(default)]
    pub body_hash: String,
    #[serde(default)]
    pub generics: Vec<GenericParam>,
    #[serde(default)]
    pub flags: InterfaceFlags,
    #[serde(default)]
    pub span: Span,
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub summary: Option<String>,
    #[serde(default)]
    pub renamed_from: Option<InterfaceKey>,
}

impl InterfaceRecord {
    /// A record with derived hashes, for tests and simple parsers.
    pub fn new(key: InterfaceKey, kind: InterfaceKind, signature: &str) -> Self {
        Self {
            key,
            kind,
            visibility: Visibility::Public,
            signature: signature.to_string(),
            signature_hash: String::new(),
            body_hash: String::new(),
            generics: Vec::new(),
            flags: InterfaceFlags::default(),
            span: Span::default(),
            code: None,
            summary: None,
            renamed_from: None,
        }
    }

    /// Finish the record into a node, filling in any hash left empty.
    pub fn into_node(self) -> InterfaceNode {
        let signature_hash = if self.signature_hash.is_empty() {
            compute_signature_hash(&self.signature, &self.generics, &self.flags)
        } else {
            self.signature_hash
        };
        let body_hash = if self.body_hash.is_empty() {
            compute_body_hash(self.code.as_deref().unwrap_or(""))
        } else {
            self.body_hash
        };
        InterfaceNode {
            id: stable_id(&self.key),
            key: self.key,
            kind: self.kind,
            visibility: self.visibility,
            signature: self.signature,
            signature_hash,
            body_hash,
            generics: self.generics,
            flags: self.flags,
            span: self.span,
            code: self.code,
            summary: self.summary,
            renamed_from: self.renamed_from,
        }
    }
}

impl From<&InterfaceNode> for InterfaceRecord {
    fn from(node: &InterfaceNode) -> Self {
        Self {
            key: node.key.clone(),
            kind: node.kind,
            visibility: node.visibility,
            signature: node.signature.clone(),
            signature_hash: node.signature_hash.clone(),
            body_hash: node.body_hash.clone(),
            generics: node.generics.clone(),
            flags: node.flags,
            span: node.span,
            code: node.code.clone(),
            summary: node.summary.clone(),
            renamed_from: node.renamed_from.clone(),
        }
    }
}

/// One edge as reported by the parser.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EdgeRecord {
    pub from_key: InterfaceKey,
    pub to_key: InterfaceKey,
    pub edge_type: EdgeType,
}

impl EdgeRecord {
    pub fn new(from_key: InterfaceKey, to_key: InterfaceKey, edge_type: EdgeType) -> Self {
        Self {
            from_key,
            to_key,
            edge_type,
        }
    }
}

/// A complete interface stream for one codebase snapshot.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IngestionBatch {
    pub interfaces: Vec<InterfaceRecord>,
    #[serde(default)]
    pub edges: Vec<EdgeRecord>,
    #[serde(default)]
    pub scopes: Vec<Scope>,
    #[serde(default)]
    pub bindings: Vec<Binding>,
}

/// Statistics emitted by every successful ingestion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngestionStats {
    pub snapshot_version: u64,
    pub node_count: usize,
    pub edge_count: usize,
    pub scope_count: usize,
    pub binding_count: usize,
    pub rename_count: usize,
    pub duration_ms: u64,
}

/// The external parser collaborator: produces a full interface stream for
/// the source tree rooted at `root`.
pub trait InterfaceSource: Send + Sync {
    fn scan(&self, root: &Path) -> Result<IngestionBatch, IngestionError>;
}

pub struct GraphBuilder;

impl GraphBuilder {
    /// Build a complete snapshot from `batch`.
    ///
    /// `previous` is only consulted for rename lineage; the result never
    /// shares state with it.
    pub fn build(
        batch: IngestionBatch,
        version: u64,
        previous: Option<&GraphSnapshot>,
    ) -> Result<(GraphSnapshot, IngestionStats), IngestionError> {
        let started = Instant::now();

        let nodes = Self::collect_nodes(batch.interfaces)?;
        let edges = Self::check_edges(&nodes, batch.edges)?;
        let scopes = Self::check_scopes(&nodes, batch.scopes)?;
        let bindings = Self::check_bindings(&nodes, &scopes, batch.bindings)?;

        let renames: Vec<RenameRecord> = nodes
            .values()
            .filter_map(|n| {
                let from = n.renamed_from.as_ref()?;
                if from == &n.key || nodes.contains_key(from) {
                    return None;
                }
                if let Some(prev) = previous {
                    if !prev.contains(from) {
                        tracing::debug!(from = %from, to = %n.key, "rename source unknown to previous snapshot");
                    }
                }
                Some(RenameRecord {
                    from: from.clone(),
                    to: n.key.clone(),
                })
            })
            .collect();

        let snapshot = GraphSnapshot::assemble(
            version,
            nodes.into_values().collect(),
            edges,
            scopes.into_values().collect(),
            bindings,
            renames,
        );

        let stats = IngestionStats {
            snapshot_version: version,
            node_count: snapshot.node_count(),
            edge_count: snapshot.edge_count(),
            scope_count: snapshot.scopes().count(),
            binding_count: snapshot.bindings().len(),
            rename_count: snapshot.renames().len(),
            duration_ms: started.elapsed().as_millis() as u64,
        };
        tracing::info!(
            version,
            nodes = stats.node_count,
            edges = stats.edge_count,
            duration_ms = stats.duration_ms,
            "ingested interface snapshot"
        );
        Ok((snapshot, stats))
    }

    /// Same key twice with the same kind: the later record wins. Same key
    /// with a different kind points at a parser defect and aborts.
    fn collect_nodes(
        records: Vec<InterfaceRecord>,
    ) -> Result<BTreeMap<InterfaceKey, InterfaceNode>, IngestionError> {
        let mut nodes: BTreeMap<InterfaceKey, InterfaceNode> = BTreeMap::new();
        for record in records {
            if let Some(existing) = nodes.get(&record.key) {
                if existing.kind != record.kind {
                    return Err(IngestionError::KindConflict {
                        key: record.key,
                        existing: existing.kind,
                        incoming: record.kind,
                    });
                }
                tracing::debug!(key = %record.key, "duplicate interface record, keeping the last");
            }
            let node = record.into_node();
            nodes.insert(node.key.clone(), node);
        }
        Ok(nodes)
    }

    fn check_edges(
        nodes: &BTreeMap<InterfaceKey, InterfaceNode>,
        records: Vec<EdgeRecord>,
    ) -> Result<Vec<GraphEdge>, IngestionError> {
        records
            .into_iter()
            .map(|r| {
                if !nodes.contains_key(&r.from_key) || !nodes.contains_key(&r.to_key) {
                    return Err(IngestionError::DanglingEdge {
                        from: r.from_key,
                        to: r.to_key,
                        edge_type: r.edge_type,
                    });
                }
                Ok(GraphEdge {
                    from: r.from_key,
                    to: r.to_key,
                    edge_type: r.edge_type,
                })
            })
            .collect()
    }

    fn check_scopes(
        nodes: &BTreeMap<InterfaceKey, InterfaceNode>,
        records: Vec<Scope>,
    ) -> Result<BTreeMap<ScopeId, Scope>, IngestionError> {
        let mut scopes = BTreeMap::new();
        for mut scope in records {
            if scope.owner.as_ref().is_some_and(|o| !nodes.contains_key(o)) {
                tracing::warn!(scope = scope.id, "scope owner missing from stream, dropping owner");
                scope.owner = None;
            }
            if scopes.insert(scope.id, scope.clone()).is_some() {
                return Err(IngestionError::DuplicateScope(scope.id));
            }
        }

        for scope in scopes.values() {
            if let Some(parent) = scope.parent {
                if !scopes.contains_key(&parent) {
                    return Err(IngestionError::UnknownScope {
                        scope: scope.id,
                        parent,
                    });
                }
            }
        }

        // Walk every parent chain once; a chain that revisits a scope is a cycle.
        let mut acyclic: HashSet<ScopeId> = HashSet::new();
        for &start in scopes.keys() {
            let mut path: HashSet<ScopeId> = HashSet::new();
            let mut current = Some(start);
            while let Some(id) = current {
                if acyclic.contains(&id) {
                    break;
                }
                if !path.insert(id) {
                    return Err(IngestionError::ScopeCycle(start));
                }
                current = scopes.get(&id).and_then(|s| s.parent);
            }
            acyclic.extend(path);
        }

        Ok(scopes)
    }

    fn check_bindings(
        nodes: &BTreeMap<InterfaceKey, InterfaceNode>,
        scopes: &BTreeMap<ScopeId, Scope>,
        records: Vec<Binding>,
    ) -> Result<Vec<Binding>, IngestionError> {
        let mut by_slot: HashMap<(ScopeId, String), Binding> = HashMap::new();
        let mut order = Vec::new();
        for b in records {
            if !scopes.contains_key(&b.scope) {
                return Err(IngestionError::BindingScopeMissing {
                    scope: b.scope,
                    name: b.name,
                });
            }
            if !nodes.contains_key(&b.target) {
                return Err(IngestionError::DanglingBinding {
                    scope: b.scope,
                    name: b.name,
                    target: b.target,
                });
            }
            let slot = (b.scope, b.name.clone());
            if by_slot.insert(slot.clone(), b).is_none() {
                order.push(slot);
            }
        }
        Ok(order
            .into_iter()
            .filter_map(|slot| by_slot.remove(&slot))
            .collect())
    }
}

#[cfg(test)]
#[path = "ingest_tests.rs"]
mod tests;
