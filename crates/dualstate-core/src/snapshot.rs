//! Immutable interface graph snapshots.
//!
//! A [`GraphSnapshot`] is a value: once built it is never mutated. Current
//! and future states are two independent snapshots; all traversals carry an
//! explicit visited set so cyclic call graphs terminate.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};

use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use petgraph::Direction;

use crate::types::{
    Binding, EdgeDirection, EdgeType, GraphEdge, InterfaceKey, InterfaceNode, RenameRecord, Scope,
    ScopeId,
};

/// Where a snapshot came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotOrigin {
    /// Built by the graph builder from an interface stream.
    Current,
    /// Derived from a current snapshot by applying proposed changes.
    Future { base_version: u64 },
}

#[derive(Debug, Clone)]
pub struct GraphSnapshot {
    version: u64,
    origin: SnapshotOrigin,
    graph: DiGraph<InterfaceNode, EdgeType>,
    index: HashMap<InterfaceKey, NodeIndex>,
    scopes: BTreeMap<ScopeId, Scope>,
    bindings: Vec<Binding>,
    binding_index: HashMap<(ScopeId, String), usize>,
    renames: Vec<RenameRecord>,
}

impl Default for GraphSnapshot {
    fn default() -> Self {
        Self::empty()
    }
}

impl GraphSnapshot {
    /// The snapshot active before anything has been ingested.
    pub fn empty() -> Self {
        Self::assemble(0, Vec::new(), Vec::new(), Vec::new(), Vec::new(), Vec::new())
    }

    /// Assemble a snapshot from already-validated parts. Edges whose
    /// endpoints are missing are dropped, duplicate edges collapse.
    pub(crate) fn assemble(
        version: u64,
        nodes: Vec<InterfaceNode>,
        edges: Vec<GraphEdge>,
        scopes: Vec<Scope>,
        bindings: Vec<Binding>,
        renames: Vec<RenameRecord>,
    ) -> Self {
        let mut graph = DiGraph::with_capacity(nodes.len(), edges.len());
        let mut index = HashMap::with_capacity(nodes.len());
        for node in nodes {
            let key = node.key.clone();
            let idx = graph.add_node(node);
            index.insert(key, idx);
        }

        let mut seen = HashSet::with_capacity(edges.len());
        for edge in edges {
            let (Some(&from), Some(&to)) = (index.get(&edge.from), index.get(&edge.to)) else {
                debug_assert!(false, "edge {} -> {} not validated", edge.from, edge.to);
                continue;
            };
            if seen.insert((from, to, edge.edge_type)) {
                graph.add_edge(from, to, edge.edge_type);
            }
        }

        let scopes: BTreeMap<ScopeId, Scope> = scopes.into_iter().map(|s| (s.id, s)).collect();
        let mut binding_index = HashMap::with_capacity(bindings.len());
        for (i, b) in bindings.iter().enumerate() {
            binding_index.insert((b.scope, b.name.clone()), i);
        }

        Self {
            version,
            origin: SnapshotOrigin::Current,
            graph,
            index,
            scopes,
            bindings,
            binding_index,
            renames,
        }
    }

    /// Derive a future snapshot: `removed` keys disappear together with every
    /// edge and binding touching them, `upserts` replace or add nodes. Edges
    /// among surviving nodes are carried over unchanged, so the result never
    /// mixes current and future keys.
    pub fn derive_future(
        &self,
        upserts: Vec<InterfaceNode>,
        removed: &BTreeSet<InterfaceKey>,
    ) -> GraphSnapshot {
        let mut nodes: BTreeMap<InterfaceKey, InterfaceNode> = self
            .nodes()
            .filter(|n| !removed.contains(&n.key))
            .map(|n| (n.key.clone(), n.clone()))
            .collect();
        for node in upserts {
            if removed.contains(&node.key) {
                continue;
            }
            nodes.insert(node.key.clone(), node);
        }

        let edges: Vec<GraphEdge> = self
            .edges()
            .into_iter()
            .filter(|e| nodes.contains_key(&e.from) && nodes.contains_key(&e.to))
            .collect();
        let scopes: Vec<Scope> = self
            .scopes
            .values()
            .cloned()
            .map(|mut s| {
                if s.owner.as_ref().is_some_and(|o| !nodes.contains_key(o)) {
                    s.owner = None;
                }
                s
            })
            .collect();
        let bindings: Vec<Binding> = self
            .bindings
            .iter()
            .filter(|b| nodes.contains_key(&b.target))
            .cloned()
            .collect();
        let renames = self
            .renames
            .iter()
            .filter(|r| nodes.contains_key(&r.to))
            .cloned()
            .collect();

        let mut future = Self::assemble(
            self.version,
            nodes.into_values().collect(),
            edges,
            scopes,
            bindings,
            renames,
        );
        future.origin = SnapshotOrigin::Future {
            base_version: self.version,
        };
        future
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn origin(&self) -> SnapshotOrigin {
        self.origin
    }

    pub fn is_future(&self) -> bool {
        matches!(self.origin, SnapshotOrigin::Future { .. })
    }

    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    pub fn contains(&self, key: &InterfaceKey) -> bool {
        self.index.contains_key(key)
    }

    pub fn node(&self, key: &InterfaceKey) -> Option<&InterfaceNode> {
        self.index.get(key).map(|&idx| &self.graph[idx])
    }

    /// All nodes, in insertion order.
    pub fn nodes(&self) -> impl Iterator<Item = &InterfaceNode> {
        self.graph.node_weights()
    }

    pub fn key_set(&self) -> BTreeSet<InterfaceKey> {
        self.index.keys().cloned().collect()
    }

    /// All edges, sorted for deterministic output.
    pub fn edges(&self) -> Vec<GraphEdge> {
        let mut edges: Vec<GraphEdge> = self
            .graph
            .edge_references()
            .map(|e| GraphEdge {
                from: self.graph[e.source()].key.clone(),
                to: self.graph[e.target()].key.clone(),
                edge_type: *e.weight(),
            })
            .collect();
        edges.sort();
        edges
    }

    pub fn scopes(&self) -> impl Iterator<Item = &Scope> {
        self.scopes.values()
    }

    pub fn scope(&self, id: ScopeId) -> Option<&Scope> {
        self.scopes.get(&id)
    }

    pub fn bindings(&self) -> &[Binding] {
        &self.bindings
    }

    pub fn renames(&self) -> &[RenameRecord] {
        &self.renames
    }

    pub fn nodes_in_file(&self, file_path: &str) -> Vec<&InterfaceNode> {
        let mut nodes: Vec<&InterfaceNode> = self
            .nodes()
            .filter(|n| n.key.file_path == file_path)
            .collect();
        nodes.sort_by_key(|n| n.span.start_line);
        nodes
    }

    /// The innermost node in `file_path` whose span contains `line`.
    pub fn node_at(&self, file_path: &str, line: u32) -> Option<&InterfaceNode> {
        self.nodes()
            .filter(|n| n.key.file_path == file_path && n.span.contains(line))
            .min_by_key(|n| n.span.end_line.saturating_sub(n.span.start_line))
    }

    /// Direct neighbors of `key` along edges of the given types.
    pub fn neighbors(
        &self,
        key: &InterfaceKey,
        types: &[EdgeType],
        direction: EdgeDirection,
    ) -> Vec<&InterfaceKey> {
        let Some(&idx) = self.index.get(key) else {
            return Vec::new();
        };
        let mut out: Vec<&InterfaceKey> = self
            .adjacent(idx, types, direction)
            .map(|n| &self.graph[n].key)
            .collect();
        out.sort();
        out.dedup();
        out
    }

    /// Nodes with a `calls` edge into `key`.
    pub fn callers(&self, key: &InterfaceKey) -> Vec<&InterfaceKey> {
        self.neighbors(key, &[EdgeType::Calls], EdgeDirection::Incoming)
    }

    /// Nodes `key` has a `calls` edge to.
    pub fn callees(&self, key: &InterfaceKey) -> Vec<&InterfaceKey> {
        self.neighbors(key, &[EdgeType::Calls], EdgeDirection::Outgoing)
    }

    /// Breadth-first expansion from `seeds` up to `max_hops`, returning the
    /// hop distance of every reached node (seeds at 0). Unknown seeds are
    /// ignored.
    pub fn n_hop(
        &self,
        seeds: &[InterfaceKey],
        types: &[EdgeType],
        max_hops: u32,
        direction: EdgeDirection,
    ) -> BTreeMap<InterfaceKey, u32> {
        let mut distances: HashMap<NodeIndex, u32> = HashMap::new();
        let mut queue = VecDeque::new();
        for seed in seeds {
            if let Some(&idx) = self.index.get(seed) {
                if distances.insert(idx, 0).is_none() {
                    queue.push_back(idx);
                }
            }
        }

        while let Some(idx) = queue.pop_front() {
            let hops = distances[&idx];
            if hops >= max_hops {
                continue;
            }
            let next: Vec<NodeIndex> = self.adjacent(idx, types, direction).collect();
            for n in next {
                if let std::collections::hash_map::Entry::Vacant(slot) = distances.entry(n) {
                    slot.insert(hops + 1);
                    queue.push_back(n);
                }
            }
        }

        distances
            .into_iter()
            .map(|(idx, d)| (self.graph[idx].key.clone(), d))
            .collect()
    }

    /// Transitive closure over *reverse* edges: every node that (directly or
    /// indirectly) points at one of `seeds`, plus the seeds themselves.
    pub fn reverse_closure(
        &self,
        seeds: &[InterfaceKey],
        types: &[EdgeType],
    ) -> BTreeSet<InterfaceKey> {
        let mut visited: HashSet<NodeIndex> = HashSet::new();
        let mut stack: Vec<NodeIndex> = seeds
            .iter()
            .filter_map(|k| self.index.get(k).copied())
            .collect();
        while let Some(idx) = stack.pop() {
            if !visited.insert(idx) {
                continue;
            }
            stack.extend(
                self.adjacent(idx, types, EdgeDirection::Incoming)
                    .filter(|n| !visited.contains(n)),
            );
        }
        visited
            .into_iter()
            .map(|idx| self.graph[idx].key.clone())
            .collect()
    }

    /// Resolve `name` starting at `scope` and walking up parent scopes.
    pub fn resolve(&self, scope: ScopeId, name: &str) -> Option<&InterfaceKey> {
        let mut current = Some(scope);
        // Parent chains are acyclic after ingestion; the step bound keeps a
        // hand-assembled snapshot from spinning.
        let mut steps = 0usize;
        while let Some(id) = current {
            if steps > self.scopes.len() {
                return None;
            }
            steps += 1;
            if let Some(&i) = self.binding_index.get(&(id, name.to_string())) {
                return Some(&self.bindings[i].target);
            }
            current = self.scopes.get(&id).and_then(|s| s.parent);
        }
        None
    }

    fn adjacent<'a>(
        &'a self,
        idx: NodeIndex,
        types: &'a [EdgeType],
        direction: EdgeDirection,
    ) -> impl Iterator<Item = NodeIndex> + 'a {
        let outgoing = matches!(direction, EdgeDirection::Outgoing | EdgeDirection::Both)
            .then(|| self.graph.edges_directed(idx, Direction::Outgoing))
            .into_iter()
            .flatten()
            .filter(move |e| types.contains(e.weight()))
            .map(|e| e.target());
        let incoming = matches!(direction, EdgeDirection::Incoming | EdgeDirection::Both)
            .then(|| self.graph.edges_directed(idx, Direction::Incoming))
            .into_iter()
            .flatten()
            .filter(move |e| types.contains(e.weight()))
            .map(|e| e.source());
        outgoing.chain(incoming)
    }
}

#[cfg(test)]
#[path = "snapshot_tests.rs"]
mod tests;
