//! Indexed property-graph store with deferred edge resolution

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::error::{GraphError, Result};
use crate::model::{kinds, AttrMap, Edge, EdgeKey, Node, NodeId};
use crate::snapshot;

/// The authoritative node and edge set.
///
/// Writes are cheap map updates; `flush` is where deferred edges are
/// resolved and the snapshot is persisted. Edges whose endpoints do not
/// exist yet are buffered rather than rejected, because plugins
/// legitimately emit an edge before a co-running plugin's nodes land.
/// `flush` rejects whatever is still dangling.
pub struct GraphStore {
    nodes: HashMap<NodeId, Node>,
    edges: HashMap<EdgeKey, Edge>,
    /// Node ids per kind. Insertion order is incidental, not contractual.
    by_kind: HashMap<String, Vec<NodeId>>,
    outgoing: HashMap<NodeId, Vec<EdgeKey>>,
    incoming: HashMap<NodeId, Vec<EdgeKey>>,
    /// Edges waiting for one or both endpoints.
    pending: Vec<Edge>,
    /// Snapshot directory; `None` for purely in-memory stores.
    dir: Option<PathBuf>,
}

impl GraphStore {
    /// In-memory store without persistence.
    pub fn in_memory() -> Self {
        GraphStore {
            nodes: HashMap::new(),
            edges: HashMap::new(),
            by_kind: HashMap::new(),
            outgoing: HashMap::new(),
            incoming: HashMap::new(),
            pending: Vec::new(),
            dir: None,
        }
    }

    /// Open a store rooted at `dir`, loading the snapshot if one exists.
    pub fn open(dir: &Path) -> Result<Self> {
        let mut store = Self::in_memory();
        store.dir = Some(dir.to_path_buf());
        if let Some(data) = snapshot::load(dir)? {
            for node in data.nodes {
                store.insert_node(node);
            }
            for edge in data.edges {
                store.commit_edge(edge);
            }
            tracing::debug!(
                nodes = store.nodes.len(),
                edges = store.edges.len(),
                "loaded graph snapshot"
            );
        }
        Ok(store)
    }

    // ── Node operations ─────────────────────────────────────

    /// Write or update a node by id. Attributes merge last-writer-wins
    /// per key. No edge validation happens here.
    pub fn add_node(&mut self, node: Node) {
        self.insert_node(node);
    }

    pub fn add_nodes(&mut self, batch: Vec<Node>) {
        for node in batch {
            self.insert_node(node);
        }
    }

    fn insert_node(&mut self, node: Node) {
        match self.nodes.get_mut(&node.id) {
            Some(existing) => {
                merge_attrs(&mut existing.attrs, node.attrs);
                if node.file.is_some() {
                    existing.file = node.file;
                }
                if node.line.is_some() {
                    existing.line = node.line;
                }
                if node.column.is_some() {
                    existing.column = node.column;
                }
            }
            None => {
                self.by_kind
                    .entry(node.kind.clone())
                    .or_default()
                    .push(node.id.clone());
                self.nodes.insert(node.id.clone(), node);
            }
        }
    }

    pub fn get_node(&self, id: &NodeId) -> Option<&Node> {
        self.nodes.get(id)
    }

    pub fn contains_node(&self, id: &NodeId) -> bool {
        self.nodes.contains_key(id)
    }

    /// All nodes of a kind. Callers must not depend on the ordering.
    pub fn find_by_type(&self, kind: &str) -> Vec<&Node> {
        self.by_kind
            .get(kind)
            .map(|ids| ids.iter().filter_map(|id| self.nodes.get(id)).collect())
            .unwrap_or_default()
    }

    pub fn node_ids(&self) -> impl Iterator<Item = &NodeId> {
        self.nodes.keys()
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    // ── Edge operations ─────────────────────────────────────

    /// Record an edge. If either endpoint is missing the edge is deferred
    /// until `flush`. The edge-kind vocabulary is closed: an edge whose
    /// kind is not in [`kinds::EDGE_KINDS`] is rejected here.
    pub fn add_edge(&mut self, edge: Edge) {
        if !kinds::EDGE_KINDS.contains(&edge.kind.as_str()) {
            tracing::warn!(edge = %edge.key(), "rejected edge with unknown kind");
            return;
        }
        if self.nodes.contains_key(&edge.src) && self.nodes.contains_key(&edge.dst) {
            self.commit_edge(edge);
        } else {
            self.pending.push(edge);
        }
    }

    pub fn add_edges(&mut self, batch: Vec<Edge>) {
        for edge in batch {
            self.add_edge(edge);
        }
    }

    fn commit_edge(&mut self, edge: Edge) {
        let key = edge.key();
        match self.edges.get_mut(&key) {
            Some(existing) => {
                merge_attrs(&mut existing.attrs, edge.attrs);
            }
            None => {
                self.outgoing
                    .entry(edge.src.clone())
                    .or_default()
                    .push(key.clone());
                self.incoming
                    .entry(edge.dst.clone())
                    .or_default()
                    .push(key.clone());
                self.edges.insert(key, edge);
            }
        }
    }

    pub fn get_edge(&self, key: &EdgeKey) -> Option<&Edge> {
        self.edges.get(key)
    }

    pub fn outgoing_edges(&self, id: &NodeId, kinds: Option<&[String]>) -> Vec<&Edge> {
        self.adjacent(&self.outgoing, id, kinds)
    }

    pub fn incoming_edges(&self, id: &NodeId, kinds: Option<&[String]>) -> Vec<&Edge> {
        self.adjacent(&self.incoming, id, kinds)
    }

    fn adjacent<'a>(
        &'a self,
        index: &'a HashMap<NodeId, Vec<EdgeKey>>,
        id: &NodeId,
        kinds: Option<&[String]>,
    ) -> Vec<&'a Edge> {
        index
            .get(id)
            .map(|keys| {
                keys.iter()
                    .filter(|k| kinds.is_none_or(|ks| ks.iter().any(|want| *want == k.kind)))
                    .filter_map(|k| self.edges.get(k))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn all_edges(&self) -> impl Iterator<Item = &Edge> {
        self.edges.values()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    // ── Aggregates ──────────────────────────────────────────

    /// Node counts per kind. Zero-count kinds are absent.
    pub fn count_nodes_by_type(&self) -> HashMap<String, usize> {
        self.by_kind
            .iter()
            .filter(|(_, ids)| !ids.is_empty())
            .map(|(kind, ids)| (kind.clone(), ids.len()))
            .collect()
    }

    /// Edge counts per kind. Zero-count kinds are absent.
    pub fn count_edges_by_type(&self) -> HashMap<String, usize> {
        let mut counts: HashMap<String, usize> = HashMap::new();
        for key in self.edges.keys() {
            *counts.entry(key.kind.clone()).or_default() += 1;
        }
        counts
    }

    // ── Lifecycle ───────────────────────────────────────────

    /// Resolve deferred edges and persist. Edges still dangling after
    /// resolution are rejected and reported.
    pub fn flush(&mut self) -> Result<()> {
        let pending = std::mem::take(&mut self.pending);
        let mut dangling = Vec::new();
        for edge in pending {
            if self.nodes.contains_key(&edge.src) && self.nodes.contains_key(&edge.dst) {
                self.commit_edge(edge);
            } else {
                dangling.push(edge.key().to_string());
            }
        }

        if let Some(dir) = self.dir.clone() {
            snapshot::save(&dir, &self.nodes, &self.edges)?;
        }

        if dangling.is_empty() {
            Ok(())
        } else {
            tracing::warn!(count = dangling.len(), "rejected dangling edges at flush");
            Err(GraphError::DanglingEdges(dangling))
        }
    }

    /// Remove all nodes and edges, and the on-disk snapshot.
    pub fn clear(&mut self) -> Result<()> {
        self.nodes.clear();
        self.edges.clear();
        self.by_kind.clear();
        self.outgoing.clear();
        self.incoming.clear();
        self.pending.clear();
        if let Some(dir) = &self.dir {
            snapshot::remove(dir)?;
        }
        tracing::debug!("graph cleared");
        Ok(())
    }

    /// Number of edges currently deferred.
    pub fn pending_edge_count(&self) -> usize {
        self.pending.len()
    }
}

fn merge_attrs(target: &mut AttrMap, incoming: AttrMap) {
    for (key, value) in incoming {
        target.insert(key, value);
    }
}
