//! The narrow store interface the evaluator dispatches against

use trellis_core::GraphStore;

/// What the evaluator needs from a graph. Kept deliberately small so the
/// server, the in-process store, and test fixtures can all back a query.
///
/// All values cross this seam as ground strings; attribute numbers are
/// rendered with their natural `Display` form.
pub trait GraphSource {
    /// Every node id. Used only by fully-unbound `node` literals.
    fn node_ids(&self) -> Vec<String>;

    fn node_kind(&self, id: &str) -> Option<String>;

    fn find_by_type(&self, kind: &str) -> Vec<String>;

    /// `(dst, kind)` pairs for edges leaving `src`.
    fn outgoing(&self, src: &str) -> Vec<(String, String)>;

    /// `(src, kind)` pairs for edges arriving at `dst`.
    fn incoming(&self, dst: &str) -> Vec<(String, String)>;

    /// All `(src, dst, kind)` triples. Used by fully-unbound `edge`
    /// literals and by `path`.
    fn edges(&self) -> Vec<(String, String, String)>;

    fn attr(&self, id: &str, name: &str) -> Option<String>;

    fn edge_attr(&self, src: &str, dst: &str, kind: &str, name: &str) -> Option<String>;

    fn is_empty(&self) -> bool;
}

impl GraphSource for GraphStore {
    fn node_ids(&self) -> Vec<String> {
        GraphStore::node_ids(self).map(|id| id.0.clone()).collect()
    }

    fn node_kind(&self, id: &str) -> Option<String> {
        self.get_node(&id.into()).map(|n| n.kind.clone())
    }

    fn find_by_type(&self, kind: &str) -> Vec<String> {
        GraphStore::find_by_type(self, kind)
            .into_iter()
            .map(|n| n.id.0.clone())
            .collect()
    }

    fn outgoing(&self, src: &str) -> Vec<(String, String)> {
        self.outgoing_edges(&src.into(), None)
            .into_iter()
            .map(|e| (e.dst.0.clone(), e.kind.clone()))
            .collect()
    }

    fn incoming(&self, dst: &str) -> Vec<(String, String)> {
        self.incoming_edges(&dst.into(), None)
            .into_iter()
            .map(|e| (e.src.0.clone(), e.kind.clone()))
            .collect()
    }

    fn edges(&self) -> Vec<(String, String, String)> {
        self.all_edges()
            .map(|e| (e.src.0.clone(), e.dst.0.clone(), e.kind.clone()))
            .collect()
    }

    fn attr(&self, id: &str, name: &str) -> Option<String> {
        self.get_node(&id.into())
            .and_then(|n| n.attrs.get(name))
            .map(|v| v.to_string())
    }

    fn edge_attr(&self, src: &str, dst: &str, kind: &str, name: &str) -> Option<String> {
        let key = trellis_core::EdgeKey {
            src: src.into(),
            dst: dst.into(),
            kind: kind.to_string(),
        };
        self.get_edge(&key)
            .and_then(|e| e.attrs.get(name))
            .map(|v| v.to_string())
    }

    fn is_empty(&self) -> bool {
        self.node_count() == 0 && self.edge_count() == 0
    }
}
