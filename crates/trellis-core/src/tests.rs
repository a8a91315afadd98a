//! Unit tests for trellis-core

use crate::model::{kinds, AttrValue, Edge, Node, NodeId};
use crate::store::GraphStore;

fn function(name: &str, file: &str, line: u32) -> Node {
    Node::source(kinds::FUNCTION, name, file, line)
}

#[test]
fn node_id_is_deterministic() {
    let a = NodeId::derive(kinds::FUNCTION, "foo", "src/app.js", 3);
    let b = NodeId::derive(kinds::FUNCTION, "foo", "src/app.js", 3);
    assert_eq!(a, b);
    assert_eq!(a.as_str(), "FUNCTION:foo@src/app.js:3");

    let other = NodeId::derive(kinds::FUNCTION, "bar", "src/app.js", 3);
    assert_ne!(a, other);
}

#[test]
fn external_module_id_has_no_location() {
    let node = Node::external_module("lodash");
    assert_eq!(node.id.as_str(), "EXTERNAL_MODULE:lodash");
    assert!(node.file.is_none());
    assert!(node.line.is_none());
}

#[test]
fn add_node_twice_is_idempotent() {
    let mut store = GraphStore::in_memory();
    store.add_node(function("foo", "a.js", 1));
    store.add_node(function("foo", "a.js", 1));
    assert_eq!(store.node_count(), 1);
    assert_eq!(store.find_by_type(kinds::FUNCTION).len(), 1);
}

#[test]
fn node_attrs_merge_last_writer_wins() {
    let mut store = GraphStore::in_memory();
    store.add_node(function("foo", "a.js", 1).with_attr("async", "false"));
    store.add_node(
        function("foo", "a.js", 1)
            .with_attr("async", "true")
            .with_attr("exported", "true"),
    );

    let id = NodeId::derive(kinds::FUNCTION, "foo", "a.js", 1);
    let node = store.get_node(&id).unwrap();
    assert_eq!(node.attrs.get("async"), Some(&AttrValue::from("true")));
    assert_eq!(node.attrs.get("exported"), Some(&AttrValue::from("true")));
    // Untouched keys survive the merge.
    assert_eq!(node.name(), Some("foo"));
}

#[test]
fn add_edge_twice_is_idempotent() {
    let mut store = GraphStore::in_memory();
    let foo = function("foo", "a.js", 1);
    let bar = function("bar", "a.js", 5);
    let edge = Edge::new(foo.id.clone(), bar.id.clone(), kinds::CALLS);
    store.add_node(foo);
    store.add_node(bar);
    store.add_edge(edge.clone());
    store.add_edge(edge);
    assert_eq!(store.edge_count(), 1);
}

#[test]
fn unknown_edge_kind_is_rejected() {
    let mut store = GraphStore::in_memory();
    let foo = function("foo", "a.js", 1);
    let bar = function("bar", "a.js", 5);
    store.add_node(foo.clone());
    store.add_node(bar.clone());

    store.add_edge(Edge::new(foo.id.clone(), bar.id.clone(), "TELEPORTS_TO"));
    store.flush().unwrap();
    assert_eq!(store.edge_count(), 0);
    assert!(store.count_edges_by_type().is_empty());

    // A vocabulary kind on the same endpoints goes through.
    store.add_edge(Edge::new(foo.id, bar.id, kinds::CALLS));
    assert_eq!(store.edge_count(), 1);
}

#[test]
fn dangling_edge_defers_until_flush() {
    let mut store = GraphStore::in_memory();
    let foo = function("foo", "a.js", 1);
    let bar = function("bar", "a.js", 5);

    // Edge arrives before its destination node.
    store.add_edge(Edge::new(foo.id.clone(), bar.id.clone(), kinds::CALLS));
    store.add_node(foo);
    assert_eq!(store.edge_count(), 0);
    assert_eq!(store.pending_edge_count(), 1);

    store.add_node(bar);
    store.flush().unwrap();
    assert_eq!(store.edge_count(), 1);
    assert_eq!(store.pending_edge_count(), 0);
}

#[test]
fn flush_rejects_still_dangling_edges() {
    let mut store = GraphStore::in_memory();
    let foo = function("foo", "a.js", 1);
    store.add_node(foo.clone());
    store.add_edge(Edge::new(foo.id, NodeId::from("FUNCTION:ghost@a.js:9"), kinds::CALLS));

    let err = store.flush().unwrap_err();
    let message = err.to_string();
    assert!(message.contains("dangling"), "unexpected error: {message}");
    assert!(message.contains("ghost"));
    // Rejected edges are dropped, not retried forever.
    assert_eq!(store.pending_edge_count(), 0);
    assert_eq!(store.edge_count(), 0);
}

#[test]
fn outgoing_and_incoming_with_kind_filter() {
    let mut store = GraphStore::in_memory();
    let foo = function("foo", "a.js", 1);
    let bar = function("bar", "a.js", 5);
    store.add_node(foo.clone());
    store.add_node(bar.clone());
    store.add_edge(Edge::new(foo.id.clone(), bar.id.clone(), kinds::CALLS));
    store.add_edge(Edge::new(foo.id.clone(), bar.id.clone(), kinds::USES));

    assert_eq!(store.outgoing_edges(&foo.id, None).len(), 2);
    let calls = store.outgoing_edges(&foo.id, Some(&[kinds::CALLS.to_string()]));
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].kind, kinds::CALLS);

    let incoming = store.incoming_edges(&bar.id, Some(&[kinds::USES.to_string()]));
    assert_eq!(incoming.len(), 1);
    assert_eq!(incoming[0].src, foo.id);
}

#[test]
fn counts_skip_zero_kinds() {
    let mut store = GraphStore::in_memory();
    store.add_node(function("foo", "a.js", 1));
    let counts = store.count_nodes_by_type();
    assert_eq!(counts.get(kinds::FUNCTION), Some(&1));
    assert!(!counts.contains_key(kinds::CLASS));
    assert!(store.count_edges_by_type().is_empty());
}

#[test]
fn clear_write_clear_leaves_zero_counts() {
    let mut store = GraphStore::in_memory();
    store.add_node(function("foo", "a.js", 1));
    store.clear().unwrap();
    store.flush().unwrap();
    store.clear().unwrap();
    assert_eq!(store.node_count(), 0);
    assert_eq!(store.edge_count(), 0);
    assert!(store.count_nodes_by_type().is_empty());
}

#[test]
fn snapshot_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let foo = function("foo", "a.js", 1);
    let bar = function("bar", "a.js", 5);

    {
        let mut store = GraphStore::open(dir.path()).unwrap();
        store.add_node(foo.clone());
        store.add_node(bar.clone());
        store.add_edge(Edge::new(foo.id.clone(), bar.id.clone(), kinds::CALLS));
        store.flush().unwrap();
    }

    let store = GraphStore::open(dir.path()).unwrap();
    assert_eq!(store.node_count(), 2);
    assert_eq!(store.edge_count(), 1);
    let node = store.get_node(&foo.id).unwrap();
    assert_eq!(node.name(), Some("foo"));
}

#[test]
fn clear_removes_snapshot() {
    let dir = tempfile::tempdir().unwrap();
    {
        let mut store = GraphStore::open(dir.path()).unwrap();
        store.add_node(function("foo", "a.js", 1));
        store.flush().unwrap();
        store.clear().unwrap();
    }
    let store = GraphStore::open(dir.path()).unwrap();
    assert_eq!(store.node_count(), 0);
}

#[test]
fn attr_value_roundtrips_as_string_or_number() {
    let s = serde_json::to_string(&AttrValue::from("hello")).unwrap();
    assert_eq!(s, "\"hello\"");
    let n = serde_json::to_string(&AttrValue::from(3.0)).unwrap();
    assert_eq!(n, "3.0");

    let back: AttrValue = serde_json::from_str("\"hello\"").unwrap();
    assert_eq!(back, AttrValue::from("hello"));
    let back: AttrValue = serde_json::from_str("42.5").unwrap();
    assert_eq!(back, AttrValue::Num(42.5));
}

mod diagnostics {
    use crate::diagnostics::{codes, Diagnostic, DiagnosticCollector, Severity};

    #[test]
    fn collector_filters_by_phase_and_severity() {
        let collector = DiagnosticCollector::new();
        collector.record(
            "ENRICHMENT",
            Diagnostic::strict(
                codes::STRICT_UNRESOLVED_METHOD,
                "a.js",
                12,
                "cannot resolve method doSomething on unknownObj",
                "declare unknownObj or add its package to a plugin's covers list",
            ),
        );
        collector.record(
            "VALIDATION",
            Diagnostic::new("COVERAGE_GAP", Severity::Warning, "lodash is uncovered"),
        );

        assert_eq!(collector.fatal_in_phase("ENRICHMENT").len(), 1);
        assert!(collector.fatal_in_phase("VALIDATION").is_empty());
        assert_eq!(
            collector.in_phase("VALIDATION", Severity::Warning).len(),
            1
        );
        assert_eq!(collector.all().len(), 2);
    }

    #[test]
    fn severity_ordering() {
        assert!(Severity::Fatal > Severity::Error);
        assert!(Severity::Error > Severity::Warning);
        assert!(Severity::Warning > Severity::Info);
    }
}
