//! Core data structures for the code graph

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Stable, deterministic identifier for a node.
///
/// Ids are derived from what the node *is*, not from insertion order, so
/// re-analysis of unchanged source yields byte-identical ids.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(transparent)]
pub struct NodeId(pub String);

impl NodeId {
    /// Derive the id for a source construct: `KIND:name@file:line`.
    pub fn derive(kind: &str, name: &str, file: &str, line: u32) -> Self {
        NodeId(format!("{kind}:{name}@{file}:{line}"))
    }

    /// Synthetic id for an external package placeholder.
    pub fn external_module(package: &str) -> Self {
        NodeId(format!("{}:{package}", kinds::EXTERNAL_MODULE))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for NodeId {
    fn from(s: &str) -> Self {
        NodeId(s.to_string())
    }
}

impl From<String> for NodeId {
    fn from(s: String) -> Self {
        NodeId(s)
    }
}

/// Attribute values are flat: strings or numbers. Nested data is
/// serialised to a string by the producer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttrValue {
    Str(String),
    Num(f64),
}

impl AttrValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            AttrValue::Str(s) => Some(s),
            AttrValue::Num(_) => None,
        }
    }

    pub fn as_num(&self) -> Option<f64> {
        match self {
            AttrValue::Str(_) => None,
            AttrValue::Num(n) => Some(*n),
        }
    }
}

impl fmt::Display for AttrValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttrValue::Str(s) => f.write_str(s),
            AttrValue::Num(n) => write!(f, "{n}"),
        }
    }
}

impl From<&str> for AttrValue {
    fn from(s: &str) -> Self {
        AttrValue::Str(s.to_string())
    }
}

impl From<String> for AttrValue {
    fn from(s: String) -> Self {
        AttrValue::Str(s)
    }
}

impl From<f64> for AttrValue {
    fn from(n: f64) -> Self {
        AttrValue::Num(n)
    }
}

impl From<u32> for AttrValue {
    fn from(n: u32) -> Self {
        AttrValue::Num(n as f64)
    }
}

/// Attribute map. Ordered so that serialised graphs are byte-stable.
pub type AttrMap = BTreeMap<String, AttrValue>;

/// A single node in the code graph.
///
/// The kind vocabulary is open: analysis plugins may introduce namespaced
/// kinds (`db:query`, `http:route`) beyond the well-known constants in
/// [`kinds`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Node {
    pub id: NodeId,
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub column: Option<u32>,
    #[serde(default)]
    pub attrs: AttrMap,
}

impl Node {
    /// Node for a named source construct, with a derived id and a `name`
    /// attribute.
    pub fn source(kind: &str, name: &str, file: &str, line: u32) -> Self {
        let mut attrs = AttrMap::new();
        attrs.insert("name".to_string(), AttrValue::from(name));
        Node {
            id: NodeId::derive(kind, name, file, line),
            kind: kind.to_string(),
            file: Some(file.to_string()),
            line: Some(line),
            column: None,
            attrs,
        }
    }

    /// Placeholder node for a reference that crosses out of the analysed
    /// source. Carries no location.
    pub fn external_module(package: &str) -> Self {
        let mut attrs = AttrMap::new();
        attrs.insert("name".to_string(), AttrValue::from(package));
        Node {
            id: NodeId::external_module(package),
            kind: kinds::EXTERNAL_MODULE.to_string(),
            file: None,
            line: None,
            column: None,
            attrs,
        }
    }

    pub fn with_attr(mut self, key: &str, value: impl Into<AttrValue>) -> Self {
        self.attrs.insert(key.to_string(), value.into());
        self
    }

    pub fn with_column(mut self, column: u32) -> Self {
        self.column = Some(column);
        self
    }

    /// The `name` attribute, when present.
    pub fn name(&self) -> Option<&str> {
        self.attrs.get("name").and_then(AttrValue::as_str)
    }
}

/// Identity of an edge: duplicates on `(src, dst, kind)` are idempotent.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EdgeKey {
    pub src: NodeId,
    pub dst: NodeId,
    pub kind: String,
}

impl fmt::Display for EdgeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -[{}]-> {}", self.src, self.kind, self.dst)
    }
}

/// A directed typed edge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Edge {
    pub src: NodeId,
    pub dst: NodeId,
    pub kind: String,
    #[serde(default)]
    pub attrs: AttrMap,
}

impl Edge {
    pub fn new(src: impl Into<NodeId>, dst: impl Into<NodeId>, kind: &str) -> Self {
        Edge {
            src: src.into(),
            dst: dst.into(),
            kind: kind.to_string(),
            attrs: AttrMap::new(),
        }
    }

    pub fn with_attr(mut self, key: &str, value: impl Into<AttrValue>) -> Self {
        self.attrs.insert(key.to_string(), value.into());
        self
    }

    pub fn key(&self) -> EdgeKey {
        EdgeKey {
            src: self.src.clone(),
            dst: self.dst.clone(),
            kind: self.kind.clone(),
        }
    }
}

/// Well-known node and edge kinds.
///
/// Node kinds are an open vocabulary; edge kinds are closed.
pub mod kinds {
    // ── Node kinds ──────────────────────────────────────────
    pub const MODULE: &str = "MODULE";
    pub const FUNCTION: &str = "FUNCTION";
    pub const CLASS: &str = "CLASS";
    pub const INTERFACE: &str = "INTERFACE";
    pub const IMPORT: &str = "IMPORT";
    pub const CALL: &str = "CALL";
    pub const CONSTRUCTOR_CALL: &str = "CONSTRUCTOR_CALL";
    pub const VARIABLE: &str = "VARIABLE";
    pub const LITERAL: &str = "LITERAL";
    pub const EXPRESSION: &str = "EXPRESSION";
    pub const ISSUE: &str = "ISSUE";
    pub const EXTERNAL_MODULE: &str = "EXTERNAL_MODULE";

    // ── Edge kinds (closed vocabulary) ──────────────────────
    pub const CONTAINS: &str = "CONTAINS";
    pub const CALLS: &str = "CALLS";
    pub const IMPORTS_FROM: &str = "IMPORTS_FROM";
    pub const EXTENDS: &str = "EXTENDS";
    pub const IMPLEMENTS: &str = "IMPLEMENTS";
    pub const ASSIGNED_FROM: &str = "ASSIGNED_FROM";
    pub const DERIVES_FROM: &str = "DERIVES_FROM";
    pub const PASSES_ARGUMENT: &str = "PASSES_ARGUMENT";
    pub const USES: &str = "USES";
    pub const RETURNS: &str = "RETURNS";
    pub const EXECUTES_QUERY: &str = "EXECUTES_QUERY";
    pub const AFFECTS: &str = "AFFECTS";

    /// The closed edge-kind vocabulary. `GraphStore::add_edge` rejects
    /// edges with a kind outside this set.
    pub const EDGE_KINDS: &[&str] = &[
        CONTAINS,
        CALLS,
        IMPORTS_FROM,
        EXTENDS,
        IMPLEMENTS,
        ASSIGNED_FROM,
        DERIVES_FROM,
        PASSES_ARGUMENT,
        USES,
        RETURNS,
        EXECUTES_QUERY,
        AFFECTS,
    ];
}
