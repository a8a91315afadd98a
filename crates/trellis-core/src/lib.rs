//! Trellis Core — graph data model, indexed store, snapshot, diagnostics

pub mod diagnostics;
pub mod error;
pub mod model;
pub mod snapshot;
pub mod store;

#[cfg(test)]
pub mod tests;

pub use diagnostics::{codes, Diagnostic, DiagnosticCollector, Severity};
pub use error::{GraphError, Result};
pub use model::{kinds, AttrMap, AttrValue, Edge, EdgeKey, Node, NodeId};
pub use store::GraphStore;
