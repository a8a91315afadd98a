//! Error types for the graph store

use thiserror::Error;

#[derive(Error, Debug)]
pub enum GraphError {
    /// Edges whose endpoints were still missing when `flush` resolved the
    /// deferred buffer. The offending edges are rejected, not committed.
    #[error("{} dangling edge(s) at flush: {}", .0.len(), .0.join("; "))]
    DanglingEdges(Vec<String>),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("snapshot encode: {0}")]
    SnapshotEncode(#[from] rmp_serde::encode::Error),

    #[error("snapshot decode: {0}")]
    SnapshotDecode(#[from] rmp_serde::decode::Error),
}

pub type Result<T> = std::result::Result<T, GraphError>;
