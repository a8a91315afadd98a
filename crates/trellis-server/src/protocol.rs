//! Wire protocol: request/response shapes and frame codec
//!
//! Each frame is a 4-byte big-endian length prefix followed by one
//! MessagePack-encoded object. Field names are camelCase on the wire;
//! the `kind` field discriminates variants. Requests missing optional
//! fields (notably `explain`) default them to `false`, and a request
//! that never set `explain` never receives an `ExplainResult`. New
//! response shapes are added as new variants, existing ones stay frozen.

use std::collections::HashMap;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use trellis_core::{Edge, Node};
use trellis_datalog::{Binding, ExplainStep, QueryProfile, QueryStats};

/// Upper bound on a single frame. Large enough for full-graph batches,
/// small enough to reject a corrupt length prefix immediately.
pub const MAX_FRAME_LEN: usize = 64 * 1024 * 1024;

#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("frame of {0} bytes exceeds the {MAX_FRAME_LEN} byte limit")]
    FrameTooLarge(usize),

    #[error("encode: {0}")]
    Encode(#[from] rmp_serde::encode::Error),

    #[error("decode: {0}")]
    Decode(#[from] rmp_serde::decode::Error),
}

/// Error codes carried by `Response::Error`.
pub mod error_codes {
    pub const UNKNOWN_REQUEST: &str = "UNKNOWN_REQUEST";
    pub const PARSE_ERROR: &str = "PARSE_ERROR";
    pub const FLUSH_FAILED: &str = "FLUSH_FAILED";
    pub const INTERNAL: &str = "INTERNAL";
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all_fields = "camelCase")]
pub enum Request {
    // ── Writes ──────────────────────────────────────────────
    AddNode {
        node: Node,
    },
    AddNodes {
        nodes: Vec<Node>,
    },
    AddEdge {
        edge: Edge,
    },
    AddEdges {
        edges: Vec<Edge>,
    },
    Flush,
    Clear,

    // ── Reads ───────────────────────────────────────────────
    GetNode {
        id: String,
    },
    FindByType {
        node_type: String,
    },
    OutgoingEdges {
        id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        edge_types: Option<Vec<String>>,
    },
    IncomingEdges {
        id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        edge_types: Option<Vec<String>>,
    },
    CountNodesByType,
    CountEdgesByType,

    // ── Datalog ─────────────────────────────────────────────
    /// Compile a rule program and run the first rule's head as the query.
    CheckGuarantee {
        rule_source: String,
        #[serde(default)]
        explain: bool,
    },
    /// Parse a single goal atom and evaluate it.
    DatalogQuery {
        query: String,
        #[serde(default)]
        explain: bool,
    },
    /// A source blob: a rule program, or a conjunction of literals.
    ExecuteDatalog {
        source: String,
        #[serde(default)]
        explain: bool,
    },
    DatalogLoadRules {
        source: String,
    },
    DatalogClearRules,
}

impl Request {
    /// Write requests are serialised by the server; reads interleave.
    pub fn is_write(&self) -> bool {
        matches!(
            self,
            Request::AddNode { .. }
                | Request::AddNodes { .. }
                | Request::AddEdge { .. }
                | Request::AddEdges { .. }
                | Request::Flush
                | Request::Clear
                | Request::DatalogLoadRules { .. }
                | Request::DatalogClearRules
        )
    }
}

/// One result row: a set of variable bindings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BindingRow {
    pub bindings: Binding,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all_fields = "camelCase")]
pub enum Response {
    NodeRecord {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        node: Option<Node>,
    },
    NodeBatch {
        nodes: Vec<Node>,
    },
    EdgeBatch {
        edges: Vec<Edge>,
    },
    CountMap {
        counts: HashMap<String, usize>,
    },
    Ok,
    Violations {
        violations: Vec<BindingRow>,
    },
    DatalogResults {
        results: Vec<BindingRow>,
    },
    /// Returned only when the corresponding request set `explain: true`.
    ExplainResult {
        bindings: Vec<Binding>,
        stats: QueryStats,
        profile: QueryProfile,
        explain_steps: Vec<ExplainStep>,
    },
    Error {
        code: String,
        message: String,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestEnvelope {
    pub request_id: String,
    #[serde(flatten)]
    pub request: Request,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseEnvelope {
    pub request_id: String,
    #[serde(flatten)]
    pub response: Response,
}

/// The fields every request must carry, used to salvage the request id
/// from frames whose `kind` the server does not recognise.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PartialEnvelope {
    pub request_id: String,
    #[serde(default)]
    pub kind: Option<String>,
}

// ── Frame codec ─────────────────────────────────────────────

pub async fn write_frame<W, T>(writer: &mut W, value: &T) -> Result<(), ProtocolError>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let body = rmp_serde::to_vec_named(value)?;
    if body.len() > MAX_FRAME_LEN {
        return Err(ProtocolError::FrameTooLarge(body.len()));
    }
    writer.write_all(&(body.len() as u32).to_be_bytes()).await?;
    writer.write_all(&body).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one raw frame body. `Ok(None)` means the peer closed cleanly
/// between frames.
pub async fn read_frame_bytes<R>(reader: &mut R) -> Result<Option<Vec<u8>>, ProtocolError>
where
    R: AsyncRead + Unpin,
{
    let mut prefix = [0u8; 4];
    match reader.read_exact(&mut prefix).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }
    let len = u32::from_be_bytes(prefix) as usize;
    if len > MAX_FRAME_LEN {
        return Err(ProtocolError::FrameTooLarge(len));
    }
    let mut body = vec![0u8; len];
    reader.read_exact(&mut body).await?;
    Ok(Some(body))
}

pub async fn read_frame<R, T>(reader: &mut R) -> Result<Option<T>, ProtocolError>
where
    R: AsyncRead + Unpin,
    T: DeserializeOwned,
{
    match read_frame_bytes(reader).await? {
        Some(body) => Ok(Some(rmp_serde::from_slice(&body)?)),
        None => Ok(None),
    }
}
