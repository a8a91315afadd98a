//! Client side of the wire protocol, with buffered mutations
//!
//! Producers write through `buffer_node`/`buffer_edge`; the client groups
//! them into bounded batches to amortise per-message overhead. Batch size
//! is a tuning knob, not a correctness one. `flush` drains the buffers and
//! asks the server to materialise.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use thiserror::Error;
use tokio::io::BufStream;
use tokio::net::UnixStream;
use tracing::debug;

use trellis_core::{Edge, Node, NodeId};
use trellis_datalog::{Binding, ExplainStep, QueryProfile, QueryStats};

use crate::protocol::{
    read_frame, write_frame, ProtocolError, Request, RequestEnvelope, Response, ResponseEnvelope,
};

/// Mutations per `AddNodes`/`AddEdges` message.
pub const DEFAULT_BATCH_SIZE: usize = 500;

const CONNECT_ATTEMPTS: u32 = 5;
const CONNECT_BASE_DELAY: Duration = Duration::from_millis(50);

#[derive(Error, Debug)]
pub enum ClientError {
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error("server error {code}: {message}")]
    Server { code: String, message: String },

    #[error("unexpected response: {0}")]
    Unexpected(String),

    #[error("connection closed by server")]
    Closed,

    #[error("connect to {path} failed after {attempts} attempts: {last}")]
    Connect {
        path: PathBuf,
        attempts: u32,
        last: std::io::Error,
    },
}

pub type ClientResult<T> = Result<T, ClientError>;

/// Explain payload attached to a query outcome when requested.
#[derive(Debug, Clone, PartialEq)]
pub struct ExplainPayload {
    pub stats: QueryStats,
    pub profile: QueryProfile,
    pub steps: Vec<ExplainStep>,
}

/// Rows plus the optional explain payload. `explain` is `None` exactly
/// when the request did not ask for it.
#[derive(Debug, Clone, Default)]
pub struct QueryOutcome {
    pub rows: Vec<Binding>,
    pub explain: Option<ExplainPayload>,
}

pub struct GraphClient {
    stream: BufStream<UnixStream>,
    next_id: u64,
    batch_size: usize,
    node_buffer: Vec<Node>,
    edge_buffer: Vec<Edge>,
}

impl GraphClient {
    /// Connect with bounded exponential backoff, for servers that are
    /// still binding their socket.
    pub async fn connect(path: &Path) -> ClientResult<Self> {
        let mut delay = CONNECT_BASE_DELAY;
        let mut last = None;
        for attempt in 1..=CONNECT_ATTEMPTS {
            match UnixStream::connect(path).await {
                Ok(stream) => {
                    debug!(socket = %path.display(), attempt, "connected");
                    return Ok(GraphClient {
                        stream: BufStream::new(stream),
                        next_id: 0,
                        batch_size: DEFAULT_BATCH_SIZE,
                        node_buffer: Vec::new(),
                        edge_buffer: Vec::new(),
                    });
                }
                Err(e) => {
                    last = Some(e);
                    if attempt < CONNECT_ATTEMPTS {
                        tokio::time::sleep(delay).await;
                        delay *= 2;
                    }
                }
            }
        }
        Err(ClientError::Connect {
            path: path.to_path_buf(),
            attempts: CONNECT_ATTEMPTS,
            last: last.unwrap_or_else(|| std::io::Error::other("no attempt made")),
        })
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    async fn call(&mut self, request: Request) -> ClientResult<Response> {
        self.next_id += 1;
        let envelope = RequestEnvelope {
            request_id: format!("req-{}", self.next_id),
            request,
        };
        write_frame(&mut self.stream, &envelope).await?;
        let response: ResponseEnvelope = read_frame(&mut self.stream)
            .await?
            .ok_or(ClientError::Closed)?;
        if response.request_id != envelope.request_id {
            return Err(ClientError::Unexpected(format!(
                "response for {} while awaiting {}",
                response.request_id, envelope.request_id
            )));
        }
        match response.response {
            Response::Error { code, message } => Err(ClientError::Server { code, message }),
            other => Ok(other),
        }
    }

    fn expect_ok(response: Response) -> ClientResult<()> {
        match response {
            Response::Ok => Ok(()),
            other => Err(ClientError::Unexpected(format!("{other:?}"))),
        }
    }

    // ── Direct writes ───────────────────────────────────────

    pub async fn add_node(&mut self, node: Node) -> ClientResult<()> {
        Self::expect_ok(self.call(Request::AddNode { node }).await?)
    }

    pub async fn add_nodes(&mut self, nodes: Vec<Node>) -> ClientResult<()> {
        Self::expect_ok(self.call(Request::AddNodes { nodes }).await?)
    }

    pub async fn add_edge(&mut self, edge: Edge) -> ClientResult<()> {
        Self::expect_ok(self.call(Request::AddEdge { edge }).await?)
    }

    pub async fn add_edges(&mut self, edges: Vec<Edge>) -> ClientResult<()> {
        Self::expect_ok(self.call(Request::AddEdges { edges }).await?)
    }

    // ── Buffered writes ─────────────────────────────────────

    pub async fn buffer_node(&mut self, node: Node) -> ClientResult<()> {
        self.node_buffer.push(node);
        if self.node_buffer.len() >= self.batch_size {
            self.flush_mutations().await?;
        }
        Ok(())
    }

    pub async fn buffer_edge(&mut self, edge: Edge) -> ClientResult<()> {
        self.edge_buffer.push(edge);
        if self.edge_buffer.len() >= self.batch_size {
            self.flush_mutations().await?;
        }
        Ok(())
    }

    /// Send buffered mutations without asking the server to materialise.
    pub async fn flush_mutations(&mut self) -> ClientResult<()> {
        if !self.node_buffer.is_empty() {
            let nodes = std::mem::take(&mut self.node_buffer);
            self.add_nodes(nodes).await?;
        }
        if !self.edge_buffer.is_empty() {
            let edges = std::mem::take(&mut self.edge_buffer);
            self.add_edges(edges).await?;
        }
        Ok(())
    }

    /// Drain buffers, then materialise: resolves deferred edges and
    /// persists the snapshot.
    pub async fn flush(&mut self) -> ClientResult<()> {
        self.flush_mutations().await?;
        Self::expect_ok(self.call(Request::Flush).await?)
    }

    pub async fn clear(&mut self) -> ClientResult<()> {
        self.node_buffer.clear();
        self.edge_buffer.clear();
        Self::expect_ok(self.call(Request::Clear).await?)
    }

    /// Buffer an `EXTERNAL_MODULE:<package>` placeholder. Idempotent by
    /// id, so callers create them on demand.
    pub async fn ensure_external_module(&mut self, package: &str) -> ClientResult<NodeId> {
        let node = Node::external_module(package);
        let id = node.id.clone();
        self.buffer_node(node).await?;
        Ok(id)
    }

    // ── Reads ───────────────────────────────────────────────

    pub async fn get_node(&mut self, id: &NodeId) -> ClientResult<Option<Node>> {
        match self
            .call(Request::GetNode {
                id: id.0.clone(),
            })
            .await?
        {
            Response::NodeRecord { node } => Ok(node),
            other => Err(ClientError::Unexpected(format!("{other:?}"))),
        }
    }

    pub async fn find_by_type(&mut self, kind: &str) -> ClientResult<Vec<Node>> {
        match self
            .call(Request::FindByType {
                node_type: kind.to_string(),
            })
            .await?
        {
            Response::NodeBatch { nodes } => Ok(nodes),
            other => Err(ClientError::Unexpected(format!("{other:?}"))),
        }
    }

    pub async fn outgoing_edges(
        &mut self,
        id: &NodeId,
        edge_types: Option<Vec<String>>,
    ) -> ClientResult<Vec<Edge>> {
        match self
            .call(Request::OutgoingEdges {
                id: id.0.clone(),
                edge_types,
            })
            .await?
        {
            Response::EdgeBatch { edges } => Ok(edges),
            other => Err(ClientError::Unexpected(format!("{other:?}"))),
        }
    }

    pub async fn incoming_edges(
        &mut self,
        id: &NodeId,
        edge_types: Option<Vec<String>>,
    ) -> ClientResult<Vec<Edge>> {
        match self
            .call(Request::IncomingEdges {
                id: id.0.clone(),
                edge_types,
            })
            .await?
        {
            Response::EdgeBatch { edges } => Ok(edges),
            other => Err(ClientError::Unexpected(format!("{other:?}"))),
        }
    }

    pub async fn count_nodes_by_type(&mut self) -> ClientResult<HashMap<String, usize>> {
        match self.call(Request::CountNodesByType).await? {
            Response::CountMap { counts } => Ok(counts),
            other => Err(ClientError::Unexpected(format!("{other:?}"))),
        }
    }

    pub async fn count_edges_by_type(&mut self) -> ClientResult<HashMap<String, usize>> {
        match self.call(Request::CountEdgesByType).await? {
            Response::CountMap { counts } => Ok(counts),
            other => Err(ClientError::Unexpected(format!("{other:?}"))),
        }
    }

    // ── Datalog ─────────────────────────────────────────────

    pub async fn check_guarantee(
        &mut self,
        rule_source: &str,
        explain: bool,
    ) -> ClientResult<QueryOutcome> {
        let response = self
            .call(Request::CheckGuarantee {
                rule_source: rule_source.to_string(),
                explain,
            })
            .await?;
        Self::outcome(response)
    }

    pub async fn datalog_query(&mut self, query: &str, explain: bool) -> ClientResult<QueryOutcome> {
        let response = self
            .call(Request::DatalogQuery {
                query: query.to_string(),
                explain,
            })
            .await?;
        Self::outcome(response)
    }

    pub async fn execute_datalog(
        &mut self,
        source: &str,
        explain: bool,
    ) -> ClientResult<QueryOutcome> {
        let response = self
            .call(Request::ExecuteDatalog {
                source: source.to_string(),
                explain,
            })
            .await?;
        Self::outcome(response)
    }

    pub async fn load_rules(&mut self, source: &str) -> ClientResult<()> {
        Self::expect_ok(
            self.call(Request::DatalogLoadRules {
                source: source.to_string(),
            })
            .await?,
        )
    }

    pub async fn clear_rules(&mut self) -> ClientResult<()> {
        Self::expect_ok(self.call(Request::DatalogClearRules).await?)
    }

    fn outcome(response: Response) -> ClientResult<QueryOutcome> {
        match response {
            Response::Violations { violations } => Ok(QueryOutcome {
                rows: violations.into_iter().map(|r| r.bindings).collect(),
                explain: None,
            }),
            Response::DatalogResults { results } => Ok(QueryOutcome {
                rows: results.into_iter().map(|r| r.bindings).collect(),
                explain: None,
            }),
            Response::ExplainResult {
                bindings,
                stats,
                profile,
                explain_steps,
            } => Ok(QueryOutcome {
                rows: bindings,
                explain: Some(ExplainPayload {
                    stats,
                    profile,
                    steps: explain_steps,
                }),
            }),
            other => Err(ClientError::Unexpected(format!("{other:?}"))),
        }
    }
}
