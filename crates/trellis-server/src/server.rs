//! The graph server: one store, one socket, many clients
//!
//! Writes take the store's write lock and are therefore serialised; reads
//! interleave freely with each other but are fenced against writes: a
//! read sees the state before a write batch or after it, never mid-flush.
//! Responses on a connection are returned in request order because each
//! connection task handles its frames sequentially.

use std::path::PathBuf;
use std::sync::Arc;

use tokio::io::{BufReader, BufWriter};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{watch, RwLock};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use trellis_core::GraphStore;
use trellis_datalog::{
    is_rule_program, parse_atom, parse_program, parse_query, EvaluatorExplain, QueryResult, Rule,
};

use crate::protocol::{
    error_codes, read_frame_bytes, write_frame, BindingRow, PartialEnvelope, Request,
    RequestEnvelope, Response, ResponseEnvelope,
};

#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Path of the Unix domain socket to bind.
    pub socket_path: PathBuf,
}

/// Handle for requesting a graceful shutdown from another task.
#[derive(Clone)]
pub struct ShutdownHandle {
    tx: watch::Sender<bool>,
}

impl ShutdownHandle {
    pub fn shutdown(&self) {
        let _ = self.tx.send(true);
    }
}

pub struct GraphServer {
    store: Arc<RwLock<GraphStore>>,
    /// Rule set loaded via `DatalogLoadRules`, prepended to every query.
    rules: Arc<RwLock<Vec<Rule>>>,
    config: ServerConfig,
    shutdown_tx: watch::Sender<bool>,
}

impl GraphServer {
    pub fn new(store: GraphStore, config: ServerConfig) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        GraphServer {
            store: Arc::new(RwLock::new(store)),
            rules: Arc::new(RwLock::new(Vec::new())),
            config,
            shutdown_tx,
        }
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            tx: self.shutdown_tx.clone(),
        }
    }

    /// Accept clients until shutdown, then drain in-flight requests,
    /// flush the store and remove the socket file.
    pub async fn run(&self) -> anyhow::Result<()> {
        let path = &self.config.socket_path;
        if path.exists() {
            std::fs::remove_file(path)?;
        }
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let listener = UnixListener::bind(path)?;
        info!(socket = %path.display(), "graph server listening");

        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let mut connections = JoinSet::new();
        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    let (stream, _) = accepted?;
                    let store = Arc::clone(&self.store);
                    let rules = Arc::clone(&self.rules);
                    let shutdown_rx = self.shutdown_tx.subscribe();
                    connections.spawn(async move {
                        if let Err(e) = handle_connection(stream, store, rules, shutdown_rx).await {
                            warn!(error = %e, "connection ended with error");
                        }
                    });
                }
                _ = shutdown_rx.changed() => {
                    break;
                }
            }
        }

        drop(listener);
        // Connection tasks observe the same shutdown signal and exit at
        // their next frame boundary.
        while connections.join_next().await.is_some() {}

        if let Err(e) = self.store.write().await.flush() {
            warn!(error = %e, "flush on shutdown");
        }
        let _ = std::fs::remove_file(path);
        info!("graph server stopped");
        Ok(())
    }
}

async fn handle_connection(
    stream: UnixStream,
    store: Arc<RwLock<GraphStore>>,
    rules: Arc<RwLock<Vec<Rule>>>,
    mut shutdown_rx: watch::Receiver<bool>,
) -> Result<(), crate::protocol::ProtocolError> {
    let (read_half, write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);
    let mut writer = BufWriter::new(write_half);

    loop {
        let frame = tokio::select! {
            frame = read_frame_bytes(&mut reader) => frame?,
            _ = shutdown_rx.changed() => {
                debug!("connection closing on shutdown");
                return Ok(());
            }
        };
        let Some(body) = frame else {
            return Ok(());
        };

        let envelope = match rmp_serde::from_slice::<RequestEnvelope>(&body) {
            Ok(env) => {
                let response = handle_request(env.request, &store, &rules).await;
                ResponseEnvelope {
                    request_id: env.request_id,
                    response,
                }
            }
            Err(decode_error) => {
                // Salvage the request id so the client can correlate the
                // failure; the kind was unknown or the shape malformed.
                let partial = rmp_serde::from_slice::<PartialEnvelope>(&body).ok();
                let message = match partial.as_ref().and_then(|p| p.kind.as_deref()) {
                    Some(kind) => format!("unknown request kind '{kind}'"),
                    None => decode_error.to_string(),
                };
                ResponseEnvelope {
                    request_id: partial.map(|p| p.request_id).unwrap_or_default(),
                    response: Response::Error {
                        code: error_codes::UNKNOWN_REQUEST.to_string(),
                        message,
                    },
                }
            }
        };

        write_frame(&mut writer, &envelope).await?;
    }
}

async fn handle_request(
    request: Request,
    store: &Arc<RwLock<GraphStore>>,
    rules: &Arc<RwLock<Vec<Rule>>>,
) -> Response {
    match request {
        // ── Writes (serialised by the write lock) ───────────
        Request::AddNode { node } => {
            store.write().await.add_node(node);
            Response::Ok
        }
        Request::AddNodes { nodes } => {
            store.write().await.add_nodes(nodes);
            Response::Ok
        }
        Request::AddEdge { edge } => {
            store.write().await.add_edge(edge);
            Response::Ok
        }
        Request::AddEdges { edges } => {
            store.write().await.add_edges(edges);
            Response::Ok
        }
        Request::Flush => match store.write().await.flush() {
            Ok(()) => Response::Ok,
            Err(e) => Response::Error {
                code: error_codes::FLUSH_FAILED.to_string(),
                message: e.to_string(),
            },
        },
        Request::Clear => match store.write().await.clear() {
            Ok(()) => Response::Ok,
            Err(e) => Response::Error {
                code: error_codes::INTERNAL.to_string(),
                message: e.to_string(),
            },
        },

        // ── Reads (fenced against writes) ───────────────────
        Request::GetNode { id } => {
            let guard = store.read().await;
            Response::NodeRecord {
                node: guard.get_node(&id.as_str().into()).cloned(),
            }
        }
        Request::FindByType { node_type } => {
            let guard = store.read().await;
            Response::NodeBatch {
                nodes: guard
                    .find_by_type(&node_type)
                    .into_iter()
                    .cloned()
                    .collect(),
            }
        }
        Request::OutgoingEdges { id, edge_types } => {
            let guard = store.read().await;
            Response::EdgeBatch {
                edges: guard
                    .outgoing_edges(&id.as_str().into(), edge_types.as_deref())
                    .into_iter()
                    .cloned()
                    .collect(),
            }
        }
        Request::IncomingEdges { id, edge_types } => {
            let guard = store.read().await;
            Response::EdgeBatch {
                edges: guard
                    .incoming_edges(&id.as_str().into(), edge_types.as_deref())
                    .into_iter()
                    .cloned()
                    .collect(),
            }
        }
        Request::CountNodesByType => {
            let guard = store.read().await;
            Response::CountMap {
                counts: guard.count_nodes_by_type(),
            }
        }
        Request::CountEdgesByType => {
            let guard = store.read().await;
            Response::CountMap {
                counts: guard.count_edges_by_type(),
            }
        }

        // ── Datalog ─────────────────────────────────────────
        Request::CheckGuarantee {
            rule_source,
            explain,
        } => {
            let guard = store.read().await;
            let loaded = rules.read().await;
            match run_program(&*guard, &loaded, &rule_source, explain) {
                Ok(result) => datalog_response(result, explain, true),
                Err(message) => parse_error(message),
            }
        }
        Request::DatalogQuery { query, explain } => {
            let guard = store.read().await;
            let loaded = rules.read().await;
            match parse_atom(&query) {
                Ok(goal) => {
                    let mut evaluator = EvaluatorExplain::new(&*guard, explain);
                    for rule in loaded.iter() {
                        evaluator.add_rule(rule.clone());
                    }
                    datalog_response(evaluator.query(&goal), explain, false)
                }
                Err(e) => parse_error(e.to_string()),
            }
        }
        Request::ExecuteDatalog { source, explain } => {
            let guard = store.read().await;
            let loaded = rules.read().await;
            let outcome = if is_rule_program(&source) {
                run_program(&*guard, &loaded, &source, explain)
            } else {
                parse_query(&source)
                    .map_err(|e| e.to_string())
                    .map(|literals| {
                        let mut evaluator = EvaluatorExplain::new(&*guard, explain);
                        for rule in loaded.iter() {
                            evaluator.add_rule(rule.clone());
                        }
                        evaluator.query_conjunction(&literals)
                    })
            };
            match outcome {
                Ok(result) => datalog_response(result, explain, false),
                Err(message) => parse_error(message),
            }
        }
        Request::DatalogLoadRules { source } => match parse_program(&source) {
            Ok(program) => {
                rules.write().await.extend(program.rules().iter().cloned());
                Response::Ok
            }
            Err(e) => parse_error(e.to_string()),
        },
        Request::DatalogClearRules => {
            rules.write().await.clear();
            Response::Ok
        }
    }
}

/// Compile a rule program and run the first rule's head as the query.
/// `CheckGuarantee` and `ExecuteDatalog` both land here, so the two are
/// interchangeable for rule programs.
fn run_program(
    store: &GraphStore,
    persistent: &[Rule],
    source: &str,
    explain: bool,
) -> Result<QueryResult, String> {
    let program = parse_program(source).map_err(|e| e.to_string())?;
    let Some(first) = program.rules().first() else {
        return Err("no rules found in program".to_string());
    };
    let goal = first.head.clone();

    let mut evaluator = EvaluatorExplain::new(store, explain);
    for rule in persistent {
        evaluator.add_rule(rule.clone());
    }
    evaluator.load_program(&program);
    Ok(evaluator.query(&goal))
}

fn datalog_response(result: QueryResult, explain: bool, guarantee: bool) -> Response {
    if explain {
        Response::ExplainResult {
            bindings: result.bindings,
            stats: result.stats.unwrap_or_default(),
            profile: result.profile.unwrap_or_default(),
            explain_steps: result.explain_steps.unwrap_or_default(),
        }
    } else if guarantee {
        Response::Violations {
            violations: result
                .bindings
                .into_iter()
                .map(|bindings| BindingRow { bindings })
                .collect(),
        }
    } else {
        Response::DatalogResults {
            results: result
                .bindings
                .into_iter()
                .map(|bindings| BindingRow { bindings })
                .collect(),
        }
    }
}

fn parse_error(message: String) -> Response {
    Response::Error {
        code: error_codes::PARSE_ERROR.to_string(),
        message,
    }
}
