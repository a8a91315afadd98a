//! Execution context handed to every plugin

use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Mutex as StdMutex};

use tokio::sync::Mutex;

use trellis_core::{kinds, Edge, Node, NodeId, Severity};
use trellis_server::{ClientError, GraphClient, QueryOutcome};

use crate::config::AnalysisConfig;
use crate::plugin::Phase;
use crate::resources::ResourceRegistry;

/// Shared, clonable handle over the single wire client. Wire calls are
/// serialised by the inner lock; plugin concurrency lives above it.
#[derive(Clone)]
pub struct GraphHandle {
    inner: Arc<Mutex<GraphClient>>,
}

impl GraphHandle {
    pub fn new(client: GraphClient) -> Self {
        GraphHandle {
            inner: Arc::new(Mutex::new(client)),
        }
    }

    pub async fn buffer_node(&self, node: Node) -> Result<(), ClientError> {
        self.inner.lock().await.buffer_node(node).await
    }

    pub async fn buffer_edge(&self, edge: Edge) -> Result<(), ClientError> {
        self.inner.lock().await.buffer_edge(edge).await
    }

    pub async fn ensure_external_module(&self, package: &str) -> Result<NodeId, ClientError> {
        self.inner.lock().await.ensure_external_module(package).await
    }

    pub async fn flush_mutations(&self) -> Result<(), ClientError> {
        self.inner.lock().await.flush_mutations().await
    }

    pub async fn flush(&self) -> Result<(), ClientError> {
        self.inner.lock().await.flush().await
    }

    pub async fn clear(&self) -> Result<(), ClientError> {
        self.inner.lock().await.clear().await
    }

    pub async fn get_node(&self, id: &NodeId) -> Result<Option<Node>, ClientError> {
        self.inner.lock().await.get_node(id).await
    }

    pub async fn find_by_type(&self, kind: &str) -> Result<Vec<Node>, ClientError> {
        self.inner.lock().await.find_by_type(kind).await
    }

    pub async fn outgoing_edges(
        &self,
        id: &NodeId,
        edge_types: Option<Vec<String>>,
    ) -> Result<Vec<Edge>, ClientError> {
        self.inner.lock().await.outgoing_edges(id, edge_types).await
    }

    pub async fn incoming_edges(
        &self,
        id: &NodeId,
        edge_types: Option<Vec<String>>,
    ) -> Result<Vec<Edge>, ClientError> {
        self.inner.lock().await.incoming_edges(id, edge_types).await
    }

    pub async fn count_nodes_by_type(&self) -> Result<HashMap<String, usize>, ClientError> {
        self.inner.lock().await.count_nodes_by_type().await
    }

    pub async fn count_edges_by_type(&self) -> Result<HashMap<String, usize>, ClientError> {
        self.inner.lock().await.count_edges_by_type().await
    }

    pub async fn execute_datalog(
        &self,
        source: &str,
        explain: bool,
    ) -> Result<QueryOutcome, ClientError> {
        self.inner.lock().await.execute_datalog(source, explain).await
    }

    pub async fn check_guarantee(
        &self,
        rule_source: &str,
        explain: bool,
    ) -> Result<QueryOutcome, ClientError> {
        self.inner.lock().await.check_guarantee(rule_source, explain).await
    }
}

/// What a VALIDATION plugin wants recorded as an `ISSUE` node.
#[derive(Debug, Clone)]
pub struct IssueSpec {
    pub category: String,
    pub severity: Severity,
    pub message: String,
    pub suggestion: Option<String>,
    /// When set, the issue is linked to this node with an `AFFECTS` edge.
    pub target: Option<NodeId>,
    pub file: Option<String>,
    pub line: Option<u32>,
}

impl IssueSpec {
    pub fn new(category: &str, severity: Severity, message: impl Into<String>) -> Self {
        IssueSpec {
            category: category.to_string(),
            severity,
            message: message.into(),
            suggestion: None,
            target: None,
            file: None,
            line: None,
        }
    }

    pub fn suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestion = Some(suggestion.into());
        self
    }

    pub fn target(mut self, target: NodeId) -> Self {
        self.target = Some(target);
        self
    }

    /// Deterministic issue node id: category plus target, or a hash of
    /// the message for graph-wide issues.
    pub fn node_id(&self) -> NodeId {
        match &self.target {
            Some(target) => NodeId(format!("{}:{}:{}", kinds::ISSUE, self.category, target)),
            None => {
                let mut hasher = DefaultHasher::new();
                self.message.hash(&mut hasher);
                NodeId(format!(
                    "{}:{}:{:016x}",
                    kinds::ISSUE,
                    self.category,
                    hasher.finish()
                ))
            }
        }
    }
}

pub type ProgressFn = Arc<dyn Fn(&str) + Send + Sync>;

/// Everything a plugin's `execute` receives.
#[derive(Clone)]
pub struct PluginContext {
    pub graph: GraphHandle,
    pub resources: Arc<ResourceRegistry>,
    pub strict_mode: bool,
    pub config: Arc<AnalysisConfig>,
    phase: Phase,
    issues: Arc<StdMutex<Vec<IssueSpec>>>,
    progress: Option<ProgressFn>,
}

impl PluginContext {
    pub fn new(
        graph: GraphHandle,
        resources: Arc<ResourceRegistry>,
        config: Arc<AnalysisConfig>,
        phase: Phase,
        issues: Arc<StdMutex<Vec<IssueSpec>>>,
        progress: Option<ProgressFn>,
    ) -> Self {
        let strict_mode = config.strict_mode;
        PluginContext {
            graph,
            resources,
            strict_mode,
            config,
            phase,
            issues,
            progress,
        }
    }

    pub fn graph(&self) -> &GraphHandle {
        &self.graph
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Queue an issue for materialisation at the VALIDATION barrier.
    /// Outside VALIDATION this is a no-op with a warning; analysis
    /// findings belong in `PluginResult.errors`.
    pub fn report_issue(&self, spec: IssueSpec) {
        if self.phase != Phase::Validation {
            tracing::warn!(
                phase = %self.phase,
                category = %spec.category,
                "report_issue outside VALIDATION is ignored"
            );
            return;
        }
        self.issues
            .lock()
            .expect("issue sink lock poisoned")
            .push(spec);
    }

    pub fn progress(&self, message: &str) {
        if let Some(progress) = &self.progress {
            progress(message);
        } else {
            tracing::debug!("{message}");
        }
    }
}
