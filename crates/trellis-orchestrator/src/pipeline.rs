//! The phased pipeline: barriers, worker pool, strict mode, issues
//!
//! Phases run in strict order with a flush barrier between them, so a
//! phase N+1 plugin observes everything phase N committed. Within a
//! phase, topologically-independent plugins run concurrently on a
//! bounded worker pool; exclusive plugins are serialised. A dedicated
//! strict-mode barrier sits between ENRICHMENT and VALIDATION.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex as StdMutex};

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use trellis_core::{kinds, Diagnostic, DiagnosticCollector, Edge, Node, Severity};
use trellis_server::{ClientError, GraphClient};

use crate::config::AnalysisConfig;
use crate::context::{GraphHandle, IssueSpec, PluginContext, ProgressFn};
use crate::error::{OrchestratorError, Result};
use crate::plugin::{Phase, Plugin, PluginResult};
use crate::registry::PluginRegistry;
use crate::resources::{keys, ResourceRegistry};

/// One plugin execution, for the terminal summary.
#[derive(Debug, Clone)]
pub struct PluginRun {
    pub plugin: String,
    pub phase: Phase,
    pub summary: String,
    pub nodes_created: usize,
    pub edges_created: usize,
}

#[derive(Debug, Default)]
pub struct RunReport {
    pub plugin_runs: Vec<PluginRun>,
    pub nodes_created: usize,
    pub edges_created: usize,
    pub issues_created: usize,
}

pub struct Orchestrator {
    registry: PluginRegistry,
    config: Arc<AnalysisConfig>,
    collector: Arc<DiagnosticCollector>,
    progress: Option<ProgressFn>,
}

impl Orchestrator {
    pub fn new(registry: PluginRegistry, config: AnalysisConfig) -> Self {
        Orchestrator {
            registry,
            config: Arc::new(config),
            collector: Arc::new(DiagnosticCollector::new()),
            progress: None,
        }
    }

    pub fn with_progress(mut self, progress: ProgressFn) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn collector(&self) -> Arc<DiagnosticCollector> {
        Arc::clone(&self.collector)
    }

    pub fn config(&self) -> &AnalysisConfig {
        &self.config
    }

    /// Run the full pipeline over the given client connection.
    pub async fn run(&self, client: GraphClient) -> Result<RunReport> {
        self.registry.validate()?;

        let graph = GraphHandle::new(client);
        let resources = Arc::new(ResourceRegistry::new());
        resources.publish(keys::COVERED_PACKAGES, self.registry.covered_packages());
        let issues: Arc<StdMutex<Vec<IssueSpec>>> = Arc::new(StdMutex::new(Vec::new()));

        let mut report = RunReport::default();

        for phase in Phase::ALL {
            let ctx = PluginContext::new(
                graph.clone(),
                Arc::clone(&resources),
                Arc::clone(&self.config),
                phase,
                Arc::clone(&issues),
                self.progress.clone(),
            );
            let members = self.registry.in_phase(phase);
            if !members.is_empty() {
                info!(phase = %phase, plugins = members.len(), "phase starting");
            }

            for plugin in &members {
                plugin.initialize(&ctx).await?;
            }

            let layers = self.registry.topo_layers(phase)?;
            if phase == Phase::Enrichment {
                self.run_enrichment(&ctx, &graph, &layers, &mut report)
                    .await?;
            } else {
                self.run_layers(&ctx, &graph, &layers, None, &mut report)
                    .await?;
            }

            for plugin in &members {
                plugin.cleanup(&ctx).await?;
            }

            if phase == Phase::Validation {
                report.issues_created = self.materialize_issues(&graph, &issues).await?;
            }

            self.barrier_flush(&graph, phase).await?;

            // Every barrier consults the collector; fatal diagnostics
            // terminate the run. After ENRICHMENT this is the strict-mode
            // barrier: strict codes only exist when strict mode is on,
            // and VALIDATION never gets scheduled past them.
            let fatal = self.collector.fatal_in_phase(phase.name());
            if !fatal.is_empty() {
                for diagnostic in &fatal {
                    error!(
                        code = %diagnostic.code,
                        file = diagnostic.file.as_deref().unwrap_or("<unknown>"),
                        line = diagnostic.line.unwrap_or(0),
                        suggestion = diagnostic.suggestion.as_deref().unwrap_or(""),
                        "{}",
                        diagnostic.message
                    );
                }
                return Err(if phase == Phase::Enrichment && self.config.strict_mode {
                    OrchestratorError::StrictMode(fatal.len())
                } else {
                    OrchestratorError::FatalDiagnostics {
                        phase: phase.name().to_string(),
                        count: fatal.len(),
                    }
                });
            }
        }

        Ok(report)
    }

    /// Execute the layers of one phase. When `only` is set, restrict to
    /// those plugin names (enrichment re-queue). Returns mutation counts
    /// per plugin.
    async fn run_layers(
        &self,
        ctx: &PluginContext,
        graph: &GraphHandle,
        layers: &[Vec<Arc<dyn Plugin>>],
        only: Option<&HashSet<String>>,
        report: &mut RunReport,
    ) -> Result<HashMap<String, usize>> {
        let semaphore = Arc::new(Semaphore::new(self.config.effective_workers()));
        let mut mutations = HashMap::new();

        for layer in layers {
            let selected: Vec<Arc<dyn Plugin>> = layer
                .iter()
                .filter(|p| only.is_none_or(|names| names.contains(&p.metadata().name)))
                .cloned()
                .collect();
            let (exclusive, parallel): (Vec<_>, Vec<_>) =
                selected.into_iter().partition(|p| p.exclusive());

            let mut join_set = JoinSet::new();
            for plugin in parallel {
                let ctx = ctx.clone();
                let semaphore = Arc::clone(&semaphore);
                join_set.spawn(async move {
                    let _permit = semaphore
                        .acquire_owned()
                        .await
                        .expect("worker pool semaphore closed");
                    let name = plugin.metadata().name.clone();
                    debug!(plugin = %name, "executing");
                    let result = plugin.execute(&ctx).await;
                    (name, result)
                });
            }
            while let Some(joined) = join_set.join_next().await {
                let (name, result) =
                    joined.map_err(|e| anyhow::anyhow!("plugin task panicked: {e}"))?;
                self.absorb(ctx.phase(), &name, result, &mut mutations, report);
            }

            for plugin in exclusive {
                let name = plugin.metadata().name.clone();
                debug!(plugin = %name, "executing (exclusive)");
                let result = plugin.execute(ctx).await;
                self.absorb(ctx.phase(), &name, result, &mut mutations, report);
            }

            // Make this layer's writes readable by the next one.
            graph.flush_mutations().await?;
        }

        Ok(mutations)
    }

    /// ENRICHMENT runs to fixpoint: plugins whose dependencies produced
    /// mutations are re-queued until nothing changes or the cap trips.
    async fn run_enrichment(
        &self,
        ctx: &PluginContext,
        graph: &GraphHandle,
        layers: &[Vec<Arc<dyn Plugin>>],
        report: &mut RunReport,
    ) -> Result<()> {
        let mut iteration = 1usize;
        let mut mutated = self.run_layers(ctx, graph, layers, None, report).await?;

        loop {
            let updated: HashSet<&String> = mutated
                .iter()
                .filter(|(_, count)| **count > 0)
                .map(|(name, _)| name)
                .collect();

            let requeue: HashSet<String> = self
                .registry
                .in_phase(Phase::Enrichment)
                .iter()
                .filter(|p| {
                    p.metadata()
                        .dependencies
                        .iter()
                        .any(|d| updated.contains(d))
                })
                .map(|p| p.metadata().name.clone())
                .collect();
            if requeue.is_empty() {
                break;
            }

            iteration += 1;
            if iteration > self.config.enrichment_iteration_cap {
                return Err(OrchestratorError::EnrichmentOverrun(
                    self.config.enrichment_iteration_cap,
                ));
            }
            debug!(iteration, requeued = requeue.len(), "enrichment re-queue");
            mutated = self
                .run_layers(ctx, graph, layers, Some(&requeue), report)
                .await?;
        }
        Ok(())
    }

    fn absorb(
        &self,
        phase: Phase,
        name: &str,
        result: anyhow::Result<PluginResult>,
        mutations: &mut HashMap<String, usize>,
        report: &mut RunReport,
    ) {
        match result {
            Ok(result) => {
                self.collector.record_all(
                    phase.name(),
                    result.errors.iter().cloned().map(|d| d.with_plugin(name)),
                );
                mutations.insert(name.to_string(), result.mutations());
                report.nodes_created += result.nodes_created;
                report.edges_created += result.edges_created;
                report.plugin_runs.push(PluginRun {
                    plugin: name.to_string(),
                    phase,
                    summary: result.summary,
                    nodes_created: result.nodes_created,
                    edges_created: result.edges_created,
                });
            }
            Err(e) => {
                warn!(plugin = %name, error = %e, "plugin failed");
                self.collector.record(
                    phase.name(),
                    Diagnostic::new("PLUGIN_ERROR", Severity::Error, e.to_string())
                        .with_plugin(name),
                );
                mutations.insert(name.to_string(), 0);
            }
        }
    }

    /// Phase barrier: everything buffered is flushed and materialised.
    /// Dangling edges are an error-severity finding, not a run-stopper.
    async fn barrier_flush(&self, graph: &GraphHandle, phase: Phase) -> Result<()> {
        match graph.flush().await {
            Ok(()) => Ok(()),
            Err(ClientError::Server { code, message }) => {
                self.collector.record(
                    phase.name(),
                    Diagnostic::new(&code, Severity::Error, message),
                );
                Ok(())
            }
            Err(other) => Err(other.into()),
        }
    }

    /// Turn queued issue specs into `ISSUE` nodes and `AFFECTS` edges.
    async fn materialize_issues(
        &self,
        graph: &GraphHandle,
        issues: &Arc<StdMutex<Vec<IssueSpec>>>,
    ) -> Result<usize> {
        let drained: Vec<IssueSpec> = {
            let mut sink = issues.lock().expect("issue sink lock poisoned");
            sink.drain(..).collect()
        };

        let count = drained.len();
        for spec in drained {
            let id = spec.node_id();
            let mut node = Node {
                id: id.clone(),
                kind: kinds::ISSUE.to_string(),
                file: spec.file.clone(),
                line: spec.line,
                column: None,
                attrs: Default::default(),
            };
            node = node
                .with_attr("category", spec.category.as_str())
                .with_attr("severity", severity_name(spec.severity))
                .with_attr("message", spec.message.as_str());
            if let Some(suggestion) = &spec.suggestion {
                node = node.with_attr("suggestion", suggestion.as_str());
            }
            graph.buffer_node(node).await?;

            if let Some(target) = &spec.target {
                graph
                    .buffer_edge(Edge::new(id.clone(), target.clone(), kinds::AFFECTS))
                    .await?;
            }
        }
        if count > 0 {
            info!(issues = count, "validation issues recorded");
        }
        Ok(count)
    }
}

fn severity_name(severity: Severity) -> &'static str {
    match severity {
        Severity::Info => "info",
        Severity::Warning => "warning",
        Severity::Error => "error",
        Severity::Fatal => "fatal",
    }
}
