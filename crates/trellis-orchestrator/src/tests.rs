//! Unit tests for trellis-orchestrator

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex};

use async_trait::async_trait;

use trellis_core::{codes, kinds, Diagnostic, GraphStore, Node, Severity};
use trellis_server::{GraphClient, GraphServer, ServerConfig, ShutdownHandle};

use crate::config::AnalysisConfig;
use crate::context::{IssueSpec, PluginContext};
use crate::coverage::{extract_package, is_platform_builtin, CoverageValidator};
use crate::error::OrchestratorError;
use crate::pipeline::Orchestrator;
use crate::plugin::{Phase, Plugin, PluginMetadata, PluginResult};
use crate::registry::PluginRegistry;
use crate::resources::ResourceRegistry;
use crate::strict::is_external_global;
use crate::suggest::{did_you_mean, queried_edge_kinds, queried_node_kinds};

// ── Test plugins ────────────────────────────────────────────

/// Buffers one function node and records that it ran.
struct WriterPlugin {
    metadata: PluginMetadata,
    node: Node,
    log: Arc<StdMutex<Vec<String>>>,
}

#[async_trait]
impl Plugin for WriterPlugin {
    fn metadata(&self) -> &PluginMetadata {
        &self.metadata
    }

    async fn execute(&self, ctx: &PluginContext) -> anyhow::Result<PluginResult> {
        self.log
            .lock()
            .unwrap()
            .push(self.metadata.name.clone());
        ctx.graph().buffer_node(self.node.clone()).await?;
        Ok(PluginResult {
            nodes_created: 1,
            ..Default::default()
        })
    }
}

/// Counts executions; reports a mutation only while `mutating_runs` last.
struct CountingPlugin {
    metadata: PluginMetadata,
    executions: Arc<AtomicUsize>,
    mutating_runs: usize,
}

#[async_trait]
impl Plugin for CountingPlugin {
    fn metadata(&self) -> &PluginMetadata {
        &self.metadata
    }

    async fn execute(&self, _ctx: &PluginContext) -> anyhow::Result<PluginResult> {
        let run = self.executions.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(PluginResult {
            nodes_created: if run <= self.mutating_runs { 1 } else { 0 },
            ..Default::default()
        })
    }
}

/// Hits an unresolved reference; per the strict contract it reports a
/// fatal diagnostic only when strict mode is on, and never throws.
struct StrictOffender {
    metadata: PluginMetadata,
}

#[async_trait]
impl Plugin for StrictOffender {
    fn metadata(&self) -> &PluginMetadata {
        &self.metadata
    }

    async fn execute(&self, ctx: &PluginContext) -> anyhow::Result<PluginResult> {
        let errors = if ctx.strict_mode {
            vec![Diagnostic::strict(
                codes::STRICT_UNRESOLVED_METHOD,
                "app.js",
                12,
                "cannot resolve method doSomething on unknownObj",
                "declare unknownObj or cover its package with a plugin",
            )]
        } else {
            Vec::new()
        };
        Ok(PluginResult {
            errors,
            ..Default::default()
        })
    }
}

// ── Server fixture ──────────────────────────────────────────

struct Harness {
    _dir: tempfile::TempDir,
    socket: PathBuf,
    shutdown: ShutdownHandle,
    task: tokio::task::JoinHandle<()>,
}

impl Harness {
    async fn start() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let socket = dir.path().join("trellis.sock");
        let server = GraphServer::new(
            GraphStore::in_memory(),
            ServerConfig {
                socket_path: socket.clone(),
            },
        );
        let shutdown = server.shutdown_handle();
        let task = tokio::spawn(async move {
            server.run().await.unwrap();
        });
        for _ in 0..100 {
            if socket.exists() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
        Harness {
            _dir: dir,
            socket,
            shutdown,
            task,
        }
    }

    async fn client(&self) -> GraphClient {
        GraphClient::connect(&self.socket).await.unwrap()
    }

    async fn stop(self) {
        self.shutdown.shutdown();
        self.task.await.unwrap();
    }
}

fn quiet_config() -> AnalysisConfig {
    AnalysisConfig {
        workers: 2,
        enrichment_iteration_cap: 3,
        ..Default::default()
    }
}

// ── Registry ────────────────────────────────────────────────

mod registry {
    use super::*;

    fn noop(name: &str, phase: Phase, deps: &[&str]) -> Arc<dyn Plugin> {
        Arc::new(CountingPlugin {
            metadata: PluginMetadata::new(name, phase).dependencies(deps),
            executions: Arc::new(AtomicUsize::new(0)),
            mutating_runs: 0,
        })
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let mut registry = PluginRegistry::new();
        registry.register(noop("A", Phase::Analysis, &[])).unwrap();
        let err = registry.register(noop("A", Phase::Analysis, &[])).unwrap_err();
        assert!(matches!(err, OrchestratorError::DuplicatePlugin(name) if name == "A"));
    }

    #[test]
    fn topo_layers_respect_dependencies() {
        let mut registry = PluginRegistry::new();
        registry.register(noop("C", Phase::Analysis, &["B"])).unwrap();
        registry.register(noop("A", Phase::Analysis, &[])).unwrap();
        registry.register(noop("B", Phase::Analysis, &["A"])).unwrap();

        let layers = registry.topo_layers(Phase::Analysis).unwrap();
        let names: Vec<Vec<String>> = layers
            .iter()
            .map(|l| l.iter().map(|p| p.metadata().name.clone()).collect())
            .collect();
        assert_eq!(names, vec![vec!["A"], vec!["B"], vec!["C"]]);
    }

    #[test]
    fn cycles_fail_at_validation() {
        let mut registry = PluginRegistry::new();
        registry.register(noop("A", Phase::Analysis, &["B"])).unwrap();
        registry.register(noop("B", Phase::Analysis, &["A"])).unwrap();

        let err = registry.validate().unwrap_err();
        assert!(matches!(err, OrchestratorError::PluginCycle { .. }));
    }

    #[test]
    fn unknown_dependency_fails_at_validation() {
        let mut registry = PluginRegistry::new();
        registry.register(noop("A", Phase::Analysis, &["Ghost"])).unwrap();
        let err = registry.validate().unwrap_err();
        assert!(matches!(err, OrchestratorError::UnknownDependency { .. }));
    }

    #[test]
    fn cross_phase_dependencies_do_not_constrain_layers() {
        let mut registry = PluginRegistry::new();
        registry.register(noop("Early", Phase::Indexing, &[])).unwrap();
        registry
            .register(noop("Late", Phase::Analysis, &["Early"]))
            .unwrap();

        registry.validate().unwrap();
        let layers = registry.topo_layers(Phase::Analysis).unwrap();
        assert_eq!(layers.len(), 1);
    }

    #[test]
    fn dependency_on_later_phase_is_rejected() {
        let mut registry = PluginRegistry::new();
        registry
            .register(noop("Early", Phase::Indexing, &["Late"]))
            .unwrap();
        registry.register(noop("Late", Phase::Validation, &[])).unwrap();
        let err = registry.validate().unwrap_err();
        assert!(matches!(err, OrchestratorError::LaterPhaseDependency { .. }));
    }

    #[test]
    fn covered_packages_union_all_plugins() {
        let mut registry = PluginRegistry::new();
        registry
            .register(Arc::new(CountingPlugin {
                metadata: PluginMetadata::new("Sqlite3Analyzer", Phase::Analysis)
                    .covers(&["sqlite3"]),
                executions: Arc::new(AtomicUsize::new(0)),
                mutating_runs: 0,
            }))
            .unwrap();
        registry
            .register(Arc::new(CountingPlugin {
                metadata: PluginMetadata::new("ExpressAnalyzer", Phase::Analysis)
                    .covers(&["express", "sqlite3"]),
                executions: Arc::new(AtomicUsize::new(0)),
                mutating_runs: 0,
            }))
            .unwrap();

        let covered = registry.covered_packages();
        assert_eq!(
            covered,
            BTreeSet::from(["express".to_string(), "sqlite3".to_string()])
        );
    }
}

// ── Resources ───────────────────────────────────────────────

mod resources {
    use super::*;

    #[test]
    fn typed_publish_and_get() {
        let registry = ResourceRegistry::new();
        registry.publish("numbers", vec![1u32, 2, 3]);

        let numbers = registry.get::<Vec<u32>>("numbers").unwrap();
        assert_eq!(*numbers, vec![1, 2, 3]);

        // Wrong type and missing key both read as absent.
        assert!(registry.get::<String>("numbers").is_none());
        assert!(registry.get::<Vec<u32>>("missing").is_none());
    }
}

// ── Suggestions ─────────────────────────────────────────────

mod suggest {
    use super::*;
    use std::collections::HashMap;

    fn counts(pairs: &[(&str, usize)]) -> HashMap<String, usize> {
        pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    #[test]
    fn extracts_kind_constants_from_graph_literals_only() {
        let query = r#"node(X, "FUNCTION"), edge(X, Y, "CALLS"), incoming(Y, Z, "USES"), attr(X, "name", "foo")"#;
        assert_eq!(
            queried_node_kinds(query),
            BTreeSet::from(["FUNCTION".to_string()])
        );
        assert_eq!(
            queried_edge_kinds(query),
            BTreeSet::from(["CALLS".to_string(), "USES".to_string()])
        );
    }

    #[test]
    fn typo_within_threshold_gets_a_hint() {
        let hints = did_you_mean(
            r#"node(X, "FUNCTON")"#,
            &counts(&[("FUNCTION", 1000), ("CLASS", 3)]),
            &counts(&[]),
        );
        assert_eq!(hints.len(), 1);
        assert!(hints[0].contains("FUNCTON"));
        assert!(hints[0].contains("FUNCTION"));
    }

    #[test]
    fn case_mismatch_gets_an_exact_case_hint() {
        let hints = did_you_mean(
            r#"node(X, "function")"#,
            &counts(&[("FUNCTION", 10)]),
            &counts(&[]),
        );
        assert_eq!(hints.len(), 1);
        assert!(hints[0].contains("case-sensitive"));
        assert!(hints[0].contains("FUNCTION"));
    }

    #[test]
    fn matching_kinds_and_distant_typos_stay_silent() {
        let node_counts = counts(&[("FUNCTION", 10)]);
        assert!(did_you_mean(r#"node(X, "FUNCTION")"#, &node_counts, &counts(&[])).is_empty());
        assert!(did_you_mean(r#"node(X, "ZZZZZZ")"#, &node_counts, &counts(&[])).is_empty());
    }
}

// ── Coverage helpers ────────────────────────────────────────

mod coverage {
    use super::*;

    #[test]
    fn scoped_packages_keep_scope_and_name() {
        assert_eq!(extract_package("@scope/pkg/deep/path"), "@scope/pkg");
        assert_eq!(extract_package("@scope/pkg"), "@scope/pkg");
        assert_eq!(extract_package("lodash/fp"), "lodash");
        assert_eq!(extract_package("lodash"), "lodash");
        assert_eq!(extract_package("node:fs"), "fs");
    }

    #[test]
    fn platform_builtins_are_known() {
        assert!(is_platform_builtin("fs"));
        assert!(is_platform_builtin("worker_threads"));
        assert!(!is_platform_builtin("lodash"));
    }
}

// ── Config ──────────────────────────────────────────────────

mod config {
    use super::*;

    #[test]
    fn defaults_without_a_file() {
        let dir = tempfile::tempdir().unwrap();
        let config = AnalysisConfig::load(dir.path(), None).unwrap();
        assert!(!config.strict_mode);
        assert_eq!(config.batch_size, 500);
        assert_eq!(config.enrichment_iteration_cap, 10);
        assert!(config.suppress_utility_packages);
    }

    #[test]
    fn file_values_override_defaults() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("trellis.toml"),
            "strict_mode = true\nbatch_size = 32\n",
        )
        .unwrap();
        let config = AnalysisConfig::load(dir.path(), None).unwrap();
        assert!(config.strict_mode);
        assert_eq!(config.batch_size, 32);
        // Untouched keys keep their defaults.
        assert_eq!(config.enrichment_iteration_cap, 10);
    }
}

// ── Strict denylist ─────────────────────────────────────────

#[test]
fn external_globals_are_denylisted() {
    for name in ["console", "Math", "JSON", "Promise"] {
        assert!(is_external_global(name));
    }
    assert!(!is_external_global("unknownObj"));
}

// ── Pipeline ────────────────────────────────────────────────

mod pipeline {
    use super::*;

    #[tokio::test]
    async fn phases_run_in_order_with_visible_writes() {
        let harness = Harness::start().await;
        let log = Arc::new(StdMutex::new(Vec::new()));

        let mut registry = PluginRegistry::new();
        registry
            .register(Arc::new(WriterPlugin {
                metadata: PluginMetadata::new("Validator", Phase::Validation),
                node: Node::source(kinds::FUNCTION, "v", "v.js", 1),
                log: Arc::clone(&log),
            }))
            .unwrap();
        registry
            .register(Arc::new(WriterPlugin {
                metadata: PluginMetadata::new("Discoverer", Phase::Discovery),
                node: Node::source(kinds::MODULE, "app", "app.js", 1),
                log: Arc::clone(&log),
            }))
            .unwrap();
        registry
            .register(Arc::new(WriterPlugin {
                metadata: PluginMetadata::new("Analyzer", Phase::Analysis),
                node: Node::source(kinds::FUNCTION, "foo", "app.js", 3),
                log: Arc::clone(&log),
            }))
            .unwrap();

        let orchestrator = Orchestrator::new(registry, quiet_config());
        let report = orchestrator
            .run(harness.client().await)
            .await
            .unwrap();

        // Registration order does not matter; phase order does.
        assert_eq!(
            *log.lock().unwrap(),
            vec!["Discoverer", "Analyzer", "Validator"]
        );
        assert_eq!(report.nodes_created, 3);

        let mut client = harness.client().await;
        assert_eq!(client.find_by_type(kinds::FUNCTION).await.unwrap().len(), 2);
        assert_eq!(client.find_by_type(kinds::MODULE).await.unwrap().len(), 1);

        harness.stop().await;
    }

    #[tokio::test]
    async fn strict_mode_stops_before_validation() {
        let harness = Harness::start().await;
        let log = Arc::new(StdMutex::new(Vec::new()));

        let mut registry = PluginRegistry::new();
        registry
            .register(Arc::new(StrictOffender {
                metadata: PluginMetadata::new("MethodCallResolver", Phase::Enrichment),
            }))
            .unwrap();
        registry
            .register(Arc::new(WriterPlugin {
                metadata: PluginMetadata::new("Validator", Phase::Validation),
                node: Node::source(kinds::FUNCTION, "v", "v.js", 1),
                log: Arc::clone(&log),
            }))
            .unwrap();

        let config = AnalysisConfig {
            strict_mode: true,
            ..quiet_config()
        };
        let orchestrator = Orchestrator::new(registry, config);
        let collector = orchestrator.collector();
        let err = orchestrator.run(harness.client().await).await.unwrap_err();

        assert!(matches!(err, OrchestratorError::StrictMode(1)));
        assert!(log.lock().unwrap().is_empty(), "validation must not run");
        let fatal = collector.fatal_in_phase(Phase::Enrichment.name());
        assert_eq!(fatal.len(), 1);
        assert_eq!(fatal[0].code, codes::STRICT_UNRESOLVED_METHOD);
        assert_eq!(fatal[0].file.as_deref(), Some("app.js"));
        assert_eq!(fatal[0].line, Some(12));

        harness.stop().await;
    }

    #[tokio::test]
    async fn non_strict_runs_tolerate_strict_diagnostics() {
        let harness = Harness::start().await;

        let mut registry = PluginRegistry::new();
        registry
            .register(Arc::new(StrictOffender {
                metadata: PluginMetadata::new("MethodCallResolver", Phase::Enrichment),
            }))
            .unwrap();

        let orchestrator = Orchestrator::new(registry, quiet_config());
        // Same input, strict_mode=false: never a strict-mode error.
        orchestrator.run(harness.client().await).await.unwrap();

        harness.stop().await;
    }

    #[tokio::test]
    async fn enrichment_requeues_dependents_of_mutating_plugins() {
        let harness = Harness::start().await;
        let upstream_runs = Arc::new(AtomicUsize::new(0));
        let downstream_runs = Arc::new(AtomicUsize::new(0));

        let mut registry = PluginRegistry::new();
        registry
            .register(Arc::new(CountingPlugin {
                metadata: PluginMetadata::new("AliasTracker", Phase::Enrichment),
                executions: Arc::clone(&upstream_runs),
                mutating_runs: 1,
            }))
            .unwrap();
        registry
            .register(Arc::new(CountingPlugin {
                metadata: PluginMetadata::new("CallResolver", Phase::Enrichment)
                    .dependencies(&["AliasTracker"]),
                executions: Arc::clone(&downstream_runs),
                mutating_runs: 0,
            }))
            .unwrap();

        let orchestrator = Orchestrator::new(registry, quiet_config());
        orchestrator.run(harness.client().await).await.unwrap();

        assert_eq!(upstream_runs.load(Ordering::SeqCst), 1);
        // Initial pass plus one re-queue triggered by AliasTracker's
        // mutation; the second pass mutates nothing, so the loop settles.
        assert_eq!(downstream_runs.load(Ordering::SeqCst), 2);

        harness.stop().await;
    }

    #[tokio::test]
    async fn enrichment_that_never_settles_overruns() {
        let harness = Harness::start().await;

        // A chain of always-mutating plugins keeps re-queueing its tail
        // one link per iteration, which is longer than the cap allows.
        let mut registry = PluginRegistry::new();
        let chain = ["Stage0", "Stage1", "Stage2", "Stage3", "Stage4"];
        for (i, name) in chain.iter().enumerate() {
            let metadata = if i == 0 {
                PluginMetadata::new(name, Phase::Enrichment)
            } else {
                PluginMetadata::new(name, Phase::Enrichment).dependencies(&[chain[i - 1]])
            };
            registry
                .register(Arc::new(CountingPlugin {
                    metadata,
                    executions: Arc::new(AtomicUsize::new(0)),
                    mutating_runs: usize::MAX,
                }))
                .unwrap();
        }

        let orchestrator = Orchestrator::new(registry, quiet_config());
        let err = orchestrator.run(harness.client().await).await.unwrap_err();
        assert!(matches!(err, OrchestratorError::EnrichmentOverrun(3)));

        harness.stop().await;
    }

    #[tokio::test]
    async fn issues_materialize_as_nodes_with_affects_edges() {
        let harness = Harness::start().await;
        let target = Node::source(kinds::FUNCTION, "foo", "app.js", 1);

        struct IssueReporter {
            metadata: PluginMetadata,
            target: Node,
        }

        #[async_trait]
        impl Plugin for IssueReporter {
            fn metadata(&self) -> &PluginMetadata {
                &self.metadata
            }

            async fn execute(&self, ctx: &PluginContext) -> anyhow::Result<PluginResult> {
                ctx.graph().buffer_node(self.target.clone()).await?;
                ctx.report_issue(
                    IssueSpec::new("policy", Severity::Warning, "foo does something untoward")
                        .target(self.target.id.clone())
                        .suggestion("stop doing that"),
                );
                Ok(PluginResult::default())
            }
        }

        let mut registry = PluginRegistry::new();
        registry
            .register(Arc::new(IssueReporter {
                metadata: PluginMetadata::new("PolicyChecker", Phase::Validation),
                target: target.clone(),
            }))
            .unwrap();

        let orchestrator = Orchestrator::new(registry, quiet_config());
        let report = orchestrator.run(harness.client().await).await.unwrap();
        assert_eq!(report.issues_created, 1);

        let mut client = harness.client().await;
        let issues = client.find_by_type(kinds::ISSUE).await.unwrap();
        assert_eq!(issues.len(), 1);
        assert_eq!(
            issues[0].attrs.get("category").and_then(|v| v.as_str()),
            Some("policy")
        );
        let affects = client
            .outgoing_edges(&issues[0].id, Some(vec![kinds::AFFECTS.to_string()]))
            .await
            .unwrap();
        assert_eq!(affects.len(), 1);
        assert_eq!(affects[0].dst, target.id);

        harness.stop().await;
    }

    #[tokio::test]
    async fn coverage_validator_flags_only_uncovered_real_packages() {
        let harness = Harness::start().await;

        // Seed IMPORT nodes the way an import analyzer would.
        let mut client = harness.client().await;
        for (name, source, line) in [
            ("lodash", "lodash", 1),
            ("sqlite3", "sqlite3", 2),
            ("fs", "fs", 3),
            ("helper", "./helper", 4),
        ] {
            client
                .add_node(
                    Node::source(kinds::IMPORT, name, "app.js", line).with_attr("source", source),
                )
                .await
                .unwrap();
        }
        client.flush().await.unwrap();

        let mut registry = PluginRegistry::new();
        registry
            .register(Arc::new(CountingPlugin {
                metadata: PluginMetadata::new("Sqlite3Analyzer", Phase::Analysis)
                    .covers(&["sqlite3"]),
                executions: Arc::new(AtomicUsize::new(0)),
                mutating_runs: 0,
            }))
            .unwrap();
        registry.register(Arc::new(CoverageValidator::new())).unwrap();

        let orchestrator = Orchestrator::new(registry, quiet_config());
        let report = orchestrator.run(harness.client().await).await.unwrap();
        assert_eq!(report.issues_created, 1);

        let mut client = harness.client().await;
        let issues = client.find_by_type(kinds::ISSUE).await.unwrap();
        assert_eq!(issues.len(), 1);
        let message = issues[0]
            .attrs
            .get("message")
            .and_then(|v| v.as_str())
            .unwrap();
        assert!(message.contains("lodash"));
        assert!(!message.contains("sqlite3"));

        harness.stop().await;
    }
}
