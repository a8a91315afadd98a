//! End-to-end pipeline scenarios
//!
//! Each test writes a small JavaScript project into a temp dir, runs the
//! full pipeline against an embedded server, and checks the graph through
//! the same wire protocol any client would use.

use std::path::PathBuf;
use std::sync::atomic::AtomicUsize;
use std::sync::Arc;

use async_trait::async_trait;

use trellis_analyzer::register_default_plugins;
use trellis_core::{codes, kinds, DiagnosticCollector, GraphStore};
use trellis_orchestrator::{
    suggest, AnalysisConfig, Orchestrator, OrchestratorError, Phase, Plugin, PluginContext,
    PluginMetadata, PluginRegistry, PluginResult, RunReport,
};
use trellis_server::{GraphClient, GraphServer, ServerConfig, ShutdownHandle};

struct Project {
    dir: tempfile::TempDir,
    socket: PathBuf,
    shutdown: Option<ShutdownHandle>,
    server: Option<tokio::task::JoinHandle<()>>,
}

impl Project {
    fn new(files: &[(&str, &str)]) -> Self {
        let dir = tempfile::tempdir().unwrap();
        for (name, contents) in files {
            let path = dir.path().join(name);
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent).unwrap();
            }
            std::fs::write(path, contents).unwrap();
        }
        let socket = dir.path().join("server.sock");
        Project {
            dir,
            socket,
            shutdown: None,
            server: None,
        }
    }

    async fn start_server(&mut self) {
        let server = GraphServer::new(
            GraphStore::in_memory(),
            ServerConfig {
                socket_path: self.socket.clone(),
            },
        );
        self.shutdown = Some(server.shutdown_handle());
        self.server = Some(tokio::spawn(async move {
            server.run().await.unwrap();
        }));
        for _ in 0..100 {
            if self.socket.exists() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
    }

    /// Run the default plugin set (plus extras) and keep the server up
    /// for follow-up queries.
    async fn analyze_with(
        &mut self,
        config: AnalysisConfig,
        extra: Vec<Arc<dyn Plugin>>,
    ) -> (
        Result<RunReport, OrchestratorError>,
        Arc<DiagnosticCollector>,
    ) {
        self.start_server().await;
        let client = GraphClient::connect(&self.socket).await.unwrap();

        let mut registry = PluginRegistry::new();
        register_default_plugins(&mut registry, self.dir.path()).unwrap();
        for plugin in extra {
            registry.register(plugin).unwrap();
        }

        let orchestrator = Orchestrator::new(registry, config);
        let collector = orchestrator.collector();
        let outcome = orchestrator.run(client).await;
        (outcome, collector)
    }

    async fn analyze(
        &mut self,
        strict: bool,
    ) -> (
        Result<RunReport, OrchestratorError>,
        Arc<DiagnosticCollector>,
    ) {
        let config = AnalysisConfig {
            strict_mode: strict,
            workers: 2,
            ..Default::default()
        };
        self.analyze_with(config, Vec::new()).await
    }

    async fn client(&self) -> GraphClient {
        GraphClient::connect(&self.socket).await.unwrap()
    }

    async fn stop(mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            shutdown.shutdown();
        }
        if let Some(server) = self.server.take() {
            server.await.unwrap();
        }
    }
}

/// Declares coverage of a package without doing any work.
struct PackageAnalyzer {
    metadata: PluginMetadata,
}

impl PackageAnalyzer {
    fn covering(name: &str, package: &str) -> Arc<dyn Plugin> {
        Arc::new(PackageAnalyzer {
            metadata: PluginMetadata::new(name, Phase::Analysis).covers(&[package]),
        })
    }
}

#[async_trait]
impl Plugin for PackageAnalyzer {
    fn metadata(&self) -> &PluginMetadata {
        &self.metadata
    }

    async fn execute(&self, _ctx: &PluginContext) -> anyhow::Result<PluginResult> {
        Ok(PluginResult::default())
    }
}

const CALL_GRAPH_JS: &str = "function foo() {\n    bar();\n}\n\nfunction bar() {\n    return 1;\n}\n";

#[tokio::test]
async fn basic_call_graph() {
    let mut project = Project::new(&[("app.js", CALL_GRAPH_JS)]);
    let (outcome, _) = project.analyze(false).await;
    outcome.unwrap();

    let mut client = project.client().await;
    let functions = client
        .datalog_query("node(X, \"FUNCTION\")", false)
        .await
        .unwrap();
    assert_eq!(functions.rows.len(), 2);

    let calls = client
        .datalog_query("edge(X, Y, \"CALLS\")", false)
        .await
        .unwrap();
    assert_eq!(calls.rows.len(), 1);
    assert_eq!(calls.rows[0]["X"], "FUNCTION:foo@app.js:1");
    assert_eq!(calls.rows[0]["Y"], "FUNCTION:bar@app.js:5");

    project.stop().await;
}

#[tokio::test]
async fn rerunning_unchanged_source_is_deterministic() {
    let files = [("app.js", CALL_GRAPH_JS)];

    let mut first = Project::new(&files);
    let (outcome, _) = first.analyze(false).await;
    outcome.unwrap();
    let mut client = first.client().await;
    let first_nodes = client.count_nodes_by_type().await.unwrap();
    let first_edges = client.count_edges_by_type().await.unwrap();
    let mut first_ids: Vec<String> = client
        .find_by_type(kinds::FUNCTION)
        .await
        .unwrap()
        .into_iter()
        .map(|n| n.id.0)
        .collect();
    first_ids.sort();
    first.stop().await;

    let mut second = Project::new(&files);
    let (outcome, _) = second.analyze(false).await;
    outcome.unwrap();
    let mut client = second.client().await;
    assert_eq!(client.count_nodes_by_type().await.unwrap(), first_nodes);
    assert_eq!(client.count_edges_by_type().await.unwrap(), first_edges);
    let mut second_ids: Vec<String> = client
        .find_by_type(kinds::FUNCTION)
        .await
        .unwrap()
        .into_iter()
        .map(|n| n.id.0)
        .collect();
    second_ids.sort();
    assert_eq!(first_ids, second_ids);
    second.stop().await;
}

#[tokio::test]
async fn strict_mode_fails_on_unresolved_method() {
    let mut project = Project::new(&[("app.js", "unknownObj.doSomething();\n")]);
    let (outcome, collector) = project.analyze(true).await;

    match outcome {
        Err(OrchestratorError::StrictMode(count)) => assert_eq!(count, 1),
        other => panic!("expected strict-mode failure, got {other:?}"),
    }

    let fatal = collector.fatal_in_phase(Phase::Enrichment.name());
    assert_eq!(fatal.len(), 1);
    assert_eq!(fatal[0].code, codes::STRICT_UNRESOLVED_METHOD);
    assert_eq!(fatal[0].file.as_deref(), Some("app.js"));
    assert_eq!(fatal[0].line, Some(1));
    assert!(fatal[0].suggestion.is_some());

    // VALIDATION never ran: no issues were materialised.
    let mut client = project.client().await;
    assert!(client.find_by_type(kinds::ISSUE).await.unwrap().is_empty());

    project.stop().await;
}

#[tokio::test]
async fn external_globals_do_not_trip_strict_mode() {
    let mut project = Project::new(&[("app.js", "console.log(\"hi\");\n")]);
    let (outcome, collector) = project.analyze(true).await;

    outcome.unwrap();
    assert!(collector
        .fatal_in_phase(Phase::Enrichment.name())
        .is_empty());

    project.stop().await;
}

#[tokio::test]
async fn explain_is_an_observer_not_a_participant() {
    let mut project = Project::new(&[("app.js", CALL_GRAPH_JS)]);
    let (outcome, _) = project.analyze(false).await;
    outcome.unwrap();

    let mut client = project.client().await;
    let query = "node(X, \"FUNCTION\"), attr(X, \"name\", \"foo\")";
    let plain = client.execute_datalog(query, false).await.unwrap();
    let explained = client.execute_datalog(query, true).await.unwrap();

    assert_eq!(plain.rows, explained.rows);
    assert_eq!(explained.rows.len(), 1);
    assert!(plain.explain.is_none());

    let payload = explained.explain.unwrap();
    assert!(payload.stats.nodes_visited > 0);
    assert!(payload.profile.total_duration_us > 0);
    assert!(payload.steps.len() >= 2);

    project.stop().await;
}

#[tokio::test]
async fn unknown_kind_gets_a_suggestion() {
    let mut project = Project::new(&[("app.js", CALL_GRAPH_JS)]);
    let (outcome, _) = project.analyze(false).await;
    outcome.unwrap();

    let mut client = project.client().await;
    let results = client
        .datalog_query("node(X, \"FUNCTON\")", false)
        .await
        .unwrap();
    assert!(results.rows.is_empty());

    // The querying surface synthesises the hint from the counts.
    let node_counts = client.count_nodes_by_type().await.unwrap();
    let edge_counts = client.count_edges_by_type().await.unwrap();
    let hints = suggest::did_you_mean("node(X, \"FUNCTON\")", &node_counts, &edge_counts);
    assert_eq!(hints.len(), 1);
    assert!(hints[0].contains("FUNCTION"));

    project.stop().await;
}

#[tokio::test]
async fn coverage_gap_produces_exactly_one_issue() {
    let source = "import _ from 'lodash';\nimport sqlite3 from 'sqlite3';\nimport fs from 'fs';\n";
    let mut project = Project::new(&[("app.js", source)]);
    let config = AnalysisConfig {
        workers: 2,
        ..Default::default()
    };
    let (outcome, _) = project
        .analyze_with(
            config,
            vec![PackageAnalyzer::covering("Sqlite3Analyzer", "sqlite3")],
        )
        .await;
    let report = outcome.unwrap();
    assert_eq!(report.issues_created, 1);

    let mut client = project.client().await;
    let issues = client.find_by_type(kinds::ISSUE).await.unwrap();
    assert_eq!(issues.len(), 1);
    let issue = &issues[0];
    assert_eq!(
        issue.attrs.get("category").and_then(|v| v.as_str()),
        Some("coverage")
    );
    assert_eq!(
        issue.attrs.get("severity").and_then(|v| v.as_str()),
        Some("warning")
    );
    let message = issue.attrs.get("message").and_then(|v| v.as_str()).unwrap();
    assert!(message.contains("lodash"));
    assert!(!message.contains("sqlite3"));
    assert!(!message.contains("'fs'"));

    project.stop().await;
}

#[tokio::test]
async fn imports_resolve_to_modules_and_placeholders() {
    let mut project = Project::new(&[
        (
            "app.js",
            "import { helper } from './lib/helper';\nimport _ from 'lodash';\nhelper();\n",
        ),
        ("lib/helper.js", "export function helper() {}\n"),
    ]);
    let (outcome, _) = project.analyze(false).await;
    outcome.unwrap();

    let mut client = project.client().await;

    // Relative import resolved to the module, package import to a
    // placeholder.
    let imports = client
        .datalog_query("edge(X, Y, \"IMPORTS_FROM\")", false)
        .await
        .unwrap();
    let targets: Vec<&str> = imports.rows.iter().map(|r| r["Y"].as_str()).collect();
    assert!(targets.contains(&"MODULE:helper@lib/helper.js:1"));
    assert!(targets.contains(&"EXTERNAL_MODULE:lodash"));

    // The placeholder node carries no source location.
    let external = client
        .get_node(&"EXTERNAL_MODULE:lodash".into())
        .await
        .unwrap()
        .unwrap();
    assert!(external.file.is_none());

    // The cross-module call resolved to the helper function.
    let calls = client
        .datalog_query("edge(X, Y, \"CALLS\")", false)
        .await
        .unwrap();
    assert_eq!(calls.rows.len(), 1);
    assert_eq!(calls.rows[0]["Y"], "FUNCTION:helper@lib/helper.js:1");

    project.stop().await;
}

#[tokio::test]
async fn broken_relative_import_is_fatal_under_strict_mode() {
    let mut project = Project::new(&[("app.js", "import { x } from './missing';\n")]);
    let (outcome, collector) = project.analyze(true).await;

    assert!(matches!(outcome, Err(OrchestratorError::StrictMode(_))));
    let fatal = collector.fatal_in_phase(Phase::Enrichment.name());
    assert_eq!(fatal.len(), 1);
    assert_eq!(fatal[0].code, codes::STRICT_BROKEN_IMPORT);

    project.stop().await;
}

#[tokio::test]
async fn class_graph_captures_extends_and_methods() {
    let source = r#"class Base {
    greet() {
        return "hi";
    }
}

class Derived extends Base {
}

const b = new Derived();
b.greet();
"#;
    let mut project = Project::new(&[("app.js", source)]);
    let (outcome, _) = project.analyze(false).await;
    outcome.unwrap();

    let mut client = project.client().await;

    let extends = client
        .datalog_query("edge(X, Y, \"EXTENDS\")", false)
        .await
        .unwrap();
    assert_eq!(extends.rows.len(), 1);
    assert_eq!(extends.rows[0]["X"], "CLASS:Derived@app.js:7");
    assert_eq!(extends.rows[0]["Y"], "CLASS:Base@app.js:1");

    // Datalog path/2 sees Derived -> Base through the EXTENDS edge.
    let reachable = client
        .datalog_query("path(\"CLASS:Derived@app.js:7\", X)", false)
        .await
        .unwrap();
    assert!(reachable
        .rows
        .iter()
        .any(|r| r["X"] == "CLASS:Base@app.js:1"));

    project.stop().await;
}

#[tokio::test]
async fn guarantee_violations_become_issues() {
    let mut project = Project::new(&[
        ("app.js", CALL_GRAPH_JS),
        (
            "rules/leaf.dl",
            "% functions that call nothing\nviolation(X) :- node(X, \"FUNCTION\"), \\+ edge(X, _, \"CALLS\").\n",
        ),
    ]);
    let config = AnalysisConfig {
        workers: 2,
        guarantee_rules: vec![PathBuf::from("rules/leaf.dl")],
        ..Default::default()
    };
    let (outcome, _) = project.analyze_with(config, Vec::new()).await;
    let report = outcome.unwrap();
    assert_eq!(report.issues_created, 1);

    let mut client = project.client().await;
    let issues = client.find_by_type(kinds::ISSUE).await.unwrap();
    assert_eq!(issues.len(), 1);
    assert_eq!(
        issues[0].attrs.get("category").and_then(|v| v.as_str()),
        Some("guarantee")
    );
    // bar calls nothing; the issue is anchored to it.
    let affects = client
        .outgoing_edges(&issues[0].id, Some(vec![kinds::AFFECTS.to_string()]))
        .await
        .unwrap();
    assert_eq!(affects.len(), 1);
    assert_eq!(affects[0].dst.as_str(), "FUNCTION:bar@app.js:5");

    project.stop().await;
}

/// Counts how many times VALIDATION actually executes.
struct ValidationProbe {
    metadata: PluginMetadata,
    runs: Arc<AtomicUsize>,
}

#[async_trait]
impl Plugin for ValidationProbe {
    fn metadata(&self) -> &PluginMetadata {
        &self.metadata
    }

    async fn execute(&self, _ctx: &PluginContext) -> anyhow::Result<PluginResult> {
        self.runs.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        Ok(PluginResult::default())
    }
}

#[tokio::test]
async fn strict_failure_skips_validation_plugins() {
    let runs = Arc::new(AtomicUsize::new(0));
    let mut project = Project::new(&[("app.js", "mystery.invoke();\n")]);
    let config = AnalysisConfig {
        strict_mode: true,
        workers: 2,
        ..Default::default()
    };
    let (outcome, _) = project
        .analyze_with(
            config,
            vec![Arc::new(ValidationProbe {
                metadata: PluginMetadata::new("ValidationProbe", Phase::Validation),
                runs: Arc::clone(&runs),
            })],
        )
        .await;

    assert!(matches!(outcome, Err(OrchestratorError::StrictMode(_))));
    assert_eq!(runs.load(std::sync::atomic::Ordering::SeqCst), 0);

    project.stop().await;
}
