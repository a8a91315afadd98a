//! CLI command implementations

use std::path::{Path, PathBuf};

use anyhow::Context;

use trellis_analyzer::register_default_plugins;
use trellis_core::GraphStore;
use trellis_orchestrator::{suggest, AnalysisConfig, Orchestrator, PluginRegistry};
use trellis_server::{GraphClient, GraphServer, ServerConfig, ShutdownHandle};

fn resolve(root: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        root.join(path)
    }
}

/// Spawn an embedded server for the duration of one command.
async fn embedded_server(
    root: &Path,
    config: &AnalysisConfig,
) -> anyhow::Result<(ShutdownHandle, tokio::task::JoinHandle<()>, PathBuf)> {
    let socket = resolve(root, &config.socket_path);
    let db = resolve(root, &config.db_dir);
    let store = GraphStore::open(&db)?;
    let server = GraphServer::new(
        store,
        ServerConfig {
            socket_path: socket.clone(),
        },
    );
    let shutdown = server.shutdown_handle();
    let task = tokio::spawn(async move {
        if let Err(e) = server.run().await {
            tracing::error!(error = %e, "graph server failed");
        }
    });
    for _ in 0..100 {
        if socket.exists() {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    Ok((shutdown, task, socket))
}

pub async fn analyze(
    root: PathBuf,
    strict: bool,
    config_path: Option<PathBuf>,
) -> anyhow::Result<()> {
    let mut config = AnalysisConfig::load(&root, config_path.as_deref())?;
    // The CLI flag wins over the config file.
    if strict {
        config.strict_mode = true;
    }
    let batch_size = config.batch_size;

    tracing::info!(root = %root.display(), strict = config.strict_mode, "analysis starting");

    let (shutdown, server_task, socket) = embedded_server(&root, &config).await?;
    let client = GraphClient::connect(&socket)
        .await
        .context("connecting to embedded graph server")?
        .with_batch_size(batch_size);

    let mut registry = PluginRegistry::new();
    register_default_plugins(&mut registry, &root)?;

    let orchestrator = Orchestrator::new(registry, config);
    let outcome = orchestrator.run(client).await;

    shutdown.shutdown();
    server_task.await.ok();

    match outcome {
        Ok(report) => {
            for run in &report.plugin_runs {
                tracing::info!(
                    phase = %run.phase,
                    plugin = %run.plugin,
                    nodes = run.nodes_created,
                    edges = run.edges_created,
                    "{}",
                    run.summary
                );
            }
            tracing::info!(
                nodes = report.nodes_created,
                edges = report.edges_created,
                issues = report.issues_created,
                "analysis complete"
            );
            Ok(())
        }
        Err(e) => {
            tracing::error!("analysis failed: {e}");
            Err(e.into())
        }
    }
}

pub async fn serve(
    root: PathBuf,
    socket: Option<PathBuf>,
    db: Option<PathBuf>,
) -> anyhow::Result<()> {
    let config = AnalysisConfig::load(&root, None)?;
    let socket = resolve(&root, socket.as_deref().unwrap_or(&config.socket_path));
    let db = resolve(&root, db.as_deref().unwrap_or(&config.db_dir));

    let store = GraphStore::open(&db)?;
    let server = GraphServer::new(
        store,
        ServerConfig {
            socket_path: socket,
        },
    );
    let shutdown = server.shutdown_handle();
    let mut task = tokio::spawn(async move { server.run().await });

    tokio::select! {
        joined = &mut task => joined??,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("shutting down");
            shutdown.shutdown();
            // Let the server drain in-flight requests and flush.
            task.await??;
        }
    }
    Ok(())
}

pub async fn query(
    root: PathBuf,
    source: String,
    explain: bool,
    json: bool,
    socket: Option<PathBuf>,
) -> anyhow::Result<()> {
    let config = AnalysisConfig::load(&root, None)?;
    let socket = resolve(&root, socket.as_deref().unwrap_or(&config.socket_path));

    let mut client = GraphClient::connect(&socket)
        .await
        .context("connecting to graph server (is `trellis serve` running?)")?;
    let outcome = client.execute_datalog(&source, explain).await?;

    // Empty results get a did-you-mean pass over the queried kinds.
    let hints = if outcome.rows.is_empty() {
        let node_counts = client.count_nodes_by_type().await?;
        let edge_counts = client.count_edges_by_type().await?;
        suggest::did_you_mean(&source, &node_counts, &edge_counts)
    } else {
        Vec::new()
    };

    if json {
        // The payload owns stdout; hints and diagnostics go to stderr.
        println!("{}", serde_json::to_string(&outcome.rows)?);
        for hint in &hints {
            eprintln!("hint: {hint}");
        }
    } else {
        if outcome.rows.is_empty() {
            println!("no results");
        }
        for (i, row) in outcome.rows.iter().enumerate() {
            let rendered: Vec<String> =
                row.iter().map(|(var, value)| format!("{var} = {value}")).collect();
            println!("{:>4}. {}", i + 1, rendered.join(", "));
        }
        for hint in &hints {
            println!("hint: {hint}");
        }
    }

    if let Some(payload) = outcome.explain {
        eprintln!("-- explain ({} steps) --", payload.steps.len());
        for step in &payload.steps {
            eprintln!(
                "{:>4}. {}({}) -> {} binding(s) in {}us{}",
                step.step,
                step.predicate,
                step.args.join(", "),
                step.produced,
                step.elapsed_us,
                step.detail
                    .as_deref()
                    .map(|d| format!("  [{d}]"))
                    .unwrap_or_default(),
            );
        }
        eprintln!(
            "rows={} nodes_visited={} edges_traversed={} rules={} total={}us",
            payload.stats.result_rows,
            payload.stats.nodes_visited,
            payload.stats.edges_traversed,
            payload.stats.rule_evaluations,
            payload.profile.total_duration_us,
        );
        for (predicate, micros) in &payload.profile.per_predicate_us {
            eprintln!("  {predicate}: {micros}us");
        }
    }

    Ok(())
}

pub async fn clear(root: PathBuf, socket: Option<PathBuf>) -> anyhow::Result<()> {
    let config = AnalysisConfig::load(&root, None)?;
    let socket = resolve(&root, socket.as_deref().unwrap_or(&config.socket_path));

    if socket.exists() {
        let mut client = GraphClient::connect(&socket).await?;
        client.clear().await?;
        tracing::info!("graph cleared via server");
    } else {
        let db = resolve(&root, &config.db_dir);
        let mut store = GraphStore::open(&db)?;
        store.clear()?;
        tracing::info!("graph cleared on disk");
    }
    Ok(())
}
