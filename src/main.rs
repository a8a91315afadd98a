//! Trellis CLI entry point

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod commands;

#[derive(Parser)]
#[command(name = "trellis")]
#[command(about = "Code-graph analysis platform with Datalog queries", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Analysis root path (defaults to current directory)
    #[arg(short, long, default_value = ".")]
    root: PathBuf,

    /// Request an execution trace for raw queries
    #[arg(long)]
    explain: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the analysis pipeline and populate the graph
    Analyze {
        /// Treat unresolved references in enrichment as fatal
        #[arg(long)]
        strict: bool,

        /// Explicit config file (defaults to <root>/trellis.toml)
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
    /// Run the graph server until interrupted
    Serve {
        /// Socket path override
        #[arg(long)]
        socket: Option<PathBuf>,

        /// Graph database directory override
        #[arg(long)]
        db: Option<PathBuf>,
    },
    /// Execute a raw Datalog query against a running server
    Query {
        /// Rule program or conjunction of literals
        source: String,

        /// Emit results as JSON on stdout (hints go to stderr)
        #[arg(long)]
        json: bool,

        /// Socket path override
        #[arg(long)]
        socket: Option<PathBuf>,
    },
    /// Remove all nodes and edges
    Clear {
        /// Socket path override
        #[arg(long)]
        socket: Option<PathBuf>,
    },
    /// Show version
    Version,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(format!(
            "trellis={log_level}"
        )))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    if cli.explain && !matches!(cli.command, Commands::Query { .. }) {
        tracing::warn!("--explain only applies to raw queries; ignoring");
    }

    match cli.command {
        Commands::Analyze { strict, config } => {
            commands::analyze(cli.root, strict, config).await
        }
        Commands::Serve { socket, db } => commands::serve(cli.root, socket, db).await,
        Commands::Query {
            source,
            json,
            socket,
        } => commands::query(cli.root, source, cli.explain, json, socket).await,
        Commands::Clear { socket } => commands::clear(cli.root, socket).await,
        Commands::Version => {
            println!("trellis v{}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}
