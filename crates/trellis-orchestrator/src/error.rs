//! Orchestrator error taxonomy

use thiserror::Error;

use trellis_server::ClientError;

#[derive(Error, Debug)]
pub enum OrchestratorError {
    #[error("plugin dependency cycle in {phase} involving: {}", plugins.join(", "))]
    PluginCycle {
        phase: String,
        plugins: Vec<String>,
    },

    #[error("plugin '{plugin}' depends on unknown plugin '{dependency}'")]
    UnknownDependency { plugin: String, dependency: String },

    #[error("plugin '{plugin}' depends on '{dependency}' which runs in a later phase")]
    LaterPhaseDependency { plugin: String, dependency: String },

    #[error("duplicate plugin name '{0}'")]
    DuplicatePlugin(String),

    #[error("enrichment did not settle after {0} iterations")]
    EnrichmentOverrun(usize),

    #[error("strict mode: {0} fatal diagnostic(s) after ENRICHMENT")]
    StrictMode(usize),

    #[error("{count} fatal diagnostic(s) in {phase}")]
    FatalDiagnostics { phase: String, count: usize },

    #[error(transparent)]
    Client(#[from] ClientError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, OrchestratorError>;
