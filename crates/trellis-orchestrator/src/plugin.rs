//! The plugin contract
//!
//! A plugin is a unit of analysis with declared metadata and an `execute`
//! entry point. The orchestrator partitions plugins into phases, orders
//! them by declared dependencies, and runs them against a shared context.

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use trellis_core::Diagnostic;

use crate::context::PluginContext;

/// Pipeline phases, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Phase {
    Discovery,
    Indexing,
    Analysis,
    Enrichment,
    Validation,
}

impl Phase {
    pub const ALL: [Phase; 5] = [
        Phase::Discovery,
        Phase::Indexing,
        Phase::Analysis,
        Phase::Enrichment,
        Phase::Validation,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Phase::Discovery => "DISCOVERY",
            Phase::Indexing => "INDEXING",
            Phase::Analysis => "ANALYSIS",
            Phase::Enrichment => "ENRICHMENT",
            Phase::Validation => "VALIDATION",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Static plugin declaration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PluginMetadata {
    /// Unique across the registry.
    pub name: String,
    pub phase: Phase,
    /// Node and edge kinds this plugin may produce.
    pub creates: Vec<String>,
    /// Names of plugins that must have run first.
    pub dependencies: Vec<String>,
    /// External package names this plugin semantically analyses; feeds
    /// coverage validation.
    pub covers: Vec<String>,
    /// Deprecation message, when the plugin is on its way out.
    pub deprecated: Option<String>,
}

impl PluginMetadata {
    pub fn new(name: &str, phase: Phase) -> Self {
        PluginMetadata {
            name: name.to_string(),
            phase,
            creates: Vec::new(),
            dependencies: Vec::new(),
            covers: Vec::new(),
            deprecated: None,
        }
    }

    pub fn creates(mut self, kinds: &[&str]) -> Self {
        self.creates = kinds.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn dependencies(mut self, names: &[&str]) -> Self {
        self.dependencies = names.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn covers(mut self, packages: &[&str]) -> Self {
        self.covers = packages.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn deprecated(mut self, message: &str) -> Self {
        self.deprecated = Some(message.to_string());
        self
    }
}

/// What a plugin reports back after executing.
#[derive(Debug, Clone, Default)]
pub struct PluginResult {
    pub nodes_created: usize,
    pub edges_created: usize,
    pub summary: String,
    pub errors: Vec<Diagnostic>,
}

impl PluginResult {
    pub fn summary(mut self, summary: impl Into<String>) -> Self {
        self.summary = summary.into();
        self
    }

    /// Total graph mutations; drives enrichment re-queueing.
    pub fn mutations(&self) -> usize {
        self.nodes_created + self.edges_created
    }
}

#[async_trait]
pub trait Plugin: Send + Sync {
    fn metadata(&self) -> &PluginMetadata;

    async fn execute(&self, ctx: &PluginContext) -> anyhow::Result<PluginResult>;

    /// Runs once before the plugin's phase starts.
    async fn initialize(&self, _ctx: &PluginContext) -> anyhow::Result<()> {
        Ok(())
    }

    /// Runs after the plugin's phase completes.
    async fn cleanup(&self, _ctx: &PluginContext) -> anyhow::Result<()> {
        Ok(())
    }

    /// Exclusive plugins never run concurrently with their peers.
    fn exclusive(&self) -> bool {
        false
    }
}
