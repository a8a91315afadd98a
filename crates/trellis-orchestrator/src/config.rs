//! Run configuration, loaded from `trellis.toml`
//!
//! CLI flags override file values; a missing file yields defaults.

use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::{Deserialize, Serialize};

pub const CONFIG_FILE: &str = "trellis.toml";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct AnalysisConfig {
    /// Unresolved references in ENRICHMENT become fatal after the phase.
    pub strict_mode: bool,
    /// Worker pool bound; 0 means number of cores.
    pub workers: usize,
    /// Mutations per wire batch. Tuning only, never correctness.
    pub batch_size: usize,
    /// ENRICHMENT re-queue iterations before the run fails.
    pub enrichment_iteration_cap: usize,
    /// Suppress well-known utility packages in coverage validation.
    pub suppress_utility_packages: bool,
    pub socket_path: PathBuf,
    pub db_dir: PathBuf,
    /// Source file globs, relative to the analysis root.
    pub include: Vec<String>,
    /// Datalog guarantee programs checked during VALIDATION, relative to
    /// the analysis root.
    pub guarantee_rules: Vec<PathBuf>,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        AnalysisConfig {
            strict_mode: false,
            workers: 0,
            batch_size: 500,
            enrichment_iteration_cap: 10,
            suppress_utility_packages: true,
            socket_path: PathBuf::from(".trellis/trellis.sock"),
            db_dir: PathBuf::from(".trellis/db"),
            include: vec![
                "**/*.js".to_string(),
                "**/*.mjs".to_string(),
                "**/*.cjs".to_string(),
            ],
            guarantee_rules: Vec::new(),
        }
    }
}

impl AnalysisConfig {
    /// Load from an explicit path, or from `trellis.toml` under `root`
    /// when present, or defaults.
    pub fn load(root: &Path, explicit: Option<&Path>) -> anyhow::Result<Self> {
        let path = match explicit {
            Some(path) => path.to_path_buf(),
            None => {
                let candidate = root.join(CONFIG_FILE);
                if !candidate.exists() {
                    return Ok(Self::default());
                }
                candidate
            }
        };
        let text = std::fs::read_to_string(&path)
            .with_context(|| format!("reading config {}", path.display()))?;
        let config: AnalysisConfig = toml::from_str(&text)
            .with_context(|| format!("parsing config {}", path.display()))?;
        tracing::debug!(path = %path.display(), "loaded config");
        Ok(config)
    }

    pub fn effective_workers(&self) -> usize {
        if self.workers > 0 {
            self.workers
        } else {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4)
        }
    }
}
