//! Plugin registry: ordered registration and per-phase scheduling

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use crate::error::{OrchestratorError, Result};
use crate::plugin::{Phase, Plugin};

/// Heterogeneous ordered collection of plugins, keyed by name.
#[derive(Default)]
pub struct PluginRegistry {
    plugins: Vec<Arc<dyn Plugin>>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, plugin: Arc<dyn Plugin>) -> Result<()> {
        let name = plugin.metadata().name.clone();
        if self.plugins.iter().any(|p| p.metadata().name == name) {
            return Err(OrchestratorError::DuplicatePlugin(name));
        }
        if let Some(message) = &plugin.metadata().deprecated {
            tracing::info!(plugin = %name, "deprecated: {message}");
        }
        self.plugins.push(plugin);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.plugins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn Plugin>> {
        self.plugins.iter()
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn Plugin>> {
        self.plugins.iter().find(|p| p.metadata().name == name)
    }

    /// Union of all `covers` declarations, for coverage validation.
    pub fn covered_packages(&self) -> BTreeSet<String> {
        self.plugins
            .iter()
            .flat_map(|p| p.metadata().covers.iter().cloned())
            .collect()
    }

    pub fn in_phase(&self, phase: Phase) -> Vec<Arc<dyn Plugin>> {
        self.plugins
            .iter()
            .filter(|p| p.metadata().phase == phase)
            .cloned()
            .collect()
    }

    /// Validate every phase's dependency graph up front, so a cycle or a
    /// dangling dependency fails at startup rather than mid-run.
    pub fn validate(&self) -> Result<()> {
        let phase_of: HashMap<&str, Phase> = self
            .plugins
            .iter()
            .map(|p| (p.metadata().name.as_str(), p.metadata().phase))
            .collect();

        for plugin in &self.plugins {
            let meta = plugin.metadata();
            for dependency in &meta.dependencies {
                match phase_of.get(dependency.as_str()) {
                    None => {
                        return Err(OrchestratorError::UnknownDependency {
                            plugin: meta.name.clone(),
                            dependency: dependency.clone(),
                        });
                    }
                    Some(dep_phase) if *dep_phase > meta.phase => {
                        return Err(OrchestratorError::LaterPhaseDependency {
                            plugin: meta.name.clone(),
                            dependency: dependency.clone(),
                        });
                    }
                    Some(_) => {}
                }
            }
        }

        for phase in Phase::ALL {
            self.topo_layers(phase)?;
        }
        Ok(())
    }

    /// Topologically sorted layers for one phase: plugins within a layer
    /// are mutually independent and may run concurrently. Dependencies
    /// satisfied by earlier phases do not constrain ordering here.
    pub fn topo_layers(&self, phase: Phase) -> Result<Vec<Vec<Arc<dyn Plugin>>>> {
        let members = self.in_phase(phase);
        let names: HashSet<&str> = members.iter().map(|p| p.metadata().name.as_str()).collect();

        let mut remaining: Vec<Arc<dyn Plugin>> = members.clone();
        let mut done: HashSet<String> = HashSet::new();
        let mut layers = Vec::new();

        while !remaining.is_empty() {
            let (ready, blocked): (Vec<_>, Vec<_>) = remaining.into_iter().partition(|p| {
                p.metadata()
                    .dependencies
                    .iter()
                    .all(|d| !names.contains(d.as_str()) || done.contains(d))
            });

            if ready.is_empty() {
                return Err(OrchestratorError::PluginCycle {
                    phase: phase.name().to_string(),
                    plugins: blocked
                        .iter()
                        .map(|p| p.metadata().name.clone())
                        .collect(),
                });
            }

            for plugin in &ready {
                done.insert(plugin.metadata().name.clone());
            }
            layers.push(ready);
            remaining = blocked;
        }

        Ok(layers)
    }
}
