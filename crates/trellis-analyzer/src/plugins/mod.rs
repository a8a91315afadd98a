//! Pipeline plugins for the JavaScript front-end

pub mod analysis;
pub mod discovery;
pub mod enrichment;
pub mod indexing;

use std::path::Path;
use std::sync::Arc;

use trellis_orchestrator::{Plugin, PluginRegistry, Result};

pub use analysis::{ImportAnalyzer, StructureAnalyzer};
pub use discovery::ModuleDiscovery;
pub use enrichment::{
    AliasTracker, ArgumentTracker, CallResolver, ImportResolver, MethodCallResolver,
    ALIAS_DEPTH_CAP,
};
pub use indexing::SymbolIndexer;

/// Register the standard JavaScript plugin set for `root`.
pub fn register_default_plugins(registry: &mut PluginRegistry, root: &Path) -> Result<()> {
    let plugins: Vec<Arc<dyn Plugin>> = vec![
        Arc::new(ModuleDiscovery::new(root.to_path_buf())),
        Arc::new(SymbolIndexer::new()),
        Arc::new(StructureAnalyzer::new()),
        Arc::new(ImportAnalyzer::new()),
        Arc::new(CallResolver::new()),
        Arc::new(MethodCallResolver::new()),
        Arc::new(ImportResolver::new()),
        Arc::new(AliasTracker::new()),
        Arc::new(ArgumentTracker::new()),
        Arc::new(trellis_orchestrator::CoverageValidator::new()),
        Arc::new(trellis_orchestrator::GuaranteeValidator::new(
            root.to_path_buf(),
        )),
    ];
    for plugin in plugins {
        registry.register(plugin)?;
    }
    Ok(())
}
