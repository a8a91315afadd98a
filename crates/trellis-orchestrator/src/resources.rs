//! Run-scoped typed key-value registry for inter-plugin data
//!
//! Written in one plugin, read in a later-scheduled one. Read-mostly
//! after DISCOVERY.

use std::any::Any;
use std::sync::Arc;

use dashmap::DashMap;

/// Well-known resource keys.
pub mod keys {
    /// `BTreeSet<String>`: union of all loaded plugins' `covers` lists.
    pub const COVERED_PACKAGES: &str = "plugins.covered_packages";
    /// `SymbolIndex`: function/class symbols per file, built in INDEXING.
    pub const SYMBOL_INDEX: &str = "analysis.symbol_index";
    /// `ParsedSources`: per-file parse results, built in DISCOVERY.
    pub const PARSED_SOURCES: &str = "analysis.parsed_sources";
}

#[derive(Default)]
pub struct ResourceRegistry {
    entries: DashMap<String, Arc<dyn Any + Send + Sync>>,
}

impl ResourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn publish<T: Any + Send + Sync>(&self, key: &str, value: T) {
        self.entries.insert(key.to_string(), Arc::new(value));
    }

    /// Typed lookup. `None` when absent or of a different type; plugins
    /// with optional inputs tolerate that and produce an empty result.
    pub fn get<T: Any + Send + Sync>(&self, key: &str) -> Option<Arc<T>> {
        self.entries
            .get(key)
            .and_then(|entry| Arc::clone(entry.value()).downcast::<T>().ok())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn keys(&self) -> Vec<String> {
        self.entries.iter().map(|e| e.key().clone()).collect()
    }
}
