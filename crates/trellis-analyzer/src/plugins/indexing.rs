//! INDEXING: build the cross-file symbol index

use async_trait::async_trait;

use trellis_orchestrator::{keys, Phase, Plugin, PluginContext, PluginMetadata, PluginResult};

use crate::facts::{ParsedSources, SymbolIndex, SymbolRef};

pub struct SymbolIndexer {
    metadata: PluginMetadata,
}

impl SymbolIndexer {
    pub fn new() -> Self {
        SymbolIndexer {
            metadata: PluginMetadata::new("SymbolIndexer", Phase::Indexing)
                .dependencies(&["ModuleDiscovery"]),
        }
    }
}

impl Default for SymbolIndexer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Plugin for SymbolIndexer {
    fn metadata(&self) -> &PluginMetadata {
        &self.metadata
    }

    async fn execute(&self, ctx: &PluginContext) -> anyhow::Result<PluginResult> {
        let Some(parsed) = ctx.resources.get::<ParsedSources>(keys::PARSED_SOURCES) else {
            // Nothing discovered; an empty index keeps enrichment happy.
            ctx.resources.publish(keys::SYMBOL_INDEX, SymbolIndex::default());
            return Ok(PluginResult::default().summary("no sources to index"));
        };

        let mut index = SymbolIndex::default();
        for file in parsed.iter() {
            for function in &file.functions {
                index
                    .functions
                    .entry(function.name.clone())
                    .or_default()
                    .push(SymbolRef {
                        path: file.path.clone(),
                        name: function.name.clone(),
                        line: function.line,
                    });
            }
            for class in &file.classes {
                index
                    .classes
                    .entry(class.name.clone())
                    .or_default()
                    .push(SymbolRef {
                        path: file.path.clone(),
                        name: class.name.clone(),
                        line: class.line,
                    });
            }
            for import in &file.imports {
                for name in &import.names {
                    index
                        .imports
                        .insert((file.path.clone(), name.clone()), import.source.clone());
                }
            }
            for variable in &file.variables {
                index
                    .variables
                    .insert((file.path.clone(), variable.name.clone()), variable.line);
            }
        }

        let summary = format!(
            "{} function(s), {} class(es) indexed",
            index.functions.values().map(Vec::len).sum::<usize>(),
            index.classes.values().map(Vec::len).sum::<usize>(),
        );
        ctx.resources.publish(keys::SYMBOL_INDEX, index);
        Ok(PluginResult::default().summary(summary))
    }
}
