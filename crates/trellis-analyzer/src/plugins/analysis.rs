//! ANALYSIS: materialise structure and import nodes
//!
//! Nodes are buffered before the edges that mention them, in the same
//! plugin, so containment never dangles.

use async_trait::async_trait;

use trellis_core::{kinds, Edge, Node, NodeId};
use trellis_orchestrator::coverage::extract_package;
use trellis_orchestrator::{keys, Phase, Plugin, PluginContext, PluginMetadata, PluginResult};

use crate::facts::{module_node_id, FileFacts, ParsedSources, SymbolIndex};

/// Functions, classes, variables, call sites and their containment.
pub struct StructureAnalyzer {
    metadata: PluginMetadata,
}

impl StructureAnalyzer {
    pub fn new() -> Self {
        StructureAnalyzer {
            metadata: PluginMetadata::new("StructureAnalyzer", Phase::Analysis)
                .dependencies(&["SymbolIndexer"])
                .creates(&[
                    kinds::FUNCTION,
                    kinds::CLASS,
                    kinds::VARIABLE,
                    kinds::CALL,
                    kinds::CONSTRUCTOR_CALL,
                    kinds::CONTAINS,
                    kinds::EXTENDS,
                ]),
        }
    }
}

impl Default for StructureAnalyzer {
    fn default() -> Self {
        Self::new()
    }
}

/// The node a call site is contained in: the enclosing function, or the
/// module for top-level code.
fn call_container(file: &FileFacts, call: &crate::facts::CallFact) -> NodeId {
    match &call.caller {
        Some(name) => NodeId::derive(kinds::FUNCTION, name, &file.path, call.caller_line),
        None => module_node_id(&file.path),
    }
}

#[async_trait]
impl Plugin for StructureAnalyzer {
    fn metadata(&self) -> &PluginMetadata {
        &self.metadata
    }

    async fn execute(&self, ctx: &PluginContext) -> anyhow::Result<PluginResult> {
        let Some(parsed) = ctx.resources.get::<ParsedSources>(keys::PARSED_SOURCES) else {
            return Ok(PluginResult::default().summary("no sources"));
        };
        let symbols = ctx
            .resources
            .get::<SymbolIndex>(keys::SYMBOL_INDEX)
            .unwrap_or_default();

        let mut result = PluginResult::default();
        for file in parsed.iter() {
            let module_id = module_node_id(&file.path);

            for class in &file.classes {
                let class_id = class.node_id(&file.path);
                let node = Node::source(kinds::CLASS, &class.name, &file.path, class.line);
                ctx.graph().buffer_node(node).await?;
                ctx.graph()
                    .buffer_edge(Edge::new(
                        module_id.clone(),
                        class_id.clone(),
                        kinds::CONTAINS,
                    ))
                    .await?;
                result.nodes_created += 1;
                result.edges_created += 1;

                if let Some(superclass) = &class.extends {
                    if let Some(target) = symbols.resolve_class(superclass, &file.path) {
                        ctx.graph()
                            .buffer_edge(Edge::new(
                                class_id.clone(),
                                target.node_id(kinds::CLASS),
                                kinds::EXTENDS,
                            ))
                            .await?;
                        result.edges_created += 1;
                    } else if let Some(package) = symbols.import_source(&file.path, superclass) {
                        let package = extract_package(package);
                        let external = ctx.graph().ensure_external_module(&package).await?;
                        ctx.graph()
                            .buffer_edge(Edge::new(class_id.clone(), external, kinds::EXTENDS))
                            .await?;
                        result.nodes_created += 1;
                        result.edges_created += 1;
                    }
                }
            }

            for function in &file.functions {
                let function_id = function.node_id(&file.path);
                let mut node =
                    Node::source(kinds::FUNCTION, &function.name, &file.path, function.line)
                        .with_column(function.column);
                if let Some(class) = &function.class {
                    node = node.with_attr("class", class.as_str());
                }
                ctx.graph().buffer_node(node).await?;

                let container = match &function.class {
                    Some(class) => symbols
                        .resolve_class(class, &file.path)
                        .map(|c| c.node_id(kinds::CLASS))
                        .unwrap_or_else(|| module_id.clone()),
                    None => module_id.clone(),
                };
                ctx.graph()
                    .buffer_edge(Edge::new(container, function_id, kinds::CONTAINS))
                    .await?;
                result.nodes_created += 1;
                result.edges_created += 1;
            }

            for variable in &file.variables {
                let node =
                    Node::source(kinds::VARIABLE, &variable.name, &file.path, variable.line);
                ctx.graph().buffer_node(node).await?;
                ctx.graph()
                    .buffer_edge(Edge::new(
                        module_id.clone(),
                        variable.node_id(&file.path),
                        kinds::CONTAINS,
                    ))
                    .await?;
                result.nodes_created += 1;
                result.edges_created += 1;
            }

            for call in &file.calls {
                let kind = if call.constructor {
                    kinds::CONSTRUCTOR_CALL
                } else {
                    kinds::CALL
                };
                let mut node =
                    Node::source(kind, &call.qualified_callee(), &file.path, call.line)
                        .with_column(call.column)
                        .with_attr("callee", call.callee.as_str());
                if let Some(receiver) = &call.receiver {
                    node = node.with_attr("receiver", receiver.as_str());
                }
                ctx.graph().buffer_node(node).await?;
                ctx.graph()
                    .buffer_edge(Edge::new(
                        call_container(file, call),
                        call.node_id(&file.path),
                        kinds::CONTAINS,
                    ))
                    .await?;
                result.nodes_created += 1;
                result.edges_created += 1;
            }
        }

        Ok(result.summary("structure analysed"))
    }
}

/// One IMPORT node per import statement.
pub struct ImportAnalyzer {
    metadata: PluginMetadata,
}

impl ImportAnalyzer {
    pub fn new() -> Self {
        ImportAnalyzer {
            metadata: PluginMetadata::new("ImportAnalyzer", Phase::Analysis)
                .dependencies(&["SymbolIndexer"])
                .creates(&[kinds::IMPORT, kinds::CONTAINS]),
        }
    }
}

impl Default for ImportAnalyzer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Plugin for ImportAnalyzer {
    fn metadata(&self) -> &PluginMetadata {
        &self.metadata
    }

    async fn execute(&self, ctx: &PluginContext) -> anyhow::Result<PluginResult> {
        let Some(parsed) = ctx.resources.get::<ParsedSources>(keys::PARSED_SOURCES) else {
            return Ok(PluginResult::default().summary("no sources"));
        };

        let mut result = PluginResult::default();
        for file in parsed.iter() {
            let module_id = module_node_id(&file.path);
            for import in &file.imports {
                let node =
                    Node::source(kinds::IMPORT, &import.source, &file.path, import.line)
                        .with_attr("source", import.source.as_str())
                        .with_attr("names", import.names.join(","));
                ctx.graph().buffer_node(node).await?;
                ctx.graph()
                    .buffer_edge(Edge::new(
                        module_id.clone(),
                        import.node_id(&file.path),
                        kinds::CONTAINS,
                    ))
                    .await?;
                result.nodes_created += 1;
                result.edges_created += 1;
            }
        }

        Ok(result.summary("imports analysed"))
    }
}
