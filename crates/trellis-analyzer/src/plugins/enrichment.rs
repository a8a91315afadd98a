//! ENRICHMENT: resolve references into edges
//!
//! Every resolver follows the same strict-mode contract: an unresolved
//! reference never throws; with strict mode on it becomes a fatal
//! diagnostic with a stable code, a location, and a suggestion, and the
//! orchestrator ends the run at the phase barrier.

use async_trait::async_trait;

use trellis_core::{codes, kinds, Diagnostic, Edge, Node, NodeId};
use trellis_orchestrator::coverage::extract_package;
use trellis_orchestrator::strict::is_external_global;
use trellis_orchestrator::{keys, Phase, Plugin, PluginContext, PluginMetadata, PluginResult};

use crate::facts::{module_node_id, CallFact, FileFacts, ParsedSources, SymbolIndex};

/// How many alias hops are followed before giving up.
pub const ALIAS_DEPTH_CAP: usize = 5;

/// The node making a call: the enclosing function, or the module.
fn caller_id(file: &FileFacts, call: &CallFact) -> NodeId {
    match &call.caller {
        Some(name) => NodeId::derive(kinds::FUNCTION, name, &file.path, call.caller_line),
        None => module_node_id(&file.path),
    }
}

/// A method defined on a class, anywhere in the parsed set.
fn find_method(parsed: &ParsedSources, class: &str, method: &str) -> Option<NodeId> {
    for file in parsed {
        for function in &file.functions {
            if function.name == method && function.class.as_deref() == Some(class) {
                return Some(function.node_id(&file.path));
            }
        }
    }
    None
}

/// Whether `name` is a parameter of the function the call sits in.
fn is_enclosing_param(file: &FileFacts, call: &CallFact, name: &str) -> bool {
    let Some(caller) = &call.caller else {
        return false;
    };
    file.functions
        .iter()
        .find(|f| &f.name == caller && f.line == call.caller_line)
        .is_some_and(|f| f.params.iter().any(|p| p == name))
}

async fn link_call(
    ctx: &PluginContext,
    file: &FileFacts,
    call: &CallFact,
    target: NodeId,
    result: &mut PluginResult,
) -> anyhow::Result<()> {
    let caller = caller_id(file, call);
    ctx.graph()
        .buffer_edge(Edge::new(caller, target.clone(), kinds::CALLS).with_attr("line", call.line))
        .await?;
    // The call site itself keeps a hook to what it resolved to.
    ctx.graph()
        .buffer_edge(Edge::new(call.node_id(&file.path), target, kinds::USES))
        .await?;
    result.edges_created += 2;
    Ok(())
}

// ── CallResolver ────────────────────────────────────────────

/// Plain and constructor calls: `bar()`, `new User()`.
pub struct CallResolver {
    metadata: PluginMetadata,
}

impl CallResolver {
    pub fn new() -> Self {
        CallResolver {
            metadata: PluginMetadata::new("CallResolver", Phase::Enrichment)
                .dependencies(&["StructureAnalyzer"])
                .creates(&[kinds::CALLS, kinds::USES, kinds::EXTERNAL_MODULE]),
        }
    }
}

impl Default for CallResolver {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Plugin for CallResolver {
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
            for call in file.calls.iter().filter(|c| c.receiver.is_none()) {
                if call.constructor {
                    if let Some(class) = symbols.resolve_class(&call.callee, &file.path) {
                        link_call(ctx, file, call, class.node_id(kinds::CLASS), &mut result)
                            .await?;
                        continue;
                    }
                }

                if let Some(function) = symbols.resolve_function(&call.callee, &file.path) {
                    link_call(ctx, file, call, function.node_id(kinds::FUNCTION), &mut result)
                        .await?;
                } else if let Some(source) = symbols.import_source(&file.path, &call.callee) {
                    // Imported binding: the callee lives outside the
                    // analysed source. Never a strict error.
                    let package = extract_package(source);
                    let external = ctx.graph().ensure_external_module(&package).await?;
                    result.nodes_created += 1;
                    link_call(ctx, file, call, external, &mut result).await?;
                } else if ctx.strict_mode {
                    result.errors.push(
                        Diagnostic::strict(
                            codes::STRICT_UNRESOLVED_CALL,
                            &file.path,
                            call.line,
                            format!("cannot resolve call to '{}'", call.callee),
                            format!(
                                "define '{}' in the analysed source or import it from a package",
                                call.callee
                            ),
                        )
                        .with_plugin(&self.metadata.name),
                    );
                }
            }
        }

        Ok(result.summary("calls resolved"))
    }
}

// ── MethodCallResolver ──────────────────────────────────────

/// Method calls: `obj.method()`. Well-known host globals are external
/// by definition and suppressed before any diagnostic is produced.
pub struct MethodCallResolver {
    metadata: PluginMetadata,
}

impl MethodCallResolver {
    pub fn new() -> Self {
        MethodCallResolver {
            metadata: PluginMetadata::new("MethodCallResolver", Phase::Enrichment)
                .dependencies(&["StructureAnalyzer"])
                .creates(&[kinds::CALLS, kinds::USES, kinds::EXTERNAL_MODULE]),
        }
    }
}

impl Default for MethodCallResolver {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Plugin for MethodCallResolver {
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
            for call in &file.calls {
                let Some(receiver) = &call.receiver else {
                    continue;
                };

                if is_external_global(receiver) {
                    continue;
                }
                // Dynamically bound receivers resolve at runtime, not here.
                if receiver == "this" || receiver == "super" {
                    continue;
                }
                // A parameter can hold anything; never a strict signal.
                if is_enclosing_param(file, call, receiver) {
                    continue;
                }

                // Static method on a known class.
                if symbols.resolve_class(receiver, &file.path).is_some() {
                    if let Some(method) = find_method(&parsed, receiver, &call.callee) {
                        link_call(ctx, file, call, method, &mut result).await?;
                        continue;
                    }
                }

                // Imported object: external package.
                if let Some(source) = symbols.import_source(&file.path, receiver) {
                    let package = extract_package(source);
                    let external = ctx.graph().ensure_external_module(&package).await?;
                    result.nodes_created += 1;
                    link_call(ctx, file, call, external, &mut result).await?;
                    continue;
                }

                // Instance method: receiver is a variable constructed
                // from a known class.
                let constructed_class = file
                    .variables
                    .iter()
                    .find(|v| &v.name == receiver)
                    .and_then(|v| v.assigned_from_call.as_ref())
                    .map(|(callee, _)| callee.clone());
                if let Some(class) = constructed_class {
                    if let Some(method) = find_method(&parsed, &class, &call.callee) {
                        link_call(ctx, file, call, method, &mut result).await?;
                        continue;
                    }
                }

                if ctx.strict_mode {
                    result.errors.push(
                        Diagnostic::strict(
                            codes::STRICT_UNRESOLVED_METHOD,
                            &file.path,
                            call.line,
                            format!(
                                "cannot resolve method '{}' on '{receiver}'",
                                call.callee
                            ),
                            format!(
                                "declare '{receiver}' in the analysed source, or cover its \
                                 package with an analysis plugin"
                            ),
                        )
                        .with_plugin(&self.metadata.name),
                    );
                }
            }
        }

        Ok(result.summary("method calls resolved"))
    }
}

// ── ImportResolver ──────────────────────────────────────────

/// Resolve import specifiers to modules or external placeholders.
pub struct ImportResolver {
    metadata: PluginMetadata,
}

impl ImportResolver {
    pub fn new() -> Self {
        ImportResolver {
            metadata: PluginMetadata::new("ImportResolver", Phase::Enrichment)
                .dependencies(&["ImportAnalyzer"])
                .creates(&[kinds::IMPORTS_FROM, kinds::EXTERNAL_MODULE]),
        }
    }
}

impl Default for ImportResolver {
    fn default() -> Self {
        Self::new()
    }
}

/// Normalise `./x` and `../x` against the importing file's directory.
pub fn resolve_relative(from: &str, spec: &str) -> String {
    let mut segments: Vec<&str> = from.split('/').collect();
    segments.pop(); // the file itself
    for part in spec.split('/') {
        match part {
            "." | "" => {}
            ".." => {
                segments.pop();
            }
            other => segments.push(other),
        }
    }
    segments.join("/")
}

#[async_trait]
impl Plugin for ImportResolver {
    fn metadata(&self) -> &PluginMetadata {
        &self.metadata
    }

    async fn execute(&self, ctx: &PluginContext) -> anyhow::Result<PluginResult> {
        let Some(parsed) = ctx.resources.get::<ParsedSources>(keys::PARSED_SOURCES) else {
            return Ok(PluginResult::default().summary("no sources"));
        };
        let known_paths: Vec<&str> = parsed.iter().map(|f| f.path.as_str()).collect();

        let mut result = PluginResult::default();
        for file in parsed.iter() {
            let module_id = module_node_id(&file.path);
            for import in &file.imports {
                if import.source.starts_with('.') || import.source.starts_with('/') {
                    let base = resolve_relative(&file.path, &import.source);
                    let resolved = [base.clone(), format!("{base}.js"), format!("{base}/index.js")]
                        .into_iter()
                        .find(|candidate| known_paths.contains(&candidate.as_str()));

                    match resolved {
                        Some(target) => {
                            ctx.graph()
                                .buffer_edge(Edge::new(
                                    module_id.clone(),
                                    module_node_id(&target),
                                    kinds::IMPORTS_FROM,
                                ))
                                .await?;
                            result.edges_created += 1;
                        }
                        None if ctx.strict_mode => {
                            result.errors.push(
                                Diagnostic::strict(
                                    codes::STRICT_BROKEN_IMPORT,
                                    &file.path,
                                    import.line,
                                    format!("import '{}' resolves to no module", import.source),
                                    "fix the path or add the missing file to the analysis set",
                                )
                                .with_plugin(&self.metadata.name),
                            );
                        }
                        None => {}
                    }
                } else {
                    let package = extract_package(&import.source);
                    let external = ctx.graph().ensure_external_module(&package).await?;
                    ctx.graph()
                        .buffer_edge(Edge::new(module_id.clone(), external, kinds::IMPORTS_FROM))
                        .await?;
                    result.nodes_created += 1;
                    result.edges_created += 1;
                }
            }
        }

        Ok(result.summary("imports resolved"))
    }
}

// ── AliasTracker ────────────────────────────────────────────

/// Variable aliases: `const b = a;` chains resolve to their root.
pub struct AliasTracker {
    metadata: PluginMetadata,
}

impl AliasTracker {
    pub fn new() -> Self {
        AliasTracker {
            metadata: PluginMetadata::new("AliasTracker", Phase::Enrichment)
                .dependencies(&["StructureAnalyzer"])
                .creates(&[kinds::ASSIGNED_FROM, kinds::DERIVES_FROM]),
        }
    }
}

impl Default for AliasTracker {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Plugin for AliasTracker {
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
            for variable in file.variables.iter().filter(|v| v.alias_of.is_some()) {
                let variable_id = variable.node_id(&file.path);
                let mut current = variable.alias_of.clone().unwrap_or_default();
                let mut depth = 0usize;

                loop {
                    depth += 1;
                    if depth > ALIAS_DEPTH_CAP {
                        if ctx.strict_mode {
                            result.errors.push(
                                Diagnostic::strict(
                                    codes::STRICT_ALIAS_DEPTH_EXCEEDED,
                                    &file.path,
                                    variable.line,
                                    format!(
                                        "alias chain from '{}' exceeds {ALIAS_DEPTH_CAP} hops",
                                        variable.name
                                    ),
                                    "flatten the aliases or reference the target directly",
                                )
                                .with_plugin(&self.metadata.name),
                            );
                        }
                        break;
                    }

                    if depth == 1 {
                        // Direct source edge for the first hop.
                        let target = if let Some(line) =
                            symbols.variable_line(&file.path, &current)
                        {
                            Some(NodeId::derive(kinds::VARIABLE, &current, &file.path, line))
                        } else {
                            symbols
                                .resolve_function(&current, &file.path)
                                .map(|f| f.node_id(kinds::FUNCTION))
                        };
                        if let Some(target) = target {
                            ctx.graph()
                                .buffer_edge(Edge::new(
                                    variable_id.clone(),
                                    target,
                                    kinds::ASSIGNED_FROM,
                                ))
                                .await?;
                            result.edges_created += 1;
                        } else {
                            break;
                        }
                    }

                    // Follow the chain while the source is itself an alias.
                    let next = file
                        .variables
                        .iter()
                        .find(|v| v.name == current)
                        .and_then(|v| v.alias_of.clone());
                    match next {
                        Some(next) => current = next,
                        None => {
                            if depth > 1 {
                                let root = if let Some(line) =
                                    symbols.variable_line(&file.path, &current)
                                {
                                    Some(NodeId::derive(
                                        kinds::VARIABLE,
                                        &current,
                                        &file.path,
                                        line,
                                    ))
                                } else {
                                    symbols
                                        .resolve_function(&current, &file.path)
                                        .map(|f| f.node_id(kinds::FUNCTION))
                                };
                                if let Some(root) = root {
                                    ctx.graph()
                                        .buffer_edge(Edge::new(
                                            variable_id.clone(),
                                            root,
                                            kinds::DERIVES_FROM,
                                        ))
                                        .await?;
                                    result.edges_created += 1;
                                }
                            }
                            break;
                        }
                    }
                }
            }
        }

        Ok(result.summary("aliases tracked"))
    }
}

// ── ArgumentTracker ─────────────────────────────────────────

/// Argument edges: call sites pass literals and identifiers.
pub struct ArgumentTracker {
    metadata: PluginMetadata,
}

impl ArgumentTracker {
    pub fn new() -> Self {
        ArgumentTracker {
            metadata: PluginMetadata::new("ArgumentTracker", Phase::Enrichment)
                .dependencies(&["CallResolver"])
                .creates(&[kinds::LITERAL, kinds::PASSES_ARGUMENT]),
        }
    }
}

impl Default for ArgumentTracker {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Plugin for ArgumentTracker {
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
            for call in &file.calls {
                let call_id = call.node_id(&file.path);
                for arg in &call.args {
                    match arg {
                        crate::facts::ArgFact::Literal { text, line } => {
                            let literal =
                                Node::source(kinds::LITERAL, text, &file.path, *line)
                                    .with_attr("value", text.as_str());
                            let literal_id = literal.id.clone();
                            ctx.graph().buffer_node(literal).await?;
                            ctx.graph()
                                .buffer_edge(Edge::new(
                                    call_id.clone(),
                                    literal_id,
                                    kinds::PASSES_ARGUMENT,
                                ))
                                .await?;
                            result.nodes_created += 1;
                            result.edges_created += 1;
                        }
                        crate::facts::ArgFact::Identifier { name, line } => {
                            if is_enclosing_param(file, call, name) {
                                continue;
                            }
                            let target = if let Some(var_line) =
                                symbols.variable_line(&file.path, name)
                            {
                                Some(NodeId::derive(kinds::VARIABLE, name, &file.path, var_line))
                            } else if let Some(function) =
                                symbols.resolve_function(name, &file.path)
                            {
                                Some(function.node_id(kinds::FUNCTION))
                            } else if let Some(source) =
                                symbols.import_source(&file.path, name)
                            {
                                let package = extract_package(source);
                                let external =
                                    ctx.graph().ensure_external_module(&package).await?;
                                result.nodes_created += 1;
                                Some(external)
                            } else {
                                None
                            };

                            match target {
                                Some(target) => {
                                    ctx.graph()
                                        .buffer_edge(Edge::new(
                                            call_id.clone(),
                                            target,
                                            kinds::PASSES_ARGUMENT,
                                        ))
                                        .await?;
                                    result.edges_created += 1;
                                }
                                None if ctx.strict_mode => {
                                    result.errors.push(
                                        Diagnostic::strict(
                                            codes::STRICT_UNRESOLVED_ARGUMENT,
                                            &file.path,
                                            *line,
                                            format!(
                                                "argument '{name}' passed to '{}' resolves to nothing",
                                                call.qualified_callee()
                                            ),
                                            format!("declare '{name}' before passing it"),
                                        )
                                        .with_plugin(&self.metadata.name),
                                    );
                                }
                                None => {}
                            }
                        }
                    }
                }
            }
        }

        Ok(result.summary("arguments tracked"))
    }
}
