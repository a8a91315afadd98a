//! DISCOVERY: find source files, parse them, create MODULE nodes

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use globset::{Glob, GlobSet, GlobSetBuilder};
use ignore::WalkBuilder;

use trellis_core::{kinds, Diagnostic, Node, Severity};
use trellis_orchestrator::{keys, Phase, Plugin, PluginContext, PluginMetadata, PluginResult};

use crate::facts::{module_name, module_node_id, ParsedSources};
use crate::parsing::parse_file;

pub struct ModuleDiscovery {
    metadata: PluginMetadata,
    root: PathBuf,
}

impl ModuleDiscovery {
    pub fn new(root: PathBuf) -> Self {
        ModuleDiscovery {
            metadata: PluginMetadata::new("ModuleDiscovery", Phase::Discovery)
                .creates(&[kinds::MODULE]),
            root,
        }
    }

    fn include_set(&self, patterns: &[String]) -> anyhow::Result<GlobSet> {
        let mut builder = GlobSetBuilder::new();
        for pattern in patterns {
            builder.add(Glob::new(pattern)?);
        }
        Ok(builder.build()?)
    }
}

/// Walk, read and parse every matching file. Tree-sitter parsing is
/// synchronous CPU work and the parser is not `Send`, so all of it runs
/// inside one `spawn_blocking` call, off the async executor.
fn walk_and_parse(
    root: &Path,
    include: &GlobSet,
    ctx: &PluginContext,
) -> anyhow::Result<(ParsedSources, Vec<Diagnostic>)> {
    let mut files: Vec<PathBuf> = Vec::new();
    for entry in WalkBuilder::new(root).build() {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                tracing::warn!(error = %e, "skipping unreadable entry");
                continue;
            }
        };
        if !entry.file_type().is_some_and(|t| t.is_file()) {
            continue;
        }
        let relative = entry.path().strip_prefix(root).unwrap_or(entry.path());
        if include.is_match(relative) {
            files.push(entry.path().to_path_buf());
        }
    }
    // Walk order is filesystem-dependent; analysis order is not.
    files.sort();

    let mut parsed: ParsedSources = Vec::new();
    let mut errors = Vec::new();
    for file in files {
        let relative = file
            .strip_prefix(root)
            .unwrap_or(&file)
            .to_string_lossy()
            .replace('\\', "/");
        let source = std::fs::read_to_string(&file)?;
        ctx.progress(&format!("parsing {relative}"));

        match parse_file(&relative, &source) {
            Ok(facts) => parsed.push(facts),
            Err(e) => {
                errors.push(
                    Diagnostic::new("PARSE_ERROR", Severity::Fatal, e.to_string())
                        .with_location(&relative, 1),
                );
            }
        }
    }
    Ok((parsed, errors))
}

#[async_trait]
impl Plugin for ModuleDiscovery {
    fn metadata(&self) -> &PluginMetadata {
        &self.metadata
    }

    async fn execute(&self, ctx: &PluginContext) -> anyhow::Result<PluginResult> {
        let include = self.include_set(&ctx.config.include)?;
        let root = self.root.clone();
        let blocking_ctx = ctx.clone();
        let (parsed, errors) =
            tokio::task::spawn_blocking(move || walk_and_parse(&root, &include, &blocking_ctx))
                .await??;

        let mut result = PluginResult {
            errors,
            ..Default::default()
        };
        for facts in &parsed {
            let module = Node {
                id: module_node_id(&facts.path),
                kind: kinds::MODULE.to_string(),
                file: Some(facts.path.clone()),
                line: Some(1),
                column: None,
                attrs: Default::default(),
            }
            .with_attr("name", module_name(&facts.path));
            ctx.graph().buffer_node(module).await?;
            result.nodes_created += 1;
        }

        let file_count = parsed.len();
        ctx.resources.publish(keys::PARSED_SOURCES, parsed);
        Ok(result.summary(format!("{file_count} source file(s) parsed")))
    }
}
