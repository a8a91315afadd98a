//! Built-in VALIDATION plugin: import coverage
//!
//! For every externally-imported package observed in the graph, some
//! loaded plugin should declare it in `covers`. Each gap becomes one
//! `ISSUE` node with `category="coverage"`.

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;

use trellis_core::{kinds, Severity};

use crate::context::{IssueSpec, PluginContext};
use crate::plugin::{Phase, Plugin, PluginMetadata, PluginResult};
use crate::resources::keys;

/// Node.js platform built-ins. Imports of these are never coverage gaps.
pub const PLATFORM_BUILTINS: &[&str] = &[
    "assert",
    "buffer",
    "child_process",
    "cluster",
    "console",
    "crypto",
    "dns",
    "events",
    "fs",
    "http",
    "http2",
    "https",
    "net",
    "os",
    "path",
    "perf_hooks",
    "process",
    "querystring",
    "readline",
    "stream",
    "string_decoder",
    "timers",
    "tls",
    "url",
    "util",
    "v8",
    "vm",
    "worker_threads",
    "zlib",
];

/// Bundler runtime helpers, suppressed by default. Real libraries stay
/// visible.
pub const UTILITY_PACKAGES: &[&str] = &[
    "tslib",
    "core-js",
    "regenerator-runtime",
    "@babel/runtime",
];

/// `@scope/pkg/subpath` → `@scope/pkg`; `pkg/subpath` → `pkg`;
/// `node:fs` → `fs`.
pub fn extract_package(source: &str) -> String {
    let source = source.strip_prefix("node:").unwrap_or(source);
    let mut segments = source.split('/');
    match segments.next() {
        Some(scope) if scope.starts_with('@') => match segments.next() {
            Some(name) => format!("{scope}/{name}"),
            None => scope.to_string(),
        },
        Some(name) => name.to_string(),
        None => source.to_string(),
    }
}

pub fn is_platform_builtin(package: &str) -> bool {
    PLATFORM_BUILTINS.contains(&package)
}

pub struct CoverageValidator {
    metadata: PluginMetadata,
}

impl CoverageValidator {
    pub fn new() -> Self {
        CoverageValidator {
            metadata: PluginMetadata::new("CoverageValidator", Phase::Validation)
                .creates(&[kinds::ISSUE]),
        }
    }
}

impl Default for CoverageValidator {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Plugin for CoverageValidator {
    fn metadata(&self) -> &PluginMetadata {
        &self.metadata
    }

    async fn execute(&self, ctx: &PluginContext) -> anyhow::Result<PluginResult> {
        let imports = ctx.graph().find_by_type(kinds::IMPORT).await?;

        let external: BTreeSet<String> = imports
            .iter()
            .filter_map(|node| node.attrs.get("source").and_then(|v| v.as_str()))
            .filter(|source| !source.starts_with('.') && !source.starts_with('/'))
            .map(extract_package)
            .collect();

        let covered: Arc<BTreeSet<String>> = ctx
            .resources
            .get::<BTreeSet<String>>(keys::COVERED_PACKAGES)
            .unwrap_or_default();

        let mut uncovered = 0usize;
        for package in &external {
            if is_platform_builtin(package) {
                continue;
            }
            if ctx.config.suppress_utility_packages && UTILITY_PACKAGES.contains(&package.as_str())
            {
                continue;
            }
            if covered.contains(package) {
                continue;
            }

            ctx.report_issue(
                IssueSpec::new(
                    "coverage",
                    Severity::Warning,
                    format!("imported package '{package}' is not covered by any analysis plugin"),
                )
                .suggestion(format!(
                    "configure a plugin for '{package}' or add it to an existing plugin's covers list"
                )),
            );
            uncovered += 1;
        }

        Ok(PluginResult::default().summary(format!(
            "{} external package(s), {} uncovered",
            external.len(),
            uncovered
        )))
    }
}
