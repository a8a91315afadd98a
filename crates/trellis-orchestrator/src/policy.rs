//! Built-in VALIDATION plugin: Datalog guarantee checks
//!
//! Each configured rule file is a Datalog program whose first rule's
//! head describes a violation. Every binding the program produces
//! becomes one `ISSUE` node; when a bound value names an existing node,
//! the issue is linked to it with an `AFFECTS` edge.

use std::path::PathBuf;

use async_trait::async_trait;

use trellis_core::{kinds, NodeId, Severity};

use crate::context::{IssueSpec, PluginContext};
use crate::plugin::{Phase, Plugin, PluginMetadata, PluginResult};

pub struct GuaranteeValidator {
    metadata: PluginMetadata,
    root: PathBuf,
}

impl GuaranteeValidator {
    pub fn new(root: PathBuf) -> Self {
        GuaranteeValidator {
            metadata: PluginMetadata::new("GuaranteeValidator", Phase::Validation)
                .creates(&[kinds::ISSUE]),
            root,
        }
    }
}

#[async_trait]
impl Plugin for GuaranteeValidator {
    fn metadata(&self) -> &PluginMetadata {
        &self.metadata
    }

    async fn execute(&self, ctx: &PluginContext) -> anyhow::Result<PluginResult> {
        let mut checked = 0usize;
        let mut violations = 0usize;

        for rule_file in &ctx.config.guarantee_rules {
            let path = if rule_file.is_absolute() {
                rule_file.clone()
            } else {
                self.root.join(rule_file)
            };
            let source = match std::fs::read_to_string(&path) {
                Ok(source) => source,
                Err(e) => {
                    tracing::warn!(file = %path.display(), error = %e, "skipping guarantee file");
                    continue;
                }
            };
            let name = path
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_else(|| "guarantee".to_string());

            let outcome = ctx.graph().check_guarantee(&source, false).await?;
            checked += 1;

            for row in &outcome.rows {
                let rendered: Vec<String> =
                    row.iter().map(|(var, value)| format!("{var}={value}")).collect();
                let mut spec = IssueSpec::new(
                    "guarantee",
                    Severity::Warning,
                    format!("guarantee '{name}' violated: {}", rendered.join(", ")),
                )
                .suggestion(format!("inspect the bindings reported by '{name}'"));

                // Anchor the issue to the first bound value that names a
                // real node.
                for value in row.values() {
                    let candidate = NodeId::from(value.as_str());
                    if ctx.graph().get_node(&candidate).await?.is_some() {
                        spec = spec.target(candidate);
                        break;
                    }
                }

                ctx.report_issue(spec);
                violations += 1;
            }
        }

        Ok(PluginResult::default().summary(format!(
            "{checked} guarantee(s) checked, {violations} violation(s)"
        )))
    }
}
