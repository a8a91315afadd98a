//! Run-wide diagnostic model
//!
//! Plugins return diagnostics in their results; the orchestrator merges
//! them into one phase-keyed collector and consults it at each barrier.

use dashmap::DashMap;
use serde::{Deserialize, Serialize};

/// Severity taxonomy. `Fatal` terminates the run at the next barrier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Error,
    Fatal,
}

/// Stable diagnostic codes for strict-mode violations.
pub mod codes {
    pub const STRICT_UNRESOLVED_METHOD: &str = "STRICT_UNRESOLVED_METHOD";
    pub const STRICT_UNRESOLVED_CALL: &str = "STRICT_UNRESOLVED_CALL";
    pub const STRICT_UNRESOLVED_ARGUMENT: &str = "STRICT_UNRESOLVED_ARGUMENT";
    pub const STRICT_ALIAS_DEPTH_EXCEEDED: &str = "STRICT_ALIAS_DEPTH_EXCEEDED";
    pub const STRICT_BROKEN_IMPORT: &str = "STRICT_BROKEN_IMPORT";
}

/// A single finding, with enough context to act on it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub code: String,
    pub severity: Severity,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plugin: Option<String>,
}

impl Diagnostic {
    pub fn new(code: &str, severity: Severity, message: impl Into<String>) -> Self {
        Diagnostic {
            code: code.to_string(),
            severity,
            message: message.into(),
            file: None,
            line: None,
            suggestion: None,
            plugin: None,
        }
    }

    /// Fatal strict-mode diagnostic with location and actionable suggestion.
    pub fn strict(
        code: &str,
        file: &str,
        line: u32,
        message: impl Into<String>,
        suggestion: impl Into<String>,
    ) -> Self {
        Diagnostic {
            code: code.to_string(),
            severity: Severity::Fatal,
            message: message.into(),
            file: Some(file.to_string()),
            line: Some(line),
            suggestion: Some(suggestion.into()),
            plugin: None,
        }
    }

    pub fn with_plugin(mut self, plugin: &str) -> Self {
        self.plugin = Some(plugin.to_string());
        self
    }

    pub fn with_location(mut self, file: &str, line: u32) -> Self {
        self.file = Some(file.to_string());
        self.line = Some(line);
        self
    }
}

/// Concurrency-safe collector keyed by pipeline phase name. Writes from
/// many plugins merge into one stream.
#[derive(Default)]
pub struct DiagnosticCollector {
    by_phase: DashMap<String, Vec<Diagnostic>>,
}

impl DiagnosticCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, phase: &str, diagnostic: Diagnostic) {
        self.by_phase
            .entry(phase.to_string())
            .or_default()
            .push(diagnostic);
    }

    pub fn record_all(&self, phase: &str, diagnostics: impl IntoIterator<Item = Diagnostic>) {
        let mut entry = self.by_phase.entry(phase.to_string()).or_default();
        entry.extend(diagnostics);
    }

    /// Diagnostics of a phase at or above a severity.
    pub fn in_phase(&self, phase: &str, at_least: Severity) -> Vec<Diagnostic> {
        self.by_phase
            .get(phase)
            .map(|entry| {
                entry
                    .iter()
                    .filter(|d| d.severity >= at_least)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn fatal_in_phase(&self, phase: &str) -> Vec<Diagnostic> {
        self.in_phase(phase, Severity::Fatal)
    }

    pub fn all(&self) -> Vec<Diagnostic> {
        let mut out = Vec::new();
        for entry in self.by_phase.iter() {
            out.extend(entry.value().iter().cloned());
        }
        out
    }

    pub fn is_empty(&self) -> bool {
        self.by_phase.iter().all(|e| e.value().is_empty())
    }
}

impl PartialOrd for Severity {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Severity {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        fn rank(s: Severity) -> u8 {
            match s {
                Severity::Info => 0,
                Severity::Warning => 1,
                Severity::Error => 2,
                Severity::Fatal => 3,
            }
        }
        rank(*self).cmp(&rank(*other))
    }
}
