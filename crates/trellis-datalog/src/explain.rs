//! Explain-mode records: steps, stats, profile

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// A concrete assignment of ground values to query variables.
pub type Binding = BTreeMap<String, String>;

/// One predicate dispatch during evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExplainStep {
    /// Monotonic counter across the whole query.
    pub step: u64,
    pub predicate: String,
    /// The argument list after substituting the carrier binding.
    pub args: Vec<String>,
    /// Number of bindings this dispatch produced.
    pub produced: usize,
    pub elapsed_us: u64,
    /// Free-form note, e.g. which index served the lookup.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// Running counters accumulated while a query executes.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryStats {
    pub nodes_visited: u64,
    pub edges_traversed: u64,
    /// Calls per store operation class (`find_by_type`, `outgoing`, …).
    pub store_calls: BTreeMap<String, u64>,
    pub result_rows: u64,
    pub rule_evaluations: u64,
    /// Binding-set cardinality after each literal of the query chain.
    pub literal_cardinalities: Vec<usize>,
}

/// Wall-clock totals per predicate.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryProfile {
    pub total_duration_us: u64,
    pub per_predicate_us: BTreeMap<String, u64>,
}

/// The result of one query. On the non-explain path only `bindings` is
/// populated; stats, profile and steps are not computed at all.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryResult {
    pub bindings: Vec<Binding>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stats: Option<QueryStats>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile: Option<QueryProfile>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub explain_steps: Option<Vec<ExplainStep>>,
}

impl QueryResult {
    pub fn bindings_only(bindings: Vec<Binding>) -> Self {
        QueryResult {
            bindings,
            stats: None,
            profile: None,
            explain_steps: None,
        }
    }
}
