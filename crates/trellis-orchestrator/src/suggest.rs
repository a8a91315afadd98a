//! "Did-you-mean" hints for queries that return nothing
//!
//! The server stays dialect-neutral; the querying surface synthesises
//! suggestions from the kind constants in the query source and the
//! store's per-kind counts.

use std::collections::{BTreeSet, HashMap};
use std::sync::LazyLock;

use regex::Regex;

/// Maximum edit distance for a kind suggestion.
pub const EDIT_DISTANCE_THRESHOLD: usize = 2;

// Deliberately narrow: only the kind-constant positions of the three
// graph literals, nothing else in the query.
static NODE_KIND_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"node\s*\(\s*[^,()]+\s*,\s*"([^"]+)"\s*\)"#).expect("node kind regex")
});
static EDGE_KIND_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"edge\s*\(\s*[^,()]+\s*,\s*[^,()]+\s*,\s*"([^"]+)"\s*\)"#)
        .expect("edge kind regex")
});
static INCOMING_KIND_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"incoming\s*\(\s*[^,()]+\s*,\s*[^,()]+\s*,\s*"([^"]+)"\s*\)"#)
        .expect("incoming kind regex")
});

/// Node kinds mentioned as constants in `node(_, "K")` literals.
pub fn queried_node_kinds(query: &str) -> BTreeSet<String> {
    NODE_KIND_RE
        .captures_iter(query)
        .map(|c| c[1].to_string())
        .collect()
}

/// Edge kinds mentioned in `edge(_, _, "K")` / `incoming(_, _, "K")`.
pub fn queried_edge_kinds(query: &str) -> BTreeSet<String> {
    EDGE_KIND_RE
        .captures_iter(query)
        .chain(INCOMING_KIND_RE.captures_iter(query))
        .map(|c| c[1].to_string())
        .collect()
}

/// Plain-text hints for kinds that match nothing in the graph.
pub fn did_you_mean(
    query: &str,
    node_counts: &HashMap<String, usize>,
    edge_counts: &HashMap<String, usize>,
) -> Vec<String> {
    let mut hints = Vec::new();
    hints.extend(hints_for(
        &queried_node_kinds(query),
        node_counts,
        "node kind",
    ));
    hints.extend(hints_for(
        &queried_edge_kinds(query),
        edge_counts,
        "edge kind",
    ));
    hints
}

fn hints_for(
    queried: &BTreeSet<String>,
    counts: &HashMap<String, usize>,
    what: &str,
) -> Vec<String> {
    let mut hints = Vec::new();
    for kind in queried {
        if counts.contains_key(kind) {
            continue;
        }

        // Exact-case variant first: the kind exists, the casing differs.
        let case_variant = counts
            .keys()
            .find(|available| available.eq_ignore_ascii_case(kind) && *available != kind);
        if let Some(variant) = case_variant {
            hints.push(format!(
                "{what} \"{kind}\" matches nothing; kinds are case-sensitive, did you mean \"{variant}\"?"
            ));
            continue;
        }

        let mut candidates: Vec<(&String, usize)> = counts
            .keys()
            .map(|available| (available, strsim::levenshtein(kind, available)))
            .filter(|(_, distance)| *distance <= EDIT_DISTANCE_THRESHOLD)
            .collect();
        candidates.sort_by_key(|(name, distance)| (*distance, (*name).clone()));

        if let Some((best, _)) = candidates.first() {
            hints.push(format!(
                "{what} \"{kind}\" matches nothing, did you mean \"{best}\"?"
            ));
        }
    }
    hints
}
