//! Bottom-up evaluator with optional explain instrumentation
//!
//! One evaluator type serves both modes: the `explain` flag passed to the
//! constructor decides whether a trace is allocated, and every
//! instrumentation site is a single `if let` on that option. The hot loop
//! carries no other explain-conditional work, so the non-explain path
//! computes nothing it does not need.
//!
//! An evaluator owns mutable trace state and must not be shared across
//! concurrent queries; build one per query.

use std::collections::{HashMap, HashSet, VecDeque};
use std::time::Instant;

use crate::ast::{Atom, Literal, Program, Rule, Term};
use crate::explain::{Binding, ExplainStep, QueryProfile, QueryResult, QueryStats};
use crate::source::GraphSource;

/// Predicates dispatched to the store. Everything else is derived.
pub const BUILTINS: &[&str] = &[
    "node",
    "edge",
    "incoming",
    "attr",
    "attr_edge",
    "path",
    "neq",
    "starts_with",
    "not_starts_with",
];

pub fn is_builtin(predicate: &str) -> bool {
    BUILTINS.contains(&predicate)
}

/// Ground facts per derived predicate.
type FactTable = HashMap<String, HashSet<Vec<String>>>;

struct Trace {
    counter: u64,
    steps: Vec<ExplainStep>,
    stats: QueryStats,
    per_predicate_us: std::collections::BTreeMap<String, u64>,
}

impl Trace {
    fn new() -> Self {
        Trace {
            counter: 0,
            steps: Vec::new(),
            stats: QueryStats::default(),
            per_predicate_us: std::collections::BTreeMap::new(),
        }
    }

    fn store_call(&mut self, op: &str) {
        *self.stats.store_calls.entry(op.to_string()).or_default() += 1;
    }
}

/// The evaluator. `Explain` in the name is the capability, not a mode:
/// constructed with `explain = false` it skips all instrumentation.
pub struct EvaluatorExplain<'g> {
    source: &'g dyn GraphSource,
    rules: Vec<Rule>,
    trace: Option<Trace>,
    /// Fixpoint of the derived predicates, computed lazily per rule set.
    derived: Option<FactTable>,
}

impl<'g> EvaluatorExplain<'g> {
    pub fn new(source: &'g dyn GraphSource, explain: bool) -> Self {
        EvaluatorExplain {
            source,
            rules: Vec::new(),
            trace: explain.then(Trace::new),
            derived: None,
        }
    }

    pub fn add_rule(&mut self, rule: Rule) {
        self.rules.push(rule);
        self.derived = None;
    }

    pub fn load_program(&mut self, program: &Program) {
        for rule in program.rules() {
            self.add_rule(rule.clone());
        }
    }

    /// Evaluate a single goal atom.
    pub fn query(&mut self, goal: &Atom) -> QueryResult {
        self.query_conjunction(&[Literal::positive(goal.clone())])
    }

    /// Evaluate a conjunction `L1, …, Ln`.
    pub fn query_conjunction(&mut self, literals: &[Literal]) -> QueryResult {
        let started = Instant::now();

        // Boundary fast path: nothing to match and nothing derivable.
        if self.source.is_empty() && self.rules.is_empty() {
            return self.finish(Vec::new(), vec![0; literals.len()], started);
        }

        let needs_facts =
            !self.rules.is_empty() && literals.iter().any(|l| !is_builtin(&l.atom.predicate));
        let facts = if needs_facts {
            self.fixpoint()
        } else {
            FactTable::new()
        };

        let mut bindings = vec![Binding::new()];
        let mut cardinalities = Vec::with_capacity(literals.len());
        for literal in literals {
            bindings = eval_literal(self.source, &facts, &mut self.trace, literal, bindings);
            cardinalities.push(bindings.len());
        }

        if needs_facts {
            self.derived = Some(facts);
        }
        self.finish(bindings, cardinalities, started)
    }

    /// Semi-naïve iteration to fixpoint over the loaded rules. Rules whose
    /// derived body predicates gained no facts in the previous round are
    /// skipped after the first round.
    fn fixpoint(&mut self) -> FactTable {
        if let Some(facts) = self.derived.take() {
            return facts;
        }

        let rules = self.rules.clone();
        let mut facts = FactTable::new();
        let mut changed: HashSet<String> = HashSet::new();
        let mut first_round = true;
        loop {
            let mut added: HashSet<String> = HashSet::new();
            for rule in &rules {
                let derived_deps: Vec<&str> = rule
                    .body
                    .iter()
                    .filter(|l| !is_builtin(&l.atom.predicate))
                    .map(|l| l.atom.predicate.as_str())
                    .collect();
                if !first_round
                    && (derived_deps.is_empty()
                        || !derived_deps.iter().any(|p| changed.contains(*p)))
                {
                    continue;
                }

                if let Some(trace) = &mut self.trace {
                    trace.stats.rule_evaluations += 1;
                }

                let bindings = eval_conjunction(self.source, &facts, &mut self.trace, &rule.body);
                for binding in bindings {
                    let Some(tuple) = ground_tuple(&rule.head, &binding) else {
                        continue;
                    };
                    let entry = facts.entry(rule.head.predicate.clone()).or_default();
                    if entry.insert(tuple) {
                        added.insert(rule.head.predicate.clone());
                    }
                }
            }
            if added.is_empty() {
                break;
            }
            changed = added;
            first_round = false;
        }
        tracing::trace!(predicates = facts.len(), "derived fixpoint reached");
        facts
    }

    fn finish(
        &mut self,
        mut bindings: Vec<Binding>,
        cardinalities: Vec<usize>,
        started: Instant,
    ) -> QueryResult {
        bindings.sort();
        match self.trace.take() {
            Some(mut trace) => {
                trace.stats.result_rows = bindings.len() as u64;
                trace.stats.literal_cardinalities = cardinalities;
                let profile = QueryProfile {
                    // Clamped so "took no measurable time" still reads as
                    // a positive duration.
                    total_duration_us: (started.elapsed().as_micros() as u64).max(1),
                    per_predicate_us: trace.per_predicate_us,
                };
                // Re-arm for the next query on this evaluator.
                self.trace = Some(Trace::new());
                QueryResult {
                    bindings,
                    stats: Some(trace.stats),
                    profile: Some(profile),
                    explain_steps: Some(trace.steps),
                }
            }
            None => QueryResult::bindings_only(bindings),
        }
    }
}

// ── Conjunction machinery ───────────────────────────────────

fn eval_conjunction(
    source: &dyn GraphSource,
    facts: &FactTable,
    trace: &mut Option<Trace>,
    literals: &[Literal],
) -> Vec<Binding> {
    let mut bindings = vec![Binding::new()];
    for literal in literals {
        bindings = eval_literal(source, facts, trace, literal, bindings);
    }
    bindings
}

fn eval_literal(
    source: &dyn GraphSource,
    facts: &FactTable,
    trace: &mut Option<Trace>,
    literal: &Literal,
    carriers: Vec<Binding>,
) -> Vec<Binding> {
    let mut next = Vec::new();
    for carrier in carriers {
        let grounded = substitute(&literal.atom, &carrier);
        let solutions = dispatch(source, facts, trace, &grounded);
        if literal.negated {
            // Negation as absence: keep the carrier only when the
            // substituted atom has no solutions.
            if solutions.is_empty() {
                next.push(carrier);
            }
        } else {
            for solution in solutions {
                if let Some(merged) = merge(&carrier, solution) {
                    next.push(merged);
                }
            }
        }
    }
    next
}

/// Replace bound variables with constants.
fn substitute(atom: &Atom, binding: &Binding) -> Atom {
    let args = atom
        .args
        .iter()
        .map(|term| match term {
            Term::Var(name) => match binding.get(name) {
                Some(value) => Term::Const(value.clone()),
                None => term.clone(),
            },
            _ => term.clone(),
        })
        .collect();
    Atom::new(atom.predicate.clone(), args)
}

/// Unify an argument list against a ground tuple, handling repeated
/// variables within one atom.
fn unify(args: &[Term], values: &[&str]) -> Option<Binding> {
    if args.len() != values.len() {
        return None;
    }
    let mut binding = Binding::new();
    for (term, value) in args.iter().zip(values) {
        match term {
            Term::Const(c) => {
                if c != value {
                    return None;
                }
            }
            Term::Wildcard => {}
            Term::Var(name) => match binding.get(name) {
                Some(previous) if previous != value => return None,
                _ => {
                    binding.insert(name.clone(), value.to_string());
                }
            },
        }
    }
    Some(binding)
}

fn merge(carrier: &Binding, solution: Binding) -> Option<Binding> {
    let mut merged = carrier.clone();
    for (name, value) in solution {
        match merged.get(&name) {
            Some(previous) if *previous != value => return None,
            _ => {
                merged.insert(name, value);
            }
        }
    }
    Some(merged)
}

fn ground_tuple(head: &Atom, binding: &Binding) -> Option<Vec<String>> {
    head.args
        .iter()
        .map(|term| match term {
            Term::Const(c) => Some(c.clone()),
            Term::Var(name) => binding.get(name).cloned(),
            Term::Wildcard => None,
        })
        .collect()
}

// ── Predicate dispatch ──────────────────────────────────────

fn dispatch(
    source: &dyn GraphSource,
    facts: &FactTable,
    trace: &mut Option<Trace>,
    atom: &Atom,
) -> Vec<Binding> {
    let started = trace.as_ref().map(|_| Instant::now());
    let (solutions, detail) = eval_atom(source, facts, trace, atom);
    if let Some(trace) = trace {
        let elapsed = started
            .map(|s| s.elapsed().as_micros() as u64)
            .unwrap_or_default();
        trace.counter += 1;
        trace.steps.push(ExplainStep {
            step: trace.counter,
            predicate: atom.predicate.clone(),
            args: atom.args.iter().map(|t| t.to_string()).collect(),
            produced: solutions.len(),
            elapsed_us: elapsed,
            detail,
        });
        *trace
            .per_predicate_us
            .entry(atom.predicate.clone())
            .or_default() += elapsed;
    }
    solutions
}

fn eval_atom(
    source: &dyn GraphSource,
    facts: &FactTable,
    trace: &mut Option<Trace>,
    atom: &Atom,
) -> (Vec<Binding>, Option<String>) {
    match (atom.predicate.as_str(), atom.args.len()) {
        ("node", 2) => eval_node(source, trace, atom),
        ("edge", 3) => eval_edge(source, trace, atom, false),
        ("incoming", 3) => eval_edge(source, trace, atom, true),
        ("attr", 3) => eval_attr(source, trace, atom),
        ("attr_edge", 5) => eval_attr_edge(source, trace, atom),
        ("path", 2) => eval_path(source, trace, atom),
        ("neq", 2) => eval_neq(atom),
        ("starts_with", 2) => eval_starts_with(atom, false),
        ("not_starts_with", 2) => eval_starts_with(atom, true),
        _ => eval_derived(facts, atom),
    }
}

fn eval_node(
    source: &dyn GraphSource,
    trace: &mut Option<Trace>,
    atom: &Atom,
) -> (Vec<Binding>, Option<String>) {
    let id = atom.args[0].as_const();
    let kind = atom.args[1].as_const();

    let (tuples, detail) = match (id, kind) {
        (Some(id), _) => {
            if let Some(t) = trace {
                t.store_call("get_node");
                t.stats.nodes_visited += 1;
            }
            let tuples = source
                .node_kind(id)
                .map(|k| vec![(id.to_string(), k)])
                .unwrap_or_default();
            (tuples, Some("id lookup".to_string()))
        }
        (None, Some(kind)) => {
            let ids = source.find_by_type(kind);
            if let Some(t) = trace {
                t.store_call("find_by_type");
                t.stats.nodes_visited += ids.len() as u64;
            }
            let tuples = ids.into_iter().map(|id| (id, kind.to_string())).collect();
            (tuples, Some(format!("by-kind index {kind}")))
        }
        (None, None) => {
            let ids = source.node_ids();
            if let Some(t) = trace {
                t.store_call("scan_nodes");
                t.stats.nodes_visited += ids.len() as u64;
            }
            let tuples = ids
                .into_iter()
                .filter_map(|id| source.node_kind(&id).map(|k| (id, k)))
                .collect();
            (tuples, Some("full node scan".to_string()))
        }
    };

    let solutions = tuples
        .iter()
        .filter_map(|(id, kind)| unify(&atom.args, &[id.as_str(), kind.as_str()]))
        .collect();
    (solutions, detail)
}

fn eval_edge(
    source: &dyn GraphSource,
    trace: &mut Option<Trace>,
    atom: &Atom,
    reversed: bool,
) -> (Vec<Binding>, Option<String>) {
    // `incoming(Dst, Src, Kind)` is `edge(Src, Dst, Kind)` read through
    // the reverse index.
    let (src_pos, dst_pos) = if reversed { (1, 0) } else { (0, 1) };
    let src = atom.args[src_pos].as_const();
    let dst = atom.args[dst_pos].as_const();

    let (triples, detail): (Vec<(String, String, String)>, _) = if let Some(src) = src {
        let out = source.outgoing(src);
        if let Some(t) = trace {
            t.store_call("outgoing");
            t.stats.edges_traversed += out.len() as u64;
        }
        (
            out.into_iter()
                .map(|(d, k)| (src.to_string(), d, k))
                .collect(),
            Some("outgoing index".to_string()),
        )
    } else if let Some(dst) = dst {
        let inc = source.incoming(dst);
        if let Some(t) = trace {
            t.store_call("incoming");
            t.stats.edges_traversed += inc.len() as u64;
        }
        (
            inc.into_iter()
                .map(|(s, k)| (s, dst.to_string(), k))
                .collect(),
            Some("incoming index".to_string()),
        )
    } else {
        let all = source.edges();
        if let Some(t) = trace {
            t.store_call("scan_edges");
            t.stats.edges_traversed += all.len() as u64;
        }
        (all, Some("full edge scan".to_string()))
    };

    let solutions = triples
        .iter()
        .filter_map(|(s, d, k)| {
            if reversed {
                unify(&atom.args, &[d.as_str(), s.as_str(), k.as_str()])
            } else {
                unify(&atom.args, &[s.as_str(), d.as_str(), k.as_str()])
            }
        })
        .collect();
    (solutions, detail)
}

fn eval_attr(
    source: &dyn GraphSource,
    trace: &mut Option<Trace>,
    atom: &Atom,
) -> (Vec<Binding>, Option<String>) {
    let Some(name) = atom.args[1].as_const() else {
        return (Vec::new(), Some("attribute name must be bound".to_string()));
    };

    let candidates: Vec<String> = match atom.args[0].as_const() {
        Some(id) => vec![id.to_string()],
        None => source.node_ids(),
    };
    if let Some(t) = trace {
        t.store_call("attr");
        t.stats.nodes_visited += candidates.len() as u64;
    }

    let solutions = candidates
        .iter()
        .filter_map(|id| {
            source
                .attr(id, name)
                .and_then(|value| unify(&atom.args, &[id.as_str(), name, value.as_str()]))
        })
        .collect();
    (solutions, Some(format!("attr lookup {name}")))
}

fn eval_attr_edge(
    source: &dyn GraphSource,
    trace: &mut Option<Trace>,
    atom: &Atom,
) -> (Vec<Binding>, Option<String>) {
    let Some(name) = atom.args[3].as_const() else {
        return (Vec::new(), Some("attribute name must be bound".to_string()));
    };

    let triples: Vec<(String, String, String)> = match (
        atom.args[0].as_const(),
        atom.args[1].as_const(),
        atom.args[2].as_const(),
    ) {
        (Some(s), Some(d), Some(k)) => vec![(s.to_string(), d.to_string(), k.to_string())],
        _ => source.edges(),
    };
    if let Some(t) = trace {
        t.store_call("edge_attr");
        t.stats.edges_traversed += triples.len() as u64;
    }

    let solutions = triples
        .iter()
        .filter_map(|(s, d, k)| {
            source
                .edge_attr(s, d, k, name)
                .and_then(|value| {
                    unify(
                        &atom.args,
                        &[s.as_str(), d.as_str(), k.as_str(), name, value.as_str()],
                    )
                })
        })
        .collect();
    (solutions, Some(format!("edge attr lookup {name}")))
}

fn eval_path(
    source: &dyn GraphSource,
    trace: &mut Option<Trace>,
    atom: &Atom,
) -> (Vec<Binding>, Option<String>) {
    let src = atom.args[0].as_const();
    let dst = atom.args[1].as_const();

    let (pairs, detail): (Vec<(String, String)>, _) = match (src, dst) {
        (Some(src), _) => {
            let reachable = bfs(src, trace, |id| {
                source.outgoing(id).into_iter().map(|(d, _)| d).collect()
            });
            (
                reachable
                    .into_iter()
                    .map(|r| (src.to_string(), r))
                    .collect(),
                Some("forward reachability".to_string()),
            )
        }
        (None, Some(dst)) => {
            let reachable = bfs(dst, trace, |id| {
                source.incoming(id).into_iter().map(|(s, _)| s).collect()
            });
            (
                reachable
                    .into_iter()
                    .map(|r| (r, dst.to_string()))
                    .collect(),
                Some("reverse reachability".to_string()),
            )
        }
        (None, None) => {
            let mut pairs = Vec::new();
            for id in source.node_ids() {
                for r in bfs(&id, trace, |n| {
                    source.outgoing(n).into_iter().map(|(d, _)| d).collect()
                }) {
                    pairs.push((id.clone(), r));
                }
            }
            (pairs, Some("all-pairs reachability".to_string()))
        }
    };
    if let Some(t) = trace {
        t.store_call("path");
    }

    let solutions = pairs
        .iter()
        .filter_map(|(s, d)| unify(&atom.args, &[s.as_str(), d.as_str()]))
        .collect();
    (solutions, detail)
}

/// Nodes reachable from `start` via one or more edges. `start` itself
/// appears only when a cycle leads back to it.
fn bfs(
    start: &str,
    trace: &mut Option<Trace>,
    neighbours: impl Fn(&str) -> Vec<String>,
) -> Vec<String> {
    let mut reached: HashSet<String> = HashSet::new();
    let mut expanded: HashSet<String> = HashSet::new();
    let mut order = Vec::new();
    let mut queue: VecDeque<String> = VecDeque::from([start.to_string()]);
    while let Some(current) = queue.pop_front() {
        if !expanded.insert(current.clone()) {
            continue;
        }
        let next = neighbours(&current);
        if let Some(t) = trace {
            t.stats.nodes_visited += 1;
            t.stats.edges_traversed += next.len() as u64;
        }
        for n in next {
            if reached.insert(n.clone()) {
                order.push(n.clone());
                queue.push_back(n);
            }
        }
    }
    order
}

fn eval_neq(atom: &Atom) -> (Vec<Binding>, Option<String>) {
    match (atom.args[0].as_const(), atom.args[1].as_const()) {
        (Some(x), Some(y)) if x != y => (vec![Binding::new()], None),
        (Some(_), Some(_)) => (Vec::new(), None),
        _ => (Vec::new(), Some("guard requires ground arguments".to_string())),
    }
}

fn eval_starts_with(atom: &Atom, negated: bool) -> (Vec<Binding>, Option<String>) {
    match (atom.args[0].as_const(), atom.args[1].as_const()) {
        (Some(s), Some(prefix)) => {
            if s.starts_with(prefix) != negated {
                (vec![Binding::new()], None)
            } else {
                (Vec::new(), None)
            }
        }
        _ => (Vec::new(), Some("guard requires ground arguments".to_string())),
    }
}

/// Derived predicates resolve against the fixpoint table; unknown
/// predicates simply have an empty extension.
fn eval_derived(facts: &FactTable, atom: &Atom) -> (Vec<Binding>, Option<String>) {
    let solutions = facts
        .get(&atom.predicate)
        .map(|tuples| {
            tuples
                .iter()
                .filter_map(|tuple| {
                    let refs: Vec<&str> = tuple.iter().map(String::as_str).collect();
                    unify(&atom.args, &refs)
                })
                .collect()
        })
        .unwrap_or_default();
    (solutions, Some("derived".to_string()))
}
