//! Syntax tree for the closed Datalog dialect

use std::fmt;

use serde::{Deserialize, Serialize};

/// An argument position: a variable, a quoted string constant, or the
/// anonymous wildcard. Unquoted bare tokens are variables, never constants.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Term {
    Var(String),
    Const(String),
    Wildcard,
}

impl Term {
    pub fn is_ground(&self) -> bool {
        matches!(self, Term::Const(_))
    }

    pub fn as_const(&self) -> Option<&str> {
        match self {
            Term::Const(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for Term {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Term::Var(name) => f.write_str(name),
            Term::Const(value) => write!(f, "\"{value}\""),
            Term::Wildcard => f.write_str("_"),
        }
    }
}

/// A predicate application: `pred(arg1, …, argN)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Atom {
    pub predicate: String,
    pub args: Vec<Term>,
}

impl Atom {
    pub fn new(predicate: impl Into<String>, args: Vec<Term>) -> Self {
        Atom {
            predicate: predicate.into(),
            args,
        }
    }

    /// Variable names appearing in this atom, in argument order.
    pub fn variables(&self) -> Vec<&str> {
        self.args
            .iter()
            .filter_map(|t| match t {
                Term::Var(name) => Some(name.as_str()),
                _ => None,
            })
            .collect()
    }
}

impl fmt::Display for Atom {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}(", self.predicate)?;
        for (i, arg) in self.args.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{arg}")?;
        }
        f.write_str(")")
    }
}

/// A body literal: a positive or negated atom.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Literal {
    pub atom: Atom,
    pub negated: bool,
}

impl Literal {
    pub fn positive(atom: Atom) -> Self {
        Literal {
            atom,
            negated: false,
        }
    }

    pub fn negative(atom: Atom) -> Self {
        Literal {
            atom,
            negated: true,
        }
    }
}

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.negated {
            f.write_str("\\+ ")?;
        }
        write!(f, "{}", self.atom)
    }
}

/// `head(args) :- body.` A rule with an empty body is a fact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rule {
    pub head: Atom,
    pub body: Vec<Literal>,
}

/// A set of rules in source order.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Program {
    rules: Vec<Rule>,
}

impl Program {
    pub fn new(rules: Vec<Rule>) -> Self {
        Program { rules }
    }

    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}
