//! Extracted source facts
//!
//! Parsing happens once per file in DISCOVERY; everything downstream
//! works on these plain records, so the tree-sitter tree never has to
//! cross a phase boundary.

use std::collections::HashMap;

use trellis_core::{kinds, NodeId};

/// One argument at a call site.
#[derive(Debug, Clone, PartialEq)]
pub enum ArgFact {
    /// String, number or boolean literal, with its source text.
    Literal { text: String, line: u32 },
    Identifier { name: String, line: u32 },
}

#[derive(Debug, Clone)]
pub struct FunctionFact {
    pub name: String,
    pub line: u32,
    pub column: u32,
    /// Set for methods: the enclosing class name.
    pub class: Option<String>,
    /// Parameter names, in declaration order.
    pub params: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct ClassFact {
    pub name: String,
    pub line: u32,
    pub extends: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ImportFact {
    /// The module specifier as written: `./helper`, `lodash`, `@scope/x`.
    pub source: String,
    /// Local names this statement binds.
    pub names: Vec<String>,
    pub line: u32,
}

#[derive(Debug, Clone)]
pub struct CallFact {
    /// Function or method name being called.
    pub callee: String,
    /// `obj` in `obj.method()`; `None` for plain calls.
    pub receiver: Option<String>,
    pub line: u32,
    pub column: u32,
    /// Innermost enclosing function, when any.
    pub caller: Option<String>,
    pub caller_line: u32,
    pub constructor: bool,
    pub args: Vec<ArgFact>,
}

#[derive(Debug, Clone)]
pub struct VariableFact {
    pub name: String,
    pub line: u32,
    /// `const a = b;` records `b`.
    pub alias_of: Option<String>,
    /// `const a = f();` records the callee name and line.
    pub assigned_from_call: Option<(String, u32)>,
}

/// Everything extracted from one source file.
#[derive(Debug, Clone, Default)]
pub struct FileFacts {
    pub path: String,
    pub functions: Vec<FunctionFact>,
    pub classes: Vec<ClassFact>,
    pub imports: Vec<ImportFact>,
    pub calls: Vec<CallFact>,
    pub variables: Vec<VariableFact>,
}

/// Per-run parse results, published in the resource registry.
pub type ParsedSources = Vec<FileFacts>;

// ── Deterministic node ids ──────────────────────────────────
//
// Every plugin that mentions a construct derives the same id from the
// same (kind, name, file, line), so edges meet their nodes regardless
// of which plugin runs first.

impl FunctionFact {
    pub fn node_id(&self, path: &str) -> NodeId {
        NodeId::derive(kinds::FUNCTION, &self.name, path, self.line)
    }
}

impl ClassFact {
    pub fn node_id(&self, path: &str) -> NodeId {
        NodeId::derive(kinds::CLASS, &self.name, path, self.line)
    }
}

impl ImportFact {
    pub fn node_id(&self, path: &str) -> NodeId {
        NodeId::derive(kinds::IMPORT, &self.source, path, self.line)
    }
}

impl CallFact {
    pub fn node_id(&self, path: &str) -> NodeId {
        let kind = if self.constructor {
            kinds::CONSTRUCTOR_CALL
        } else {
            kinds::CALL
        };
        NodeId::derive(kind, &self.qualified_callee(), path, self.line)
    }

    /// `receiver.method` or plain `name`.
    pub fn qualified_callee(&self) -> String {
        match &self.receiver {
            Some(receiver) => format!("{receiver}.{}", self.callee),
            None => self.callee.clone(),
        }
    }
}

impl VariableFact {
    pub fn node_id(&self, path: &str) -> NodeId {
        NodeId::derive(kinds::VARIABLE, &self.name, path, self.line)
    }
}

pub fn module_node_id(path: &str) -> NodeId {
    NodeId::derive(kinds::MODULE, module_name(path), path, 1)
}

/// File stem, the way modules are referred to in imports.
pub fn module_name(path: &str) -> &str {
    let base = path.rsplit('/').next().unwrap_or(path);
    base.strip_suffix(".js")
        .or_else(|| base.strip_suffix(".mjs"))
        .or_else(|| base.strip_suffix(".cjs"))
        .unwrap_or(base)
}

// ── Symbol index (built in INDEXING) ────────────────────────

/// Where a named symbol lives.
#[derive(Debug, Clone, PartialEq)]
pub struct SymbolRef {
    pub path: String,
    pub name: String,
    pub line: u32,
}

impl SymbolRef {
    pub fn node_id(&self, kind: &str) -> NodeId {
        NodeId::derive(kind, &self.name, &self.path, self.line)
    }
}

/// Cross-file symbol table for enrichment resolution.
#[derive(Debug, Clone, Default)]
pub struct SymbolIndex {
    pub functions: HashMap<String, Vec<SymbolRef>>,
    pub classes: HashMap<String, Vec<SymbolRef>>,
    /// `(file, local name)` → import specifier.
    pub imports: HashMap<(String, String), String>,
    /// `(file, variable name)` → declaration line.
    pub variables: HashMap<(String, String), u32>,
}

impl SymbolIndex {
    /// Resolve a plain call: same-file functions win over other files.
    pub fn resolve_function(&self, name: &str, from_path: &str) -> Option<&SymbolRef> {
        let candidates = self.functions.get(name)?;
        candidates
            .iter()
            .find(|c| c.path == from_path)
            .or_else(|| candidates.first())
    }

    pub fn resolve_class(&self, name: &str, from_path: &str) -> Option<&SymbolRef> {
        let candidates = self.classes.get(name)?;
        candidates
            .iter()
            .find(|c| c.path == from_path)
            .or_else(|| candidates.first())
    }

    pub fn import_source(&self, path: &str, local: &str) -> Option<&str> {
        self.imports
            .get(&(path.to_string(), local.to_string()))
            .map(String::as_str)
    }

    pub fn has_variable(&self, path: &str, name: &str) -> bool {
        self.variables
            .contains_key(&(path.to_string(), name.to_string()))
    }

    pub fn variable_line(&self, path: &str, name: &str) -> Option<u32> {
        self.variables
            .get(&(path.to_string(), name.to_string()))
            .copied()
    }
}
