//! JavaScript extraction using tree-sitter
//!
//! One recursive walk per file, collecting facts as it descends. The
//! walker tracks the enclosing function and class so calls and methods
//! know their container.

use anyhow::{anyhow, Result};
use tree_sitter::{Node, Parser, Point};

use crate::facts::{ArgFact, CallFact, ClassFact, FileFacts, FunctionFact, ImportFact, VariableFact};

pub fn parse_file(path: &str, source: &str) -> Result<FileFacts> {
    let mut parser = Parser::new();
    parser
        .set_language(&tree_sitter_javascript::LANGUAGE.into())
        .map_err(|e| anyhow!("loading javascript grammar: {e}"))?;
    let tree = parser
        .parse(source, None)
        .ok_or_else(|| anyhow!("tree-sitter failed to parse {path}"))?;

    let mut facts = FileFacts {
        path: path.to_string(),
        ..Default::default()
    };
    let mut walker = Walker {
        source: source.as_bytes(),
        facts: &mut facts,
        function_stack: Vec::new(),
        class_stack: Vec::new(),
    };
    walker.visit(tree.root_node());
    Ok(facts)
}

fn line_of(point: Point) -> u32 {
    point.row as u32 + 1
}

fn column_of(point: Point) -> u32 {
    point.column as u32 + 1
}

struct Walker<'a> {
    source: &'a [u8],
    facts: &'a mut FileFacts,
    /// Innermost-last `(name, line)` of enclosing functions.
    function_stack: Vec<(String, u32)>,
    class_stack: Vec<String>,
}

impl<'a> Walker<'a> {
    fn text(&self, node: Node) -> String {
        node.utf8_text(self.source).unwrap_or_default().to_string()
    }

    fn field_text(&self, node: Node, field: &str) -> Option<String> {
        node.child_by_field_name(field).map(|n| self.text(n))
    }

    /// Parameter names of a function-like node.
    fn params_of(&self, node: Node) -> Vec<String> {
        let mut params = Vec::new();
        if let Some(parameters) = node.child_by_field_name("parameters") {
            let mut cursor = parameters.walk();
            for child in parameters.children(&mut cursor) {
                if child.kind() == "identifier" {
                    params.push(self.text(child));
                }
            }
        } else if let Some(parameter) = node.child_by_field_name("parameter") {
            // Single-parameter arrow function without parentheses.
            params.push(self.text(parameter));
        }
        params
    }

    fn visit(&mut self, node: Node) {
        let mut pushed_function = false;
        let mut pushed_class = false;

        match node.kind() {
            "function_declaration" => {
                if let Some(name) = self.field_text(node, "name") {
                    let line = line_of(node.start_position());
                    self.facts.functions.push(FunctionFact {
                        name: name.clone(),
                        line,
                        column: column_of(node.start_position()),
                        class: None,
                        params: self.params_of(node),
                    });
                    self.function_stack.push((name, line));
                    pushed_function = true;
                }
            }
            "method_definition" => {
                if let Some(name) = self.field_text(node, "name") {
                    let line = line_of(node.start_position());
                    self.facts.functions.push(FunctionFact {
                        name: name.clone(),
                        line,
                        column: column_of(node.start_position()),
                        class: self.class_stack.last().cloned(),
                        params: self.params_of(node),
                    });
                    self.function_stack.push((name, line));
                    pushed_function = true;
                }
            }
            "class_declaration" => {
                if let Some(name) = self.field_text(node, "name") {
                    self.facts.classes.push(ClassFact {
                        name: name.clone(),
                        line: line_of(node.start_position()),
                        extends: self.heritage_name(node),
                    });
                    self.class_stack.push(name);
                    pushed_class = true;
                }
            }
            "import_statement" => {
                self.extract_import(node);
            }
            "call_expression" => {
                self.extract_call(node, false);
            }
            "new_expression" => {
                self.extract_call(node, true);
            }
            "variable_declarator" => {
                self.extract_variable(node);
            }
            _ => {}
        }

        let mut cursor = node.walk();
        for child in node.children(&mut cursor) {
            self.visit(child);
        }

        if pushed_function {
            self.function_stack.pop();
        }
        if pushed_class {
            self.class_stack.pop();
        }
    }

    /// `class A extends B`: the identifier inside `class_heritage`.
    fn heritage_name(&self, class_node: Node) -> Option<String> {
        let mut cursor = class_node.walk();
        for child in class_node.children(&mut cursor) {
            if child.kind() == "class_heritage" {
                let mut inner = child.walk();
                for grandchild in child.children(&mut inner) {
                    if grandchild.kind() == "identifier" {
                        return Some(self.text(grandchild));
                    }
                }
            }
        }
        None
    }

    fn extract_import(&mut self, node: Node) {
        let Some(source_node) = node.child_by_field_name("source") else {
            return;
        };
        let source = self
            .text(source_node)
            .trim_matches(|c| c == '"' || c == '\'')
            .to_string();

        let mut names = Vec::new();
        collect_import_names(node, self.source, &mut names);

        self.facts.imports.push(ImportFact {
            source,
            names,
            line: line_of(node.start_position()),
        });
    }

    fn extract_call(&mut self, node: Node, constructor: bool) {
        let callee_field = if constructor { "constructor" } else { "function" };
        let Some(callee_node) = node.child_by_field_name(callee_field) else {
            return;
        };

        let (callee, receiver) = match callee_node.kind() {
            "identifier" => (self.text(callee_node), None),
            "member_expression" => {
                let object = callee_node
                    .child_by_field_name("object")
                    .map(|n| self.text(n));
                let property = callee_node
                    .child_by_field_name("property")
                    .map(|n| self.text(n));
                match (object, property) {
                    (Some(object), Some(property)) => (property, Some(object)),
                    _ => return,
                }
            }
            _ => return,
        };

        let args = node
            .child_by_field_name("arguments")
            .map(|arguments| self.extract_args(arguments))
            .unwrap_or_default();

        let (caller, caller_line) = match self.function_stack.last() {
            Some((name, line)) => (Some(name.clone()), *line),
            None => (None, 0),
        };

        self.facts.calls.push(CallFact {
            callee,
            receiver,
            line: line_of(node.start_position()),
            column: column_of(node.start_position()),
            caller,
            caller_line,
            constructor,
            args,
        });
    }

    fn extract_args(&self, arguments: Node) -> Vec<ArgFact> {
        let mut args = Vec::new();
        let mut cursor = arguments.walk();
        for child in arguments.children(&mut cursor) {
            let line = line_of(child.start_position());
            match child.kind() {
                "string" | "number" | "true" | "false" | "null" => {
                    args.push(ArgFact::Literal {
                        text: self
                            .text(child)
                            .trim_matches(|c| c == '"' || c == '\'')
                            .to_string(),
                        line,
                    });
                }
                "identifier" => {
                    args.push(ArgFact::Identifier {
                        name: self.text(child),
                        line,
                    });
                }
                _ => {}
            }
        }
        args
    }

    fn extract_variable(&mut self, node: Node) {
        let Some(name) = self.field_text(node, "name") else {
            return;
        };
        let line = line_of(node.start_position());
        let value = node.child_by_field_name("value");

        let (alias_of, assigned_from_call) = match value {
            Some(v) if v.kind() == "identifier" => (Some(self.text(v)), None),
            Some(v) if v.kind() == "call_expression" || v.kind() == "new_expression" => {
                let field = if v.kind() == "new_expression" {
                    "constructor"
                } else {
                    "function"
                };
                let callee = v
                    .child_by_field_name(field)
                    .filter(|n| n.kind() == "identifier")
                    .map(|n| (self.text(n), line_of(v.start_position())));
                (None, callee)
            }
            _ => (None, None),
        };

        // Functions assigned to variables surface as named functions.
        if let Some(v) = value {
            if matches!(v.kind(), "arrow_function" | "function_expression") {
                self.facts.functions.push(FunctionFact {
                    name: name.clone(),
                    line,
                    column: column_of(node.start_position()),
                    class: None,
                    params: self.params_of(v),
                });
                return;
            }
        }

        self.facts.variables.push(VariableFact {
            name,
            line,
            alias_of,
            assigned_from_call,
        });
    }
}

/// Local names bound by one import statement: the default identifier and
/// every named specifier.
fn collect_import_names(node: Node, source: &[u8], names: &mut Vec<String>) {
    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        match child.kind() {
            "identifier" => {
                names.push(child.utf8_text(source).unwrap_or_default().to_string());
            }
            "import_specifier" => {
                // `{ a as b }` binds `b`; `alias` falls back to `name`.
                let bound = child
                    .child_by_field_name("alias")
                    .or_else(|| child.child_by_field_name("name"));
                if let Some(bound) = bound {
                    names.push(bound.utf8_text(source).unwrap_or_default().to_string());
                }
            }
            _ => collect_import_names(child, source, names),
        }
    }
}
