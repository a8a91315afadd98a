//! Parser for the closed Datalog dialect
//!
//! Grammar:
//!
//! ```text
//! program  := rule*
//! rule     := atom ( ":-" body )? "."
//! body     := literal ( "," literal )*
//! literal  := "\+"? atom
//! atom     := ident "(" term ( "," term )* ")"
//! term     := "_" | ident | quoted-string
//! ```
//!
//! `%` introduces a line comment. Whitespace and newlines are
//! insignificant. Unquoted identifiers in argument positions are
//! variables.

use thiserror::Error;

use crate::ast::{Atom, Literal, Program, Rule, Term};

#[derive(Error, Debug, Clone, PartialEq)]
#[error("parse error at line {line}, column {column}: {message}")]
pub struct ParseError {
    pub message: String,
    pub line: u32,
    pub column: u32,
}

/// Parse a full rule program.
pub fn parse_program(source: &str) -> Result<Program, ParseError> {
    let mut parser = Parser::new(source);
    let mut rules = Vec::new();
    parser.skip_trivia();
    while !parser.at_end() {
        rules.push(parser.rule()?);
        parser.skip_trivia();
    }
    Ok(Program::new(rules))
}

/// Parse a single goal atom. A trailing `.` is tolerated.
pub fn parse_atom(source: &str) -> Result<Atom, ParseError> {
    let mut parser = Parser::new(source);
    parser.skip_trivia();
    let atom = parser.atom()?;
    parser.skip_trivia();
    parser.eat('.');
    parser.skip_trivia();
    parser.expect_end()?;
    Ok(atom)
}

/// Parse a conjunction of literals. A trailing `.` is tolerated.
pub fn parse_query(source: &str) -> Result<Vec<Literal>, ParseError> {
    let mut parser = Parser::new(source);
    parser.skip_trivia();
    let body = parser.body()?;
    parser.skip_trivia();
    parser.eat('.');
    parser.skip_trivia();
    parser.expect_end()?;
    Ok(body)
}

/// A source blob is a rule program when it contains the `:-` operator,
/// otherwise it is a plain conjunction of literals.
pub fn is_rule_program(source: &str) -> bool {
    source.contains(":-")
}

struct Parser<'s> {
    chars: Vec<char>,
    pos: usize,
    source: &'s str,
}

impl<'s> Parser<'s> {
    fn new(source: &'s str) -> Self {
        Parser {
            chars: source.chars().collect(),
            pos: 0,
            source,
        }
    }

    fn rule(&mut self) -> Result<Rule, ParseError> {
        let head = self.atom()?;
        self.skip_trivia();
        let body = if self.eat_str(":-") {
            self.skip_trivia();
            self.body()?
        } else {
            Vec::new()
        };
        self.skip_trivia();
        if !self.eat('.') {
            return Err(self.error("expected '.' at end of rule"));
        }
        Ok(Rule { head, body })
    }

    fn body(&mut self) -> Result<Vec<Literal>, ParseError> {
        let mut literals = vec![self.literal()?];
        loop {
            self.skip_trivia();
            if self.eat(',') {
                self.skip_trivia();
                literals.push(self.literal()?);
            } else {
                break;
            }
        }
        Ok(literals)
    }

    fn literal(&mut self) -> Result<Literal, ParseError> {
        if self.eat_str("\\+") {
            self.skip_trivia();
            Ok(Literal::negative(self.atom()?))
        } else {
            Ok(Literal::positive(self.atom()?))
        }
    }

    fn atom(&mut self) -> Result<Atom, ParseError> {
        let predicate = self.ident("predicate name")?;
        self.skip_trivia();
        if !self.eat('(') {
            return Err(self.error("expected '(' after predicate name"));
        }
        self.skip_trivia();
        let mut args = vec![self.term()?];
        loop {
            self.skip_trivia();
            if self.eat(',') {
                self.skip_trivia();
                args.push(self.term()?);
            } else {
                break;
            }
        }
        self.skip_trivia();
        if !self.eat(')') {
            return Err(self.error("expected ')' to close argument list"));
        }
        Ok(Atom::new(predicate, args))
    }

    fn term(&mut self) -> Result<Term, ParseError> {
        match self.peek() {
            Some('"') => Ok(Term::Const(self.quoted_string()?)),
            Some('_') if !self.next_is_ident_char(1) => {
                self.pos += 1;
                Ok(Term::Wildcard)
            }
            Some(c) if is_ident_start(c) => Ok(Term::Var(self.ident("argument")?)),
            _ => Err(self.error("expected variable, '_', or quoted constant")),
        }
    }

    fn quoted_string(&mut self) -> Result<String, ParseError> {
        debug_assert_eq!(self.peek(), Some('"'));
        self.pos += 1;
        let mut value = String::new();
        loop {
            match self.peek() {
                Some('"') => {
                    self.pos += 1;
                    return Ok(value);
                }
                Some('\\') => {
                    self.pos += 1;
                    match self.peek() {
                        Some(c @ ('"' | '\\')) => {
                            value.push(c);
                            self.pos += 1;
                        }
                        Some(c) => {
                            value.push('\\');
                            value.push(c);
                            self.pos += 1;
                        }
                        None => return Err(self.error("unterminated string constant")),
                    }
                }
                Some(c) => {
                    value.push(c);
                    self.pos += 1;
                }
                None => return Err(self.error("unterminated string constant")),
            }
        }
    }

    fn ident(&mut self, what: &str) -> Result<String, ParseError> {
        match self.peek() {
            Some(c) if is_ident_start(c) => {
                let start = self.pos;
                self.pos += 1;
                while matches!(self.peek(), Some(c) if is_ident_char(c)) {
                    self.pos += 1;
                }
                Ok(self.chars[start..self.pos].iter().collect())
            }
            _ => Err(self.error(&format!("expected {what}"))),
        }
    }

    // ── Low-level scanning ──────────────────────────────────

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn next_is_ident_char(&self, offset: usize) -> bool {
        matches!(self.chars.get(self.pos + offset), Some(&c) if is_ident_char(c))
    }

    fn eat(&mut self, expected: char) -> bool {
        if self.peek() == Some(expected) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn eat_str(&mut self, expected: &str) -> bool {
        let candidate: String = self
            .chars
            .iter()
            .skip(self.pos)
            .take(expected.chars().count())
            .collect();
        if candidate == expected {
            self.pos += expected.chars().count();
            true
        } else {
            false
        }
    }

    fn skip_trivia(&mut self) {
        loop {
            match self.peek() {
                Some(c) if c.is_whitespace() => self.pos += 1,
                Some('%') => {
                    while !matches!(self.peek(), Some('\n') | None) {
                        self.pos += 1;
                    }
                }
                _ => break,
            }
        }
    }

    fn at_end(&self) -> bool {
        self.pos >= self.chars.len()
    }

    fn expect_end(&mut self) -> Result<(), ParseError> {
        if self.at_end() {
            Ok(())
        } else {
            Err(self.error("unexpected trailing input"))
        }
    }

    fn error(&self, message: &str) -> ParseError {
        let mut line = 1u32;
        let mut column = 1u32;
        for (i, c) in self.source.chars().enumerate() {
            if i >= self.pos {
                break;
            }
            if c == '\n' {
                line += 1;
                column = 1;
            } else {
                column += 1;
            }
        }
        ParseError {
            message: message.to_string(),
            line,
            column,
        }
    }
}

fn is_ident_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_'
}

fn is_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}
