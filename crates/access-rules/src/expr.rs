//! Condition AST.
//!
//! Conditions are parsed once when a rule table is compiled; evaluation walks
//! this tree and never re-reads source text.

use std::collections::BTreeSet;

use regex::Regex;
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    In,
    Add,
    Sub,
    Mul,
}

impl BinOp {
    pub fn symbol(&self) -> &'static str {
        match self {
            BinOp::Eq => "==",
            BinOp::Ne => "!=",
            BinOp::Lt => "<",
            BinOp::Le => "<=",
            BinOp::Gt => ">",
            BinOp::Ge => ">=",
            BinOp::In => "in",
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::Mul => "*",
        }
    }
}

#[derive(Debug, Clone)]
pub enum Expr {
    Literal(Value),
    List(Vec<Expr>),
    Var(String),
    Field(Box<Expr>, String),
    Index(Box<Expr>, Box<Expr>),
    Not(Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Binary(BinOp, Box<Expr>, Box<Expr>),
    /// `target.matches('re')`; the regex is anchored at compile time.
    Matches(Box<Expr>, Regex),
    Size(Box<Expr>),
    /// `get(/collection/$(id))`: the stored document.
    Get(DocPath),
    /// `exists(/collection/$(id))`
    Exists(DocPath),
    /// `role(uid)`: the principal's role name.
    Role(Box<Expr>),
}

/// Document path inside `get(...)` / `exists(...)`.
#[derive(Debug, Clone)]
pub struct DocPath(pub Vec<PathPart>);

#[derive(Debug, Clone)]
pub enum PathPart {
    Literal(String),
    Interp(Expr),
}

impl Expr {
    /// Root identifiers referenced anywhere in the expression.
    pub fn free_vars(&self) -> BTreeSet<String> {
        let mut out = BTreeSet::new();
        self.collect_vars(&mut out);
        out
    }

    fn collect_vars(&self, out: &mut BTreeSet<String>) {
        match self {
            Expr::Literal(_) => {}
            Expr::Var(name) => {
                out.insert(name.clone());
            }
            Expr::List(items) => items.iter().for_each(|e| e.collect_vars(out)),
            Expr::Field(inner, _)
            | Expr::Not(inner)
            | Expr::Matches(inner, _)
            | Expr::Size(inner)
            | Expr::Role(inner) => inner.collect_vars(out),
            Expr::Index(a, b) | Expr::And(a, b) | Expr::Or(a, b) | Expr::Binary(_, a, b) => {
                a.collect_vars(out);
                b.collect_vars(out);
            }
            Expr::Get(path) | Expr::Exists(path) => {
                for part in &path.0 {
                    if let PathPart::Interp(e) = part {
                        e.collect_vars(out);
                    }
                }
            }
        }
    }

    /// Upper bound on lookups a single evaluation of this expression can
    /// issue.
    pub fn lookup_sites(&self) -> usize {
        match self {
            Expr::Literal(_) | Expr::Var(_) => 0,
            Expr::List(items) => items.iter().map(Expr::lookup_sites).sum(),
            Expr::Field(inner, _) | Expr::Not(inner) | Expr::Matches(inner, _) | Expr::Size(inner) => {
                inner.lookup_sites()
            }
            Expr::Role(inner) => 1 + inner.lookup_sites(),
            Expr::Index(a, b) | Expr::And(a, b) | Expr::Or(a, b) | Expr::Binary(_, a, b) => {
                a.lookup_sites() + b.lookup_sites()
            }
            Expr::Get(path) | Expr::Exists(path) => {
                1 + path
                    .0
                    .iter()
                    .map(|p| match p {
                        PathPart::Interp(e) => e.lookup_sites(),
                        PathPart::Literal(_) => 0,
                    })
                    .sum::<usize>()
            }
        }
    }
}
