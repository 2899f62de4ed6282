//! Abstract syntax tree for the atomic-rule language.
//!
//! This is a deliberately small subset of JavaScript expression/statement
//! syntax: `if`/`return` control flow, object literals, member/index access,
//! arithmetic/comparison/logical operators, and a closed set of array
//! methods (`some`, `every`, `filter`, `map`, `find`) driven by single-param
//! arrow functions. There is no loop, assignment, function declaration, or
//! module syntax — those are simply not part of the grammar, which is what
//! gives the sandbox its capability restriction (see `interpreter`).

use std::collections::BTreeSet;

#[derive(Debug, Clone, PartialEq)]
#[non_exhaustive]
pub struct Program {
    pub statements: Vec<Stmt>,
}

#[derive(Debug, Clone, PartialEq)]
#[non_exhaustive]
pub enum Stmt {
    If {
        cond: Expr,
        then_branch: Box<Stmt>,
        else_branch: Option<Box<Stmt>>,
    },
    Return(Expr),
    Block(Vec<Stmt>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum LogicalOp {
    And,
    Or,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum UnaryOp {
    Not,
    Neg,
}

#[derive(Debug, Clone, PartialEq)]
#[non_exhaustive]
pub enum Expr {
    Number(f64),
    Str(String),
    Bool(bool),
    Null,
    /// Bare identifier: `payload`, or an arrow-function parameter in scope.
    Ident(String),
    Member {
        object: Box<Expr>,
        property: String,
    },
    Index {
        object: Box<Expr>,
        index: Box<Expr>,
    },
    Unary {
        op: UnaryOp,
        expr: Box<Expr>,
    },
    Binary {
        op: BinOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Logical {
        op: LogicalOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Conditional {
        cond: Box<Expr>,
        then_expr: Box<Expr>,
        else_expr: Box<Expr>,
    },
    /// `callee(args...)`. `callee` is either `Ident("Math")` member access
    /// (`Math.min(a, b)`) or a method call on an array-valued expression
    /// (`payload.detections.some(...)`).
    Call {
        callee: Box<Expr>,
        args: Vec<Expr>,
    },
    /// `param => body` — only valid as the sole argument of an array method.
    Arrow {
        param: String,
        body: Box<Expr>,
    },
    Object(Vec<(String, Expr)>),
}

impl Program {
    /// Enumerate every distinct `payload.<path>` access the code performs,
    /// in source order. Used by the rule store (C2) to stamp `reads` and by
    /// the socket registry (C11) to infer `socket_type`.
    pub fn reads(&self) -> Vec<String> {
        let mut out = Vec::new();
        let mut seen = BTreeSet::new();
        for stmt in &self.statements {
            collect_reads_stmt(stmt, &mut out, &mut seen);
        }
        out
    }

    /// Enumerate every distinct `action` literal returned by an object
    /// literal containing an `action` field with a string-literal value.
    pub fn produces(&self) -> Vec<String> {
        let mut out = Vec::new();
        let mut seen = BTreeSet::new();
        for stmt in &self.statements {
            collect_produces_stmt(stmt, &mut out, &mut seen);
        }
        out
    }
}

fn collect_reads_stmt(stmt: &Stmt, out: &mut Vec<String>, seen: &mut BTreeSet<String>) {
    match stmt {
        Stmt::If {
            cond,
            then_branch,
            else_branch,
        } => {
            collect_reads_expr(cond, out, seen);
            collect_reads_stmt(then_branch, out, seen);
            if let Some(e) = else_branch {
                collect_reads_stmt(e, out, seen);
            }
        }
        Stmt::Return(expr) => collect_reads_expr(expr, out, seen),
        Stmt::Block(stmts) => {
            for s in stmts {
                collect_reads_stmt(s, out, seen);
            }
        }
    }
}

/// Walk a member-access chain rooted at `payload`, returning the dotted path
/// (e.g. `payload.stats.defects_per_hour`) if the chain is rooted there.
fn path_of(expr: &Expr) -> Option<String> {
    match expr {
        Expr::Ident(name) if name == "payload" => Some("payload".to_string()),
        Expr::Member { object, property } => {
            let base = path_of(object)?;
            Some(format!("{base}.{property}"))
        }
        Expr::Index { object, .. } => path_of(object),
        _ => None,
    }
}

fn collect_reads_expr(expr: &Expr, out: &mut Vec<String>, seen: &mut BTreeSet<String>) {
    if let Some(path) = path_of(expr) {
        if path != "payload" && seen.insert(path.clone()) {
            out.push(path);
        }
    }
    match expr {
        Expr::Member { object, .. } => collect_reads_expr(object, out, seen),
        Expr::Index { object, index } => {
            collect_reads_expr(object, out, seen);
            collect_reads_expr(index, out, seen);
        }
        Expr::Unary { expr, .. } => collect_reads_expr(expr, out, seen),
        Expr::Binary { left, right, .. } | Expr::Logical { left, right, .. } => {
            collect_reads_expr(left, out, seen);
            collect_reads_expr(right, out, seen);
        }
        Expr::Conditional {
            cond,
            then_expr,
            else_expr,
        } => {
            collect_reads_expr(cond, out, seen);
            collect_reads_expr(then_expr, out, seen);
            collect_reads_expr(else_expr, out, seen);
        }
        Expr::Call { callee, args } => {
            collect_reads_expr(callee, out, seen);
            for a in args {
                collect_reads_expr(a, out, seen);
            }
        }
        Expr::Arrow { body, .. } => collect_reads_expr(body, out, seen),
        Expr::Object(fields) => {
            for (_, v) in fields {
                collect_reads_expr(v, out, seen);
            }
        }
        Expr::Number(_) | Expr::Str(_) | Expr::Bool(_) | Expr::Null | Expr::Ident(_) => {}
    }
}

fn collect_produces_stmt(stmt: &Stmt, out: &mut Vec<String>, seen: &mut BTreeSet<String>) {
    match stmt {
        Stmt::If {
            then_branch,
            else_branch,
            ..
        } => {
            collect_produces_stmt(then_branch, out, seen);
            if let Some(e) = else_branch {
                collect_produces_stmt(e, out, seen);
            }
        }
        Stmt::Return(expr) => collect_produces_expr(expr, out, seen),
        Stmt::Block(stmts) => {
            for s in stmts {
                collect_produces_stmt(s, out, seen);
            }
        }
    }
}

fn collect_produces_expr(expr: &Expr, out: &mut Vec<String>, seen: &mut BTreeSet<String>) {
    if let Expr::Object(fields) = expr {
        for (key, value) in fields {
            if key == "action" {
                if let Expr::Str(s) = value {
                    if seen.insert(s.clone()) {
                        out.push(s.clone());
                    }
                }
            }
        }
    }
    if let Expr::Conditional {
        then_expr,
        else_expr,
        ..
    } = expr
    {
        collect_produces_expr(then_expr, out, seen);
        collect_produces_expr(else_expr, out, seen);
    }
}
