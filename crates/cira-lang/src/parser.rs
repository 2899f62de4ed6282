//! Recursive-descent parser for the atomic-rule language, built on `winnow`
//! combinators in the same style as the `.ws`/`.wfl` parsers this crate is
//! descended from: small `ModalResult`-returning functions, `ws_skip`
//! between tokens, `cut_err` once a production has committed.

use winnow::ascii::multispace0;
use winnow::combinator::{alt, cut_err, delimited, opt, preceded, repeat, separated, terminated};
use winnow::error::{ContextError, ErrMode, StrContext, StrContextValue};
use winnow::prelude::*;
use winnow::token::{literal, take_while};

use crate::ast::{BinOp, Expr, LogicalOp, Program, Stmt, UnaryOp};
use crate::error::ParseError;

/// Parse a complete rule source file into a [`Program`].
pub fn parse(input: &str) -> Result<Program, ParseError> {
    let mut src = input;
    let statements = program
        .parse(&mut src)
        .map_err(|e| ParseError(e.to_string()))?;
    Ok(Program { statements })
}

fn program(input: &mut &str) -> ModalResult<Vec<Stmt>> {
    ws_skip.parse_next(input)?;
    let stmts = repeat(0.., terminated(stmt, ws_skip)).parse_next(input)?;
    Ok(stmts)
}

// ---------------------------------------------------------------------------
// Whitespace & lexical primitives
// ---------------------------------------------------------------------------

fn ws_skip(input: &mut &str) -> ModalResult<()> {
    loop {
        let _ = multispace0.parse_next(input)?;
        if opt(literal("//")).parse_next(input)?.is_some() {
            let _ = take_while(0.., |c: char| c != '\n').parse_next(input)?;
            continue;
        }
        break;
    }
    Ok(())
}

fn tok<'a, O>(
    mut inner: impl winnow::Parser<&'a str, O, ErrMode<ContextError>>,
) -> impl winnow::Parser<&'a str, O, ErrMode<ContextError>> {
    move |input: &mut &'a str| {
        let out = inner.parse_next(input)?;
        ws_skip.parse_next(input)?;
        Ok(out)
    }
}

fn kw<'a>(word: &'static str) -> impl winnow::Parser<&'a str, &'a str, ErrMode<ContextError>> {
    tok(literal(word))
}

fn ident(input: &mut &str) -> ModalResult<String> {
    let saved = *input;
    let _ = take_while(1.., |c: char| c.is_ascii_alphabetic() || c == '_').parse_next(input)?;
    let _ = take_while(0.., |c: char| c.is_ascii_alphanumeric() || c == '_').parse_next(input)?;
    let consumed = &saved[..saved.len() - input.len()];
    Ok(consumed.to_string())
}

fn identifier(input: &mut &str) -> ModalResult<String> {
    tok(ident).parse_next(input)
}

fn number_literal(input: &mut &str) -> ModalResult<f64> {
    let integer_part = take_while(1.., |c: char| c.is_ascii_digit()).parse_next(input)?;
    let has_dot = opt(literal(".")).parse_next(input)?.is_some();
    if has_dot {
        let frac_part = take_while(1.., |c: char| c.is_ascii_digit())
            .context(StrContext::Expected(StrContextValue::Description(
                "digits after decimal point",
            )))
            .parse_next(input)?;
        let s = format!("{integer_part}.{frac_part}");
        s.parse::<f64>().map_err(|_| ErrMode::Cut(ContextError::new()))
    } else {
        integer_part
            .parse::<f64>()
            .map_err(|_| ErrMode::Cut(ContextError::new()))
    }
}

fn string_literal(input: &mut &str) -> ModalResult<String> {
    let quote = alt((literal('"'), literal('\''))).parse_next(input)?;
    let content = take_while(0.., move |c: char| c != quote.chars().next().unwrap())
        .parse_next(input)?;
    cut_err(literal(quote))
        .context(StrContext::Expected(StrContextValue::Description(
            "closing quote",
        )))
        .parse_next(input)?;
    Ok(content.to_string())
}

// ---------------------------------------------------------------------------
// Statements
// ---------------------------------------------------------------------------

fn stmt(input: &mut &str) -> ModalResult<Stmt> {
    alt((if_stmt, block_stmt, return_stmt)).parse_next(input)
}

fn block_stmt(input: &mut &str) -> ModalResult<Stmt> {
    let stmts = delimited(
        tok(literal("{")),
        repeat(0.., terminated(stmt, ws_skip)),
        cut_err(tok(literal("}"))),
    )
    .parse_next(input)?;
    Ok(Stmt::Block(stmts))
}

fn if_stmt(input: &mut &str) -> ModalResult<Stmt> {
    kw("if").parse_next(input)?;
    let cond = delimited(cut_err(tok(literal("("))), expr, cut_err(tok(literal(")"))))
        .parse_next(input)?;
    let then_branch = cut_err(stmt).parse_next(input)?;
    let else_branch = opt(preceded(kw("else"), cut_err(stmt))).parse_next(input)?;
    Ok(Stmt::If {
        cond,
        then_branch: Box::new(then_branch),
        else_branch: else_branch.map(Box::new),
    })
}

fn return_stmt(input: &mut &str) -> ModalResult<Stmt> {
    kw("return").parse_next(input)?;
    let value = cut_err(expr).parse_next(input)?;
    let _ = opt(tok(literal(";"))).parse_next(input)?;
    Ok(Stmt::Return(value))
}

// ---------------------------------------------------------------------------
// Expressions — precedence climbing
// ---------------------------------------------------------------------------

fn expr(input: &mut &str) -> ModalResult<Expr> {
    conditional.parse_next(input)
}

fn conditional(input: &mut &str) -> ModalResult<Expr> {
    let cond = logical_or.parse_next(input)?;
    if opt(tok(literal("?"))).parse_next(input)?.is_some() {
        let then_expr = cut_err(expr).parse_next(input)?;
        cut_err(tok(literal(":"))).parse_next(input)?;
        let else_expr = cut_err(expr).parse_next(input)?;
        return Ok(Expr::Conditional {
            cond: Box::new(cond),
            then_expr: Box::new(then_expr),
            else_expr: Box::new(else_expr),
        });
    }
    Ok(cond)
}

fn logical_or(input: &mut &str) -> ModalResult<Expr> {
    let mut left = logical_and.parse_next(input)?;
    loop {
        if opt(tok(literal("||"))).parse_next(input)?.is_none() {
            break;
        }
        let right = cut_err(logical_and).parse_next(input)?;
        left = Expr::Logical {
            op: LogicalOp::Or,
            left: Box::new(left),
            right: Box::new(right),
        };
    }
    Ok(left)
}

fn logical_and(input: &mut &str) -> ModalResult<Expr> {
    let mut left = equality.parse_next(input)?;
    loop {
        if opt(tok(literal("&&"))).parse_next(input)?.is_none() {
            break;
        }
        let right = cut_err(equality).parse_next(input)?;
        left = Expr::Logical {
            op: LogicalOp::And,
            left: Box::new(left),
            right: Box::new(right),
        };
    }
    Ok(left)
}

fn equality(input: &mut &str) -> ModalResult<Expr> {
    let mut left = relational.parse_next(input)?;
    loop {
        let op = opt(alt((
            tok(literal("===")).value(BinOp::Eq),
            tok(literal("!==")).value(BinOp::Ne),
            tok(literal("==")).value(BinOp::Eq),
            tok(literal("!=")).value(BinOp::Ne),
        )))
        .parse_next(input)?;
        let Some(op) = op else { break };
        let right = cut_err(relational).parse_next(input)?;
        left = Expr::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
        };
    }
    Ok(left)
}

fn relational(input: &mut &str) -> ModalResult<Expr> {
    let mut left = additive.parse_next(input)?;
    loop {
        let op = opt(alt((
            tok(literal("<=")).value(BinOp::Le),
            tok(literal(">=")).value(BinOp::Ge),
            tok(literal("<")).value(BinOp::Lt),
            tok(literal(">")).value(BinOp::Gt),
        )))
        .parse_next(input)?;
        let Some(op) = op else { break };
        let right = cut_err(additive).parse_next(input)?;
        left = Expr::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
        };
    }
    Ok(left)
}

fn additive(input: &mut &str) -> ModalResult<Expr> {
    let mut left = multiplicative.parse_next(input)?;
    loop {
        let op = opt(alt((
            tok(literal("+")).value(BinOp::Add),
            tok(literal("-")).value(BinOp::Sub),
        )))
        .parse_next(input)?;
        let Some(op) = op else { break };
        let right = cut_err(multiplicative).parse_next(input)?;
        left = Expr::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
        };
    }
    Ok(left)
}

fn multiplicative(input: &mut &str) -> ModalResult<Expr> {
    let mut left = unary.parse_next(input)?;
    loop {
        let op = opt(alt((
            tok(literal("*")).value(BinOp::Mul),
            tok(literal("/")).value(BinOp::Div),
            tok(literal("%")).value(BinOp::Mod),
        )))
        .parse_next(input)?;
        let Some(op) = op else { break };
        let right = cut_err(unary).parse_next(input)?;
        left = Expr::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
        };
    }
    Ok(left)
}

fn unary(input: &mut &str) -> ModalResult<Expr> {
    if opt(tok(literal("!"))).parse_next(input)?.is_some() {
        let inner = cut_err(unary).parse_next(input)?;
        return Ok(Expr::Unary {
            op: UnaryOp::Not,
            expr: Box::new(inner),
        });
    }
    if opt(tok(literal("-"))).parse_next(input)?.is_some() {
        let inner = cut_err(unary).parse_next(input)?;
        return Ok(Expr::Unary {
            op: UnaryOp::Neg,
            expr: Box::new(inner),
        });
    }
    postfix.parse_next(input)
}

fn postfix(input: &mut &str) -> ModalResult<Expr> {
    let mut base = primary.parse_next(input)?;
    loop {
        if opt(tok(literal("."))).parse_next(input)?.is_some() {
            let name = cut_err(identifier).parse_next(input)?;
            if opt(tok(literal("("))).parse_next(input)?.is_some() {
                let args = call_args.parse_next(input)?;
                cut_err(tok(literal(")"))).parse_next(input)?;
                base = Expr::Call {
                    callee: Box::new(Expr::Member {
                        object: Box::new(base),
                        property: name,
                    }),
                    args,
                };
            } else {
                base = Expr::Member {
                    object: Box::new(base),
                    property: name,
                };
            }
            continue;
        }
        if opt(tok(literal("["))).parse_next(input)?.is_some() {
            let index = cut_err(expr).parse_next(input)?;
            cut_err(tok(literal("]"))).parse_next(input)?;
            base = Expr::Index {
                object: Box::new(base),
                index: Box::new(index),
            };
            continue;
        }
        break;
    }
    Ok(base)
}

fn call_args(input: &mut &str) -> ModalResult<Vec<Expr>> {
    separated(0.., call_arg, tok(literal(","))).parse_next(input)
}

/// A call argument is either an arrow function (only meaningful for array
/// methods) or an ordinary expression.
fn call_arg(input: &mut &str) -> ModalResult<Expr> {
    alt((arrow_fn, expr)).parse_next(input)
}

fn arrow_fn(input: &mut &str) -> ModalResult<Expr> {
    let param = identifier.parse_next(input)?;
    tok(literal("=>")).parse_next(input)?;
    let body = cut_err(expr).parse_next(input)?;
    Ok(Expr::Arrow {
        param,
        body: Box::new(body),
    })
}

fn primary(input: &mut &str) -> ModalResult<Expr> {
    ws_skip.parse_next(input)?;
    alt((
        object_literal,
        paren_expr,
        tok(literal("true")).value(Expr::Bool(true)),
        tok(literal("false")).value(Expr::Bool(false)),
        tok(literal("null")).value(Expr::Null),
        tok(string_literal).map(Expr::Str),
        tok(number_literal).map(Expr::Number),
        identifier.map(Expr::Ident),
    ))
    .parse_next(input)
}

fn paren_expr(input: &mut &str) -> ModalResult<Expr> {
    delimited(tok(literal("(")), expr, cut_err(tok(literal(")")))).parse_next(input)
}

fn object_literal(input: &mut &str) -> ModalResult<Expr> {
    let fields = delimited(
        tok(literal("{")),
        separated(0.., object_field, tok(literal(","))),
        cut_err(tok(literal("}"))),
    )
    .parse_next(input)?;
    Ok(Expr::Object(fields))
}

fn object_field(input: &mut &str) -> ModalResult<(String, Expr)> {
    let key = alt((identifier, tok(string_literal))).parse_next(input)?;
    cut_err(tok(literal(":"))).parse_next(input)?;
    let value = cut_err(expr).parse_next(input)?;
    Ok((key, value))
}
