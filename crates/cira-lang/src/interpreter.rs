//! Tree-walking evaluator for a parsed [`Program`].
//!
//! The evaluator enforces its sandbox by construction rather than by
//! runtime capability revocation: the only
//! bound name is `payload` (plus arrow-function parameters the program
//! itself introduces), there is no way to reach the host clock, filesystem,
//! network, or a module loader because those identifiers are simply
//! undefined — referencing one is an [`EvalError::UnknownIdentifier`].
//!
//! Termination is guaranteed by a fuel counter decremented once per AST node
//! visited, which makes "timeout" deterministic and reproducible instead of
//! racing a wall clock.

use std::collections::BTreeMap;

use crate::ast::{BinOp, Expr, LogicalOp, Program, Stmt, UnaryOp};
use crate::error::EvalError;

/// Default fuel budget — generous enough for any realistic rule, small
/// enough that a pathological `&&`/ternary bomb still terminates fast.
pub const DEFAULT_FUEL: u64 = 100_000;

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(untagged)]
pub enum Value {
    Number(f64),
    Str(String),
    Bool(bool),
    Null,
    Array(Vec<Value>),
    Object(BTreeMap<String, Value>),
}

impl Value {
    pub fn as_bool(&self) -> bool {
        match self {
            Value::Bool(b) => *b,
            Value::Null => false,
            Value::Number(n) => *n != 0.0,
            Value::Str(s) => !s.is_empty(),
            Value::Array(a) => !a.is_empty(),
            Value::Object(_) => true,
        }
    }

    /// A missing payload path resolves to `Null` via [`Value::get`]; treating
    /// it as `0` here lets a threshold comparison on an absent field fail
    /// closed instead of erroring out the whole rule.
    fn as_number(&self) -> Result<f64, EvalError> {
        match self {
            Value::Number(n) => Ok(*n),
            Value::Null => Ok(0.0),
            other => Err(EvalError::Type(format!("expected number, got {other:?}"))),
        }
    }

    /// Same defaulting as [`Value::as_number`], for array methods called on
    /// an absent field.
    fn as_array(&self) -> Result<&[Value], EvalError> {
        match self {
            Value::Array(a) => Ok(a),
            Value::Null => Ok(&[]),
            other => Err(EvalError::Type(format!("expected array, got {other:?}"))),
        }
    }

    fn get(&self, key: &str) -> Value {
        match self {
            Value::Object(map) => map.get(key).cloned().unwrap_or(Value::Null),
            Value::Array(items) if key == "length" => Value::Number(items.len() as f64),
            Value::Str(s) if key == "length" => Value::Number(s.chars().count() as f64),
            _ => Value::Null,
        }
    }
}

impl From<serde_json::Value> for Value {
    fn from(v: serde_json::Value) -> Self {
        match v {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => Value::Number(n.as_f64().unwrap_or(f64::NAN)),
            serde_json::Value::String(s) => Value::Str(s),
            serde_json::Value::Array(items) => {
                Value::Array(items.into_iter().map(Value::from).collect())
            }
            serde_json::Value::Object(map) => {
                Value::Object(map.into_iter().map(|(k, v)| (k, Value::from(v))).collect())
            }
        }
    }
}

struct Scope {
    payload: Value,
    /// Arrow-parameter bindings, innermost last.
    locals: Vec<(String, Value)>,
    fuel: u64,
}

impl Scope {
    fn tick(&mut self) -> Result<(), EvalError> {
        if self.fuel == 0 {
            return Err(EvalError::Timeout);
        }
        self.fuel -= 1;
        Ok(())
    }

    fn resolve(&self, name: &str) -> Result<Value, EvalError> {
        if name == "payload" {
            return Ok(self.payload.clone());
        }
        for (bound, value) in self.locals.iter().rev() {
            if bound == name {
                return Ok(value.clone());
            }
        }
        Err(EvalError::UnknownIdentifier(name.to_string()))
    }
}

/// Evaluate `program` against `payload`, returning the value of the first
/// `return` statement reached, or [`EvalError::NoReturn`] if control falls
/// off the end without one.
pub fn evaluate(program: &Program, payload: Value, fuel: u64) -> Result<Value, EvalError> {
    let mut scope = Scope {
        payload,
        locals: Vec::new(),
        fuel,
    };
    for stmt in &program.statements {
        if let Some(value) = exec_stmt(stmt, &mut scope)? {
            return Ok(value);
        }
    }
    Err(EvalError::NoReturn)
}

/// Execute one statement. `Ok(Some(v))` means a `return v` was hit.
fn exec_stmt(stmt: &Stmt, scope: &mut Scope) -> Result<Option<Value>, EvalError> {
    scope.tick()?;
    match stmt {
        Stmt::Return(expr) => Ok(Some(eval_expr(expr, scope)?)),
        Stmt::Block(stmts) => {
            for s in stmts {
                if let Some(v) = exec_stmt(s, scope)? {
                    return Ok(Some(v));
                }
            }
            Ok(None)
        }
        Stmt::If {
            cond,
            then_branch,
            else_branch,
        } => {
            if eval_expr(cond, scope)?.as_bool() {
                exec_stmt(then_branch, scope)
            } else if let Some(else_branch) = else_branch {
                exec_stmt(else_branch, scope)
            } else {
                Ok(None)
            }
        }
    }
}

fn eval_expr(expr: &Expr, scope: &mut Scope) -> Result<Value, EvalError> {
    scope.tick()?;
    match expr {
        Expr::Number(n) => Ok(Value::Number(*n)),
        Expr::Str(s) => Ok(Value::Str(s.clone())),
        Expr::Bool(b) => Ok(Value::Bool(*b)),
        Expr::Null => Ok(Value::Null),
        Expr::Ident(name) => scope.resolve(name),
        Expr::Member { object, property } => {
            if let Expr::Ident(ns) = object.as_ref() {
                if ns == "Math" {
                    return Err(EvalError::UnknownIdentifier(format!("Math.{property}")));
                }
            }
            let base = eval_expr(object, scope)?;
            Ok(base.get(property))
        }
        Expr::Index { object, index } => {
            let base = eval_expr(object, scope)?;
            let idx = eval_expr(index, scope)?;
            match (&base, &idx) {
                (Value::Array(items), Value::Number(n)) => {
                    let i = *n as usize;
                    Ok(items.get(i).cloned().unwrap_or(Value::Null))
                }
                (Value::Object(_), Value::Str(key)) => Ok(base.get(key)),
                _ => Err(EvalError::Type("invalid index access".to_string())),
            }
        }
        Expr::Unary { op, expr } => {
            let value = eval_expr(expr, scope)?;
            match op {
                UnaryOp::Not => Ok(Value::Bool(!value.as_bool())),
                UnaryOp::Neg => Ok(Value::Number(-value.as_number()?)),
            }
        }
        Expr::Binary { op, left, right } => {
            let l = eval_expr(left, scope)?;
            let r = eval_expr(right, scope)?;
            eval_binary(*op, l, r)
        }
        Expr::Logical { op, left, right } => {
            let l = eval_expr(left, scope)?;
            match op {
                LogicalOp::And => {
                    if !l.as_bool() {
                        Ok(l)
                    } else {
                        eval_expr(right, scope)
                    }
                }
                LogicalOp::Or => {
                    if l.as_bool() {
                        Ok(l)
                    } else {
                        eval_expr(right, scope)
                    }
                }
            }
        }
        Expr::Conditional {
            cond,
            then_expr,
            else_expr,
        } => {
            if eval_expr(cond, scope)?.as_bool() {
                eval_expr(then_expr, scope)
            } else {
                eval_expr(else_expr, scope)
            }
        }
        Expr::Call { callee, args } => eval_call(callee, args, scope),
        Expr::Arrow { .. } => Err(EvalError::Type(
            "arrow function used outside an array method call".to_string(),
        )),
        Expr::Object(fields) => {
            let mut map = BTreeMap::new();
            for (key, value_expr) in fields {
                map.insert(key.clone(), eval_expr(value_expr, scope)?);
            }
            Ok(Value::Object(map))
        }
    }
}

fn eval_binary(op: BinOp, l: Value, r: Value) -> Result<Value, EvalError> {
    match op {
        BinOp::Eq => Ok(Value::Bool(values_equal(&l, &r))),
        BinOp::Ne => Ok(Value::Bool(!values_equal(&l, &r))),
        BinOp::Add => match (&l, &r) {
            (Value::Str(a), Value::Str(b)) => Ok(Value::Str(format!("{a}{b}"))),
            _ => Ok(Value::Number(l.as_number()? + r.as_number()?)),
        },
        BinOp::Sub => Ok(Value::Number(l.as_number()? - r.as_number()?)),
        BinOp::Mul => Ok(Value::Number(l.as_number()? * r.as_number()?)),
        BinOp::Div => {
            let (a, b) = (l.as_number()?, r.as_number()?);
            if b == 0.0 {
                return Err(EvalError::DivByZero);
            }
            Ok(Value::Number(a / b))
        }
        BinOp::Mod => {
            let (a, b) = (l.as_number()?, r.as_number()?);
            if b == 0.0 {
                return Err(EvalError::DivByZero);
            }
            Ok(Value::Number(a % b))
        }
        BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge => {
            let (a, b) = (l.as_number()?, r.as_number()?);
            let result = match op {
                BinOp::Lt => a < b,
                BinOp::Le => a <= b,
                BinOp::Gt => a > b,
                BinOp::Ge => a >= b,
                _ => unreachable!(),
            };
            Ok(Value::Bool(result))
        }
    }
}

fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x == y,
        (Value::Str(x), Value::Str(y)) => x == y,
        (Value::Bool(x), Value::Bool(y)) => x == y,
        (Value::Null, Value::Null) => true,
        _ => false,
    }
}

const ARRAY_METHODS: &[&str] = &["some", "every", "filter", "map", "find"];

fn eval_call(callee: &Expr, args: &[Expr], scope: &mut Scope) -> Result<Value, EvalError> {
    if let Expr::Member { object, property } = callee {
        if let Expr::Ident(ns) = object.as_ref() {
            if ns == "Math" {
                return eval_math_call(property, args, scope);
            }
        }
        if ARRAY_METHODS.contains(&property.as_str()) {
            let base = eval_expr(object, scope)?;
            let items = base.as_array()?.to_vec();
            let Some(Expr::Arrow { param, body }) = args.first() else {
                return Err(EvalError::Type(format!(
                    "{property}() requires a single arrow-function argument"
                )));
            };
            return eval_array_method(property, param, body, items, scope);
        }
        return Err(EvalError::UnknownIdentifier(format!(
            "<expr>.{property}(...)"
        )));
    }
    Err(EvalError::Type("unsupported call expression".to_string()))
}

fn eval_array_method(
    method: &str,
    param: &str,
    body: &Expr,
    items: Vec<Value>,
    scope: &mut Scope,
) -> Result<Value, EvalError> {
    match method {
        "some" => {
            for item in items {
                scope.locals.push((param.to_string(), item));
                let result = eval_expr(body, scope)?.as_bool();
                scope.locals.pop();
                if result {
                    return Ok(Value::Bool(true));
                }
            }
            Ok(Value::Bool(false))
        }
        "every" => {
            for item in items {
                scope.locals.push((param.to_string(), item));
                let result = eval_expr(body, scope)?.as_bool();
                scope.locals.pop();
                if !result {
                    return Ok(Value::Bool(false));
                }
            }
            Ok(Value::Bool(true))
        }
        "filter" => {
            let mut out = Vec::new();
            for item in items {
                scope.locals.push((param.to_string(), item.clone()));
                let keep = eval_expr(body, scope)?.as_bool();
                scope.locals.pop();
                if keep {
                    out.push(item);
                }
            }
            Ok(Value::Array(out))
        }
        "map" => {
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                scope.locals.push((param.to_string(), item));
                let mapped = eval_expr(body, scope)?;
                scope.locals.pop();
                out.push(mapped);
            }
            Ok(Value::Array(out))
        }
        "find" => {
            for item in items {
                scope.locals.push((param.to_string(), item.clone()));
                let matched = eval_expr(body, scope)?.as_bool();
                scope.locals.pop();
                if matched {
                    return Ok(item);
                }
            }
            Ok(Value::Null)
        }
        other => Err(EvalError::UnknownIdentifier(format!("Array.{other}"))),
    }
}

fn eval_math_call(name: &str, args: &[Expr], scope: &mut Scope) -> Result<Value, EvalError> {
    let mut values = Vec::with_capacity(args.len());
    for a in args {
        values.push(eval_expr(a, scope)?.as_number()?);
    }
    let result = match (name, values.as_slice()) {
        ("min", vs) if !vs.is_empty() => vs.iter().cloned().fold(f64::INFINITY, f64::min),
        ("max", vs) if !vs.is_empty() => vs.iter().cloned().fold(f64::NEG_INFINITY, f64::max),
        ("abs", [v]) => v.abs(),
        ("round", [v]) => v.round(),
        ("floor", [v]) => v.floor(),
        ("ceil", [v]) => v.ceil(),
        _ => {
            return Err(EvalError::UnknownIdentifier(format!(
                "Math.{name}({} args)",
                args.len()
            )));
        }
    };
    Ok(Value::Number(result))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse;

    fn payload_with(defects_per_hour: f64) -> Value {
        let json = serde_json::json!({
            "stats": { "defects_per_hour": defects_per_hour },
            "detections": [],
        });
        Value::from(json)
    }

    #[test]
    fn evaluates_threshold_rule() {
        let program = parse(
            r#"if (payload.stats.defects_per_hour > 10) return { action: "alert" };
               return { action: "pass" };"#,
        )
        .unwrap();
        let result = evaluate(&program, payload_with(15.0), DEFAULT_FUEL).unwrap();
        assert_eq!(result.get("action"), Value::Str("alert".to_string()));

        let result = evaluate(&program, payload_with(1.0), DEFAULT_FUEL).unwrap();
        assert_eq!(result.get("action"), Value::Str("pass".to_string()));
    }

    #[test]
    fn evaluation_is_deterministic() {
        let program = parse("return { action: \"reject\" };").unwrap();
        let a = evaluate(&program, Value::Null, DEFAULT_FUEL).unwrap();
        let b = evaluate(&program, Value::Null, DEFAULT_FUEL).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn clock_access_is_unknown_identifier() {
        let program = parse("return Date.now();").unwrap();
        let err = evaluate(&program, Value::Null, DEFAULT_FUEL).unwrap_err();
        assert!(matches!(err, EvalError::UnknownIdentifier(_)));
    }

    #[test]
    fn array_some_detects_label() {
        let json = serde_json::json!({
            "detections": [{"label": "scratch", "confidence": 0.9}],
        });
        let program =
            parse(r#"return { action: payload.detections.some(d => d.label == "scratch") ? "reject" : "pass" };"#)
                .unwrap();
        let result = evaluate(&program, Value::from(json), DEFAULT_FUEL).unwrap();
        assert_eq!(result.get("action"), Value::Str("reject".to_string()));
    }

    #[test]
    fn missing_numeric_field_defaults_to_zero() {
        let json = serde_json::json!({ "stats": {} });
        let program = parse(
            r#"if (payload.stats.defects_per_hour > 10) return { action: "alert" };
               return { action: "pass" };"#,
        )
        .unwrap();
        let result = evaluate(&program, Value::from(json), DEFAULT_FUEL).unwrap();
        assert_eq!(result.get("action"), Value::Str("pass".to_string()));
    }

    #[test]
    fn missing_array_field_defaults_to_empty() {
        let json = serde_json::json!({});
        let program = parse(
            r#"return { action: payload.detections.some(d => d.label == "scratch") ? "reject" : "pass" };"#,
        )
        .unwrap();
        let result = evaluate(&program, Value::from(json), DEFAULT_FUEL).unwrap();
        assert_eq!(result.get("action"), Value::Str("pass".to_string()));
    }

    #[test]
    fn exhausted_fuel_times_out() {
        // Deeply nested ternary forces many node visits relative to a tiny budget.
        let mut src = String::from("return ");
        for _ in 0..50 {
            src.push_str("true ? (");
        }
        src.push('1');
        for _ in 0..50 {
            src.push(')');
        }
        src.push_str(" : 0;");
        let program = parse(&src).unwrap();
        let err = evaluate(&program, Value::Null, 10).unwrap_err();
        assert_eq!(err, EvalError::Timeout);
    }
}
