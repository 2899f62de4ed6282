//! Sandboxed Evaluator (C3): execute one atomic rule's code against one
//! [`WorldPayload`], producing an [`ActionVerdict`] or a typed error, within
//! a hard deadline.
//!
//! Termination is guaranteed by `cira_lang`'s fuel counter rather than a
//! wall clock: `deadline_ms` is converted to a fuel budget at a fixed rate,
//! so the same code against the same payload always does the same amount
//! of work before either returning or running out of fuel.

use std::time::Instant;

use cira_lang::{EvalError, Value};

use crate::types::{ActionKind, ActionVerdict, Severity, WorldPayload};

/// AST nodes of fuel burned per millisecond of deadline. Chosen generously:
/// a 50ms default deadline budgets 100,000 node visits, comfortably above
/// what any legitimate rule needs and well below what hangs a tick.
const FUEL_PER_MS: u64 = 2_000;

pub struct EvalOutcome {
    pub success: bool,
    pub action: Option<ActionVerdict>,
    pub error: Option<String>,
    pub execution_ms: u64,
}

impl EvalOutcome {
    fn failure(error: impl Into<String>, execution_ms: u64) -> Self {
        Self {
            success: false,
            action: None,
            error: Some(error.into()),
            execution_ms,
        }
    }
}

fn elapsed_ms(start: Instant) -> u64 {
    start.elapsed().as_millis() as u64
}

/// Evaluate `code` against `payload`, enforcing `deadline_ms`.
pub fn evaluate(code: &str, payload: &WorldPayload, deadline_ms: u64) -> EvalOutcome {
    let start = Instant::now();
    let program = match cira_lang::parse(code) {
        Ok(p) => p,
        Err(e) => return EvalOutcome::failure(e.to_string(), elapsed_ms(start)),
    };

    let fuel = deadline_ms.saturating_mul(FUEL_PER_MS).max(1);
    let payload_value = Value::from(payload.to_json());

    match cira_lang::evaluate(&program, payload_value, fuel) {
        Ok(result) => match verdict_from_value(&result) {
            Some(verdict) => EvalOutcome {
                success: true,
                action: Some(verdict),
                error: None,
                execution_ms: elapsed_ms(start),
            },
            None => EvalOutcome::failure("invalid verdict", elapsed_ms(start)),
        },
        Err(EvalError::Timeout) => EvalOutcome::failure("timeout", deadline_ms),
        Err(e) => EvalOutcome::failure(e.to_string(), elapsed_ms(start)),
    }
}

/// Validate a rule's code at save time against the literal dry-run fixture.
pub fn dry_run(code: &str, deadline_ms: u64) -> Result<(), String> {
    let payload = WorldPayload::dry_run_fixture();
    let outcome = evaluate(code, &payload, deadline_ms);
    if outcome.success {
        Ok(())
    } else {
        Err(outcome.error.unwrap_or_else(|| "dry run failed".to_string()))
    }
}

fn verdict_from_value(value: &Value) -> Option<ActionVerdict> {
    let Value::Object(map) = value else {
        return None;
    };
    let action_str = match map.get("action") {
        Some(Value::Str(s)) => s.as_str(),
        _ => return None,
    };
    let action = ActionKind::from_str(action_str)?;

    let severity = match map.get("severity") {
        Some(Value::Str(s)) => severity_from_str(s),
        _ => None,
    };
    let message = match map.get("message") {
        Some(Value::Str(s)) => Some(s.clone()),
        _ => None,
    };
    let register = match map.get("register") {
        Some(Value::Number(n)) => Some(*n as u32),
        _ => None,
    };
    let verdict_value = match map.get("value") {
        Some(Value::Number(n)) => Some(*n as i64),
        _ => None,
    };
    let reason = match map.get("reason") {
        Some(Value::Str(s)) => Some(s.clone()),
        _ => None,
    };

    Some(ActionVerdict {
        action,
        severity,
        message,
        register,
        value: verdict_value,
        reason,
    })
}

fn severity_from_str(s: &str) -> Option<Severity> {
    match s {
        "info" => Some(Severity::Info),
        "warning" => Some(Severity::Warning),
        "critical" => Some(Severity::Critical),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::NodeStatus;

    #[test]
    fn deterministic_evaluation() {
        let payload = WorldPayload::dry_run_fixture();
        let code = r#"if (payload.stats.defects_per_hour > 10) return { action: "alert" }; return { action: "pass" };"#;
        let a = evaluate(code, &payload, 50);
        let b = evaluate(code, &payload, 50);
        assert_eq!(a.success, b.success);
        assert_eq!(a.action, b.action);
    }

    #[test]
    fn pass_is_not_triggered_but_is_success() {
        let payload = WorldPayload::dry_run_fixture();
        let outcome = evaluate("return { action: \"pass\" };", &payload, 50);
        assert!(outcome.success);
        assert_eq!(outcome.action.unwrap().action, ActionKind::Pass);
    }

    #[test]
    fn clock_access_fails_as_sandbox_error() {
        let payload = WorldPayload::dry_run_fixture();
        let outcome = evaluate("return Date.now();", &payload, 50);
        assert!(!outcome.success);
        assert!(outcome.error.unwrap().contains("unknown identifier"));
    }

    #[test]
    fn malformed_verdict_is_rejected() {
        let payload = WorldPayload::dry_run_fixture();
        let outcome = evaluate("return { severity: \"info\" };", &payload, 50);
        assert!(!outcome.success);
        assert_eq!(outcome.error.unwrap(), "invalid verdict");
    }

    #[test]
    fn dry_run_accepts_simple_reject() {
        assert!(dry_run("return { action: \"reject\" };", 50).is_ok());
    }

    #[test]
    fn dry_run_rejects_parse_error() {
        assert!(dry_run("if (true return 1;", 50).is_err());
    }

    #[test]
    fn missing_field_defaults_rather_than_errors() {
        // dry_run_fixture has no `mystery` field; accessing it yields `null`
        // which is falsy, not a SandboxError.
        let payload = WorldPayload::dry_run_fixture();
        let outcome = evaluate(
            r#"if (payload.mystery) return { action: "alert" }; return { action: "pass" };"#,
            &payload,
            50,
        );
        assert!(outcome.success);
        assert_eq!(outcome.action.unwrap().action, ActionKind::Pass);
    }

    #[test]
    fn missing_field_numeric_comparison_defaults_to_zero() {
        let payload = WorldPayload::dry_run_fixture();
        let outcome = evaluate(
            r#"if (payload.mystery.count > 10) return { action: "alert" }; return { action: "pass" };"#,
            &payload,
            50,
        );
        assert!(outcome.success);
        assert_eq!(outcome.action.unwrap().action, ActionKind::Pass);
    }

    #[test]
    fn missing_field_array_method_defaults_to_empty() {
        let payload = WorldPayload::dry_run_fixture();
        let outcome = evaluate(
            r#"return { action: payload.mystery.items.some(i => i.label == "x") ? "reject" : "pass" };"#,
            &payload,
            50,
        );
        assert!(outcome.success);
        assert_eq!(outcome.action.unwrap().action, ActionKind::Pass);
    }

    #[test]
    fn offline_node_status_is_observable() {
        let payload = WorldPayload::sentinel("jetson-1");
        assert_eq!(payload.node.status, NodeStatus::Offline);
        let outcome = evaluate(
            r#"if (payload.node.status == "offline") return { action: "alert" }; return { action: "pass" };"#,
            &payload,
            50,
        );
        assert!(outcome.success);
        assert_eq!(outcome.action.unwrap().action, ActionKind::Alert);
    }
}
