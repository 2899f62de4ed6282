//! Atomic Rule Engine (C4): evaluate every enabled atomic rule against one
//! device node's payload, producing the tick's `AtomicResult` set.
//!
//! Rules are independent of each other at this level — a failing or
//! timed-out rule is recorded and evaluation continues with the next one in
//! id order. There is no notion of rule priority or short-circuiting.

use std::collections::BTreeMap;

use crate::evaluator;
use crate::types::{AtomicResult, AtomicRule, WorldPayload};

const DEFAULT_DEADLINE_MS: u64 = 50;

/// Evaluate every enabled rule in `rules` against `payload`, in ascending id
/// order, keyed by rule id. Rules are assumed pre-sorted by caller or are
/// sorted here defensively.
pub fn evaluate_node(
    payload: &WorldPayload,
    rules: &[AtomicRule],
    deadline_ms: u64,
) -> BTreeMap<String, AtomicResult> {
    let mut enabled: Vec<&AtomicRule> = rules.iter().filter(|r| r.enabled).collect();
    enabled.sort_by(|a, b| a.id.cmp(&b.id));

    enabled
        .into_iter()
        .map(|rule| {
            let outcome = evaluator::evaluate(&rule.code, payload, deadline_ms);
            let result = AtomicResult {
                action: outcome.action,
                socket_type: rule.socket_type,
                reads: rule.reads.clone(),
                produces: rule.produces.clone(),
                execution_ms: outcome.execution_ms,
                success: outcome.success,
                error: outcome.error,
            };
            (rule.id.clone(), result)
        })
        .collect()
}

/// Merge a single device node's results into the tick-wide snapshot map,
/// keyed `nodeId::ruleId` as the published `ResultSnapshot.atomic_results`
/// contract requires.
pub fn merge_into_snapshot(
    snapshot: &mut BTreeMap<String, AtomicResult>,
    node_id: &str,
    node_results: BTreeMap<String, AtomicResult>,
) {
    for (rule_id, result) in node_results {
        snapshot.insert(format!("{node_id}::{rule_id}"), result);
    }
}

pub fn default_deadline_ms() -> u64 {
    DEFAULT_DEADLINE_MS
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SocketType;
    use chrono::Utc;

    fn rule(id: &str, code: &str, enabled: bool) -> AtomicRule {
        AtomicRule {
            id: id.to_string(),
            name: id.to_string(),
            description: String::new(),
            socket_type: SocketType::AnyBoolean,
            reads: Vec::new(),
            produces: Vec::new(),
            code: code.to_string(),
            enabled,
            created_at: Utc::now(),
            created_by: "test".to_string(),
            prompt: None,
            tags: None,
        }
    }

    #[test]
    fn disabled_rules_are_skipped() {
        let payload = WorldPayload::dry_run_fixture();
        let rules = vec![rule("a", "return { action: \"pass\" };", false)];
        let results = evaluate_node(&payload, &rules, 50);
        assert!(results.is_empty());
    }

    #[test]
    fn one_failing_rule_does_not_affect_others() {
        let payload = WorldPayload::dry_run_fixture();
        let rules = vec![
            rule("broken", "if (true return 1;", true),
            rule("ok", "return { action: \"pass\" };", true),
        ];
        let results = evaluate_node(&payload, &rules, 50);
        assert!(!results["broken"].success);
        assert!(results["ok"].success);
    }

    #[test]
    fn offline_payload_missing_fields_default_rather_than_error() {
        let payload = WorldPayload::sentinel("jetson-1");
        let rules = vec![rule(
            "defect_rate",
            r#"if (payload.stats.defects_per_hour > 10) return { action: "alert" }; return { action: "pass" };"#,
            true,
        )];
        let results = evaluate_node(&payload, &rules, 50);
        assert!(results["defect_rate"].success);
        assert!(results["defect_rate"]
            .error
            .as_ref()
            .map(|e| !e.contains("network"))
            .unwrap_or(true));
    }

    #[test]
    fn merge_uses_compound_key() {
        let payload = WorldPayload::dry_run_fixture();
        let rules = vec![rule("scratch", "return { action: \"reject\" };", true)];
        let node_results = evaluate_node(&payload, &rules, 50);
        let mut snapshot = BTreeMap::new();
        merge_into_snapshot(&mut snapshot, "jetson-1", node_results);
        assert!(snapshot.contains_key("jetson-1::scratch"));
    }
}
