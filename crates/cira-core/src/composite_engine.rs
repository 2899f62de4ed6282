//! Composite Rule Engine (C7): topological evaluation of a [`CompositeRule`]
//! graph, folding atomic verdicts, constants, thresholds, boolean gates and
//! stateful operators down to a single triggered/not-triggered verdict.
//!
//! Evaluated once per device node per tick; `atomic_results` is that node's
//! slice of the tick's atomic verdicts, keyed by bare rule id (the Atomic
//! Rule Engine's own output map uses the compound `nodeId::ruleId` key
//! required for the published snapshot, but a composite graph only ever
//! runs against one node's payload at a time).
//!
//! Node order is derived independently here (not reused from
//! `graph_validator`, which only needs *a* valid order to detect cycles):
//! Kahn's algorithm again, but this time the visitation order itself is the
//! product, not just a yes/no cycle check.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::time::Instant;

use chrono::{DateTime, Utc};

use crate::stateful_store::StatefulStore;
use crate::types::{
    ActionVerdict, AtomicResult, CompareOp, CompositeResult, CompositeRule, NodeData,
};

pub fn evaluate(
    rule: &CompositeRule,
    atomic_results: &BTreeMap<String, AtomicResult>,
    payload: &serde_json::Value,
    state: &mut StatefulStore,
    now: DateTime<Utc>,
) -> CompositeResult {
    let start = Instant::now();
    let order = match topological_order(rule) {
        Ok(order) => order,
        Err(e) => {
            return CompositeResult {
                triggered: false,
                action: None,
                node_results: BTreeMap::new(),
                success: false,
                error: Some(e),
                execution_ms: start.elapsed().as_millis() as u64,
            }
        }
    };

    let incoming = incoming_wires(rule);
    let mut node_results: BTreeMap<String, bool> = BTreeMap::new();
    let mut output_fired: Option<&ActionVerdict> = None;
    let mut error = None;

    'nodes: for node in &order {
        let inputs: Vec<bool> = incoming
            .get(node.id.as_str())
            .into_iter()
            .flatten()
            .map(|src| node_results.get(*src).copied().unwrap_or(false))
            .collect();

        let result = match &node.data {
            NodeData::Atomic { rule_id, .. } => match atomic_results.get(rule_id) {
                Some(r) => r.success && r.action.as_ref().is_some_and(|a| a.action.is_triggered()),
                None => {
                    error = Some(format!("no atomic result for rule {rule_id:?} (node {:?})", node.id));
                    break 'nodes;
                }
            },
            NodeData::Constant { value } => *value,
            NodeData::Threshold {
                field,
                operator,
                threshold,
            } => evaluate_threshold(payload, field, *operator, *threshold),
            NodeData::And { .. } => inputs.len() == 2 && inputs.iter().all(|&b| b),
            NodeData::Or { .. } => inputs.iter().any(|&b| b),
            NodeData::Not { .. } => inputs.first().map(|&b| !b).unwrap_or(false),
            NodeData::StatefulCondition {
                condition,
                count,
                window_minutes,
                ..
            } => {
                let input = inputs.first().copied().unwrap_or(false);
                state.evaluate(&rule.id, &node.id, *condition, *count, *window_minutes, input, now)
            }
            NodeData::Output { output_action } => {
                let fired = inputs.first().copied().unwrap_or(false);
                if fired {
                    output_fired = Some(output_action);
                }
                fired
            }
        };

        node_results.insert(node.id.clone(), result);
    }

    CompositeResult {
        triggered: output_fired.is_some(),
        action: output_fired.cloned(),
        node_results,
        success: error.is_none(),
        error,
        execution_ms: start.elapsed().as_millis() as u64,
    }
}

fn evaluate_threshold(payload: &serde_json::Value, field: &str, op: CompareOp, threshold: f64) -> bool {
    let value = lookup_path(payload, field).and_then(|v| v.as_f64());
    match value {
        Some(v) => op.apply(v, threshold),
        None => false,
    }
}

fn lookup_path<'a>(payload: &'a serde_json::Value, path: &str) -> Option<&'a serde_json::Value> {
    let mut current = payload;
    for segment in path.split('.') {
        current = current.get(segment)?;
    }
    Some(current)
}

fn incoming_wires(rule: &CompositeRule) -> HashMap<&str, Vec<&str>> {
    let mut map: HashMap<&str, Vec<&str>> = HashMap::new();
    for conn in &rule.connections {
        map.entry(conn.target_node.as_str())
            .or_default()
            .push(conn.source_node.as_str());
    }
    map
}

fn topological_order(rule: &CompositeRule) -> Result<Vec<&crate::types::CompositeNode>, String> {
    let mut in_degree: HashMap<&str, usize> = rule.nodes.iter().map(|n| (n.id.as_str(), 0)).collect();
    let mut adjacency: HashMap<&str, Vec<&str>> = HashMap::new();
    for conn in &rule.connections {
        *in_degree.entry(conn.target_node.as_str()).or_insert(0) += 1;
        adjacency
            .entry(conn.source_node.as_str())
            .or_default()
            .push(conn.target_node.as_str());
    }

    let by_id: HashMap<&str, &crate::types::CompositeNode> =
        rule.nodes.iter().map(|n| (n.id.as_str(), n)).collect();

    // deterministic ordering: sort the initial frontier and each successor
    // push by node id, so the same graph always evaluates in the same order.
    let mut frontier: Vec<&str> = in_degree
        .iter()
        .filter(|&(_, &deg)| deg == 0)
        .map(|(&id, _)| id)
        .collect();
    frontier.sort_unstable();
    let mut queue: VecDeque<&str> = frontier.into();

    let mut order = Vec::with_capacity(rule.nodes.len());
    while let Some(id) = queue.pop_front() {
        order.push(by_id[id]);
        if let Some(successors) = adjacency.get(id) {
            let mut ready = Vec::new();
            for &succ in successors {
                let deg = in_degree.get_mut(succ).expect("successor is a known node");
                *deg -= 1;
                if *deg == 0 {
                    ready.push(succ);
                }
            }
            ready.sort_unstable();
            for succ in ready {
                queue.push_back(succ);
            }
        }
    }

    if order.len() < rule.nodes.len() {
        return Err("graph contains a cycle".to_string());
    }
    Ok(order)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ActionKind, CompositeConnection, CompositeNode, Position, SocketType, StatefulCondition};

    fn node(id: &str, data: NodeData) -> CompositeNode {
        CompositeNode {
            id: id.to_string(),
            position: Position { x: 0.0, y: 0.0 },
            data,
        }
    }

    fn conn(id: &str, source: &str, target: &str) -> CompositeConnection {
        CompositeConnection {
            id: id.to_string(),
            source_node: source.to_string(),
            source_socket: SocketType::AnyBoolean,
            target_node: target.to_string(),
            target_socket: SocketType::AnyBoolean,
        }
    }

    fn rule(nodes: Vec<CompositeNode>, connections: Vec<CompositeConnection>) -> CompositeRule {
        CompositeRule {
            id: "r1".to_string(),
            name: "test".to_string(),
            description: String::new(),
            enabled: true,
            created_at: Utc::now(),
            created_by: "test".to_string(),
            nodes,
            connections,
            output_action: ActionVerdict::pass(),
        }
    }

    fn alert_action() -> ActionVerdict {
        ActionVerdict {
            action: ActionKind::Alert,
            severity: None,
            message: Some("test".to_string()),
            register: None,
            value: None,
            reason: None,
        }
    }

    #[test]
    fn constant_true_fires_output() {
        let rule = rule(
            vec![
                node("c", NodeData::Constant { value: true }),
                node("o", NodeData::Output { output_action: alert_action() }),
            ],
            vec![conn("w", "c", "o")],
        );
        let mut state = StatefulStore::new();
        let result = evaluate(&rule, &BTreeMap::new(), &serde_json::json!({}), &mut state, Utc::now());
        assert!(result.success);
        assert!(result.triggered);
        assert_eq!(result.action.unwrap().action, ActionKind::Alert);
    }

    #[test]
    fn and_gate_requires_both_inputs() {
        let rule = rule(
            vec![
                node("a", NodeData::Constant { value: true }),
                node("b", NodeData::Constant { value: false }),
                node("and", NodeData::And { gate_type: crate::types::GateType::And }),
                node("o", NodeData::Output { output_action: alert_action() }),
            ],
            vec![conn("w1", "a", "and"), conn("w2", "b", "and"), conn("w3", "and", "o")],
        );
        let mut state = StatefulStore::new();
        let result = evaluate(&rule, &BTreeMap::new(), &serde_json::json!({}), &mut state, Utc::now());
        assert!(!result.triggered);
        assert_eq!(result.node_results["and"], false);
    }

    #[test]
    fn threshold_reads_payload_field() {
        let rule = rule(
            vec![
                node(
                    "t",
                    NodeData::Threshold {
                        field: "stats.defects_per_hour".to_string(),
                        operator: CompareOp::Gt,
                        threshold: 10.0,
                    },
                ),
                node("o", NodeData::Output { output_action: alert_action() }),
            ],
            vec![conn("w", "t", "o")],
        );
        let mut state = StatefulStore::new();
        let payload = serde_json::json!({ "stats": { "defects_per_hour": 15.0 } });
        let result = evaluate(&rule, &BTreeMap::new(), &payload, &mut state, Utc::now());
        assert!(result.triggered);
    }

    #[test]
    fn threshold_missing_field_is_false_not_error() {
        let rule = rule(
            vec![
                node(
                    "t",
                    NodeData::Threshold {
                        field: "stats.nonexistent".to_string(),
                        operator: CompareOp::Gt,
                        threshold: 10.0,
                    },
                ),
                node("o", NodeData::Output { output_action: alert_action() }),
            ],
            vec![conn("w", "t", "o")],
        );
        let mut state = StatefulStore::new();
        let result = evaluate(&rule, &BTreeMap::new(), &serde_json::json!({}), &mut state, Utc::now());
        assert!(result.success);
        assert!(!result.triggered);
    }

    #[test]
    fn atomic_node_consults_result_map() {
        let rule = rule(
            vec![
                node("a", NodeData::Atomic { rule_id: "scratch".to_string(), socket_type: SocketType::AnyBoolean, label: None }),
                node("o", NodeData::Output { output_action: alert_action() }),
            ],
            vec![conn("w", "a", "o")],
        );
        let mut results = BTreeMap::new();
        results.insert(
            "scratch".to_string(),
            AtomicResult {
                action: Some(ActionVerdict { action: ActionKind::Reject, severity: None, message: None, register: None, value: None, reason: None }),
                socket_type: SocketType::VisionDetection,
                reads: Vec::new(),
                produces: Vec::new(),
                execution_ms: 1,
                success: true,
                error: None,
            },
        );
        let mut state = StatefulStore::new();
        let result = evaluate(&rule, &results, &serde_json::json!({}), &mut state, Utc::now());
        assert!(result.triggered);
    }

    #[test]
    fn stateful_node_consults_store_across_calls() {
        let rule = rule(
            vec![
                node("c", NodeData::Constant { value: true }),
                node(
                    "s",
                    NodeData::StatefulCondition {
                        condition: StatefulCondition::Consecutive,
                        accepts_socket_type: SocketType::AnyBoolean,
                        count: 2,
                        window_minutes: 0.0,
                    },
                ),
                node("o", NodeData::Output { output_action: alert_action() }),
            ],
            vec![conn("w1", "c", "s"), conn("w2", "s", "o")],
        );
        let mut state = StatefulStore::new();
        let now = Utc::now();
        let first = evaluate(&rule, &BTreeMap::new(), &serde_json::json!({}), &mut state, now);
        assert!(!first.triggered);
        let second = evaluate(&rule, &BTreeMap::new(), &serde_json::json!({}), &mut state, now);
        assert!(second.triggered);
    }

    #[test]
    fn cycle_surfaces_as_failed_result_not_panic() {
        let rule = rule(
            vec![
                node("a", NodeData::Not { gate_type: crate::types::GateType::Not }),
                node("b", NodeData::Not { gate_type: crate::types::GateType::Not }),
            ],
            vec![conn("c1", "a", "b"), conn("c2", "b", "a")],
        );
        let mut state = StatefulStore::new();
        let result = evaluate(&rule, &BTreeMap::new(), &serde_json::json!({}), &mut state, Utc::now());
        assert!(!result.success);
        assert!(result.error.is_some());
    }
}
