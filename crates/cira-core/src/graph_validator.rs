//! Graph Validator (C5): topologically sort a composite graph, detect
//! cycles, verify socket-type compatibility, and check fan-in arity and
//! output reachability.
//!
//! The source models nodes and sockets as class hierarchies compared by
//! reference identity; this validates over plain data with Kahn's
//! algorithm and the Socket Registry's `compatible` predicate instead.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use orion_error::StructError;

use crate::error::{CoreError, CoreReason};
use crate::socket_registry::compatible;
use crate::types::{CompositeRule, GateType, NodeData};

pub fn validate(rule: &CompositeRule) -> Result<(), CoreError> {
    check_self_loops(rule)?;
    check_connections_reference_existing_nodes(rule)?;
    check_socket_compatibility(rule)?;
    check_acyclic(rule)?;
    check_fan_in_arity(rule)?;
    check_output_reachable(rule)?;
    Ok(())
}

fn fail(message: impl Into<String>) -> CoreError {
    StructError::from(CoreReason::Validation(message.into()))
}

fn check_self_loops(rule: &CompositeRule) -> Result<(), CoreError> {
    for conn in &rule.connections {
        if conn.source_node == conn.target_node {
            return Err(fail(format!(
                "connection {:?} is a self-loop on node {:?}",
                conn.id, conn.source_node
            )));
        }
    }
    Ok(())
}

fn check_connections_reference_existing_nodes(rule: &CompositeRule) -> Result<(), CoreError> {
    let ids: BTreeSet<&str> = rule.nodes.iter().map(|n| n.id.as_str()).collect();
    for conn in &rule.connections {
        if !ids.contains(conn.source_node.as_str()) {
            return Err(fail(format!(
                "connection {:?} references unknown source node {:?}",
                conn.id, conn.source_node
            )));
        }
        if !ids.contains(conn.target_node.as_str()) {
            return Err(fail(format!(
                "connection {:?} references unknown target node {:?}",
                conn.id, conn.target_node
            )));
        }
    }
    Ok(())
}

fn check_socket_compatibility(rule: &CompositeRule) -> Result<(), CoreError> {
    for conn in &rule.connections {
        if !compatible(conn.source_socket, conn.target_socket) {
            return Err(fail(format!(
                "connection {:?}: socket type {:?} is not compatible with {:?}",
                conn.id, conn.source_socket, conn.target_socket
            )));
        }
    }
    Ok(())
}

/// Kahn's algorithm: repeatedly remove nodes with in-degree zero. Any node
/// left unqueued when the frontier is exhausted sits on a cycle.
fn check_acyclic(rule: &CompositeRule) -> Result<(), CoreError> {
    let mut in_degree: BTreeMap<&str, usize> =
        rule.nodes.iter().map(|n| (n.id.as_str(), 0)).collect();
    let mut adjacency: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
    for conn in &rule.connections {
        *in_degree.entry(conn.target_node.as_str()).or_insert(0) += 1;
        adjacency
            .entry(conn.source_node.as_str())
            .or_default()
            .push(conn.target_node.as_str());
    }

    let mut frontier: VecDeque<&str> = in_degree
        .iter()
        .filter(|&(_, &deg)| deg == 0)
        .map(|(&id, _)| id)
        .collect();
    let mut visited = 0usize;

    while let Some(node) = frontier.pop_front() {
        visited += 1;
        if let Some(successors) = adjacency.get(node) {
            for &succ in successors {
                let deg = in_degree.get_mut(succ).expect("successor must be a known node");
                *deg -= 1;
                if *deg == 0 {
                    frontier.push_back(succ);
                }
            }
        }
    }

    if visited < rule.nodes.len() {
        let stuck = in_degree
            .iter()
            .find(|&(_, &deg)| deg > 0)
            .map(|(&id, _)| id)
            .unwrap_or("?");
        return Err(fail(format!("cycle at {stuck}")));
    }
    Ok(())
}

fn check_fan_in_arity(rule: &CompositeRule) -> Result<(), CoreError> {
    let mut in_degree: BTreeMap<&str, usize> = BTreeMap::new();
    for conn in &rule.connections {
        *in_degree.entry(conn.target_node.as_str()).or_insert(0) += 1;
    }
    for node in &rule.nodes {
        let fan_in = in_degree.get(node.id.as_str()).copied().unwrap_or(0);
        let expected = match &node.data {
            NodeData::And { gate_type: GateType::And } | NodeData::Or { gate_type: GateType::Or } => Some(2),
            NodeData::Not { gate_type: GateType::Not } => Some(1),
            NodeData::Output { .. } => Some(1),
            _ => None,
        };
        if let Some(expected) = expected {
            if fan_in != expected {
                return Err(fail(format!(
                    "node {:?} expects {expected} input(s), has {fan_in}",
                    node.id
                )));
            }
        }
    }
    Ok(())
}

fn check_output_reachable(rule: &CompositeRule) -> Result<(), CoreError> {
    let sources: Vec<&str> = rule
        .nodes
        .iter()
        .filter(|n| matches!(n.data, NodeData::Atomic { .. } | NodeData::Constant { .. } | NodeData::Threshold { .. }))
        .map(|n| n.id.as_str())
        .collect();
    if sources.is_empty() {
        return Err(fail("no source node (atomic/constant/threshold) in graph"));
    }

    let mut adjacency: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
    for conn in &rule.connections {
        adjacency
            .entry(conn.source_node.as_str())
            .or_default()
            .push(conn.target_node.as_str());
    }

    let mut seen: BTreeSet<&str> = BTreeSet::new();
    let mut stack: Vec<&str> = sources;
    while let Some(node) = stack.pop() {
        if !seen.insert(node) {
            continue;
        }
        if let Some(next) = adjacency.get(node) {
            stack.extend(next.iter().copied());
        }
    }

    let has_output = rule
        .nodes
        .iter()
        .any(|n| matches!(n.data, NodeData::Output { .. }) && seen.contains(n.id.as_str()));
    if !has_output {
        return Err(fail("no output node reachable from any source"));
    }
    Ok(())
}
