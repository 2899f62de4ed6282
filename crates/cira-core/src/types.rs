//! The shared data model: `WorldPayload`, `ActionVerdict`, the composite
//! graph's node/connection shapes, stateful-operator state, and the
//! published `ResultSnapshot`.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// WorldPayload
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    pub number: u64,
    pub timestamp: DateTime<Utc>,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub label: String,
    pub confidence: f64,
    pub x: f64,
    pub y: f64,
    pub w: f64,
    pub h: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stats {
    pub total_detections: u64,
    pub by_label: BTreeMap<String, u64>,
    pub fps: f64,
    pub uptime_sec: u64,
    pub defects_per_hour: f64,
}

impl Default for Stats {
    fn default() -> Self {
        Self {
            total_detections: 0,
            by_label: BTreeMap::new(),
            fps: 0.0,
            uptime_sec: 0,
            defects_per_hour: 0.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HourlyBucket {
    pub hour: String,
    pub detections: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeStatus {
    Online,
    Offline,
    Error,
    Updating,
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeInfo {
    pub id: String,
    pub status: NodeStatus,
}

/// Per-node, per-tick read-only record delivered to every rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorldPayload {
    pub frame: Frame,
    pub detections: Vec<Detection>,
    pub stats: Stats,
    pub hourly: Vec<HourlyBucket>,
    pub node: NodeInfo,
}

impl WorldPayload {
    /// The substitute payload used when a node's fetch fails, so evaluation
    /// remains total. Statistics are all zero and detections empty.
    pub fn sentinel(node_id: impl Into<String>) -> Self {
        Self {
            frame: Frame {
                number: 0,
                timestamp: DateTime::UNIX_EPOCH,
                width: 0,
                height: 0,
            },
            detections: Vec::new(),
            stats: Stats::default(),
            hourly: Vec::new(),
            node: NodeInfo {
                id: node_id.into(),
                status: NodeStatus::Offline,
            },
        }
    }

    /// The literal dry-run payload used to validate a rule at save time.
    pub fn dry_run_fixture() -> Self {
        let mut by_label = BTreeMap::new();
        by_label.insert("test".to_string(), 10);
        Self {
            frame: Frame {
                number: 1,
                timestamp: "2025-01-01T00:00:00Z".parse().unwrap(),
                width: 1920,
                height: 1080,
            },
            detections: vec![Detection {
                label: "test".to_string(),
                confidence: 0.9,
                x: 0.1,
                y: 0.1,
                w: 0.2,
                h: 0.2,
            }],
            stats: Stats {
                total_detections: 10,
                by_label,
                fps: 30.0,
                uptime_sec: 100,
                defects_per_hour: 5.0,
            },
            hourly: vec![HourlyBucket {
                hour: "10:00".to_string(),
                detections: 5,
            }],
            node: NodeInfo {
                id: "local-dev".to_string(),
                status: NodeStatus::Online,
            },
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).expect("WorldPayload always serializes")
    }
}

// ---------------------------------------------------------------------------
// ActionVerdict
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    Pass,
    Reject,
    Alert,
    Log,
    ModbusWrite,
}

impl ActionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pass => "pass",
            Self::Reject => "reject",
            Self::Alert => "alert",
            Self::Log => "log",
            Self::ModbusWrite => "modbus_write",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "pass" => Some(Self::Pass),
            "reject" => Some(Self::Reject),
            "alert" => Some(Self::Alert),
            "log" => Some(Self::Log),
            "modbus_write" => Some(Self::ModbusWrite),
            _ => None,
        }
    }

    /// A verdict other than `pass` is considered triggered.
    pub fn is_triggered(&self) -> bool {
        !matches!(self, Self::Pass)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

/// The tagged record a rule returns, and the core's universal currency.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionVerdict {
    pub action: ActionKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub severity: Option<Severity>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub register: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl ActionVerdict {
    pub fn pass() -> Self {
        Self {
            action: ActionKind::Pass,
            severity: None,
            message: None,
            register: None,
            value: None,
            reason: None,
        }
    }
}

// ---------------------------------------------------------------------------
// SocketType
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SocketType {
    VisionConfidence,
    VisionDetection,
    SignalRate,
    SignalThreshold,
    SystemHealth,
    AnyBoolean,
    /// Output of stateful nodes: a temporal truth value.
    TimeWindow,
    /// Input accepted by boolean gates.
    BooleanAny,
    /// Reserved; connects only to itself.
    PipelineContext,
}

// ---------------------------------------------------------------------------
// Composite graph shapes
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GateType {
    And,
    Or,
    Not,
}

/// The exact numeric comparison operators a `threshold` node's `data.operator`
/// may hold, serialized as the literal symbols used on disk (`>`, `<`, `>=`,
/// `<=`, `==`, `!=`) rather than Rust-style variant names.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Gt,
    Lt,
    Ge,
    Le,
    Eq,
    Ne,
}

impl CompareOp {
    pub fn apply(&self, lhs: f64, rhs: f64) -> bool {
        match self {
            Self::Gt => lhs > rhs,
            Self::Lt => lhs < rhs,
            Self::Ge => lhs >= rhs,
            Self::Le => lhs <= rhs,
            Self::Eq => lhs == rhs,
            Self::Ne => lhs != rhs,
        }
    }

    fn as_symbol(&self) -> &'static str {
        match self {
            Self::Gt => ">",
            Self::Lt => "<",
            Self::Ge => ">=",
            Self::Le => "<=",
            Self::Eq => "==",
            Self::Ne => "!=",
        }
    }
}

impl Serialize for CompareOp {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_symbol())
    }
}

impl<'de> Deserialize<'de> for CompareOp {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        match s.as_str() {
            ">" => Ok(Self::Gt),
            "<" => Ok(Self::Lt),
            ">=" => Ok(Self::Ge),
            "<=" => Ok(Self::Le),
            "==" => Ok(Self::Eq),
            "!=" => Ok(Self::Ne),
            other => Err(serde::de::Error::custom(format!(
                "unknown threshold operator {other:?}"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatefulCondition {
    CountWindow,
    Consecutive,
    Rate,
    Sustained,
    Cooldown,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NodeData {
    Atomic {
        rule_id: String,
        socket_type: SocketType,
        #[serde(skip_serializing_if = "Option::is_none")]
        label: Option<String>,
    },
    And {
        gate_type: GateType,
    },
    Or {
        gate_type: GateType,
    },
    Not {
        gate_type: GateType,
    },
    Constant {
        value: bool,
    },
    Threshold {
        field: String,
        operator: CompareOp,
        threshold: f64,
    },
    StatefulCondition {
        condition: StatefulCondition,
        accepts_socket_type: SocketType,
        count: u32,
        window_minutes: f64,
    },
    Output {
        output_action: ActionVerdict,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompositeNode {
    pub id: String,
    pub position: Position,
    pub data: NodeData,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompositeConnection {
    pub id: String,
    pub source_node: String,
    pub source_socket: SocketType,
    pub target_node: String,
    pub target_socket: SocketType,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompositeRule {
    pub id: String,
    pub name: String,
    pub description: String,
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
    pub created_by: String,
    pub nodes: Vec<CompositeNode>,
    pub connections: Vec<CompositeConnection>,
    pub output_action: ActionVerdict,
}

// ---------------------------------------------------------------------------
// AtomicRule
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AtomicRule {
    pub id: String,
    pub name: String,
    pub description: String,
    pub socket_type: SocketType,
    pub reads: Vec<String>,
    pub produces: Vec<String>,
    pub code: String,
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
    pub created_by: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
}

pub fn is_valid_rule_id(id: &str) -> bool {
    !id.is_empty()
        && id
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-')
}

// ---------------------------------------------------------------------------
// StatefulState
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StatefulState {
    /// `count_window`: timestamps (ms since epoch) of recent true events.
    #[serde(default)]
    pub window_events: Vec<i64>,
    /// `consecutive`: run length of consecutive true inputs.
    #[serde(default)]
    pub consecutive_count: u32,
    /// `rate`: timestamps (ms since epoch) of recent true events, bucketed
    /// the same way as `window_events` — rate is derived by dividing by the
    /// window length in minutes.
    #[serde(default)]
    pub rate_events: Vec<i64>,
    /// `sustained`: timestamp (ms since epoch) of the rising edge, if any.
    #[serde(default)]
    pub sustained_since: Option<i64>,
    /// `cooldown`: timestamp (ms since epoch) of the last accepted fire.
    #[serde(default)]
    pub last_fire: Option<i64>,
    /// Output of this node on the previous tick, used to derive rising and
    /// falling edges.
    #[serde(default)]
    pub previous_output: bool,
}

// ---------------------------------------------------------------------------
// ResultSnapshot
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AtomicResult {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action: Option<ActionVerdict>,
    pub socket_type: SocketType,
    pub reads: Vec<String>,
    pub produces: Vec<String>,
    pub execution_ms: u64,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompositeResult {
    pub triggered: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action: Option<ActionVerdict>,
    pub node_results: BTreeMap<String, bool>,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub execution_ms: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SnapshotMetadata {
    /// True if the tick scheduler skipped the tick that would have produced
    /// this snapshot because the previous one was still running.
    pub tick_skipped: bool,
}

/// The immutable view published after each tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultSnapshot {
    pub evaluated_at: DateTime<Utc>,
    pub atomic_results: BTreeMap<String, AtomicResult>,
    pub composite_results: BTreeMap<String, CompositeResult>,
    #[serde(default)]
    pub metadata: SnapshotMetadata,
}

impl ResultSnapshot {
    pub fn empty(evaluated_at: DateTime<Utc>) -> Self {
        Self {
            evaluated_at,
            atomic_results: BTreeMap::new(),
            composite_results: BTreeMap::new(),
            metadata: SnapshotMetadata::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sentinel_payload_is_offline_and_empty() {
        let p = WorldPayload::sentinel("jetson-1");
        assert_eq!(p.node.status, NodeStatus::Offline);
        assert!(p.detections.is_empty());
        assert_eq!(p.stats.total_detections, 0);
    }

    #[test]
    fn rule_id_validation() {
        assert!(is_valid_rule_id("defect_rate-1"));
        assert!(!is_valid_rule_id("bad id"));
        assert!(!is_valid_rule_id(""));
    }

    #[test]
    fn compare_op_serializes_as_symbol() {
        let op: CompareOp = serde_json::from_str("\">=\"").unwrap();
        assert!(matches!(op, CompareOp::Ge));
        assert_eq!(serde_json::to_string(&CompareOp::Ne).unwrap(), "\"!=\"");
    }

    #[test]
    fn action_kind_pass_is_not_triggered() {
        assert!(!ActionKind::Pass.is_triggered());
        assert!(ActionKind::Alert.is_triggered());
    }
}
