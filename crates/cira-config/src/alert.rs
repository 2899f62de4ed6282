use serde::{Deserialize, Serialize};

use crate::types::HumanDuration;

/// `[alert]` — dispatcher sink destinations and retry policy.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AlertConfig {
    /// Alert output destinations, e.g. `"file:///var/log/cira-alerts.jsonl"`,
    /// `"log://"`, `"modbus://plc-1:502"`.
    pub sinks: Vec<String>,
    #[serde(default)]
    pub retry: RetryConfig,
    /// Identical verdicts for the same `(compositeId, nodeId)` within this
    /// window are coalesced into one dispatch.
    #[serde(default = "default_dedup_window")]
    pub dedup_window: HumanDuration,
}

fn default_dedup_window() -> HumanDuration {
    HumanDuration::from(std::time::Duration::from_secs(60))
}

/// Bounded exponential backoff: `base * factor^attempt`, capped at `max_delay`,
/// abandoned after `max_attempts`.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RetryConfig {
    pub base_delay: HumanDuration,
    pub factor: u32,
    pub max_attempts: u32,
    pub max_delay: HumanDuration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            base_delay: HumanDuration::from(std::time::Duration::from_secs(1)),
            factor: 2,
            max_attempts: 5,
            max_delay: HumanDuration::from(std::time::Duration::from_secs(30)),
        }
    }
}
