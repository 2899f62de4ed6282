use serde::{Deserialize, Serialize};

use crate::types::HumanDuration;

/// `[runtime]` — tick cadence, fetch fan-out, and per-rule execution budget.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RuntimeConfig {
    /// Cadence of the tick scheduler loop.
    pub tick_interval: HumanDuration,
    /// Number of nodes fetched concurrently per tick (`JoinSet` fan-out width).
    pub fetch_parallelism: usize,
    /// Per-node HTTP fetch timeout.
    pub fetch_timeout: HumanDuration,
    /// Per-rule sandbox execution deadline, enforced by the evaluator's fuel
    /// counter rather than a wall clock.
    pub rule_exec_timeout: HumanDuration,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            tick_interval: HumanDuration::from(std::time::Duration::from_millis(1000)),
            fetch_parallelism: 8,
            fetch_timeout: HumanDuration::from(std::time::Duration::from_millis(2000)),
            rule_exec_timeout: HumanDuration::from(std::time::Duration::from_millis(50)),
        }
    }
}
