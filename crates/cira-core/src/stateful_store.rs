//! Stateful Node Store (C6): per-`(compositeId, nodeId)` temporal state —
//! event ring buffers, consecutive counters, sustain timers, cooldown
//! anchors — evolved in lockstep with tick time rather than a wall clock,
//! so replay against a recorded `now` sequence is bit-for-bit reproducible.

use std::collections::HashMap;

use chrono::{DateTime, Utc};

use crate::types::{StatefulCondition, StatefulState};

const MS_PER_MINUTE: i64 = 60_000;

#[derive(Debug, Default)]
pub struct StatefulStore {
    states: HashMap<(String, String), StatefulState>,
}

impl StatefulStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, composite_id: &str, node_id: &str) -> StatefulState {
        self.states
            .get(&(composite_id.to_string(), node_id.to_string()))
            .cloned()
            .unwrap_or_default()
    }

    pub fn remove_composite(&mut self, composite_id: &str) {
        self.states.retain(|(c, _), _| c != composite_id);
    }

    /// Evolve the node's state one tick forward given `input` (this tick's
    /// incoming boolean) and `now`, returning the node's output and writing
    /// the updated state back.
    pub fn evaluate(
        &mut self,
        composite_id: &str,
        node_id: &str,
        condition: StatefulCondition,
        count: u32,
        window_minutes: f64,
        input: bool,
        now: DateTime<Utc>,
    ) -> bool {
        let key = (composite_id.to_string(), node_id.to_string());
        let mut state = self.states.remove(&key).unwrap_or_default();
        let now_ms = now.timestamp_millis();
        let window_ms = (window_minutes * MS_PER_MINUTE as f64) as i64;

        let output = match condition {
            StatefulCondition::CountWindow => {
                if input {
                    state.window_events.push(now_ms);
                }
                state.window_events.retain(|&t| now_ms - t < window_ms);
                state.window_events.len() as u32 >= count
            }
            StatefulCondition::Consecutive => {
                state.consecutive_count = if input { state.consecutive_count + 1 } else { 0 };
                state.consecutive_count >= count
            }
            StatefulCondition::Rate => {
                if input {
                    state.rate_events.push(now_ms);
                }
                state.rate_events.retain(|&t| now_ms - t < window_ms);
                let per_minute = state.rate_events.len() as f64 / window_minutes.max(f64::EPSILON);
                per_minute >= count as f64
            }
            StatefulCondition::Sustained => {
                if input {
                    if state.sustained_since.is_none() {
                        state.sustained_since = Some(now_ms);
                    }
                } else {
                    state.sustained_since = None;
                }
                match state.sustained_since {
                    Some(since) => now_ms - since >= window_ms,
                    None => false,
                }
            }
            StatefulCondition::Cooldown => {
                if input {
                    let quiet_elapsed = match state.last_fire {
                        Some(last) => now_ms - last >= window_ms,
                        None => true,
                    };
                    if quiet_elapsed {
                        state.last_fire = Some(now_ms);
                        true
                    } else {
                        false
                    }
                } else {
                    false
                }
            }
        };

        state.previous_output = output;
        self.states.insert(key, state);
        output
    }
}
