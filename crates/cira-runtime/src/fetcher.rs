//! Payload Fetcher (C1): poll every configured node's runtime in parallel,
//! normalise its response into a [`WorldPayload`], and substitute an
//! offline sentinel on any failure so evaluation stays total.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use cira_config::NodeConfig;
use cira_core::types::WorldPayload;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::log_macros::claw_warn;

/// Fan out one `GET {base_url}/api/nodes/:id/state` per node, bounded to
/// `fetch_parallelism` concurrent requests and each bounded by
/// `node_timeout`. Responses older than `2 * tick_interval` are treated as
/// a failure, per the staleness rule at the node runtime API boundary.
pub async fn fetch_all(
    client: &reqwest::Client,
    nodes: &[NodeConfig],
    fetch_parallelism: usize,
    node_timeout: Duration,
    tick_interval: Duration,
    now: DateTime<Utc>,
) -> BTreeMap<String, WorldPayload> {
    let semaphore = Arc::new(Semaphore::new(fetch_parallelism.max(1)));
    let mut set = JoinSet::new();
    for node in nodes {
        let client = client.clone();
        let node = node.clone();
        let semaphore = Arc::clone(&semaphore);
        set.spawn(async move {
            let _permit = semaphore.acquire().await.expect("semaphore closed");
            let payload = tokio::time::timeout(node_timeout, fetch_one(&client, &node))
                .await
                .unwrap_or_else(|_| {
                    claw_warn!(fetch, node = %node.id, timeout_ms = node_timeout.as_millis() as u64, "node fetch timed out");
                    WorldPayload::sentinel(&node.id)
                });
            (node.id, payload)
        });
    }

    let mut results = BTreeMap::new();
    while let Some(joined) = set.join_next().await {
        match joined {
            Ok((id, mut payload)) => {
                let max_age = tick_interval * 2;
                if payload.node.status != cira_core::types::NodeStatus::Offline
                    && (now - payload.frame.timestamp)
                        .to_std()
                        .map(|age| age > max_age)
                        .unwrap_or(false)
                {
                    claw_warn!(fetch, node = %id, "discarding stale payload");
                    payload = WorldPayload::sentinel(&id);
                }
                results.insert(id, payload);
            }
            Err(e) => claw_warn!(fetch, error = %e, "fetch task panicked"),
        }
    }
    results
}

async fn fetch_one(client: &reqwest::Client, node: &NodeConfig) -> WorldPayload {
    let url = format!("{}/api/nodes/{}/state", node.base_url.trim_end_matches('/'), node.id);
    let body = match client.get(&url).send().await {
        Ok(resp) => match resp.text().await {
            Ok(text) => text,
            Err(e) => {
                claw_warn!(fetch, node = %node.id, error = %e, "failed to read response body");
                return WorldPayload::sentinel(&node.id);
            }
        },
        Err(e) => {
            claw_warn!(fetch, node = %node.id, error = %e, "node unreachable");
            return WorldPayload::sentinel(&node.id);
        }
    };

    let repaired = repair_backslashes(&body);
    match serde_json::from_str::<WorldPayload>(&repaired) {
        Ok(mut payload) => {
            normalize(&mut payload);
            payload
        }
        Err(e) => {
            claw_warn!(fetch, node = %node.id, error = %e, "unparseable payload");
            WorldPayload::sentinel(&node.id)
        }
    }
}

/// Double any `\` not followed by a legal JSON escape character, repairing
/// Windows-style paths embedded unescaped in a node's JSON response.
pub fn repair_backslashes(raw: &str) -> String {
    const LEGAL_ESCAPES: &[u8] = b"\"\\/bfnrtu";
    let bytes = raw.as_bytes();
    let mut out = Vec::with_capacity(raw.len());
    let mut i = 0;
    while i < bytes.len() {
        let b = bytes[i];
        if b == b'\\' {
            let next = bytes.get(i + 1).copied();
            let legal = next.is_some_and(|n| LEGAL_ESCAPES.contains(&n));
            out.push(b'\\');
            if !legal {
                out.push(b'\\');
            }
        } else {
            out.push(b);
        }
        i += 1;
    }
    String::from_utf8(out).expect("repair only inserts ASCII bytes into valid UTF-8 input")
}

/// Clamp `confidence` to `[0,1]` and drop detections whose geometry is
/// invalid after clamping (`w>0`, `h>0`, inside `[0,1]^2`).
fn normalize(payload: &mut WorldPayload) {
    payload.detections.retain_mut(|d| {
        d.confidence = d.confidence.clamp(0.0, 1.0);
        d.x = d.x.clamp(0.0, 1.0);
        d.y = d.y.clamp(0.0, 1.0);
        d.w > 0.0 && d.h > 0.0 && d.x + d.w <= 1.0 + f64::EPSILON && d.y + d.h <= 1.0 + f64::EPSILON
    });
}
