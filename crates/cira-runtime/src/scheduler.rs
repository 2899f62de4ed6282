//! Tick Scheduler (C8): the fixed-cadence loop that drives one evaluation
//! pass of the rule evaluation core per tick.
//!
//! Each tick fetches every configured node's payload in parallel, runs the
//! atomic then composite engines per node, publishes the merged
//! `ResultSnapshot`, and dispatches any triggered verdicts. A tick that is
//! still running when the next one comes due is never interrupted; the
//! scheduler instead records that a tick was skipped to catch back up, via
//! `tokio::time::MissedTickBehavior::Skip`.

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use cira_config::{CiraConfig, NodeConfig};
use cira_core::alert::{AlertContext, AlertDispatcher};
use cira_core::atomic_engine;
use cira_core::composite_engine;
use cira_core::types::ResultSnapshot;
use cira_core::{RuleStore, StatefulStore};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::error::{RuntimeReason, RuntimeResult};
use crate::fetcher;
use crate::log_macros::{claw_debug, claw_warn};

/// Read side of the published snapshot. Cloning is cheap — it's a
/// `tokio::sync::watch` receiver over an `Arc`.
pub type SnapshotReceiver = watch::Receiver<Arc<ResultSnapshot>>;

pub struct TickScheduler {
    rule_store: RuleStore,
    client: reqwest::Client,
    nodes: Vec<NodeConfig>,
    config: CiraConfig,
    alert: AlertDispatcher,
    stateful: StatefulStore,
    snapshot_tx: watch::Sender<Arc<ResultSnapshot>>,
    cancel: CancellationToken,
}

impl TickScheduler {
    pub fn new(
        rule_store: RuleStore,
        client: reqwest::Client,
        config: CiraConfig,
        alert: AlertDispatcher,
        cancel: CancellationToken,
    ) -> (Self, SnapshotReceiver) {
        let (snapshot_tx, snapshot_rx) = watch::channel(Arc::new(ResultSnapshot::empty(Utc::now())));
        let nodes = config.nodes.clone();
        let scheduler = Self {
            rule_store,
            client,
            nodes,
            config,
            alert,
            stateful: StatefulStore::new(),
            snapshot_tx,
            cancel,
        };
        (scheduler, snapshot_rx)
    }

    /// Run the tick loop until cancelled. A tick in progress is always
    /// allowed to finish; cancellation only stops the *next* one from
    /// starting.
    pub async fn run(mut self) -> RuntimeResult<()> {
        let tick_interval = self.config.runtime.tick_interval.into();
        let mut interval = tokio::time::interval(tick_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.run_tick().await?;
                }
                _ = self.cancel.cancelled() => {
                    claw_debug!(tick, "cancellation received, scheduler stopping");
                    break;
                }
            }
        }
        Ok(())
    }

    async fn run_tick(&mut self) -> RuntimeResult<()> {
        let start = Instant::now();
        let now = Utc::now();
        let tick_interval = self.config.runtime.tick_interval.into();

        let payloads = fetcher::fetch_all(
            &self.client,
            &self.nodes,
            self.config.runtime.fetch_parallelism,
            self.config.runtime.fetch_timeout.into(),
            tick_interval,
            now,
        )
        .await;

        let atomic_rules = self
            .rule_store
            .list_atomic()
            .map_err(|e| RuntimeReason::Fatal(format!("cannot list atomic rules: {e}")))?;
        let composite_rules = self
            .rule_store
            .list_composite()
            .map_err(|e| RuntimeReason::Fatal(format!("cannot list composite rules: {e}")))?;
        let deadline_ms = self.config.runtime.rule_exec_timeout.as_millis();

        let mut snapshot = ResultSnapshot::empty(now);
        for (node_id, payload) in &payloads {
            let node_atomic = atomic_engine::evaluate_node(payload, &atomic_rules, deadline_ms);

            let payload_json = match serde_json::to_value(payload) {
                Ok(v) => v,
                Err(e) => {
                    claw_warn!(tick, node = %node_id, error = %e, "payload would not serialize, skipping composite pass");
                    atomic_engine::merge_into_snapshot(
                        &mut snapshot.atomic_results,
                        node_id,
                        node_atomic,
                    );
                    continue;
                }
            };

            for rule in composite_rules.iter().filter(|r| r.enabled) {
                let result = composite_engine::evaluate(
                    rule,
                    &node_atomic,
                    &payload_json,
                    &mut self.stateful,
                    now,
                );
                if result.triggered {
                    if let Some(verdict) = &result.action {
                        self.alert.dispatch(
                            verdict,
                            AlertContext {
                                composite_id: rule.id.clone(),
                                node_id: node_id.clone(),
                            },
                            now,
                        );
                    }
                }
                snapshot
                    .composite_results
                    .insert(format!("{node_id}::{}", rule.id), result);
            }

            atomic_engine::merge_into_snapshot(&mut snapshot.atomic_results, node_id, node_atomic);
        }

        self.alert.process_retries(now);

        let elapsed = start.elapsed();
        snapshot.metadata.tick_skipped = elapsed > tick_interval;
        if snapshot.metadata.tick_skipped {
            claw_warn!(tick, elapsed_ms = elapsed.as_millis() as u64, "tick overran its interval, a subsequent tick will be skipped");
        }

        claw_debug!(tick, nodes = payloads.len(), elapsed_ms = elapsed.as_millis() as u64, "tick complete");
        self.snapshot_tx.send_replace(Arc::new(snapshot));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use cira_config::{HumanDuration, NodeConfig};
    use cira_core::alert::LogAlertSink;
    use cira_core::types::{ActionKind, AtomicRule, SocketType};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    use super::*;

    /// Accepts connections forever and answers every request with the same
    /// canned JSON body, closing the connection after each response. Stands
    /// in for a node runtime's `GET /api/nodes/:id/state` endpoint.
    async fn serve_fixed_body(listener: TcpListener, body: String) {
        loop {
            let Ok((mut socket, _)) = listener.accept().await else {
                return;
            };
            let body = body.clone();
            tokio::spawn(async move {
                let mut buf = [0u8; 1024];
                let _ = socket.read(&mut buf).await;
                let response = format!(
                    "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                    body.len(),
                    body,
                );
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
            });
        }
    }

    fn defect_rate_rule() -> AtomicRule {
        AtomicRule {
            id: "defect_rate".to_string(),
            name: "High defect rate".to_string(),
            description: String::new(),
            socket_type: SocketType::AnyBoolean,
            reads: Vec::new(),
            produces: Vec::new(),
            code: r#"if (payload.stats.defects_per_hour > 10) return { action: "alert" }; return { action: "pass" };"#
                .to_string(),
            enabled: true,
            created_at: Utc::now(),
            created_by: "test".to_string(),
            prompt: None,
            tags: None,
        }
    }

    #[tokio::test]
    async fn tick_fetches_evaluates_and_publishes_a_triggered_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let store = RuleStore::open(dir.path()).unwrap();
        store.save_atomic(defect_rate_rule()).unwrap();

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let body = serde_json::json!({
            "frame": { "number": 1, "timestamp": Utc::now(), "width": 640, "height": 480 },
            "detections": [],
            "stats": {
                "total_detections": 0,
                "by_label": {},
                "fps": 1.0,
                "uptime_sec": 1,
                "defects_per_hour": 20.0
            },
            "hourly": [],
            "node": { "id": "n1", "status": "online" }
        })
        .to_string();
        let server = tokio::spawn(serve_fixed_body(listener, body));

        let mut config = CiraConfig::defaults();
        config.runtime.tick_interval = HumanDuration::from(Duration::from_millis(20));
        config.nodes = vec![NodeConfig {
            id: "n1".to_string(),
            base_url: format!("http://{addr}"),
        }];

        let client = reqwest::Client::new();
        let alert = AlertDispatcher::new(
            vec![Box::new(LogAlertSink)],
            config.alert.retry.clone(),
            config.alert.dedup_window.as_millis(),
        );
        let cancel = CancellationToken::new();
        let (scheduler, mut snapshot_rx) = TickScheduler::new(store, client, config, alert, cancel.clone());
        let handle = tokio::spawn(scheduler.run());

        let snapshot = loop {
            snapshot_rx.changed().await.unwrap();
            let snapshot = snapshot_rx.borrow().clone();
            if !snapshot.atomic_results.is_empty() {
                break snapshot;
            }
        };

        let result = snapshot
            .atomic_results
            .get("n1::defect_rate")
            .expect("atomic result for n1::defect_rate");
        assert!(result.success);
        assert_eq!(result.action.as_ref().unwrap().action, ActionKind::Alert);

        cancel.cancel();
        server.abort();
        handle.await.unwrap().unwrap();
    }
}
