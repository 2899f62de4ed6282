//! Exercises the full bootstrap path: load a config, seed a rule store,
//! start a [`CiraRuntime`] against a fake node endpoint, and confirm a
//! triggered verdict reaches the configured alert file.

use std::time::Duration;

use chrono::Utc;
use cira_config::{CiraConfig, HumanDuration, NodeConfig};
use cira_core::types::{
    ActionKind, ActionVerdict, AtomicRule, CompositeConnection, CompositeNode, CompositeRule,
    NodeData, Position, SocketType,
};
use cira_core::RuleStore;
use cira_runtime::lifecycle::CiraRuntime;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

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

#[tokio::test]
async fn triggered_verdict_reaches_the_configured_alert_file() {
    let work_dir = tempfile::tempdir().unwrap();
    let rule_store_root = work_dir.path().join("rules");
    let store = RuleStore::open(&rule_store_root).unwrap();
    store
        .save_atomic(AtomicRule {
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
        })
        .unwrap();
    store
        .save_composite(CompositeRule {
            id: "high_defects".to_string(),
            name: "High defects alert".to_string(),
            description: String::new(),
            enabled: true,
            created_at: Utc::now(),
            created_by: "test".to_string(),
            nodes: vec![
                CompositeNode {
                    id: "atomic".to_string(),
                    position: Position { x: 0.0, y: 0.0 },
                    data: NodeData::Atomic {
                        rule_id: "defect_rate".to_string(),
                        socket_type: SocketType::AnyBoolean,
                        label: None,
                    },
                },
                CompositeNode {
                    id: "out".to_string(),
                    position: Position { x: 1.0, y: 0.0 },
                    data: NodeData::Output {
                        output_action: ActionVerdict {
                            action: ActionKind::Alert,
                            severity: Some(cira_core::types::Severity::Warning),
                            message: Some("defect rate exceeded threshold".to_string()),
                            register: None,
                            value: None,
                            reason: None,
                        },
                    },
                },
            ],
            connections: vec![CompositeConnection {
                id: "w1".to_string(),
                source_node: "atomic".to_string(),
                source_socket: SocketType::AnyBoolean,
                target_node: "out".to_string(),
                target_socket: SocketType::AnyBoolean,
            }],
            output_action: ActionVerdict::pass(),
        })
        .unwrap();

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

    let alert_path = work_dir.path().join("alerts.jsonl");
    let mut config = CiraConfig::defaults();
    config.runtime.tick_interval = HumanDuration::from(Duration::from_millis(20));
    config.rule_store.root = Some(rule_store_root);
    config.nodes = vec![NodeConfig {
        id: "n1".to_string(),
        base_url: format!("http://{addr}"),
    }];
    config.alert.sinks = vec![format!("file://{}", alert_path.display())];

    let runtime = CiraRuntime::start(config, work_dir.path()).await.unwrap();
    let mut snapshot_rx = runtime.snapshot();

    loop {
        snapshot_rx.changed().await.unwrap();
        let snapshot = snapshot_rx.borrow().clone();
        if snapshot
            .composite_results
            .get("n1::high_defects")
            .is_some_and(|r| r.triggered)
        {
            break;
        }
    }

    runtime.shutdown();
    runtime.wait().await.unwrap();
    server.abort();

    let contents = std::fs::read_to_string(&alert_path).unwrap();
    assert!(contents.contains("high_defects"));
    assert!(contents.contains("\"action\":\"alert\""));
}
