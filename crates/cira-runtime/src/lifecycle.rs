//! Bootstrap and shutdown (C8/C9 wiring): turns a loaded [`CiraConfig`] into
//! a running [`CiraRuntime`] — rule store, HTTP client, alert sinks, and the
//! single tick scheduler task — and tears it down cleanly on signal.

use std::path::Path;

use cira_config::CiraConfig;
use cira_core::alert::{AlertDispatcher, AlertSink, FileAlertSink, LogAlertSink, ModbusAlertSink, ModbusTransport, ModbusWrite};
use cira_core::RuleStore;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::{RuntimeReason, RuntimeResult};
use crate::log_macros::{claw_debug, claw_info};
use crate::scheduler::{SnapshotReceiver, TickScheduler};

/// A running engine: the tick scheduler task plus its cancellation handle
/// and a read-only view of the latest published snapshot.
pub struct CiraRuntime {
    cancel: CancellationToken,
    handle: JoinHandle<RuntimeResult<()>>,
    snapshot_rx: SnapshotReceiver,
}

impl CiraRuntime {
    /// Open the rule store, build the HTTP client and alert sinks, and spawn
    /// the tick scheduler. `base_dir` resolves any relative `file://` sink
    /// paths (typically the directory containing `cira.toml`).
    pub async fn start(config: CiraConfig, base_dir: &Path) -> RuntimeResult<Self> {
        let root = config
            .rule_store
            .resolve_root()
            .map_err(|e| RuntimeReason::Bootstrap(format!("cannot resolve rule store root: {e}")))?;
        let rule_store = RuleStore::open(root)
            .map_err(|e| RuntimeReason::Bootstrap(format!("cannot open rule store: {e}")))?;

        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| RuntimeReason::Bootstrap(format!("cannot build http client: {e}")))?;

        let sinks = build_alert_sinks(&config, base_dir)?;
        let dedup_window_ms = config.alert.dedup_window.as_millis();
        let alert = AlertDispatcher::new(sinks, config.alert.retry.clone(), dedup_window_ms);

        let cancel = CancellationToken::new();
        let (scheduler, snapshot_rx) =
            TickScheduler::new(rule_store, client, config, alert, cancel.clone());

        claw_info!(sys, "runtime bootstrap complete");
        let handle = tokio::spawn(scheduler.run());

        Ok(Self {
            cancel,
            handle,
            snapshot_rx,
        })
    }

    /// A live, clonable handle to the latest published snapshot.
    pub fn snapshot(&self) -> SnapshotReceiver {
        self.snapshot_rx.clone()
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Signal the scheduler to stop after its current tick.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    /// Wait for the scheduler task to exit.
    pub async fn wait(self) -> RuntimeResult<()> {
        match self.handle.await {
            Ok(result) => result,
            Err(e) => Err(RuntimeReason::Fatal(format!("scheduler task panicked: {e}")).into()),
        }
    }
}

/// Build alert sinks from `config.alert.sinks` URIs. Relative `file://`
/// paths are resolved against `base_dir`, so `file://alerts/out.jsonl` lands
/// next to the config rather than relative to the process's CWD.
fn build_alert_sinks(config: &CiraConfig, base_dir: &Path) -> RuntimeResult<Vec<Box<dyn AlertSink>>> {
    let mut sinks: Vec<Box<dyn AlertSink>> = Vec::new();
    for raw in &config.alert.sinks {
        if let Some(rest) = raw.strip_prefix("file://") {
            let path = Path::new(rest);
            let path = if path.is_relative() {
                base_dir.join(path)
            } else {
                path.to_path_buf()
            };
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| RuntimeReason::Bootstrap(format!("cannot create {}: {e}", parent.display())))?;
            }
            sinks.push(Box::new(
                FileAlertSink::open(&path)
                    .map_err(|e| RuntimeReason::Bootstrap(format!("cannot open alert file {}: {e}", path.display())))?,
            ));
            claw_debug!(conf, path = %path.display(), "opened alert file sink");
        } else if raw.strip_prefix("log://").is_some() || raw == "log:" {
            sinks.push(Box::new(LogAlertSink));
        } else if raw.strip_prefix("modbus://").is_some() {
            sinks.push(Box::new(ModbusAlertSink::new(LoggingModbusTransport)));
        } else {
            return Err(RuntimeReason::Bootstrap(format!("unknown alert sink scheme: {raw}")).into());
        }
    }
    Ok(sinks)
}

/// Stand-in `ModbusTransport` that records each write as a log event rather
/// than driving real PLC hardware. The physical transport is an external
/// collaborator outside this engine's scope.
struct LoggingModbusTransport;

impl ModbusTransport for LoggingModbusTransport {
    fn write(&self, write: &ModbusWrite) -> Result<(), cira_core::alert::EffectError> {
        claw_info!(alert, register = write.register, value = write.value, "modbus write (logged, no transport configured)");
        Ok(())
    }
}

/// Register Ctrl-C (SIGINT) and SIGTERM handling; cancel the runtime on
/// first signal received.
pub async fn wait_for_signal(cancel: CancellationToken) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate()).expect("failed to listen for SIGTERM");
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                claw_info!(sys, signal = "SIGINT", "received signal, initiating graceful shutdown");
            }
            _ = sigterm.recv() => {
                claw_info!(sys, signal = "SIGTERM", "received signal, initiating graceful shutdown");
            }
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to listen for Ctrl-C");
        claw_info!(sys, "received shutdown signal, initiating graceful shutdown");
    }
    cancel.cancel();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_sink_scheme_is_rejected() {
        let mut config = CiraConfig::defaults();
        config.alert.sinks = vec!["carrier-pigeon://nowhere".to_string()];
        let err = build_alert_sinks(&config, Path::new(".")).unwrap_err();
        assert!(err.to_string().contains("unknown alert sink scheme"));
    }

    #[test]
    fn log_sink_builds_cleanly() {
        let mut config = CiraConfig::defaults();
        config.alert.sinks = vec!["log://".to_string()];
        let sinks = build_alert_sinks(&config, Path::new(".")).unwrap();
        assert_eq!(sinks.len(), 1);
    }

    #[test]
    fn relative_file_sink_resolves_against_base_dir() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = CiraConfig::defaults();
        config.alert.sinks = vec!["file://alerts/out.jsonl".to_string()];
        let sinks = build_alert_sinks(&config, dir.path()).unwrap();
        assert_eq!(sinks.len(), 1);
        assert!(dir.path().join("alerts").join("out.jsonl").exists());
    }
}
