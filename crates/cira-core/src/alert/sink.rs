//! Alert sinks: the concrete effect channels a dispatched verdict can land
//! on. Adapted from the source engine's file-based JSONL sink, generalized
//! to a small trait so `log`/`alert`/`modbus_write` actions can each target
//! a distinct channel behind the same interface.

use std::fs::OpenOptions;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::Mutex;

use serde::Serialize;

use crate::types::ActionVerdict;

/// What a sink needs about where a verdict came from, beyond the verdict
/// itself.
#[derive(Debug, Clone)]
pub struct AlertContext {
    pub composite_id: String,
    pub node_id: String,
}

#[derive(Debug, thiserror::Error)]
#[error("effect error: {0}")]
pub struct EffectError(pub String);

/// An effect channel a triggered verdict can be dispatched to.
pub trait AlertSink: Send + Sync + std::fmt::Debug {
    fn emit(&self, verdict: &ActionVerdict, ctx: &AlertContext) -> Result<(), EffectError>;
}

#[derive(Debug, Serialize)]
struct AlertRecord<'a> {
    composite_id: &'a str,
    node_id: &'a str,
    action: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    severity: Option<crate::types::Severity>,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: &'a Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    register: Option<u32>,
}

fn record<'a>(verdict: &'a ActionVerdict, ctx: &'a AlertContext) -> AlertRecord<'a> {
    AlertRecord {
        composite_id: &ctx.composite_id,
        node_id: &ctx.node_id,
        action: verdict.action.as_str(),
        severity: verdict.severity,
        message: &verdict.message,
        register: verdict.register,
    }
}

/// Emits a structured `tracing` event; backs the `log` action.
#[derive(Debug)]
pub struct LogAlertSink;

impl AlertSink for LogAlertSink {
    fn emit(&self, verdict: &ActionVerdict, ctx: &AlertContext) -> Result<(), EffectError> {
        tracing::info!(
            composite_id = %ctx.composite_id,
            node_id = %ctx.node_id,
            action = verdict.action.as_str(),
            message = verdict.message.as_deref().unwrap_or(""),
            "rule fired"
        );
        Ok(())
    }
}

/// Appends verdicts as JSON Lines to a file; backs the `alert` action.
#[derive(Debug)]
pub struct FileAlertSink {
    writer: Mutex<BufWriter<std::fs::File>>,
}

impl FileAlertSink {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, EffectError> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path.as_ref())
            .map_err(|e| EffectError(format!("cannot open alert file: {e}")))?;
        Ok(Self {
            writer: Mutex::new(BufWriter::new(file)),
        })
    }
}

impl AlertSink for FileAlertSink {
    fn emit(&self, verdict: &ActionVerdict, ctx: &AlertContext) -> Result<(), EffectError> {
        let json = serde_json::to_string(&record(verdict, ctx))
            .map_err(|e| EffectError(format!("cannot encode alert record: {e}")))?;
        let mut w = self
            .writer
            .lock()
            .map_err(|_| EffectError("alert sink lock poisoned".to_string()))?;
        w.write_all(json.as_bytes())
            .and_then(|_| w.write_all(b"\n"))
            .and_then(|_| w.flush())
            .map_err(|e| EffectError(format!("cannot write alert file: {e}")))
    }
}

/// A register write recorded for downstream MODBUS hardware. The physical
/// transport is external; this sink records the write attempt and the
/// `register`/`value` pair the real transport would forward.
#[derive(Debug, Clone, PartialEq)]
pub struct ModbusWrite {
    pub register: u32,
    pub value: i64,
}

pub trait ModbusTransport: Send + Sync {
    fn write(&self, write: &ModbusWrite) -> Result<(), EffectError>;
}

pub struct ModbusAlertSink<T: ModbusTransport> {
    transport: T,
    recorded: Mutex<Vec<ModbusWrite>>,
}

impl<T: ModbusTransport> std::fmt::Debug for ModbusAlertSink<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModbusAlertSink").finish_non_exhaustive()
    }
}

impl<T: ModbusTransport> ModbusAlertSink<T> {
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            recorded: Mutex::new(Vec::new()),
        }
    }

    pub fn recorded_writes(&self) -> Vec<ModbusWrite> {
        self.recorded.lock().expect("modbus sink lock poisoned").clone()
    }
}

impl<T: ModbusTransport> AlertSink for ModbusAlertSink<T> {
    fn emit(&self, verdict: &ActionVerdict, _ctx: &AlertContext) -> Result<(), EffectError> {
        let (Some(register), Some(value)) = (verdict.register, verdict.value) else {
            return Err(EffectError(
                "modbus_write verdict missing register or value".to_string(),
            ));
        };
        let write = ModbusWrite { register, value };
        self.transport.write(&write)?;
        self.recorded
            .lock()
            .map_err(|_| EffectError("modbus sink lock poisoned".to_string()))?
            .push(write);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ActionKind;

    fn verdict(action: ActionKind) -> ActionVerdict {
        ActionVerdict {
            action,
            severity: Some(crate::types::Severity::Warning),
            message: Some("defect rate high".to_string()),
            register: Some(40001),
            value: Some(1),
            reason: None,
        }
    }

    fn ctx() -> AlertContext {
        AlertContext {
            composite_id: "c1".to_string(),
            node_id: "jetson-1".to_string(),
        }
    }

    #[test]
    fn file_sink_writes_jsonl() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("alerts.jsonl");
        let sink = FileAlertSink::open(&path).unwrap();
        sink.emit(&verdict(ActionKind::Alert), &ctx()).unwrap();
        sink.emit(&verdict(ActionKind::Reject), &ctx()).unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = contents.trim().split('\n').collect();
        assert_eq!(lines.len(), 2);
        let parsed: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(parsed["action"], "alert");
        assert_eq!(parsed["node_id"], "jetson-1");
    }

    struct RecordingTransport {
        fail: bool,
    }

    impl ModbusTransport for RecordingTransport {
        fn write(&self, _write: &ModbusWrite) -> Result<(), EffectError> {
            if self.fail {
                Err(EffectError("transport unavailable".to_string()))
            } else {
                Ok(())
            }
        }
    }

    #[test]
    fn modbus_sink_records_successful_writes() {
        let sink = ModbusAlertSink::new(RecordingTransport { fail: false });
        sink.emit(&verdict(ActionKind::ModbusWrite), &ctx()).unwrap();
        assert_eq!(sink.recorded_writes(), vec![ModbusWrite { register: 40001, value: 1 }]);
    }

    #[test]
    fn modbus_sink_rejects_missing_register() {
        let sink = ModbusAlertSink::new(RecordingTransport { fail: false });
        let mut v = verdict(ActionKind::ModbusWrite);
        v.register = None;
        assert!(sink.emit(&v, &ctx()).is_err());
    }

    #[test]
    fn modbus_sink_surfaces_transport_failure() {
        let sink = ModbusAlertSink::new(RecordingTransport { fail: true });
        assert!(sink.emit(&verdict(ActionKind::ModbusWrite), &ctx()).is_err());
        assert!(sink.recorded_writes().is_empty());
    }
}
