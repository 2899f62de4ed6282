//! Alert Dispatcher (C9): translates triggered composite verdicts into
//! external effects, deduplicating repeats per `(compositeId, nodeId)` and
//! retrying failed sink deliveries with bounded exponential backoff on
//! subsequent ticks rather than blocking the tick that produced them.

mod sink;

pub use sink::{AlertContext, AlertSink, EffectError, FileAlertSink, LogAlertSink, ModbusAlertSink, ModbusTransport, ModbusWrite};

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use cira_config::RetryConfig;

use crate::types::ActionVerdict;

struct PendingRetry {
    verdict: ActionVerdict,
    ctx: AlertContext,
    attempt: u32,
    next_attempt_at: DateTime<Utc>,
}

pub struct AlertDispatcher {
    sinks: Vec<Box<dyn AlertSink>>,
    retry: RetryConfig,
    dedup_window: chrono::Duration,
    last_fire: HashMap<(String, String), (DateTime<Utc>, ActionVerdict)>,
    pending: Vec<PendingRetry>,
}

impl AlertDispatcher {
    pub fn new(sinks: Vec<Box<dyn AlertSink>>, retry: RetryConfig, dedup_window_ms: u64) -> Self {
        Self {
            sinks,
            retry,
            dedup_window: chrono::Duration::milliseconds(dedup_window_ms as i64),
            last_fire: HashMap::new(),
            pending: Vec::new(),
        }
    }

    /// Dispatch a triggered verdict, unless an identical verdict already
    /// fired for this `(composite_id, node_id)` within the dedup window.
    pub fn dispatch(&mut self, verdict: &ActionVerdict, ctx: AlertContext, now: DateTime<Utc>) {
        let key = (ctx.composite_id.clone(), ctx.node_id.clone());
        if let Some((last_at, last_verdict)) = self.last_fire.get(&key) {
            if *last_verdict == *verdict && now - *last_at < self.dedup_window {
                return;
            }
        }
        self.last_fire.insert(key, (now, verdict.clone()));
        self.send(verdict, &ctx, now);
    }

    fn send(&mut self, verdict: &ActionVerdict, ctx: &AlertContext, now: DateTime<Utc>) {
        for sink in &self.sinks {
            if let Err(e) = sink.emit(verdict, ctx) {
                tracing::warn!(error = %e, composite_id = %ctx.composite_id, "alert sink failed, scheduling retry");
                self.pending.push(PendingRetry {
                    verdict: verdict.clone(),
                    ctx: ctx.clone(),
                    attempt: 1,
                    next_attempt_at: now + self.backoff(1),
                });
            }
        }
    }

    fn backoff(&self, attempt: u32) -> chrono::Duration {
        let factor = self.retry.factor.saturating_pow(attempt.saturating_sub(1));
        let delay_ms = self.retry.base_delay.as_millis().saturating_mul(factor as u64);
        let capped = delay_ms.min(self.retry.max_delay.as_millis());
        chrono::Duration::milliseconds(capped as i64)
    }

    /// Drive due retries forward. Called once per tick.
    pub fn process_retries(&mut self, now: DateTime<Utc>) {
        let due: Vec<PendingRetry> = {
            let mut due = Vec::new();
            let mut remaining = Vec::new();
            for p in self.pending.drain(..) {
                if p.next_attempt_at <= now {
                    due.push(p);
                } else {
                    remaining.push(p);
                }
            }
            self.pending = remaining;
            due
        };

        for mut p in due {
            let mut delivered = true;
            for sink in &self.sinks {
                if sink.emit(&p.verdict, &p.ctx).is_err() {
                    delivered = false;
                }
            }
            if !delivered && p.attempt < self.retry.max_attempts {
                p.attempt += 1;
                p.next_attempt_at = now + self.backoff(p.attempt);
                self.pending.push(p);
            } else if !delivered {
                tracing::warn!(composite_id = %p.ctx.composite_id, "alert delivery exhausted retries, dropping");
            }
        }
    }

    pub fn pending_retry_count(&self) -> usize {
        self.pending.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ActionKind;
    use std::sync::{Arc, Mutex};

    fn verdict() -> ActionVerdict {
        ActionVerdict {
            action: ActionKind::Alert,
            severity: None,
            message: Some("hi".to_string()),
            register: None,
            value: None,
            reason: None,
        }
    }

    fn ctx() -> AlertContext {
        AlertContext { composite_id: "c1".to_string(), node_id: "n1".to_string() }
    }

    #[derive(Debug)]
    struct CountingSink {
        calls: Arc<Mutex<u32>>,
        fail: bool,
    }

    impl AlertSink for CountingSink {
        fn emit(&self, _verdict: &ActionVerdict, _ctx: &AlertContext) -> Result<(), EffectError> {
            *self.calls.lock().unwrap() += 1;
            if self.fail {
                Err(EffectError("boom".to_string()))
            } else {
                Ok(())
            }
        }
    }

    #[test]
    fn identical_verdict_within_window_is_deduped() {
        let calls = Arc::new(Mutex::new(0));
        let sink = Box::new(CountingSink { calls: calls.clone(), fail: false });
        let mut dispatcher = AlertDispatcher::new(vec![sink], RetryConfig::default(), 60_000);
        let t0 = Utc::now();
        dispatcher.dispatch(&verdict(), ctx(), t0);
        dispatcher.dispatch(&verdict(), ctx(), t0 + chrono::Duration::seconds(1));
        assert_eq!(*calls.lock().unwrap(), 1);
    }

    #[test]
    fn verdict_outside_window_fires_again() {
        let calls = Arc::new(Mutex::new(0));
        let sink = Box::new(CountingSink { calls: calls.clone(), fail: false });
        let mut dispatcher = AlertDispatcher::new(vec![sink], RetryConfig::default(), 1_000);
        let t0 = Utc::now();
        dispatcher.dispatch(&verdict(), ctx(), t0);
        dispatcher.dispatch(&verdict(), ctx(), t0 + chrono::Duration::seconds(5));
        assert_eq!(*calls.lock().unwrap(), 2);
    }

    #[test]
    fn failed_dispatch_is_retried_and_eventually_succeeds() {
        let calls = Arc::new(Mutex::new(0));
        let sink = Arc::new(Mutex::new(true));
        #[derive(Debug)]
        struct FlakySink {
            calls: Arc<Mutex<u32>>,
            fail: Arc<Mutex<bool>>,
        }
        impl AlertSink for FlakySink {
            fn emit(&self, _v: &ActionVerdict, _c: &AlertContext) -> Result<(), EffectError> {
                *self.calls.lock().unwrap() += 1;
                if *self.fail.lock().unwrap() {
                    Err(EffectError("boom".to_string()))
                } else {
                    Ok(())
                }
            }
        }
        let flaky = Box::new(FlakySink { calls: calls.clone(), fail: sink.clone() });
        let mut retry = RetryConfig::default();
        retry.base_delay = cira_config::HumanDuration::from(std::time::Duration::from_millis(1));
        let mut dispatcher = AlertDispatcher::new(vec![flaky], retry, 0);
        let t0 = Utc::now();
        dispatcher.dispatch(&verdict(), ctx(), t0);
        assert_eq!(dispatcher.pending_retry_count(), 1);

        *sink.lock().unwrap() = false;
        dispatcher.process_retries(t0 + chrono::Duration::milliseconds(10));
        assert_eq!(dispatcher.pending_retry_count(), 0);
        assert!(*calls.lock().unwrap() >= 2);
    }

    #[test]
    fn retries_exhaust_after_max_attempts() {
        let calls = Arc::new(Mutex::new(0));
        let sink = Box::new(CountingSink { calls: calls.clone(), fail: true });
        let mut retry = RetryConfig::default();
        retry.base_delay = cira_config::HumanDuration::from(std::time::Duration::from_millis(1));
        retry.max_attempts = 2;
        let mut dispatcher = AlertDispatcher::new(vec![sink], retry, 0);
        let t0 = Utc::now();
        dispatcher.dispatch(&verdict(), ctx(), t0);
        dispatcher.process_retries(t0 + chrono::Duration::milliseconds(10));
        dispatcher.process_retries(t0 + chrono::Duration::milliseconds(100));
        assert_eq!(dispatcher.pending_retry_count(), 0);
    }
}
