//! Alarm and audit sinks
//!
//! Both are side channels: an alarm that fails or hangs, or an audit write that
//! never lands, must not change what happens to the order.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::order::{Order, StatusFlowEntry};

pub mod templates {
    pub const STUCK_ORDER: &str = "stuck_order";
    pub const SWAP_FALLBACK: &str = "swap_fallback";
    pub const UNMAPPED_COIN: &str = "unmapped_coin";
    pub const ORDER_NOT_FINISHED: &str = "order_not_finished";
}

pub type AlarmParams = BTreeMap<String, String>;

#[async_trait]
pub trait AlarmSink: Send + Sync {
    /// Returns whether the alarm was accepted
    async fn send_alarm(&self, template: &str, params: &AlarmParams) -> bool;
}

/// Writes alarms to the log at `warn`
pub struct LogAlarmSink;

#[async_trait]
impl AlarmSink for LogAlarmSink {
    async fn send_alarm(&self, template: &str, params: &AlarmParams) -> bool {
        warn!(template = template, params = ?params, "ALARM");
        true
    }
}

/// Best-effort alarm front bounded by a timeout
#[derive(Clone)]
pub struct Alarms {
    sink: Arc<dyn AlarmSink>,
    timeout: Duration,
}

impl Alarms {
    pub fn new(sink: Arc<dyn AlarmSink>, timeout: Duration) -> Self {
        Self { sink, timeout }
    }

    pub async fn raise(&self, template: &str, params: AlarmParams) -> bool {
        match tokio::time::timeout(self.timeout, self.sink.send_alarm(template, &params)).await {
            Ok(true) => true,
            Ok(false) => {
                warn!(template = template, "Alarm sink rejected alarm");
                false
            }
            Err(_) => {
                warn!(template = template, timeout = ?self.timeout, "Alarm sink timed out");
                false
            }
        }
    }
}

/// Build alarm params from key/value pairs
pub fn params<const N: usize>(pairs: [(&str, String); N]) -> AlarmParams {
    pairs
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect()
}

/// Search/audit index
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn upsert_order(&self, order: &Order);
    async fn upsert_flow(&self, order_id: Uuid, flow: &[StatusFlowEntry]);
}

/// Emits audit records as debug-level events
pub struct LogAuditSink;

#[async_trait]
impl AuditSink for LogAuditSink {
    async fn upsert_order(&self, order: &Order) {
        debug!(order_id = %order.id, status = %order.status, "audit order");
    }

    async fn upsert_flow(&self, order_id: Uuid, flow: &[StatusFlowEntry]) {
        debug!(order_id = %order_id, entries = flow.len(), "audit flow");
    }
}

/// Fire-and-forget audit front
#[derive(Clone)]
pub struct Auditor {
    sink: Arc<dyn AuditSink>,
}

impl Auditor {
    pub fn new(sink: Arc<dyn AuditSink>) -> Self {
        Self { sink }
    }

    pub fn order(&self, order: Order) {
        let sink = self.sink.clone();
        tokio::spawn(async move { sink.upsert_order(&order).await });
    }

    pub fn flow(&self, order_id: Uuid, flow: Vec<StatusFlowEntry>) {
        let sink = self.sink.clone();
        tokio::spawn(async move { sink.upsert_flow(order_id, &flow).await });
    }
}

#[cfg(any(test, feature = "mock-api"))]
pub mod mock {
    use super::*;
    use std::sync::Mutex;

    /// Keeps every alarm for inspection
    #[derive(Default)]
    pub struct RecordingAlarmSink {
        alarms: Mutex<Vec<(String, AlarmParams)>>,
    }

    impl RecordingAlarmSink {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn alarms(&self) -> Vec<(String, AlarmParams)> {
            self.alarms.lock().unwrap_or_else(|e| e.into_inner()).clone()
        }

        pub fn count(&self, template: &str) -> usize {
            self.alarms().iter().filter(|(t, _)| t == template).count()
        }
    }

    #[async_trait]
    impl AlarmSink for RecordingAlarmSink {
        async fn send_alarm(&self, template: &str, params: &AlarmParams) -> bool {
            self.alarms
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .push((template.to_string(), params.clone()));
            true
        }
    }
}

#[cfg(test)]
mod tests {
    use super::mock::RecordingAlarmSink;
    use super::*;

    struct HangingSink;

    #[async_trait]
    impl AlarmSink for HangingSink {
        async fn send_alarm(&self, _template: &str, _params: &AlarmParams) -> bool {
            std::future::pending::<bool>().await
        }
    }

    #[tokio::test]
    async fn test_hanging_sink_does_not_block() {
        let alarms = Alarms::new(Arc::new(HangingSink), Duration::from_millis(20));
        assert!(!alarms.raise(templates::STUCK_ORDER, AlarmParams::new()).await);
    }

    #[tokio::test]
    async fn test_alarm_is_recorded() {
        let sink = Arc::new(RecordingAlarmSink::new());
        let alarms = Alarms::new(sink.clone(), Duration::from_secs(1));

        let ok = alarms
            .raise(
                templates::UNMAPPED_COIN,
                params([("coin", "BSC_FOO".to_string())]),
            )
            .await;

        assert!(ok);
        assert_eq!(sink.count(templates::UNMAPPED_COIN), 1);
        assert_eq!(sink.alarms()[0].1["coin"], "BSC_FOO");
    }
}
