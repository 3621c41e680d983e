//! Built-in audit sinks.

use crate::provider::{AuditError, AuditSink, ProviderCall};
use async_trait::async_trait;
use std::sync::Mutex;

/// Logs each call through `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAuditSink;

#[async_trait]
impl AuditSink for TracingAuditSink {
    async fn record(&self, call: ProviderCall) -> Result<(), AuditError> {
        tracing::info!(
            operation = %call.operation,
            endpoint = %call.endpoint,
            status = ?call.status,
            duration_ms = u64::try_from(call.duration.as_millis()).unwrap_or(u64::MAX),
            error = ?call.error,
            "Provider call"
        );
        Ok(())
    }
}

/// Keeps calls in memory. Handy for tests and diagnostics.
#[derive(Debug, Default)]
pub struct MemoryAuditSink {
    calls: Mutex<Vec<ProviderCall>>,
}

impl MemoryAuditSink {
    /// Create an empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of recorded calls, oldest first.
    #[must_use]
    pub fn calls(&self) -> Vec<ProviderCall> {
        self.calls
            .lock()
            .map(|calls| calls.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl AuditSink for MemoryAuditSink {
    async fn record(&self, call: ProviderCall) -> Result<(), AuditError> {
        self.calls
            .lock()
            .map_err(|e| AuditError(format!("audit buffer poisoned: {e}")))?
            .push(call);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::CallOperation;
    use std::time::Duration;

    fn call() -> ProviderCall {
        ProviderCall {
            operation: CallOperation::Detail,
            endpoint: "http://provider.test/v4/cnpj/11222333000181".to_string(),
            request: serde_json::Value::Null,
            response: Some("{}".to_string()),
            status: Some(200),
            duration: Duration::from_millis(12),
            error: None,
        }
    }

    #[tokio::test]
    async fn test_memory_sink_records_in_order() {
        let sink = MemoryAuditSink::new();
        sink.record(call()).await.expect("record first");
        let mut second = call();
        second.operation = CallOperation::Search;
        sink.record(second).await.expect("record second");

        let calls = sink.calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].operation, CallOperation::Detail);
        assert_eq!(calls[1].operation, CallOperation::Search);
    }

    #[tokio::test]
    async fn test_tracing_sink_accepts_calls() {
        TracingAuditSink.record(call()).await.expect("tracing sink");
    }
}
