//! Provider call audit backed by the `provider_calls` table.

use async_trait::async_trait;
use leadflow_db::provider_calls::{self, NewProviderCall};
use leadflow_provider::{AuditError, AuditSink, ProviderCall};
use sqlx::{Pool, Sqlite};

/// Writes every provider call to the database.
#[derive(Debug, Clone)]
pub struct DatabaseAuditSink {
    pool: Pool<Sqlite>,
}

impl DatabaseAuditSink {
    /// Create a sink on `pool`.
    #[must_use]
    pub fn new(pool: Pool<Sqlite>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AuditSink for DatabaseAuditSink {
    async fn record(&self, call: ProviderCall) -> Result<(), AuditError> {
        let row = NewProviderCall {
            operation: call.operation.to_string(),
            endpoint: call.endpoint,
            request: call.request,
            response: call.response,
            status: call.status,
            duration_ms: u64::try_from(call.duration.as_millis()).unwrap_or(u64::MAX),
            error: call.error,
        };

        provider_calls::insert(&self.pool, &row)
            .await
            .map(|_| ())
            .map_err(|e| AuditError(e.to_string()))
    }
}
