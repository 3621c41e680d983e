//! Provider call audit log.

use crate::codec::{decode_time, encode_json, encode_time};
use crate::error::{DatabaseError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{Pool, Row, Sqlite};
use uuid::Uuid;

/// A call to record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewProviderCall {
    /// `search` or `detail`
    pub operation: String,
    /// Full URL called
    pub endpoint: String,
    /// Request payload (query parameters for GET calls)
    pub request: serde_json::Value,
    /// Raw response body, if one was received
    pub response: Option<String>,
    /// HTTP status, if a response was received
    pub status: Option<u16>,
    /// Wall-clock duration
    pub duration_ms: u64,
    /// Transport or decode failure description
    pub error: Option<String>,
}

/// A recorded call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderCallRecord {
    /// Unique identifier
    pub id: String,
    /// The call as recorded
    #[serde(flatten)]
    pub call: NewProviderCall,
    /// When it was recorded
    pub created_at: DateTime<Utc>,
}

/// Append a call to the log.
pub async fn insert(pool: &Pool<Sqlite>, call: &NewProviderCall) -> Result<String> {
    let id = Uuid::new_v4().to_string();
    let duration_ms = i64::try_from(call.duration_ms).unwrap_or(i64::MAX);

    sqlx::query(
        "INSERT INTO provider_calls (id, operation, endpoint, request, response, status, duration_ms, error, created_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&id)
    .bind(&call.operation)
    .bind(&call.endpoint)
    .bind(encode_json(&call.request)?)
    .bind(&call.response)
    .bind(call.status.map(i64::from))
    .bind(duration_ms)
    .bind(&call.error)
    .bind(encode_time(Utc::now()))
    .execute(pool)
    .await?;

    Ok(id)
}

/// Most recent calls, newest first.
pub async fn list_recent(pool: &Pool<Sqlite>, limit: u32) -> Result<Vec<ProviderCallRecord>> {
    let rows = sqlx::query(
        "SELECT id, operation, endpoint, request, response, status, duration_ms, error, created_at
         FROM provider_calls ORDER BY created_at DESC, rowid DESC LIMIT ?",
    )
    .bind(i64::from(limit))
    .fetch_all(pool)
    .await?;

    rows.iter()
        .map(|row| -> Result<ProviderCallRecord> {
            let request: String = row.try_get("request")?;
            let created_at: String = row.try_get("created_at")?;
            let status: Option<i64> = row.try_get("status")?;
            let duration_ms: i64 = row.try_get("duration_ms")?;

            Ok(ProviderCallRecord {
                id: row.try_get("id")?,
                call: NewProviderCall {
                    operation: row.try_get("operation")?,
                    endpoint: row.try_get("endpoint")?,
                    // Request payloads are written by this module; tolerate hand edits.
                    request: serde_json::from_str(&request)
                        .unwrap_or(serde_json::Value::String(request)),
                    response: row.try_get("response")?,
                    status: status
                        .map(|s| {
                            u16::try_from(s).map_err(|_| {
                                DatabaseError::Decode(format!("status out of range: {s}"))
                            })
                        })
                        .transpose()?,
                    duration_ms: u64::try_from(duration_ms).unwrap_or(0),
                    error: row.try_get("error")?,
                },
                created_at: decode_time(&created_at, "created_at")?,
            })
        })
        .collect()
}
