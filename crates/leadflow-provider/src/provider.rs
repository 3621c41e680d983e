//! Core provider trait and the audit seam.

use crate::error::Result;
use async_trait::async_trait;
use leadflow_core::{LeadDetail, LeadQuery, SearchPage};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Trait for company-data providers.
///
/// Implementations must be thread-safe (Send + Sync): one instance is shared by
/// the worker and every request handler.
#[async_trait]
pub trait LeadProvider: Send + Sync {
    /// Run a search and return one page of at most `quantity` leads.
    ///
    /// # Errors
    /// Returns `ProviderError` on non-2xx status, transport failure, or an
    /// undecodable body.
    async fn search(&self, query: &LeadQuery, quantity: u32) -> Result<SearchPage>;

    /// Fetch the full record for a tax id.
    ///
    /// Returns `None` for malformed ids and on any failure; never errors.
    async fn detail(&self, tax_id: &str) -> Option<LeadDetail>;

    /// Get the unique identifier for this provider.
    fn provider_id(&self) -> &str;
}

/// Kind of provider call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallOperation {
    /// Search endpoint
    Search,
    /// Detail endpoint
    Detail,
}

impl fmt::Display for CallOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Search => write!(f, "search"),
            Self::Detail => write!(f, "detail"),
        }
    }
}

/// Audit record of one provider call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderCall {
    /// Kind of call
    pub operation: CallOperation,
    /// Full URL called
    pub endpoint: String,
    /// Request payload
    pub request: serde_json::Value,
    /// Raw response body, if received
    pub response: Option<String>,
    /// HTTP status, if received
    pub status: Option<u16>,
    /// Wall-clock duration
    pub duration: Duration,
    /// Transport or decode failure, if any
    pub error: Option<String>,
}

/// Error raised by an audit sink. Never aborts the audited call.
#[derive(Error, Debug)]
#[error("audit sink failed: {0}")]
pub struct AuditError(pub String);

/// Destination for provider call records.
#[async_trait]
pub trait AuditSink: Send + Sync {
    /// Record one call.
    async fn record(&self, call: ProviderCall) -> std::result::Result<(), AuditError>;
}
