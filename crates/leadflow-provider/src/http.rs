//! HTTP implementation of [`LeadProvider`].

use crate::audit::TracingAuditSink;
use crate::error::{ProviderError, Result};
use crate::normalize::{extract_leads, parse_detail, parse_search_response};
use crate::payload::build_search_payload;
use crate::provider::{AuditSink, CallOperation, LeadProvider, ProviderCall};
use async_trait::async_trait;
use leadflow_core::{LeadDetail, LeadQuery, ProviderConfig, SearchPage, TaxId};
use reqwest::Client;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Header carrying the API key.
pub const API_KEY_HEADER: &str = "api-key";

/// Build a standard HTTP client with common timeout settings.
///
/// # Errors
/// Returns error if the HTTP client cannot be created.
pub fn build_http_client(timeout_secs: Option<u64>, user_agent: &str) -> Result<Client> {
    Client::builder()
        .timeout(Duration::from_secs(timeout_secs.unwrap_or(30)))
        .user_agent(user_agent)
        .build()
        .map_err(|e| ProviderError::Internal(format!("failed to create HTTP client: {e}")))
}

/// Company-data provider reached over HTTP.
pub struct HttpLeadProvider {
    client: Client,
    base_url: String,
    search_path: String,
    detail_path: String,
    api_key: Option<String>,
    audit: Arc<dyn AuditSink>,
}

impl HttpLeadProvider {
    /// Create a provider from configuration, auditing through `tracing`.
    ///
    /// # Errors
    /// Returns error if the HTTP client cannot be created.
    pub fn new(config: &ProviderConfig) -> Result<Self> {
        let client = build_http_client(Some(config.timeout_secs), &config.user_agent)?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            search_path: config.search_path.clone(),
            detail_path: config.detail_path.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            audit: Arc::new(TracingAuditSink),
        })
    }

    /// Replace the audit sink.
    #[must_use]
    pub fn with_audit_sink(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = audit;
        self
    }

    fn search_url(&self) -> String {
        format!("{}{}", self.base_url, self.search_path)
    }

    fn detail_url(&self, tax_id: &TaxId) -> String {
        format!("{}{}/{}", self.base_url, self.detail_path, tax_id.as_str())
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => request.header(API_KEY_HEADER, key),
            None => request,
        }
    }

    async fn audit(&self, call: ProviderCall) {
        let operation = call.operation;
        if let Err(e) = self.audit.record(call).await {
            tracing::warn!(operation = %operation, "Failed to record provider call: {}", e);
        }
    }

    /// Send a request and read the body, auditing the outcome either way.
    async fn exchange(
        &self,
        operation: CallOperation,
        endpoint: String,
        request_body: serde_json::Value,
        request: reqwest::RequestBuilder,
    ) -> Result<(u16, String)> {
        let started = Instant::now();

        let outcome = match request.send().await {
            Ok(response) => {
                let status = response.status().as_u16();
                match response.text().await {
                    Ok(body) => Ok((status, body)),
                    Err(e) => Err((Some(status), ProviderError::from(e))),
                }
            }
            Err(e) => Err((None, ProviderError::from(e))),
        };

        let call = match &outcome {
            Ok((status, body)) => ProviderCall {
                operation,
                endpoint,
                request: request_body,
                response: Some(body.clone()),
                status: Some(*status),
                duration: started.elapsed(),
                error: None,
            },
            Err((status, e)) => ProviderCall {
                operation,
                endpoint,
                request: request_body,
                response: None,
                status: *status,
                duration: started.elapsed(),
                error: Some(e.to_string()),
            },
        };
        self.audit(call).await;

        outcome.map_err(|(_, e)| e)
    }
}

#[async_trait]
impl LeadProvider for HttpLeadProvider {
    async fn search(&self, query: &LeadQuery, quantity: u32) -> Result<SearchPage> {
        let payload = build_search_payload(query, quantity);
        let url = self.search_url();
        let request = self.authorize(self.client.post(&url).json(&payload));

        let (status, body) = self
            .exchange(CallOperation::Search, url, payload, request)
            .await?;

        if !(200..300).contains(&status) {
            let partial = serde_json::from_str(&body)
                .map(|json| extract_leads(&json))
                .unwrap_or_default();
            tracing::error!(
                status,
                partial = partial.len(),
                body = %crate::error::truncate_chars(&body, crate::error::MAX_ERROR_BODY_CHARS),
                "Provider search failed"
            );
            return Err(ProviderError::status(status, &body, partial));
        }

        let json: serde_json::Value = serde_json::from_str(&body)
            .map_err(|e| ProviderError::Decode(format!("search body is not JSON: {e}")))?;

        let page = parse_search_response(&json, query.page.max(1), quantity);
        tracing::debug!(
            returned = page.leads.len(),
            total = page.total,
            has_more = page.has_more,
            "Provider search succeeded"
        );
        Ok(page)
    }

    async fn detail(&self, tax_id: &str) -> Option<LeadDetail> {
        let Ok(tax_id) = TaxId::parse(tax_id) else {
            tracing::debug!("Skipping detail call for malformed tax id");
            return None;
        };

        let url = self.detail_url(&tax_id);
        let request = self.authorize(self.client.get(&url));

        let (status, body) = match self
            .exchange(CallOperation::Detail, url, serde_json::Value::Null, request)
            .await
        {
            Ok(exchanged) => exchanged,
            Err(e) => {
                tracing::warn!(tax_id = %tax_id, "Provider detail call failed: {}", e);
                return None;
            }
        };

        if !(200..300).contains(&status) {
            tracing::warn!(tax_id = %tax_id, status, "Provider detail returned non-success status");
            return None;
        }

        match serde_json::from_str::<serde_json::Value>(&body) {
            Ok(json) if json.is_object() => Some(parse_detail(&tax_id, &json)),
            Ok(_) => {
                tracing::warn!(tax_id = %tax_id, "Provider detail body is not an object");
                None
            }
            Err(e) => {
                tracing::warn!(tax_id = %tax_id, "Provider detail body is not JSON: {}", e);
                None
            }
        }
    }

    fn provider_id(&self) -> &str {
        "http"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(base_url: &str) -> ProviderConfig {
        ProviderConfig {
            base_url: base_url.to_string(),
            ..ProviderConfig::default()
        }
    }

    #[test]
    fn test_build_http_client() {
        assert!(build_http_client(Some(5), "Leadflow-test").is_ok());
        assert!(build_http_client(None, "Leadflow-test").is_ok());
    }

    #[test]
    fn test_urls_are_joined_without_double_slashes() {
        let provider = HttpLeadProvider::new(&config("http://provider.test/")).expect("provider");
        assert_eq!(provider.search_url(), "http://provider.test/v5/cnpj/pesquisa");

        let tax_id = TaxId::parse("11222333000181").expect("valid tax ID");
        assert_eq!(
            provider.detail_url(&tax_id),
            "http://provider.test/v4/cnpj/11222333000181"
        );
    }

    #[tokio::test]
    async fn test_detail_rejects_malformed_tax_id_without_calling() {
        // Port 9 (discard) would fail the call; a malformed id never gets that far
        let provider = HttpLeadProvider::new(&config("http://127.0.0.1:9")).expect("provider");
        let sink = Arc::new(crate::audit::MemoryAuditSink::new());
        let provider = provider.with_audit_sink(sink.clone());

        assert!(provider.detail("123").await.is_none());
        assert!(sink.calls().is_empty());
    }
}
