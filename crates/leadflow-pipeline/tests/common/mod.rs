//! Shared fixtures for pipeline integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use leadflow_core::{
    LeadDetail, LeadQuery, LeadSummary, OwnerId, PipelineConfig, SearchPage, SessionId, TaxId,
};
use leadflow_db::Database;
use leadflow_pipeline::{LeadPipeline, ManualClock};
use leadflow_provider::{LeadProvider, ProviderError};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

/// Provider double with call counters.
#[derive(Default)]
pub struct FakeProvider {
    leads: Mutex<Vec<LeadSummary>>,
    total: Mutex<Option<u64>>,
    details: Mutex<HashMap<String, LeadDetail>>,
    fail_search: AtomicBool,
    pub search_calls: AtomicUsize,
    pub detail_calls: AtomicUsize,
}

impl FakeProvider {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Leads every search returns, and the total it reports.
    pub fn set_results(&self, leads: Vec<LeadSummary>, total: Option<u64>) {
        *self.leads.lock().expect("leads lock") = leads;
        *self.total.lock().expect("total lock") = total;
    }

    /// Make a detail available for a tax id.
    pub fn add_detail(&self, tax_id: &str, company_name: &str) {
        let tax_id = TaxId::parse(tax_id).expect("valid tax ID");
        let detail = LeadDetail {
            tax_id: tax_id.clone(),
            summary: LeadSummary {
                company_name: Some(company_name.to_string()),
                email: Some(format!("contato@{}.com.br", company_name.to_lowercase())),
                ..LeadSummary::from_tax_id(&tax_id)
            },
            raw: serde_json::json!({ "cnpj": tax_id.as_str(), "razao_social": company_name }),
        };
        self.details
            .lock()
            .expect("details lock")
            .insert(tax_id.as_str().to_string(), detail);
    }

    pub fn fail_searches(&self) {
        self.fail_search.store(true, Ordering::SeqCst);
    }

    pub fn searches(&self) -> usize {
        self.search_calls.load(Ordering::SeqCst)
    }

    pub fn detail_lookups(&self) -> usize {
        self.detail_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LeadProvider for FakeProvider {
    async fn search(&self, query: &LeadQuery, quantity: u32) -> leadflow_provider::Result<SearchPage> {
        self.search_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_search.load(Ordering::SeqCst) {
            return Err(ProviderError::status(503, "upstream unavailable", Vec::new()));
        }

        let mut leads = self.leads.lock().expect("leads lock").clone();
        let returned = leads.len() as u64;
        leads.truncate(quantity as usize);
        let total = self.total.lock().expect("total lock").unwrap_or(returned);
        let page = query.page.max(1);

        Ok(SearchPage {
            leads,
            total,
            has_more: SearchPage::compute_has_more(total, page, quantity),
            page,
            page_size: quantity,
        })
    }

    async fn detail(&self, tax_id: &str) -> Option<LeadDetail> {
        self.detail_calls.fetch_add(1, Ordering::SeqCst);
        let tax_id = TaxId::parse(tax_id).ok()?;
        self.details
            .lock()
            .expect("details lock")
            .get(tax_id.as_str())
            .cloned()
    }

    fn provider_id(&self) -> &str {
        "fake"
    }
}

/// A pipeline on a fresh on-disk database.
pub struct Harness {
    pub pipeline: LeadPipeline,
    pub provider: Arc<FakeProvider>,
    pub db: Database,
    pub clock: Arc<ManualClock>,
    _dir: TempDir,
}

pub async fn harness() -> Harness {
    harness_with(PipelineConfig::default()).await
}

pub async fn harness_with(config: PipelineConfig) -> Harness {
    let dir = TempDir::new().expect("create temp dir");
    let db = Database::new(dir.path().join("leadflow.db"))
        .await
        .expect("create database");
    db.run_migrations().await.expect("run migrations");

    let provider = FakeProvider::new();
    let clock = Arc::new(ManualClock::default());
    let pipeline = LeadPipeline::with_clock(db.clone(), provider.clone(), config, clock.clone());

    Harness {
        pipeline,
        provider,
        db,
        clock,
        _dir: dir,
    }
}

pub fn owner(id: &str) -> OwnerId {
    OwnerId::new(id).expect("valid owner ID")
}

pub fn session(id: &str) -> SessionId {
    SessionId::new(id).expect("valid session ID")
}

pub fn summary(tax_id: &str, company_name: &str) -> LeadSummary {
    let tax_id = TaxId::parse(tax_id).expect("valid tax ID");
    LeadSummary {
        company_name: Some(company_name.to_string()),
        ..LeadSummary::from_tax_id(&tax_id)
    }
}

pub const SOL: &str = "11222333000181";
pub const LUA: &str = "44555666000172";
pub const MAR: &str = "77888999000163";
