//! The pipeline facade.
//!
//! [`LeadPipeline`] is what a request handler talks to: it creates and polls
//! jobs, delivers finished results into the session's staging area, resolves
//! leads through the credit gate, and passes through to the ledger and saved
//! lists. Nothing here waits on the worker.

use crate::clock::{Clock, SystemClock};
use crate::consumption::{CreditGatedConsumption, LeadRef, LeadResult};
use crate::error::{PipelineError, Result};
use crate::locks::OwnerLocks;
use crate::staging::{LeadStagingCache, StagedLeadView};
use crate::worker::SearchWorker;
use leadflow_core::{JobId, LeadQuery, OwnerId, PipelineConfig, SessionId};
use leadflow_db::{
    credits, leads, saved_lists, search_history, search_jobs, CreditTransaction, Database,
    DatabaseError, JobStatus, PersistedLead, SavedList, SearchHistoryEntry, SearchJob,
};
use leadflow_provider::LeadProvider;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Journal reason used when no other is given for a credit.
pub const PURCHASE_REASON: &str = "purchase";

/// What a poll returns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobStatusView {
    /// Job identifier
    pub job_id: JobId,
    /// Lifecycle state
    pub status: JobStatus,
    /// Progress percentage
    pub progress: u8,
    /// Requested page size
    pub quantity: u32,
    /// Completed and not yet delivered
    pub can_consume: bool,
    /// Failure reason
    pub error: Option<String>,
    /// Provider's total estimate
    pub total: Option<u64>,
    /// More pages exist
    pub has_more: Option<bool>,
    /// Page fetched
    pub page: Option<u32>,
}

impl From<&SearchJob> for JobStatusView {
    fn from(job: &SearchJob) -> Self {
        Self {
            job_id: job.id.clone(),
            status: job.status,
            progress: job.progress,
            quantity: job.quantity,
            can_consume: job.can_consume(),
            error: job.error_message.clone(),
            total: job.total_results,
            has_more: job.has_more,
            page: job.page,
        }
    }
}

/// Entry point for callers of the lead-acquisition pipeline.
pub struct LeadPipeline {
    db: Database,
    provider: Arc<dyn LeadProvider>,
    cache: Arc<LeadStagingCache>,
    consumption: CreditGatedConsumption,
    config: PipelineConfig,
}

impl LeadPipeline {
    /// Create a pipeline on the wall clock.
    #[must_use]
    pub fn new(db: Database, provider: Arc<dyn LeadProvider>, config: PipelineConfig) -> Self {
        Self::with_clock(db, provider, config, Arc::new(SystemClock))
    }

    /// Create a pipeline whose staging expiry follows `clock`.
    #[must_use]
    pub fn with_clock(
        db: Database,
        provider: Arc<dyn LeadProvider>,
        config: PipelineConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let ttl = minutes(config.staging_ttl_minutes);
        let cache = Arc::new(LeadStagingCache::new(clock, ttl));
        let consumption = CreditGatedConsumption::new(
            db.clone(),
            provider.clone(),
            cache.clone(),
            Arc::new(OwnerLocks::new()),
            config.detail_cost,
        );

        Self {
            db,
            provider,
            cache,
            consumption,
            config,
        }
    }

    /// A worker sharing this pipeline's store and provider.
    #[must_use]
    pub fn worker(&self) -> SearchWorker {
        SearchWorker::new(
            self.db.clone(),
            self.provider.clone(),
            seconds(self.config.job_lease_secs),
        )
    }

    /// The session staging area.
    #[must_use]
    pub fn staging(&self) -> &LeadStagingCache {
        &self.cache
    }

    /// Submit a search. Filters are normalized and validated, quantity is
    /// clamped to `[1, max_quantity]`.
    ///
    /// # Errors
    /// `InvalidQuery` for rejected filters, `Storage` if the insert fails.
    pub async fn create_job(
        &self,
        owner_id: &OwnerId,
        filters: LeadQuery,
        quantity: u32,
    ) -> Result<JobId> {
        let filters = filters.normalized();
        filters.validate()?;
        let quantity = quantity.clamp(1, self.config.max_quantity.max(1));

        let job = search_jobs::create(self.db.pool(), owner_id, &filters, quantity).await?;
        tracing::info!(job_id = %job.id, owner_id = %owner_id, quantity, "Search submitted");
        Ok(job.id)
    }

    /// Like [`Self::create_job`], but returns the owner's open job if one exists.
    pub async fn create_job_exclusive(
        &self,
        owner_id: &OwnerId,
        filters: LeadQuery,
        quantity: u32,
    ) -> Result<JobId> {
        if let Some(open) = search_jobs::find_open_job(self.db.pool(), owner_id).await? {
            tracing::debug!(job_id = %open.id, owner_id = %owner_id, "Reusing open search job");
            return Ok(open.id);
        }
        self.create_job(owner_id, filters, quantity).await
    }

    /// Poll a job.
    ///
    /// # Errors
    /// `NotFound` for unknown or foreign jobs.
    pub async fn get_status(&self, job_id: &JobId, owner_id: &OwnerId) -> Result<JobStatusView> {
        let job = self.owned_job(job_id, owner_id).await?;
        Ok(JobStatusView::from(&job))
    }

    /// Stage a completed job's results for the session.
    ///
    /// Repeating the call returns the same staged leads while the session
    /// still holds them, and re-stages from the stored results otherwise.
    ///
    /// # Errors
    /// `NotFound` for unknown or foreign jobs, `JobNotReady` unless completed.
    pub async fn deliver(
        &self,
        job_id: &JobId,
        session: &SessionId,
        owner_id: &OwnerId,
    ) -> Result<Vec<StagedLeadView>> {
        let job = self.owned_job(job_id, owner_id).await?;
        if job.status != JobStatus::Completed {
            return Err(PipelineError::JobNotReady(job_id.to_string()));
        }

        if let Some(views) = self.cache.delivered(session, job_id) {
            tracing::debug!(job_id = %job_id, session = %session, "Delivery repeated");
            return Ok(views);
        }

        let results = job.results.as_deref().unwrap_or_default();
        let views = self
            .cache
            .stage(
                self.db.pool(),
                session,
                owner_id,
                Some(job_id),
                results,
                &job.filters,
            )
            .await?;

        search_history::record(self.db.pool(), &job).await?;
        if search_jobs::mark_delivered(self.db.pool(), job_id).await? {
            tracing::info!(job_id = %job_id, owner_id = %owner_id, leads = views.len(), "Search delivered");
        }

        Ok(views)
    }

    /// Resolve a lead to its full detail, charging on first consumption.
    pub async fn resolve(
        &self,
        lead_ref: &LeadRef,
        session: &SessionId,
        owner_id: &OwnerId,
    ) -> Result<LeadResult> {
        self.consumption.resolve(lead_ref, session, owner_id).await
    }

    /// Add credits; returns the new balance.
    pub async fn credit(
        &self,
        owner_id: &OwnerId,
        amount: i64,
        reason: Option<&str>,
        reference: Option<&str>,
    ) -> Result<i64> {
        credits::credit(
            self.db.pool(),
            owner_id,
            amount,
            reason.unwrap_or(PURCHASE_REASON),
            reference,
        )
        .await
        .map_err(from_store)
    }

    /// Current balance.
    pub async fn balance(&self, owner_id: &OwnerId) -> Result<i64> {
        Ok(credits::balance(self.db.pool(), owner_id).await?)
    }

    /// Ledger movements, newest first.
    pub async fn credit_history(
        &self,
        owner_id: &OwnerId,
        limit: u32,
    ) -> Result<Vec<CreditTransaction>> {
        Ok(credits::transactions_for_owner(self.db.pool(), owner_id, limit).await?)
    }

    /// Owner's jobs, newest first.
    pub async fn jobs(&self, owner_id: &OwnerId, limit: u32) -> Result<Vec<SearchJob>> {
        Ok(search_jobs::list_for_owner(self.db.pool(), owner_id, limit).await?)
    }

    /// Delivered searches, newest first.
    pub async fn search_history(
        &self,
        owner_id: &OwnerId,
        limit: u32,
    ) -> Result<Vec<SearchHistoryEntry>> {
        Ok(search_history::list_for_owner(self.db.pool(), owner_id, limit).await?)
    }

    /// Owner's persisted leads, newest first.
    pub async fn persisted_leads(&self, owner_id: &OwnerId, limit: u32) -> Result<Vec<PersistedLead>> {
        Ok(leads::list_for_owner(self.db.pool(), owner_id, limit).await?)
    }

    /// Create a saved list, or return the one with the same name.
    pub async fn create_list(&self, owner_id: &OwnerId, name: &str) -> Result<SavedList> {
        saved_lists::create_list(self.db.pool(), owner_id, name)
            .await
            .map_err(from_store)
    }

    /// Owner's saved lists.
    pub async fn lists(&self, owner_id: &OwnerId) -> Result<Vec<SavedList>> {
        Ok(saved_lists::lists_for_owner(self.db.pool(), owner_id).await?)
    }

    /// File a persisted lead into a list. Returns `false` if already there.
    pub async fn add_to_list(&self, owner_id: &OwnerId, list_id: &str, lead_id: &str) -> Result<bool> {
        saved_lists::add_to_list(self.db.pool(), owner_id, list_id, lead_id)
            .await
            .map_err(from_store)
    }

    /// Leads in a list.
    pub async fn list_items(&self, owner_id: &OwnerId, list_id: &str) -> Result<Vec<PersistedLead>> {
        saved_lists::list_items(self.db.pool(), owner_id, list_id)
            .await
            .map_err(from_store)
    }

    /// Drop expired staged leads.
    pub fn purge_expired(&self) -> usize {
        self.cache.purge_expired()
    }

    async fn owned_job(&self, job_id: &JobId, owner_id: &OwnerId) -> Result<SearchJob> {
        search_jobs::get_for_owner(self.db.pool(), job_id, owner_id)
            .await?
            .ok_or_else(|| PipelineError::NotFound(format!("job {job_id}")))
    }
}

/// Caller mistakes reported by the store keep their meaning.
fn from_store(err: DatabaseError) -> PipelineError {
    match err {
        DatabaseError::NotFoundWithMessage(msg) => PipelineError::NotFound(msg),
        DatabaseError::InvalidInput(msg) => PipelineError::InvalidQuery(msg),
        other => PipelineError::Storage(other),
    }
}

fn minutes(value: u64) -> chrono::Duration {
    i64::try_from(value)
        .ok()
        .and_then(chrono::Duration::try_minutes)
        .unwrap_or(chrono::Duration::MAX)
}

fn seconds(value: u64) -> chrono::Duration {
    i64::try_from(value)
        .ok()
        .and_then(chrono::Duration::try_seconds)
        .unwrap_or(chrono::Duration::MAX)
}
