//! Search job worker.
//!
//! Each tick claims at most one job, runs its search against the provider and
//! records the outcome. Provider failures fail the job; they are never retried.
//! Results the store rejects outright fail the job too. Transient storage
//! failures leave the job where it is, and an expired lease hands it to the
//! next claim.

use crate::error::Result;
use chrono::Duration as LeaseDuration;
use leadflow_core::JobId;
use leadflow_db::{search_jobs, Database, DatabaseError};
use leadflow_provider::LeadProvider;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

/// Progress after a job is dequeued.
pub const PROGRESS_CLAIMED: i32 = 10;
/// Progress once the provider answered.
pub const PROGRESS_FETCHED: i32 = 80;

/// What a tick did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    /// No claimable job
    Idle,
    /// Job completed with results
    Completed(JobId),
    /// Job failed; the message is stored on the job
    Failed(JobId),
}

/// Runs claimed search jobs against the provider.
pub struct SearchWorker {
    db: Database,
    provider: Arc<dyn LeadProvider>,
    lease: LeaseDuration,
}

impl SearchWorker {
    /// Create a worker whose claims last `lease`.
    #[must_use]
    pub fn new(db: Database, provider: Arc<dyn LeadProvider>, lease: LeaseDuration) -> Self {
        Self {
            db,
            provider,
            lease,
        }
    }

    /// Process at most one job.
    ///
    /// # Errors
    /// Returns `Storage` if the job store fails transiently. Provider
    /// failures and rejected results are not errors here; they end as a
    /// failed job.
    pub async fn run_one_job(&self) -> Result<TickOutcome> {
        let pool = self.db.pool();

        let Some(job) = search_jobs::claim_next_pending(pool, self.lease).await? else {
            tracing::trace!("No claimable search job");
            return Ok(TickOutcome::Idle);
        };
        let Some(claim) = job.claim_token.clone() else {
            let missing = format!("claimed job {} has no claim token", job.id);
            return Err(DatabaseError::Decode(missing).into());
        };

        tracing::info!(
            job_id = %job.id,
            owner_id = %job.owner_id,
            quantity = job.quantity,
            provider = self.provider.provider_id(),
            "Search job claimed"
        );
        search_jobs::update_progress(pool, &job.id, PROGRESS_CLAIMED).await?;

        let page = match self.provider.search(&job.filters, job.quantity).await {
            Ok(page) => page,
            Err(e) => {
                tracing::error!(
                    job_id = %job.id,
                    partial = e.partial_leads().len(),
                    error = ?e,
                    "Provider search failed"
                );
                self.fail(&job.id, &claim, &e.to_string()).await?;
                return Ok(TickOutcome::Failed(job.id));
            }
        };

        search_jobs::update_progress(pool, &job.id, PROGRESS_FETCHED).await?;

        match search_jobs::complete(pool, &job.id, &claim, &page).await {
            Ok(true) => {
                tracing::info!(
                    job_id = %job.id,
                    results = page.leads.len(),
                    total = page.total,
                    has_more = page.has_more,
                    "Search job completed"
                );
            }
            Ok(false) => {
                tracing::warn!(job_id = %job.id, "Claim lost before the job could be completed");
            }
            Err(e) if e.is_permanent() => {
                tracing::error!(job_id = %job.id, error = ?e, "Search results rejected by the store");
                self.fail(&job.id, &claim, "search results could not be stored")
                    .await?;
                return Ok(TickOutcome::Failed(job.id));
            }
            Err(e) => return Err(e.into()),
        }

        Ok(TickOutcome::Completed(job.id))
    }

    async fn fail(&self, job_id: &JobId, claim: &str, message: &str) -> Result<()> {
        if !search_jobs::fail(self.db.pool(), job_id, claim, message).await? {
            tracing::warn!(job_id = %job_id, "Claim lost before the job could be failed");
        }
        Ok(())
    }

    /// Tick every `interval` until `shutdown` turns true or its sender drops.
    ///
    /// Tick errors are logged and never stop the loop.
    pub async fn run(&self, interval: Duration, mut shutdown: watch::Receiver<bool>) {
        tracing::info!(interval_secs = interval.as_secs(), "Search worker started");

        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            if *shutdown.borrow() {
                break;
            }

            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                _ = ticker.tick() => {
                    if let Err(e) = self.run_one_job().await {
                        tracing::error!(error = ?e, "Search worker tick failed");
                    }
                }
            }
        }

        tracing::info!("Search worker stopped");
    }
}
