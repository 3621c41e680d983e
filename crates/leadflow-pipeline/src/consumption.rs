//! Credit-gated detail consumption.
//!
//! Resolving a lead returns its full detail. The first real consumption of a
//! tax id by an owner debits the detail cost and persists the lead in the same
//! transaction; every later resolution of that tax id reuses the persisted
//! record for free. Concurrent resolutions for one owner are serialized by
//! [`OwnerLocks`], and the conditional debit plus the `(owner, tax id)` unique
//! key keep the guarantee across processes.

use crate::error::{PipelineError, Result};
use crate::locks::OwnerLocks;
use crate::staging::{LeadStagingCache, StagedLead};
use leadflow_core::{LeadDetail, LeadSummary, OwnerId, SessionId, TaxId};
use leadflow_db::{credits, leads, saved_lists, Database, DatabaseError, DebitOutcome, PersistedLead};
use leadflow_provider::LeadProvider;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Journal reason for detail debits.
pub const DETAIL_DEBIT_REASON: &str = "lead_detail";

/// How the caller names a lead.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum LeadRef {
    /// A staging token from a delivery
    Token(String),
    /// A persisted lead id, e.g. from a saved list
    Persisted(String),
}

/// A resolved lead.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeadResult {
    /// Persisted lead id
    pub lead_id: String,
    /// Staging token, when resolved through one
    pub token: Option<String>,
    /// Summary
    pub summary: LeadSummary,
    /// Full detail
    pub detail: LeadDetail,
    /// Balance after this resolution
    pub balance: i64,
    /// Whether this call debited credits
    pub charged: bool,
}

/// Resolves leads to their detail, charging on first consumption.
pub struct CreditGatedConsumption {
    db: Database,
    provider: Arc<dyn LeadProvider>,
    cache: Arc<LeadStagingCache>,
    locks: Arc<OwnerLocks>,
    cost: i64,
}

impl CreditGatedConsumption {
    /// Create a resolver charging `cost` per first consumption.
    #[must_use]
    pub fn new(
        db: Database,
        provider: Arc<dyn LeadProvider>,
        cache: Arc<LeadStagingCache>,
        locks: Arc<OwnerLocks>,
        cost: i64,
    ) -> Self {
        Self {
            db,
            provider,
            cache,
            locks,
            cost,
        }
    }

    /// Resolve a lead for `owner_id` within `session`.
    ///
    /// # Errors
    /// - `NotFound` for unknown, expired or foreign leads
    /// - `DetailUnavailable` when the provider has no detail; nothing is charged
    /// - `InsufficientCredits` when the balance is below the cost; nothing changes
    /// - `Storage` on persistence failures
    pub async fn resolve(
        &self,
        lead_ref: &LeadRef,
        session: &SessionId,
        owner_id: &OwnerId,
    ) -> Result<LeadResult> {
        match lead_ref {
            LeadRef::Persisted(id) => self.resolve_persisted(owner_id, id).await,
            LeadRef::Token(token) => self.resolve_token(session, owner_id, token).await,
        }
    }

    async fn resolve_persisted(&self, owner_id: &OwnerId, id: &str) -> Result<LeadResult> {
        let lead = leads::get_for_owner(self.db.pool(), owner_id, id)
            .await?
            .ok_or_else(|| PipelineError::NotFound(format!("lead {id}")))?;
        self.reuse(owner_id, lead, None).await
    }

    async fn resolve_token(
        &self,
        session: &SessionId,
        owner_id: &OwnerId,
        token: &str,
    ) -> Result<LeadResult> {
        let not_found = || PipelineError::NotFound("staged lead".to_string());

        let entry = self
            .cache
            .get(session, token)
            .filter(|e| &e.owner_id == owner_id)
            .ok_or_else(not_found)?;

        // Already consumed in this session
        if let Some(persisted_id) = entry.persisted_id.as_deref().filter(|_| entry.consumed) {
            if let Some(lead) = leads::get_for_owner(self.db.pool(), owner_id, persisted_id).await? {
                return self.reuse(owner_id, lead, Some(token)).await;
            }
        }

        // Owner held the lead before staging
        if let Some(existing) = &entry.existing_match {
            if let Some(lead) =
                leads::get_for_owner(self.db.pool(), owner_id, &existing.lead_id).await?
            {
                self.mark_consumed(session, token, &lead);
                return self.reuse(owner_id, lead, Some(token)).await;
            }
        }

        let tax_id = entry
            .summary
            .tax_id()
            .ok_or_else(|| PipelineError::DetailUnavailable(token.to_string()))?;

        let detail = match &entry.detail {
            Some(detail) => detail.clone(),
            None => {
                let detail = self.fetch_detail(&entry, &tax_id).await?;
                self.cache.update(session, token, |e| e.detail = Some(detail.clone()));
                detail
            }
        };

        let (lead, charged) = self.charge(owner_id, &entry, detail).await?;
        self.mark_consumed(session, token, &lead);

        let balance = credits::balance(self.db.pool(), owner_id).await?;
        Ok(LeadResult {
            lead_id: lead.id,
            token: Some(token.to_string()),
            summary: lead.summary,
            detail: lead.detail,
            balance,
            charged,
        })
    }

    async fn fetch_detail(&self, entry: &StagedLead, tax_id: &TaxId) -> Result<LeadDetail> {
        let mut detail = self
            .provider
            .detail(tax_id.as_str())
            .await
            .ok_or_else(|| PipelineError::DetailUnavailable(tax_id.formatted()))?;

        // Staged fields fill what the detail lacks
        detail.summary = entry.summary.clone().merged_with_existing(&detail.summary);
        Ok(detail)
    }

    /// Debit and persist in one transaction, or reuse a lead persisted meanwhile.
    async fn charge(
        &self,
        owner_id: &OwnerId,
        entry: &StagedLead,
        detail: LeadDetail,
    ) -> Result<(PersistedLead, bool)> {
        let _guard = self.locks.lock(owner_id).await;
        let mut tx = self.db.pool().begin().await.map_err(DatabaseError::from)?;

        if let Some(existing) = leads::find_by_tax_id(&mut *tx, owner_id, &detail.tax_id).await? {
            tx.rollback().await.map_err(DatabaseError::from)?;
            tracing::debug!(owner_id = %owner_id, tax_id = %detail.tax_id, "Reusing persisted lead");
            return Ok((existing, false));
        }

        let outcome = credits::debit(
            &mut tx,
            owner_id,
            self.cost,
            DETAIL_DEBIT_REASON,
            Some(detail.tax_id.as_str()),
        )
        .await?;

        if let DebitOutcome::Insufficient { balance } = outcome {
            tx.rollback().await.map_err(DatabaseError::from)?;
            tracing::info!(owner_id = %owner_id, balance, cost = self.cost, "Insufficient credits for detail");
            return Err(PipelineError::InsufficientCredits {
                balance,
                cost: self.cost,
            });
        }

        match saved_lists::record_consumed_lead(
            &mut tx,
            owner_id,
            &detail,
            entry.source_job_id.as_ref(),
        )
        .await
        {
            Ok(lead) => {
                tx.commit().await.map_err(DatabaseError::from)?;
                tracing::info!(
                    owner_id = %owner_id,
                    tax_id = %detail.tax_id,
                    lead_id = %lead.id,
                    cost = self.cost,
                    "Lead detail consumed"
                );
                Ok((lead, true))
            }
            Err(e) if e.is_unique_violation() => {
                // Another process persisted it first; undo our debit and reuse theirs
                tx.rollback().await.map_err(DatabaseError::from)?;
                let existing = leads::find_by_tax_id(self.db.pool(), owner_id, &detail.tax_id)
                    .await?
                    .ok_or_else(|| PipelineError::NotFound(format!("lead {}", detail.tax_id)))?;
                Ok((existing, false))
            }
            Err(e) => {
                tracing::error!(owner_id = %owner_id, tax_id = %detail.tax_id, "Failed to persist consumed lead: {}", e);
                Err(e.into())
            }
        }
    }

    async fn reuse(
        &self,
        owner_id: &OwnerId,
        lead: PersistedLead,
        token: Option<&str>,
    ) -> Result<LeadResult> {
        let balance = credits::balance(self.db.pool(), owner_id).await?;
        Ok(LeadResult {
            lead_id: lead.id,
            token: token.map(str::to_string),
            summary: lead.summary,
            detail: lead.detail,
            balance,
            charged: false,
        })
    }

    fn mark_consumed(&self, session: &SessionId, token: &str, lead: &PersistedLead) {
        let updated = self.cache.update(session, token, |e| {
            e.consumed = true;
            e.persisted_id = Some(lead.id.clone());
            e.detail = Some(lead.detail.clone());
        });
        if !updated {
            tracing::debug!(session = %session, "Staged lead expired during resolution");
        }
    }
}
