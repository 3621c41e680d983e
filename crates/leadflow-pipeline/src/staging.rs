//! Session-scoped lead staging.
//!
//! Delivered search results are staged here under opaque tokens, one fresh
//! token per lead per staging event. Staging is also where dedup happens: the
//! whole batch is matched against the owner's persisted leads in a single
//! query, and matches carry their saved data and list names along.
//!
//! The cache is ephemeral. Entries expire `ttl` after staging and are invisible
//! from then on; [`LeadStagingCache::purge_expired`] reclaims their memory.

use crate::clock::Clock;
use chrono::{DateTime, Duration, Utc};
use leadflow_core::{JobId, LeadDetail, LeadQuery, LeadSummary, OwnerId, SessionId, TaxId};
use leadflow_db::{saved_lists, ExistingLead};
use rand::{rngs::OsRng, RngCore};
use serde::{Deserialize, Serialize};
use sqlx::{Pool, Sqlite};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Random bytes per token.
pub const TOKEN_BYTES: usize = 32;

/// A lead held in a session's staging area.
#[derive(Debug, Clone, PartialEq)]
pub struct StagedLead {
    /// Opaque handle given to the caller
    pub token: String,
    /// Owner of the session that staged it
    pub owner_id: OwnerId,
    /// Job whose results produced it
    pub source_job_id: Option<JobId>,
    /// Summary after merging any existing match
    pub summary: LeadSummary,
    /// Full detail, once fetched
    pub detail: Option<LeadDetail>,
    /// Whether the detail has been consumed
    pub consumed: bool,
    /// Persisted lead backing the consumption
    pub persisted_id: Option<String>,
    /// Lead the owner already holds with the same tax id
    pub existing_match: Option<ExistingLead>,
    /// End of visibility
    pub expires_at: DateTime<Utc>,
}

impl StagedLead {
    /// Caller-facing form.
    #[must_use]
    pub fn view(&self) -> StagedLeadView {
        StagedLeadView {
            token: self.token.clone(),
            summary: self.summary.clone(),
            already_imported: self.existing_match.is_some(),
            imported_lists: self
                .existing_match
                .as_ref()
                .map(|m| m.lists.clone())
                .unwrap_or_default(),
        }
    }
}

/// What the caller sees for a staged lead.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StagedLeadView {
    /// Token for later resolution
    pub token: String,
    /// Merged summary
    #[serde(flatten)]
    pub summary: LeadSummary,
    /// The owner already holds this lead
    pub already_imported: bool,
    /// Lists that hold it
    pub imported_lists: Vec<String>,
}

#[derive(Debug, Clone)]
struct Delivery {
    tokens: Vec<String>,
    expires_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct CacheState {
    entries: HashMap<(SessionId, String), StagedLead>,
    deliveries: HashMap<(SessionId, JobId), Delivery>,
    last_filters: HashMap<SessionId, (LeadQuery, DateTime<Utc>)>,
}

/// In-memory staging store keyed by `(session, token)`.
pub struct LeadStagingCache {
    clock: Arc<dyn Clock>,
    ttl: Duration,
    state: Mutex<CacheState>,
}

impl LeadStagingCache {
    /// Create an empty cache whose entries live for `ttl`.
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>, ttl: Duration) -> Self {
        Self {
            clock,
            ttl,
            state: Mutex::new(CacheState::default()),
        }
    }

    /// Stage a batch of leads for a session.
    ///
    /// Existing matches are looked up in one query; their non-blank summary
    /// fields win over the fresh ones. When `job_id` is given, the produced
    /// tokens are remembered for [`Self::delivered`].
    pub async fn stage(
        &self,
        pool: &Pool<Sqlite>,
        session: &SessionId,
        owner_id: &OwnerId,
        job_id: Option<&JobId>,
        leads: &[LeadSummary],
        filters: &LeadQuery,
    ) -> leadflow_db::Result<Vec<StagedLeadView>> {
        let tax_ids: Vec<TaxId> = leads.iter().filter_map(LeadSummary::tax_id).collect();
        let existing = saved_lists::lookup_by_tax_ids(pool, owner_id, &tax_ids).await?;

        let now = self.clock.now();
        let expires_at = now
            .checked_add_signed(self.ttl)
            .unwrap_or(DateTime::<Utc>::MAX_UTC);

        let staged: Vec<StagedLead> = leads
            .iter()
            .map(|lead| {
                let existing_match = lead.tax_id().and_then(|t| existing.get(&t).cloned());
                let summary = match &existing_match {
                    Some(found) => lead.clone().merged_with_existing(&found.summary),
                    None => lead.clone(),
                };
                StagedLead {
                    token: generate_token(),
                    owner_id: owner_id.clone(),
                    source_job_id: job_id.cloned(),
                    summary,
                    detail: None,
                    consumed: false,
                    persisted_id: None,
                    existing_match,
                    expires_at,
                }
            })
            .collect();

        let views: Vec<StagedLeadView> = staged.iter().map(StagedLead::view).collect();

        let mut state = self.lock_state();
        if let Some(job_id) = job_id {
            state.deliveries.insert(
                (session.clone(), job_id.clone()),
                Delivery {
                    tokens: staged.iter().map(|s| s.token.clone()).collect(),
                    expires_at,
                },
            );
        }
        state
            .last_filters
            .insert(session.clone(), (filters.clone(), expires_at));
        for lead in staged {
            state
                .entries
                .insert((session.clone(), lead.token.clone()), lead);
        }
        drop(state);

        tracing::debug!(
            session = %session,
            owner_id = %owner_id,
            staged = views.len(),
            already_imported = views.iter().filter(|v| v.already_imported).count(),
            "Leads staged"
        );

        Ok(views)
    }

    /// Views from an earlier delivery of `job_id` to this session.
    ///
    /// `None` when the session never received the job, or when any of its
    /// entries has expired.
    #[must_use]
    pub fn delivered(&self, session: &SessionId, job_id: &JobId) -> Option<Vec<StagedLeadView>> {
        let now = self.clock.now();
        let state = self.lock_state();

        let delivery = state
            .deliveries
            .get(&(session.clone(), job_id.clone()))
            .filter(|d| d.expires_at > now)?;

        delivery
            .tokens
            .iter()
            .map(|token| {
                state
                    .entries
                    .get(&(session.clone(), token.clone()))
                    .filter(|e| e.expires_at > now)
                    .map(StagedLead::view)
            })
            .collect()
    }

    /// Fetch a live entry.
    #[must_use]
    pub fn get(&self, session: &SessionId, token: &str) -> Option<StagedLead> {
        let now = self.clock.now();
        self.lock_state()
            .entries
            .get(&(session.clone(), token.to_string()))
            .filter(|e| e.expires_at > now)
            .cloned()
    }

    /// Mutate a live entry in place. Returns `false` if it is gone or expired.
    pub fn update<F>(&self, session: &SessionId, token: &str, apply: F) -> bool
    where
        F: FnOnce(&mut StagedLead),
    {
        let now = self.clock.now();
        let mut state = self.lock_state();
        match state
            .entries
            .get_mut(&(session.clone(), token.to_string()))
            .filter(|e| e.expires_at > now)
        {
            Some(entry) => {
                apply(entry);
                true
            }
            None => false,
        }
    }

    /// Filters of the session's most recent staging.
    #[must_use]
    pub fn last_filters(&self, session: &SessionId) -> Option<LeadQuery> {
        let now = self.clock.now();
        self.lock_state()
            .last_filters
            .get(session)
            .filter(|(_, expires_at)| *expires_at > now)
            .map(|(filters, _)| filters.clone())
    }

    /// Drop expired entries. Returns how many leads were removed.
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now();
        let mut state = self.lock_state();

        let before = state.entries.len();
        state.entries.retain(|_, e| e.expires_at > now);
        state.deliveries.retain(|_, d| d.expires_at > now);
        state.last_filters.retain(|_, (_, expires_at)| *expires_at > now);
        let removed = before - state.entries.len();

        if removed > 0 {
            tracing::debug!(removed, "Purged expired staged leads");
        }
        removed
    }

    /// Number of live entries.
    #[must_use]
    pub fn len(&self) -> usize {
        let now = self.clock.now();
        self.lock_state()
            .entries
            .values()
            .filter(|e| e.expires_at > now)
            .count()
    }

    /// True when no live entry remains.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock_state(&self) -> MutexGuard<'_, CacheState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Mint an unguessable token.
fn generate_token() -> String {
    let mut bytes = [0u8; TOKEN_BYTES];
    OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use leadflow_db::Database;
    use serde_json::json;

    async fn setup_test_db() -> Database {
        let db = Database::new(":memory:").await.expect("create test database");
        db.run_migrations().await.expect("run migrations");
        db
    }

    fn session(id: &str) -> SessionId {
        SessionId::new(id).expect("valid session ID")
    }

    fn owner(id: &str) -> OwnerId {
        OwnerId::new(id).expect("valid owner ID")
    }

    fn lead(tax_id: &str, name: &str) -> LeadSummary {
        let tax_id = TaxId::parse(tax_id).expect("valid tax ID");
        LeadSummary {
            company_name: Some(name.to_string()),
            ..LeadSummary::from_tax_id(&tax_id)
        }
    }

    fn cache(clock: Arc<ManualClock>) -> LeadStagingCache {
        LeadStagingCache::new(clock, Duration::minutes(30))
    }

    #[test]
    fn test_tokens_are_hex_and_distinct() {
        let a = generate_token();
        let b = generate_token();
        assert_eq!(a.len(), TOKEN_BYTES * 2);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn test_stage_and_get() {
        let db = setup_test_db().await;
        let clock = Arc::new(ManualClock::default());
        let cache = cache(clock);
        let s = session("s1");
        let alice = owner("alice");

        let views = cache
            .stage(
                db.pool(),
                &s,
                &alice,
                None,
                &[lead("11222333000181", "Sol"), lead("44555666000172", "Lua")],
                &LeadQuery::default(),
            )
            .await
            .expect("stage");

        assert_eq!(views.len(), 2);
        assert!(views.iter().all(|v| !v.already_imported));
        assert_ne!(views[0].token, views[1].token);

        let entry = cache.get(&s, &views[0].token).expect("entry staged");
        assert_eq!(entry.owner_id, alice);
        assert_eq!(entry.summary.company_name.as_deref(), Some("Sol"));
        assert!(!entry.consumed);

        // Tokens are scoped to their session
        assert!(cache.get(&session("s2"), &views[0].token).is_none());
    }

    #[tokio::test]
    async fn test_unbounded_ttl_never_expires() {
        let db = setup_test_db().await;
        let clock = Arc::new(ManualClock::default());
        let cache = LeadStagingCache::new(clock.clone(), Duration::MAX);
        let s = session("s1");

        let views = cache
            .stage(
                db.pool(),
                &s,
                &owner("alice"),
                None,
                &[lead("11222333000181", "Sol")],
                &LeadQuery::default(),
            )
            .await
            .expect("stage");

        let entry = cache.get(&s, &views[0].token).expect("entry staged");
        assert_eq!(entry.expires_at, DateTime::<Utc>::MAX_UTC);

        clock.advance(Duration::days(3650));
        assert!(cache.get(&s, &views[0].token).is_some());
        assert_eq!(cache.purge_expired(), 0);
    }

    #[tokio::test]
    async fn test_existing_match_merges_and_flags() {
        let db = setup_test_db().await;
        let alice = owner("alice");
        let tax_id = TaxId::parse("11222333000181").expect("valid tax ID");
        let detail = LeadDetail {
            tax_id: tax_id.clone(),
            summary: LeadSummary {
                company_name: Some("Sol Saved".to_string()),
                email: Some(String::new()),
                ..LeadSummary::default()
            },
            raw: json!({}),
        };
        let mut conn = db.pool().acquire().await.expect("acquire");
        saved_lists::record_consumed_lead(&mut conn, &alice, &detail, None)
            .await
            .expect("persist lead");
        drop(conn);

        let mut fresh = lead("11222333000181", "Sol Fresh");
        fresh.email = Some("fresh@sol.com.br".to_string());

        let cache = cache(Arc::new(ManualClock::default()));
        let views = cache
            .stage(db.pool(), &session("s1"), &alice, None, &[fresh], &LeadQuery::default())
            .await
            .expect("stage");

        assert!(views[0].already_imported);
        assert_eq!(views[0].imported_lists, vec!["Unsorted".to_string()]);
        assert_eq!(views[0].summary.company_name.as_deref(), Some("Sol Saved"));
        assert_eq!(views[0].summary.email.as_deref(), Some("fresh@sol.com.br"));

        // Another owner's saved lead is not a match
        let views = cache
            .stage(
                db.pool(),
                &session("s2"),
                &owner("bob"),
                None,
                &[lead("11222333000181", "Sol")],
                &LeadQuery::default(),
            )
            .await
            .expect("stage");
        assert!(!views[0].already_imported);
    }

    #[tokio::test]
    async fn test_expiry_and_purge() {
        let db = setup_test_db().await;
        let clock = Arc::new(ManualClock::default());
        let cache = cache(clock.clone());
        let s = session("s1");
        let job = JobId::generate();

        let views = cache
            .stage(
                db.pool(),
                &s,
                &owner("alice"),
                Some(&job),
                &[lead("11222333000181", "Sol")],
                &LeadQuery::default(),
            )
            .await
            .expect("stage");
        assert!(cache.delivered(&s, &job).is_some());
        assert!(cache.last_filters(&s).is_some());

        clock.advance(Duration::minutes(31));
        assert!(cache.get(&s, &views[0].token).is_none());
        assert!(cache.delivered(&s, &job).is_none());
        assert!(!cache.update(&s, &views[0].token, |e| e.consumed = true));
        assert!(cache.is_empty());

        assert_eq!(cache.purge_expired(), 1);
        assert_eq!(cache.purge_expired(), 0);
    }

    #[tokio::test]
    async fn test_delivered_returns_same_tokens() {
        let db = setup_test_db().await;
        let cache = cache(Arc::new(ManualClock::default()));
        let s = session("s1");
        let job = JobId::generate();

        let first = cache
            .stage(
                db.pool(),
                &s,
                &owner("alice"),
                Some(&job),
                &[lead("11222333000181", "Sol"), lead("44555666000172", "Lua")],
                &LeadQuery::default(),
            )
            .await
            .expect("stage");

        let again = cache.delivered(&s, &job).expect("delivery remembered");
        assert_eq!(first, again);
        assert!(cache.delivered(&session("other"), &job).is_none());
    }

    #[tokio::test]
    async fn test_update_mutates_entry() {
        let db = setup_test_db().await;
        let cache = cache(Arc::new(ManualClock::default()));
        let s = session("s1");

        let views = cache
            .stage(
                db.pool(),
                &s,
                &owner("alice"),
                None,
                &[lead("11222333000181", "Sol")],
                &LeadQuery::default(),
            )
            .await
            .expect("stage");

        assert!(cache.update(&s, &views[0].token, |e| {
            e.consumed = true;
            e.persisted_id = Some("lead-1".to_string());
        }));
        let entry = cache.get(&s, &views[0].token).expect("entry");
        assert!(entry.consumed);
        assert_eq!(entry.persisted_id.as_deref(), Some("lead-1"));
    }

    #[tokio::test]
    async fn test_leads_without_tax_id_are_staged() {
        let db = setup_test_db().await;
        let cache = cache(Arc::new(ManualClock::default()));
        let nameless = LeadSummary {
            company_name: Some("No Id".to_string()),
            ..LeadSummary::default()
        };

        let views = cache
            .stage(
                db.pool(),
                &session("s1"),
                &owner("alice"),
                None,
                &[nameless],
                &LeadQuery::default(),
            )
            .await
            .expect("stage");
        assert_eq!(views.len(), 1);
        assert!(!views[0].already_imported);
    }
}
