//! Search history: one entry per delivered search.

use crate::codec::{decode_job_id, decode_json, decode_owner, decode_time, decode_u32, encode_json, encode_time, encode_u64};
use crate::error::{DatabaseError, Result};
use crate::search_jobs::SearchJob;
use chrono::{DateTime, Utc};
use leadflow_core::{JobId, LeadQuery, OwnerId};
use serde::{Deserialize, Serialize};
use sqlx::{Pool, Row, Sqlite};
use uuid::Uuid;

/// A delivered search.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchHistoryEntry {
    /// Unique identifier
    pub id: String,
    /// Owning account
    pub owner_id: OwnerId,
    /// Job that produced the results
    pub job_id: JobId,
    /// Filters used
    pub filters: LeadQuery,
    /// Requested page size
    pub quantity: u32,
    /// Provider's total estimate
    pub total_results: Option<u64>,
    /// Leads actually returned
    pub result_count: u32,
    /// Delivery time
    pub created_at: DateTime<Utc>,
}

/// Record a delivered job. A job is recorded at most once.
///
/// Returns `true` if a new entry was written.
pub async fn record(pool: &Pool<Sqlite>, job: &SearchJob) -> Result<bool> {
    let result_count = job.results.as_ref().map_or(0, Vec::len);
    let result_count = i64::try_from(result_count)
        .map_err(|_| DatabaseError::InvalidInput(format!("result count too large: {result_count}")))?;
    let total_results = job.total_results.map(encode_u64);

    let result = sqlx::query(
        "INSERT INTO search_history (id, owner_id, job_id, filters, quantity, total_results, result_count, created_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?)
         ON CONFLICT (job_id) DO NOTHING",
    )
    .bind(Uuid::new_v4().to_string())
    .bind(job.owner_id.as_str())
    .bind(job.id.as_str())
    .bind(encode_json(&job.filters)?)
    .bind(i64::from(job.quantity))
    .bind(total_results)
    .bind(result_count)
    .bind(encode_time(Utc::now()))
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// Owner's history, newest first.
pub async fn list_for_owner(
    pool: &Pool<Sqlite>,
    owner_id: &OwnerId,
    limit: u32,
) -> Result<Vec<SearchHistoryEntry>> {
    let rows = sqlx::query(
        "SELECT id, owner_id, job_id, filters, quantity, total_results, result_count, created_at
         FROM search_history WHERE owner_id = ?
         ORDER BY created_at DESC, rowid DESC LIMIT ?",
    )
    .bind(owner_id.as_str())
    .bind(i64::from(limit))
    .fetch_all(pool)
    .await?;

    rows.iter()
        .map(|row| -> Result<SearchHistoryEntry> {
            let filters: String = row.try_get("filters")?;
            let created_at: String = row.try_get("created_at")?;
            let total_results: Option<i64> = row.try_get("total_results")?;

            Ok(SearchHistoryEntry {
                id: row.try_get("id")?,
                owner_id: decode_owner(row.try_get("owner_id")?)?,
                job_id: decode_job_id(row.try_get("job_id")?)?,
                filters: decode_json(&filters, "filters")?,
                quantity: decode_u32(row.try_get("quantity")?, "quantity")?,
                total_results: total_results.map(|t| u64::try_from(t).unwrap_or(0)),
                result_count: decode_u32(row.try_get("result_count")?, "result_count")?,
                created_at: decode_time(&created_at, "created_at")?,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::search_jobs;
    use crate::Database;
    use chrono::Duration;
    use leadflow_core::{LeadSummary, SearchPage};

    #[tokio::test]
    async fn test_record_once_per_job() {
        let db = Database::new(":memory:").await.expect("create test database");
        db.run_migrations().await.expect("run migrations");
        let alice = OwnerId::new("alice").expect("valid owner");

        let query = LeadQuery {
            regions: vec!["SP".to_string()],
            ..LeadQuery::default()
        };
        let job = search_jobs::create(db.pool(), &alice, &query, 50)
            .await
            .expect("create job");
        let claimed = search_jobs::claim_next_pending(db.pool(), Duration::seconds(60))
            .await
            .expect("claim")
            .expect("claimed");
        let token = claimed.claim_token.expect("claim token");
        let page = SearchPage {
            leads: vec![LeadSummary::default(); 2],
            total: 120,
            has_more: true,
            page: 1,
            page_size: 50,
        };
        search_jobs::complete(db.pool(), &job.id, &token, &page)
            .await
            .expect("complete");
        let job = search_jobs::get(db.pool(), &job.id)
            .await
            .expect("get")
            .expect("exists");

        assert!(record(db.pool(), &job).await.expect("record"));
        assert!(!record(db.pool(), &job).await.expect("record again"));

        let history = list_for_owner(db.pool(), &alice, 10).await.expect("history");
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].job_id, job.id);
        assert_eq!(history[0].filters.regions, vec!["SP"]);
        assert_eq!(history[0].result_count, 2);
        assert_eq!(history[0].total_results, Some(120));

        let other = OwnerId::new("bob").expect("valid owner");
        assert!(list_for_owner(db.pool(), &other, 10).await.expect("history").is_empty());
    }
}
