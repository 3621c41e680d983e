//! Search job persistence and lifecycle.
//!
//! `pending --claim--> processing --complete--> completed --deliver--> delivered`,
//! with `processing --fail--> failed` as the only other exit. Failed jobs are
//! terminal. A processing job whose lease has expired is claimable again.
//! Every claim carries a fresh token, and only the holder of the current
//! token can complete or fail the job.

use crate::codec::{
    decode_job_id, decode_json, decode_opt_time, decode_owner, decode_time, decode_u32,
    encode_json, encode_time, encode_u64, saturating_add,
};
use crate::error::{DatabaseError, Result};
use chrono::{DateTime, Duration, Utc};
use leadflow_core::{JobId, LeadQuery, LeadSummary, OwnerId, SearchPage};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqliteRow;
use sqlx::{Pool, Row, Sqlite};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

const JOB_COLUMNS: &str = "id, owner_id, filters, quantity, status, progress, results, \
     total_results, has_more, page, error_message, lease_expires_at, created_at, updated_at, \
     completed_at, delivered_at, claim_token";

/// Lifecycle state of a search job.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Waiting for a worker
    Pending,
    /// Claimed by a worker
    Processing,
    /// Results available
    Completed,
    /// Provider call failed
    Failed,
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Processing => write!(f, "processing"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

impl FromStr for JobStatus {
    type Err = DatabaseError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(Self::Pending),
            "processing" => Ok(Self::Processing),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            other => Err(DatabaseError::Decode(format!("unknown job status '{other}'"))),
        }
    }
}

/// A persisted search job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchJob {
    /// Job identifier
    pub id: JobId,
    /// Owning account
    pub owner_id: OwnerId,
    /// Normalized filters
    pub filters: LeadQuery,
    /// Requested page size
    pub quantity: u32,
    /// Lifecycle state
    pub status: JobStatus,
    /// Progress percentage, 0-100
    pub progress: u8,
    /// Ordered results, present once completed
    pub results: Option<Vec<LeadSummary>>,
    /// Provider's total estimate, present once completed
    pub total_results: Option<u64>,
    /// Whether more pages exist, present once completed
    pub has_more: Option<bool>,
    /// Page that was fetched, present once completed
    pub page: Option<u32>,
    /// Failure reason, present only when failed
    pub error_message: Option<String>,
    /// End of the current worker's claim
    pub lease_expires_at: Option<DateTime<Utc>>,
    /// Token of the current claim, present only while processing
    #[serde(skip)]
    pub claim_token: Option<String>,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Last mutation time
    pub updated_at: DateTime<Utc>,
    /// Completion time
    pub completed_at: Option<DateTime<Utc>>,
    /// Delivery acknowledgement time
    pub delivered_at: Option<DateTime<Utc>>,
}

impl SearchJob {
    /// A job is open until it is completed and delivered.
    #[must_use]
    pub fn is_open(&self) -> bool {
        match self.status {
            JobStatus::Pending | JobStatus::Processing | JobStatus::Failed => true,
            JobStatus::Completed => self.delivered_at.is_none(),
        }
    }

    /// Completed and not yet delivered.
    #[must_use]
    pub fn can_consume(&self) -> bool {
        self.status == JobStatus::Completed && self.delivered_at.is_none()
    }
}

/// Insert a new pending job.
///
/// # Errors
/// Returns an error if the filters cannot be serialized or the insert fails.
pub async fn create(
    pool: &Pool<Sqlite>,
    owner_id: &OwnerId,
    filters: &LeadQuery,
    quantity: u32,
) -> Result<SearchJob> {
    let id = JobId::generate();
    let now = Utc::now();

    sqlx::query(
        "INSERT INTO search_jobs (id, owner_id, filters, quantity, status, progress, created_at, updated_at)
         VALUES (?, ?, ?, ?, 'pending', 0, ?, ?)",
    )
    .bind(id.as_str())
    .bind(owner_id.as_str())
    .bind(encode_json(filters)?)
    .bind(i64::from(quantity))
    .bind(encode_time(now))
    .bind(encode_time(now))
    .execute(pool)
    .await?;

    tracing::debug!(job_id = %id, owner_id = %owner_id, quantity, "Search job created");

    Ok(SearchJob {
        id,
        owner_id: owner_id.clone(),
        filters: filters.clone(),
        quantity,
        status: JobStatus::Pending,
        progress: 0,
        results: None,
        total_results: None,
        has_more: None,
        page: None,
        error_message: None,
        lease_expires_at: None,
        claim_token: None,
        created_at: now,
        updated_at: now,
        completed_at: None,
        delivered_at: None,
    })
}

/// Atomically claim the oldest claimable job.
///
/// A job is claimable when pending, or when processing with an expired lease.
/// The select and the update run as one statement, so concurrent workers never
/// receive the same job.
pub async fn claim_next_pending(pool: &Pool<Sqlite>, lease: Duration) -> Result<Option<SearchJob>> {
    let now = Utc::now();
    let now_str = encode_time(now);
    let lease_until = encode_time(saturating_add(now, lease));
    let claim_token = Uuid::new_v4().to_string();

    let sql = format!(
        "UPDATE search_jobs
         SET status = 'processing', progress = 0, lease_expires_at = ?, claim_token = ?,
             updated_at = ?
         WHERE id = (
             SELECT id FROM search_jobs
             WHERE status = 'pending' OR (status = 'processing' AND lease_expires_at < ?)
             ORDER BY created_at, rowid
             LIMIT 1
         )
         AND (status = 'pending' OR (status = 'processing' AND lease_expires_at < ?))
         RETURNING {JOB_COLUMNS}"
    );

    let row = sqlx::query(&sql)
        .bind(&lease_until)
        .bind(&claim_token)
        .bind(&now_str)
        .bind(&now_str)
        .bind(&now_str)
        .fetch_optional(pool)
        .await?;

    row.as_ref().map(parse_job_row).transpose()
}

/// Set progress, clamped to 0-100. Missing jobs are ignored.
pub async fn update_progress(pool: &Pool<Sqlite>, id: &JobId, percent: i32) -> Result<()> {
    let percent = percent.clamp(0, 100);

    sqlx::query("UPDATE search_jobs SET progress = ?, updated_at = ? WHERE id = ?")
        .bind(percent)
        .bind(encode_time(Utc::now()))
        .bind(id.as_str())
        .execute(pool)
        .await?;

    Ok(())
}

/// Store results and mark a processing job completed.
///
/// Returns `false` if the job is not processing under `claim_token` (missing,
/// already finished, or reclaimed by another worker). Totals beyond `i64::MAX`
/// are stored saturated.
pub async fn complete(
    pool: &Pool<Sqlite>,
    id: &JobId,
    claim_token: &str,
    page: &SearchPage,
) -> Result<bool> {
    let now = encode_time(Utc::now());

    let result = sqlx::query(
        "UPDATE search_jobs
         SET status = 'completed', progress = 100, results = ?, total_results = ?, has_more = ?,
             page = ?, error_message = NULL, lease_expires_at = NULL, claim_token = NULL,
             completed_at = ?, updated_at = ?
         WHERE id = ? AND status = 'processing' AND claim_token = ?",
    )
    .bind(encode_json(&page.leads)?)
    .bind(encode_u64(page.total))
    .bind(page.has_more)
    .bind(i64::from(page.page))
    .bind(&now)
    .bind(&now)
    .bind(id.as_str())
    .bind(claim_token)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// Mark a processing job failed with a message.
///
/// Returns `false` if the job is not processing under `claim_token`.
pub async fn fail(pool: &Pool<Sqlite>, id: &JobId, claim_token: &str, message: &str) -> Result<bool> {
    let result = sqlx::query(
        "UPDATE search_jobs
         SET status = 'failed', progress = 0, error_message = ?, lease_expires_at = NULL,
             claim_token = NULL, updated_at = ?
         WHERE id = ? AND status = 'processing' AND claim_token = ?",
    )
    .bind(message)
    .bind(encode_time(Utc::now()))
    .bind(id.as_str())
    .bind(claim_token)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// Record delivery of a completed job.
///
/// Returns `true` only for the call that performed the transition. Repeated
/// calls, and calls on jobs that are not completed, return `false`.
pub async fn mark_delivered(pool: &Pool<Sqlite>, id: &JobId) -> Result<bool> {
    let now = encode_time(Utc::now());

    let result = sqlx::query(
        "UPDATE search_jobs SET delivered_at = ?, updated_at = ?
         WHERE id = ? AND status = 'completed' AND delivered_at IS NULL",
    )
    .bind(&now)
    .bind(&now)
    .bind(id.as_str())
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// Fetch a job regardless of owner.
pub async fn get(pool: &Pool<Sqlite>, id: &JobId) -> Result<Option<SearchJob>> {
    let row = sqlx::query(&format!("SELECT {JOB_COLUMNS} FROM search_jobs WHERE id = ?"))
        .bind(id.as_str())
        .fetch_optional(pool)
        .await?;

    row.as_ref().map(parse_job_row).transpose()
}

/// Fetch a job only if `owner_id` owns it.
pub async fn get_for_owner(
    pool: &Pool<Sqlite>,
    id: &JobId,
    owner_id: &OwnerId,
) -> Result<Option<SearchJob>> {
    let row = sqlx::query(&format!(
        "SELECT {JOB_COLUMNS} FROM search_jobs WHERE id = ? AND owner_id = ?"
    ))
    .bind(id.as_str())
    .bind(owner_id.as_str())
    .fetch_optional(pool)
    .await?;

    row.as_ref().map(parse_job_row).transpose()
}

/// Oldest open job of an owner.
pub async fn find_open_job(pool: &Pool<Sqlite>, owner_id: &OwnerId) -> Result<Option<SearchJob>> {
    let row = sqlx::query(&format!(
        "SELECT {JOB_COLUMNS} FROM search_jobs
         WHERE owner_id = ?
           AND (status IN ('pending', 'processing', 'failed')
                OR (status = 'completed' AND delivered_at IS NULL))
         ORDER BY created_at, rowid
         LIMIT 1"
    ))
    .bind(owner_id.as_str())
    .fetch_optional(pool)
    .await?;

    row.as_ref().map(parse_job_row).transpose()
}

/// Owner's jobs, newest first.
pub async fn list_for_owner(
    pool: &Pool<Sqlite>,
    owner_id: &OwnerId,
    limit: u32,
) -> Result<Vec<SearchJob>> {
    let rows = sqlx::query(&format!(
        "SELECT {JOB_COLUMNS} FROM search_jobs WHERE owner_id = ?
         ORDER BY created_at DESC, rowid DESC LIMIT ?"
    ))
    .bind(owner_id.as_str())
    .bind(i64::from(limit))
    .fetch_all(pool)
    .await?;

    rows.iter().map(parse_job_row).collect()
}

fn parse_job_row(row: &SqliteRow) -> Result<SearchJob> {
    let status: String = row.try_get("status")?;
    let filters: String = row.try_get("filters")?;
    let results: Option<String> = row.try_get("results")?;
    let created_at: String = row.try_get("created_at")?;
    let updated_at: String = row.try_get("updated_at")?;
    let progress: i64 = row.try_get("progress")?;
    let total_results: Option<i64> = row.try_get("total_results")?;
    let page: Option<i64> = row.try_get("page")?;

    Ok(SearchJob {
        id: decode_job_id(row.try_get("id")?)?,
        owner_id: decode_owner(row.try_get("owner_id")?)?,
        filters: decode_json(&filters, "filters")?,
        quantity: decode_u32(row.try_get("quantity")?, "quantity")?,
        status: status.parse()?,
        progress: u8::try_from(progress.clamp(0, 100)).unwrap_or(100),
        results: results
            .as_deref()
            .map(|raw| decode_json(raw, "results"))
            .transpose()?,
        total_results: total_results
            .map(|t| {
                u64::try_from(t)
                    .map_err(|_| DatabaseError::Decode(format!("total_results out of range: {t}")))
            })
            .transpose()?,
        has_more: row.try_get("has_more")?,
        page: page.map(|p| decode_u32(p, "page")).transpose()?,
        error_message: row.try_get("error_message")?,
        lease_expires_at: decode_opt_time(row.try_get("lease_expires_at")?, "lease_expires_at")?,
        claim_token: row.try_get("claim_token")?,
        created_at: decode_time(&created_at, "created_at")?,
        updated_at: decode_time(&updated_at, "updated_at")?,
        completed_at: decode_opt_time(row.try_get("completed_at")?, "completed_at")?,
        delivered_at: decode_opt_time(row.try_get("delivered_at")?, "delivered_at")?,
    })
}
