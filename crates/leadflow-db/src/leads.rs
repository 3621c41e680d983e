//! Persisted lead operations.
//!
//! A persisted lead is written exactly once per `(owner, tax id)`, at the moment
//! its detail is first consumed. It is never updated afterwards.

use crate::codec::{decode_json, decode_owner, decode_tax_id, decode_time, encode_json, encode_time};
use crate::error::Result;
use chrono::{DateTime, Utc};
use leadflow_core::{JobId, LeadDetail, LeadSummary, OwnerId, TaxId};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqliteRow;
use sqlx::{Executor, Pool, Row, Sqlite, SqliteConnection};
use uuid::Uuid;

pub(crate) const LEAD_COLUMNS: &str =
    "id, owner_id, tax_id, summary, detail, source_job_id, created_at";

/// A lead whose detail has been consumed (and paid for) by its owner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedLead {
    /// Unique identifier
    pub id: String,
    /// Owning account
    pub owner_id: OwnerId,
    /// Normalized tax id
    pub tax_id: TaxId,
    /// Summary at consumption time
    pub summary: LeadSummary,
    /// Full provider detail
    pub detail: LeadDetail,
    /// Job whose results surfaced the lead, if any
    pub source_job_id: Option<String>,
    /// When the lead was consumed
    pub created_at: DateTime<Utc>,
}

/// Fetch a persisted lead by id, only if `owner_id` owns it.
pub async fn get_for_owner(
    pool: &Pool<Sqlite>,
    owner_id: &OwnerId,
    id: &str,
) -> Result<Option<PersistedLead>> {
    let row = sqlx::query(&format!(
        "SELECT {LEAD_COLUMNS} FROM persisted_leads WHERE id = ? AND owner_id = ?"
    ))
    .bind(id)
    .bind(owner_id.as_str())
    .fetch_optional(pool)
    .await?;

    row.as_ref().map(parse_lead_row).transpose()
}

/// Fetch the owner's persisted lead for a tax id.
///
/// Accepts a pool or a transaction connection.
pub async fn find_by_tax_id<'e, E>(
    executor: E,
    owner_id: &OwnerId,
    tax_id: &TaxId,
) -> Result<Option<PersistedLead>>
where
    E: Executor<'e, Database = Sqlite>,
{
    let row = sqlx::query(&format!(
        "SELECT {LEAD_COLUMNS} FROM persisted_leads WHERE owner_id = ? AND tax_id = ?"
    ))
    .bind(owner_id.as_str())
    .bind(tax_id.as_str())
    .fetch_optional(executor)
    .await?;

    row.as_ref().map(parse_lead_row).transpose()
}

/// Owner's persisted leads, newest first.
pub async fn list_for_owner(
    pool: &Pool<Sqlite>,
    owner_id: &OwnerId,
    limit: u32,
) -> Result<Vec<PersistedLead>> {
    let rows = sqlx::query(&format!(
        "SELECT {LEAD_COLUMNS} FROM persisted_leads WHERE owner_id = ?
         ORDER BY created_at DESC, rowid DESC LIMIT ?"
    ))
    .bind(owner_id.as_str())
    .bind(i64::from(limit))
    .fetch_all(pool)
    .await?;

    rows.iter().map(parse_lead_row).collect()
}

/// Insert a persisted lead.
///
/// Fails with a unique violation if the owner already has this tax id.
pub(crate) async fn insert(
    conn: &mut SqliteConnection,
    owner_id: &OwnerId,
    detail: &LeadDetail,
    source_job_id: Option<&JobId>,
) -> Result<PersistedLead> {
    let id = Uuid::new_v4().to_string();
    let created_at = Utc::now();
    let mut summary = detail.summary.clone();
    summary.tax_id = Some(detail.tax_id.as_str().to_string());
    summary.formatted_tax_id = Some(detail.tax_id.formatted());

    sqlx::query(
        "INSERT INTO persisted_leads (id, owner_id, tax_id, summary, detail, source_job_id, created_at)
         VALUES (?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&id)
    .bind(owner_id.as_str())
    .bind(detail.tax_id.as_str())
    .bind(encode_json(&summary)?)
    .bind(encode_json(detail)?)
    .bind(source_job_id.map(JobId::as_str))
    .bind(encode_time(created_at))
    .execute(&mut *conn)
    .await?;

    Ok(PersistedLead {
        id,
        owner_id: owner_id.clone(),
        tax_id: detail.tax_id.clone(),
        summary,
        detail: detail.clone(),
        source_job_id: source_job_id.map(ToString::to_string),
        created_at,
    })
}

pub(crate) fn parse_lead_row(row: &SqliteRow) -> Result<PersistedLead> {
    let tax_id: String = row.try_get("tax_id")?;
    let summary: String = row.try_get("summary")?;
    let detail: String = row.try_get("detail")?;
    let created_at: String = row.try_get("created_at")?;

    Ok(PersistedLead {
        id: row.try_get("id")?,
        owner_id: decode_owner(row.try_get("owner_id")?)?,
        tax_id: decode_tax_id(&tax_id)?,
        summary: decode_json(&summary, "summary")?,
        detail: decode_json(&detail, "detail")?,
        source_job_id: row.try_get("source_job_id")?,
        created_at: decode_time(&created_at, "created_at")?,
    })
}
