//! Saved lists and the dedup index over persisted leads.
//!
//! Every consumed lead lands in the owner's [`DEFAULT_LIST`]. Owners can create
//! further named lists and file leads into several of them.

use crate::codec::{decode_json, decode_owner, decode_tax_id, decode_time, encode_time};
use crate::error::{DatabaseError, Result};
use crate::leads::{self, parse_lead_row, PersistedLead};
use chrono::{DateTime, Utc};
use leadflow_core::{JobId, LeadDetail, LeadSummary, OwnerId, TaxId};
use serde::{Deserialize, Serialize};
use sqlx::{Pool, Row, Sqlite, SqliteConnection};
use std::collections::{BTreeSet, HashMap};
use uuid::Uuid;

/// Name of the list every consumed lead is filed into.
pub const DEFAULT_LIST: &str = "Unsorted";

/// A named collection of persisted leads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SavedList {
    /// Unique identifier
    pub id: String,
    /// Owning account
    pub owner_id: OwnerId,
    /// Display name, unique per owner
    pub name: String,
    /// Creation time
    pub created_at: DateTime<Utc>,
}

/// A previously persisted lead matching an incoming tax id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExistingLead {
    /// Persisted lead id
    pub lead_id: String,
    /// Saved summary
    pub summary: LeadSummary,
    /// Saved detail
    pub detail: LeadDetail,
    /// Names of the lists holding the lead
    pub lists: Vec<String>,
}

/// Look up the owner's persisted leads for a batch of tax ids in one query.
///
/// Tax ids without a match are absent from the returned map.
pub async fn lookup_by_tax_ids(
    pool: &Pool<Sqlite>,
    owner_id: &OwnerId,
    tax_ids: &[TaxId],
) -> Result<HashMap<TaxId, ExistingLead>> {
    let unique: BTreeSet<&str> = tax_ids.iter().map(TaxId::as_str).collect();
    if unique.is_empty() {
        return Ok(HashMap::new());
    }

    let placeholders = vec!["?"; unique.len()].join(", ");
    let sql = format!(
        "SELECT pl.id, pl.tax_id, pl.summary, pl.detail, sl.name AS list_name
         FROM persisted_leads pl
         LEFT JOIN saved_list_items sli ON sli.lead_id = pl.id
         LEFT JOIN saved_lists sl ON sl.id = sli.list_id
         WHERE pl.owner_id = ? AND pl.tax_id IN ({placeholders})
         ORDER BY pl.tax_id, sl.name"
    );

    let mut query = sqlx::query(&sql).bind(owner_id.as_str());
    for tax_id in &unique {
        query = query.bind(*tax_id);
    }
    let rows = query.fetch_all(pool).await?;

    let mut found: HashMap<TaxId, ExistingLead> = HashMap::new();
    for row in rows {
        let tax_id: String = row.try_get("tax_id")?;
        let tax_id = decode_tax_id(&tax_id)?;
        let list_name: Option<String> = row.try_get("list_name")?;

        if let Some(existing) = found.get_mut(&tax_id) {
            existing.lists.extend(list_name);
            continue;
        }

        let summary: String = row.try_get("summary")?;
        let detail: String = row.try_get("detail")?;
        found.insert(
            tax_id,
            ExistingLead {
                lead_id: row.try_get("id")?,
                summary: decode_json(&summary, "summary")?,
                detail: decode_json(&detail, "detail")?,
                lists: list_name.into_iter().collect(),
            },
        );
    }

    tracing::debug!(
        owner_id = %owner_id,
        requested = unique.len(),
        matched = found.len(),
        "Looked up existing leads"
    );

    Ok(found)
}

/// Persist a freshly consumed lead and file it into the default list.
///
/// Meant to run inside the caller's transaction, alongside the credit debit.
/// Fails with a unique violation if the owner already holds the tax id.
pub async fn record_consumed_lead(
    conn: &mut SqliteConnection,
    owner_id: &OwnerId,
    detail: &LeadDetail,
    source_job_id: Option<&JobId>,
) -> Result<PersistedLead> {
    let lead = leads::insert(conn, owner_id, detail, source_job_id).await?;
    let list = ensure_list(conn, owner_id, DEFAULT_LIST).await?;
    insert_item(conn, &list.id, &lead.id).await?;
    Ok(lead)
}

/// Create a list, or return the existing one with the same name.
pub async fn create_list(pool: &Pool<Sqlite>, owner_id: &OwnerId, name: &str) -> Result<SavedList> {
    let name = name.trim();
    if name.is_empty() {
        return Err(DatabaseError::InvalidInput("list name must not be empty".to_string()));
    }
    let mut conn = pool.acquire().await?;
    ensure_list(&mut conn, owner_id, name).await
}

/// Owner's lists, ordered by name.
pub async fn lists_for_owner(pool: &Pool<Sqlite>, owner_id: &OwnerId) -> Result<Vec<SavedList>> {
    let rows = sqlx::query(
        "SELECT id, owner_id, name, created_at FROM saved_lists WHERE owner_id = ? ORDER BY name",
    )
    .bind(owner_id.as_str())
    .fetch_all(pool)
    .await?;

    rows.iter().map(parse_list_row).collect()
}

/// File a persisted lead into one of the owner's lists.
///
/// Returns `false` if the lead was already in the list.
///
/// # Errors
/// `NotFoundWithMessage` if the list or lead does not belong to the owner.
pub async fn add_to_list(
    pool: &Pool<Sqlite>,
    owner_id: &OwnerId,
    list_id: &str,
    lead_id: &str,
) -> Result<bool> {
    let owns_list = sqlx::query_scalar::<_, i64>(
        "SELECT COUNT(*) FROM saved_lists WHERE id = ? AND owner_id = ?",
    )
    .bind(list_id)
    .bind(owner_id.as_str())
    .fetch_one(pool)
    .await?
        > 0;
    if !owns_list {
        return Err(DatabaseError::NotFoundWithMessage(format!(
            "Saved list '{list_id}' not found"
        )));
    }

    if leads::get_for_owner(pool, owner_id, lead_id).await?.is_none() {
        return Err(DatabaseError::NotFoundWithMessage(format!(
            "Lead '{lead_id}' not found"
        )));
    }

    let mut conn = pool.acquire().await?;
    insert_item(&mut conn, list_id, lead_id).await
}

/// Leads in one of the owner's lists, most recently added first.
///
/// # Errors
/// `NotFoundWithMessage` if the list does not belong to the owner.
pub async fn list_items(
    pool: &Pool<Sqlite>,
    owner_id: &OwnerId,
    list_id: &str,
) -> Result<Vec<PersistedLead>> {
    let list = sqlx::query("SELECT id FROM saved_lists WHERE id = ? AND owner_id = ?")
        .bind(list_id)
        .bind(owner_id.as_str())
        .fetch_optional(pool)
        .await?;
    if list.is_none() {
        return Err(DatabaseError::NotFoundWithMessage(format!(
            "Saved list '{list_id}' not found"
        )));
    }

    let rows = sqlx::query(
        "SELECT pl.id, pl.owner_id, pl.tax_id, pl.summary, pl.detail, pl.source_job_id, pl.created_at
         FROM saved_list_items sli
         JOIN persisted_leads pl ON pl.id = sli.lead_id
         WHERE sli.list_id = ?
         ORDER BY sli.added_at DESC, pl.rowid DESC",
    )
    .bind(list_id)
    .fetch_all(pool)
    .await?;

    rows.iter().map(parse_lead_row).collect()
}

async fn ensure_list(
    conn: &mut SqliteConnection,
    owner_id: &OwnerId,
    name: &str,
) -> Result<SavedList> {
    sqlx::query(
        "INSERT INTO saved_lists (id, owner_id, name, created_at) VALUES (?, ?, ?, ?)
         ON CONFLICT (owner_id, name) DO NOTHING",
    )
    .bind(Uuid::new_v4().to_string())
    .bind(owner_id.as_str())
    .bind(name)
    .bind(encode_time(Utc::now()))
    .execute(&mut *conn)
    .await?;

    let row = sqlx::query(
        "SELECT id, owner_id, name, created_at FROM saved_lists WHERE owner_id = ? AND name = ?",
    )
    .bind(owner_id.as_str())
    .bind(name)
    .fetch_one(&mut *conn)
    .await?;

    parse_list_row(&row)
}

async fn insert_item(conn: &mut SqliteConnection, list_id: &str, lead_id: &str) -> Result<bool> {
    let result = sqlx::query(
        "INSERT INTO saved_list_items (list_id, lead_id, added_at) VALUES (?, ?, ?)
         ON CONFLICT (list_id, lead_id) DO NOTHING",
    )
    .bind(list_id)
    .bind(lead_id)
    .bind(encode_time(Utc::now()))
    .execute(&mut *conn)
    .await?;

    Ok(result.rows_affected() > 0)
}

fn parse_list_row(row: &sqlx::sqlite::SqliteRow) -> Result<SavedList> {
    let created_at: String = row.try_get("created_at")?;
    Ok(SavedList {
        id: row.try_get("id")?,
        owner_id: decode_owner(row.try_get("owner_id")?)?,
        name: row.try_get("name")?,
        created_at: decode_time(&created_at, "created_at")?,
    })
}
