//! Schema for the Leadflow store.
//!
//! The numbered files under `migrations/` are compiled into the binary, so a
//! worker and the facade always agree on the job, lead and credit tables.

use crate::error::{DatabaseError, Result};
use sqlx::{Pool, Sqlite};

/// Bring the schema up to date.
///
/// Safe to call on every start: files already recorded by sqlx are skipped.
pub async fn run_migrations(pool: &Pool<Sqlite>) -> Result<()> {
    tracing::info!("Applying Leadflow schema migrations");

    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .map_err(|e| DatabaseError::Migration(e.to_string()))?;

    tracing::debug!("Leadflow schema is current");
    Ok(())
}

/// Number of the newest applied migration file; 0 on a fresh database.
pub async fn get_schema_version(pool: &Pool<Sqlite>) -> Result<i64> {
    let tracked: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = '_sqlx_migrations'",
    )
    .fetch_one(pool)
    .await?;

    if tracked == 0 {
        return Ok(0);
    }

    let version: i64 =
        sqlx::query_scalar("SELECT COALESCE(MAX(version), 0) FROM _sqlx_migrations")
            .fetch_one(pool)
            .await?;

    Ok(version)
}
