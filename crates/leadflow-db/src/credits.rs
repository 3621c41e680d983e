//! Credit ledger.
//!
//! Balances never go negative: debits are conditional updates that touch no row
//! when the balance is short. Every movement is journaled in
//! `credit_transactions`.

use crate::codec::{decode_owner, decode_time, encode_time};
use crate::error::{DatabaseError, Result};
use chrono::{DateTime, Utc};
use leadflow_core::OwnerId;
use serde::{Deserialize, Serialize};
use sqlx::{Executor, Pool, Row, Sqlite, SqliteConnection};
use uuid::Uuid;

/// Outcome of a conditional debit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DebitOutcome {
    /// Debit applied; carries the new balance
    Debited {
        /// Balance after the debit
        balance: i64,
    },
    /// Balance too low; nothing changed
    Insufficient {
        /// Current balance
        balance: i64,
    },
}

/// One journaled balance movement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreditTransaction {
    /// Unique identifier
    pub id: String,
    /// Owning account
    pub owner_id: OwnerId,
    /// Signed change
    pub delta: i64,
    /// Balance after the change
    pub balance_after: i64,
    /// Why the balance moved
    pub reason: String,
    /// Related entity (lead tax id, payment id)
    pub reference: Option<String>,
    /// When the change happened
    pub created_at: DateTime<Utc>,
}

/// Current balance; owners without a ledger row have zero.
///
/// Accepts a pool or a transaction connection.
pub async fn balance<'e, E>(executor: E, owner_id: &OwnerId) -> Result<i64>
where
    E: Executor<'e, Database = Sqlite>,
{
    let balance = sqlx::query_scalar::<_, i64>(
        "SELECT balance FROM credit_balances WHERE owner_id = ?",
    )
    .bind(owner_id.as_str())
    .fetch_optional(executor)
    .await?
    .unwrap_or(0);

    Ok(balance)
}

/// Add credits to an owner's balance. Returns the new balance.
///
/// Entry point for the payment collaborator.
///
/// # Errors
/// `InvalidInput` if `amount` is not positive.
pub async fn credit(
    pool: &Pool<Sqlite>,
    owner_id: &OwnerId,
    amount: i64,
    reason: &str,
    reference: Option<&str>,
) -> Result<i64> {
    if amount <= 0 {
        return Err(DatabaseError::InvalidInput(format!(
            "credit amount must be positive, got {amount}"
        )));
    }

    let now = encode_time(Utc::now());
    let mut tx = pool.begin().await?;

    let balance = sqlx::query_scalar::<_, i64>(
        "INSERT INTO credit_balances (owner_id, balance, updated_at) VALUES (?, ?, ?)
         ON CONFLICT (owner_id) DO UPDATE SET balance = balance + excluded.balance,
                                              updated_at = excluded.updated_at
         RETURNING balance",
    )
    .bind(owner_id.as_str())
    .bind(amount)
    .bind(&now)
    .fetch_one(&mut *tx)
    .await?;

    journal(&mut tx, owner_id, amount, balance, reason, reference).await?;
    tx.commit().await?;

    tracing::info!(owner_id = %owner_id, amount, balance, reason, "Credits added");
    Ok(balance)
}

/// Debit `amount` if the balance covers it.
///
/// Meant to run inside the caller's transaction. An insufficient balance is an
/// outcome, not an error, and leaves the ledger untouched.
pub async fn debit(
    conn: &mut SqliteConnection,
    owner_id: &OwnerId,
    amount: i64,
    reason: &str,
    reference: Option<&str>,
) -> Result<DebitOutcome> {
    if amount <= 0 {
        return Err(DatabaseError::InvalidInput(format!(
            "debit amount must be positive, got {amount}"
        )));
    }

    let debited = sqlx::query_scalar::<_, i64>(
        "UPDATE credit_balances SET balance = balance - ?, updated_at = ?
         WHERE owner_id = ? AND balance >= ?
         RETURNING balance",
    )
    .bind(amount)
    .bind(encode_time(Utc::now()))
    .bind(owner_id.as_str())
    .bind(amount)
    .fetch_optional(&mut *conn)
    .await?;

    match debited {
        Some(balance) => {
            journal(conn, owner_id, -amount, balance, reason, reference).await?;
            tracing::debug!(owner_id = %owner_id, amount, balance, reason, "Credits debited");
            Ok(DebitOutcome::Debited { balance })
        }
        None => {
            let balance = balance(&mut *conn, owner_id).await?;
            Ok(DebitOutcome::Insufficient { balance })
        }
    }
}

/// Owner's journal, newest first.
pub async fn transactions_for_owner(
    pool: &Pool<Sqlite>,
    owner_id: &OwnerId,
    limit: u32,
) -> Result<Vec<CreditTransaction>> {
    let rows = sqlx::query(
        "SELECT id, owner_id, delta, balance_after, reason, reference, created_at
         FROM credit_transactions WHERE owner_id = ?
         ORDER BY created_at DESC, rowid DESC LIMIT ?",
    )
    .bind(owner_id.as_str())
    .bind(i64::from(limit))
    .fetch_all(pool)
    .await?;

    rows.iter()
        .map(|row| -> Result<CreditTransaction> {
            let created_at: String = row.try_get("created_at")?;
            Ok(CreditTransaction {
                id: row.try_get("id")?,
                owner_id: decode_owner(row.try_get("owner_id")?)?,
                delta: row.try_get("delta")?,
                balance_after: row.try_get("balance_after")?,
                reason: row.try_get("reason")?,
                reference: row.try_get("reference")?,
                created_at: decode_time(&created_at, "created_at")?,
            })
        })
        .collect()
}

async fn journal(
    conn: &mut SqliteConnection,
    owner_id: &OwnerId,
    delta: i64,
    balance_after: i64,
    reason: &str,
    reference: Option<&str>,
) -> Result<()> {
    sqlx::query(
        "INSERT INTO credit_transactions (id, owner_id, delta, balance_after, reason, reference, created_at)
         VALUES (?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(Uuid::new_v4().to_string())
    .bind(owner_id.as_str())
    .bind(delta)
    .bind(balance_after)
    .bind(reason)
    .bind(reference)
    .bind(encode_time(Utc::now()))
    .execute(&mut *conn)
    .await?;

    Ok(())
}
