//! Leadflow Database Layer
//!
//! Provides `SQLite` persistence for the lead-acquisition pipeline.
//! Uses `SQLx` with embedded migrations and runtime-checked queries.
//!
//! # Stores
//!
//! - [`search_jobs`] - Asynchronous search jobs and their lifecycle
//! - [`leads`] - Leads whose detail has been consumed
//! - [`saved_lists`] - Named lists of leads and the dedup lookup
//! - [`credits`] - Per-owner credit balance and journal
//! - [`provider_calls`] - Audit log of provider calls
//! - [`search_history`] - Delivered searches
//!
//! # Example
//!
//! ```ignore
//! use leadflow_db::Database;
//!
//! let db = Database::new("leadflow.db").await?;
//! db.run_migrations().await?;
//! ```
//!
//! Timestamps are stored as fixed-width RFC 3339 text and structured values
//! (filters, results, details) as JSON text.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]

mod codec;
pub mod connection;
pub mod credits;
pub mod error;
pub mod leads;
pub mod migrations;
pub mod provider_calls;
pub mod saved_lists;
pub mod search_history;
pub mod search_jobs;

// Re-export commonly used types
pub use connection::{DatabasePool, DEFAULT_MAX_CONNECTIONS};
pub use credits::{CreditTransaction, DebitOutcome};
pub use error::{DatabaseError, Result};
pub use leads::PersistedLead;
pub use saved_lists::{ExistingLead, SavedList, DEFAULT_LIST};
pub use search_history::SearchHistoryEntry;
pub use search_jobs::{JobStatus, SearchJob};

use leadflow_core::DatabaseConfig;
use std::path::Path;

/// High-level database handle.
///
/// Wraps a `DatabasePool` and handles migrations. Cloning shares the pool.
#[derive(Debug, Clone)]
pub struct Database {
    pool: DatabasePool,
}

impl Database {
    /// Open the database at `path` with the default pool size.
    ///
    /// # Arguments
    /// * `path` - Path to the database file (or `:memory:` for in-memory)
    ///
    /// # Errors
    /// Returns `DatabaseError` if the database cannot be opened.
    pub async fn new(path: impl AsRef<Path>) -> Result<Self> {
        let pool = DatabasePool::new(path, DEFAULT_MAX_CONNECTIONS).await?;
        Ok(Self { pool })
    }

    /// Open the database described by configuration.
    pub async fn open(config: &DatabaseConfig) -> Result<Self> {
        let pool = DatabasePool::new(&config.path, config.max_connections).await?;
        Ok(Self { pool })
    }

    /// Create a database instance from an existing pool.
    #[must_use]
    pub fn from_pool(pool: DatabasePool) -> Self {
        Self { pool }
    }

    /// Run all pending database migrations.
    ///
    /// # Errors
    /// Returns `DatabaseError::Migration` if any migration fails.
    pub async fn run_migrations(&self) -> Result<()> {
        migrations::run_migrations(self.pool.pool()).await
    }

    /// Get the current schema version.
    pub async fn get_schema_version(&self) -> Result<i64> {
        migrations::get_schema_version(self.pool.pool()).await
    }

    /// Get a reference to the underlying connection pool.
    ///
    /// This allows direct access to the `SQLx` pool for custom queries.
    #[must_use]
    pub fn pool(&self) -> &sqlx::Pool<sqlx::Sqlite> {
        self.pool.pool()
    }

    /// Close the database connection gracefully.
    pub async fn close(self) {
        self.pool.close().await;
    }
}
