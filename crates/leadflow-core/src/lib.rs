//! Leadflow Core - Foundation crate for the lead-acquisition pipeline.
//!
//! This crate provides the shared vocabulary every other Leadflow crate speaks:
//! identifier newtypes, the normalized lead filter model, lead summaries and
//! details, error types and configuration.
//!
//! # Modules
//!
//! - [`error`] - Central error types using thiserror
//! - [`config`] - TOML-based configuration with XDG paths and env overrides
//! - [`types`] - Identifier newtypes (`OwnerId`, `JobId`, `SessionId`, `TaxId`)
//! - [`query`] - The `LeadQuery` filter model, normalized once at the boundary
//! - [`lead`] - Lead summaries, details and search pages
//!
//! # Example
//!
//! ```rust
//! use leadflow_core::{LeadQuery, TaxId};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut query = LeadQuery::default();
//! query.regions = vec![" sp ".to_string(), "SP".to_string()];
//! let query = query.normalized();
//! assert_eq!(query.regions, vec!["SP".to_string()]);
//!
//! let tax_id = TaxId::parse("12.345.678/0001-90")?;
//! assert_eq!(tax_id.as_str(), "12345678000190");
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]

pub mod config;
pub mod error;
pub mod lead;
pub mod query;
pub mod types;

// Re-export commonly used types
pub use config::{
    AppConfig, DatabaseConfig, PipelineConfig, ProviderConfig, WorkerConfig, MAX_JOB_LEASE_SECS,
    MAX_STAGING_TTL_MINUTES,
};
pub use error::{ConfigError, ConfigResult, LeadflowError, Result};
pub use lead::{LeadDetail, LeadSummary, SearchPage};
pub use query::{
    CapitalRange, CompanyStatus, ContactFilter, EstablishmentFilter, LeadQuery,
    RegimeFilter, RegistrationDate,
};
pub use types::{JobId, OwnerId, SessionId, TaxId, TAX_ID_DIGITS};
