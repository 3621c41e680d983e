//! Lead-acquisition pipeline for Leadflow.
//!
//! A caller submits a search, a worker runs it against the provider, the caller
//! polls until it completes and then has the results delivered into its
//! session's staging area. Each staged lead can then be resolved to its full
//! detail; only the first resolution of a tax id per owner costs credits.
//!
//! # Modules
//!
//! - [`service`] - The `LeadPipeline` facade
//! - [`worker`] - `SearchWorker`, one job per tick
//! - [`staging`] - `LeadStagingCache`, session-scoped and deduplicated
//! - [`consumption`] - `CreditGatedConsumption`, the at-most-once charge
//! - [`locks`] - Per-owner debit serialization
//! - [`audit_sink`] - Provider call audit into `provider_calls`
//! - [`clock`] - Injectable time source
//! - [`error`] - `PipelineError` and the caller-facing `ErrorResponse`

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]

pub mod audit_sink;
pub mod clock;
pub mod consumption;
pub mod error;
pub mod locks;
pub mod service;
pub mod staging;
pub mod worker;

pub use audit_sink::DatabaseAuditSink;
pub use clock::{Clock, ManualClock, SystemClock};
pub use consumption::{CreditGatedConsumption, LeadRef, LeadResult};
pub use error::{ErrorResponse, PipelineError, Result};
pub use locks::OwnerLocks;
pub use service::{JobStatusView, LeadPipeline};
pub use staging::{LeadStagingCache, StagedLead, StagedLeadView};
pub use worker::{SearchWorker, TickOutcome};
