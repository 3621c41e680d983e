//! Company-data provider client for Leadflow.
//!
//! - [`provider`] - The `LeadProvider` trait and the audit seam
//! - [`payload`] - Filter model to provider search body
//! - [`normalize`] - Heterogeneous responses to `LeadSummary`/`SearchPage`
//! - [`http`] - reqwest-backed implementation
//! - [`audit`] - Built-in audit sinks
//!
//! Searches fail loudly with [`ProviderError`]; detail lookups degrade to
//! `None` so that a missing record never costs the caller anything.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]

pub mod audit;
pub mod error;
pub mod http;
pub mod normalize;
pub mod payload;
pub mod provider;

pub use audit::{MemoryAuditSink, TracingAuditSink};
pub use error::{ProviderError, Result};
pub use http::HttpLeadProvider;
pub use provider::{AuditError, AuditSink, CallOperation, LeadProvider, ProviderCall};
