//! Error types for provider calls.

use leadflow_core::LeadSummary;
use thiserror::Error;

/// Maximum number of body characters kept on a status error.
pub const MAX_ERROR_BODY_CHARS: usize = 500;

/// Errors that can occur during a provider search.
///
/// Detail lookups never surface these; they degrade to "no detail".
#[derive(Error, Debug)]
pub enum ProviderError {
    /// Provider answered with a non-2xx status
    #[error("provider returned status {status}")]
    Status {
        /// HTTP status code
        status: u16,
        /// Raw body, truncated to `MAX_ERROR_BODY_CHARS`
        body: String,
        /// Leads that could still be parsed from the body
        partial: Vec<LeadSummary>,
    },

    /// Request never produced a response
    #[error("provider transport error: {0}")]
    Transport(String),

    /// Response body could not be decoded
    #[error("failed to decode provider response: {0}")]
    Decode(String),

    /// Request could not be built
    #[error("invalid provider request: {0}")]
    InvalidRequest(String),

    /// Client setup failure
    #[error("internal error: {0}")]
    Internal(String),
}

impl ProviderError {
    /// Build a status error, truncating the body.
    #[must_use]
    pub fn status(status: u16, body: &str, partial: Vec<LeadSummary>) -> Self {
        Self::Status {
            status,
            body: truncate_chars(body, MAX_ERROR_BODY_CHARS),
            partial,
        }
    }

    /// Leads parsed from a failed response, if any.
    #[must_use]
    pub fn partial_leads(&self) -> &[LeadSummary] {
        match self {
            Self::Status { partial, .. } => partial,
            _ => &[],
        }
    }
}

impl From<reqwest::Error> for ProviderError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            Self::Decode(err.to_string())
        } else {
            Self::Transport(err.to_string())
        }
    }
}

/// Result type alias for provider operations.
pub type Result<T> = std::result::Result<T, ProviderError>;

/// Keep at most `max` characters, respecting char boundaries.
#[must_use]
pub fn truncate_chars(text: &str, max: usize) -> String {
    text.chars().take(max).collect()
}
