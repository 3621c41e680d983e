//! Pipeline errors and their caller-facing form.

use leadflow_core::LeadflowError;
use leadflow_db::DatabaseError;
use leadflow_provider::ProviderError;
use serde::Serialize;
use thiserror::Error;

/// Errors surfaced by pipeline operations.
#[derive(Error, Debug)]
pub enum PipelineError {
    /// Upstream provider failure
    #[error("provider error: {0}")]
    Provider(#[from] ProviderError),

    /// Unknown or foreign job or lead
    #[error("{0} not found")]
    NotFound(String),

    /// Balance below the detail cost; nothing was debited
    #[error("insufficient credits: balance {balance}, cost {cost}")]
    InsufficientCredits {
        /// Current balance
        balance: i64,
        /// Cost of one detail
        cost: i64,
    },

    /// Provider has no detail for the lead
    #[error("no detail available for lead {0}")]
    DetailUnavailable(String),

    /// Delivery requested before the job completed
    #[error("job {0} is not ready for delivery")]
    JobNotReady(String),

    /// Filters or other caller input rejected at the boundary
    #[error("invalid query: {0}")]
    InvalidQuery(String),

    /// Persistence failure
    #[error("storage error: {0}")]
    Storage(#[from] DatabaseError),
}

impl PipelineError {
    /// Stable code for callers.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::Provider(_) => "PROVIDER_ERROR",
            Self::NotFound(_) => "NOT_FOUND",
            Self::InsufficientCredits { .. } => "INSUFFICIENT_CREDITS",
            Self::DetailUnavailable(_) => "DETAIL_UNAVAILABLE",
            Self::JobNotReady(_) => "JOB_NOT_READY",
            Self::InvalidQuery(_) => "INVALID_QUERY",
            Self::Storage(_) => "STORAGE_ERROR",
        }
    }
}

impl From<LeadflowError> for PipelineError {
    fn from(err: LeadflowError) -> Self {
        match err {
            LeadflowError::Validation(msg) => Self::InvalidQuery(msg),
            other => Self::InvalidQuery(other.to_string()),
        }
    }
}

/// Result type alias for pipeline operations.
pub type Result<T> = std::result::Result<T, PipelineError>;

/// Serializable error for callers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorResponse {
    /// Error code (e.g. `INSUFFICIENT_CREDITS`)
    pub code: String,
    /// User-facing message
    pub message: String,
}

impl ErrorResponse {
    /// Create a new error response.
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }
}

/// Provider bodies and SQL never reach the message; they are logged instead.
impl From<PipelineError> for ErrorResponse {
    fn from(err: PipelineError) -> Self {
        let code = err.code();
        match err {
            PipelineError::Provider(e) => {
                tracing::error!(error = ?e, "Provider failure surfaced to caller");
                Self::new(code, "The lead provider could not complete the request")
            }
            PipelineError::Storage(e) => {
                tracing::error!(error = ?e, "Storage failure surfaced to caller");
                Self::new(code, "A storage error occurred")
            }
            PipelineError::InsufficientCredits { balance, cost } => Self::new(
                code,
                format!("Not enough credits: {balance} available, {cost} required"),
            ),
            other => Self::new(code, other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes() {
        assert_eq!(PipelineError::NotFound("job".into()).code(), "NOT_FOUND");
        assert_eq!(
            PipelineError::InsufficientCredits { balance: 0, cost: 1 }.code(),
            "INSUFFICIENT_CREDITS"
        );
        assert_eq!(
            PipelineError::DetailUnavailable("x".into()).code(),
            "DETAIL_UNAVAILABLE"
        );
        assert_eq!(PipelineError::JobNotReady("j".into()).code(), "JOB_NOT_READY");
        assert_eq!(PipelineError::InvalidQuery("q".into()).code(), "INVALID_QUERY");
        assert_eq!(
            PipelineError::Provider(ProviderError::Transport("down".into())).code(),
            "PROVIDER_ERROR"
        );
        assert_eq!(
            PipelineError::Storage(DatabaseError::NotFound).code(),
            "STORAGE_ERROR"
        );
    }

    #[test]
    fn test_validation_maps_to_invalid_query() {
        let err: PipelineError = LeadflowError::Validation("bad range".into()).into();
        assert!(matches!(err, PipelineError::InvalidQuery(ref m) if m == "bad range"));
    }

    #[test]
    fn test_response_hides_internal_detail() {
        let err = PipelineError::Provider(ProviderError::status(
            500,
            "SQLSTATE secret-body",
            Vec::new(),
        ));
        let response = ErrorResponse::from(err);
        assert_eq!(response.code, "PROVIDER_ERROR");
        assert!(!response.message.contains("secret-body"));

        let response = ErrorResponse::from(PipelineError::Storage(DatabaseError::Decode(
            "SELECT * FROM credit_balances".into(),
        )));
        assert_eq!(response.code, "STORAGE_ERROR");
        assert!(!response.message.contains("SELECT"));
    }

    #[test]
    fn test_response_serialization() {
        let response: ErrorResponse =
            PipelineError::InsufficientCredits { balance: 0, cost: 1 }.into();
        let json = serde_json::to_value(&response).expect("serialize error");
        assert_eq!(json["code"], "INSUFFICIENT_CREDITS");
        assert!(json["message"]
            .as_str()
            .expect("message is a string")
            .contains("0 available"));
    }
}
