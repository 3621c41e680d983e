//! Identifier newtypes used across Leadflow.
//!
//! Every identifier crossing a crate boundary is wrapped so that owners, jobs,
//! sessions and tax ids cannot be confused with each other or with free text.

use crate::error::LeadflowError;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::OnceLock;

/// Number of digits in a Brazilian company tax id (CNPJ).
pub const TAX_ID_DIGITS: usize = 14;

/// Newtype for the account that owns jobs, leads and credits.
///
/// Owner ids come from the authentication collaborator and are otherwise opaque:
/// non-empty, at most 128 characters, no whitespace.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OwnerId(String);

impl OwnerId {
    /// Create a new `OwnerId`.
    ///
    /// # Errors
    /// Returns error if the id is empty, too long, or contains whitespace.
    pub fn new(id: impl Into<String>) -> Result<Self, LeadflowError> {
        let id = id.into();
        if id.is_empty() || id.len() > 128 {
            return Err(LeadflowError::Validation(format!(
                "invalid owner ID: must be 1-128 characters, got {} characters",
                id.len()
            )));
        }
        if id.chars().any(char::is_whitespace) {
            return Err(LeadflowError::Validation(format!(
                "invalid owner ID: must not contain whitespace, got '{id}'"
            )));
        }
        Ok(Self(id))
    }

    /// Get the inner string value.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OwnerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Newtype for search job identifiers (UUID v4).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobId(String);

impl JobId {
    /// Create a `JobId` from an existing string.
    ///
    /// # Errors
    /// Returns error if the ID is not a valid UUID v4.
    pub fn new(id: impl Into<String>) -> Result<Self, LeadflowError> {
        let id = id.into();
        static UUID_REGEX: OnceLock<Regex> = OnceLock::new();
        let regex = UUID_REGEX.get_or_init(|| {
            Regex::new(r"^[0-9a-f]{8}-[0-9a-f]{4}-4[0-9a-f]{3}-[89ab][0-9a-f]{3}-[0-9a-f]{12}$")
                .expect("valid regex")
        });

        if regex.is_match(&id) {
            Ok(Self(id))
        } else {
            Err(LeadflowError::Validation(format!(
                "invalid job ID: must be a valid UUID v4, got '{id}'"
            )))
        }
    }

    /// Create a new random `JobId`.
    #[must_use]
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// Get the inner string value.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Newtype for the caller's authenticated session.
///
/// Staged leads are scoped to a session and die with it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(String);

impl SessionId {
    /// Create a new `SessionId`.
    ///
    /// # Errors
    /// Returns error if the id is empty.
    pub fn new(id: impl Into<String>) -> Result<Self, LeadflowError> {
        let id = id.into();
        if id.trim().is_empty() {
            return Err(LeadflowError::Validation(
                "invalid session ID: must not be empty".to_string(),
            ));
        }
        Ok(Self(id))
    }

    /// Get the inner string value.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Normalized company tax id: exactly 14 ASCII digits.
///
/// Input may carry the usual punctuation (`12.345.678/0001-90`); it is
/// stripped before validation. Check digits are not verified, the provider is
/// the authority on whether a tax id exists.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TaxId(String);

impl TaxId {
    /// Parse and normalize a tax id.
    ///
    /// # Errors
    /// Returns error if the input does not contain exactly 14 digits.
    pub fn parse(raw: &str) -> Result<Self, LeadflowError> {
        let digits = digits_only(raw);
        if digits.len() == TAX_ID_DIGITS {
            Ok(Self(digits))
        } else {
            Err(LeadflowError::Validation(format!(
                "invalid tax ID: expected {TAX_ID_DIGITS} digits, got {}",
                digits.len()
            )))
        }
    }

    /// Get the normalized digits.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Format as `NN.NNN.NNN/NNNN-NN`.
    #[must_use]
    pub fn formatted(&self) -> String {
        let d = &self.0;
        format!(
            "{}.{}.{}/{}-{}",
            &d[0..2],
            &d[2..5],
            &d[5..8],
            &d[8..12],
            &d[12..14]
        )
    }
}

impl fmt::Display for TaxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Strip everything except ASCII digits.
#[must_use]
pub fn digits_only(raw: &str) -> String {
    raw.chars().filter(char::is_ascii_digit).collect()
}
