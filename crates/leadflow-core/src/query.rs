//! The lead filter model.
//!
//! A [`LeadQuery`] is built by the caller, then normalized and validated exactly
//! once at the pipeline boundary. Everything downstream (job storage, payload
//! construction) can assume a normalized query.

use crate::error::LeadflowError;
use crate::types::{digits_only, TAX_ID_DIGITS};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

/// Registration status of a company.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompanyStatus {
    /// Active
    Active,
    /// Suspended
    Suspended,
    /// Unfit (missing filings)
    Unfit,
    /// Closed
    Closed,
    /// Null (registration annulled)
    Null,
}

impl CompanyStatus {
    /// The provider's wire value.
    #[must_use]
    pub fn provider_code(self) -> &'static str {
        match self {
            Self::Active => "ATIVA",
            Self::Suspended => "SUSPENSA",
            Self::Unfit => "INAPTA",
            Self::Closed => "BAIXADA",
            Self::Null => "NULA",
        }
    }
}

impl fmt::Display for CompanyStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.provider_code())
    }
}

/// Share capital bounds, in whole currency units.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CapitalRange {
    /// Inclusive lower bound
    pub min: Option<u64>,
    /// Inclusive upper bound
    pub max: Option<u64>,
}

impl CapitalRange {
    /// True when neither bound is set.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.min.is_none() && self.max.is_none()
    }
}

/// Registration (opening) date window.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistrationDate {
    /// Opened on or after
    pub start: Option<NaiveDate>,
    /// Opened on or before
    pub end: Option<NaiveDate>,
    /// Opened within the last N days
    pub last_days: Option<u32>,
}

impl RegistrationDate {
    /// True when no bound is set.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.start.is_none() && self.end.is_none() && self.last_days.is_none()
    }
}

/// Contact-channel filters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
#[allow(clippy::struct_excessive_bools)]
pub struct ContactFilter {
    /// Only companies with an email address
    pub has_email: bool,
    /// Only companies with a phone number
    pub has_phone: bool,
    /// Only mobile phone numbers
    pub mobile_only: bool,
    /// Only landline phone numbers
    pub landline_only: bool,
}

impl ContactFilter {
    /// True when no flag is set.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        !(self.has_email || self.has_phone || self.mobile_only || self.landline_only)
    }
}

/// Headquarters/branch restriction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EstablishmentFilter {
    /// No restriction
    #[default]
    Any,
    /// Headquarters only
    HeadquartersOnly,
    /// Branches only
    BranchOnly,
}

/// Opt-in filter for a tax regime (MEI, Simples Nacional).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegimeFilter {
    /// No restriction
    #[default]
    Any,
    /// Only companies that opted in
    OptedIn,
    /// Exclude companies that opted in
    ExcludeOptedIn,
}

/// Filters for a provider lead search.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LeadQuery {
    /// Free-text search terms
    pub terms: Vec<String>,
    /// Primary activity codes (CNAE)
    pub activity_codes: Vec<String>,
    /// Also match `activity_codes` against secondary activities
    pub include_secondary_activity: bool,
    /// Secondary activity codes (CNAE)
    pub secondary_activity_codes: Vec<String>,
    /// Legal nature codes
    pub legal_nature_codes: Vec<String>,
    /// Registration status
    pub company_status: Option<CompanyStatus>,
    /// State abbreviations (UF)
    pub regions: Vec<String>,
    /// City names
    pub cities: Vec<String>,
    /// Neighbourhood names
    pub neighbourhoods: Vec<String>,
    /// Postal codes (CEP)
    pub postal_codes: Vec<String>,
    /// Phone area codes (DDD)
    pub area_codes: Vec<String>,
    /// Specific tax ids
    pub tax_ids: Vec<String>,
    /// Share capital bounds
    pub capital: CapitalRange,
    /// Registration date window
    pub registration: RegistrationDate,
    /// Contact-channel flags
    pub contact: ContactFilter,
    /// Headquarters/branch restriction
    pub establishment: EstablishmentFilter,
    /// MEI regime filter
    pub mei: RegimeFilter,
    /// Simples Nacional regime filter
    pub simples: RegimeFilter,
    /// 1-based page cursor
    pub page: u32,
}

impl Default for LeadQuery {
    fn default() -> Self {
        Self {
            terms: Vec::new(),
            activity_codes: Vec::new(),
            include_secondary_activity: false,
            secondary_activity_codes: Vec::new(),
            legal_nature_codes: Vec::new(),
            company_status: None,
            regions: Vec::new(),
            cities: Vec::new(),
            neighbourhoods: Vec::new(),
            postal_codes: Vec::new(),
            area_codes: Vec::new(),
            tax_ids: Vec::new(),
            capital: CapitalRange::default(),
            registration: RegistrationDate::default(),
            contact: ContactFilter::default(),
            establishment: EstablishmentFilter::default(),
            mei: RegimeFilter::default(),
            simples: RegimeFilter::default(),
            page: 1,
        }
    }
}

impl LeadQuery {
    /// Return the canonical form of this query.
    ///
    /// Trims text, uppercases regions, strips punctuation from code lists,
    /// drops empties and duplicates (first occurrence wins), clamps `page >= 1`.
    #[must_use]
    pub fn normalized(self) -> Self {
        Self {
            terms: clean_list(self.terms, |s| s.trim().to_string()),
            activity_codes: clean_list(self.activity_codes, digits_only),
            secondary_activity_codes: clean_list(self.secondary_activity_codes, digits_only),
            legal_nature_codes: clean_list(self.legal_nature_codes, digits_only),
            regions: clean_list(self.regions, |s| s.trim().to_uppercase()),
            cities: clean_list(self.cities, |s| s.trim().to_string()),
            neighbourhoods: clean_list(self.neighbourhoods, |s| s.trim().to_string()),
            postal_codes: clean_list(self.postal_codes, digits_only),
            area_codes: clean_list(self.area_codes, digits_only),
            tax_ids: clean_list(self.tax_ids, digits_only),
            page: self.page.max(1),
            ..self
        }
    }

    /// Check cross-field constraints.
    ///
    /// # Errors
    /// Returns a validation error describing the first violated constraint.
    pub fn validate(&self) -> Result<(), LeadflowError> {
        if let (Some(min), Some(max)) = (self.capital.min, self.capital.max) {
            if min > max {
                return Err(LeadflowError::Validation(format!(
                    "capital minimum {min} exceeds maximum {max}"
                )));
            }
        }

        if let (Some(start), Some(end)) = (self.registration.start, self.registration.end) {
            if start > end {
                return Err(LeadflowError::Validation(format!(
                    "registration start {start} is after end {end}"
                )));
            }
        }

        if self.contact.mobile_only && self.contact.landline_only {
            return Err(LeadflowError::Validation(
                "mobile_only and landline_only are mutually exclusive".to_string(),
            ));
        }

        if let Some(region) = self
            .regions
            .iter()
            .find(|r| r.len() != 2 || !r.chars().all(|c| c.is_ascii_alphabetic()))
        {
            return Err(LeadflowError::Validation(format!(
                "invalid region '{region}': expected a two-letter state code"
            )));
        }

        if let Some(tax_id) = self.tax_ids.iter().find(|t| t.len() != TAX_ID_DIGITS) {
            return Err(LeadflowError::Validation(format!(
                "invalid tax ID filter '{tax_id}': expected {TAX_ID_DIGITS} digits"
            )));
        }

        Ok(())
    }
}

fn clean_list<F>(values: Vec<String>, clean: F) -> Vec<String>
where
    F: Fn(&str) -> String,
{
    let mut seen = HashSet::new();
    values
        .iter()
        .map(|v| clean(v.as_str()))
        .filter(|v| !v.is_empty() && seen.insert(v.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalized_cleans_lists() {
        let query = LeadQuery {
            terms: vec!["  padaria ".to_string(), String::new()],
            regions: vec![" sp".to_string(), "SP".to_string(), "rj ".to_string()],
            activity_codes: vec!["4721-1/02".to_string(), "4721102".to_string()],
            postal_codes: vec!["01310-100".to_string()],
            page: 0,
            ..LeadQuery::default()
        }
        .normalized();

        assert_eq!(query.terms, vec!["padaria"]);
        assert_eq!(query.regions, vec!["SP", "RJ"]);
        assert_eq!(query.activity_codes, vec!["4721102"]);
        assert_eq!(query.postal_codes, vec!["01310100"]);
        assert_eq!(query.page, 1);
    }

    #[test]
    fn test_normalized_is_idempotent() {
        let query = LeadQuery {
            cities: vec![" Campinas ".to_string()],
            tax_ids: vec!["12.345.678/0001-90".to_string()],
            ..LeadQuery::default()
        };
        let once = query.normalized();
        let twice = once.clone().normalized();
        assert_eq!(once, twice);
    }

    #[test]
    fn test_validate_capital_range() {
        let mut query = LeadQuery::default();
        query.capital = CapitalRange {
            min: Some(10_000),
            max: Some(5_000),
        };
        assert!(query.validate().is_err());

        query.capital.max = Some(10_000);
        assert!(query.validate().is_ok());
    }

    #[test]
    fn test_validate_registration_dates() {
        let mut query = LeadQuery::default();
        query.registration.start = NaiveDate::from_ymd_opt(2024, 5, 1);
        query.registration.end = NaiveDate::from_ymd_opt(2024, 1, 1);
        let err = query.validate().expect_err("start after end");
        assert!(err.to_string().contains("registration start"));
    }

    #[test]
    fn test_validate_rejects_conflicting_phone_flags() {
        let mut query = LeadQuery::default();
        query.contact.mobile_only = true;
        query.contact.landline_only = true;
        assert!(query.validate().is_err());
    }

    #[test]
    fn test_validate_regions_and_tax_ids() {
        let query = LeadQuery {
            regions: vec!["SAO".to_string()],
            ..LeadQuery::default()
        };
        assert!(query.validate().is_err());

        let query = LeadQuery {
            tax_ids: vec!["123".to_string()],
            ..LeadQuery::default()
        }
        .normalized();
        assert!(query.validate().is_err());
    }

    #[test]
    fn test_query_deserializes_with_defaults() {
        let query: LeadQuery =
            serde_json::from_str(r#"{"regions":["MG"],"company_status":"active"}"#)
                .expect("parse query json");
        assert_eq!(query.regions, vec!["MG"]);
        assert_eq!(query.company_status, Some(CompanyStatus::Active));
        assert_eq!(query.page, 1);
        assert_eq!(query.mei, RegimeFilter::Any);
    }

    #[test]
    fn test_company_status_codes() {
        assert_eq!(CompanyStatus::Active.provider_code(), "ATIVA");
        assert_eq!(CompanyStatus::Closed.to_string(), "BAIXADA");
    }
}
