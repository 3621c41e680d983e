//! Lead records as returned by the provider and as stored after consumption.

use crate::types::TaxId;
use serde::{Deserialize, Serialize};

/// Searchable summary of one company.
///
/// Every field is optional: providers return sparse records and a bare tax id
/// is a valid (if minimal) lead.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LeadSummary {
    /// Registered or trade name
    pub company_name: Option<String>,
    /// Main activity description
    pub segment: Option<String>,
    /// Normalized 14-digit tax id
    pub tax_id: Option<String>,
    /// Tax id formatted for display
    pub formatted_tax_id: Option<String>,
    /// Contact email
    pub email: Option<String>,
    /// Contact phone
    pub phone: Option<String>,
    /// City
    pub city: Option<String>,
    /// State abbreviation
    pub region: Option<String>,
    /// Registration status
    pub status: Option<String>,
}

impl LeadSummary {
    /// Summary holding only a tax id.
    #[must_use]
    pub fn from_tax_id(tax_id: &TaxId) -> Self {
        Self {
            tax_id: Some(tax_id.as_str().to_string()),
            formatted_tax_id: Some(tax_id.formatted()),
            ..Self::default()
        }
    }

    /// Parsed tax id, if present and well formed.
    #[must_use]
    pub fn tax_id(&self) -> Option<TaxId> {
        self.tax_id.as_deref().and_then(|raw| TaxId::parse(raw).ok())
    }

    /// Merge a previously saved summary over this freshly fetched one.
    ///
    /// Non-empty saved fields win; empty or missing saved fields keep the fresh value.
    #[must_use]
    pub fn merged_with_existing(self, existing: &LeadSummary) -> Self {
        fn pick(fresh: Option<String>, saved: Option<&String>) -> Option<String> {
            match saved {
                Some(value) if !value.trim().is_empty() => Some(value.clone()),
                _ => fresh,
            }
        }

        Self {
            company_name: pick(self.company_name, existing.company_name.as_ref()),
            segment: pick(self.segment, existing.segment.as_ref()),
            tax_id: pick(self.tax_id, existing.tax_id.as_ref()),
            formatted_tax_id: pick(self.formatted_tax_id, existing.formatted_tax_id.as_ref()),
            email: pick(self.email, existing.email.as_ref()),
            phone: pick(self.phone, existing.phone.as_ref()),
            city: pick(self.city, existing.city.as_ref()),
            region: pick(self.region, existing.region.as_ref()),
            status: pick(self.status, existing.status.as_ref()),
        }
    }
}

/// Full record of one company, as returned by the provider's detail call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeadDetail {
    /// Normalized tax id
    pub tax_id: TaxId,
    /// Summary fields extracted from the record
    pub summary: LeadSummary,
    /// Provider record as received
    pub raw: serde_json::Value,
}

/// One page of search results.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchPage {
    /// Leads on this page, at most `page_size`
    pub leads: Vec<LeadSummary>,
    /// Provider's estimate of total matches
    pub total: u64,
    /// Whether pages beyond this one exist
    pub has_more: bool,
    /// 1-based page number
    pub page: u32,
    /// Requested page size
    pub page_size: u32,
}

impl SearchPage {
    /// `total > page * page_size`.
    #[must_use]
    pub fn compute_has_more(total: u64, page: u32, page_size: u32) -> bool {
        total > u64::from(page) * u64::from(page_size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn summary(name: Option<&str>, email: Option<&str>) -> LeadSummary {
        LeadSummary {
            company_name: name.map(str::to_string),
            email: email.map(str::to_string),
            tax_id: Some("12345678000190".to_string()),
            ..LeadSummary::default()
        }
    }

    #[test]
    fn test_merge_existing_fields_win() {
        let fresh = summary(Some("Fresh Name"), Some("fresh@example.com"));
        let saved = summary(Some("Saved Name"), None);
        let merged = fresh.merged_with_existing(&saved);

        assert_eq!(merged.company_name.as_deref(), Some("Saved Name"));
        assert_eq!(merged.email.as_deref(), Some("fresh@example.com"));
    }

    #[test]
    fn test_merge_blank_existing_does_not_erase() {
        let fresh = summary(Some("Fresh Name"), None);
        let saved = summary(Some("   "), None);
        let merged = fresh.merged_with_existing(&saved);
        assert_eq!(merged.company_name.as_deref(), Some("Fresh Name"));
    }

    #[test]
    fn test_summary_tax_id_parses() {
        let lead = summary(None, None);
        assert_eq!(
            lead.tax_id().expect("tax id present").formatted(),
            "12.345.678/0001-90"
        );
        assert!(LeadSummary::default().tax_id().is_none());
    }

    #[test]
    fn test_has_more_pages() {
        // 120 matches, 50 per page
        assert!(SearchPage::compute_has_more(120, 1, 50));
        assert!(SearchPage::compute_has_more(120, 2, 50));
        assert!(!SearchPage::compute_has_more(120, 3, 50));
        assert!(!SearchPage::compute_has_more(0, 1, 50));
    }
}
