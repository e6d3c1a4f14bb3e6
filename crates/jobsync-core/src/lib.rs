//! Core domain model for job listing sync: canonical records, category policy,
//! record normalization and the listing filter predicates.

pub mod filter;
pub mod normalize;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use filter::{
    screen, ExperienceRule, FreshnessWindow, LocationRule, Rejection, TitleRule,
};
pub use normalize::{canonicalize_detail_url, normalize};

pub const CRATE_NAME: &str = "jobsync-core";

/// Marker stored in place of any field a source did not provide.
pub const UNKNOWN: &str = "N/A";

/// Source-specific extraction output handed from a page session to the normalizer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawRecord {
    pub title: Option<String>,
    pub company: Option<String>,
    pub location: Option<String>,
    pub experience: Option<String>,
    pub posted_date: Option<String>,
    pub detail_url: Option<String>,
}

/// A normalized listing that has a stable identity but has not been accepted yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobCandidate {
    pub title: String,
    pub company: String,
    pub location: String,
    pub experience: String,
    pub posted_date: String,
    pub detail_url: String,
}

impl JobCandidate {
    /// Stamp the orchestrator-owned fields and produce the persisted record.
    pub fn accept(self, category: &str, source_platform: &str, scraped_at: DateTime<Utc>) -> JobRecord {
        JobRecord {
            title: self.title,
            company: self.company,
            location: self.location,
            experience: self.experience,
            posted_date: self.posted_date,
            detail_url: self.detail_url,
            category: category.to_string(),
            scraped_at,
            source_platform: source_platform.to_string(),
        }
    }
}

/// Canonical accepted job. `detail_url` is the only identity field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobRecord {
    pub title: String,
    pub company: String,
    pub location: String,
    pub experience: String,
    pub posted_date: String,
    pub detail_url: String,
    pub category: String,
    pub scraped_at: DateTime<Utc>,
    pub source_platform: String,
}

/// Declarative acceptance policy owned by one category.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryPolicy {
    pub title: TitleRule,
    pub location: LocationRule,
    pub experience: ExperienceRule,
}

/// One job-search vertical. Built once at startup, never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryConfig {
    pub tag: String,
    /// Resolved remote-store target; `None` means the category is not synced remotely.
    pub remote_target: Option<String>,
    pub roles: Vec<String>,
    pub facet_filter: Option<String>,
    pub policy: CategoryPolicy,
}

impl CategoryConfig {
    pub fn validate_title(&self, title: &str) -> bool {
        filter::validate_title(title, &self.policy.title)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn candidate() -> JobCandidate {
        JobCandidate {
            title: "Frontend Developer".into(),
            company: UNKNOWN.into(),
            location: "Chennai".into(),
            experience: "2-4 yrs".into(),
            posted_date: "3 hours ago".into(),
            detail_url: "http://x/1".into(),
        }
    }

    #[test]
    fn accept_stamps_orchestrator_fields() {
        let at = Utc.with_ymd_and_hms(2026, 10, 18, 9, 0, 0).single().unwrap();
        let record = candidate().accept("frontend", "naukri", at);
        assert_eq!(record.category, "frontend");
        assert_eq!(record.source_platform, "naukri");
        assert_eq!(record.scraped_at, at);
        assert_eq!(record.detail_url, "http://x/1");
        assert_eq!(record.company, UNKNOWN);
    }

    #[test]
    fn job_record_serializes_with_camel_case_keys() {
        let at = Utc.with_ymd_and_hms(2026, 10, 18, 9, 0, 0).single().unwrap();
        let record = candidate().accept("frontend", "linkedin", at);
        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value["detailUrl"], "http://x/1");
        assert_eq!(value["postedDate"], "3 hours ago");
        assert_eq!(value["sourcePlatform"], "linkedin");
        assert!(value.get("scrapedAt").is_some());
    }
}
