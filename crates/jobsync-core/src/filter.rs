//! Pure listing predicates. Nothing here touches the dedup ledger or any other state.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::{CategoryPolicy, JobCandidate, UNKNOWN};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TitleRule {
    #[serde(default)]
    pub valid: Vec<String>,
    #[serde(default)]
    pub excluded: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocationRule {
    #[serde(default)]
    pub allowed: Vec<String>,
    #[serde(default)]
    pub denied: Vec<String>,
}

/// Maximum listing age, in hours, still considered fresh.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FreshnessWindow {
    pub max_age_hours: u32,
}

impl Default for FreshnessWindow {
    fn default() -> Self {
        Self { max_age_hours: 24 }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExperienceRule {
    pub target_min: u32,
    pub target_max: u32,
    #[serde(default = "default_fallback_phrases")]
    pub fallback_phrases: Vec<String>,
}

fn default_fallback_phrases() -> Vec<String> {
    ["n/a", "not specified", "not disclosed"]
        .into_iter()
        .map(String::from)
        .collect()
}

impl Default for ExperienceRule {
    fn default() -> Self {
        Self {
            target_min: 2,
            target_max: 3,
            fallback_phrases: default_fallback_phrases(),
        }
    }
}

/// First predicate a candidate failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Rejection {
    Title,
    Location,
    Recency,
    Experience,
}

fn contains_any(haystack: &str, needles: &[String]) -> bool {
    needles
        .iter()
        .filter(|needle| !needle.trim().is_empty())
        .any(|needle| haystack.contains(&needle.to_ascii_lowercase()))
}

fn is_absent(text: &str) -> bool {
    let trimmed = text.trim();
    trimmed.is_empty() || trimmed.eq_ignore_ascii_case(UNKNOWN)
}

/// Keyword bag classifier. Exclusion always wins over inclusion.
pub fn validate_title(title: &str, rule: &TitleRule) -> bool {
    if is_absent(title) {
        return false;
    }
    let lower = title.to_ascii_lowercase();
    if contains_any(&lower, &rule.excluded) {
        return false;
    }
    contains_any(&lower, &rule.valid)
}

/// Deny-list first and absolute, then at least one allowed marker is required.
pub fn is_valid_location(location: &str, rule: &LocationRule) -> bool {
    let lower = location.to_ascii_lowercase();
    if contains_any(&lower, &rule.denied) {
        return false;
    }
    contains_any(&lower, &rule.allowed)
}

const FRESH_MARKERS: &[&str] = &["just now", "just posted", "moments ago", "today"];

static AGO_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"\b(\d+|an?|few)\s*\+?\s*(seconds?|secs?|minutes?|mins?|hours?|hrs?|days?|weeks?|months?|years?)\s+ago",
    )
    .expect("static recency pattern")
});

fn unit_minutes(unit: &str) -> u64 {
    const HOUR: u64 = 60;
    const DAY: u64 = 24 * HOUR;
    match unit.trim_end_matches('s') {
        "second" | "sec" => 0,
        "minute" | "min" => 1,
        "hour" | "hr" => HOUR,
        "day" => DAY,
        "week" => 7 * DAY,
        "month" => 30 * DAY,
        _ => 365 * DAY,
    }
}

/// Heuristic relative-time classifier; unrecognised phrasing is never recent.
pub fn is_recent(posted: &str, window: FreshnessWindow) -> bool {
    if is_absent(posted) {
        return false;
    }
    let lower = posted.to_ascii_lowercase();
    if FRESH_MARKERS.iter().any(|marker| lower.contains(marker)) {
        return true;
    }

    let age_minutes = if let Some(caps) = AGO_PATTERN.captures(&lower) {
        let count = match &caps[1] {
            "a" | "an" => 1,
            "few" => 3,
            digits => match digits.parse::<u64>() {
                Ok(n) => n,
                Err(_) => return false,
            },
        };
        count.saturating_mul(unit_minutes(&caps[2]))
    } else if lower.contains("yesterday") {
        24 * 60
    } else {
        return false;
    };

    age_minutes <= u64::from(window.max_age_hours) * 60
}

/// Inclusive years-of-experience range declared by a listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExperienceRange {
    pub min: u32,
    pub max: u32,
}

impl ExperienceRange {
    pub fn overlaps(&self, target_min: u32, target_max: u32) -> bool {
        self.min <= target_max && self.max >= target_min
    }
}

static RANGE_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d+)\s*(?:-|–|to)\s*(\d+)").expect("static range pattern"));
static OPEN_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d+)\s*\+\s*(?:yrs?|years?)").expect("static open pattern"));
static SINGLE_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d+)\s*(?:yrs?|years?)").expect("static single pattern"));

pub fn parse_experience(text: &str) -> Option<ExperienceRange> {
    let lower = text.to_ascii_lowercase();
    if let Some(caps) = RANGE_PATTERN.captures(&lower) {
        let a = caps[1].parse::<u32>().ok()?;
        let b = caps[2].parse::<u32>().ok()?;
        return Some(ExperienceRange {
            min: a.min(b),
            max: a.max(b),
        });
    }
    if let Some(caps) = OPEN_PATTERN.captures(&lower) {
        let min = caps[1].parse::<u32>().ok()?;
        return Some(ExperienceRange { min, max: u32::MAX });
    }
    if let Some(caps) = SINGLE_PATTERN.captures(&lower) {
        let years = caps[1].parse::<u32>().ok()?;
        return Some(ExperienceRange { min: years, max: years });
    }
    None
}

/// Any overlap with the target range counts; unparseable text needs a fallback phrase.
pub fn experience_matches(text: &str, rule: &ExperienceRule) -> bool {
    match parse_experience(text) {
        Some(range) => range.overlaps(rule.target_min, rule.target_max),
        None => {
            let normalized = text.trim().to_ascii_lowercase();
            rule.fallback_phrases
                .iter()
                .any(|phrase| phrase.trim().eq_ignore_ascii_case(&normalized))
        }
    }
}

/// Run all four predicates in order and report the first one that fails.
pub fn screen(
    candidate: &JobCandidate,
    policy: &CategoryPolicy,
    freshness: FreshnessWindow,
) -> Result<(), Rejection> {
    if !validate_title(&candidate.title, &policy.title) {
        return Err(Rejection::Title);
    }
    if !is_valid_location(&candidate.location, &policy.location) {
        return Err(Rejection::Location);
    }
    if !is_recent(&candidate.posted_date, freshness) {
        return Err(Rejection::Recency);
    }
    if !experience_matches(&candidate.experience, &policy.experience) {
        return Err(Rejection::Experience);
    }
    Ok(())
}
