//! Raw extraction output -> canonical candidate shape.

use url::Url;

use crate::{JobCandidate, RawRecord, UNKNOWN};

fn text_or_unknown(value: Option<&str>) -> String {
    let collapsed = value
        .unwrap_or_default()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ");
    if collapsed.is_empty() {
        UNKNOWN.to_string()
    } else {
        collapsed
    }
}

/// Absolute http(s) URL with query string and fragment removed, or `None`.
pub fn canonicalize_detail_url(raw: &str) -> Option<String> {
    let mut url = Url::parse(raw.trim()).ok()?;
    if !matches!(url.scheme(), "http" | "https") || url.host_str().is_none() {
        return None;
    }
    url.set_query(None);
    url.set_fragment(None);
    Some(url.to_string())
}

/// Listings without a usable detail URL have no identity and yield `None`.
pub fn normalize(raw: &RawRecord) -> Option<JobCandidate> {
    let detail_url = canonicalize_detail_url(raw.detail_url.as_deref()?)?;
    Some(JobCandidate {
        title: text_or_unknown(raw.title.as_deref()),
        company: text_or_unknown(raw.company.as_deref()),
        location: text_or_unknown(raw.location.as_deref()),
        experience: text_or_unknown(raw.experience.as_deref()),
        posted_date: text_or_unknown(raw.posted_date.as_deref()),
        detail_url,
    })
}
