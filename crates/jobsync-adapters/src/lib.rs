//! Source adapter contracts + the listing-site adapters.

pub mod session;

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use jobsync_core::{CategoryConfig, RawRecord};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};
use url::Url;

pub use session::{
    Action, FixtureSessionFactory, HttpSessionConfig, HttpSessionFactory, InteractOutcome,
    PageDescriptor, PageSession, SessionError, SessionFactory, StaticHtmlSession,
};

pub const CRATE_NAME: &str = "jobsync-adapters";

#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("{0}")]
    Message(String),
    #[error(transparent)]
    Session(#[from] SessionError),
}

/// One unit of adapter work: a category's role term searched in one location.
#[derive(Debug, Clone, Copy)]
pub struct SearchRequest<'a> {
    pub category: &'a CategoryConfig,
    pub location: &'a str,
    pub role: &'a str,
}

#[async_trait]
pub trait SourceAdapter: Send + Sync {
    fn platform(&self) -> &str;

    async fn search(
        &self,
        session: &mut dyn PageSession,
        request: &SearchRequest<'_>,
    ) -> Result<Vec<RawRecord>, AdapterError>;
}

/// Randomized pause taken before every page load.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoliteDelay {
    pub min: Duration,
    pub max: Duration,
}

impl PoliteDelay {
    pub const NONE: PoliteDelay = PoliteDelay {
        min: Duration::ZERO,
        max: Duration::ZERO,
    };

    pub fn next_delay(&self) -> Duration {
        let lo = self.min.as_millis() as u64;
        let hi = (self.max.as_millis() as u64).max(lo);
        Duration::from_millis(fastrand::u64(lo..=hi))
    }

    pub async fn pause(&self) {
        let delay = self.next_delay();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }
}

impl Default for PoliteDelay {
    fn default() -> Self {
        Self {
            min: Duration::from_millis(1500),
            max: Duration::from_millis(4000),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct AdapterRuntime {
    pub navigation_timeout: Duration,
    pub delay: PoliteDelay,
}

impl Default for AdapterRuntime {
    fn default() -> Self {
        Self {
            navigation_timeout: Duration::from_secs(30),
            delay: PoliteDelay::default(),
        }
    }
}

fn default_max_pages() -> u32 {
    3
}

/// Search pages addressed by a URL template (`{role}`, `{location}`, `{experience}`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemplatedSearchConfig {
    pub search_url: String,
    pub listing: PageDescriptor,
    /// Selector template with a `{facet}` placeholder, clicked before extraction.
    #[serde(default)]
    pub facet_selector: Option<String>,
    #[serde(default)]
    pub next_page_selector: Option<String>,
    #[serde(default = "default_max_pages")]
    pub max_pages: u32,
}

fn default_keyword_param() -> String {
    "keywords".to_string()
}

fn default_geo_param() -> String {
    "location".to_string()
}

/// Search pages addressed by keyword + geo query parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeywordGeoConfig {
    pub base_url: String,
    #[serde(default = "default_keyword_param")]
    pub keyword_param: String,
    #[serde(default = "default_geo_param")]
    pub geo_param: String,
    #[serde(default)]
    pub extra_params: BTreeMap<String, String>,
    pub listing: PageDescriptor,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SourceSettings {
    TemplatedSearch(TemplatedSearchConfig),
    KeywordGeo(KeywordGeoConfig),
}

/// Registry entry for one listing source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceEntry {
    pub platform: String,
    #[serde(default = "enabled_by_default")]
    pub enabled: bool,
    #[serde(flatten)]
    pub settings: SourceSettings,
}

fn enabled_by_default() -> bool {
    true
}

pub fn slugify(input: &str) -> String {
    input
        .trim()
        .to_ascii_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
        .collect::<String>()
        .split('-')
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("-")
}

#[derive(Debug, Clone)]
pub struct TemplatedSearchAdapter {
    platform: String,
    config: TemplatedSearchConfig,
    runtime: AdapterRuntime,
}

impl TemplatedSearchAdapter {
    pub fn new(platform: impl Into<String>, config: TemplatedSearchConfig, runtime: AdapterRuntime) -> Self {
        Self {
            platform: platform.into(),
            config,
            runtime,
        }
    }

    pub fn search_url(&self, request: &SearchRequest<'_>) -> Result<String, AdapterError> {
        let rendered = self
            .config
            .search_url
            .replace("{role}", &slugify(request.role))
            .replace("{location}", &slugify(request.location))
            .replace(
                "{experience}",
                &request.category.policy.experience.target_min.to_string(),
            );
        Url::parse(&rendered)
            .map(|u| u.to_string())
            .map_err(|e| AdapterError::Message(format!("bad search url {rendered:?}: {e}")))
    }

    /// Facet problems never fail the search; the listing is read unfiltered instead.
    async fn apply_facet(&self, session: &mut dyn PageSession, facet: &str) {
        let Some(template) = &self.config.facet_selector else {
            return;
        };
        let selector = template.replace("{facet}", &css_string_escape(facet));
        self.runtime.delay.pause().await;
        match session.interact(&selector, Action::Click).await {
            Ok(InteractOutcome::Performed) => debug!(platform = %self.platform, facet, "facet applied"),
            Ok(outcome) => warn!(
                platform = %self.platform,
                facet,
                ?outcome,
                "facet control unavailable; continuing unfiltered"
            ),
            Err(err) => warn!(
                platform = %self.platform,
                facet,
                error = %err,
                "facet click failed; continuing unfiltered"
            ),
        }
    }
}

/// Escape a value for use inside a quoted CSS attribute selector.
fn css_string_escape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        if matches!(c, '"' | '\'' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

#[async_trait]
impl SourceAdapter for TemplatedSearchAdapter {
    fn platform(&self) -> &str {
        &self.platform
    }

    async fn search(
        &self,
        session: &mut dyn PageSession,
        request: &SearchRequest<'_>,
    ) -> Result<Vec<RawRecord>, AdapterError> {
        let url = self.search_url(request)?;
        self.runtime.delay.pause().await;
        session.navigate(&url, self.runtime.navigation_timeout).await?;

        if let Some(facet) = request.category.facet_filter.as_deref() {
            self.apply_facet(session, facet).await;
        }

        let mut records = Vec::new();
        let mut page = 1u32;
        loop {
            let batch = session.extract(&self.config.listing).await?;
            debug!(platform = %self.platform, page, found = batch.len(), "page extracted");
            records.extend(batch);

            if page >= self.config.max_pages.max(1) {
                break;
            }
            let Some(next) = self.config.next_page_selector.as_deref() else {
                break;
            };
            self.runtime.delay.pause().await;
            match session.interact(next, Action::Click).await {
                Ok(InteractOutcome::Performed) => page += 1,
                Ok(InteractOutcome::Missing | InteractOutcome::Disabled) => break,
                Err(err) => {
                    warn!(platform = %self.platform, page, error = %err, "pagination failed; keeping pages read so far");
                    break;
                }
            }
        }
        Ok(records)
    }
}

#[derive(Debug, Clone)]
pub struct KeywordGeoAdapter {
    platform: String,
    config: KeywordGeoConfig,
    runtime: AdapterRuntime,
}

impl KeywordGeoAdapter {
    pub fn new(platform: impl Into<String>, config: KeywordGeoConfig, runtime: AdapterRuntime) -> Self {
        Self {
            platform: platform.into(),
            config,
            runtime,
        }
    }

    pub fn search_url(&self, request: &SearchRequest<'_>) -> Result<String, AdapterError> {
        let mut url = Url::parse(&self.config.base_url).map_err(|e| {
            AdapterError::Message(format!("bad base url {:?}: {e}", self.config.base_url))
        })?;
        {
            let mut query = url.query_pairs_mut();
            query.append_pair(&self.config.keyword_param, request.role);
            query.append_pair(&self.config.geo_param, request.location);
            for (key, value) in &self.config.extra_params {
                query.append_pair(key, value);
            }
        }
        Ok(url.to_string())
    }
}

#[async_trait]
impl SourceAdapter for KeywordGeoAdapter {
    fn platform(&self) -> &str {
        &self.platform
    }

    async fn search(
        &self,
        session: &mut dyn PageSession,
        request: &SearchRequest<'_>,
    ) -> Result<Vec<RawRecord>, AdapterError> {
        let url = self.search_url(request)?;
        self.runtime.delay.pause().await;
        session.navigate(&url, self.runtime.navigation_timeout).await?;
        Ok(session.extract(&self.config.listing).await?)
    }
}

pub fn adapter_for_source(source: &SourceEntry, runtime: AdapterRuntime) -> Box<dyn SourceAdapter> {
    match &source.settings {
        SourceSettings::TemplatedSearch(config) => Box::new(TemplatedSearchAdapter::new(
            source.platform.clone(),
            config.clone(),
            runtime,
        )),
        SourceSettings::KeywordGeo(config) => Box::new(KeywordGeoAdapter::new(
            source.platform.clone(),
            config.clone(),
            runtime,
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jobsync_core::{CategoryPolicy, ExperienceRule, LocationRule, TitleRule};

    fn runtime() -> AdapterRuntime {
        AdapterRuntime {
            navigation_timeout: Duration::from_secs(1),
            delay: PoliteDelay::NONE,
        }
    }

    fn category(facet: Option<&str>) -> CategoryConfig {
        CategoryConfig {
            tag: "design".into(),
            remote_target: None,
            roles: vec!["UI UX Designer".into()],
            facet_filter: facet.map(String::from),
            policy: CategoryPolicy {
                title: TitleRule::default(),
                location: LocationRule::default(),
                experience: ExperienceRule::default(),
            },
        }
    }

    fn listing() -> PageDescriptor {
        PageDescriptor {
            card: "div.job".into(),
            title: "a.title".into(),
            company: None,
            location: Some(".loc".into()),
            experience: None,
            posted_date: None,
            link: "a.title".into(),
            link_attr: "href".into(),
        }
    }

    fn page(ids: &[u32], next: Option<&str>) -> String {
        let cards = ids
            .iter()
            .map(|id| format!(r#"<div class="job"><a class="title" href="/job/{id}">Job {id}</a><span class="loc">Chennai</span></div>"#))
            .collect::<String>();
        let next = next.unwrap_or_default();
        format!("<html><body>{cards}{next}</body></html>")
    }

    fn templated(max_pages: u32) -> TemplatedSearchAdapter {
        TemplatedSearchAdapter::new(
            "naukri",
            TemplatedSearchConfig {
                search_url: "https://jobs.example.com/{role}-jobs-in-{location}?experience={experience}".into(),
                listing: listing(),
                facet_selector: Some(r#"a[data-facet="{facet}"]"#.into()),
                next_page_selector: Some("a.next".into()),
                max_pages,
            },
            runtime(),
        )
    }

    const FIRST: &str = "https://jobs.example.com/ui-ux-designer-jobs-in-chennai?experience=2";

    fn ids(records: &[RawRecord]) -> Vec<String> {
        records.iter().filter_map(|r| r.detail_url.clone()).collect()
    }

    #[test]
    fn slugify_collapses_separators() {
        assert_eq!(slugify("  UI / UX Designer "), "ui-ux-designer");
        assert_eq!(slugify("Bengaluru"), "bengaluru");
    }

    #[test]
    fn templated_url_substitutes_slugs() {
        let category = category(None);
        let request = SearchRequest { category: &category, location: "Chennai", role: "UI UX Designer" };
        assert_eq!(templated(3).search_url(&request).unwrap(), FIRST);
    }

    #[test]
    fn keyword_geo_url_encodes_parameters() {
        let adapter = KeywordGeoAdapter::new(
            "linkedin",
            KeywordGeoConfig {
                base_url: "https://www.linkedin.com/jobs/search".into(),
                keyword_param: default_keyword_param(),
                geo_param: default_geo_param(),
                extra_params: BTreeMap::from([("f_TPR".to_string(), "r86400".to_string())]),
                listing: listing(),
            },
            runtime(),
        );
        let category = category(None);
        let request = SearchRequest { category: &category, location: "Chennai, India", role: "Frontend Developer" };
        assert_eq!(
            adapter.search_url(&request).unwrap(),
            "https://www.linkedin.com/jobs/search?keywords=Frontend+Developer&location=Chennai%2C+India&f_TPR=r86400"
        );
    }

    #[tokio::test]
    async fn pagination_stops_at_missing_control() {
        let factory = FixtureSessionFactory::from_pages([
            (FIRST.to_string(), page(&[1, 2], Some(r#"<a class="next" href="/p2">Next</a>"#))),
            ("https://jobs.example.com/p2".to_string(), page(&[3], None)),
        ]);
        let mut session = factory.open().await.unwrap();
        let category = category(None);
        let request = SearchRequest { category: &category, location: "Chennai", role: "UI UX Designer" };
        let records = templated(5).search(session.as_mut(), &request).await.unwrap();
        assert_eq!(
            ids(&records),
            vec![
                "https://jobs.example.com/job/1",
                "https://jobs.example.com/job/2",
                "https://jobs.example.com/job/3"
            ]
        );
    }

    #[tokio::test]
    async fn pagination_stops_at_disabled_control() {
        let factory = FixtureSessionFactory::from_pages([(
            FIRST.to_string(),
            page(&[1], Some(r#"<a class="next disabled" href="/p2">Next</a>"#)),
        )]);
        let mut session = factory.open().await.unwrap();
        let category = category(None);
        let request = SearchRequest { category: &category, location: "Chennai", role: "UI UX Designer" };
        let records = templated(5).search(session.as_mut(), &request).await.unwrap();
        assert_eq!(records.len(), 1);
    }

    #[tokio::test]
    async fn pagination_respects_page_cap() {
        let factory = FixtureSessionFactory::from_pages([
            (FIRST.to_string(), page(&[1], Some(r#"<a class="next" href="/p2">Next</a>"#))),
            ("https://jobs.example.com/p2".to_string(), page(&[2], Some(r#"<a class="next" href="/p3">Next</a>"#))),
            ("https://jobs.example.com/p3".to_string(), page(&[3], None)),
        ]);
        let mut session = factory.open().await.unwrap();
        let category = category(None);
        let request = SearchRequest { category: &category, location: "Chennai", role: "UI UX Designer" };
        let records = templated(2).search(session.as_mut(), &request).await.unwrap();
        assert_eq!(records.len(), 2);
    }

    #[tokio::test]
    async fn facet_click_narrows_results_before_extraction() {
        let facet_link = r#"<a data-facet="UX, Design" href="/filtered">UX, Design</a>"#;
        let factory = FixtureSessionFactory::from_pages([
            (FIRST.to_string(), page(&[1, 2, 3], Some(facet_link))),
            ("https://jobs.example.com/filtered".to_string(), page(&[2], None)),
        ]);
        let mut session = factory.open().await.unwrap();
        let category = category(Some("UX, Design"));
        let request = SearchRequest { category: &category, location: "Chennai", role: "UI UX Designer" };
        let records = templated(3).search(session.as_mut(), &request).await.unwrap();
        assert_eq!(ids(&records), vec!["https://jobs.example.com/job/2"]);
    }

    #[tokio::test]
    async fn missing_facet_control_falls_back_to_unfiltered_results() {
        let factory = FixtureSessionFactory::from_pages([(FIRST.to_string(), page(&[1, 2], None))]);
        let mut session = factory.open().await.unwrap();
        let category = category(Some("UX, Design"));
        let request = SearchRequest { category: &category, location: "Chennai", role: "UI UX Designer" };
        let records = templated(3).search(session.as_mut(), &request).await.unwrap();
        assert_eq!(records.len(), 2);
    }

    #[test]
    fn facet_values_are_escaped_for_selectors() {
        assert_eq!(css_string_escape("UX, Design"), "UX, Design");
        assert_eq!(css_string_escape(r#"Senior "UX""#), r#"Senior \"UX\""#);
        assert_eq!(css_string_escape(r"a\b'c"), r"a\\b\'c");
    }

    #[tokio::test]
    async fn facet_with_quotes_still_matches_its_control() {
        let facet_link = r#"<a data-facet='Senior "UX"' href="/filtered">Senior UX</a>"#;
        let factory = FixtureSessionFactory::from_pages([
            (FIRST.to_string(), page(&[1, 2, 3], Some(facet_link))),
            ("https://jobs.example.com/filtered".to_string(), page(&[3], None)),
        ]);
        let mut session = factory.open().await.unwrap();
        let category = category(Some(r#"Senior "UX""#));
        let request = SearchRequest { category: &category, location: "Chennai", role: "UI UX Designer" };
        let records = templated(3).search(session.as_mut(), &request).await.unwrap();
        assert_eq!(ids(&records), vec!["https://jobs.example.com/job/3"]);
    }

    #[tokio::test]
    async fn broken_facet_selector_falls_back_to_unfiltered_results() {
        let mut adapter = templated(3);
        adapter.config.facet_selector = Some("a[[{facet}".into());
        let factory = FixtureSessionFactory::from_pages([(FIRST.to_string(), page(&[1, 2], None))]);
        let mut session = factory.open().await.unwrap();
        let category = category(Some("UX, Design"));
        let request = SearchRequest { category: &category, location: "Chennai", role: "UI UX Designer" };
        let records = adapter.search(session.as_mut(), &request).await.unwrap();
        assert_eq!(records.len(), 2);
    }

    #[tokio::test]
    async fn navigation_failure_is_an_adapter_error() {
        let mut session = FixtureSessionFactory::default().open().await.unwrap();
        let category = category(None);
        let request = SearchRequest { category: &category, location: "Chennai", role: "UI UX Designer" };
        let err = templated(3).search(session.as_mut(), &request).await.unwrap_err();
        assert!(matches!(err, AdapterError::Session(SessionError::FixtureMissing(_))));
    }

    #[test]
    fn source_entries_deserialize_by_kind() {
        let entry: SourceEntry = serde_json::from_value(serde_json::json!({
            "platform": "linkedin",
            "kind": "keyword_geo",
            "base_url": "https://www.linkedin.com/jobs/search",
            "listing": {
                "card": "li", "title": "h3", "link": "a.base-card__full-link"
            }
        }))
        .unwrap();
        assert!(entry.enabled);
        assert_eq!(adapter_for_source(&entry, runtime()).platform(), "linkedin");
    }

    #[test]
    fn polite_delay_stays_within_bounds() {
        let delay = PoliteDelay {
            min: Duration::from_millis(10),
            max: Duration::from_millis(20),
        };
        for _ in 0..50 {
            let d = delay.next_delay();
            assert!(d >= delay.min && d <= delay.max);
        }
        assert_eq!(PoliteDelay::NONE.next_delay(), Duration::ZERO);
    }
}
