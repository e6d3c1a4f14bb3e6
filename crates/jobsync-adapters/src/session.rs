//! Page-fetch capability: navigate / extract / interact over one browsing session.

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use jobsync_core::RawRecord;
use scraper::{ElementRef, Html, Selector};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;
use url::Url;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("navigation to {url} timed out after {timeout_ms}ms")]
    Timeout { url: String, timeout_ms: u128 },
    #[error("http status {status} for {url}")]
    HttpStatus { status: u16, url: String },
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("invalid url {0:?}")]
    InvalidUrl(String),
    #[error("invalid selector {selector:?}: {message}")]
    Selector { selector: String, message: String },
    #[error("no page loaded")]
    NoPage,
    #[error("cannot interact with {selector:?}: {reason}")]
    Interaction { selector: String, reason: String },
    #[error("no fixture page for {0}")]
    FixtureMissing(String),
    #[error("session setup failed: {0}")]
    Setup(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Click,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InteractOutcome {
    Performed,
    Missing,
    Disabled,
}

fn default_link_attr() -> String {
    "href".to_string()
}

/// CSS selectors describing one result card layout. Field selectors are relative to `card`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageDescriptor {
    pub card: String,
    pub title: String,
    #[serde(default)]
    pub company: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub experience: Option<String>,
    #[serde(default)]
    pub posted_date: Option<String>,
    pub link: String,
    #[serde(default = "default_link_attr")]
    pub link_attr: String,
}

#[async_trait]
pub trait PageSession: Send {
    async fn navigate(&mut self, url: &str, timeout: Duration) -> Result<(), SessionError>;

    async fn extract(&mut self, descriptor: &PageDescriptor) -> Result<Vec<RawRecord>, SessionError>;

    async fn interact(&mut self, selector: &str, action: Action) -> Result<InteractOutcome, SessionError>;

    /// Tear the session down. Called once at the end of every run.
    async fn close(&mut self) -> Result<(), SessionError> {
        Ok(())
    }
}

#[async_trait]
pub trait SessionFactory: Send + Sync {
    async fn open(&self) -> Result<Box<dyn PageSession>, SessionError>;
}

fn parse_selector(selector: &str) -> Result<Selector, SessionError> {
    Selector::parse(selector).map_err(|e| SessionError::Selector {
        selector: selector.to_string(),
        message: e.to_string(),
    })
}

fn text_or_none(value: String) -> Option<String> {
    let trimmed = value.trim().to_string();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed)
    }
}

fn card_text(card: &ElementRef<'_>, selector: Option<&Selector>) -> Option<String> {
    let selector = selector?;
    card.select(selector)
        .next()
        .and_then(|n| text_or_none(n.text().collect::<Vec<_>>().join(" ")))
}

/// Pull raw records out of an HTML document; relative links resolve against `base`.
pub fn extract_records(
    html: &str,
    base: &Url,
    descriptor: &PageDescriptor,
) -> Result<Vec<RawRecord>, SessionError> {
    let card = parse_selector(&descriptor.card)?;
    let title = parse_selector(&descriptor.title)?;
    let link = parse_selector(&descriptor.link)?;
    let optional = |s: &Option<String>| s.as_deref().map(parse_selector).transpose();
    let company = optional(&descriptor.company)?;
    let location = optional(&descriptor.location)?;
    let experience = optional(&descriptor.experience)?;
    let posted_date = optional(&descriptor.posted_date)?;

    let document = Html::parse_document(html);
    Ok(document
        .select(&card)
        .map(|node| {
            let detail_url = node
                .select(&link)
                .next()
                .and_then(|a| a.value().attr(&descriptor.link_attr))
                .and_then(|href| base.join(href.trim()).ok())
                .map(|u| u.to_string());
            RawRecord {
                title: card_text(&node, Some(&title)),
                company: card_text(&node, company.as_ref()),
                location: card_text(&node, location.as_ref()),
                experience: card_text(&node, experience.as_ref()),
                posted_date: card_text(&node, posted_date.as_ref()),
                detail_url,
            }
        })
        .collect())
}

enum ClickTarget {
    Missing,
    Disabled,
    Follow(Url),
}

fn is_disabled(node: &ElementRef<'_>) -> bool {
    let el = node.value();
    el.attr("disabled").is_some()
        || el.attr("aria-disabled").is_some_and(|v| v.eq_ignore_ascii_case("true"))
        || el.classes().any(|c| c.eq_ignore_ascii_case("disabled"))
}

fn resolve_click(html: &str, base: &Url, selector: &str) -> Result<ClickTarget, SessionError> {
    let sel = parse_selector(selector)?;
    let document = Html::parse_document(html);
    let Some(node) = document.select(&sel).next() else {
        return Ok(ClickTarget::Missing);
    };
    if is_disabled(&node) {
        return Ok(ClickTarget::Disabled);
    }
    let href = node
        .value()
        .attr("href")
        .or_else(|| node.value().attr("data-href"))
        .ok_or_else(|| SessionError::Interaction {
            selector: selector.to_string(),
            reason: "element has no link target".to_string(),
        })?;
    base.join(href.trim())
        .map(ClickTarget::Follow)
        .map_err(|_| SessionError::InvalidUrl(href.to_string()))
}

#[derive(Debug, Clone)]
struct LoadedPage {
    url: Url,
    html: String,
}

#[derive(Debug)]
enum PageSource {
    Http(reqwest::Client),
    Fixtures(HashMap<String, String>),
}

impl PageSource {
    async fn load(&self, url: &Url) -> Result<String, SessionError> {
        match self {
            PageSource::Http(client) => {
                let resp = client.get(url.clone()).send().await?;
                let status = resp.status();
                if !status.is_success() {
                    return Err(SessionError::HttpStatus {
                        status: status.as_u16(),
                        url: resp.url().to_string(),
                    });
                }
                Ok(resp.text().await?)
            }
            PageSource::Fixtures(pages) => pages
                .get(url.as_str())
                .cloned()
                .ok_or_else(|| SessionError::FixtureMissing(url.to_string())),
        }
    }
}

/// Session over server-rendered HTML, fetched live or served from captured fixtures.
/// Clicking follows the element's link target.
#[derive(Debug)]
pub struct StaticHtmlSession {
    source: PageSource,
    current: Option<LoadedPage>,
    interaction_timeout: Duration,
}

impl StaticHtmlSession {
    pub fn http(client: reqwest::Client, interaction_timeout: Duration) -> Self {
        Self {
            source: PageSource::Http(client),
            current: None,
            interaction_timeout,
        }
    }

    pub fn fixtures(pages: HashMap<String, String>) -> Self {
        Self {
            source: PageSource::Fixtures(pages),
            current: None,
            interaction_timeout: Duration::from_secs(5),
        }
    }

    pub fn current_url(&self) -> Option<&str> {
        self.current.as_ref().map(|p| p.url.as_str())
    }

    async fn load_with_timeout(&mut self, url: Url, timeout: Duration) -> Result<(), SessionError> {
        debug!(%url, "navigating");
        let html = match tokio::time::timeout(timeout, self.source.load(&url)).await {
            Ok(result) => result?,
            Err(_) => {
                return Err(SessionError::Timeout {
                    url: url.to_string(),
                    timeout_ms: timeout.as_millis(),
                })
            }
        };
        self.current = Some(LoadedPage { url, html });
        Ok(())
    }
}

#[async_trait]
impl PageSession for StaticHtmlSession {
    async fn navigate(&mut self, url: &str, timeout: Duration) -> Result<(), SessionError> {
        let url = Url::parse(url).map_err(|_| SessionError::InvalidUrl(url.to_string()))?;
        self.load_with_timeout(url, timeout).await
    }

    async fn extract(&mut self, descriptor: &PageDescriptor) -> Result<Vec<RawRecord>, SessionError> {
        let page = self.current.as_ref().ok_or(SessionError::NoPage)?;
        extract_records(&page.html, &page.url, descriptor)
    }

    async fn interact(&mut self, selector: &str, action: Action) -> Result<InteractOutcome, SessionError> {
        let Action::Click = action;
        let page = self.current.as_ref().ok_or(SessionError::NoPage)?;
        match resolve_click(&page.html, &page.url, selector)? {
            ClickTarget::Missing => Ok(InteractOutcome::Missing),
            ClickTarget::Disabled => Ok(InteractOutcome::Disabled),
            ClickTarget::Follow(target) => {
                let timeout = self.interaction_timeout;
                self.load_with_timeout(target, timeout).await?;
                Ok(InteractOutcome::Performed)
            }
        }
    }

    async fn close(&mut self) -> Result<(), SessionError> {
        self.current = None;
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct HttpSessionConfig {
    pub timeout: Duration,
    pub user_agent: Option<String>,
}

impl Default for HttpSessionConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            user_agent: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct HttpSessionFactory {
    config: HttpSessionConfig,
}

impl HttpSessionFactory {
    pub fn new(config: HttpSessionConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl SessionFactory for HttpSessionFactory {
    async fn open(&self) -> Result<Box<dyn PageSession>, SessionError> {
        let mut builder = reqwest::Client::builder()
            .gzip(true)
            .brotli(true)
            .cookie_store(true)
            .timeout(self.config.timeout);
        if let Some(user_agent) = &self.config.user_agent {
            builder = builder.user_agent(user_agent.clone());
        }
        let client = builder
            .build()
            .map_err(|e| SessionError::Setup(e.to_string()))?;
        Ok(Box::new(StaticHtmlSession::http(client, self.config.timeout)))
    }
}

#[derive(Debug, Deserialize)]
struct FixtureManifest {
    pages: Vec<FixturePage>,
}

#[derive(Debug, Deserialize)]
struct FixturePage {
    url: String,
    #[serde(default)]
    path: Option<String>,
    #[serde(default)]
    inline_html: Option<String>,
}

fn fixture_key(url: &str) -> String {
    Url::parse(url)
        .map(|u| u.to_string())
        .unwrap_or_else(|_| url.to_string())
}

/// Serves pre-captured pages keyed by URL; used for offline runs and tests.
#[derive(Debug, Clone, Default)]
pub struct FixtureSessionFactory {
    pages: HashMap<String, String>,
}

impl FixtureSessionFactory {
    pub fn from_pages<I, U, H>(pages: I) -> Self
    where
        I: IntoIterator<Item = (U, H)>,
        U: AsRef<str>,
        H: Into<String>,
    {
        Self {
            pages: pages
                .into_iter()
                .map(|(url, html)| (fixture_key(url.as_ref()), html.into()))
                .collect(),
        }
    }

    /// Load a `{"pages": [{"url", "path" | "inline_html"}]}` manifest; paths are manifest-relative.
    pub fn load_manifest(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        let manifest: FixtureManifest =
            serde_json::from_str(&text).with_context(|| format!("parsing {}", path.display()))?;
        let base = path.parent().unwrap_or_else(|| Path::new("."));

        let mut pages = HashMap::new();
        for page in manifest.pages {
            let html = match (page.inline_html, page.path) {
                (Some(html), _) => html,
                (None, Some(rel)) => {
                    let page_path = base.join(&rel);
                    std::fs::read_to_string(&page_path)
                        .with_context(|| format!("reading fixture page {}", page_path.display()))?
                }
                (None, None) => anyhow::bail!("fixture page {} has neither path nor inline_html", page.url),
            };
            pages.insert(fixture_key(&page.url), html);
        }
        Ok(Self { pages })
    }

    pub fn len(&self) -> usize {
        self.pages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }
}

#[async_trait]
impl SessionFactory for FixtureSessionFactory {
    async fn open(&self) -> Result<Box<dyn PageSession>, SessionError> {
        Ok(Box::new(StaticHtmlSession::fixtures(self.pages.clone())))
    }
}
