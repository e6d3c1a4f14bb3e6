//! Remote "source of truth" store: column query for dedup seeding, row append on acceptance.

use std::collections::HashMap;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::debug;
use url::Url;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("remote store request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("http status {status} for {url}")]
    HttpStatus { status: u16, url: String },
    #[error("malformed remote store target {0:?}")]
    Target(String),
}

#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Every value stored in `column` (a spreadsheet column letter) of `target`.
    async fn query_column(&self, target: &str, column: &str) -> Result<Vec<String>, StoreError>;

    async fn append_rows(&self, target: &str, rows: Vec<Vec<String>>) -> Result<(), StoreError>;
}

#[derive(Debug, Clone)]
pub struct SheetsClientConfig {
    pub api_base: String,
    pub spreadsheet_id: String,
    pub access_token: String,
    pub timeout: Duration,
}

impl SheetsClientConfig {
    pub const DEFAULT_API_BASE: &'static str = "https://sheets.googleapis.com";
}

#[derive(Debug, Deserialize)]
struct ValueRange {
    #[serde(default)]
    values: Vec<Vec<String>>,
}

/// Spreadsheet-backed store speaking the Sheets v4 `values` endpoints.
#[derive(Debug)]
pub struct SheetsRemoteStore {
    client: reqwest::Client,
    config: SheetsClientConfig,
}

impl SheetsRemoteStore {
    pub fn new(config: SheetsClientConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .gzip(true)
            .brotli(true)
            .timeout(config.timeout)
            .build()
            .context("building sheets client")?;
        Ok(Self { client, config })
    }

    fn values_url(&self, range: &str) -> Result<Url, StoreError> {
        let mut url = Url::parse(&self.config.api_base)
            .map_err(|_| StoreError::Target(self.config.api_base.clone()))?;
        url.path_segments_mut()
            .map_err(|_| StoreError::Target(self.config.api_base.clone()))?
            .pop_if_empty()
            .extend(["v4", "spreadsheets", self.config.spreadsheet_id.as_str(), "values", range]);
        Ok(url)
    }

    fn check_target(target: &str) -> Result<(), StoreError> {
        if target.trim().is_empty() || target.contains('!') {
            return Err(StoreError::Target(target.to_string()));
        }
        Ok(())
    }

    /// A1 range on `target`, with the sheet name quoted so spaces and digits survive.
    fn sheet_range(target: &str, cells: &str) -> String {
        format!("'{}'!{cells}", target.replace('\'', "''"))
    }

    async fn ensure_success(resp: reqwest::Response) -> Result<reqwest::Response, StoreError> {
        let status = resp.status();
        if status.is_success() {
            Ok(resp)
        } else {
            Err(StoreError::HttpStatus {
                status: status.as_u16(),
                url: resp.url().to_string(),
            })
        }
    }
}

#[async_trait]
impl RemoteStore for SheetsRemoteStore {
    async fn query_column(&self, target: &str, column: &str) -> Result<Vec<String>, StoreError> {
        Self::check_target(target)?;
        debug!(sheet = target, column, "querying remote column");
        let url = self.values_url(&Self::sheet_range(target, &format!("{column}:{column}")))?;
        let resp = self
            .client
            .get(url)
            .bearer_auth(&self.config.access_token)
            .query(&[("majorDimension", "COLUMNS")])
            .send()
            .await?;
        let body: ValueRange = Self::ensure_success(resp).await?.json().await?;
        Ok(body.values.into_iter().flatten().collect())
    }

    async fn append_rows(&self, target: &str, rows: Vec<Vec<String>>) -> Result<(), StoreError> {
        Self::check_target(target)?;
        debug!(sheet = target, rows = rows.len(), "appending remote rows");
        let url = self.values_url(&format!("{}:append", Self::sheet_range(target, "A1")))?;
        let resp = self
            .client
            .post(url)
            .bearer_auth(&self.config.access_token)
            .query(&[
                ("valueInputOption", "RAW"),
                ("insertDataOption", "INSERT_ROWS"),
            ])
            .json(&serde_json::json!({ "majorDimension": "ROWS", "values": rows }))
            .send()
            .await?;
        Self::ensure_success(resp).await?;
        Ok(())
    }
}

/// Zero-based index of a spreadsheet column letter ("A" -> 0, "AA" -> 26).
pub fn column_index(column: &str) -> Option<usize> {
    if column.is_empty() {
        return None;
    }
    column.chars().try_fold(0usize, |acc, c| {
        let c = c.to_ascii_uppercase();
        c.is_ascii_uppercase()
            .then(|| acc * 26 + (c as usize - 'A' as usize + 1))
    })
    .map(|n| n - 1)
}

/// Process-local store for dry runs and tests.
#[derive(Debug, Default)]
pub struct MemoryRemoteStore {
    sheets: Mutex<HashMap<String, Vec<Vec<String>>>>,
}

impl MemoryRemoteStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn rows(&self, target: &str) -> Vec<Vec<String>> {
        self.sheets
            .lock()
            .await
            .get(target)
            .cloned()
            .unwrap_or_default()
    }
}

#[async_trait]
impl RemoteStore for MemoryRemoteStore {
    async fn query_column(&self, target: &str, column: &str) -> Result<Vec<String>, StoreError> {
        let idx = column_index(column).ok_or_else(|| StoreError::Target(column.to_string()))?;
        Ok(self
            .sheets
            .lock()
            .await
            .get(target)
            .map(|rows| rows.iter().filter_map(|row| row.get(idx).cloned()).collect())
            .unwrap_or_default())
    }

    async fn append_rows(&self, target: &str, rows: Vec<Vec<String>>) -> Result<(), StoreError> {
        self.sheets
            .lock()
            .await
            .entry(target.to_string())
            .or_default()
            .extend(rows);
        Ok(())
    }
}
