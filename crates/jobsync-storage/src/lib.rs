//! Local JSON cache + remote store capability for job listing sync.

pub mod remote;

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use anyhow::Context;
use chrono::SecondsFormat;
use jobsync_core::JobRecord;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{info, warn};
use uuid::Uuid;

pub use remote::{
    MemoryRemoteStore, RemoteStore, SheetsClientConfig, SheetsRemoteStore, StoreError,
};

pub const CRATE_NAME: &str = "jobsync-storage";

/// Column order of every appended row. Seeding reads [`IDENTITY_COLUMN`] back.
pub const ROW_COLUMNS: [&str; 9] = [
    "Title",
    "Company",
    "Location",
    "Experience",
    "Posted",
    "Detail URL",
    "Category",
    "Source",
    "Scraped At",
];

/// Spreadsheet column holding `detailUrl` (sixth column).
pub const IDENTITY_COLUMN: &str = "F";
pub const IDENTITY_HEADER: &str = ROW_COLUMNS[5];

pub fn record_to_row(record: &JobRecord) -> Vec<String> {
    vec![
        record.title.clone(),
        record.company.clone(),
        record.location.clone(),
        record.experience.clone(),
        record.posted_date.clone(),
        record.detail_url.clone(),
        record.category.clone(),
        record.source_platform.clone(),
        record.scraped_at.to_rfc3339_opts(SecondsFormat::Secs, true),
    ]
}

/// Keep the first record seen for every `detail_url`, preserving order.
pub fn dedupe_by_detail_url(records: impl IntoIterator<Item = JobRecord>) -> Vec<JobRecord> {
    let mut seen = HashSet::new();
    records
        .into_iter()
        .filter(|record| seen.insert(record.detail_url.clone()))
        .collect()
}

/// Durable fallback list of every accepted record, stored as a JSON array.
#[derive(Debug, Clone)]
pub struct LocalCache {
    path: PathBuf,
}

impl LocalCache {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Missing or unreadable caches are treated as empty.
    pub async fn load(&self) -> Vec<JobRecord> {
        let text = match fs::read_to_string(&self.path).await {
            Ok(text) => text,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                info!(path = %self.path.display(), "no local cache yet");
                return Vec::new();
            }
            Err(err) => {
                warn!(path = %self.path.display(), error = %err, "local cache unreadable; starting empty");
                return Vec::new();
            }
        };
        match serde_json::from_str::<Vec<JobRecord>>(&text) {
            Ok(records) => records,
            Err(err) => {
                warn!(path = %self.path.display(), error = %err, "local cache corrupt; starting empty");
                Vec::new()
            }
        }
    }

    /// Overwrite the cache with the de-duplicated list via temp-file + rename.
    pub async fn persist(&self, records: Vec<JobRecord>) -> anyhow::Result<usize> {
        let records = dedupe_by_detail_url(records);
        let bytes = serde_json::to_vec_pretty(&records).context("serializing local cache")?;

        let parent = self
            .path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        fs::create_dir_all(parent)
            .await
            .with_context(|| format!("creating cache directory {}", parent.display()))?;

        let temp_path = parent.join(format!(".{}.{}.tmp", Uuid::new_v4(), bytes.len()));
        let mut file = fs::OpenOptions::new()
            .create_new(true)
            .write(true)
            .open(&temp_path)
            .await
            .with_context(|| format!("opening temp cache file {}", temp_path.display()))?;
        file.write_all(&bytes)
            .await
            .with_context(|| format!("writing temp cache file {}", temp_path.display()))?;
        file.flush()
            .await
            .with_context(|| format!("flushing temp cache file {}", temp_path.display()))?;
        drop(file);

        if let Err(err) = fs::rename(&temp_path, &self.path).await {
            let _ = fs::remove_file(&temp_path).await;
            return Err(err).with_context(|| {
                format!(
                    "renaming temp cache {} -> {}",
                    temp_path.display(),
                    self.path.display()
                )
            });
        }

        Ok(records.len())
    }
}
