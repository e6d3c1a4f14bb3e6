//! Remote append + local cache coordination. Remote failures never abort a run.

use std::sync::Arc;

use anyhow::Result;
use jobsync_core::{CategoryConfig, JobRecord};
use jobsync_storage::{record_to_row, LocalCache, RemoteStore, IDENTITY_COLUMN, IDENTITY_HEADER};
use serde::Serialize;
use tracing::{info, warn};

/// What happened to one category's accepted batch on the remote side.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum FlushOutcome {
    Skipped,
    Written { rows: usize },
    Failed { error: String },
}

pub struct PersistenceSync {
    remote: Option<Arc<dyn RemoteStore>>,
    cache: LocalCache,
}

impl PersistenceSync {
    pub fn new(remote: Option<Arc<dyn RemoteStore>>, cache: LocalCache) -> Self {
        Self { remote, cache }
    }

    pub fn cache(&self) -> &LocalCache {
        &self.cache
    }

    pub fn has_remote(&self) -> bool {
        self.remote.is_some()
    }

    /// Identity values already stored remotely for every configured category target.
    pub async fn remote_detail_urls(&self, categories: &[CategoryConfig]) -> Vec<String> {
        let Some(remote) = &self.remote else {
            return Vec::new();
        };
        let mut urls = Vec::new();
        for category in categories {
            let Some(target) = category.remote_target.as_deref() else {
                continue;
            };
            match remote.query_column(target, IDENTITY_COLUMN).await {
                Ok(values) => {
                    let before = urls.len();
                    urls.extend(
                        values
                            .into_iter()
                            .filter(|v| !v.trim().is_empty() && v.trim() != IDENTITY_HEADER),
                    );
                    info!(category = %category.tag, sheet = target, urls = urls.len() - before, "seeded from remote store");
                }
                Err(err) => {
                    warn!(category = %category.tag, sheet = target, error = %err, "remote seed failed; relying on local cache");
                }
            }
        }
        urls
    }

    /// Append one category batch. Empty batches and unconfigured targets are no-ops.
    pub async fn flush(&self, batch: &[JobRecord], target: Option<&str>) -> FlushOutcome {
        let (Some(remote), Some(target)) = (&self.remote, target) else {
            return FlushOutcome::Skipped;
        };
        if batch.is_empty() {
            return FlushOutcome::Skipped;
        }
        let rows = batch.iter().map(record_to_row).collect::<Vec<_>>();
        let count = rows.len();
        match remote.append_rows(target, rows).await {
            Ok(()) => {
                info!(sheet = target, rows = count, "appended rows to remote store");
                FlushOutcome::Written { rows: count }
            }
            Err(err) => {
                warn!(sheet = target, rows = count, error = %err, "remote append failed; rows kept in local cache only");
                FlushOutcome::Failed {
                    error: err.to_string(),
                }
            }
        }
    }

    pub async fn load_local_cache(&self) -> Vec<JobRecord> {
        self.cache.load().await
    }

    pub async fn persist_local_cache(&self, records: Vec<JobRecord>) -> Result<usize> {
        let written = self.cache.persist(records).await?;
        info!(path = %self.cache.path().display(), records = written, "local cache written");
        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::Utc;
    use jobsync_core::{CategoryPolicy, ExperienceRule, LocationRule, TitleRule};
    use jobsync_storage::{MemoryRemoteStore, StoreError};
    use tempfile::tempdir;

    struct DownStore;

    #[async_trait]
    impl RemoteStore for DownStore {
        async fn query_column(&self, _: &str, _: &str) -> Result<Vec<String>, StoreError> {
            Err(StoreError::HttpStatus { status: 503, url: "mock://sheets".into() })
        }

        async fn append_rows(&self, _: &str, _: Vec<Vec<String>>) -> Result<(), StoreError> {
            Err(StoreError::HttpStatus { status: 503, url: "mock://sheets".into() })
        }
    }

    fn category(tag: &str, target: Option<&str>) -> CategoryConfig {
        CategoryConfig {
            tag: tag.into(),
            remote_target: target.map(String::from),
            roles: vec!["Designer".into()],
            facet_filter: None,
            policy: CategoryPolicy {
                title: TitleRule::default(),
                location: LocationRule::default(),
                experience: ExperienceRule::default(),
            },
        }
    }

    fn record(url: &str) -> JobRecord {
        JobRecord {
            title: "UI Designer".into(),
            company: "Acme".into(),
            location: "Chennai".into(),
            experience: "2-3 yrs".into(),
            posted_date: "today".into(),
            detail_url: url.into(),
            category: "design".into(),
            scraped_at: Utc::now(),
            source_platform: "naukri".into(),
        }
    }

    fn sync_with(remote: Option<Arc<dyn RemoteStore>>) -> (PersistenceSync, tempfile::TempDir) {
        let dir = tempdir().expect("tempdir");
        let cache = LocalCache::new(dir.path().join("cache.json"));
        (PersistenceSync::new(remote, cache), dir)
    }

    #[tokio::test]
    async fn seeding_skips_header_and_untargeted_categories() {
        let store = Arc::new(MemoryRemoteStore::new());
        let mut header = vec![String::new(); 9];
        header[5] = IDENTITY_HEADER.into();
        let mut row = vec![String::new(); 9];
        row[5] = "https://x.io/j/1".into();
        store.append_rows("Design", vec![header, row]).await.unwrap();

        let (sync, _dir) = sync_with(Some(store));
        let urls = sync
            .remote_detail_urls(&[category("design", Some("Design")), category("misc", None)])
            .await;
        assert_eq!(urls, vec!["https://x.io/j/1"]);
    }

    #[tokio::test]
    async fn flush_is_noop_without_rows_or_target() {
        let store = Arc::new(MemoryRemoteStore::new());
        let (sync, _dir) = sync_with(Some(store.clone()));
        assert_eq!(sync.flush(&[], Some("Design")).await, FlushOutcome::Skipped);
        assert_eq!(sync.flush(&[record("https://x.io/j/1")], None).await, FlushOutcome::Skipped);
        assert!(store.rows("Design").await.is_empty());

        let (no_remote, _dir) = sync_with(None);
        assert!(!no_remote.has_remote());
        assert_eq!(
            no_remote.flush(&[record("https://x.io/j/1")], Some("Design")).await,
            FlushOutcome::Skipped
        );
    }

    #[tokio::test]
    async fn flush_appends_rows_in_column_order() {
        let store = Arc::new(MemoryRemoteStore::new());
        let (sync, _dir) = sync_with(Some(store.clone()));
        let outcome = sync
            .flush(&[record("https://x.io/j/1"), record("https://x.io/j/2")], Some("Design"))
            .await;
        assert_eq!(outcome, FlushOutcome::Written { rows: 2 });
        let rows = store.rows("Design").await;
        assert_eq!(rows[1][5], "https://x.io/j/2");
        assert_eq!(rows[0][6], "design");
    }

    #[tokio::test]
    async fn remote_failures_are_reported_not_raised() {
        let (sync, _dir) = sync_with(Some(Arc::new(DownStore)));
        assert!(sync.remote_detail_urls(&[category("design", Some("Design"))]).await.is_empty());
        let outcome = sync.flush(&[record("https://x.io/j/1")], Some("Design")).await;
        assert!(matches!(outcome, FlushOutcome::Failed { .. }));
    }
}
