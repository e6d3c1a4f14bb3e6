//! Sync pipeline orchestration: one run sweeps every category across every
//! enabled source, screens and de-duplicates listings, then persists them.

pub mod config;
pub mod ledger;
pub mod persist;
pub mod schedule;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use jobsync_adapters::{adapter_for_source, AdapterRuntime, PageSession, SearchRequest, SessionFactory, SourceAdapter};
use jobsync_core::{normalize, screen, CategoryConfig, FreshnessWindow, JobRecord, RawRecord, Rejection};
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

pub use config::{PipelinePlan, SyncConfig};
pub use ledger::DedupLedger;
pub use persist::{FlushOutcome, PersistenceSync};
pub use schedule::{build_scheduler, hourly_cron};

pub const CRATE_NAME: &str = "jobsync-pipeline";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RejectionCounts {
    pub unidentifiable: usize,
    pub title: usize,
    pub location: usize,
    pub recency: usize,
    pub experience: usize,
    pub duplicate: usize,
}

impl RejectionCounts {
    fn record(&mut self, reason: Rejection) {
        match reason {
            Rejection::Title => self.title += 1,
            Rejection::Location => self.location += 1,
            Rejection::Recency => self.recency += 1,
            Rejection::Experience => self.experience += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.unidentifiable + self.title + self.location + self.recency + self.experience + self.duplicate
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CategoryOutcome {
    pub tag: String,
    pub accepted: usize,
    pub remote: FlushOutcome,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub seeded_urls: usize,
    pub searches: usize,
    pub failed_searches: usize,
    pub fetched: usize,
    pub accepted: usize,
    pub rejections: RejectionCounts,
    pub categories: Vec<CategoryOutcome>,
    pub cache_records: usize,
}

impl RunSummary {
    pub fn flush_failures(&self) -> usize {
        self.categories
            .iter()
            .filter(|c| matches!(c.remote, FlushOutcome::Failed { .. }))
            .count()
    }
}

/// Mutable state owned by exactly one run.
#[derive(Default)]
struct RunState {
    ledger: DedupLedger,
    accepted: Vec<JobRecord>,
    rejections: RejectionCounts,
    searches: usize,
    failed_searches: usize,
    fetched: usize,
}

impl RunState {
    /// Normalize, screen and de-duplicate one raw listing.
    fn consider(
        &mut self,
        raw: &RawRecord,
        category: &CategoryConfig,
        platform: &str,
        freshness: FreshnessWindow,
    ) -> Option<JobRecord> {
        let Some(candidate) = normalize(raw) else {
            self.rejections.unidentifiable += 1;
            return None;
        };
        if let Err(reason) = screen(&candidate, &category.policy, freshness) {
            debug!(url = %candidate.detail_url, ?reason, "listing rejected");
            self.rejections.record(reason);
            return None;
        }
        if !self.ledger.add(&candidate.detail_url) {
            self.rejections.duplicate += 1;
            return None;
        }
        let record = candidate.accept(&category.tag, platform, Utc::now());
        self.accepted.push(record.clone());
        Some(record)
    }
}

pub struct SyncPipeline {
    plan: PipelinePlan,
    adapters: Vec<Box<dyn SourceAdapter>>,
    sessions: Box<dyn SessionFactory>,
    persistence: PersistenceSync,
    run_gate: Mutex<()>,
}

impl SyncPipeline {
    pub fn new(
        plan: PipelinePlan,
        sessions: Box<dyn SessionFactory>,
        persistence: PersistenceSync,
        runtime: AdapterRuntime,
    ) -> Self {
        let adapters = plan
            .enabled_sources()
            .map(|source| adapter_for_source(source, runtime))
            .collect();
        Self {
            plan,
            adapters,
            sessions,
            persistence,
            run_gate: Mutex::new(()),
        }
    }

    pub fn plan(&self) -> &PipelinePlan {
        &self.plan
    }

    /// Run now, waiting for any in-flight run to finish first.
    pub async fn run_once(&self) -> Result<RunSummary> {
        let _guard = self.run_gate.lock().await;
        self.execute().await
    }

    /// Run now unless another run holds the gate, in which case `None`.
    pub async fn try_run(&self) -> Option<Result<RunSummary>> {
        let _guard = self.run_gate.try_lock().ok()?;
        Some(self.execute().await)
    }

    async fn execute(&self) -> Result<RunSummary> {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        async move {
            info!(
                categories = self.plan.categories.len(),
                sources = self.adapters.len(),
                "sync run started"
            );
            let cached = self.persistence.load_local_cache().await;
            let mut state = RunState::default();
            let from_cache = state.ledger.seed(cached.iter().map(|r| r.detail_url.as_str()));
            let remote_urls = self.persistence.remote_detail_urls(&self.plan.categories).await;
            let from_remote = state.ledger.seed(&remote_urls);
            info!(from_cache, from_remote, "dedup ledger seeded");

            let mut session = self.sessions.open().await.context("opening page session")?;
            let categories = self.sweep(session.as_mut(), &mut state).await;
            if let Err(err) = session.close().await {
                warn!(error = %err, "closing page session failed");
            }

            let accepted = state.accepted.len();
            let cache_records = self
                .persistence
                .persist_local_cache(cached.into_iter().chain(state.accepted).collect())
                .await
                .context("persisting local cache")?;

            let summary = RunSummary {
                run_id,
                started_at,
                finished_at: Utc::now(),
                seeded_urls: state.ledger.len() - accepted,
                searches: state.searches,
                failed_searches: state.failed_searches,
                fetched: state.fetched,
                accepted,
                rejections: state.rejections,
                categories,
                cache_records,
            };
            info!(
                accepted,
                fetched = summary.fetched,
                rejected = summary.rejections.total(),
                failed_searches = summary.failed_searches,
                flush_failures = summary.flush_failures(),
                "sync run finished"
            );
            Ok(summary)
        }
        .instrument(info_span!("sync_run", %run_id))
        .await
    }

    async fn sweep(&self, session: &mut dyn PageSession, state: &mut RunState) -> Vec<CategoryOutcome> {
        let mut outcomes = Vec::with_capacity(self.plan.categories.len());
        for category in &self.plan.categories {
            let mut batch = Vec::new();
            for adapter in &self.adapters {
                for location in &self.plan.search_locations {
                    for role in &category.roles {
                        let request = SearchRequest {
                            category,
                            location,
                            role,
                        };
                        state.searches += 1;
                        match adapter.search(&mut *session, &request).await {
                            Ok(raws) => {
                                debug!(
                                    category = %category.tag,
                                    platform = adapter.platform(),
                                    %location,
                                    %role,
                                    found = raws.len(),
                                    "search complete"
                                );
                                state.fetched += raws.len();
                                for raw in &raws {
                                    if let Some(record) =
                                        state.consider(raw, category, adapter.platform(), self.plan.freshness)
                                    {
                                        batch.push(record);
                                    }
                                }
                            }
                            Err(err) => {
                                state.failed_searches += 1;
                                warn!(
                                    category = %category.tag,
                                    platform = adapter.platform(),
                                    %location,
                                    %role,
                                    error = %err,
                                    "search failed; continuing with the next one"
                                );
                            }
                        }
                    }
                }
            }

            let remote = self
                .persistence
                .flush(&batch, category.remote_target.as_deref())
                .await;
            info!(category = %category.tag, accepted = batch.len(), ?remote, "category finished");
            outcomes.push(CategoryOutcome {
                tag: category.tag.clone(),
                accepted: batch.len(),
                remote,
            });
        }
        outcomes
    }
}
