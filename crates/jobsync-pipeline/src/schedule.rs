use std::sync::Arc;

use anyhow::{Context, Result};
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info, warn};

use crate::SyncPipeline;

/// Six-field cron firing once an hour at `minute`.
pub fn hourly_cron(minute: u32) -> String {
    format!("0 {} * * * *", minute.min(59))
}

/// Register the hourly sync job. Triggers that land while a run is active are skipped.
pub async fn build_scheduler(pipeline: Arc<SyncPipeline>, minute: u32) -> Result<JobScheduler> {
    let cron = hourly_cron(minute);
    let sched = JobScheduler::new().await.context("creating scheduler")?;
    let job = Job::new_async(cron.as_str(), move |_uuid, _l| {
        let pipeline = Arc::clone(&pipeline);
        Box::pin(async move {
            match pipeline.try_run().await {
                None => warn!("previous sync run still active; skipping trigger"),
                Some(Ok(summary)) => info!(
                    run_id = %summary.run_id,
                    accepted = summary.accepted,
                    "scheduled sync finished"
                ),
                Some(Err(err)) => error!(error = %format!("{err:#}"), "scheduled sync failed; next trigger will retry"),
            }
        })
    })
    .with_context(|| format!("creating scheduler job for cron {cron}"))?;
    sched.add(job).await.context("adding scheduler job")?;
    Ok(sched)
}
