use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use jobsync_adapters::{FixtureSessionFactory, HttpSessionFactory, SessionFactory};
use jobsync_pipeline::{
    build_scheduler, hourly_cron, PersistenceSync, PipelinePlan, RunSummary, SyncConfig, SyncPipeline,
};
use jobsync_storage::{LocalCache, MemoryRemoteStore, RemoteStore};
use tracing::{error, info, warn};

#[derive(Debug, Parser)]
#[command(name = "jobsync", version)]
#[command(about = "Aggregate job listings into per-category sheets")]
struct Cli {
    /// Category plan (YAML). Overrides JOBSYNC_CATEGORIES.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Local JSON cache. Overrides JOBSYNC_CACHE_PATH.
    #[arg(long, global = true)]
    cache: Option<PathBuf>,

    /// Serve pages from a fixture manifest instead of the network.
    #[arg(long, global = true)]
    fixtures: Option<PathBuf>,

    /// Append to an in-memory store instead of the configured spreadsheet.
    #[arg(long, global = true)]
    dry_run: bool,

    #[arg(long, value_enum, default_value = "text", global = true)]
    log_format: LogFormat,

    /// Verbosity level (-v, -vv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Clone, Debug, clap::ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run one sync and exit.
    Run {
        /// Print the run summary as JSON.
        #[arg(long)]
        json: bool,
    },
    /// Sync once an hour until Ctrl-C.
    Schedule {
        /// Minute past the hour. Overrides JOBSYNC_SCHEDULE_MINUTE.
        #[arg(long)]
        minute: Option<u32>,
        /// Also run immediately on startup.
        #[arg(long)]
        run_now: bool,
    },
    /// Print the resolved category plan.
    Categories,
}

fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = match cli.verbose {
        0 => "jobsync=info",
        1 => "jobsync=debug",
        _ => "jobsync=trace",
    };
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => fmt().with_env_filter(env_filter).with_target(false).init(),
        LogFormat::Json => fmt().json().with_env_filter(env_filter).init(),
    }
}

async fn build_pipeline(config: &SyncConfig, cli: &Cli) -> Result<SyncPipeline> {
    let plan = PipelinePlan::load(&config.categories_path).await?;

    let sessions: Box<dyn SessionFactory> = match &cli.fixtures {
        Some(manifest) => {
            let fixtures = FixtureSessionFactory::load_manifest(manifest)?;
            info!(pages = fixtures.len(), manifest = %manifest.display(), "using fixture pages");
            Box::new(fixtures)
        }
        None => Box::new(HttpSessionFactory::new(config.http_session())),
    };

    let remote: Option<Arc<dyn RemoteStore>> = if cli.dry_run {
        warn!("dry run: remote appends go to an in-memory store");
        Some(Arc::new(MemoryRemoteStore::new()))
    } else {
        config.remote_store()?
    };

    let persistence = PersistenceSync::new(remote, LocalCache::new(&config.cache_path));
    Ok(SyncPipeline::new(plan, sessions, persistence, config.adapter_runtime()))
}

fn print_summary(summary: &RunSummary) {
    println!(
        "sync complete: run_id={} accepted={} fetched={} rejected={} failed_searches={} flush_failures={} cache={}",
        summary.run_id,
        summary.accepted,
        summary.fetched,
        summary.rejections.total(),
        summary.failed_searches,
        summary.flush_failures(),
        summary.cache_records
    );
    for category in &summary.categories {
        println!("  {:<16} accepted={} remote={:?}", category.tag, category.accepted, category.remote);
    }
}

fn print_plan(plan: &PipelinePlan) {
    println!("search locations: {}", plan.search_locations.join(", "));
    println!("freshness window: {}h", plan.freshness.max_age_hours);
    for source in &plan.sources {
        println!("source {:<12} enabled={}", source.platform, source.enabled);
    }
    for category in &plan.categories {
        let policy = &category.policy;
        println!(
            "category {:<12} target={} roles=[{}] facet={} experience={}-{}",
            category.tag,
            category.remote_target.as_deref().unwrap_or("-"),
            category.roles.join(", "),
            category.facet_filter.as_deref().unwrap_or("-"),
            policy.experience.target_min,
            policy.experience.target_max,
        );
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli);

    let mut config = SyncConfig::from_env();
    if let Some(path) = &cli.config {
        config.categories_path = path.clone();
    }
    if let Some(path) = &cli.cache {
        config.cache_path = path.clone();
    }

    match cli.command.as_ref().unwrap_or(&Commands::Run { json: false }) {
        Commands::Run { json } => {
            let pipeline = build_pipeline(&config, &cli).await?;
            let summary = pipeline.run_once().await?;
            if *json {
                println!("{}", serde_json::to_string_pretty(&summary)?);
            } else {
                print_summary(&summary);
            }
        }
        Commands::Schedule { minute, run_now } => {
            let minute = minute.unwrap_or(config.schedule_minute);
            let pipeline = Arc::new(build_pipeline(&config, &cli).await?);
            if *run_now {
                match pipeline.run_once().await {
                    Ok(summary) => print_summary(&summary),
                    Err(err) => error!(error = %format!("{err:#}"), "startup sync failed"),
                }
            }

            let mut sched = build_scheduler(Arc::clone(&pipeline), minute).await?;
            sched.start().await.context("starting scheduler")?;
            info!(cron = %hourly_cron(minute), "scheduler running; Ctrl-C to stop");
            tokio::signal::ctrl_c().await.context("waiting for ctrl-c")?;
            info!("shutting down scheduler");
            sched.shutdown().await.context("stopping scheduler")?;
        }
        Commands::Categories => {
            let plan = PipelinePlan::load(&config.categories_path).await?;
            print_plan(&plan);
        }
    }

    Ok(())
}
