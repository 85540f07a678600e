use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, level_filters::LevelFilter};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use bpmcrawl::config::{self, AppConfig};
use bpmcrawl::model::JobKind;
use bpmcrawl::seed::SeedFile;
use bpmcrawl::services::{ServiceRegistry, UnavailableAnalyzer};
use bpmcrawl::store::{JobStore, SqliteCrawlStore};
use bpmcrawl::{JobScheduler, SystemClock, Worker};

fn parse_path(s: &str) -> Result<PathBuf, String> {
    let path_buf = PathBuf::from(s);
    let original_path = match path_buf.canonicalize() {
        Ok(path) => path,
        Err(msg) => {
            if msg.kind() == std::io::ErrorKind::NotFound {
                path_buf
            } else {
                return Err(format!("Error resolving path '{}': {}", s, msg));
            }
        }
    };
    if original_path.is_absolute() {
        return Ok(original_path);
    }
    let cwd = std::env::current_dir().map_err(|e| format!("Failed to get current dir: {}", e))?;
    Ok(cwd.join(original_path))
}

#[derive(Parser, Debug)]
#[command(version = concat!(env!("CARGO_PKG_VERSION"), " (", env!("GIT_HASH"), ")"))]
struct CliArgs {
    /// Path to TOML configuration file. Values in the file override CLI arguments.
    #[clap(long, global = true, value_parser = parse_path)]
    pub config: Option<PathBuf>,

    /// Path to the SQLite crawl database file. Can also be specified in config file.
    #[clap(long, global = true, value_parser = parse_path)]
    pub db_path: Option<PathBuf>,

    /// Identity of this worker. A random UUID is generated if omitted.
    #[clap(long, global = true)]
    pub worker_id: Option<String>,

    /// Seconds to sleep when no job is runnable.
    #[clap(long, global = true, default_value_t = 5)]
    pub poll_interval_secs: u64,

    /// Seconds between heartbeats of a running job.
    #[clap(long, global = true, default_value_t = 10)]
    pub heartbeat_interval_secs: u64,

    /// Seconds without heartbeat after which a lease is considered abandoned.
    #[clap(long, global = true, default_value_t = 60)]
    pub lease_timeout_secs: u64,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the worker loop until Ctrl+C (default).
    Run,
    /// Upsert services, users, playlists and targets from a TOML seed file.
    Seed {
        #[clap(value_parser = parse_path)]
        file: PathBuf,
    },
    /// List the most recent jobs and per-status counts.
    Jobs {
        /// Only list jobs of this kind (scan_playlist, calc_bpm, pick_tracks).
        #[clap(long)]
        kind: Option<JobKind>,

        #[clap(long, default_value_t = 20)]
        limit: usize,
    },
    /// Reclaim abandoned leases and delete expired finished jobs once.
    Purge,
}

/// Convert CLI args to CliConfig for config resolution
impl From<&CliArgs> for config::CliConfig {
    fn from(args: &CliArgs) -> Self {
        config::CliConfig {
            db_path: args.db_path.clone(),
            worker_id: args.worker_id.clone(),
            poll_interval_secs: args.poll_interval_secs,
            heartbeat_interval_secs: args.heartbeat_interval_secs,
            lease_timeout_secs: args.lease_timeout_secs,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli_args = CliArgs::parse();

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .with_env_var("LOG_LEVEL")
                .from_env_lossy(),
        )
        .try_init()?;

    // Load TOML config if provided
    let file_config = match &cli_args.config {
        Some(path) => {
            info!("Loading configuration from {:?}", path);
            Some(config::FileConfig::load(path)?)
        }
        None => None,
    };

    // Resolve final configuration (TOML overrides CLI)
    let cli_config: config::CliConfig = (&cli_args).into();
    let app_config = AppConfig::resolve(&cli_config, file_config)?;

    if !app_config.db_path.exists() {
        info!("Creating new crawl database at {:?}", app_config.db_path);
    }
    let store = Arc::new(SqliteCrawlStore::new(&app_config.db_path)?);

    match cli_args.command.unwrap_or(Command::Run) {
        Command::Run => run_worker(store, &app_config).await,
        Command::Seed { file } => {
            let seed = SeedFile::load(&file)?;
            seed.apply(store.as_ref())?;
            Ok(())
        }
        Command::Jobs { kind, limit } => list_jobs(store.as_ref(), kind, limit),
        Command::Purge => {
            let scheduler = JobScheduler::new(store, Arc::new(SystemClock), &app_config.worker);
            let reclaimed = scheduler.reap()?;
            let purged = scheduler.purge()?;
            println!("Reclaimed {} leases, purged {} finished jobs", reclaimed, purged);
            Ok(())
        }
    }
}

async fn run_worker(store: Arc<SqliteCrawlStore>, app_config: &AppConfig) -> Result<()> {
    info!(
        "bpmcrawl {} ({}) starting",
        env!("CARGO_PKG_VERSION"),
        env!("GIT_HASH")
    );
    info!("Configuration loaded:");
    info!("  db_path: {:?}", app_config.db_path);
    info!("  worker_id: {}", app_config.worker_id);
    info!(
        "  heartbeat: {}s, lease timeout: {}s",
        app_config.worker.heartbeat_interval_secs, app_config.worker.lease_timeout_secs
    );

    let shutdown_token = CancellationToken::new();
    let worker = Worker::new(
        store,
        Arc::new(SystemClock),
        ServiceRegistry::new(),
        Arc::new(UnavailableAnalyzer),
        app_config,
        shutdown_token.clone(),
    );

    let signal_token = shutdown_token.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Received Ctrl+C, initiating graceful shutdown");
                signal_token.cancel();
            }
            Err(e) => error!("Failed to listen for Ctrl+C: {}", e),
        }
    });

    worker.run().await;
    Ok(())
}

fn list_jobs(store: &dyn JobStore, kind: Option<JobKind>, limit: usize) -> Result<()> {
    let counts = store.count_by_status()?;
    let summary: Vec<String> = counts
        .iter()
        .map(|(status, count)| format!("{}={}", status, count))
        .collect();
    println!("Jobs by status: {}", summary.join(" "));

    for job in store.list_jobs(kind, limit)? {
        println!(
            "{}  {:<9}  attempts={}  {}{}",
            job.job_id,
            job.status,
            job.attempts,
            job.job_uri,
            job.last_error
                .as_deref()
                .map(|e| format!("  last_error={}", e))
                .unwrap_or_default()
        );
    }
    Ok(())
}
