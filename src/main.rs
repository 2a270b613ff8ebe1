use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use eventhou_server::background_jobs::jobs::{
    DecayPopularityJob, IngestEventsJob, NormalizePopularityJob,
};
use eventhou_server::background_jobs::{JobContext, JobScheduler};
use eventhou_server::config::{AppConfig, CliConfig, FileConfig};
use eventhou_server::event_store::{EventStore, Location, SqliteEventStore};
use eventhou_server::ingestion::BandsintownClient;
use eventhou_server::server_store::SqliteServerStore;
use tokio_util::sync::CancellationToken;

fn parse_path(s: &str) -> Result<PathBuf> {
    let path_buf = PathBuf::from(s);
    let original_path = match path_buf.canonicalize() {
        Ok(path) => path,
        Err(msg) => {
            if msg.kind() == std::io::ErrorKind::NotFound {
                path_buf
            } else {
                return Err(msg).with_context(|| format!("Error resolving path: {}", s));
            }
        }
    };
    if original_path.is_absolute() {
        return Ok(original_path);
    }
    let cwd = std::env::current_dir()?;
    Ok(cwd.join(original_path))
}

#[derive(Parser, Debug)]
struct CliArgs {
    /// Directory holding the SQLite database files.
    #[clap(long, value_parser = parse_path)]
    pub db_dir: Option<PathBuf>,

    /// Path to a TOML config file. Values in the file override CLI arguments.
    #[clap(long, value_parser = parse_path)]
    pub config: Option<PathBuf>,
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
        .try_init()
        .unwrap();

    let file_config = match &cli_args.config {
        Some(path) => Some(FileConfig::load(path)?),
        None => None,
    };
    let cli_config = CliConfig {
        db_dir: cli_args.db_dir,
    };
    let config = AppConfig::resolve(&cli_config, file_config)?;

    info!("Opening event database at {:?}...", config.events_db_path());
    let event_store: Arc<dyn EventStore> = Arc::new(SqliteEventStore::new(config.events_db_path())?);

    info!("Opening server database at {:?}...", config.server_db_path());
    let server_store = Arc::new(SqliteServerStore::new(config.server_db_path())?);

    seed_default_location(event_store.as_ref())?;

    let event_source = Arc::new(BandsintownClient::new()?);

    let shutdown_token = CancellationToken::new();
    let ctrl_c_token = shutdown_token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received Ctrl+C, shutting down");
            ctrl_c_token.cancel();
        }
    });

    let context = JobContext::new(
        shutdown_token.clone(),
        event_store,
        server_store,
        event_source,
        config.job_settings(),
    );
    let mut scheduler = JobScheduler::new(context, shutdown_token);
    scheduler.register_job(Arc::new(IngestEventsJob::new(
        config.jobs.ingest_interval_hours,
    )));
    scheduler.register_job(Arc::new(NormalizePopularityJob::new(
        config.jobs.normalize_interval_hours,
    )));
    scheduler.register_job(Arc::new(DecayPopularityJob::new(
        config.jobs.decay_interval_hours,
    )));

    scheduler.run().await
}

/// Make sure a fresh database has at least one location to ingest.
fn seed_default_location(store: &dyn EventStore) -> Result<()> {
    if store.list_locations()?.is_empty() {
        info!("No locations configured, seeding default location Munich");
        store.put_location(&Location {
            id: "Munich".to_string(),
            name: "Munich".to_string(),
            latitude: 48.15,
            longitude: 11.5833333,
            online_events: true,
            daily_limit: 25,
            enabled: true,
        })?;
    }
    Ok(())
}
