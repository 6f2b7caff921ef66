use anyhow::{anyhow, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, level_filters::LevelFilter, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use album_acquirer::acquisition::indexer::{HttpIndexerApi, IndexerClient};
use album_acquirer::acquisition::p2p::{HttpP2pGateway, P2pEngine};
use album_acquirer::acquisition::{
    AcquisitionOrchestrator, InMemoryCache, LoggingNotificationSink, MetadataLookup,
    MusicBrainzClient, ReputationTracker, SearchRateLimiter, SharedCache, SqliteJobStore,
};
use album_acquirer::background_jobs::jobs::{
    CachePruneJob, IndexerReconciliationJob, StaleJobReaperJob,
};
use album_acquirer::background_jobs::{JobContext, JobScheduler};
use album_acquirer::config;

fn parse_path(s: &str) -> Result<PathBuf, String> {
    let path_buf = PathBuf::from(s);
    let resolved = match path_buf.canonicalize() {
        Ok(path) => path,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => path_buf,
        Err(e) => return Err(format!("Error resolving path '{}': {}", s, e)),
    };
    if resolved.is_absolute() {
        return Ok(resolved);
    }
    let cwd = std::env::current_dir().map_err(|e| format!("Failed to get current dir: {}", e))?;
    Ok(cwd.join(resolved))
}

fn parse_dir(s: &str) -> Result<PathBuf, String> {
    let path = parse_path(s)?;
    if !path.exists() {
        return Err(format!("Directory does not exist: {}", s));
    }
    if !path.is_dir() {
        return Err(format!("Path is not a directory: {}", s));
    }
    Ok(path)
}

#[derive(Parser, Debug)]
struct CliArgs {
    /// Path to TOML configuration file. Values in the file override CLI arguments.
    #[clap(long, value_parser = parse_path)]
    pub config: Option<PathBuf>,

    /// Directory holding the job database.
    /// Can also be specified in config file.
    #[clap(long, value_parser = parse_dir)]
    pub db_dir: Option<PathBuf>,

    /// Base URL of the library indexer.
    #[clap(long)]
    pub indexer_url: Option<String>,

    /// API key for the library indexer.
    #[clap(long)]
    pub indexer_api_key: Option<String>,

    /// Base URL of the P2P network gateway.
    #[clap(long)]
    pub p2p_gateway_url: Option<String>,
}

impl From<&CliArgs> for config::CliConfig {
    fn from(args: &CliArgs) -> Self {
        config::CliConfig {
            db_dir: args.db_dir.clone(),
            indexer_url: args.indexer_url.clone(),
            indexer_api_key: args.indexer_api_key.clone(),
            p2p_gateway_url: args.p2p_gateway_url.clone(),
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
        .try_init()
        .map_err(|e| anyhow!("Failed to initialize logging: {}", e))?;

    let file_config = match &cli_args.config {
        Some(path) => {
            info!("Loading configuration from {:?}", path);
            Some(config::FileConfig::load(path)?)
        }
        None => None,
    };

    // TOML overrides CLI
    let cli_config: config::CliConfig = (&cli_args).into();
    let app_config = config::AppConfig::resolve(&cli_config, file_config)?;

    info!("Configuration loaded:");
    info!("  db_dir: {:?}", app_config.db_dir);
    info!(
        "  indexer: {}",
        app_config.indexer.base_url.as_deref().unwrap_or("(not configured)")
    );
    info!(
        "  p2p gateway: {}",
        app_config.p2p.gateway_url.as_deref().unwrap_or("(not configured)")
    );
    info!(
        "  search budget: {} per {}s",
        app_config.rate_limit.max_searches, app_config.rate_limit.window_secs
    );

    let store = Arc::new(SqliteJobStore::new(app_config.jobs_db_path())?);
    let cache: Arc<dyn SharedCache> = Arc::new(InMemoryCache::new());
    let shutdown_token = CancellationToken::new();
    let notifications = Arc::new(LoggingNotificationSink);

    let mut orchestrator = AcquisitionOrchestrator::new(
        store,
        cache.clone(),
        notifications.clone(),
        app_config.orchestrator.clone(),
        app_config.reaper.clone(),
    )
    .with_batch_notifier(notifications);

    let request_timeout = Duration::from_secs(app_config.indexer.request_timeout_secs);
    let metadata: Arc<dyn MetadataLookup> = Arc::new(match &app_config.indexer.metadata_base_url {
        Some(url) => MusicBrainzClient::with_base_url(url.clone(), request_timeout)?,
        None => MusicBrainzClient::new(request_timeout)?,
    });
    orchestrator = orchestrator.with_metadata(metadata.clone());

    match (&app_config.indexer.base_url, &app_config.indexer.api_key) {
        (Some(url), Some(api_key)) => {
            let api = Arc::new(HttpIndexerApi::new(url, api_key.clone(), request_timeout)?);
            let indexer = IndexerClient::new(
                api,
                metadata,
                app_config.indexer.clone(),
                shutdown_token.child_token(),
            );
            orchestrator = orchestrator.with_indexer(Arc::new(indexer));
            info!("Indexer provider enabled");
        }
        (Some(_), None) => warn!("Indexer URL set without an API key, indexer disabled"),
        _ => info!("Indexer provider disabled"),
    }

    if let Some(gateway_url) = &app_config.p2p.gateway_url {
        std::fs::create_dir_all(&app_config.p2p.download_dir)?;
        let network = Arc::new(HttpP2pGateway::new(gateway_url)?);
        let limiter = Arc::new(SearchRateLimiter::new(&app_config.rate_limit));
        let reputation = Arc::new(ReputationTracker::new(
            cache.clone(),
            app_config.reputation.clone(),
        ));
        let engine = P2pEngine::new(
            network,
            limiter,
            reputation,
            cache.clone(),
            app_config.p2p.clone(),
            shutdown_token.child_token(),
        );
        orchestrator = orchestrator.with_p2p(Arc::new(engine));
        info!("P2P provider enabled");
    } else {
        info!("P2P provider disabled");
    }

    let orchestrator = Arc::new(orchestrator);
    let job_context = JobContext::new(shutdown_token.child_token(), orchestrator, cache);
    let mut scheduler = JobScheduler::new(shutdown_token.clone(), job_context);
    scheduler.register_job(Arc::new(StaleJobReaperJob::new(
        app_config.reaper.interval_secs,
    )));
    scheduler.register_job(Arc::new(IndexerReconciliationJob::new(
        app_config.reaper.reconcile_interval_secs,
    )));
    scheduler.register_job(Arc::new(CachePruneJob::new(
        app_config.reaper.cache_prune_interval_secs,
    )));
    info!(
        "Job scheduler initialized with {} job(s)",
        scheduler.job_count()
    );

    let scheduler_handle = tokio::spawn(async move { scheduler.run().await });

    tokio::signal::ctrl_c().await?;
    info!("Received Ctrl+C, initiating graceful shutdown");
    shutdown_token.cancel();
    scheduler_handle.await?;

    Ok(())
}
