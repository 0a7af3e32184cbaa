//! Polypulse daemon entrypoint.
//!
//! Usage:
//!   pulse-daemon [OPTIONS]
//!
//! Options:
//!   -c, --config <FILE>     TOML config file (optional)
//!   --database-url <URL>    SQLite path (overrides config)
//!   --log-json              Emit JSON-formatted logs

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::sync::broadcast;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use pulse_daemon::alerts::AlertDispatcher;
use pulse_daemon::config::Settings;
use pulse_daemon::jobs::{build_jobs, JobContext};
use pulse_daemon::metrics::{self, MetricsState};
use pulse_daemon::scheduler::Scheduler;
use pulse_daemon::storage::Store;
use pulse_daemon::universe::Universe;
use pulse_market::{
    BookCache, ClobClient, DataApiClient, GammaClient, HttpPool, HttpPoolConfig, MarketStream,
    MarketStreamConfig,
};

/// CLI arguments.
#[derive(Parser, Debug)]
#[command(name = "pulse-daemon")]
#[command(about = "Prediction-market ingestion and signals pipeline")]
#[command(version)]
struct Args {
    /// TOML config file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// SQLite database path (overrides config)
    #[arg(long)]
    database_url: Option<String>,

    /// Emit JSON-formatted logs
    #[arg(long)]
    log_json: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run() -> Result<()> {
    dotenvy::dotenv().ok();
    let args = Args::parse();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,pulse_daemon=info,pulse_market=info"));
    if args.log_json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    info!(component = "main", "starting polypulse daemon");

    // First pass without DB overrides to learn the database location, then
    // the full layering once app_config is readable.
    let bootstrap = Settings::load(args.config.as_deref(), &Default::default())
        .context("invalid configuration")?;
    let database_url = args
        .database_url
        .clone()
        .unwrap_or_else(|| bootstrap.database_url.clone());

    let store = Arc::new(Store::open(&database_url).context("failed to open database")?);
    let db_overrides = store.app_config().context("failed to read app_config")?;
    let mut settings = Settings::load(args.config.as_deref(), &db_overrides)
        .context("invalid configuration")?;
    if let Some(url) = args.database_url {
        settings.database_url = url;
    }
    let settings = Arc::new(settings);

    let pool = HttpPool::new(HttpPoolConfig {
        max_concurrency: settings.http_max_concurrency,
        request_timeout: Duration::from_secs_f64(settings.http_timeout_seconds),
        ..Default::default()
    })
    .context("failed to build HTTP pool")?;

    let gamma = Arc::new(GammaClient::new(Arc::clone(&pool), settings.gamma_base_url.clone()));
    let data_api = Arc::new(DataApiClient::new(
        Arc::clone(&pool),
        settings.data_api_base_url.clone(),
    ));
    let clob = Arc::new(ClobClient::new(Arc::clone(&pool), settings.clob_base_url.clone()));

    let cache = Arc::new(BookCache::new());
    let universe = Arc::new(Universe::new());
    let dispatcher = Arc::new(AlertDispatcher::new(Arc::clone(&settings)));

    if settings.alerts_enabled && dispatcher.channel_count() == 0 {
        warn!(component = "main", "alerts enabled but no usable channel configured");
    }

    let (shutdown_tx, _) = broadcast::channel::<()>(1);

    // Long-lived websocket consumer, separate from the tick scheduler.
    let mut ws_stats = None;
    let mut ws_handle = None;
    if settings.clob_ws_enabled {
        let stream = MarketStream::new(
            MarketStreamConfig {
                url: settings.clob_ws_url.clone(),
                fallback_urls: settings.clob_ws_fallback_urls.clone(),
                max_assets: settings.clob_ws_max_assets,
                ping_interval: Duration::from_secs(settings.clob_ws_ping_seconds),
                heal_interval: Duration::from_secs(settings.orderbook_snapshot_interval_seconds),
                ..Default::default()
            },
            Arc::clone(&cache),
            Arc::clone(&clob),
            universe.token_watch(),
        );
        ws_stats = Some(stream.stats());
        let rx = shutdown_tx.subscribe();
        ws_handle = Some(tokio::spawn(async move {
            if let Err(e) = stream.run(rx).await {
                warn!(component = "clob_ws", error = %e, "websocket consumer exited with error");
            }
        }));
    }

    // Metrics endpoint.
    let mut metrics_handle = None;
    if settings.metrics_enabled {
        let state = MetricsState {
            store: Arc::clone(&store),
            pool: Arc::clone(&pool),
            ws_stats: ws_stats.clone(),
            cache: Arc::clone(&cache),
            universe: Arc::clone(&universe),
        };
        let addr = settings.metrics_listen_addr.clone();
        let rx = shutdown_tx.subscribe();
        metrics_handle = Some(tokio::spawn(async move {
            if let Err(e) = metrics::serve(addr, state, rx).await {
                warn!(component = "metrics", error = %e, "metrics endpoint exited with error");
            }
        }));
    }

    // Scheduler with the full job table.
    let ctx = Arc::new(JobContext {
        store: Arc::clone(&store),
        settings: Arc::clone(&settings),
        gamma,
        data_api,
        clob,
        cache,
        universe,
        dispatcher,
    });
    let mut scheduler = Scheduler::new(Arc::clone(&store));
    for job in build_jobs(&ctx) {
        scheduler.add_job(job);
    }
    info!(
        component = "main",
        jobs = scheduler.job_count(),
        "scheduler configured"
    );

    let scheduler_handle = tokio::spawn(scheduler.run(shutdown_tx.clone()));

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    info!(component = "main", "shutdown signal received, draining");
    let _ = shutdown_tx.send(());

    let _ = scheduler_handle.await;
    if let Some(handle) = ws_handle {
        let _ = handle.await;
    }
    if let Some(handle) = metrics_handle {
        let _ = handle.await;
    }

    info!(component = "main", "shutdown complete");
    Ok(())
}
