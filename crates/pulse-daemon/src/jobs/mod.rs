//! Concrete fetch and evaluation jobs driven by the scheduler.

pub mod books;
pub mod markets;
pub mod open_interest;
pub mod positions;
pub mod retention;
pub mod trades;
pub mod universe;

use std::sync::Arc;
use std::time::Duration;

use pulse_market::{BookCache, ClobClient, DataApiClient, GammaClient};

use crate::alerts::AlertDispatcher;
use crate::config::Settings;
use crate::scheduler::Job;
use crate::signals;
use crate::storage::Store;
use crate::universe::Universe;

/// Shared dependencies handed to every job.
pub struct JobContext {
    pub store: Arc<Store>,
    pub settings: Arc<Settings>,
    pub gamma: Arc<GammaClient>,
    pub data_api: Arc<DataApiClient>,
    pub clob: Arc<ClobClient>,
    pub cache: Arc<BookCache>,
    pub universe: Arc<Universe>,
    pub dispatcher: Arc<AlertDispatcher>,
}

macro_rules! job {
    ($name:literal, $interval:expr, $ctx:ident, $body:expr) => {{
        let ctx = Arc::clone(&$ctx);
        Job::new($name, $interval, move || -> crate::scheduler::JobFuture {
            let ctx = Arc::clone(&ctx);
            Box::pin(async move { $body(ctx).await })
        })
    }};
}

/// Build the full job table with intervals from the settings.
pub fn build_jobs(ctx: &Arc<JobContext>) -> Vec<Job> {
    let s = &ctx.settings;
    vec![
        job!(
            "sync_gamma_events",
            Duration::from_secs(s.sync_gamma_events_interval_seconds),
            ctx,
            markets::sync_gamma_events
        ),
        job!(
            "sync_tag_metadata",
            Duration::from_secs(s.sync_tags_interval_seconds),
            ctx,
            markets::sync_tag_metadata
        ),
        job!(
            "sync_universe",
            Duration::from_secs(s.sync_universe_interval_seconds),
            ctx,
            universe::sync_universe
        ),
        job!(
            "sync_open_interest",
            Duration::from_secs(s.sync_oi_interval_seconds),
            ctx,
            open_interest::sync_open_interest
        ),
        job!(
            "sync_large_trades",
            Duration::from_secs(s.sync_trades_interval_seconds),
            ctx,
            trades::sync_large_trades
        ),
        job!(
            "sync_orderbooks",
            Duration::from_secs(s.sync_orderbooks_interval_seconds),
            ctx,
            books::sync_orderbooks
        ),
        job!(
            "sync_positions",
            Duration::from_secs(s.sync_positions_interval_seconds),
            ctx,
            positions::sync_positions
        ),
        job!(
            "run_signal_engine_trades",
            Duration::from_secs(s.signal_engine_trades_interval_seconds),
            ctx,
            run_signal_engine_trades
        ),
        job!(
            "run_signal_engine_arb",
            Duration::from_secs(s.signal_engine_arb_interval_seconds),
            ctx,
            run_signal_engine_arb
        ),
        job!(
            "alert_dispatcher",
            Duration::from_secs(s.alert_dispatch_interval_seconds),
            ctx,
            dispatch_alerts
        ),
        job!(
            "prune_metrics",
            Duration::from_secs(s.retention_interval_seconds),
            ctx,
            retention::prune_metrics
        ),
    ]
}

async fn run_signal_engine_trades(ctx: Arc<JobContext>) -> anyhow::Result<usize> {
    signals::run_trade_engine(&ctx.store, &ctx.settings)
}

async fn run_signal_engine_arb(ctx: Arc<JobContext>) -> anyhow::Result<usize> {
    signals::run_arb_engine(&ctx.store, &ctx.settings, &ctx.cache, &ctx.universe)
}

async fn dispatch_alerts(ctx: Arc<JobContext>) -> anyhow::Result<usize> {
    ctx.dispatcher.dispatch(&ctx.store).await
}
