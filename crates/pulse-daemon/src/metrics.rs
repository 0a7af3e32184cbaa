//! Metrics endpoint: a JSON snapshot of pipeline health.
//!
//! Served over HTTP so the status page and external probes can read
//! last-success times per job, upstream request counters, websocket
//! connection state, and signal counts for the trailing hour.

use std::sync::Arc;

use axum::{extract::State, routing::get, Json, Router};
use chrono::{Duration, Utc};
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{info, warn};

use pulse_market::{BookCache, HttpPool, PoolStatsSnapshot, WsStats};

use crate::storage::Store;
use crate::universe::Universe;

/// Shared handles the metrics snapshot is assembled from.
#[derive(Clone)]
pub struct MetricsState {
    pub store: Arc<Store>,
    pub pool: Arc<HttpPool>,
    pub ws_stats: Option<Arc<WsStats>>,
    pub cache: Arc<BookCache>,
    pub universe: Arc<Universe>,
}

#[derive(Debug, Serialize)]
struct JobStatus {
    job_name: String,
    last_started_at: Option<String>,
    last_success_at: Option<String>,
    last_error_at: Option<String>,
    last_error: Option<String>,
    last_duration_ms: Option<f64>,
}

#[derive(Debug, Serialize)]
struct WebsocketStatus {
    state: &'static str,
    subscriptions: usize,
}

#[derive(Debug, Serialize)]
struct MetricsSnapshot {
    jobs: Vec<JobStatus>,
    http: PoolStatsSnapshot,
    websocket: WebsocketStatus,
    signals_last_hour: std::collections::HashMap<String, i64>,
    alerts: std::collections::HashMap<String, i64>,
    tracked_markets: usize,
    cached_books: usize,
}

async fn metrics_handler(State(state): State<MetricsState>) -> Json<serde_json::Value> {
    let jobs = match state.store.job_runs() {
        Ok(rows) => rows
            .into_iter()
            .map(|row| JobStatus {
                job_name: row.job_name,
                last_started_at: row.last_started_at.map(|t| t.to_rfc3339()),
                last_success_at: row.last_success_at.map(|t| t.to_rfc3339()),
                last_error_at: row.last_error_at.map(|t| t.to_rfc3339()),
                last_error: row.last_error,
                last_duration_ms: row.last_duration_ms,
            })
            .collect(),
        Err(e) => {
            warn!(component = "metrics", error = %e, "failed to read job runs");
            Vec::new()
        }
    };

    let signals_last_hour = state
        .store
        .signal_counts_since(Utc::now() - Duration::hours(1))
        .unwrap_or_default();
    let alerts = state.store.alert_status_counts().unwrap_or_default();

    let websocket = match &state.ws_stats {
        Some(stats) => WebsocketStatus {
            state: stats.state().as_str(),
            subscriptions: stats.subscribed_count(),
        },
        None => WebsocketStatus {
            state: "disabled",
            subscriptions: 0,
        },
    };

    let snapshot = MetricsSnapshot {
        jobs,
        http: state.pool.stats().snapshot(),
        websocket,
        signals_last_hour,
        alerts,
        tracked_markets: state.universe.len(),
        cached_books: state.cache.len(),
    };

    Json(serde_json::to_value(&snapshot).unwrap_or(serde_json::Value::Null))
}

/// Serve `/metrics` until shutdown.
pub async fn serve(
    listen_addr: String,
    state: MetricsState,
    mut shutdown: broadcast::Receiver<()>,
) -> anyhow::Result<()> {
    let app = Router::new()
        .route("/metrics", get(metrics_handler))
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(&listen_addr).await?;
    info!(component = "metrics", addr = %listen_addr, "metrics endpoint listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown.recv().await;
        })
        .await?;
    Ok(())
}
