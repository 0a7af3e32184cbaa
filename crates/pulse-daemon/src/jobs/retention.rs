//! Metric time-series retention: hourly downsampling and ageing.

use std::sync::Arc;

use chrono::Utc;
use tracing::info;

use super::JobContext;

pub async fn prune_metrics(ctx: Arc<JobContext>) -> anyhow::Result<usize> {
    let settings = &ctx.settings;
    let deleted = ctx.store.prune_metrics(
        Utc::now(),
        settings.metrics_raw_retention_days,
        settings.metrics_hourly_retention_days,
    )?;

    if deleted > 0 {
        info!(
            component = "prune_metrics",
            deleted, "raw metric rows downsampled to hourly"
        );
    }
    Ok(deleted)
}
