//! Open interest snapshots for tracked markets.

use std::sync::Arc;

use chrono::Utc;
use tracing::warn;

use pulse_common::value::to_decimal;
use pulse_common::MetricSnapshot;

use super::JobContext;

pub async fn sync_open_interest(ctx: Arc<JobContext>) -> anyhow::Result<usize> {
    let condition_ids = ctx.universe.condition_ids();
    if condition_ids.is_empty() {
        return Ok(0);
    }

    let entries = match ctx.data_api.open_interest(&condition_ids).await {
        Ok(entries) => entries,
        Err(e) if e.is_throttled() => {
            warn!(
                component = "sync_open_interest",
                upstream = "data_api",
                "throttled, skipping this cycle"
            );
            return Ok(0);
        }
        Err(e) => return Err(e.into()),
    };

    let now = Utc::now();
    let mut processed = 0usize;
    for entry in &entries {
        let condition_id = match entry.market.as_deref() {
            Some(id) if !id.is_empty() => id,
            _ => continue,
        };
        let value = match to_decimal(entry.value.as_ref()) {
            Some(value) => value,
            None => continue,
        };
        ctx.store.insert_metric_snapshot(&MetricSnapshot {
            condition_id: condition_id.to_string(),
            ts: now,
            open_interest: Some(value),
            ..Default::default()
        })?;
        processed += 1;
    }

    Ok(processed)
}
