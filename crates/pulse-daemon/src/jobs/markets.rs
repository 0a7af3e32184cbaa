//! Market discovery jobs: Gamma events sync and the tag dictionary.

use std::sync::Arc;

use chrono::Utc;
use serde_json::json;
use tracing::{info, warn};

use pulse_common::{MarketRecord, MetricSnapshot, NewSignal, SignalType};
use pulse_market::parse::{parse_market, parse_tag_id};

use crate::storage::Store;

use super::JobContext;

/// Paginate the Gamma events endpoint, upserting every market and
/// emitting NEW_MARKET for condition IDs seen for the first time.
pub async fn sync_gamma_events(ctx: Arc<JobContext>) -> anyhow::Result<usize> {
    let settings = &ctx.settings;
    let mut processed = 0usize;
    let mut skipped = 0usize;
    let mut offset = 0u32;

    for _ in 0..settings.gamma_events_max_pages {
        let events = match ctx
            .gamma
            .events_page(settings.gamma_events_page_limit, offset)
            .await
        {
            Ok(events) => events,
            Err(e) if e.is_throttled() => {
                warn!(
                    component = "sync_gamma_events",
                    upstream = "gamma",
                    processed,
                    "throttled, truncating sync with partial progress"
                );
                break;
            }
            Err(e) => return Err(e.into()),
        };
        if events.is_empty() {
            break;
        }

        let page_len = events.len() as u32;
        for event in &events {
            for market in event.markets.as_deref().unwrap_or_default() {
                let record = match parse_market(market, event) {
                    Some(record) => record,
                    None => {
                        skipped += 1;
                        continue;
                    }
                };

                let newly_discovered = ctx.store.upsert_market(&record)?;
                if newly_discovered {
                    emit_new_market(&ctx.store, &record)?;
                }

                if record.volume.is_some() || record.liquidity.is_some() {
                    ctx.store.insert_metric_snapshot(&MetricSnapshot {
                        condition_id: record.condition_id.clone(),
                        ts: record.last_seen_at,
                        volume: record.volume,
                        liquidity: record.liquidity,
                        ..Default::default()
                    })?;
                }
                processed += 1;
            }
        }

        if page_len < settings.gamma_events_page_limit {
            break;
        }
        offset += settings.gamma_events_page_limit;
    }

    if skipped > 0 {
        warn!(
            component = "sync_gamma_events",
            upstream = "gamma",
            skipped,
            "skipped markets missing required fields"
        );
    }
    Ok(processed)
}

fn emit_new_market(store: &Store, record: &MarketRecord) -> anyhow::Result<()> {
    let signal = NewSignal {
        signal_type: SignalType::NewMarket,
        dedupe_key: format!("NEW_MARKET:{}", record.condition_id),
        severity: 1,
        wallet: None,
        condition_id: Some(record.condition_id.clone()),
        payload: json!({
            "condition_id": record.condition_id,
            "slug": record.slug,
            "title": record.title,
            "tags": record.tag_ids,
            "start_time": record.start_time.map(|t| t.to_rfc3339()),
            "end_time": record.end_time.map(|t| t.to_rfc3339()),
            "token_ids": record.token_ids,
        }),
    };
    store.insert_signal(&signal, Utc::now())?;
    Ok(())
}

/// Refresh the tag dictionary and the sports flag.
pub async fn sync_tag_metadata(ctx: Arc<JobContext>) -> anyhow::Result<usize> {
    let settings = &ctx.settings;
    let mut processed = 0usize;
    let mut offset = 0u32;

    for _ in 0..settings.tags_max_pages {
        let tags = ctx
            .gamma
            .tags_page(settings.tags_page_limit, offset)
            .await?;
        if tags.is_empty() {
            break;
        }

        let page_len = tags.len() as u32;
        for tag in &tags {
            let id = match parse_tag_id(tag.id.as_ref()) {
                Some(id) => id,
                None => continue,
            };
            ctx.store
                .upsert_tag(id, tag.label.as_deref(), tag.slug.as_deref())?;
            processed += 1;
        }

        if page_len < settings.tags_page_limit {
            break;
        }
        offset += settings.tags_page_limit;
    }

    // Sports listing failures leave the existing flags untouched.
    match ctx.gamma.sport_tag_ids().await {
        Ok(sport_ids) => {
            ctx.store.set_sport_tags(&sport_ids)?;
            info!(
                component = "sync_tag_metadata",
                upstream = "gamma",
                sport_tags = sport_ids.len(),
                "sport tags refreshed"
            );
        }
        Err(e) => {
            warn!(
                component = "sync_tag_metadata",
                upstream = "gamma",
                error = %e,
                "sports listing unavailable, keeping existing flags"
            );
        }
    }

    Ok(processed)
}
