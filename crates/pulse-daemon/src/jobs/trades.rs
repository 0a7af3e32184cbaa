//! Large taker trade ingestion.
//!
//! Pages through the trades endpoint by offset until reaching trades older
//! than the last seen trade minus the safety window (cold start: a bounded
//! lookback), or until the page cap. Insertion is idempotent, so the
//! overlap with already-ingested trades is harmless.

use std::sync::Arc;

use chrono::{Duration, Utc};
use tracing::{debug, warn};

use pulse_market::parse::parse_trade;
use pulse_market::TradesQuery;

use super::JobContext;

pub async fn sync_large_trades(ctx: Arc<JobContext>) -> anyhow::Result<usize> {
    let settings = &ctx.settings;

    let stop_ts = match ctx.store.latest_trade_ts()? {
        Some(latest) => latest - Duration::seconds(settings.trade_safety_window_seconds),
        None => Utc::now() - Duration::hours(settings.trades_initial_lookback_hours),
    };

    let mut inserted = 0usize;
    let mut skipped = 0usize;
    let mut offset = 0u32;
    let mut pages = 0u32;

    'pages: while pages < settings.trades_max_pages {
        let query = TradesQuery {
            limit: settings.trades_page_limit,
            offset,
            taker_only: settings.taker_only,
            min_cash_usd: settings.large_trade_usd_threshold,
        };
        let page = match ctx.data_api.trades_page(&query).await {
            Ok(page) => page,
            Err(e) if e.is_throttled() => {
                warn!(
                    component = "sync_large_trades",
                    upstream = "data_api",
                    inserted,
                    "throttled, truncating walk with partial progress"
                );
                break;
            }
            Err(e) => return Err(e.into()),
        };
        if page.is_empty() {
            break;
        }

        let page_len = page.len() as u32;
        for raw in &page {
            let trade = match parse_trade(raw) {
                Some(trade) => trade,
                None => {
                    skipped += 1;
                    continue;
                }
            };

            if trade.trade_ts < stop_ts {
                debug!(
                    component = "sync_large_trades",
                    stop_ts = %stop_ts,
                    "reached safety-window bound, stopping walk"
                );
                break 'pages;
            }

            if ctx.store.insert_trade(&trade)? {
                inserted += 1;
            }
        }

        pages += 1;
        if page_len < settings.trades_page_limit {
            break;
        }
        offset += settings.trades_page_limit;
    }

    if skipped > 0 {
        warn!(
            component = "sync_large_trades",
            upstream = "data_api",
            skipped,
            "skipped unparseable trades"
        );
    }
    Ok(inserted)
}
