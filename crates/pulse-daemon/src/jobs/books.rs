//! Orderbook polling fallback and the latest-book storage flush.
//!
//! Fetches REST snapshots for the tracked token set, feeds them to the
//! in-memory cache (the websocket consumer's heals do the same while it is
//! live), flushes the latest book per token to storage for audit/UI, and
//! appends a best-bid/ask metric snapshot per tracked market.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;
use tracing::warn;

use pulse_common::MetricSnapshot;

use super::JobContext;

pub async fn sync_orderbooks(ctx: Arc<JobContext>) -> anyhow::Result<usize> {
    let tokens = ctx.universe.token_ids();
    if tokens.is_empty() {
        return Ok(0);
    }

    let books = match ctx.clob.books(&tokens).await {
        Ok(books) => books,
        Err(e) if e.is_throttled() => {
            warn!(
                component = "sync_orderbooks",
                upstream = "clob",
                "throttled, skipping this cycle"
            );
            return Ok(0);
        }
        Err(e) => return Err(e.into()),
    };

    // Best bid/ask per token, for the per-market metric snapshot.
    let mut tops: HashMap<String, (Option<Decimal>, Option<Decimal>)> = HashMap::new();

    let mut processed = 0usize;
    for book in books {
        tops.insert(
            book.token_id.clone(),
            (
                book.bids.first().map(|l| l.price),
                book.asks.first().map(|l| l.price),
            ),
        );
        ctx.store.upsert_orderbook(&book)?;
        ctx.cache.apply_snapshot(book);
        processed += 1;
    }

    let now = Utc::now();
    for entry in ctx.universe.entries() {
        let (bid_yes, ask_yes) = match tops.get(&entry.yes_token_id) {
            Some(top) => *top,
            None => continue,
        };
        let (bid_no, ask_no) = match tops.get(&entry.no_token_id) {
            Some(top) => *top,
            None => continue,
        };

        let spread = |bid: Option<Decimal>, ask: Option<Decimal>| match (bid, ask) {
            (Some(b), Some(a)) => Some(a - b),
            _ => None,
        };

        ctx.store.insert_metric_snapshot(&MetricSnapshot {
            condition_id: entry.condition_id.clone(),
            ts: now,
            best_bid_yes: bid_yes,
            best_ask_yes: ask_yes,
            best_bid_no: bid_no,
            best_ask_no: ask_no,
            spread_yes: spread(bid_yes, ask_yes),
            spread_no: spread(bid_no, ask_no),
            ..Default::default()
        })?;
    }

    Ok(processed)
}
