//! Tracked-universe recomputation.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::info;

use pulse_common::resolve_binary_tokens;

use crate::universe::TrackedEntry;

use super::JobContext;

/// Recompute the tracked market set: threshold-passing markets capped at
/// the limit, manual overrides always included. Markets without a
/// resolvable binary token pair are kept out of the arb universe.
pub async fn sync_universe(ctx: Arc<JobContext>) -> anyhow::Result<usize> {
    let settings = &ctx.settings;

    let mut condition_ids = ctx.store.select_universe(
        settings.min_gamma_volume,
        settings.min_gamma_liquidity,
        settings.min_open_interest,
        settings.max_tracked_markets,
    )?;

    let mut seen: HashSet<String> = condition_ids.iter().cloned().collect();
    for override_id in &settings.tracked_market_overrides {
        if seen.insert(override_id.clone()) {
            condition_ids.push(override_id.clone());
        }
    }

    let markets = ctx.store.markets_by_condition_ids(&condition_ids)?;
    let mut entries = Vec::with_capacity(markets.len());
    for market in &markets {
        let (yes_token_id, no_token_id) =
            match resolve_binary_tokens(&market.token_ids, &market.outcomes) {
                Some(pair) => pair,
                None => continue,
            };
        entries.push(TrackedEntry {
            condition_id: market.condition_id.clone(),
            yes_token_id,
            no_token_id,
            neg_risk: market.neg_risk.unwrap_or(false),
        });
    }

    let tracked = entries.len();
    ctx.universe.replace(entries);

    // Evict cache entries for tokens that fell out of the universe.
    let tracked_tokens: HashSet<String> = ctx.universe.token_ids().into_iter().collect();
    ctx.cache.retain_tokens(&tracked_tokens);

    info!(
        component = "sync_universe",
        candidates = condition_ids.len(),
        tracked,
        "universe recomputed"
    );
    Ok(tracked)
}
