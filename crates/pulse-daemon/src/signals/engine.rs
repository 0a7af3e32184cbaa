//! The two signal engine job bodies.
//!
//! The trade engine consumes newly-persisted trades, maintains wallet
//! state, and emits the large-trade signal family. The arb engine
//! evaluates depth-aware buy-both arbitrage for every tracked binary
//! market with fresh books in the cache.

use std::sync::Arc;

use chrono::{Duration, Utc};
use serde_json::json;
use tracing::{debug, info};

use pulse_common::{NewSignal, SignalType, TradeRecord, WalletRecord};
use pulse_market::BookCache;

use crate::config::Settings;
use crate::signals::arb::{arb_severity, compute_arb, fill_levels, ArbParams};
use crate::signals::trades::{
    build_trade_payload, is_dormant, is_new_wallet, severity_for_trade,
};
use crate::storage::{SignalInsert, Store};
use crate::universe::Universe;

/// Max trades consumed per engine tick.
const TRADE_BATCH_LIMIT: usize = 2000;

/// Trade signal engine: for each newly-persisted trade, upsert the wallet,
/// classify, and emit. Returns the number of trades processed.
pub fn run_trade_engine(store: &Store, settings: &Settings) -> anyhow::Result<usize> {
    let trades = store.unprocessed_trades(TRADE_BATCH_LIMIT)?;
    if trades.is_empty() {
        return Ok(0);
    }

    let config_snapshot = settings.config_snapshot(&[
        "LARGE_TRADE_USD_THRESHOLD",
        "NEW_WALLET_WINDOW_DAYS",
        "DORMANT_WINDOW_DAYS",
    ]);

    let mut processed = Vec::with_capacity(trades.len());
    for trade in &trades {
        process_trade(store, settings, trade, &config_snapshot)?;
        processed.push(trade.trade_pk.clone());
    }

    store.mark_trades_processed(&processed, Utc::now())?;
    Ok(processed.len())
}

fn process_trade(
    store: &Store,
    settings: &Settings,
    trade: &TradeRecord,
    config_snapshot: &serde_json::Value,
) -> anyhow::Result<()> {
    let now = Utc::now();

    // Wallet upsert: dormancy is judged against the state before this
    // trade is folded in.
    let mut was_dormant = false;
    let wallet = match trade.wallet.as_deref() {
        Some(address) => {
            let track_until = if settings.track_wallet_days_after_large_trade > 0 {
                Some(now + Duration::days(settings.track_wallet_days_after_large_trade))
            } else {
                None
            };

            let record = match store.wallet(address)? {
                Some(mut existing) => {
                    was_dormant = is_dormant(&existing, trade.trade_ts, settings.dormant_window_days);
                    existing.last_seen_at = now.max(trade.trade_ts);
                    existing.lifetime_notional_usd += trade.notional_usd;
                    if let Some(desired) = track_until {
                        // Extended, never shortened.
                        if existing.tracked_until.map_or(true, |t| t < desired) {
                            existing.tracked_until = Some(desired);
                        }
                    }
                    existing
                }
                // First observation: anchor to the trade time so
                // first_seen_at <= first_trade_ts <= last_seen_at holds.
                None => WalletRecord {
                    wallet: address.to_string(),
                    first_seen_at: trade.trade_ts,
                    last_seen_at: now.max(trade.trade_ts),
                    first_trade_ts: Some(trade.trade_ts),
                    lifetime_notional_usd: trade.notional_usd,
                    tracked_until: track_until,
                },
            };
            store.upsert_wallet(&record)?;
            Some(record)
        }
        None => None,
    };

    if trade.notional_usd < settings.large_trade_usd_threshold {
        return Ok(());
    }

    let metrics = store.latest_metrics(&trade.condition_id)?;
    let low_liquidity = metrics
        .liquidity
        .map(|l| l < settings.min_gamma_liquidity)
        .unwrap_or(false);
    let is_new = wallet
        .as_ref()
        .map(|w| is_new_wallet(w, trade.trade_ts, settings.new_wallet_window_days))
        .unwrap_or(false);

    // The newness bonus applies only to the new-wallet signal itself.
    let base_severity = severity_for_trade(trade.notional_usd, false, low_liquidity);
    let payload = build_trade_payload(trade, wallet.as_ref(), &metrics, config_snapshot.clone());

    emit_trade_signal(store, SignalType::LargeTakerTrade, trade, &payload, base_severity)?;
    if is_new {
        let severity = severity_for_trade(trade.notional_usd, true, low_liquidity);
        emit_trade_signal(store, SignalType::LargeNewWalletTrade, trade, &payload, severity)?;
    }
    if wallet.is_some() && was_dormant {
        emit_trade_signal(
            store,
            SignalType::DormantWalletReactivation,
            trade,
            &payload,
            base_severity,
        )?;
    }

    Ok(())
}

fn emit_trade_signal(
    store: &Store,
    signal_type: SignalType,
    trade: &TradeRecord,
    payload: &serde_json::Value,
    severity: u8,
) -> anyhow::Result<()> {
    let signal = NewSignal {
        signal_type,
        dedupe_key: format!("{}:{}", signal_type, trade.trade_pk),
        severity,
        wallet: trade.wallet.clone(),
        condition_id: Some(trade.condition_id.clone()),
        payload: payload.clone(),
    };

    match store.insert_signal(&signal, Utc::now())? {
        SignalInsert::Inserted(_) => {
            info!(
                component = "signal_engine",
                signal_type = %signal_type,
                wallet = trade.wallet.as_deref().unwrap_or(""),
                severity,
                "signal emitted"
            );
        }
        SignalInsert::AlreadyEmitted => {
            debug!(component = "signal_engine", signal_type = %signal_type, "signal already emitted");
        }
    }
    Ok(())
}

/// Arb signal engine: evaluate every tracked binary market whose YES and
/// NO books are fresh in the cache. Returns the number of signals emitted.
pub fn run_arb_engine(
    store: &Store,
    settings: &Settings,
    cache: &Arc<BookCache>,
    universe: &Universe,
) -> anyhow::Result<usize> {
    let now = Utc::now();
    let params = ArbParams {
        edge_min: settings.arb_edge_min,
        min_executable_shares: settings.arb_min_executable_shares,
        max_shares_to_evaluate: settings.arb_max_shares_to_evaluate,
        taker_fee_bps: settings.taker_fee_bps,
    };
    let config_snapshot = settings.config_snapshot(&[
        "ARB_EDGE_MIN",
        "ARB_MIN_EXECUTABLE_SHARES",
        "ARB_MAX_SHARES_TO_EVALUATE",
        "ARB_MAX_BOOK_AGE_SECONDS",
        "TAKER_FEE_BPS",
    ]);

    let mut emitted = 0usize;
    for entry in universe.entries() {
        let (yes_book, no_book) = match (cache.get(&entry.yes_token_id), cache.get(&entry.no_token_id)) {
            (Some(yes), Some(no)) => (yes, no),
            _ => continue,
        };

        // Freshness gate.
        let yes_age = yes_book.age_seconds(now);
        let no_age = no_book.age_seconds(now);
        if yes_age > settings.arb_max_book_age_seconds || no_age > settings.arb_max_book_age_seconds {
            debug!(
                component = "signal_engine",
                condition_id = %entry.condition_id,
                yes_age,
                no_age,
                "skipping stale books"
            );
            continue;
        }

        let (best_ask_yes, best_ask_no) = match (yes_book.best_ask(), no_book.best_ask()) {
            (Some(yes), Some(no)) => (yes, no),
            _ => continue,
        };

        // Fast screen on top-of-book before walking depth.
        let top_sum = best_ask_yes.price + best_ask_no.price;
        if top_sum >= rust_decimal::Decimal::ONE - params.edge_min {
            continue;
        }

        let result = compute_arb(&yes_book.asks, &no_book.asks, &params);
        let (q_max, edge_at_q_max) = match (result.q_max, result.edge_at_q_max) {
            (Some(q), Some(edge)) => (q, edge),
            _ => continue,
        };
        if q_max < params.min_executable_shares {
            continue;
        }

        // Per-market cooldown on top of the dedupe key.
        let cooldown_start = now - Duration::seconds(settings.arb_market_cooldown_seconds);
        if store.recent_signal_exists(SignalType::ArbBuyBoth, &entry.condition_id, cooldown_start)? {
            debug!(
                component = "signal_engine",
                condition_id = %entry.condition_id,
                "arb suppressed by market cooldown"
            );
            continue;
        }

        let payload = json!({
            "condition_id": entry.condition_id,
            "yes_token_id": entry.yes_token_id,
            "no_token_id": entry.no_token_id,
            "neg_risk": entry.neg_risk,
            "as_of_yes": yes_book.as_of.to_rfc3339(),
            "as_of_no": no_book.as_of.to_rfc3339(),
            "best_ask_yes": best_ask_yes.price.to_string(),
            "best_ask_no": best_ask_no.price.to_string(),
            "top_of_book_sum": top_sum.to_string(),
            "edge_min": params.edge_min.to_string(),
            "min_executable_shares": params.min_executable_shares.to_string(),
            "q_max": q_max.to_string(),
            "edge_at_min_q": result.edge_at_min_q.map(|e| e.to_string()),
            "edge_at_q_max": edge_at_q_max.to_string(),
            "avg_ask_yes_at_q_max": result.avg_ask_yes_at_q_max.map(|v| v.to_string()),
            "avg_ask_no_at_q_max": result.avg_ask_no_at_q_max.map(|v| v.to_string()),
            "asks_yes_levels": fill_levels(&yes_book.asks, q_max),
            "asks_no_levels": fill_levels(&no_book.asks, q_max),
            "config_snapshot": config_snapshot,
        });

        let severity = arb_severity(edge_at_q_max, q_max, yes_age.max(no_age));
        let signal = NewSignal {
            signal_type: SignalType::ArbBuyBoth,
            dedupe_key: format!(
                "ARB_BUY_BOTH:{}:{:.4}:{:.2}",
                entry.condition_id,
                edge_at_q_max.round_dp(4),
                q_max.round_dp(2),
            ),
            severity,
            wallet: None,
            condition_id: Some(entry.condition_id.clone()),
            payload,
        };

        if let SignalInsert::Inserted(_) = store.insert_signal(&signal, now)? {
            info!(
                component = "signal_engine",
                condition_id = %entry.condition_id,
                edge = %edge_at_q_max,
                q_max = %q_max,
                severity,
                "arb signal emitted"
            );
            emitted += 1;
        }
    }

    Ok(emitted)
}
