//! Wallet classification and severity for trade signals.

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde_json::{json, Value};

use pulse_common::{TradeRecord, WalletRecord};

use crate::storage::LatestMetrics;

/// A wallet is "new" when the trade falls within the configured window
/// after the wallet was first observed on the platform.
pub fn is_new_wallet(
    wallet: &WalletRecord,
    trade_ts: DateTime<Utc>,
    new_wallet_window_days: i64,
) -> bool {
    trade_ts <= wallet.first_seen_at + Duration::days(new_wallet_window_days)
}

/// A wallet is dormant when no trade has been observed for the configured
/// window before this trade.
pub fn is_dormant(
    wallet: &WalletRecord,
    trade_ts: DateTime<Utc>,
    dormant_window_days: i64,
) -> bool {
    trade_ts >= wallet.last_seen_at + Duration::days(dormant_window_days)
}

/// Notional-band severity: 10k -> 2, 50k -> 3, 250k -> 4, 1M -> 5; +1 for a
/// new wallet, +1 when the market's latest liquidity is under the floor.
/// Clamped to [1, 5].
pub fn severity_for_trade(notional: Decimal, is_new: bool, low_liquidity: bool) -> u8 {
    let mut severity: i32 = if notional >= Decimal::from(1_000_000) {
        5
    } else if notional >= Decimal::from(250_000) {
        4
    } else if notional >= Decimal::from(50_000) {
        3
    } else {
        2
    };

    if is_new {
        severity += 1;
    }
    if low_liquidity {
        severity += 1;
    }
    severity.clamp(1, 5) as u8
}

/// Evidence payload for the trade signal family.
pub fn build_trade_payload(
    trade: &TradeRecord,
    wallet: Option<&WalletRecord>,
    metrics: &LatestMetrics,
    config_snapshot: Value,
) -> Value {
    let mut obj = serde_json::Map::new();
    obj.insert("wallet".to_string(), json!(trade.wallet));
    obj.insert("trade_ts".to_string(), json!(trade.trade_ts.to_rfc3339()));
    obj.insert("condition_id".to_string(), json!(trade.condition_id));
    obj.insert("token_id".to_string(), json!(trade.token_id));
    obj.insert("side".to_string(), json!(trade.side.as_str()));
    obj.insert("size_shares".to_string(), json!(trade.size.to_string()));
    obj.insert("price".to_string(), json!(trade.price.to_string()));
    obj.insert(
        "notional_usd".to_string(),
        json!(trade.notional_usd.to_string()),
    );
    obj.insert("tx_hash".to_string(), json!(trade.transaction_hash));
    obj.insert(
        "market_title".to_string(),
        trade.raw.get("title").cloned().unwrap_or(Value::Null),
    );
    obj.insert(
        "market_slug".to_string(),
        trade.raw.get("slug").cloned().unwrap_or(Value::Null),
    );
    obj.insert(
        "outcome".to_string(),
        trade.raw.get("outcome").cloned().unwrap_or(Value::Null),
    );
    obj.insert("config_snapshot".to_string(), config_snapshot);
    if let Some(wallet) = wallet {
        obj.insert(
            "wallet_first_seen_at".to_string(),
            json!(wallet.first_seen_at.to_rfc3339()),
        );
        obj.insert(
            "wallet_age_days".to_string(),
            json!((wallet.last_seen_at - wallet.first_seen_at).num_days()),
        );
    }
    if let Some(liquidity) = metrics.liquidity {
        obj.insert("market_liquidity".to_string(), json!(liquidity.to_string()));
    }
    if let Some(volume) = metrics.volume {
        obj.insert("market_volume".to_string(), json!(volume.to_string()));
    }
    if let Some(open_interest) = metrics.open_interest {
        obj.insert(
            "market_open_interest".to_string(),
            json!(open_interest.to_string()),
        );
    }

    Value::Object(obj)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pulse_common::Side;
    use rust_decimal_macros::dec;

    fn wallet(first_seen_days_ago: i64, last_seen_days_ago: i64) -> WalletRecord {
        let now = Utc::now();
        WalletRecord {
            wallet: "0xw".to_string(),
            first_seen_at: now - Duration::days(first_seen_days_ago),
            last_seen_at: now - Duration::days(last_seen_days_ago),
            first_trade_ts: None,
            lifetime_notional_usd: dec!(0),
            tracked_until: None,
        }
    }

    #[test]
    fn test_is_new_wallet_window() {
        let now = Utc::now();
        assert!(is_new_wallet(&wallet(3, 0), now, 14));
        assert!(!is_new_wallet(&wallet(20, 0), now, 14));
        // Boundary: exactly at the window edge is still new.
        assert!(is_new_wallet(&wallet(14, 0), now, 14));
    }

    #[test]
    fn test_is_dormant_window() {
        let now = Utc::now();
        assert!(is_dormant(&wallet(100, 45), now, 30));
        assert!(!is_dormant(&wallet(100, 5), now, 30));
    }

    #[test]
    fn test_severity_bands() {
        assert_eq!(severity_for_trade(dec!(12000), false, false), 2);
        assert_eq!(severity_for_trade(dec!(75000), false, false), 3);
        assert_eq!(severity_for_trade(dec!(300000), false, false), 4);
        assert_eq!(severity_for_trade(dec!(2000000), false, false), 5);
    }

    #[test]
    fn test_severity_bonuses_clamp() {
        assert_eq!(severity_for_trade(dec!(12000), true, false), 3);
        assert_eq!(severity_for_trade(dec!(12000), true, true), 4);
        // Already at 5: stays clamped.
        assert_eq!(severity_for_trade(dec!(2000000), true, true), 5);
    }

    #[test]
    fn test_build_trade_payload_fields() {
        let now = Utc::now();
        let trade = TradeRecord {
            trade_pk: "tx:0xT".to_string(),
            transaction_hash: Some("0xT".to_string()),
            wallet: Some("0xw".to_string()),
            condition_id: "0xcond".to_string(),
            token_id: "tok_yes".to_string(),
            side: Side::Buy,
            price: dec!(0.6),
            size: dec!(20000),
            notional_usd: dec!(12000),
            trade_ts: now,
            raw: serde_json::json!({"title": "Some market", "slug": "some-market"}),
        };
        let w = wallet(3, 0);
        let metrics = LatestMetrics {
            liquidity: Some(dec!(8000)),
            ..Default::default()
        };

        let payload = build_trade_payload(
            &trade,
            Some(&w),
            &metrics,
            serde_json::json!({"LARGE_TRADE_USD_THRESHOLD": "10000"}),
        );

        assert_eq!(payload["notional_usd"], "12000");
        assert_eq!(payload["market_title"], "Some market");
        assert_eq!(payload["market_liquidity"], "8000");
        assert!(payload["config_snapshot"]["LARGE_TRADE_USD_THRESHOLD"].is_string());
        assert!(payload["wallet_first_seen_at"].is_string());
    }
}
