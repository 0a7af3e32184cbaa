//! Normalizers that turn upstream payloads into canonical records.
//!
//! One function per upstream shape. All of them absorb schema drift:
//! missing required fields make the record `None` (callers count and skip),
//! unknown fields are dropped at deserialization, and loosely-typed fields
//! go through the duck-typed helpers in `pulse_common::value`.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sha2::{Digest, Sha256};
use tracing::debug;

use pulse_common::value::{parse_datetime, parse_datetime_str, parse_jsonish_array, to_bool, to_decimal};
use pulse_common::{BookLevel, BookSide, MarketRecord, Side, TradeRecord};

use crate::types::{ClobBook, DataApiTrade, GammaEvent, GammaMarket, RawLevel};

/// A normalized orderbook payload (REST snapshot or WS book message).
#[derive(Debug, Clone)]
pub struct NormalizedBook {
    pub condition_id: String,
    pub token_id: String,
    /// Best first: prices strictly descending.
    pub bids: Vec<BookLevel>,
    /// Best first: prices strictly ascending.
    pub asks: Vec<BookLevel>,
    pub tick_size: Option<Decimal>,
    pub min_order_size: Option<Decimal>,
    pub neg_risk: Option<bool>,
    /// Upstream time of the snapshot.
    pub as_of: DateTime<Utc>,
    pub hash: Option<String>,
}

/// Normalize a Gamma market within its parent event.
///
/// Returns `None` when the condition ID is absent; every other field is
/// optional and falls back to the event-level value where the upstream
/// reports it there (`negRisk`, dates).
pub fn parse_market(market: &GammaMarket, event: &GammaEvent) -> Option<MarketRecord> {
    let condition_id = market.condition_id.as_deref()?.trim().to_string();
    if condition_id.is_empty() {
        return None;
    }

    let token_ids = parse_jsonish_array(market.clob_token_ids.as_ref());
    let outcomes = parse_jsonish_array(market.outcomes.as_ref());

    // Prefer the numeric variants when both representations are present.
    let volume = to_decimal(market.volume_num.as_ref()).or_else(|| to_decimal(market.volume.as_ref()));
    let liquidity =
        to_decimal(market.liquidity_num.as_ref()).or_else(|| to_decimal(market.liquidity.as_ref()));

    let neg_risk = to_bool(market.neg_risk.as_ref()).or_else(|| to_bool(event.neg_risk.as_ref()));

    let mut tag_ids = Vec::new();
    for tag in event.tags.as_deref().unwrap_or_default() {
        if let Some(id) = parse_tag_id(tag.id.as_ref()) {
            tag_ids.push(id);
        }
    }

    let start_time = market
        .start_date
        .as_deref()
        .or(event.start_date.as_deref())
        .and_then(parse_datetime_str);
    let end_time = market
        .end_date
        .as_deref()
        .or(event.end_date.as_deref())
        .and_then(parse_datetime_str);

    Some(MarketRecord {
        condition_id,
        market_id: market.id.clone(),
        event_id: event.id.clone(),
        slug: market.slug.clone(),
        question: market.question.clone(),
        title: market.question.clone().or_else(|| event.title.clone()),
        active: market.active.or(event.active),
        closed: market.closed.or(event.closed),
        tag_ids,
        neg_risk,
        outcomes,
        token_ids,
        start_time,
        end_time,
        last_seen_at: Utc::now(),
        volume,
        liquidity,
    })
}

/// Parse a tag ID that may arrive as a number or a numeric string.
pub fn parse_tag_id(value: Option<&serde_json::Value>) -> Option<i64> {
    match value? {
        serde_json::Value::Number(n) => n.as_i64(),
        serde_json::Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Canonical wallet identity: the proxy wallet when present, else the
/// user/owner address.
pub fn canonical_wallet(trade: &DataApiTrade) -> Option<String> {
    trade
        .proxy_wallet
        .as_deref()
        .or(trade.user.as_deref())
        .map(|w| w.trim().to_lowercase())
        .filter(|w| !w.is_empty())
}

/// Dedupe identity for a trade: `tx:<hash>` when the transaction hash is
/// present, else a SHA-256 over the identifying fields.
pub fn trade_dedupe_key(trade: &DataApiTrade) -> String {
    if let Some(tx) = trade.transaction_hash.as_deref().filter(|t| !t.is_empty()) {
        return format!("tx:{}", tx);
    }

    let timestamp = trade
        .timestamp
        .as_ref()
        .map(|v| v.to_string())
        .unwrap_or_default();
    let parts = [
        canonical_wallet(trade).unwrap_or_default(),
        trade.condition_id.clone().unwrap_or_default(),
        trade.asset.clone().unwrap_or_default(),
        trade.side.clone().unwrap_or_default(),
        timestamp,
        trade.size.as_ref().map(|v| v.to_string()).unwrap_or_default(),
        trade.price.as_ref().map(|v| v.to_string()).unwrap_or_default(),
    ];
    let mut hasher = Sha256::new();
    hasher.update(parts.join("|").as_bytes());
    format!("hash:{:x}", hasher.finalize())
}

/// Normalize a data-API trade. Records missing identity, price, size, side
/// or timestamp are skipped (returns `None`).
pub fn parse_trade(trade: &DataApiTrade) -> Option<TradeRecord> {
    let condition_id = trade.condition_id.as_deref()?.trim().to_string();
    let token_id = trade.asset.as_deref()?.trim().to_string();
    if condition_id.is_empty() || token_id.is_empty() {
        return None;
    }

    let side: Side = match trade.side.as_deref()?.parse() {
        Ok(side) => side,
        Err(_) => {
            debug!(side = ?trade.side, "dropping trade with unknown side");
            return None;
        }
    };

    let price = to_decimal(trade.price.as_ref())?;
    let size = to_decimal(trade.size.as_ref())?;
    let trade_ts = parse_datetime(trade.timestamp.as_ref())?;

    Some(TradeRecord {
        trade_pk: trade_dedupe_key(trade),
        transaction_hash: trade
            .transaction_hash
            .clone()
            .filter(|t| !t.is_empty()),
        wallet: canonical_wallet(trade),
        condition_id,
        token_id,
        side,
        price,
        size,
        notional_usd: price * size,
        trade_ts,
        raw: serde_json::to_value(RawTrade::from(trade)).unwrap_or(serde_json::Value::Null),
    })
}

/// Evidence subset of the raw trade retained in storage.
#[derive(serde::Serialize)]
struct RawTrade<'a> {
    #[serde(rename = "proxyWallet")]
    proxy_wallet: &'a Option<String>,
    #[serde(rename = "conditionId")]
    condition_id: &'a Option<String>,
    asset: &'a Option<String>,
    side: &'a Option<String>,
    size: &'a Option<serde_json::Value>,
    price: &'a Option<serde_json::Value>,
    timestamp: &'a Option<serde_json::Value>,
    slug: &'a Option<String>,
    title: &'a Option<String>,
    #[serde(rename = "eventSlug")]
    event_slug: &'a Option<String>,
    outcome: &'a Option<String>,
    #[serde(rename = "transactionHash")]
    transaction_hash: &'a Option<String>,
}

impl<'a> From<&'a DataApiTrade> for RawTrade<'a> {
    fn from(t: &'a DataApiTrade) -> Self {
        Self {
            proxy_wallet: &t.proxy_wallet,
            condition_id: &t.condition_id,
            asset: &t.asset,
            side: &t.side,
            size: &t.size,
            price: &t.price,
            timestamp: &t.timestamp,
            slug: &t.slug,
            title: &t.title,
            event_slug: &t.event_slug,
            outcome: &t.outcome,
            transaction_hash: &t.transaction_hash,
        }
    }
}

/// Normalize a side label from the market channel: accepts `buy`/`bid` and
/// `sell`/`ask` in any case.
pub fn parse_book_side(label: &str) -> Option<BookSide> {
    match label.trim().to_lowercase().as_str() {
        "buy" | "bid" | "bids" => Some(BookSide::Bid),
        "sell" | "ask" | "asks" => Some(BookSide::Ask),
        other => {
            debug!(side = other, "dropping level with unknown side label");
            None
        }
    }
}

/// Normalize raw levels, dropping entries with non-positive price or size
/// or prices outside [0, 1].
pub fn normalize_raw_levels(levels: &[RawLevel]) -> Vec<BookLevel> {
    let mut out = Vec::with_capacity(levels.len());
    for level in levels {
        let price: Decimal = match level.price.trim().parse() {
            Ok(p) => p,
            Err(_) => continue,
        };
        let size: Decimal = match level.size.trim().parse() {
            Ok(s) => s,
            Err(_) => continue,
        };
        if price <= Decimal::ZERO || price > Decimal::ONE || size <= Decimal::ZERO {
            continue;
        }
        out.push(BookLevel::new(price, size));
    }
    out
}

/// Normalize a CLOB book payload (REST or WS shape).
///
/// Side labels may be `bids`/`asks` or `buys`/`sells`; levels are validated
/// and sorted best-first (bids descending, asks ascending). Returns `None`
/// when the identifying fields are missing.
pub fn parse_book(book: &ClobBook) -> Option<NormalizedBook> {
    let condition_id = book.market.as_deref()?.trim().to_string();
    let token_id = book.asset_id.as_deref()?.trim().to_string();
    if condition_id.is_empty() || token_id.is_empty() {
        return None;
    }

    let as_of = book
        .timestamp
        .as_deref()
        .and_then(parse_datetime_str)
        .unwrap_or_else(Utc::now);

    let raw_bids = book.bids.as_deref().or(book.buys.as_deref()).unwrap_or_default();
    let raw_asks = book.asks.as_deref().or(book.sells.as_deref()).unwrap_or_default();

    let mut bids = normalize_raw_levels(raw_bids);
    let mut asks = normalize_raw_levels(raw_asks);
    bids.sort_by(|a, b| b.price.cmp(&a.price));
    asks.sort_by(|a, b| a.price.cmp(&b.price));
    dedupe_adjacent(&mut bids);
    dedupe_adjacent(&mut asks);

    Some(NormalizedBook {
        condition_id,
        token_id,
        bids,
        asks,
        tick_size: to_decimal(book.tick_size.as_ref()),
        min_order_size: to_decimal(book.min_order_size.as_ref()),
        neg_risk: to_bool(book.neg_risk.as_ref()),
        as_of,
        hash: book.hash.clone(),
    })
}

/// Collapse duplicate prices by summing sizes; keeps strict monotonicity.
fn dedupe_adjacent(levels: &mut Vec<BookLevel>) {
    let mut i = 1;
    while i < levels.len() {
        if levels[i].price == levels[i - 1].price {
            let size = levels[i].size;
            levels[i - 1].size += size;
            levels.remove(i);
        } else {
            i += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use serde_json::json;

    fn gamma_fixture() -> GammaEvent {
        serde_json::from_value(json!({
            "id": "event1",
            "title": "Event title",
            "negRisk": true,
            "startDate": "2025-01-01T00:00:00Z",
            "endDate": "2025-06-01T00:00:00Z",
            "active": true,
            "closed": false,
            "markets": [{
                "id": "m1",
                "question": "Will it?",
                "conditionId": "0xcond",
                "slug": "will-it",
                "clobTokenIds": "[\"tok_yes\", \"tok_no\"]",
                "outcomes": ["Yes", "No"],
                "volume": "100.5",
                "volumeNum": 101.25,
                "liquidity": "50"
            }],
            "tags": [{"id": "12", "label": "Politics"}, {"id": 15, "label": "US"}]
        }))
        .unwrap()
    }

    #[test]
    fn test_parse_market_prefers_numeric_volume() {
        let event = gamma_fixture();
        let market = parse_market(&event.markets.as_ref().unwrap()[0], &event).unwrap();

        assert_eq!(market.condition_id, "0xcond");
        assert_eq!(market.volume, Some(dec!(101.25)));
        assert_eq!(market.liquidity, Some(dec!(50)));
        assert_eq!(market.token_ids, vec!["tok_yes", "tok_no"]);
        assert_eq!(market.outcomes, vec!["Yes", "No"]);
        assert_eq!(market.tag_ids, vec![12, 15]);
        // negRisk only present at event level.
        assert_eq!(market.neg_risk, Some(true));
    }

    #[test]
    fn test_parse_market_requires_condition_id() {
        let mut event = gamma_fixture();
        event.markets.as_mut().unwrap()[0].condition_id = None;
        let market = parse_market(&event.markets.as_ref().unwrap()[0], &event);
        assert!(market.is_none());
    }

    fn trade_fixture() -> DataApiTrade {
        serde_json::from_value(json!({
            "proxyWallet": "0xAbCd",
            "conditionId": "0xcond",
            "asset": "tok_yes",
            "side": "BUY",
            "size": "20000",
            "price": 0.6,
            "timestamp": "1704067200000",
            "transactionHash": "0xT1"
        }))
        .unwrap()
    }

    #[test]
    fn test_parse_trade_notional_and_wallet() {
        let trade = parse_trade(&trade_fixture()).unwrap();
        assert_eq!(trade.wallet.as_deref(), Some("0xabcd"));
        assert_eq!(trade.notional_usd, dec!(12000.0));
        assert_eq!(trade.trade_pk, "tx:0xT1");
        assert_eq!(trade.trade_ts.timestamp_millis(), 1704067200000);
    }

    #[test]
    fn test_trade_dedupe_key_composite_is_stable() {
        let mut raw = trade_fixture();
        raw.transaction_hash = None;

        let key1 = trade_dedupe_key(&raw);
        let key2 = trade_dedupe_key(&raw);
        assert!(key1.starts_with("hash:"));
        assert_eq!(key1, key2);

        // Any identifying field changes the key.
        let mut other = raw.clone();
        other.size = Some(json!("20001"));
        assert_ne!(trade_dedupe_key(&other), key1);
    }

    #[test]
    fn test_parse_trade_skips_unknown_side() {
        let mut raw = trade_fixture();
        raw.side = Some("MERGE".to_string());
        assert!(parse_trade(&raw).is_none());
    }

    #[test]
    fn test_parse_book_sides_and_ordering() {
        let book: ClobBook = serde_json::from_value(json!({
            "market": "0xcond",
            "asset_id": "tok_yes",
            "timestamp": "2025-01-01T00:00:00Z",
            "hash": "h1",
            "bids": [
                {"price": "0.44", "size": "200"},
                {"price": "0.45", "size": "100"}
            ],
            "asks": [
                {"price": "0.56", "size": "250"},
                {"price": "0.55", "size": "150"}
            ],
            "tick_size": "0.01",
            "min_order_size": "5",
            "neg_risk": false
        }))
        .unwrap();

        let normalized = parse_book(&book).unwrap();
        assert_eq!(normalized.bids[0].price, dec!(0.45));
        assert_eq!(normalized.bids[1].price, dec!(0.44));
        assert_eq!(normalized.asks[0].price, dec!(0.55));
        assert_eq!(normalized.asks[1].price, dec!(0.56));
        assert_eq!(normalized.tick_size, Some(dec!(0.01)));
        assert_eq!(normalized.neg_risk, Some(false));
    }

    #[test]
    fn test_parse_book_accepts_buys_sells_labels() {
        let book: ClobBook = serde_json::from_value(json!({
            "market": "0xcond",
            "asset_id": "tok_yes",
            "timestamp": "1704067200000",
            "buys": [{"price": "0.45", "size": "100"}],
            "sells": [{"price": "0.55", "size": "150"}]
        }))
        .unwrap();

        let normalized = parse_book(&book).unwrap();
        assert_eq!(normalized.bids.len(), 1);
        assert_eq!(normalized.asks.len(), 1);
        assert_eq!(normalized.as_of.timestamp_millis(), 1704067200000);
    }

    #[test]
    fn test_normalize_raw_levels_drops_invalid() {
        let levels = vec![
            RawLevel { price: "0.45".into(), size: "100".into() },
            RawLevel { price: "-0.1".into(), size: "100".into() },
            RawLevel { price: "1.5".into(), size: "100".into() },
            RawLevel { price: "0.50".into(), size: "0".into() },
            RawLevel { price: "oops".into(), size: "100".into() },
        ];
        let normalized = normalize_raw_levels(&levels);
        assert_eq!(normalized.len(), 1);
        assert_eq!(normalized[0].price, dec!(0.45));
    }

    #[test]
    fn test_parse_book_side_labels() {
        assert_eq!(parse_book_side("BUY"), Some(BookSide::Bid));
        assert_eq!(parse_book_side("bids"), Some(BookSide::Bid));
        assert_eq!(parse_book_side("Sell"), Some(BookSide::Ask));
        assert_eq!(parse_book_side("asks"), Some(BookSide::Ask));
        assert_eq!(parse_book_side("hold"), None);
    }

    #[test]
    fn test_canonical_wallet_falls_back_to_user() {
        let mut raw = trade_fixture();
        raw.proxy_wallet = None;
        raw.user = Some("0xOWNER".to_string());
        assert_eq!(canonical_wallet(&raw).as_deref(), Some("0xowner"));
    }
}
