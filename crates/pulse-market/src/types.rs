//! Wire types for the Polymarket REST and WebSocket upstreams.
//!
//! Fields that arrive with unstable types (JSON-string-or-array,
//! number-or-string) are kept as raw `serde_json::Value` and normalized by
//! the parsers in [`crate::parse`].

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Market data within a Gamma events response.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GammaMarket {
    pub id: Option<String>,
    pub question: Option<String>,
    pub condition_id: Option<String>,
    pub slug: Option<String>,
    /// Token IDs: JSON array or JSON-encoded string array.
    pub clob_token_ids: Option<Value>,
    /// Outcome labels: JSON array or JSON-encoded string array.
    pub outcomes: Option<Value>,
    /// String form of volume; `volume_num` is preferred when present.
    pub volume: Option<Value>,
    pub volume_num: Option<Value>,
    /// String form of liquidity; `liquidity_num` is preferred when present.
    pub liquidity: Option<Value>,
    pub liquidity_num: Option<Value>,
    pub neg_risk: Option<Value>,
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    pub active: Option<bool>,
    pub closed: Option<bool>,
}

/// Event data from the Gamma events endpoint.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GammaEvent {
    pub id: Option<String>,
    pub title: Option<String>,
    pub slug: Option<String>,
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    pub active: Option<bool>,
    pub closed: Option<bool>,
    pub neg_risk: Option<Value>,
    pub markets: Option<Vec<GammaMarket>>,
    pub tags: Option<Vec<GammaTag>>,
}

/// Tag from the Gamma tags endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct GammaTag {
    /// Numeric ID, sometimes serialized as a string.
    pub id: Option<Value>,
    pub label: Option<String>,
    pub slug: Option<String>,
}

/// Sport entry from the Gamma sports endpoint; `tags` is a comma-joined
/// string of tag IDs.
#[derive(Debug, Clone, Deserialize)]
pub struct GammaSport {
    pub id: Option<Value>,
    pub label: Option<String>,
    pub tags: Option<String>,
}

/// Taker trade from the data API trades endpoint.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataApiTrade {
    pub proxy_wallet: Option<String>,
    /// Fallback identity when no proxy wallet is reported.
    pub user: Option<String>,
    pub condition_id: Option<String>,
    /// Outcome token ID.
    pub asset: Option<String>,
    pub side: Option<String>,
    pub size: Option<Value>,
    pub price: Option<Value>,
    /// Millisecond epoch, as number or string.
    pub timestamp: Option<Value>,
    pub slug: Option<String>,
    pub title: Option<String>,
    pub event_slug: Option<String>,
    pub outcome: Option<String>,
    pub transaction_hash: Option<String>,
}

/// Open interest entry from the data API.
#[derive(Debug, Clone, Deserialize)]
pub struct OpenInterestEntry {
    /// Condition ID.
    pub market: Option<String>,
    pub value: Option<Value>,
}

/// Position entry from the data API positions endpoint.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PositionEntry {
    pub condition_id: Option<String>,
    pub size: Option<Value>,
    pub avg_price: Option<Value>,
    pub outcome: Option<String>,
}

/// One price level in a REST or WS book payload.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RawLevel {
    pub price: String,
    pub size: String,
}

/// Orderbook from the CLOB REST books endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct ClobBook {
    /// Condition ID.
    pub market: Option<String>,
    pub asset_id: Option<String>,
    /// RFC3339 on REST, millisecond-epoch string on WS.
    pub timestamp: Option<String>,
    pub hash: Option<String>,
    pub bids: Option<Vec<RawLevel>>,
    pub asks: Option<Vec<RawLevel>>,
    /// WS variants of the side labels.
    pub buys: Option<Vec<RawLevel>>,
    pub sells: Option<Vec<RawLevel>>,
    pub tick_size: Option<Value>,
    pub min_order_size: Option<Value>,
    pub neg_risk: Option<Value>,
}

/// Subscription message for the CLOB market channel.
#[derive(Debug, Serialize)]
pub struct SubscribeMessage {
    pub assets_ids: Vec<String>,
    #[serde(rename = "type")]
    pub msg_type: &'static str,
}

/// Dynamic subscribe/unsubscribe operation on a live connection.
#[derive(Debug, Serialize)]
pub struct SubscriptionOp {
    pub assets_ids: Vec<String>,
    pub operation: &'static str,
}

/// Price change entry (orderbook delta) from the market channel.
#[derive(Debug, Clone, Deserialize)]
pub struct PriceChange {
    #[serde(default)]
    pub asset_id: Option<String>,
    pub price: String,
    pub size: String,
    pub side: String,
}

/// Price change message from the market channel.
#[derive(Debug, Clone, Deserialize)]
pub struct PriceChangeMessage {
    pub event_type: String,
    pub asset_id: String,
    pub market: Option<String>,
    pub timestamp: Option<String>,
    pub price_changes: Vec<PriceChange>,
}

/// Tick size change message from the market channel.
#[derive(Debug, Clone, Deserialize)]
pub struct TickSizeChangeMessage {
    pub event_type: String,
    pub asset_id: String,
    pub new_tick_size: Option<Value>,
    pub timestamp: Option<String>,
}

/// Minimal shape used to dispatch on `event_type`.
#[derive(Debug, Deserialize)]
pub struct GenericMessage {
    pub event_type: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gamma_event_parsing() {
        let json = r#"{
            "id": "event123",
            "title": "Will it happen?",
            "slug": "will-it-happen",
            "startDate": "2025-01-01T00:00:00Z",
            "endDate": "2025-06-01T00:00:00Z",
            "active": true,
            "closed": false,
            "negRisk": false,
            "markets": [{
                "id": "market123",
                "question": "Will it happen?",
                "conditionId": "0xabc",
                "clobTokenIds": "[\"token1\", \"token2\"]",
                "outcomes": "[\"Yes\", \"No\"]",
                "volumeNum": 125000.5,
                "volume": "125000.5",
                "liquidity": "8000",
                "active": true,
                "closed": false
            }],
            "tags": [{"id": 7, "label": "Politics", "slug": "politics"}]
        }"#;

        let event: GammaEvent = serde_json::from_str(json).unwrap();
        assert_eq!(event.id.as_deref(), Some("event123"));
        let markets = event.markets.as_ref().unwrap();
        assert_eq!(markets.len(), 1);
        assert!(markets[0].clob_token_ids.is_some());
        assert!(markets[0].volume_num.is_some());
    }

    #[test]
    fn test_data_api_trade_parsing() {
        let json = r#"{
            "proxyWallet": "0xA11CE",
            "conditionId": "0xcond",
            "asset": "token-yes",
            "side": "BUY",
            "size": "20000",
            "price": 0.6,
            "timestamp": "1704067200000",
            "slug": "some-market",
            "title": "Some market",
            "transactionHash": "0xT1"
        }"#;

        let trade: DataApiTrade = serde_json::from_str(json).unwrap();
        assert_eq!(trade.proxy_wallet.as_deref(), Some("0xA11CE"));
        assert_eq!(trade.transaction_hash.as_deref(), Some("0xT1"));
    }

    #[test]
    fn test_clob_book_parsing_with_ws_side_labels() {
        let json = r#"{
            "market": "0xcond",
            "asset_id": "token-yes",
            "timestamp": "1704067200000",
            "hash": "abc",
            "buys": [{"price": "0.45", "size": "100"}],
            "sells": [{"price": "0.55", "size": "150"}]
        }"#;

        let book: ClobBook = serde_json::from_str(json).unwrap();
        assert!(book.bids.is_none());
        assert_eq!(book.buys.as_ref().unwrap().len(), 1);
        assert_eq!(book.sells.as_ref().unwrap().len(), 1);
    }

    #[test]
    fn test_subscribe_message_serialization() {
        let msg = SubscribeMessage {
            assets_ids: vec!["token1".to_string()],
            msg_type: "market",
        };
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("\"assets_ids\""));
        assert!(json.contains("\"type\":\"market\""));
    }

    #[test]
    fn test_price_change_message_parsing() {
        let json = r#"{
            "event_type": "price_change",
            "asset_id": "token1",
            "market": "0xcond",
            "timestamp": "1704067200000",
            "price_changes": [
                {"price": "0.46", "size": "50", "side": "SELL"}
            ]
        }"#;

        let msg: PriceChangeMessage = serde_json::from_str(json).unwrap();
        assert_eq!(msg.price_changes.len(), 1);
        assert_eq!(msg.price_changes[0].side, "SELL");
    }
}
