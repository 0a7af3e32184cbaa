//! Shared types for the polypulse research pipeline.
//!
//! CRITICAL: All prices, sizes and notionals use `rust_decimal::Decimal`.
//! NEVER use f64 for financial math.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Trade side as reported by the data API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Buy => "BUY",
            Side::Sell => "SELL",
        }
    }
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for Side {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "BUY" => Ok(Side::Buy),
            "SELL" => Ok(Side::Sell),
            _ => Err(format!("Unknown trade side: {}", s)),
        }
    }
}

/// Orderbook side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum BookSide {
    Bid,
    Ask,
}

impl BookSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            BookSide::Bid => "BID",
            BookSide::Ask => "ASK",
        }
    }
}

impl std::fmt::Display for BookSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Signal classes emitted by the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SignalType {
    LargeTakerTrade,
    LargeNewWalletTrade,
    DormantWalletReactivation,
    ArbBuyBoth,
    NewMarket,
}

impl SignalType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SignalType::LargeTakerTrade => "LARGE_TAKER_TRADE",
            SignalType::LargeNewWalletTrade => "LARGE_NEW_WALLET_TRADE",
            SignalType::DormantWalletReactivation => "DORMANT_WALLET_REACTIVATION",
            SignalType::ArbBuyBoth => "ARB_BUY_BOTH",
            SignalType::NewMarket => "NEW_MARKET",
        }
    }
}

impl std::fmt::Display for SignalType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for SignalType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "LARGE_TAKER_TRADE" => Ok(SignalType::LargeTakerTrade),
            "LARGE_NEW_WALLET_TRADE" => Ok(SignalType::LargeNewWalletTrade),
            "DORMANT_WALLET_REACTIVATION" => Ok(SignalType::DormantWalletReactivation),
            "ARB_BUY_BOTH" => Ok(SignalType::ArbBuyBoth),
            "NEW_MARKET" => Ok(SignalType::NewMarket),
            _ => Err(format!("Unknown signal type: {}", s)),
        }
    }
}

/// Outcome of one alert delivery attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AlertStatus {
    Sent,
    Failed,
    Suppressed,
}

impl AlertStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertStatus::Sent => "SENT",
            AlertStatus::Failed => "FAILED",
            AlertStatus::Suppressed => "SUPPRESSED",
        }
    }
}

impl std::str::FromStr for AlertStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "SENT" => Ok(AlertStatus::Sent),
            "FAILED" => Ok(AlertStatus::Failed),
            "SUPPRESSED" => Ok(AlertStatus::Suppressed),
            _ => Err(format!("Unknown alert status: {}", s)),
        }
    }
}

/// A single aggregated level in an orderbook (price + size).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookLevel {
    /// Price in collateral units (0.00 to 1.00 for binary outcome tokens).
    pub price: Decimal,
    /// Quantity available at this price.
    pub size: Decimal,
}

impl BookLevel {
    pub fn new(price: Decimal, size: Decimal) -> Self {
        Self { price, size }
    }
}

/// A normalized market record, as produced by the Gamma events parser.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketRecord {
    /// Resolution condition ID (0x-prefixed hex); primary identity.
    pub condition_id: String,
    /// Platform market ID, when present.
    pub market_id: Option<String>,
    /// Parent event ID.
    pub event_id: Option<String>,
    pub slug: Option<String>,
    pub question: Option<String>,
    pub title: Option<String>,
    pub active: Option<bool>,
    pub closed: Option<bool>,
    /// Denormalized tag IDs from the parent event.
    pub tag_ids: Vec<i64>,
    pub neg_risk: Option<bool>,
    /// Ordered outcome labels (e.g. ["Yes", "No"]).
    pub outcomes: Vec<String>,
    /// Ordered outcome token IDs, aligned with `outcomes`.
    pub token_ids: Vec<String>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub last_seen_at: DateTime<Utc>,
    /// Indexed volume at observation time (prefer the numeric field).
    pub volume: Option<Decimal>,
    /// Indexed liquidity at observation time.
    pub liquidity: Option<Decimal>,
}

impl MarketRecord {
    /// Resolve the (YES, NO) token pair for a binary market.
    ///
    /// Returns `None` unless exactly two token IDs are known. When the
    /// outcome labels identify yes/no, tokens follow the labels; otherwise
    /// positional order is assumed.
    pub fn binary_tokens(&self) -> Option<(String, String)> {
        resolve_binary_tokens(&self.token_ids, &self.outcomes)
    }
}

/// Resolve (YES, NO) token IDs from an ordered token list plus outcome labels.
pub fn resolve_binary_tokens(
    token_ids: &[String],
    outcomes: &[String],
) -> Option<(String, String)> {
    if token_ids.len() != 2 {
        return None;
    }
    if outcomes.len() == 2 {
        let lower: Vec<String> = outcomes.iter().map(|o| o.trim().to_lowercase()).collect();
        if let (Some(yes), Some(no)) = (
            lower.iter().position(|o| o == "yes"),
            lower.iter().position(|o| o == "no"),
        ) {
            return Some((token_ids[yes].clone(), token_ids[no].clone()));
        }
    }
    Some((token_ids[0].clone(), token_ids[1].clone()))
}

/// A normalized taker trade, as produced by the data-API parser.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeRecord {
    /// Dedupe identity: `tx:<hash>` or `hash:<sha256 of fields>`.
    pub trade_pk: String,
    pub transaction_hash: Option<String>,
    /// Canonical wallet (proxy wallet preferred).
    pub wallet: Option<String>,
    pub condition_id: String,
    pub token_id: String,
    pub side: Side,
    pub price: Decimal,
    pub size: Decimal,
    pub notional_usd: Decimal,
    /// Upstream trade time.
    pub trade_ts: DateTime<Utc>,
    /// Raw upstream object, retained as evidence.
    pub raw: serde_json::Value,
}

/// Wallet state accumulated from observed trades.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalletRecord {
    pub wallet: String,
    /// First observation on this platform (not on-chain age).
    pub first_seen_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
    pub first_trade_ts: Option<DateTime<Utc>>,
    pub lifetime_notional_usd: Decimal,
    /// Position tracking horizon after a large trade; extended, never shortened.
    pub tracked_until: Option<DateTime<Utc>>,
}

/// One row of the market metrics time series.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricSnapshot {
    pub condition_id: String,
    pub ts: DateTime<Utc>,
    pub volume: Option<Decimal>,
    pub liquidity: Option<Decimal>,
    pub open_interest: Option<Decimal>,
    pub best_bid_yes: Option<Decimal>,
    pub best_ask_yes: Option<Decimal>,
    pub best_bid_no: Option<Decimal>,
    pub best_ask_no: Option<Decimal>,
    pub spread_yes: Option<Decimal>,
    pub spread_no: Option<Decimal>,
}

impl Default for MetricSnapshot {
    fn default() -> Self {
        Self {
            condition_id: String::new(),
            ts: Utc::now(),
            volume: None,
            liquidity: None,
            open_interest: None,
            best_bid_yes: None,
            best_ask_yes: None,
            best_bid_no: None,
            best_ask_no: None,
            spread_yes: None,
            spread_no: None,
        }
    }
}

/// A signal event ready for insertion.
#[derive(Debug, Clone)]
pub struct NewSignal {
    pub signal_type: SignalType,
    pub dedupe_key: String,
    pub severity: u8,
    pub wallet: Option<String>,
    pub condition_id: Option<String>,
    pub payload: serde_json::Value,
}

/// A persisted signal event.
#[derive(Debug, Clone)]
pub struct SignalRow {
    pub id: i64,
    pub signal_type: SignalType,
    pub dedupe_key: String,
    pub created_at: DateTime<Utc>,
    pub severity: u8,
    pub wallet: Option<String>,
    pub condition_id: Option<String>,
    pub payload: serde_json::Value,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_side_round_trip() {
        assert_eq!("BUY".parse::<Side>().unwrap(), Side::Buy);
        assert_eq!("sell".parse::<Side>().unwrap(), Side::Sell);
        assert_eq!(Side::Buy.as_str(), "BUY");
        assert!("HOLD".parse::<Side>().is_err());
    }

    #[test]
    fn test_signal_type_round_trip() {
        for signal_type in [
            SignalType::LargeTakerTrade,
            SignalType::LargeNewWalletTrade,
            SignalType::DormantWalletReactivation,
            SignalType::ArbBuyBoth,
            SignalType::NewMarket,
        ] {
            assert_eq!(
                signal_type.as_str().parse::<SignalType>().unwrap(),
                signal_type
            );
        }
    }

    #[test]
    fn test_resolve_binary_tokens_by_label() {
        let tokens = vec!["t_no".to_string(), "t_yes".to_string()];
        let outcomes = vec!["No".to_string(), "Yes".to_string()];

        let (yes, no) = resolve_binary_tokens(&tokens, &outcomes).unwrap();
        assert_eq!(yes, "t_yes");
        assert_eq!(no, "t_no");
    }

    #[test]
    fn test_resolve_binary_tokens_positional_fallback() {
        let tokens = vec!["a".to_string(), "b".to_string()];
        let outcomes = vec!["Over".to_string(), "Under".to_string()];

        let (yes, no) = resolve_binary_tokens(&tokens, &outcomes).unwrap();
        assert_eq!(yes, "a");
        assert_eq!(no, "b");
    }

    #[test]
    fn test_resolve_binary_tokens_rejects_non_binary() {
        let tokens = vec!["a".to_string(), "b".to_string(), "c".to_string()];
        assert!(resolve_binary_tokens(&tokens, &[]).is_none());
        assert!(resolve_binary_tokens(&[], &[]).is_none());
    }
}
