//! Shared types and utilities for the polypulse research pipeline.
//!
//! This crate contains:
//! - Domain types (sides, signal types, market/trade/wallet records)
//! - Duck-typed parsing helpers for loosely-typed upstream payloads

pub mod types;
pub mod value;

pub use types::{
    resolve_binary_tokens, AlertStatus, BookLevel, BookSide, MarketRecord, MetricSnapshot,
    NewSignal, Side, SignalRow, SignalType, TradeRecord, WalletRecord,
};
pub use value::{
    parse_datetime, parse_datetime_str, parse_jsonish_array, safe_lower, to_bool, to_decimal,
    to_string_opt,
};
