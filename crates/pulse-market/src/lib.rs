//! Polymarket upstream integration for the polypulse pipeline.
//!
//! This crate provides:
//! - A rate-paced, retrying HTTP request executor shared by all REST clients
//! - Gamma (discovery), data-API (trades/OI/positions) and CLOB (books)
//!   clients with schema-drift-tolerant normalizers
//! - The CLOB market-channel websocket consumer with snapshot healing
//! - The in-memory latest-orderbook cache

pub mod book_cache;
pub mod clob;
pub mod data_api;
pub mod gamma;
pub mod http;
pub mod parse;
pub mod types;
pub mod ws;

pub use book_cache::{BookCache, BookMeta, CachedBook, LevelChange};
pub use clob::{ClobClient, DEFAULT_CLOB_BASE};
pub use data_api::{DataApiClient, TradesQuery, DEFAULT_DATA_API_BASE};
pub use gamma::{GammaClient, DEFAULT_GAMMA_BASE};
pub use http::{HttpError, HttpPool, HttpPoolConfig, PoolStatsSnapshot};
pub use parse::{parse_book, parse_market, parse_trade, trade_dedupe_key, NormalizedBook};
pub use ws::{ConnectionState, MarketStream, MarketStreamConfig, WsError, WsStats, DEFAULT_WS_URL};
