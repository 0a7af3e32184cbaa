//! CLOB market-channel websocket consumer.
//!
//! Maintains one logical connection subscribed to the tracked universe's
//! token IDs, applies `book` snapshots and `price_change` deltas to the
//! shared [`BookCache`], and heals the cache from REST snapshots after every
//! (re)connect and on a fixed interval to recover from missed deltas.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use rand::Rng;
use thiserror::Error;
use tokio::sync::{broadcast, watch};
use tokio::time::{interval, timeout};
use tokio_tungstenite::{
    connect_async,
    tungstenite::{protocol::Message, Error as TungsteniteError},
};
use tracing::{debug, info, warn};

use pulse_common::value::parse_datetime_str;

use crate::book_cache::{BookCache, LevelChange};
use crate::clob::ClobClient;
use crate::parse::{parse_book, parse_book_side};
use crate::types::{
    ClobBook, GenericMessage, PriceChangeMessage, SubscribeMessage, SubscriptionOp,
    TickSizeChangeMessage,
};

/// Default market channel URL.
pub const DEFAULT_WS_URL: &str = "wss://ws-subscriptions-clob.polymarket.com/ws/market";

/// Errors that end a websocket session.
#[derive(Debug, Error)]
pub enum WsError {
    #[error("connection failed: {0}")]
    Connection(String),

    #[error("websocket error: {0}")]
    WebSocket(#[from] TungsteniteError),

    #[error("connection timeout")]
    Timeout,

    #[error("stream ended unexpectedly")]
    StreamEnded,
}

/// Connection lifecycle. `Draining` is the only terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnectionState {
    Disconnected = 0,
    Connecting = 1,
    Subscribing = 2,
    Live = 3,
    Draining = 4,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Subscribing => "subscribing",
            ConnectionState::Live => "live",
            ConnectionState::Draining => "draining",
        }
    }

    fn from_u8(value: u8) -> Self {
        match value {
            1 => ConnectionState::Connecting,
            2 => ConnectionState::Subscribing,
            3 => ConnectionState::Live,
            4 => ConnectionState::Draining,
            _ => ConnectionState::Disconnected,
        }
    }
}

/// Connection state and subscription count, shared with the metrics
/// collector.
#[derive(Debug, Default)]
pub struct WsStats {
    state: AtomicU8,
    subscribed: AtomicUsize,
}

impl WsStats {
    pub fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::Relaxed))
    }

    pub fn subscribed_count(&self) -> usize {
        self.subscribed.load(Ordering::Relaxed)
    }

    fn set_state(&self, state: ConnectionState) {
        self.state.store(state as u8, Ordering::Relaxed);
    }

    fn set_subscribed(&self, count: usize) {
        self.subscribed.store(count, Ordering::Relaxed);
    }
}

/// Configuration for the market stream.
#[derive(Debug, Clone)]
pub struct MarketStreamConfig {
    /// Primary market channel URL.
    pub url: String,
    /// Tried in order when the primary keeps failing.
    pub fallback_urls: Vec<String>,
    /// Cap on subscribed token IDs.
    pub max_assets: usize,
    /// Ping cadence to keep the connection alive.
    pub ping_interval: Duration,
    /// REST heal cadence while live.
    pub heal_interval: Duration,
    pub connect_timeout: Duration,
    pub initial_reconnect_delay: Duration,
    pub max_reconnect_delay: Duration,
}

impl Default for MarketStreamConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_WS_URL.to_string(),
            fallback_urls: Vec::new(),
            max_assets: 400,
            ping_interval: Duration::from_secs(10),
            heal_interval: Duration::from_secs(300),
            connect_timeout: Duration::from_secs(10),
            initial_reconnect_delay: Duration::from_secs(1),
            max_reconnect_delay: Duration::from_secs(60),
        }
    }
}

/// Long-lived market channel consumer.
pub struct MarketStream {
    config: MarketStreamConfig,
    cache: Arc<BookCache>,
    clob: Arc<ClobClient>,
    /// Tracked token universe, updated by the universe job.
    universe: watch::Receiver<Vec<String>>,
    stats: Arc<WsStats>,
}

impl MarketStream {
    pub fn new(
        config: MarketStreamConfig,
        cache: Arc<BookCache>,
        clob: Arc<ClobClient>,
        universe: watch::Receiver<Vec<String>>,
    ) -> Self {
        Self {
            config,
            cache,
            clob,
            universe,
            stats: Arc::new(WsStats::default()),
        }
    }

    /// Shared connection-state handle for the metrics snapshot.
    pub fn stats(&self) -> Arc<WsStats> {
        Arc::clone(&self.stats)
    }

    /// Current subscription target: the tracked universe capped at
    /// `max_assets`.
    fn target_tokens(&self) -> Vec<String> {
        let tokens = self.universe.borrow().clone();
        if tokens.len() > self.config.max_assets {
            tokens[..self.config.max_assets].to_vec()
        } else {
            tokens
        }
    }

    /// Run with automatic reconnection until shutdown.
    pub async fn run(mut self, mut shutdown: broadcast::Receiver<()>) -> Result<(), WsError> {
        let mut reconnect_delay = self.config.initial_reconnect_delay;
        let urls: Vec<String> = std::iter::once(self.config.url.clone())
            .chain(self.config.fallback_urls.iter().cloned())
            .collect();
        let mut url_index = 0usize;

        loop {
            if shutdown.try_recv().is_ok() {
                self.stats.set_state(ConnectionState::Draining);
                info!(component = "clob_ws", "shutdown signal received");
                return Ok(());
            }

            if self.target_tokens().is_empty() {
                self.stats.set_state(ConnectionState::Disconnected);
                debug!(component = "clob_ws", "no tracked tokens, waiting");
                tokio::select! {
                    _ = tokio::time::sleep(Duration::from_secs(5)) => continue,
                    _ = shutdown.recv() => {
                        self.stats.set_state(ConnectionState::Draining);
                        return Ok(());
                    }
                }
            }

            let url = urls[url_index % urls.len()].clone();
            match self.run_connection(&url, &mut shutdown).await {
                Ok(()) => {
                    self.stats.set_state(ConnectionState::Draining);
                    info!(component = "clob_ws", "clean shutdown");
                    return Ok(());
                }
                Err(e) => {
                    self.stats.set_state(ConnectionState::Disconnected);
                    self.stats.set_subscribed(0);
                    let jitter = rand::thread_rng()
                        .gen_range(0..=reconnect_delay.as_millis().max(1) as u64 / 2);
                    let delay = reconnect_delay + Duration::from_millis(jitter);
                    warn!(
                        component = "clob_ws",
                        error = %e,
                        url = %url,
                        delay_ms = delay.as_millis() as u64,
                        "websocket session ended, reconnecting"
                    );

                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = shutdown.recv() => {
                            self.stats.set_state(ConnectionState::Draining);
                            return Ok(());
                        }
                    }

                    reconnect_delay = (reconnect_delay * 2).min(self.config.max_reconnect_delay);
                    url_index += 1;
                }
            }
        }
    }

    /// Run a single websocket session: connect, subscribe, heal, stream.
    async fn run_connection(
        &mut self,
        url: &str,
        shutdown: &mut broadcast::Receiver<()>,
    ) -> Result<(), WsError> {
        // Select on a clone so the change future does not hold a borrow of
        // `self` across the message handlers.
        let mut universe_rx = self.universe.clone();

        self.stats.set_state(ConnectionState::Connecting);
        info!(component = "clob_ws", url, "connecting to market channel");

        let connect_result = timeout(self.config.connect_timeout, connect_async(url)).await;
        let (ws_stream, _response) = match connect_result {
            Ok(Ok((stream, response))) => (stream, response),
            Ok(Err(e)) => return Err(WsError::Connection(e.to_string())),
            Err(_) => return Err(WsError::Timeout),
        };

        let (mut write, mut read) = ws_stream.split();

        self.stats.set_state(ConnectionState::Subscribing);
        let tokens = self.target_tokens();
        let subscribe = SubscribeMessage {
            assets_ids: tokens.clone(),
            msg_type: "market",
        };
        let msg = serde_json::to_string(&subscribe)
            .map_err(|e| WsError::Connection(e.to_string()))?;
        write.send(Message::Text(msg)).await?;

        let mut subscribed: HashSet<String> = tokens.iter().cloned().collect();
        self.stats.set_subscribed(subscribed.len());
        self.stats.set_state(ConnectionState::Live);
        info!(
            component = "clob_ws",
            subscriptions = subscribed.len(),
            "subscribed to market channel"
        );

        // Heal immediately after (re)subscribing to recover missed deltas.
        self.heal(&tokens).await;

        let mut ping_timer = interval(self.config.ping_interval);
        let mut heal_timer = interval(self.config.heal_interval);
        heal_timer.reset(); // the initial heal just ran

        loop {
            tokio::select! {
                msg = read.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => self.handle_message(&text),
                        Some(Ok(Message::Ping(data))) => {
                            write.send(Message::Pong(data)).await?;
                        }
                        Some(Ok(Message::Pong(_))) => {}
                        Some(Ok(Message::Close(frame))) => {
                            info!(component = "clob_ws", ?frame, "server closed connection");
                            return Err(WsError::StreamEnded);
                        }
                        Some(Err(e)) => return Err(WsError::WebSocket(e)),
                        None => return Err(WsError::StreamEnded),
                        _ => {}
                    }
                }

                _ = ping_timer.tick() => {
                    write.send(Message::Text("PING".to_string())).await?;
                }

                _ = heal_timer.tick() => {
                    let tokens: Vec<String> = subscribed.iter().cloned().collect();
                    self.heal(&tokens).await;
                }

                changed = universe_rx.changed() => {
                    if changed.is_err() {
                        return Err(WsError::StreamEnded);
                    }
                    self.reconcile_subscriptions(&mut write, &mut subscribed).await?;
                }

                _ = shutdown.recv() => {
                    self.stats.set_state(ConnectionState::Draining);
                    let _ = write.send(Message::Close(None)).await;
                    info!(component = "clob_ws", "draining");
                    return Ok(());
                }
            }
        }
    }

    /// Align the live subscription set with the tracked universe without
    /// disturbing unchanged subscriptions.
    async fn reconcile_subscriptions<S>(
        &self,
        write: &mut S,
        subscribed: &mut HashSet<String>,
    ) -> Result<(), WsError>
    where
        S: futures_util::Sink<Message, Error = TungsteniteError> + Unpin,
    {
        let target: HashSet<String> = self.target_tokens().into_iter().collect();

        let added: Vec<String> = target.difference(subscribed).cloned().collect();
        let removed: Vec<String> = subscribed.difference(&target).cloned().collect();

        if !added.is_empty() {
            let op = SubscriptionOp {
                assets_ids: added.clone(),
                operation: "subscribe",
            };
            let msg =
                serde_json::to_string(&op).map_err(|e| WsError::Connection(e.to_string()))?;
            write.send(Message::Text(msg)).await.map_err(|_| WsError::StreamEnded)?;
            for token in &added {
                subscribed.insert(token.clone());
            }
            // New tokens have no cached book yet; heal them right away.
            self.heal(&added).await;
        }

        if !removed.is_empty() {
            let op = SubscriptionOp {
                assets_ids: removed.clone(),
                operation: "unsubscribe",
            };
            let msg =
                serde_json::to_string(&op).map_err(|e| WsError::Connection(e.to_string()))?;
            write.send(Message::Text(msg)).await.map_err(|_| WsError::StreamEnded)?;
            for token in &removed {
                subscribed.remove(token);
            }
        }

        if !added.is_empty() || !removed.is_empty() {
            info!(
                component = "clob_ws",
                added = added.len(),
                removed = removed.len(),
                subscriptions = subscribed.len(),
                "reconciled subscriptions"
            );
            self.stats.set_subscribed(subscribed.len());
        }

        Ok(())
    }

    /// Refresh cached books from REST snapshots.
    async fn heal(&self, token_ids: &[String]) {
        if token_ids.is_empty() {
            return;
        }
        match self.clob.books(token_ids).await {
            Ok(books) => {
                let count = books.len();
                for book in books {
                    self.cache.apply_snapshot(book);
                }
                debug!(component = "clob_ws", books = count, "healed books from REST");
            }
            Err(e) => {
                warn!(component = "clob_ws", error = %e, "book heal failed");
            }
        }
    }

    /// Dispatch one text frame. Arrays of events are handled element-wise;
    /// unknown or optional message types are ignored.
    fn handle_message(&self, text: &str) {
        let trimmed = text.trim();
        if trimmed.is_empty() || trimmed.eq_ignore_ascii_case("pong") {
            return;
        }

        if trimmed.starts_with('[') {
            if let Ok(items) = serde_json::from_str::<Vec<serde_json::Value>>(trimmed) {
                for item in items {
                    if let Ok(raw) = serde_json::to_string(&item) {
                        self.handle_event(&raw);
                    }
                }
            }
            return;
        }

        self.handle_event(trimmed);
    }

    fn handle_event(&self, text: &str) {
        let generic: GenericMessage = match serde_json::from_str(text) {
            Ok(m) => m,
            Err(_) => {
                debug!(component = "clob_ws", "non-JSON frame ignored");
                return;
            }
        };

        match generic.event_type.as_deref() {
            Some("book") => self.handle_book(text),
            Some("price_change") => self.handle_price_change(text),
            Some("tick_size_change") => self.handle_tick_size_change(text),
            // Optional / feature-flagged message types.
            Some("last_trade_price") | Some("best_bid_ask") | Some("new_market")
            | Some("market_resolved") => {
                debug!(component = "clob_ws", event_type = ?generic.event_type, "ignoring optional message");
            }
            other => {
                debug!(component = "clob_ws", event_type = ?other, "unknown message type");
            }
        }
    }

    fn handle_book(&self, text: &str) {
        let raw: ClobBook = match serde_json::from_str(text) {
            Ok(b) => b,
            Err(e) => {
                warn!(component = "clob_ws", error = %e, "failed to parse book message");
                return;
            }
        };
        if let Some(book) = parse_book(&raw) {
            self.cache.apply_snapshot(book);
        }
    }

    fn handle_price_change(&self, text: &str) {
        let msg: PriceChangeMessage = match serde_json::from_str(text) {
            Ok(m) => m,
            Err(e) => {
                warn!(component = "clob_ws", error = %e, "failed to parse price_change message");
                return;
            }
        };

        let as_of = msg
            .timestamp
            .as_deref()
            .and_then(parse_datetime_str)
            .unwrap_or_else(Utc::now);

        let mut changes = Vec::with_capacity(msg.price_changes.len());
        for change in &msg.price_changes {
            let side = match parse_book_side(&change.side) {
                Some(side) => side,
                None => continue,
            };
            let (price, size) = match (change.price.parse(), change.size.parse()) {
                (Ok(p), Ok(s)) => (p, s),
                _ => continue,
            };
            changes.push(LevelChange { side, price, size });
        }

        self.cache.apply_price_change(&msg.asset_id, &changes, as_of);
    }

    fn handle_tick_size_change(&self, text: &str) {
        let msg: TickSizeChangeMessage = match serde_json::from_str(text) {
            Ok(m) => m,
            Err(e) => {
                warn!(component = "clob_ws", error = %e, "failed to parse tick_size_change");
                return;
            }
        };
        if let Some(tick) = pulse_common::value::to_decimal(msg.new_tick_size.as_ref()) {
            self.cache.set_tick_size(&msg.asset_id, tick);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::HttpPool;
    use rust_decimal_macros::dec;

    fn test_stream(tokens: Vec<String>) -> MarketStream {
        let pool = HttpPool::with_defaults().unwrap();
        let clob = Arc::new(ClobClient::new(pool, "http://127.0.0.1:0"));
        let (_tx, rx) = watch::channel(tokens);
        MarketStream::new(
            MarketStreamConfig::default(),
            Arc::new(BookCache::new()),
            clob,
            rx,
        )
    }

    #[test]
    fn test_connection_state_round_trip() {
        for state in [
            ConnectionState::Disconnected,
            ConnectionState::Connecting,
            ConnectionState::Subscribing,
            ConnectionState::Live,
            ConnectionState::Draining,
        ] {
            assert_eq!(ConnectionState::from_u8(state as u8), state);
        }
    }

    #[test]
    fn test_target_tokens_caps_at_max_assets() {
        let tokens: Vec<String> = (0..500).map(|i| format!("tok{}", i)).collect();
        let stream = test_stream(tokens);
        assert_eq!(stream.target_tokens().len(), 400);
    }

    #[test]
    fn test_handle_book_message_updates_cache() {
        let stream = test_stream(vec!["tok_yes".to_string()]);
        stream.handle_message(
            r#"{
                "event_type": "book",
                "market": "0xcond",
                "asset_id": "tok_yes",
                "timestamp": "1704067200000",
                "hash": "h",
                "bids": [{"price": "0.45", "size": "100"}],
                "asks": [{"price": "0.55", "size": "150"}]
            }"#,
        );

        let book = stream.cache.get("tok_yes").unwrap();
        assert_eq!(book.best_bid().unwrap().price, dec!(0.45));
        assert_eq!(book.best_ask().unwrap().price, dec!(0.55));
    }

    #[test]
    fn test_handle_price_change_applies_delta() {
        let stream = test_stream(vec!["tok_yes".to_string()]);
        stream.handle_message(
            r#"{
                "event_type": "book",
                "market": "0xcond",
                "asset_id": "tok_yes",
                "timestamp": "1704067200000",
                "bids": [{"price": "0.45", "size": "100"}],
                "asks": [{"price": "0.55", "size": "150"}]
            }"#,
        );
        stream.handle_message(
            r#"{
                "event_type": "price_change",
                "asset_id": "tok_yes",
                "market": "0xcond",
                "timestamp": "1704067201000",
                "price_changes": [
                    {"price": "0.55", "size": "0", "side": "SELL"},
                    {"price": "0.56", "size": "75", "side": "SELL"}
                ]
            }"#,
        );

        let book = stream.cache.get("tok_yes").unwrap();
        assert_eq!(book.best_ask().unwrap().price, dec!(0.56));
        assert_eq!(book.best_ask().unwrap().size, dec!(75));
    }

    #[test]
    fn test_handle_array_frame() {
        let stream = test_stream(vec!["tok_yes".to_string()]);
        stream.handle_message(
            r#"[{
                "event_type": "book",
                "market": "0xcond",
                "asset_id": "tok_yes",
                "timestamp": "1704067200000",
                "bids": [{"price": "0.40", "size": "10"}],
                "asks": [{"price": "0.60", "size": "10"}]
            }]"#,
        );
        assert!(stream.cache.get("tok_yes").is_some());
    }

    #[test]
    fn test_tick_size_change_updates_meta() {
        let stream = test_stream(vec!["tok_yes".to_string()]);
        stream.handle_message(
            r#"{
                "event_type": "book",
                "market": "0xcond",
                "asset_id": "tok_yes",
                "timestamp": "1704067200000",
                "bids": [{"price": "0.45", "size": "100"}],
                "asks": []
            }"#,
        );
        stream.handle_message(
            r#"{"event_type": "tick_size_change", "asset_id": "tok_yes", "new_tick_size": "0.001"}"#,
        );
        assert_eq!(
            stream.cache.get("tok_yes").unwrap().meta.tick_size,
            Some(dec!(0.001))
        );
    }

    #[test]
    fn test_unknown_message_ignored() {
        let stream = test_stream(vec![]);
        stream.handle_message(r#"{"event_type": "mystery", "data": 1}"#);
        stream.handle_message("PONG");
        stream.handle_message("");
        assert!(stream.cache.is_empty());
    }
}
