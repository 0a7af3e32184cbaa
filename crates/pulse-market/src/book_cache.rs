//! In-memory latest-orderbook cache, keyed by token ID.
//!
//! The cache is mastered in memory and written by two producers: the
//! market-channel websocket consumer (snapshots and deltas) and the polling
//! snapshot job. DashMap entry locks serialize mutation per token; readers
//! get a cloned, consistent snapshot.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use rust_decimal::Decimal;
use tracing::debug;

use pulse_common::{BookLevel, BookSide};

use crate::parse::NormalizedBook;

/// Book metadata carried alongside the levels.
#[derive(Debug, Clone, Default)]
pub struct BookMeta {
    pub condition_id: String,
    pub tick_size: Option<Decimal>,
    pub min_order_size: Option<Decimal>,
    pub neg_risk: Option<bool>,
    pub hash: Option<String>,
}

/// Latest aggregated book for a single token.
#[derive(Debug, Clone)]
pub struct CachedBook {
    /// Best first: prices strictly descending.
    pub bids: Vec<BookLevel>,
    /// Best first: prices strictly ascending.
    pub asks: Vec<BookLevel>,
    /// Upstream time of the last accepted mutation.
    pub as_of: DateTime<Utc>,
    pub meta: BookMeta,
}

impl CachedBook {
    pub fn best_bid(&self) -> Option<BookLevel> {
        self.bids.first().copied()
    }

    pub fn best_ask(&self) -> Option<BookLevel> {
        self.asks.first().copied()
    }

    /// Seconds since the book's upstream time, never negative.
    pub fn age_seconds(&self, now: DateTime<Utc>) -> i64 {
        (now - self.as_of).num_seconds().max(0)
    }
}

/// A single delta from a `price_change` message.
#[derive(Debug, Clone)]
pub struct LevelChange {
    pub side: BookSide,
    pub price: Decimal,
    /// New aggregated size at `price`; zero removes the level.
    pub size: Decimal,
}

/// In-memory mapping `token_id -> latest aggregated book`.
#[derive(Debug, Default)]
pub struct BookCache {
    books: DashMap<String, CachedBook>,
}

impl BookCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the stored levels for a token with a full snapshot.
    ///
    /// Snapshots replace monotonically: one with `as_of` at or before the
    /// stored book is dropped.
    pub fn apply_snapshot(&self, book: NormalizedBook) {
        let mut entry = self
            .books
            .entry(book.token_id.clone())
            .or_insert_with(|| CachedBook {
                bids: Vec::new(),
                asks: Vec::new(),
                as_of: DateTime::<Utc>::MIN_UTC,
                meta: BookMeta::default(),
            });

        if entry.as_of != DateTime::<Utc>::MIN_UTC && book.as_of <= entry.as_of {
            debug!(token_id = %book.token_id, "dropping stale book snapshot");
            return;
        }

        entry.bids = book.bids;
        entry.asks = book.asks;
        entry.as_of = book.as_of;
        entry.meta = BookMeta {
            condition_id: book.condition_id,
            tick_size: book.tick_size.or(entry.meta.tick_size),
            min_order_size: book.min_order_size.or(entry.meta.min_order_size),
            neg_risk: book.neg_risk.or(entry.meta.neg_risk),
            hash: book.hash,
        };
    }

    /// Apply delta changes to a token's book.
    ///
    /// Each change sets the aggregated size at its price (removing the
    /// level at zero) while keeping the side strictly sorted. Deltas with a
    /// stale `as_of` or for an unknown token are dropped.
    pub fn apply_price_change(
        &self,
        token_id: &str,
        changes: &[LevelChange],
        as_of: DateTime<Utc>,
    ) {
        let mut entry = match self.books.get_mut(token_id) {
            Some(entry) => entry,
            None => {
                debug!(token_id, "dropping delta for unknown token");
                return;
            }
        };

        if as_of < entry.as_of {
            debug!(token_id, "dropping out-of-order delta");
            return;
        }

        for change in changes {
            if change.price <= Decimal::ZERO || change.price > Decimal::ONE {
                debug!(token_id, price = %change.price, "dropping delta with out-of-range price");
                continue;
            }
            match change.side {
                BookSide::Bid => apply_level(&mut entry.bids, change.price, change.size, true),
                BookSide::Ask => apply_level(&mut entry.asks, change.price, change.size, false),
            }
        }
        entry.as_of = as_of;
    }

    /// Update the tick size reported by a `tick_size_change` message.
    pub fn set_tick_size(&self, token_id: &str, tick_size: Decimal) {
        if let Some(mut entry) = self.books.get_mut(token_id) {
            entry.meta.tick_size = Some(tick_size);
        }
    }

    /// Consistent snapshot of a token's book.
    pub fn get(&self, token_id: &str) -> Option<CachedBook> {
        self.books.get(token_id).map(|entry| entry.clone())
    }

    /// Seconds since the token's book was last updated; `None` when the
    /// token has never been seen.
    pub fn age(&self, token_id: &str, now: DateTime<Utc>) -> Option<i64> {
        self.books.get(token_id).map(|entry| entry.age_seconds(now))
    }

    /// Drop cached books for tokens no longer tracked.
    pub fn retain_tokens(&self, tracked: &std::collections::HashSet<String>) {
        self.books.retain(|token_id, _| tracked.contains(token_id));
    }

    pub fn len(&self) -> usize {
        self.books.len()
    }

    pub fn is_empty(&self) -> bool {
        self.books.is_empty()
    }

    /// Snapshot of every cached book, for the storage flush.
    pub fn all(&self) -> Vec<(String, CachedBook)> {
        self.books
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect()
    }
}

/// Set the aggregated size at `price`, preserving strict sort order.
/// Bids are price-descending, asks price-ascending.
fn apply_level(levels: &mut Vec<BookLevel>, price: Decimal, size: Decimal, descending: bool) {
    let position = levels.iter().position(|level| level.price == price);

    if size <= Decimal::ZERO {
        if let Some(i) = position {
            levels.remove(i);
        }
        return;
    }

    match position {
        Some(i) => levels[i].size = size,
        None => {
            let insert_at = levels
                .iter()
                .position(|level| {
                    if descending {
                        level.price < price
                    } else {
                        level.price > price
                    }
                })
                .unwrap_or(levels.len());
            levels.insert(insert_at, BookLevel::new(price, size));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use rust_decimal_macros::dec;

    fn snapshot(token: &str, as_of: DateTime<Utc>) -> NormalizedBook {
        NormalizedBook {
            condition_id: "0xcond".to_string(),
            token_id: token.to_string(),
            bids: vec![
                BookLevel::new(dec!(0.45), dec!(100)),
                BookLevel::new(dec!(0.44), dec!(200)),
            ],
            asks: vec![
                BookLevel::new(dec!(0.55), dec!(150)),
                BookLevel::new(dec!(0.56), dec!(250)),
            ],
            tick_size: Some(dec!(0.01)),
            min_order_size: Some(dec!(5)),
            neg_risk: Some(false),
            as_of,
            hash: Some("h1".to_string()),
        }
    }

    #[test]
    fn test_apply_snapshot_and_get() {
        let cache = BookCache::new();
        let now = Utc::now();
        cache.apply_snapshot(snapshot("tok", now));

        let book = cache.get("tok").unwrap();
        assert_eq!(book.best_bid().unwrap().price, dec!(0.45));
        assert_eq!(book.best_ask().unwrap().price, dec!(0.55));
        assert_eq!(book.meta.condition_id, "0xcond");
        assert_eq!(cache.age("tok", now), Some(0));
        assert_eq!(cache.age("other", now), None);
    }

    #[test]
    fn test_stale_snapshot_dropped() {
        let cache = BookCache::new();
        let now = Utc::now();
        cache.apply_snapshot(snapshot("tok", now));

        let mut stale = snapshot("tok", now - Duration::seconds(30));
        stale.bids = vec![BookLevel::new(dec!(0.10), dec!(1))];
        cache.apply_snapshot(stale);

        let book = cache.get("tok").unwrap();
        assert_eq!(book.best_bid().unwrap().price, dec!(0.45));
        assert_eq!(book.as_of, now);
    }

    #[test]
    fn test_price_change_update_insert_remove() {
        let cache = BookCache::new();
        let now = Utc::now();
        cache.apply_snapshot(snapshot("tok", now));

        let later = now + Duration::seconds(1);
        cache.apply_price_change(
            "tok",
            &[
                // Update an existing level.
                LevelChange { side: BookSide::Bid, price: dec!(0.45), size: dec!(120) },
                // Insert between existing levels.
                LevelChange { side: BookSide::Ask, price: dec!(0.555), size: dec!(40) },
                // Remove a level.
                LevelChange { side: BookSide::Bid, price: dec!(0.44), size: dec!(0) },
            ],
            later,
        );

        let book = cache.get("tok").unwrap();
        assert_eq!(book.bids.len(), 1);
        assert_eq!(book.bids[0].size, dec!(120));
        let ask_prices: Vec<_> = book.asks.iter().map(|l| l.price).collect();
        assert_eq!(ask_prices, vec![dec!(0.55), dec!(0.555), dec!(0.56)]);
        assert_eq!(book.as_of, later);
    }

    #[test]
    fn test_out_of_order_delta_dropped() {
        let cache = BookCache::new();
        let now = Utc::now();
        cache.apply_snapshot(snapshot("tok", now));

        cache.apply_price_change(
            "tok",
            &[LevelChange { side: BookSide::Bid, price: dec!(0.45), size: dec!(999) }],
            now - Duration::seconds(5),
        );

        let book = cache.get("tok").unwrap();
        assert_eq!(book.bids[0].size, dec!(100));
    }

    #[test]
    fn test_monotonic_order_preserved_after_inserts() {
        let cache = BookCache::new();
        let now = Utc::now();
        cache.apply_snapshot(snapshot("tok", now));

        let later = now + Duration::seconds(1);
        cache.apply_price_change(
            "tok",
            &[
                LevelChange { side: BookSide::Bid, price: dec!(0.46), size: dec!(10) },
                LevelChange { side: BookSide::Bid, price: dec!(0.43), size: dec!(20) },
                LevelChange { side: BookSide::Ask, price: dec!(0.54), size: dec!(30) },
            ],
            later,
        );

        let book = cache.get("tok").unwrap();
        let bid_prices: Vec<_> = book.bids.iter().map(|l| l.price).collect();
        let ask_prices: Vec<_> = book.asks.iter().map(|l| l.price).collect();

        assert!(bid_prices.windows(2).all(|w| w[0] > w[1]));
        assert!(ask_prices.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(bid_prices[0], dec!(0.46));
        assert_eq!(ask_prices[0], dec!(0.54));
    }

    #[test]
    fn test_retain_tokens() {
        let cache = BookCache::new();
        let now = Utc::now();
        cache.apply_snapshot(snapshot("keep", now));
        cache.apply_snapshot(snapshot("drop", now));

        let tracked: std::collections::HashSet<String> = ["keep".to_string()].into();
        cache.retain_tokens(&tracked);

        assert!(cache.get("keep").is_some());
        assert!(cache.get("drop").is_none());
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_tick_size_change() {
        let cache = BookCache::new();
        cache.apply_snapshot(snapshot("tok", Utc::now()));
        cache.set_tick_size("tok", dec!(0.001));
        assert_eq!(cache.get("tok").unwrap().meta.tick_size, Some(dec!(0.001)));
    }
}
