//! SQLite persistence for the pipeline.
//!
//! All writes are idempotent upserts keyed by the entities' natural
//! identifiers; collisions on dedupe keys are not errors. A single
//! connection behind a mutex serializes concurrent writers, which is the
//! row-level safety the rest of the pipeline relies on.

pub mod schema;

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Mutex;

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{Connection, OptionalExtension};
use rust_decimal::Decimal;
use serde_json::Value;
use thiserror::Error;

use pulse_common::{
    AlertStatus, BookLevel, MarketRecord, MetricSnapshot, NewSignal, Side, SignalRow, SignalType,
    TradeRecord, WalletRecord,
};
use pulse_market::NormalizedBook;

/// Errors surfaced by the storage layer.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("corrupt stored value: {0}")]
    Corrupt(String),
}

/// Result of a signal insertion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalInsert {
    /// Newly inserted with this row ID.
    Inserted(i64),
    /// A signal with the same dedupe key already exists.
    AlreadyEmitted,
}

/// Latest metric values for a market (from the newest snapshot row).
#[derive(Debug, Clone, Default)]
pub struct LatestMetrics {
    pub volume: Option<Decimal>,
    pub liquidity: Option<Decimal>,
    pub open_interest: Option<Decimal>,
    pub ts: Option<DateTime<Utc>>,
}

/// Per-job run bookkeeping row.
#[derive(Debug, Clone)]
pub struct JobRunRow {
    pub job_name: String,
    pub last_started_at: Option<DateTime<Utc>>,
    pub last_success_at: Option<DateTime<Utc>>,
    pub last_error_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub last_duration_ms: Option<f64>,
}

/// Subset of a market row needed by the tracking jobs.
#[derive(Debug, Clone)]
pub struct TrackedMarket {
    pub condition_id: String,
    pub token_ids: Vec<String>,
    pub outcomes: Vec<String>,
    pub neg_risk: Option<bool>,
}

/// The most recent SENT delivery for a notification key on a channel.
#[derive(Debug, Clone)]
pub struct LastDelivery {
    pub sent_at: DateTime<Utc>,
    pub severity: u8,
}

/// SQLite-backed store; cheap to share behind an `Arc`.
pub struct Store {
    conn: Mutex<Connection>,
}

fn ts_str(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_ts(raw: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StoreError::Corrupt(format!("bad timestamp {:?}: {}", raw, e)))
}

fn parse_ts_opt(raw: Option<String>) -> Result<Option<DateTime<Utc>>, StoreError> {
    raw.map(|s| parse_ts(&s)).transpose()
}

fn parse_dec(raw: &str) -> Result<Decimal, StoreError> {
    Decimal::from_str(raw).map_err(|e| StoreError::Corrupt(format!("bad decimal {:?}: {}", raw, e)))
}

fn parse_dec_opt(raw: Option<String>) -> Result<Option<Decimal>, StoreError> {
    raw.map(|s| parse_dec(&s)).transpose()
}

fn dec_opt(value: Option<Decimal>) -> Option<String> {
    value.map(|d| d.to_string())
}

impl Store {
    /// Open (or create) the database at `database_url` and run migrations.
    /// Accepts a bare path, `:memory:`, or a `sqlite://` prefix.
    pub fn open(database_url: &str) -> Result<Self, StoreError> {
        let path = database_url
            .trim()
            .trim_start_matches("sqlite://")
            .trim_start_matches("sqlite:");
        let conn = if path == ":memory:" || path.is_empty() {
            Connection::open_in_memory()?
        } else {
            Connection::open(path)?
        };
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        schema::migrate(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// In-memory store for tests.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::open(":memory:")
    }

    fn conn(&self) -> std::sync::MutexGuard<'_, Connection> {
        // A poisoned lock means a writer panicked mid-statement; the
        // connection itself is still usable.
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }

    // ------------------------------------------------------------------
    // Markets
    // ------------------------------------------------------------------

    /// Upsert a market by condition ID. Returns `true` when the condition
    /// ID was not previously known (drives the NEW_MARKET signal).
    pub fn upsert_market(&self, market: &MarketRecord) -> Result<bool, StoreError> {
        let conn = self.conn();
        let existed: bool = conn
            .query_row(
                "SELECT 1 FROM markets WHERE condition_id = ?1",
                [&market.condition_id],
                |_| Ok(true),
            )
            .optional()?
            .unwrap_or(false);

        conn.execute(
            "INSERT INTO markets (
                condition_id, market_id, event_id, slug, question, title,
                active, closed, tag_ids, neg_risk, outcomes, token_ids,
                start_time, end_time, created_at, last_seen_at
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?15)
             ON CONFLICT(condition_id) DO UPDATE SET
                market_id = excluded.market_id,
                event_id = excluded.event_id,
                slug = excluded.slug,
                question = excluded.question,
                title = excluded.title,
                active = excluded.active,
                closed = excluded.closed,
                tag_ids = excluded.tag_ids,
                neg_risk = excluded.neg_risk,
                outcomes = excluded.outcomes,
                token_ids = excluded.token_ids,
                start_time = excluded.start_time,
                end_time = excluded.end_time,
                last_seen_at = excluded.last_seen_at",
            rusqlite::params![
                market.condition_id,
                market.market_id,
                market.event_id,
                market.slug,
                market.question,
                market.title,
                market.active,
                market.closed,
                serde_json::to_string(&market.tag_ids)?,
                market.neg_risk,
                serde_json::to_string(&market.outcomes)?,
                serde_json::to_string(&market.token_ids)?,
                market.start_time.map(ts_str),
                market.end_time.map(ts_str),
                ts_str(market.last_seen_at),
            ],
        )?;

        Ok(!existed)
    }

    /// Markets for the given condition IDs, with parsed token metadata.
    pub fn markets_by_condition_ids(
        &self,
        condition_ids: &[String],
    ) -> Result<Vec<TrackedMarket>, StoreError> {
        let conn = self.conn();
        let mut out = Vec::with_capacity(condition_ids.len());
        let mut stmt = conn.prepare(
            "SELECT condition_id, token_ids, outcomes, neg_risk
             FROM markets WHERE condition_id = ?1",
        )?;
        for condition_id in condition_ids {
            let row = stmt
                .query_row([condition_id], |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, Option<String>>(1)?,
                        row.get::<_, Option<String>>(2)?,
                        row.get::<_, Option<bool>>(3)?,
                    ))
                })
                .optional()?;
            if let Some((condition_id, token_ids, outcomes, neg_risk)) = row {
                out.push(TrackedMarket {
                    condition_id,
                    token_ids: token_ids
                        .map(|raw| serde_json::from_str(&raw))
                        .transpose()?
                        .unwrap_or_default(),
                    outcomes: outcomes
                        .map(|raw| serde_json::from_str(&raw))
                        .transpose()?
                        .unwrap_or_default(),
                    neg_risk,
                });
            }
        }
        Ok(out)
    }

    /// Universe selection: active, non-closed markets whose latest metrics
    /// pass any of the thresholds, capped at `limit`. Manual overrides are
    /// merged in by the caller.
    pub fn select_universe(
        &self,
        min_volume: Decimal,
        min_liquidity: Decimal,
        min_open_interest: Decimal,
        limit: usize,
    ) -> Result<Vec<String>, StoreError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "WITH newest AS (
                SELECT condition_id, MAX(ts) AS max_ts
                FROM market_metrics_ts
                GROUP BY condition_id
             ),
             latest AS (
                SELECT m.*
                FROM market_metrics_ts m
                JOIN newest n ON n.condition_id = m.condition_id AND n.max_ts = m.ts
             )
             SELECT mk.condition_id
             FROM markets mk
             JOIN latest l ON l.condition_id = mk.condition_id
             WHERE (mk.closed IS NULL OR mk.closed = 0)
               AND (
                    CAST(l.volume AS REAL) >= ?1
                 OR CAST(l.liquidity AS REAL) >= ?2
                 OR CAST(l.open_interest AS REAL) >= ?3
               )
             ORDER BY CAST(l.volume AS REAL) DESC
             LIMIT ?4",
        )?;

        let to_f64 = |d: Decimal| d.to_string().parse::<f64>().unwrap_or(f64::MAX);
        let rows = stmt.query_map(
            rusqlite::params![
                to_f64(min_volume),
                to_f64(min_liquidity),
                to_f64(min_open_interest),
                limit as i64,
            ],
            |row| row.get::<_, String>(0),
        )?;

        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    // ------------------------------------------------------------------
    // Metrics time series
    // ------------------------------------------------------------------

    /// Append-only metric snapshot insertion.
    pub fn insert_metric_snapshot(&self, snapshot: &MetricSnapshot) -> Result<(), StoreError> {
        self.conn().execute(
            "INSERT INTO market_metrics_ts (
                condition_id, ts, granularity, volume, liquidity, open_interest,
                best_bid_yes, best_ask_yes, best_bid_no, best_ask_no,
                spread_yes, spread_no
             ) VALUES (?1, ?2, 'raw', ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            rusqlite::params![
                snapshot.condition_id,
                ts_str(snapshot.ts),
                dec_opt(snapshot.volume),
                dec_opt(snapshot.liquidity),
                dec_opt(snapshot.open_interest),
                dec_opt(snapshot.best_bid_yes),
                dec_opt(snapshot.best_ask_yes),
                dec_opt(snapshot.best_bid_no),
                dec_opt(snapshot.best_ask_no),
                dec_opt(snapshot.spread_yes),
                dec_opt(snapshot.spread_no),
            ],
        )?;
        Ok(())
    }

    /// Values from the newest snapshot row for a market.
    pub fn latest_metrics(&self, condition_id: &str) -> Result<LatestMetrics, StoreError> {
        let row = self
            .conn()
            .query_row(
                "SELECT volume, liquidity, open_interest, ts
                 FROM market_metrics_ts
                 WHERE condition_id = ?1
                 ORDER BY ts DESC
                 LIMIT 1",
                [condition_id],
                |row| {
                    Ok((
                        row.get::<_, Option<String>>(0)?,
                        row.get::<_, Option<String>>(1)?,
                        row.get::<_, Option<String>>(2)?,
                        row.get::<_, String>(3)?,
                    ))
                },
            )
            .optional()?;

        match row {
            Some((volume, liquidity, open_interest, ts)) => Ok(LatestMetrics {
                volume: parse_dec_opt(volume)?,
                liquidity: parse_dec_opt(liquidity)?,
                open_interest: parse_dec_opt(open_interest)?,
                ts: Some(parse_ts(&ts)?),
            }),
            None => Ok(LatestMetrics::default()),
        }
    }

    /// Retention pass: downsample raw rows older than `raw_days` into
    /// hourly aggregates, then age out hourly rows older than
    /// `hourly_days`. Returns the number of deleted raw rows.
    pub fn prune_metrics(
        &self,
        now: DateTime<Utc>,
        raw_days: i64,
        hourly_days: i64,
    ) -> Result<usize, StoreError> {
        let raw_cutoff = ts_str(now - chrono::Duration::days(raw_days));
        let hourly_cutoff = ts_str(now - chrono::Duration::days(hourly_days));
        let conn = self.conn();

        conn.execute(
            "INSERT INTO market_metrics_ts (
                condition_id, ts, granularity, volume, liquidity, open_interest
             )
             SELECT condition_id,
                    strftime('%Y-%m-%dT%H:00:00.000000Z', ts),
                    'hourly',
                    AVG(CAST(volume AS REAL)),
                    AVG(CAST(liquidity AS REAL)),
                    AVG(CAST(open_interest AS REAL))
             FROM market_metrics_ts
             WHERE granularity = 'raw' AND ts < ?1
             GROUP BY condition_id, strftime('%Y-%m-%dT%H:00:00.000000Z', ts)",
            [&raw_cutoff],
        )?;

        let deleted = conn.execute(
            "DELETE FROM market_metrics_ts WHERE granularity = 'raw' AND ts < ?1",
            [&raw_cutoff],
        )?;
        conn.execute(
            "DELETE FROM market_metrics_ts WHERE granularity = 'hourly' AND ts < ?1",
            [&hourly_cutoff],
        )?;
        Ok(deleted)
    }

    // ------------------------------------------------------------------
    // Orderbook flush
    // ------------------------------------------------------------------

    /// Persist the latest book for a token (audit/UI copy of the cache).
    pub fn upsert_orderbook(&self, book: &NormalizedBook) -> Result<(), StoreError> {
        self.conn().execute(
            "INSERT INTO orderbook_latest (
                token_id, condition_id, bids, asks, tick_size, min_order_size,
                neg_risk, as_of, hash
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
             ON CONFLICT(token_id) DO UPDATE SET
                condition_id = excluded.condition_id,
                bids = excluded.bids,
                asks = excluded.asks,
                tick_size = excluded.tick_size,
                min_order_size = excluded.min_order_size,
                neg_risk = excluded.neg_risk,
                as_of = excluded.as_of,
                hash = excluded.hash",
            rusqlite::params![
                book.token_id,
                book.condition_id,
                serde_json::to_string(&book.bids)?,
                serde_json::to_string(&book.asks)?,
                dec_opt(book.tick_size),
                dec_opt(book.min_order_size),
                book.neg_risk,
                ts_str(book.as_of),
                book.hash,
            ],
        )?;
        Ok(())
    }

    /// Load the persisted latest book for a token.
    pub fn orderbook(
        &self,
        token_id: &str,
    ) -> Result<Option<(Vec<BookLevel>, Vec<BookLevel>, Option<DateTime<Utc>>)>, StoreError> {
        let row = self
            .conn()
            .query_row(
                "SELECT bids, asks, as_of FROM orderbook_latest WHERE token_id = ?1",
                [token_id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, Option<String>>(2)?,
                    ))
                },
            )
            .optional()?;

        match row {
            Some((bids, asks, as_of)) => Ok(Some((
                serde_json::from_str(&bids)?,
                serde_json::from_str(&asks)?,
                parse_ts_opt(as_of)?,
            ))),
            None => Ok(None),
        }
    }

    // ------------------------------------------------------------------
    // Trades
    // ------------------------------------------------------------------

    /// Insert a trade; a collision on the dedupe identity (or transaction
    /// hash) is a no-op. Returns `true` when a row was actually inserted.
    pub fn insert_trade(&self, trade: &TradeRecord) -> Result<bool, StoreError> {
        let changed = self.conn().execute(
            "INSERT OR IGNORE INTO trades (
                trade_pk, transaction_hash, wallet, condition_id, token_id,
                side, price, size, notional_usd, trade_ts, raw
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            rusqlite::params![
                trade.trade_pk,
                trade.transaction_hash,
                trade.wallet,
                trade.condition_id,
                trade.token_id,
                trade.side.as_str(),
                trade.price.to_string(),
                trade.size.to_string(),
                trade.notional_usd.to_string(),
                ts_str(trade.trade_ts),
                serde_json::to_string(&trade.raw)?,
            ],
        )?;
        Ok(changed > 0)
    }

    /// Most recent trade timestamp, for the pagination stop bound.
    pub fn latest_trade_ts(&self) -> Result<Option<DateTime<Utc>>, StoreError> {
        let raw: Option<String> = self
            .conn()
            .query_row("SELECT MAX(trade_ts) FROM trades", [], |row| row.get(0))?;
        parse_ts_opt(raw)
    }

    /// Trades not yet consumed by the trade signal engine, oldest first.
    pub fn unprocessed_trades(&self, limit: usize) -> Result<Vec<TradeRecord>, StoreError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT trade_pk, transaction_hash, wallet, condition_id, token_id,
                    side, price, size, notional_usd, trade_ts, raw
             FROM trades
             WHERE processed_at IS NULL
             ORDER BY trade_ts ASC
             LIMIT ?1",
        )?;

        let rows = stmt.query_map([limit as i64], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, Option<String>>(1)?,
                row.get::<_, Option<String>>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, String>(5)?,
                row.get::<_, String>(6)?,
                row.get::<_, String>(7)?,
                row.get::<_, String>(8)?,
                row.get::<_, String>(9)?,
                row.get::<_, Option<String>>(10)?,
            ))
        })?;

        let mut out = Vec::new();
        for row in rows {
            let (pk, tx, wallet, condition_id, token_id, side, price, size, notional, ts, raw) =
                row?;
            out.push(TradeRecord {
                trade_pk: pk,
                transaction_hash: tx,
                wallet,
                condition_id,
                token_id,
                side: Side::from_str(&side)
                    .map_err(StoreError::Corrupt)?,
                price: parse_dec(&price)?,
                size: parse_dec(&size)?,
                notional_usd: parse_dec(&notional)?,
                trade_ts: parse_ts(&ts)?,
                raw: raw
                    .map(|r| serde_json::from_str(&r))
                    .transpose()?
                    .unwrap_or(Value::Null),
            });
        }
        Ok(out)
    }

    /// Mark trades as consumed by the signal engine.
    pub fn mark_trades_processed(
        &self,
        trade_pks: &[String],
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let conn = self.conn();
        let mut stmt =
            conn.prepare("UPDATE trades SET processed_at = ?1 WHERE trade_pk = ?2")?;
        for pk in trade_pks {
            stmt.execute(rusqlite::params![ts_str(now), pk])?;
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Wallets
    // ------------------------------------------------------------------

    pub fn wallet(&self, wallet: &str) -> Result<Option<WalletRecord>, StoreError> {
        let row = self
            .conn()
            .query_row(
                "SELECT wallet, first_seen_at, last_seen_at, first_trade_ts,
                        lifetime_notional_usd, tracked_until
                 FROM wallets WHERE wallet = ?1",
                [wallet],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, Option<String>>(3)?,
                        row.get::<_, String>(4)?,
                        row.get::<_, Option<String>>(5)?,
                    ))
                },
            )
            .optional()?;

        match row {
            Some((wallet, first_seen, last_seen, first_trade, lifetime, tracked)) => {
                Ok(Some(WalletRecord {
                    wallet,
                    first_seen_at: parse_ts(&first_seen)?,
                    last_seen_at: parse_ts(&last_seen)?,
                    first_trade_ts: parse_ts_opt(first_trade)?,
                    lifetime_notional_usd: parse_dec(&lifetime)?,
                    tracked_until: parse_ts_opt(tracked)?,
                }))
            }
            None => Ok(None),
        }
    }

    /// Write the full wallet row (insert or replace by address).
    pub fn upsert_wallet(&self, wallet: &WalletRecord) -> Result<(), StoreError> {
        self.conn().execute(
            "INSERT INTO wallets (
                wallet, first_seen_at, last_seen_at, first_trade_ts,
                lifetime_notional_usd, tracked_until
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(wallet) DO UPDATE SET
                first_seen_at = excluded.first_seen_at,
                last_seen_at = excluded.last_seen_at,
                first_trade_ts = excluded.first_trade_ts,
                lifetime_notional_usd = excluded.lifetime_notional_usd,
                tracked_until = excluded.tracked_until",
            rusqlite::params![
                wallet.wallet,
                ts_str(wallet.first_seen_at),
                ts_str(wallet.last_seen_at),
                wallet.first_trade_ts.map(ts_str),
                wallet.lifetime_notional_usd.to_string(),
                wallet.tracked_until.map(ts_str),
            ],
        )?;
        Ok(())
    }

    /// Wallets still inside their position-tracking horizon.
    pub fn tracked_wallets(&self, now: DateTime<Utc>) -> Result<Vec<String>, StoreError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT wallet FROM wallets WHERE tracked_until IS NOT NULL AND tracked_until >= ?1",
        )?;
        let rows = stmt.query_map([ts_str(now)], |row| row.get::<_, String>(0))?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    /// Replace a wallet's per-market exposure rows with the given set.
    pub fn replace_wallet_exposures(
        &self,
        wallet: &str,
        exposures: &[(String, Decimal, Option<Decimal>)],
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        tx.execute(
            "DELETE FROM wallet_market_exposure WHERE wallet = ?1",
            [wallet],
        )?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO wallet_market_exposure (
                    wallet, condition_id, net_shares, avg_entry_price, last_updated_at
                 ) VALUES (?1, ?2, ?3, ?4, ?5)",
            )?;
            for (condition_id, net_shares, avg_entry) in exposures {
                stmt.execute(rusqlite::params![
                    wallet,
                    condition_id,
                    net_shares.to_string(),
                    dec_opt(*avg_entry),
                    ts_str(now),
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Tags
    // ------------------------------------------------------------------

    pub fn upsert_tag(
        &self,
        id: i64,
        label: Option<&str>,
        slug: Option<&str>,
    ) -> Result<(), StoreError> {
        self.conn().execute(
            "INSERT INTO tags (id, label, slug) VALUES (?1, ?2, ?3)
             ON CONFLICT(id) DO UPDATE SET label = excluded.label, slug = excluded.slug",
            rusqlite::params![id, label, slug],
        )?;
        Ok(())
    }

    /// Reset and set the sport flag across the tag dictionary.
    pub fn set_sport_tags(&self, tag_ids: &[i64]) -> Result<(), StoreError> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        tx.execute("UPDATE tags SET is_sport = 0", [])?;
        {
            let mut stmt = tx.prepare("UPDATE tags SET is_sport = 1 WHERE id = ?1")?;
            for id in tag_ids {
                stmt.execute([id])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Signals
    // ------------------------------------------------------------------

    /// Insert a signal; a dedupe-key collision returns `AlreadyEmitted`
    /// without error.
    pub fn insert_signal(
        &self,
        signal: &NewSignal,
        now: DateTime<Utc>,
    ) -> Result<SignalInsert, StoreError> {
        let conn = self.conn();
        let changed = conn.execute(
            "INSERT OR IGNORE INTO signal_events (
                signal_type, dedupe_key, created_at, severity, wallet,
                condition_id, payload
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            rusqlite::params![
                signal.signal_type.as_str(),
                signal.dedupe_key,
                ts_str(now),
                signal.severity,
                signal.wallet,
                signal.condition_id,
                serde_json::to_string(&signal.payload)?,
            ],
        )?;
        if changed > 0 {
            Ok(SignalInsert::Inserted(conn.last_insert_rowid()))
        } else {
            Ok(SignalInsert::AlreadyEmitted)
        }
    }

    /// Whether a signal of this type was emitted for the market since
    /// `since` (the arb per-market cooldown).
    pub fn recent_signal_exists(
        &self,
        signal_type: SignalType,
        condition_id: &str,
        since: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let found: Option<i64> = self
            .conn()
            .query_row(
                "SELECT 1 FROM signal_events
                 WHERE signal_type = ?1 AND condition_id = ?2 AND created_at >= ?3
                 LIMIT 1",
                rusqlite::params![signal_type.as_str(), condition_id, ts_str(since)],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    /// Signals with no alert_log row yet, oldest first.
    pub fn undispatched_signals(&self, limit: usize) -> Result<Vec<SignalRow>, StoreError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT s.id, s.signal_type, s.dedupe_key, s.created_at, s.severity,
                    s.wallet, s.condition_id, s.payload
             FROM signal_events s
             WHERE NOT EXISTS (
                SELECT 1 FROM alert_log a WHERE a.signal_event_id = s.id
             )
             ORDER BY s.created_at ASC
             LIMIT ?1",
        )?;

        let rows = stmt.query_map([limit as i64], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, i64>(4)?,
                row.get::<_, Option<String>>(5)?,
                row.get::<_, Option<String>>(6)?,
                row.get::<_, String>(7)?,
            ))
        })?;

        let mut out = Vec::new();
        for row in rows {
            let (id, signal_type, dedupe_key, created_at, severity, wallet, condition_id, payload) =
                row?;
            out.push(SignalRow {
                id,
                signal_type: SignalType::from_str(&signal_type)
                    .map_err(StoreError::Corrupt)?,
                dedupe_key,
                created_at: parse_ts(&created_at)?,
                severity: severity.clamp(1, 5) as u8,
                wallet,
                condition_id,
                payload: serde_json::from_str(&payload)?,
            });
        }
        Ok(out)
    }

    /// Signal counts by type since `since`, for the metrics snapshot.
    pub fn signal_counts_since(
        &self,
        since: DateTime<Utc>,
    ) -> Result<HashMap<String, i64>, StoreError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT signal_type, COUNT(*) FROM signal_events
             WHERE created_at >= ?1 GROUP BY signal_type",
        )?;
        let rows = stmt.query_map([ts_str(since)], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })?;
        let mut out = HashMap::new();
        for row in rows {
            let (signal_type, count) = row?;
            out.insert(signal_type, count);
        }
        Ok(out)
    }

    // ------------------------------------------------------------------
    // Alert log
    // ------------------------------------------------------------------

    /// Record one delivery attempt.
    pub fn insert_alert_log(
        &self,
        signal_event_id: i64,
        channel: &str,
        notification_key: &str,
        status: AlertStatus,
        severity: u8,
        error: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        self.conn().execute(
            "INSERT INTO alert_log (
                signal_event_id, channel, notification_key, sent_at, status,
                severity, error
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            rusqlite::params![
                signal_event_id,
                channel,
                notification_key,
                ts_str(now),
                status.as_str(),
                severity,
                error,
            ],
        )?;
        Ok(())
    }

    /// Latest SENT delivery for `(channel, notification_key)`.
    pub fn last_sent_alert(
        &self,
        channel: &str,
        notification_key: &str,
    ) -> Result<Option<LastDelivery>, StoreError> {
        let row = self
            .conn()
            .query_row(
                "SELECT sent_at, severity FROM alert_log
                 WHERE channel = ?1 AND notification_key = ?2 AND status = 'SENT'
                 ORDER BY sent_at DESC LIMIT 1",
                rusqlite::params![channel, notification_key],
                |row| {
                    Ok((
                        row.get::<_, Option<String>>(0)?,
                        row.get::<_, Option<i64>>(1)?,
                    ))
                },
            )
            .optional()?;

        match row {
            Some((Some(sent_at), severity)) => Ok(Some(LastDelivery {
                sent_at: parse_ts(&sent_at)?,
                severity: severity.unwrap_or(1).clamp(1, 5) as u8,
            })),
            _ => Ok(None),
        }
    }

    /// Delivery status counts per alert status, for the status page.
    pub fn alert_status_counts(&self) -> Result<HashMap<String, i64>, StoreError> {
        let conn = self.conn();
        let mut stmt = conn.prepare("SELECT status, COUNT(*) FROM alert_log GROUP BY status")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })?;
        let mut out = HashMap::new();
        for row in rows {
            let (status, count) = row?;
            out.insert(status, count);
        }
        Ok(out)
    }

    // ------------------------------------------------------------------
    // App config
    // ------------------------------------------------------------------

    /// All runtime-editable config overrides.
    pub fn app_config(&self) -> Result<HashMap<String, Value>, StoreError> {
        let conn = self.conn();
        let mut stmt = conn.prepare("SELECT key, value FROM app_config")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;
        let mut out = HashMap::new();
        for row in rows {
            let (key, raw) = row?;
            let value = serde_json::from_str(&raw).unwrap_or(Value::String(raw));
            out.insert(key, value);
        }
        Ok(out)
    }

    pub fn set_app_config(
        &self,
        key: &str,
        value: &Value,
        updated_by: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        self.conn().execute(
            "INSERT INTO app_config (key, value, updated_at, updated_by)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(key) DO UPDATE SET
                value = excluded.value,
                updated_at = excluded.updated_at,
                updated_by = excluded.updated_by",
            rusqlite::params![key, serde_json::to_string(value)?, ts_str(now), updated_by],
        )?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Job runs
    // ------------------------------------------------------------------

    pub fn job_started(&self, job_name: &str, now: DateTime<Utc>) -> Result<(), StoreError> {
        self.conn().execute(
            "INSERT INTO job_runs (job_name, last_started_at) VALUES (?1, ?2)
             ON CONFLICT(job_name) DO UPDATE SET last_started_at = excluded.last_started_at",
            rusqlite::params![job_name, ts_str(now)],
        )?;
        Ok(())
    }

    pub fn job_succeeded(
        &self,
        job_name: &str,
        duration_ms: f64,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        self.conn().execute(
            "INSERT INTO job_runs (job_name, last_success_at, last_duration_ms, last_error, last_error_at)
             VALUES (?1, ?2, ?3, NULL, NULL)
             ON CONFLICT(job_name) DO UPDATE SET
                last_success_at = excluded.last_success_at,
                last_duration_ms = excluded.last_duration_ms,
                last_error = NULL,
                last_error_at = NULL",
            rusqlite::params![job_name, ts_str(now), duration_ms],
        )?;
        Ok(())
    }

    pub fn job_failed(
        &self,
        job_name: &str,
        error: &str,
        duration_ms: f64,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        self.conn().execute(
            "INSERT INTO job_runs (job_name, last_error_at, last_error, last_duration_ms)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(job_name) DO UPDATE SET
                last_error_at = excluded.last_error_at,
                last_error = excluded.last_error,
                last_duration_ms = excluded.last_duration_ms",
            rusqlite::params![job_name, ts_str(now), error, duration_ms],
        )?;
        Ok(())
    }

    /// All job bookkeeping rows, for the metrics snapshot.
    pub fn job_runs(&self) -> Result<Vec<JobRunRow>, StoreError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT job_name, last_started_at, last_success_at, last_error_at,
                    last_error, last_duration_ms
             FROM job_runs ORDER BY job_name",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, Option<String>>(1)?,
                row.get::<_, Option<String>>(2)?,
                row.get::<_, Option<String>>(3)?,
                row.get::<_, Option<String>>(4)?,
                row.get::<_, Option<f64>>(5)?,
            ))
        })?;

        let mut out = Vec::new();
        for row in rows {
            let (job_name, started, success, error_at, error, duration) = row?;
            out.push(JobRunRow {
                job_name,
                last_started_at: parse_ts_opt(started)?,
                last_success_at: parse_ts_opt(success)?,
                last_error_at: parse_ts_opt(error_at)?,
                last_error: error,
                last_duration_ms: duration,
            });
        }
        Ok(out)
    }
}
