//! Schema migrations: forward-only, every version stamp recorded in
//! `schema_migrations`.
//!
//! Decimals are stored as TEXT to keep exact values; timestamps are RFC3339
//! UTC strings with a fixed "Z" suffix so lexicographic order is time order.

use rusqlite::Connection;

use super::StoreError;

/// Ordered, append-only migration list. Never edit a shipped entry.
pub const MIGRATIONS: &[(i64, &str)] = &[(1, SCHEMA_V1)];

const SCHEMA_V1: &str = r#"
CREATE TABLE IF NOT EXISTS markets (
    condition_id   TEXT PRIMARY KEY,
    market_id      TEXT,
    event_id       TEXT,
    slug           TEXT,
    question       TEXT,
    title          TEXT,
    active         INTEGER,
    closed         INTEGER,
    tag_ids        TEXT,
    neg_risk       INTEGER,
    outcomes       TEXT,
    token_ids      TEXT,
    start_time     TEXT,
    end_time       TEXT,
    created_at     TEXT,
    last_seen_at   TEXT
);

CREATE TABLE IF NOT EXISTS market_metrics_ts (
    id             INTEGER PRIMARY KEY AUTOINCREMENT,
    condition_id   TEXT NOT NULL,
    ts             TEXT NOT NULL,
    granularity    TEXT NOT NULL DEFAULT 'raw',
    volume         TEXT,
    liquidity      TEXT,
    open_interest  TEXT,
    best_bid_yes   TEXT,
    best_ask_yes   TEXT,
    best_bid_no    TEXT,
    best_ask_no    TEXT,
    spread_yes     TEXT,
    spread_no      TEXT
);
CREATE INDEX IF NOT EXISTS ix_metrics_condition_ts
    ON market_metrics_ts(condition_id, ts);
CREATE INDEX IF NOT EXISTS ix_metrics_granularity_ts
    ON market_metrics_ts(granularity, ts);

CREATE TABLE IF NOT EXISTS orderbook_latest (
    token_id       TEXT PRIMARY KEY,
    condition_id   TEXT NOT NULL,
    bids           TEXT NOT NULL,
    asks           TEXT NOT NULL,
    tick_size      TEXT,
    min_order_size TEXT,
    neg_risk       INTEGER,
    as_of          TEXT,
    hash           TEXT
);
CREATE INDEX IF NOT EXISTS ix_orderbook_condition
    ON orderbook_latest(condition_id);

CREATE TABLE IF NOT EXISTS trades (
    trade_pk         TEXT PRIMARY KEY,
    transaction_hash TEXT UNIQUE,
    wallet           TEXT,
    condition_id     TEXT NOT NULL,
    token_id         TEXT NOT NULL,
    side             TEXT NOT NULL,
    price            TEXT NOT NULL,
    size             TEXT NOT NULL,
    notional_usd     TEXT NOT NULL,
    trade_ts         TEXT NOT NULL,
    raw              TEXT,
    processed_at     TEXT
);
CREATE INDEX IF NOT EXISTS ix_trades_trade_ts ON trades(trade_ts);
CREATE INDEX IF NOT EXISTS ix_trades_wallet_trade_ts ON trades(wallet, trade_ts);
CREATE INDEX IF NOT EXISTS ix_trades_condition_trade_ts ON trades(condition_id, trade_ts);
CREATE INDEX IF NOT EXISTS ix_trades_unprocessed ON trades(processed_at) WHERE processed_at IS NULL;

CREATE TABLE IF NOT EXISTS wallets (
    wallet                TEXT PRIMARY KEY,
    first_seen_at         TEXT NOT NULL,
    last_seen_at          TEXT NOT NULL,
    first_trade_ts        TEXT,
    lifetime_notional_usd TEXT NOT NULL,
    tracked_until         TEXT
);

CREATE TABLE IF NOT EXISTS wallet_market_exposure (
    wallet          TEXT NOT NULL,
    condition_id    TEXT NOT NULL,
    net_shares      TEXT NOT NULL,
    avg_entry_price TEXT,
    last_updated_at TEXT NOT NULL,
    PRIMARY KEY (wallet, condition_id)
);

CREATE TABLE IF NOT EXISTS tags (
    id       INTEGER PRIMARY KEY,
    label    TEXT,
    slug     TEXT,
    is_sport INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS signal_events (
    id           INTEGER PRIMARY KEY AUTOINCREMENT,
    signal_type  TEXT NOT NULL,
    dedupe_key   TEXT NOT NULL UNIQUE,
    created_at   TEXT NOT NULL,
    severity     INTEGER NOT NULL,
    wallet       TEXT,
    condition_id TEXT,
    payload      TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS ix_signal_type_created ON signal_events(signal_type, created_at);
CREATE INDEX IF NOT EXISTS ix_signal_wallet_created ON signal_events(wallet, created_at);
CREATE INDEX IF NOT EXISTS ix_signal_condition_created ON signal_events(condition_id, created_at);

CREATE TABLE IF NOT EXISTS alert_log (
    id               INTEGER PRIMARY KEY AUTOINCREMENT,
    signal_event_id  INTEGER NOT NULL,
    channel          TEXT NOT NULL,
    notification_key TEXT NOT NULL,
    sent_at          TEXT,
    status           TEXT NOT NULL,
    severity         INTEGER,
    error            TEXT
);
CREATE INDEX IF NOT EXISTS ix_alert_notification_sent ON alert_log(notification_key, sent_at);
CREATE INDEX IF NOT EXISTS ix_alert_signal ON alert_log(signal_event_id);

CREATE TABLE IF NOT EXISTS app_config (
    key        TEXT PRIMARY KEY,
    value      TEXT NOT NULL,
    updated_at TEXT,
    updated_by TEXT
);

CREATE TABLE IF NOT EXISTS job_runs (
    job_name         TEXT PRIMARY KEY,
    last_started_at  TEXT,
    last_success_at  TEXT,
    last_error_at    TEXT,
    last_error       TEXT,
    last_duration_ms REAL
);
"#;

/// Apply every unapplied migration, stamping each version.
pub fn migrate(conn: &Connection) -> Result<(), StoreError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version    INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL
        );",
    )?;

    let current: i64 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
        [],
        |row| row.get(0),
    )?;

    for (version, sql) in MIGRATIONS {
        if *version <= current {
            continue;
        }
        conn.execute_batch(sql)?;
        conn.execute(
            "INSERT INTO schema_migrations (version, applied_at) VALUES (?1, ?2)",
            rusqlite::params![version, chrono::Utc::now().to_rfc3339()],
        )?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_migrate_fresh_database() {
        let conn = Connection::open_in_memory().unwrap();
        migrate(&conn).unwrap();

        let version: i64 = conn
            .query_row("SELECT MAX(version) FROM schema_migrations", [], |row| {
                row.get(0)
            })
            .unwrap();
        assert_eq!(version, 1);

        // Spot-check a few tables exist.
        for table in ["markets", "trades", "signal_events", "alert_log", "job_runs"] {
            let count: i64 = conn
                .query_row(
                    "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name=?1",
                    [table],
                    |row| row.get(0),
                )
                .unwrap();
            assert_eq!(count, 1, "missing table {}", table);
        }
    }

    #[test]
    fn test_migrate_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        migrate(&conn).unwrap();
        migrate(&conn).unwrap();

        let stamps: i64 = conn
            .query_row("SELECT COUNT(*) FROM schema_migrations", [], |row| row.get(0))
            .unwrap();
        assert_eq!(stamps, 1);
    }
}
