//! Layered runtime configuration.
//!
//! Precedence, lowest to highest: baked defaults < optional TOML file <
//! DB-backed `app_config` overrides < environment variables. Keys use the
//! SCREAMING_SNAKE_CASE names that appear in the environment and in the
//! `app_config` table.
//!
//! Every signal payload embeds a `config_snapshot` of the keys that
//! controlled its emission; see [`Settings::config_snapshot`].

use std::collections::HashMap;
use std::path::Path;

use anyhow::{bail, Context, Result};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

/// Runtime settings. Field names map to SCREAMING_SNAKE_CASE config keys.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE", default)]
pub struct Settings {
    pub database_url: String,

    pub http_timeout_seconds: f64,
    pub http_max_concurrency: usize,

    pub sync_gamma_events_interval_seconds: u64,
    pub sync_tags_interval_seconds: u64,
    pub sync_trades_interval_seconds: u64,
    pub sync_oi_interval_seconds: u64,
    pub sync_universe_interval_seconds: u64,
    pub sync_orderbooks_interval_seconds: u64,
    pub sync_positions_interval_seconds: u64,
    pub signal_engine_trades_interval_seconds: u64,
    pub signal_engine_arb_interval_seconds: u64,
    pub alert_dispatch_interval_seconds: u64,
    pub retention_interval_seconds: u64,
    /// REST heal cadence for the orderbook cache.
    pub orderbook_snapshot_interval_seconds: u64,

    pub gamma_events_page_limit: u32,
    pub gamma_events_max_pages: u32,
    pub tags_page_limit: u32,
    pub tags_max_pages: u32,

    pub max_tracked_markets: usize,
    pub min_gamma_volume: Decimal,
    pub min_gamma_liquidity: Decimal,
    pub min_open_interest: Decimal,
    /// Condition IDs always included in the tracked universe.
    pub tracked_market_overrides: Vec<String>,

    pub taker_only: bool,
    pub large_trade_usd_threshold: Decimal,
    pub new_wallet_window_days: i64,
    pub dormant_window_days: i64,
    pub track_wallet_days_after_large_trade: i64,

    pub trade_safety_window_seconds: i64,
    pub trades_page_limit: u32,
    pub trades_max_pages: u32,
    pub trades_initial_lookback_hours: i64,

    pub positions_page_limit: u32,
    pub positions_size_threshold: Decimal,

    pub arb_edge_min: Decimal,
    pub arb_min_executable_shares: Decimal,
    pub arb_max_shares_to_evaluate: Decimal,
    pub arb_max_book_age_seconds: i64,
    pub arb_market_cooldown_seconds: i64,
    pub taker_fee_bps: u32,

    pub alerts_enabled: bool,
    /// Comma-separated default channel list, e.g. "log,slack".
    pub alert_channels: String,
    pub alert_dedup_window_seconds: i64,
    pub alert_min_severity: u8,
    pub alert_max_attempts: u32,
    pub alert_slack_webhook_url: Option<String>,
    pub alert_telegram_bot_token: Option<String>,
    pub alert_telegram_chat_id: Option<String>,
    pub alert_email_provider_url: Option<String>,
    pub alert_email_api_key: Option<String>,
    pub alert_email_from: Option<String>,
    pub alert_email_to: Option<String>,
    /// Base URL for deep links into the signal detail page.
    pub signal_detail_base_url: String,

    pub clob_ws_enabled: bool,
    pub clob_ws_url: String,
    pub clob_ws_fallback_urls: Vec<String>,
    pub clob_ws_max_assets: usize,
    pub clob_ws_ping_seconds: u64,

    pub gamma_base_url: String,
    pub data_api_base_url: String,
    pub clob_base_url: String,

    pub metrics_enabled: bool,
    pub metrics_listen_addr: String,

    pub metrics_raw_retention_days: i64,
    pub metrics_hourly_retention_days: i64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            database_url: "pulse.db".to_string(),

            http_timeout_seconds: 10.0,
            http_max_concurrency: 10,

            sync_gamma_events_interval_seconds: 600,
            sync_tags_interval_seconds: 21_600,
            sync_trades_interval_seconds: 45,
            sync_oi_interval_seconds: 300,
            sync_universe_interval_seconds: 900,
            sync_orderbooks_interval_seconds: 20,
            sync_positions_interval_seconds: 600,
            signal_engine_trades_interval_seconds: 45,
            signal_engine_arb_interval_seconds: 45,
            alert_dispatch_interval_seconds: 10,
            retention_interval_seconds: 3600,
            orderbook_snapshot_interval_seconds: 300,

            gamma_events_page_limit: 100,
            gamma_events_max_pages: 50,
            tags_page_limit: 100,
            tags_max_pages: 20,

            max_tracked_markets: 200,
            min_gamma_volume: dec!(50000),
            min_gamma_liquidity: dec!(10000),
            min_open_interest: dec!(5000),
            tracked_market_overrides: Vec::new(),

            taker_only: true,
            large_trade_usd_threshold: dec!(10000),
            new_wallet_window_days: 14,
            dormant_window_days: 30,
            track_wallet_days_after_large_trade: 7,

            trade_safety_window_seconds: 300,
            trades_page_limit: 500,
            trades_max_pages: 20,
            trades_initial_lookback_hours: 24,

            positions_page_limit: 500,
            positions_size_threshold: dec!(1),

            arb_edge_min: dec!(0.01),
            arb_min_executable_shares: dec!(50),
            arb_max_shares_to_evaluate: dec!(5000),
            arb_max_book_age_seconds: 10,
            arb_market_cooldown_seconds: 60,
            taker_fee_bps: 0,

            alerts_enabled: false,
            alert_channels: String::new(),
            alert_dedup_window_seconds: 600,
            alert_min_severity: 2,
            alert_max_attempts: 3,
            alert_slack_webhook_url: None,
            alert_telegram_bot_token: None,
            alert_telegram_chat_id: None,
            alert_email_provider_url: None,
            alert_email_api_key: None,
            alert_email_from: None,
            alert_email_to: None,
            signal_detail_base_url: "http://localhost:8080/signals".to_string(),

            clob_ws_enabled: false,
            clob_ws_url: pulse_market::DEFAULT_WS_URL.to_string(),
            clob_ws_fallback_urls: vec![
                "wss://ws-subscriptions-clob.polymarket.com/ws/".to_string()
            ],
            clob_ws_max_assets: 400,
            clob_ws_ping_seconds: 10,

            gamma_base_url: pulse_market::DEFAULT_GAMMA_BASE.to_string(),
            data_api_base_url: pulse_market::DEFAULT_DATA_API_BASE.to_string(),
            clob_base_url: pulse_market::DEFAULT_CLOB_BASE.to_string(),

            metrics_enabled: true,
            metrics_listen_addr: "127.0.0.1:9464".to_string(),

            metrics_raw_retention_days: 30,
            metrics_hourly_retention_days: 365,
        }
    }
}

impl Settings {
    /// Load settings with full precedence layering.
    ///
    /// `db_overrides` holds the `app_config` rows (key -> JSON value).
    pub fn load(
        config_file: Option<&Path>,
        db_overrides: &HashMap<String, Value>,
    ) -> Result<Self> {
        let mut data = match serde_json::to_value(Settings::default())? {
            Value::Object(map) => map,
            _ => unreachable!("settings serialize to an object"),
        };

        if let Some(path) = config_file {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read config file {:?}", path))?;
            let file: toml::Value =
                toml::from_str(&content).context("failed to parse TOML config")?;
            let file_json = serde_json::to_value(file)?;
            if let Value::Object(map) = file_json {
                for (key, value) in map {
                    if data.contains_key(&key) {
                        data.insert(key, value);
                    } else {
                        warn!(key = %key, "ignoring unknown config file key");
                    }
                }
            }
        }

        for (key, value) in db_overrides {
            if data.contains_key(key) {
                data.insert(key.clone(), value.clone());
            } else {
                warn!(key = %key, "ignoring unknown app_config key");
            }
        }

        let keys: Vec<String> = data.keys().cloned().collect();
        for key in keys {
            if let Ok(raw) = std::env::var(&key) {
                let coerced = coerce_env_value(&raw, &data[&key]);
                data.insert(key, coerced);
            }
        }

        let settings: Settings = serde_json::from_value(Value::Object(data))
            .context("invalid configuration value")?;
        settings.validate()?;
        Ok(settings)
    }

    /// Startup validation; failures refuse to start the process.
    pub fn validate(&self) -> Result<()> {
        if self.database_url.trim().is_empty() {
            bail!("DATABASE_URL must not be empty");
        }
        if self.arb_edge_min <= Decimal::ZERO || self.arb_edge_min > dec!(0.05) {
            bail!(
                "ARB_EDGE_MIN must be in (0, 0.05], got {}",
                self.arb_edge_min
            );
        }
        if self.arb_min_executable_shares <= Decimal::ZERO {
            bail!("ARB_MIN_EXECUTABLE_SHARES must be positive");
        }
        if self.arb_max_shares_to_evaluate < self.arb_min_executable_shares {
            bail!("ARB_MAX_SHARES_TO_EVALUATE must be >= ARB_MIN_EXECUTABLE_SHARES");
        }
        if !(1..=5).contains(&self.alert_min_severity) {
            bail!("ALERT_MIN_SEVERITY must be in 1..=5");
        }
        if self.http_max_concurrency == 0 {
            bail!("HTTP_MAX_CONCURRENCY must be at least 1");
        }
        if !self.http_timeout_seconds.is_finite() || self.http_timeout_seconds <= 0.0 {
            bail!("HTTP_TIMEOUT_SECONDS must be positive");
        }
        for (key, value) in [
            ("SYNC_GAMMA_EVENTS_INTERVAL_SECONDS", self.sync_gamma_events_interval_seconds),
            ("SYNC_TAGS_INTERVAL_SECONDS", self.sync_tags_interval_seconds),
            ("SYNC_TRADES_INTERVAL_SECONDS", self.sync_trades_interval_seconds),
            ("SYNC_OI_INTERVAL_SECONDS", self.sync_oi_interval_seconds),
            ("SYNC_UNIVERSE_INTERVAL_SECONDS", self.sync_universe_interval_seconds),
            ("SYNC_ORDERBOOKS_INTERVAL_SECONDS", self.sync_orderbooks_interval_seconds),
            ("SYNC_POSITIONS_INTERVAL_SECONDS", self.sync_positions_interval_seconds),
            (
                "SIGNAL_ENGINE_TRADES_INTERVAL_SECONDS",
                self.signal_engine_trades_interval_seconds,
            ),
            ("SIGNAL_ENGINE_ARB_INTERVAL_SECONDS", self.signal_engine_arb_interval_seconds),
            ("ALERT_DISPATCH_INTERVAL_SECONDS", self.alert_dispatch_interval_seconds),
            ("RETENTION_INTERVAL_SECONDS", self.retention_interval_seconds),
            (
                "ORDERBOOK_SNAPSHOT_INTERVAL_SECONDS",
                self.orderbook_snapshot_interval_seconds,
            ),
        ] {
            if value == 0 {
                bail!("{} must be at least 1 second", key);
            }
        }
        Ok(())
    }

    /// Subset of settings serialized for a signal payload's
    /// `config_snapshot`.
    pub fn config_snapshot(&self, keys: &[&str]) -> Value {
        let all = match serde_json::to_value(self) {
            Ok(Value::Object(map)) => map,
            _ => return Value::Object(serde_json::Map::new()),
        };
        let mut out = serde_json::Map::new();
        for key in keys {
            if let Some(value) = all.get(*key) {
                out.insert((*key).to_string(), value.clone());
            }
        }
        Value::Object(out)
    }

    /// Default alert channel names, parsed from the comma list.
    pub fn alert_channel_names(&self) -> Vec<String> {
        self.alert_channels
            .split(',')
            .map(|c| c.trim().to_lowercase())
            .filter(|c| !c.is_empty())
            .collect()
    }
}

/// Coerce an environment string into the JSON type of the default value.
fn coerce_env_value(raw: &str, existing: &Value) -> Value {
    let trimmed = raw.trim();
    match existing {
        Value::Bool(_) => match trimmed.to_lowercase().as_str() {
            "true" | "1" | "yes" => Value::Bool(true),
            "false" | "0" | "no" => Value::Bool(false),
            _ => Value::String(trimmed.to_string()),
        },
        Value::Number(_) => serde_json::from_str(trimmed)
            .unwrap_or_else(|_| Value::String(trimmed.to_string())),
        Value::Array(_) => {
            // Arrays come in as comma-separated lists.
            let items: Vec<Value> = trimmed
                .split(',')
                .map(|s| Value::String(s.trim().to_string()))
                .filter(|v| v.as_str().map(|s| !s.is_empty()).unwrap_or(true))
                .collect();
            Value::Array(items)
        }
        _ => Value::String(trimmed.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_defaults_validate() {
        Settings::default().validate().unwrap();
    }

    #[test]
    fn test_invalid_edge_min_rejected() {
        let mut settings = Settings::default();
        settings.arb_edge_min = dec!(0.2);
        assert!(settings.validate().is_err());

        settings.arb_edge_min = Decimal::ZERO;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_empty_database_url_rejected() {
        let mut settings = Settings::default();
        settings.database_url = "  ".to_string();
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_db_overrides_take_effect() {
        let mut overrides = HashMap::new();
        overrides.insert("LARGE_TRADE_USD_THRESHOLD".to_string(), json!("25000"));
        overrides.insert("ALERTS_ENABLED".to_string(), json!(true));
        overrides.insert("SOME_UNKNOWN_KEY".to_string(), json!("ignored"));

        let settings = Settings::load(None, &overrides).unwrap();
        assert_eq!(settings.large_trade_usd_threshold, dec!(25000));
        assert!(settings.alerts_enabled);
    }

    #[test]
    fn test_config_snapshot_subset() {
        let settings = Settings::default();
        let snapshot = settings.config_snapshot(&[
            "ARB_EDGE_MIN",
            "TAKER_FEE_BPS",
            "NOT_A_KEY",
        ]);

        let obj = snapshot.as_object().unwrap();
        assert_eq!(obj.len(), 2);
        assert!(obj.contains_key("ARB_EDGE_MIN"));
        assert_eq!(obj["TAKER_FEE_BPS"], json!(0));
    }

    #[test]
    fn test_alert_channel_names() {
        let mut settings = Settings::default();
        settings.alert_channels = "log, Slack ,telegram,".to_string();
        assert_eq!(
            settings.alert_channel_names(),
            vec!["log".to_string(), "slack".to_string(), "telegram".to_string()]
        );
    }

    #[test]
    fn test_coerce_env_value() {
        assert_eq!(coerce_env_value("true", &json!(false)), json!(true));
        assert_eq!(coerce_env_value("42", &json!(10)), json!(42));
        assert_eq!(coerce_env_value("0.02", &json!(1.5)), json!(0.02));
        assert_eq!(
            coerce_env_value("a,b", &json!(["x"])),
            json!(["a", "b"])
        );
        assert_eq!(coerce_env_value("text", &json!("default")), json!("text"));
    }
}
