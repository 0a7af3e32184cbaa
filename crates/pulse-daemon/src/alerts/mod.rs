//! Alert dispatch: rule evaluation, per-channel dedupe, delivery logging.

pub mod channels;

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, info, warn};

use pulse_common::{AlertStatus, SignalRow, SignalType};

use crate::config::Settings;
use crate::storage::Store;

use channels::{
    AlertChannel, ChannelError, EmailChannel, LogChannel, SlackChannel, TelegramChannel,
};

/// Max candidate signals examined per dispatch tick.
const DISPATCH_BATCH_LIMIT: usize = 200;

/// One routing rule, evaluated in declared order; the first match wins.
#[derive(Debug, Clone)]
pub struct AlertRule {
    /// Restrict to these signal types; `None` matches all.
    pub signal_types: Option<Vec<SignalType>>,
    /// Minimum severity for this rule to match.
    pub min_severity: u8,
    /// Channels to route to; `None` uses the default channel set.
    pub channels: Option<Vec<String>>,
}

/// Reads undispatched signals and routes them to the configured channels.
pub struct AlertDispatcher {
    settings: Arc<Settings>,
    rules: Vec<AlertRule>,
    channels: Vec<Arc<dyn AlertChannel>>,
}

impl AlertDispatcher {
    /// Build the dispatcher and its channel drivers from settings.
    /// Channel names without usable credentials are dropped with a warning.
    pub fn new(settings: Arc<Settings>) -> Self {
        let mut channels: Vec<Arc<dyn AlertChannel>> = Vec::new();
        for name in settings.alert_channel_names() {
            match name.as_str() {
                "log" => channels.push(Arc::new(LogChannel)),
                "slack" => match settings.alert_slack_webhook_url.clone() {
                    Some(webhook) => channels.push(Arc::new(SlackChannel::new(webhook))),
                    None => warn!(component = "alerts", "slack channel configured without webhook URL"),
                },
                "telegram" => match (
                    settings.alert_telegram_bot_token.clone(),
                    settings.alert_telegram_chat_id.clone(),
                ) {
                    (Some(token), Some(chat_id)) => {
                        channels.push(Arc::new(TelegramChannel::new(token, chat_id)))
                    }
                    _ => warn!(component = "alerts", "telegram channel configured without token/chat id"),
                },
                "email" => match (
                    settings.alert_email_provider_url.clone(),
                    settings.alert_email_api_key.clone(),
                    settings.alert_email_from.clone(),
                    settings.alert_email_to.clone(),
                ) {
                    (Some(url), Some(key), Some(from), Some(to)) => {
                        channels.push(Arc::new(EmailChannel::new(url, key, from, to)))
                    }
                    _ => warn!(component = "alerts", "email channel configured without provider settings"),
                },
                other => warn!(component = "alerts", channel = other, "unknown alert channel"),
            }
        }

        // The default rule routes everything at or above the configured
        // severity floor to the default channel set.
        let rules = vec![AlertRule {
            signal_types: None,
            min_severity: settings.alert_min_severity,
            channels: None,
        }];

        Self {
            settings,
            rules,
            channels,
        }
    }

    /// Replace the routing rules (evaluated in order).
    pub fn with_rules(mut self, rules: Vec<AlertRule>) -> Self {
        self.rules = rules;
        self
    }

    /// Replace the channel drivers (used by tests and custom wiring).
    pub fn with_channels(mut self, channels: Vec<Arc<dyn AlertChannel>>) -> Self {
        self.channels = channels;
        self
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    /// One dispatch pass. Returns the number of successful deliveries.
    pub async fn dispatch(&self, store: &Store) -> anyhow::Result<usize> {
        if !self.settings.alerts_enabled || self.channels.is_empty() {
            return Ok(0);
        }

        let candidates = store.undispatched_signals(DISPATCH_BATCH_LIMIT)?;
        let mut sent = 0usize;

        for signal in &candidates {
            let rule = match self.matching_rule(signal) {
                Some(rule) => rule,
                None => {
                    // Terminal no-route marker so the signal is not
                    // rescanned every tick.
                    store.insert_alert_log(
                        signal.id,
                        "none",
                        &notification_key(signal),
                        AlertStatus::Suppressed,
                        signal.severity,
                        Some("no_matching_rule"),
                        Utc::now(),
                    )?;
                    continue;
                }
            };

            let key = notification_key(signal);
            let channel_names: Vec<String> = match &rule.channels {
                Some(names) => names.clone(),
                None => self.channels.iter().map(|c| c.name().to_string()).collect(),
            };

            for channel in &self.channels {
                if !channel_names.iter().any(|n| n == channel.name()) {
                    continue;
                }
                if self.is_deduped(store, channel.name(), &key, signal)? {
                    store.insert_alert_log(
                        signal.id,
                        channel.name(),
                        &key,
                        AlertStatus::Suppressed,
                        signal.severity,
                        None,
                        Utc::now(),
                    )?;
                    debug!(
                        component = "alerts",
                        channel = channel.name(),
                        notification_key = %key,
                        "delivery suppressed by dedupe window"
                    );
                    continue;
                }

                let message = format_message(signal, &self.settings.signal_detail_base_url);
                match self.deliver(channel.as_ref(), &message).await {
                    Ok(()) => {
                        store.insert_alert_log(
                            signal.id,
                            channel.name(),
                            &key,
                            AlertStatus::Sent,
                            signal.severity,
                            None,
                            Utc::now(),
                        )?;
                        info!(
                            component = "alerts",
                            channel = channel.name(),
                            signal_type = %signal.signal_type,
                            severity = signal.severity,
                            "alert delivered"
                        );
                        sent += 1;
                    }
                    Err(e) => {
                        store.insert_alert_log(
                            signal.id,
                            channel.name(),
                            &key,
                            AlertStatus::Failed,
                            signal.severity,
                            Some(&e.to_string()),
                            Utc::now(),
                        )?;
                        warn!(
                            component = "alerts",
                            channel = channel.name(),
                            error = %e,
                            "alert delivery failed"
                        );
                    }
                }
            }
        }

        Ok(sent)
    }

    fn matching_rule(&self, signal: &SignalRow) -> Option<&AlertRule> {
        self.rules.iter().find(|rule| {
            if signal.severity < rule.min_severity {
                return false;
            }
            match &rule.signal_types {
                Some(types) => types.contains(&signal.signal_type),
                None => true,
            }
        })
    }

    /// A delivery inside the dedupe window is suppressed unless the new
    /// severity is strictly greater than the prior SENT delivery's.
    fn is_deduped(
        &self,
        store: &Store,
        channel: &str,
        key: &str,
        signal: &SignalRow,
    ) -> anyhow::Result<bool> {
        let last = match store.last_sent_alert(channel, key)? {
            Some(last) => last,
            None => return Ok(false),
        };
        let window_start =
            Utc::now() - chrono::Duration::seconds(self.settings.alert_dedup_window_seconds);
        Ok(last.sent_at >= window_start && signal.severity <= last.severity)
    }

    /// Delivery with jitter-free exponential backoff between attempts.
    async fn deliver(&self, channel: &dyn AlertChannel, message: &str) -> Result<(), ChannelError> {
        let mut last_error = ChannelError::Delivery("no attempts made".to_string());
        for attempt in 0..self.settings.alert_max_attempts.max(1) {
            if attempt > 0 {
                tokio::time::sleep(Duration::from_millis(500u64 * (1u64 << attempt.min(5)))).await;
            }
            match channel.send(message).await {
                Ok(()) => return Ok(()),
                Err(e) => last_error = e,
            }
        }
        Err(last_error)
    }
}

/// Logical identity of a signal for alert dedupe.
pub fn notification_key(signal: &SignalRow) -> String {
    if let Some(wallet) = signal.wallet.as_deref() {
        return format!("{}:{}", signal.signal_type, wallet);
    }
    if let Some(condition_id) = signal.condition_id.as_deref() {
        return format!("{}:{}", signal.signal_type, condition_id);
    }
    format!("{}:{}", signal.signal_type, signal.id)
}

/// Human-readable alert text: severity, type, principal numbers, deep link.
pub fn format_message(signal: &SignalRow, detail_base_url: &str) -> String {
    let prefix = format!("[SEV{}]", signal.severity);
    let link = format!("{}/{}", detail_base_url.trim_end_matches('/'), signal.id);
    let payload = &signal.payload;

    let body = match signal.signal_type {
        SignalType::ArbBuyBoth => {
            let edge = payload["edge_at_q_max"]
                .as_str()
                .and_then(|e| e.parse::<f64>().ok())
                .map(|e| format!("{:.2}%", e * 100.0))
                .unwrap_or_else(|| "?".to_string());
            let q_max = payload["q_max"].as_str().unwrap_or("?");
            format!("Arb buy-both {} edge @ {} shares", edge, q_max)
        }
        SignalType::LargeTakerTrade
        | SignalType::LargeNewWalletTrade
        | SignalType::DormantWalletReactivation => {
            let notional = payload["notional_usd"].as_str().unwrap_or("?");
            let title = payload["market_title"]
                .as_str()
                .or_else(|| payload["market_slug"].as_str())
                .unwrap_or("unknown market");
            format!("{} ${} {}", signal.signal_type, notional, title)
        }
        SignalType::NewMarket => {
            let title = payload["title"].as_str().unwrap_or("unknown market");
            format!("New market: {}", title)
        }
    };

    format!("{} {} | {}", prefix, body, link)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn signal(signal_type: SignalType, severity: u8, payload: serde_json::Value) -> SignalRow {
        SignalRow {
            id: 7,
            signal_type,
            dedupe_key: "k".to_string(),
            created_at: Utc::now(),
            severity,
            wallet: Some("0xw".to_string()),
            condition_id: Some("0xcond".to_string()),
            payload,
        }
    }

    #[test]
    fn test_notification_key_prefers_wallet() {
        let s = signal(SignalType::LargeTakerTrade, 2, json!({}));
        assert_eq!(notification_key(&s), "LARGE_TAKER_TRADE:0xw");

        let mut no_wallet = s.clone();
        no_wallet.wallet = None;
        assert_eq!(notification_key(&no_wallet), "LARGE_TAKER_TRADE:0xcond");

        no_wallet.condition_id = None;
        assert_eq!(notification_key(&no_wallet), "LARGE_TAKER_TRADE:7");
    }

    #[test]
    fn test_format_arb_message() {
        let s = signal(
            SignalType::ArbBuyBoth,
            3,
            json!({"edge_at_q_max": "0.015", "q_max": "200"}),
        );
        let message = format_message(&s, "http://localhost:8080/signals/");
        assert!(message.starts_with("[SEV3] Arb buy-both 1.50% edge @ 200 shares"));
        assert!(message.ends_with("http://localhost:8080/signals/7"));
    }

    #[test]
    fn test_format_trade_message() {
        let s = signal(
            SignalType::LargeTakerTrade,
            2,
            json!({"notional_usd": "12000", "market_title": "Some market"}),
        );
        let message = format_message(&s, "http://localhost:8080/signals");
        assert!(message.contains("$12000"));
        assert!(message.contains("Some market"));
    }

    #[test]
    fn test_rule_matching_order_and_severity() {
        let settings = Arc::new(Settings::default());
        let dispatcher = AlertDispatcher::new(Arc::clone(&settings)).with_rules(vec![
            AlertRule {
                signal_types: Some(vec![SignalType::ArbBuyBoth]),
                min_severity: 4,
                channels: Some(vec!["slack".to_string()]),
            },
            AlertRule {
                signal_types: None,
                min_severity: 2,
                channels: None,
            },
        ]);

        let arb_hot = signal(SignalType::ArbBuyBoth, 4, json!({}));
        let matched = dispatcher.matching_rule(&arb_hot).unwrap();
        assert_eq!(matched.channels.as_deref(), Some(&["slack".to_string()][..]));

        // Below the first rule's floor, falls through to the catch-all.
        let arb_cool = signal(SignalType::ArbBuyBoth, 3, json!({}));
        let matched = dispatcher.matching_rule(&arb_cool).unwrap();
        assert!(matched.channels.is_none());

        let quiet = signal(SignalType::NewMarket, 1, json!({}));
        assert!(dispatcher.matching_rule(&quiet).is_none());
    }
}
