//! End-to-end pipeline tests over an in-memory store:
//! - arb evaluation through signal emission and alert delivery
//! - trade ingestion idempotence across re-walked pages
//! - alert dedupe inside the suppression window, with severity escalation

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use rust_decimal_macros::dec;

use pulse_common::{BookLevel, NewSignal, Side, SignalType, TradeRecord};
use pulse_daemon::alerts::channels::{AlertChannel, ChannelError};
use pulse_daemon::alerts::AlertDispatcher;
use pulse_daemon::config::Settings;
use pulse_daemon::signals::{run_arb_engine, run_trade_engine};
use pulse_daemon::storage::Store;
use pulse_daemon::universe::{TrackedEntry, Universe};
use pulse_market::{BookCache, NormalizedBook};

/// Channel that records deliveries and optionally fails.
struct RecordingChannel {
    sent: AtomicUsize,
    fail: bool,
}

impl RecordingChannel {
    fn new(fail: bool) -> Arc<Self> {
        Arc::new(Self {
            sent: AtomicUsize::new(0),
            fail,
        })
    }
}

#[async_trait]
impl AlertChannel for RecordingChannel {
    fn name(&self) -> &'static str {
        "recording"
    }

    async fn send(&self, _message: &str) -> Result<(), ChannelError> {
        if self.fail {
            return Err(ChannelError::Delivery("synthetic failure".to_string()));
        }
        self.sent.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

fn alert_settings() -> Arc<Settings> {
    let mut settings = Settings::default();
    settings.alerts_enabled = true;
    settings.alert_channels = "recording".to_string();
    settings.alert_min_severity = 2;
    settings.alert_max_attempts = 1;
    Arc::new(settings)
}

fn tracked_universe() -> Universe {
    let universe = Universe::new();
    universe.replace(vec![TrackedEntry {
        condition_id: "0xcond".to_string(),
        yes_token_id: "tok_yes".to_string(),
        no_token_id: "tok_no".to_string(),
        neg_risk: false,
    }]);
    universe
}

fn book(token: &str, asks: Vec<BookLevel>) -> NormalizedBook {
    NormalizedBook {
        condition_id: "0xcond".to_string(),
        token_id: token.to_string(),
        bids: vec![],
        asks,
        tick_size: Some(dec!(0.01)),
        min_order_size: Some(dec!(5)),
        neg_risk: Some(false),
        as_of: Utc::now(),
        hash: None,
    }
}

fn large_trade(tx: &str, wallet: &str) -> TradeRecord {
    TradeRecord {
        trade_pk: format!("tx:{}", tx),
        transaction_hash: Some(tx.to_string()),
        wallet: Some(wallet.to_string()),
        condition_id: "0xcond".to_string(),
        token_id: "tok_yes".to_string(),
        side: Side::Buy,
        price: dec!(0.60),
        size: dec!(20000),
        notional_usd: dec!(12000),
        trade_ts: Utc::now(),
        raw: serde_json::json!({"title": "Pipeline market"}),
    }
}

#[tokio::test]
async fn test_arb_signal_flows_to_alert_delivery() {
    let store = Store::open_in_memory().unwrap();
    let cache = Arc::new(BookCache::new());
    let universe = tracked_universe();
    let settings = alert_settings();

    // Spec scenario: executable edge down to q = 200 at the 1% floor.
    cache.apply_snapshot(book(
        "tok_yes",
        vec![
            BookLevel::new(dec!(0.48), dec!(100)),
            BookLevel::new(dec!(0.50), dec!(500)),
        ],
    ));
    cache.apply_snapshot(book(
        "tok_no",
        vec![
            BookLevel::new(dec!(0.50), dec!(200)),
            BookLevel::new(dec!(0.52), dec!(400)),
        ],
    ));

    let emitted = run_arb_engine(&store, &settings, &cache, &universe).unwrap();
    assert_eq!(emitted, 1);

    let channel = RecordingChannel::new(false);
    let dispatcher = AlertDispatcher::new(Arc::clone(&settings))
        .with_channels(vec![channel.clone() as Arc<dyn AlertChannel>]);

    let sent = dispatcher.dispatch(&store).await.unwrap();
    assert_eq!(sent, 1);
    assert_eq!(channel.sent.load(Ordering::SeqCst), 1);

    let counts = store.alert_status_counts().unwrap();
    assert_eq!(counts.get("SENT"), Some(&1));

    // Everything dispatched; a second pass is a no-op.
    assert_eq!(dispatcher.dispatch(&store).await.unwrap(), 0);
}

#[tokio::test]
async fn test_trade_reingestion_produces_no_duplicates() {
    let store = Store::open_in_memory().unwrap();
    let settings = Arc::new(Settings::default());

    let page = vec![
        large_trade("0xT1", "0xa11ce"),
        large_trade("0xT2", "0xb0b"),
    ];

    let mut inserted = 0;
    for trade in &page {
        if store.insert_trade(trade).unwrap() {
            inserted += 1;
        }
    }
    assert_eq!(inserted, 2);
    assert_eq!(run_trade_engine(&store, &settings).unwrap(), 2);
    let signal_count = store.undispatched_signals(50).unwrap().len();

    // Re-walk the same page: zero new rows, zero new signals.
    for trade in &page {
        assert!(!store.insert_trade(trade).unwrap());
    }
    assert_eq!(run_trade_engine(&store, &settings).unwrap(), 0);
    assert_eq!(store.undispatched_signals(50).unwrap().len(), signal_count);
}

#[tokio::test]
async fn test_alert_dedupe_window_one_sent_one_suppressed() {
    let store = Store::open_in_memory().unwrap();
    let settings = alert_settings();

    // Two arb signals for the same market inside the dedupe window, same
    // severity, distinct dedupe keys.
    for (edge, q) in [("0.0150", "200"), ("0.0151", "210")] {
        let signal = NewSignal {
            signal_type: SignalType::ArbBuyBoth,
            dedupe_key: format!("ARB_BUY_BOTH:0xcond:{}:{}", edge, q),
            severity: 3,
            wallet: None,
            condition_id: Some("0xcond".to_string()),
            payload: serde_json::json!({"edge_at_q_max": edge, "q_max": q}),
        };
        store.insert_signal(&signal, Utc::now()).unwrap();
    }

    let channel = RecordingChannel::new(false);
    let dispatcher = AlertDispatcher::new(Arc::clone(&settings))
        .with_channels(vec![channel.clone() as Arc<dyn AlertChannel>]);

    let sent = dispatcher.dispatch(&store).await.unwrap();
    assert_eq!(sent, 1);
    assert_eq!(channel.sent.load(Ordering::SeqCst), 1);

    let counts = store.alert_status_counts().unwrap();
    assert_eq!(counts.get("SENT"), Some(&1));
    assert_eq!(counts.get("SUPPRESSED"), Some(&1));
}

#[tokio::test]
async fn test_alert_dedupe_severity_escalation_sends_again() {
    let store = Store::open_in_memory().unwrap();
    let settings = alert_settings();

    let emit = |severity: u8, key: &str| {
        let signal = NewSignal {
            signal_type: SignalType::ArbBuyBoth,
            dedupe_key: key.to_string(),
            severity,
            wallet: None,
            condition_id: Some("0xcond".to_string()),
            payload: serde_json::json!({"edge_at_q_max": "0.02", "q_max": "100"}),
        };
        store.insert_signal(&signal, Utc::now()).unwrap();
    };

    emit(2, "ARB_BUY_BOTH:0xcond:a");
    emit(4, "ARB_BUY_BOTH:0xcond:b");

    let channel = RecordingChannel::new(false);
    let dispatcher = AlertDispatcher::new(Arc::clone(&settings))
        .with_channels(vec![channel.clone() as Arc<dyn AlertChannel>]);

    // Severity strictly increased, so the second delivery goes through.
    let sent = dispatcher.dispatch(&store).await.unwrap();
    assert_eq!(sent, 2);
}

#[tokio::test]
async fn test_failed_delivery_is_logged_with_error() {
    let store = Store::open_in_memory().unwrap();
    let settings = alert_settings();

    let signal = NewSignal {
        signal_type: SignalType::LargeTakerTrade,
        dedupe_key: "LARGE_TAKER_TRADE:tx:0xT1".to_string(),
        severity: 3,
        wallet: Some("0xw".to_string()),
        condition_id: Some("0xcond".to_string()),
        payload: serde_json::json!({"notional_usd": "75000", "market_title": "M"}),
    };
    store.insert_signal(&signal, Utc::now()).unwrap();

    let channel = RecordingChannel::new(true);
    let dispatcher = AlertDispatcher::new(Arc::clone(&settings))
        .with_channels(vec![channel as Arc<dyn AlertChannel>]);

    let sent = dispatcher.dispatch(&store).await.unwrap();
    assert_eq!(sent, 0);

    let counts = store.alert_status_counts().unwrap();
    assert_eq!(counts.get("FAILED"), Some(&1));
}
