//! Shared tracked-universe state.
//!
//! The universe job recomputes the tracked market set; every consumer
//! (open interest, orderbook polling, arb engine, websocket subscriptions)
//! reads a lock-free-ish snapshot. Token updates fan out through a watch
//! channel so the websocket consumer can reconcile subscriptions.

use std::sync::RwLock;

use tokio::sync::watch;

/// One tracked market with its resolved binary tokens.
#[derive(Debug, Clone)]
pub struct TrackedEntry {
    pub condition_id: String,
    pub yes_token_id: String,
    pub no_token_id: String,
    pub neg_risk: bool,
}

/// Process-wide tracked universe.
pub struct Universe {
    entries: RwLock<Vec<TrackedEntry>>,
    tokens_tx: watch::Sender<Vec<String>>,
}

impl Universe {
    pub fn new() -> Self {
        let (tokens_tx, _) = watch::channel(Vec::new());
        Self {
            entries: RwLock::new(Vec::new()),
            tokens_tx,
        }
    }

    /// Replace the tracked set and notify token watchers.
    pub fn replace(&self, entries: Vec<TrackedEntry>) {
        let mut tokens = Vec::with_capacity(entries.len() * 2);
        for entry in &entries {
            tokens.push(entry.yes_token_id.clone());
            tokens.push(entry.no_token_id.clone());
        }
        {
            let mut guard = self.entries.write().unwrap_or_else(|e| e.into_inner());
            *guard = entries;
        }
        // send_replace delivers even when no receiver is connected yet.
        self.tokens_tx.send_replace(tokens);
    }

    /// Snapshot of the tracked markets.
    pub fn entries(&self) -> Vec<TrackedEntry> {
        self.entries
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Snapshot of the tracked condition IDs.
    pub fn condition_ids(&self) -> Vec<String> {
        self.entries
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .map(|e| e.condition_id.clone())
            .collect()
    }

    /// Snapshot of the tracked token IDs (YES and NO interleaved).
    pub fn token_ids(&self) -> Vec<String> {
        self.tokens_tx.borrow().clone()
    }

    /// Watch handle for subscription reconciliation.
    pub fn token_watch(&self) -> watch::Receiver<Vec<String>> {
        self.tokens_tx.subscribe()
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for Universe {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(condition_id: &str) -> TrackedEntry {
        TrackedEntry {
            condition_id: condition_id.to_string(),
            yes_token_id: format!("{}-yes", condition_id),
            no_token_id: format!("{}-no", condition_id),
            neg_risk: false,
        }
    }

    #[test]
    fn test_replace_and_snapshots() {
        let universe = Universe::new();
        assert!(universe.is_empty());

        universe.replace(vec![entry("0xa"), entry("0xb")]);
        assert_eq!(universe.len(), 2);
        assert_eq!(universe.condition_ids(), vec!["0xa", "0xb"]);
        assert_eq!(
            universe.token_ids(),
            vec!["0xa-yes", "0xa-no", "0xb-yes", "0xb-no"]
        );
    }

    #[test]
    fn test_token_watch_sees_updates() {
        let universe = Universe::new();
        let rx = universe.token_watch();

        universe.replace(vec![entry("0xa")]);
        assert_eq!(rx.borrow().len(), 2);
    }
}
