//! Rate-paced HTTP request executor shared by the REST upstream clients.
//!
//! The pool owns a single `reqwest::Client` and enforces:
//! - bounded concurrency across all callers
//! - a per-request timeout
//! - jittered exponential backoff retries on 5xx and network errors
//! - self-pacing after a 429: a minimum gap between requests that widens
//!   on throttling and decays on success
//!
//! No upstream-specific logic lives here.

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rand::Rng;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use thiserror::Error;
use tokio::sync::{Mutex, Semaphore};
use tracing::{debug, warn};

/// Errors surfaced by the HTTP pool.
#[derive(Debug, Error)]
pub enum HttpError {
    /// Network failure or 5xx that survived all retry attempts.
    #[error("transient upstream failure after {attempts} attempts: {message}")]
    Transient { attempts: u32, message: String },

    /// Upstream kept throttling through every attempt.
    #[error("throttled by upstream after {attempts} attempts")]
    Throttled { attempts: u32 },

    /// Non-retryable status (4xx other than 429).
    #[error("upstream returned status {status}")]
    Status { status: u16 },

    /// Body was not the JSON shape the caller asked for.
    #[error("failed to decode response body: {0}")]
    Decode(String),
}

impl HttpError {
    /// True when a job should report partial progress rather than failure.
    pub fn is_throttled(&self) -> bool {
        matches!(self, HttpError::Throttled { .. })
    }
}

/// Configuration for the HTTP pool.
#[derive(Debug, Clone)]
pub struct HttpPoolConfig {
    /// Maximum in-flight requests across all callers.
    pub max_concurrency: usize,
    /// Per-request timeout.
    pub request_timeout: Duration,
    /// Retry attempts per request (covers the initial try).
    pub max_attempts: u32,
    /// Base backoff delay; doubles per attempt with jitter.
    pub backoff_base: Duration,
    /// Ceiling for the self-pacing gap after repeated 429s.
    pub max_pace_gap: Duration,
}

impl Default for HttpPoolConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 10,
            request_timeout: Duration::from_secs(10),
            max_attempts: 4,
            backoff_base: Duration::from_millis(500),
            max_pace_gap: Duration::from_secs(30),
        }
    }
}

/// Request/outcome counters exposed to the metrics collector.
#[derive(Debug, Default)]
pub struct PoolStats {
    pub requests_ok: AtomicU64,
    pub requests_retried: AtomicU64,
    pub requests_throttled: AtomicU64,
    pub requests_failed: AtomicU64,
    /// Epoch millis of the most recent completed request.
    pub last_request_ms: AtomicI64,
    /// Duration of the most recent completed request, in millis.
    pub last_duration_ms: AtomicI64,
}

/// Point-in-time copy of the pool counters.
#[derive(Debug, Clone, serde::Serialize)]
pub struct PoolStatsSnapshot {
    pub requests_ok: u64,
    pub requests_retried: u64,
    pub requests_throttled: u64,
    pub requests_failed: u64,
    pub last_request_ms: i64,
    pub last_duration_ms: i64,
}

impl PoolStats {
    pub fn snapshot(&self) -> PoolStatsSnapshot {
        PoolStatsSnapshot {
            requests_ok: self.requests_ok.load(Ordering::Relaxed),
            requests_retried: self.requests_retried.load(Ordering::Relaxed),
            requests_throttled: self.requests_throttled.load(Ordering::Relaxed),
            requests_failed: self.requests_failed.load(Ordering::Relaxed),
            last_request_ms: self.last_request_ms.load(Ordering::Relaxed),
            last_duration_ms: self.last_duration_ms.load(Ordering::Relaxed),
        }
    }
}

/// Self-pacing state: a minimum gap enforced between request starts.
#[derive(Debug, Default)]
struct Pace {
    /// Current enforced gap; zero when the upstream is healthy.
    gap: Duration,
    /// Earliest instant the next request may start.
    next_allowed: Option<tokio::time::Instant>,
}

/// Shared, rate-paced HTTP request executor.
pub struct HttpPool {
    client: reqwest::Client,
    semaphore: Semaphore,
    pace: Mutex<Pace>,
    config: HttpPoolConfig,
    stats: PoolStats,
}

impl HttpPool {
    /// Create a pool with the given configuration.
    pub fn new(config: HttpPoolConfig) -> Result<Arc<Self>, HttpError> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| HttpError::Transient {
                attempts: 0,
                message: e.to_string(),
            })?;

        Ok(Arc::new(Self {
            client,
            semaphore: Semaphore::new(config.max_concurrency),
            pace: Mutex::new(Pace::default()),
            config,
            stats: PoolStats::default(),
        }))
    }

    /// Create a pool with default configuration.
    pub fn with_defaults() -> Result<Arc<Self>, HttpError> {
        Self::new(HttpPoolConfig::default())
    }

    /// Counters for the metrics snapshot.
    pub fn stats(&self) -> &PoolStats {
        &self.stats
    }

    /// Issue a GET and decode the JSON response.
    pub async fn get_json<T: DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&str, String)],
    ) -> Result<T, HttpError> {
        self.execute(|client| client.get(url).query(query)).await
    }

    /// Issue a POST with a JSON body and decode the JSON response.
    pub async fn post_json<T: DeserializeOwned, B: serde::Serialize>(
        &self,
        url: &str,
        body: &B,
    ) -> Result<T, HttpError> {
        self.execute(|client| client.post(url).json(body)).await
    }

    async fn execute<T, F>(&self, build: F) -> Result<T, HttpError>
    where
        T: DeserializeOwned,
        F: Fn(&reqwest::Client) -> reqwest::RequestBuilder,
    {
        let _permit = self
            .semaphore
            .acquire()
            .await
            .map_err(|_| HttpError::Transient {
                attempts: 0,
                message: "pool closed".to_string(),
            })?;

        let mut attempt: u32 = 0;
        let mut last_transient = String::new();
        let mut throttled = false;

        while attempt < self.config.max_attempts {
            attempt += 1;
            self.wait_for_pace().await;

            let started = tokio::time::Instant::now();
            let result = build(&self.client).send().await;
            self.record_timing(started.elapsed());

            match result {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        self.on_success().await;
                        self.stats.requests_ok.fetch_add(1, Ordering::Relaxed);
                        return response
                            .json::<T>()
                            .await
                            .map_err(|e| HttpError::Decode(e.to_string()));
                    }

                    if status == StatusCode::TOO_MANY_REQUESTS {
                        throttled = true;
                        self.stats.requests_throttled.fetch_add(1, Ordering::Relaxed);
                        let gap = self.widen_pace().await;
                        warn!(status_code = 429, pace_ms = gap.as_millis() as u64, "upstream throttled, widening request gap");
                        continue;
                    }

                    if status.is_server_error() {
                        last_transient = format!("status {}", status.as_u16());
                        self.stats.requests_retried.fetch_add(1, Ordering::Relaxed);
                        self.backoff(attempt).await;
                        continue;
                    }

                    self.stats.requests_failed.fetch_add(1, Ordering::Relaxed);
                    return Err(HttpError::Status {
                        status: status.as_u16(),
                    });
                }
                Err(e) => {
                    last_transient = e.to_string();
                    self.stats.requests_retried.fetch_add(1, Ordering::Relaxed);
                    debug!(error = %e, attempt, "request failed, backing off");
                    self.backoff(attempt).await;
                }
            }
        }

        self.stats.requests_failed.fetch_add(1, Ordering::Relaxed);
        if throttled {
            Err(HttpError::Throttled { attempts: attempt })
        } else {
            Err(HttpError::Transient {
                attempts: attempt,
                message: last_transient,
            })
        }
    }

    /// Sleep until the pacing gate opens, then reserve the next slot.
    async fn wait_for_pace(&self) {
        let wait = {
            let mut pace = self.pace.lock().await;
            let now = tokio::time::Instant::now();
            let wait = pace
                .next_allowed
                .and_then(|at| at.checked_duration_since(now));
            if !pace.gap.is_zero() {
                let start = pace.next_allowed.filter(|at| *at > now).unwrap_or(now);
                pace.next_allowed = Some(start + pace.gap);
            }
            wait
        };
        if let Some(wait) = wait {
            tokio::time::sleep(wait).await;
        }
    }

    /// Widen the pacing gap after a 429 and return the new gap.
    async fn widen_pace(&self) -> Duration {
        let mut pace = self.pace.lock().await;
        let widened = if pace.gap.is_zero() {
            Duration::from_secs(1)
        } else {
            pace.gap * 2
        };
        pace.gap = widened.min(self.config.max_pace_gap);
        pace.next_allowed = Some(tokio::time::Instant::now() + pace.gap);
        pace.gap
    }

    /// Decay the pacing gap after a successful request.
    async fn on_success(&self) {
        let mut pace = self.pace.lock().await;
        if !pace.gap.is_zero() {
            pace.gap = pace.gap / 2;
            if pace.gap < Duration::from_millis(100) {
                pace.gap = Duration::ZERO;
                pace.next_allowed = None;
            }
        }
    }

    async fn backoff(&self, attempt: u32) {
        let base = self.config.backoff_base.as_millis() as u64;
        let exp = base.saturating_mul(1u64 << (attempt.min(6) - 1));
        let jitter = rand::thread_rng().gen_range(0..=base / 2);
        tokio::time::sleep(Duration::from_millis(exp + jitter)).await;
    }

    fn record_timing(&self, elapsed: Duration) {
        self.stats
            .last_request_ms
            .store(Utc::now().timestamp_millis(), Ordering::Relaxed);
        self.stats
            .last_duration_ms
            .store(elapsed.as_millis() as i64, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_config_default() {
        let config = HttpPoolConfig::default();
        assert_eq!(config.max_concurrency, 10);
        assert_eq!(config.request_timeout, Duration::from_secs(10));
        assert!(config.max_attempts >= 3);
    }

    #[test]
    fn test_stats_snapshot_starts_zeroed() {
        let pool = HttpPool::with_defaults().unwrap();
        let snapshot = pool.stats().snapshot();
        assert_eq!(snapshot.requests_ok, 0);
        assert_eq!(snapshot.requests_failed, 0);
    }

    #[tokio::test]
    async fn test_widen_and_decay_pace() {
        let pool = HttpPool::with_defaults().unwrap();

        let first = pool.widen_pace().await;
        assert_eq!(first, Duration::from_secs(1));

        let second = pool.widen_pace().await;
        assert_eq!(second, Duration::from_secs(2));

        // Success decays the gap; repeated successes clear it.
        pool.on_success().await;
        pool.on_success().await;
        pool.on_success().await;
        pool.on_success().await;
        pool.on_success().await;

        let pace = pool.pace.lock().await;
        assert!(pace.gap.is_zero());
    }

    #[tokio::test]
    async fn test_pace_cap() {
        let pool = HttpPool::new(HttpPoolConfig {
            max_pace_gap: Duration::from_secs(4),
            ..Default::default()
        })
        .unwrap();

        for _ in 0..10 {
            pool.widen_pace().await;
        }
        let pace = pool.pace.lock().await;
        assert_eq!(pace.gap, Duration::from_secs(4));
    }

    #[tokio::test]
    async fn test_transient_error_after_exhausted_attempts() {
        let pool = HttpPool::new(HttpPoolConfig {
            max_attempts: 1,
            backoff_base: Duration::from_millis(1),
            request_timeout: Duration::from_millis(200),
            ..Default::default()
        })
        .unwrap();

        // Reserved TEST-NET address: connection should fail fast.
        let result: Result<serde_json::Value, HttpError> = pool
            .get_json("http://192.0.2.1:9/none", &[])
            .await;

        match result {
            Err(HttpError::Transient { attempts, .. }) => assert_eq!(attempts, 1),
            other => panic!("expected transient error, got {:?}", other.err()),
        }
    }
}
