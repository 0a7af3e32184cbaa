//! Cooperative fixed-interval job runner.
//!
//! Each named job runs on its own interval. A tick that lands while the
//! previous run is still executing is skipped (no overlap per job name);
//! different jobs run concurrently. Failures are logged with structured
//! context and recorded in `job_runs`; the interval is the retry cadence.
//! Shutdown is cooperative: running jobs are abandoned at their next
//! suspension point and idempotent storage makes the rerun safe.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::broadcast;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{error, info, warn};

use crate::storage::Store;

/// Boxed job future; resolves to the number of records processed.
pub type JobFuture = Pin<Box<dyn Future<Output = anyhow::Result<usize>> + Send>>;

/// A named job with a fixed interval.
pub struct Job {
    pub name: &'static str,
    pub interval: Duration,
    run: Arc<dyn Fn() -> JobFuture + Send + Sync>,
}

impl Job {
    pub fn new<F>(name: &'static str, interval: Duration, run: F) -> Self
    where
        F: Fn() -> JobFuture + Send + Sync + 'static,
    {
        Self {
            name,
            interval,
            run: Arc::new(run),
        }
    }
}

/// Drives the registered jobs until shutdown.
pub struct Scheduler {
    store: Arc<Store>,
    jobs: Vec<Job>,
}

impl Scheduler {
    pub fn new(store: Arc<Store>) -> Self {
        Self {
            store,
            jobs: Vec::new(),
        }
    }

    pub fn add_job(&mut self, job: Job) {
        self.jobs.push(job);
    }

    pub fn job_count(&self) -> usize {
        self.jobs.len()
    }

    /// Spawn one task per job and wait for all of them to exit.
    pub async fn run(self, shutdown: broadcast::Sender<()>) {
        let mut handles = Vec::with_capacity(self.jobs.len());
        for job in self.jobs {
            let store = Arc::clone(&self.store);
            let rx = shutdown.subscribe();
            handles.push(tokio::spawn(run_job_loop(job, store, rx)));
        }

        for handle in handles {
            let _ = handle.await;
        }
        info!(component = "scheduler", "all job loops stopped");
    }
}

/// Per-job loop: tick, run to completion, record the outcome.
async fn run_job_loop(job: Job, store: Arc<Store>, mut shutdown: broadcast::Receiver<()>) {
    let mut ticker = interval(job.interval);
    // A tick that lands mid-run is dropped rather than queued.
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    info!(
        component = "scheduler",
        job_name = job.name,
        interval_s = job.interval.as_secs(),
        "job registered"
    );

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = shutdown.recv() => {
                info!(component = "scheduler", job_name = job.name, "job loop stopping");
                return;
            }
        }

        let started_at = Utc::now();
        if let Err(e) = store.job_started(job.name, started_at) {
            warn!(component = "scheduler", job_name = job.name, error = %e, "failed to record job start");
        }
        let clock = tokio::time::Instant::now();

        let outcome = tokio::select! {
            result = (job.run)() => Some(result),
            _ = shutdown.recv() => None,
        };
        let duration_ms = clock.elapsed().as_secs_f64() * 1000.0;

        match outcome {
            Some(Ok(processed)) => {
                info!(
                    component = "scheduler",
                    job_name = job.name,
                    duration_ms = duration_ms as u64,
                    processed,
                    "job succeeded"
                );
                if let Err(e) = store.job_succeeded(job.name, duration_ms, Utc::now()) {
                    warn!(component = "scheduler", job_name = job.name, error = %e, "failed to record job success");
                }
            }
            Some(Err(e)) => {
                error!(
                    component = "scheduler",
                    job_name = job.name,
                    duration_ms = duration_ms as u64,
                    error = %e,
                    "job failed"
                );
                if let Err(e) = store.job_failed(job.name, &format!("{:#}", e), duration_ms, Utc::now()) {
                    warn!(component = "scheduler", job_name = job.name, error = %e, "failed to record job failure");
                }
            }
            None => {
                // Cancelled mid-run; partial work is abandoned and the
                // idempotent upserts make the restart safe.
                warn!(component = "scheduler", job_name = job.name, "job cancelled by shutdown");
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting_job(
        name: &'static str,
        every: Duration,
        counter: Arc<AtomicUsize>,
        delay: Duration,
    ) -> Job {
        Job::new(name, every, move || -> JobFuture {
            let counter = Arc::clone(&counter);
            Box::pin(async move {
                counter.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(delay).await;
                Ok(1)
            })
        })
    }

    #[tokio::test]
    async fn test_jobs_run_and_stop_on_shutdown() {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let counter = Arc::new(AtomicUsize::new(0));

        let mut scheduler = Scheduler::new(Arc::clone(&store));
        scheduler.add_job(counting_job(
            "tick",
            Duration::from_millis(20),
            Arc::clone(&counter),
            Duration::from_millis(1),
        ));
        assert_eq!(scheduler.job_count(), 1);

        let (shutdown_tx, _) = broadcast::channel(1);
        let tx = shutdown_tx.clone();
        let run = tokio::spawn(scheduler.run(shutdown_tx));

        tokio::time::sleep(Duration::from_millis(90)).await;
        let _ = tx.send(());
        run.await.unwrap();

        let runs = counter.load(Ordering::SeqCst);
        assert!(runs >= 2, "expected at least 2 runs, got {}", runs);

        let rows = store.job_runs().unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].job_name, "tick");
        assert!(rows[0].last_success_at.is_some());
    }

    #[tokio::test]
    async fn test_slow_job_skips_overlapping_ticks() {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let counter = Arc::new(AtomicUsize::new(0));

        let mut scheduler = Scheduler::new(Arc::clone(&store));
        // Interval far shorter than the job duration: ticks must be
        // skipped, not queued.
        scheduler.add_job(counting_job(
            "slow",
            Duration::from_millis(10),
            Arc::clone(&counter),
            Duration::from_millis(50),
        ));

        let (shutdown_tx, _) = broadcast::channel(1);
        let tx = shutdown_tx.clone();
        let run = tokio::spawn(scheduler.run(shutdown_tx));

        tokio::time::sleep(Duration::from_millis(160)).await;
        let _ = tx.send(());
        run.await.unwrap();

        let runs = counter.load(Ordering::SeqCst);
        assert!(runs <= 4, "overlapping ticks were not skipped: {}", runs);
    }

    #[tokio::test]
    async fn test_failed_job_records_error_and_keeps_ticking() {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let counter = Arc::new(AtomicUsize::new(0));
        let attempts = Arc::clone(&counter);

        let mut scheduler = Scheduler::new(Arc::clone(&store));
        scheduler.add_job(Job::new(
            "flaky",
            Duration::from_millis(15),
            move || -> JobFuture {
                let attempts = Arc::clone(&attempts);
                Box::pin(async move {
                    let n = attempts.fetch_add(1, Ordering::SeqCst);
                    if n == 0 {
                        anyhow::bail!("boom");
                    }
                    Ok(0)
                })
            },
        ));

        let (shutdown_tx, _) = broadcast::channel(1);
        let tx = shutdown_tx.clone();
        let run = tokio::spawn(scheduler.run(shutdown_tx));

        tokio::time::sleep(Duration::from_millis(80)).await;
        let _ = tx.send(());
        run.await.unwrap();

        assert!(counter.load(Ordering::SeqCst) >= 2, "job did not keep ticking after failure");
        let rows = store.job_runs().unwrap();
        assert!(rows[0].last_success_at.is_some());
    }
}
