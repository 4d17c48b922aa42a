//! Worker pool (C5): a fixed-size pool draining the work queue and driving
//! each job through the processing pipeline with per-attempt timeout,
//! retries, and cooperative cancellation.
//!
//! Grounded on `rcommerce-core::jobs::worker::Worker::start`/`run`'s
//! `tokio::spawn`-a-loop-per-worker idiom, generalized from one `Worker`
//! struct per task to a pool owning `N` identical loop tasks that share one
//! queue/registry/stager.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use super::clock::{Clock, JobId};
use super::job::{ErrorCode, JobStatus};
use super::queue::WorkQueue;
use super::registry::Registry;
use super::stager::{self, ObjectStore, StoreError};
use crate::config::EngineConfig;

/// Outcome of a single attempt's processing future, consumed by the worker
/// loop after the attempt task completes (or panics).
enum AttemptOutcome {
    Completed(stager::StagedArtifact),
    Transient(String),
    Permanent(String),
    /// The record was observed `cancelled`/`expired` mid-attempt; the
    /// worker abandons without invoking the stager (spec §4.5 step 3/§7).
    Abandoned,
}

pub struct WorkerPool {
    queue: WorkQueue,
    registry: Registry,
    store: Arc<dyn ObjectStore>,
    clock: Arc<dyn Clock>,
    config: Arc<EngineConfig>,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    pub fn new(
        queue: WorkQueue,
        registry: Registry,
        store: Arc<dyn ObjectStore>,
        clock: Arc<dyn Clock>,
        config: Arc<EngineConfig>,
    ) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        Self {
            queue,
            registry,
            store,
            clock,
            config,
            shutdown_tx,
            shutdown_rx,
            handles: Vec::new(),
        }
    }

    /// Spawns `workerConcurrency` long-lived worker tasks.
    pub fn spawn(&mut self) {
        let n = self.config.worker_concurrency;
        for worker_index in 0..n {
            let queue = self.queue.clone();
            let registry = self.registry.clone();
            let store = self.store.clone();
            let clock = self.clock.clone();
            let config = self.config.clone();
            let shutdown_rx = self.shutdown_rx.clone();
            let handle = tokio::spawn(async move {
                worker_loop(worker_index, queue, registry, store, clock, config, shutdown_rx).await;
            });
            self.handles.push(handle);
        }
    }

    /// Stops accepting new dequeues, signals in-flight workers to cease at
    /// the next tick, then waits up to `shutdownGrace` before abandoning
    /// stragglers (spec §4.5).
    pub async fn shutdown(&mut self, grace: Duration) {
        self.queue.shut_down();
        let _ = self.shutdown_tx.send(true);

        let handles = std::mem::take(&mut self.handles);
        let joined = tokio::time::timeout(grace, futures_join_all(handles));
        if joined.await.is_err() {
            warn!("worker pool shutdown grace period elapsed; abandoning stragglers");
        }
    }
}

/// Local stand-in for `futures::future::join_all`. The workspace does not
/// depend on the `futures` crate, and `tokio::task::JoinHandle` futures
/// compose fine with a manual fan-in.
async fn futures_join_all(handles: Vec<JoinHandle<()>>) {
    for handle in handles {
        let _ = handle.await;
    }
}

#[allow(clippy::too_many_arguments)]
async fn worker_loop(
    worker_index: usize,
    queue: WorkQueue,
    registry: Registry,
    store: Arc<dyn ObjectStore>,
    clock: Arc<dyn Clock>,
    config: Arc<EngineConfig>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    loop {
        let cancel = wait_for_shutdown(shutdown_rx.clone());
        let Some(job_id) = queue.dequeue(cancel).await else {
            info!(worker_index, "worker pool shut down, exiting loop");
            return;
        };

        if *shutdown_rx.borrow() {
            // Pool is shutting down; don't start new work even if we
            // raced a dequeue success against the shutdown signal.
            return;
        }

        process_job(worker_index, job_id, &queue, &registry, &store, &clock, &config).await;
    }
}

async fn wait_for_shutdown(mut rx: watch::Receiver<bool>) {
    loop {
        if *rx.borrow() {
            return;
        }
        if rx.changed().await.is_err() {
            return;
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn process_job(
    worker_index: usize,
    job_id: JobId,
    queue: &WorkQueue,
    registry: &Registry,
    store: &Arc<dyn ObjectStore>,
    clock: &Arc<dyn Clock>,
    config: &Arc<EngineConfig>,
) {
    let claimed = registry
        .update(job_id, |record| -> Result<(), super::job::IllegalTransition> {
            if matches!(record.status, JobStatus::Cancelled | JobStatus::Expired) {
                return Ok(()); // no-op: step 2, drop already-terminal jobs
            }
            record.mark_started(clock.now())
        })
        .await;

    let Ok(Some(record)) = claimed else {
        return; // job vanished (swept) between dequeue and claim
    };

    if record.status != JobStatus::Running {
        return; // was cancelled/expired; dropped above
    }

    let priority = record.priority;
    let max_attempts = record.max_attempts;
    let attempt_number = record.attempts;

    let registry_for_attempt = registry.clone();
    let store_for_attempt = store.clone();
    let clock_for_attempt = clock.clone();
    let config_for_attempt = config.clone();

    // Run the attempt on its own task so a panic surfaces as a `JoinError`
    // to this loop rather than crashing the worker (spec §7 panic policy).
    let attempt_task = tokio::spawn(async move {
        run_attempt(
            job_id,
            registry_for_attempt,
            store_for_attempt,
            clock_for_attempt,
            config_for_attempt,
        )
        .await
    });

    let now = clock.now();
    match attempt_task.await {
        Ok(AttemptOutcome::Completed(artifact)) => {
            let outcome = super::job::JobOutcome {
                url: artifact.url,
                checksum: artifact.checksum,
                size: artifact.size,
                url_expires_at: artifact.url_expires_at,
            };
            let _ = registry
                .update(job_id, move |record| record.mark_completed(outcome, clock.now()))
                .await;
        }
        Ok(AttemptOutcome::Abandoned) => {
            info!(worker_index, %job_id, "job abandoned: cancelled or expired mid-attempt");
        }
        Ok(AttemptOutcome::Transient(message)) => {
            if attempt_number < max_attempts {
                let delay = clock.backoff(attempt_number, config.backoff_base(), config.backoff_max());
                let retry_after_ms = delay.as_millis() as u64;
                let updated = registry
                    .update(job_id, move |record| {
                        record.mark_failed_and_retry(message.clone(), retry_after_ms, clock.now())
                    })
                    .await;
                if matches!(updated, Ok(Some(_))) {
                    schedule_retry(queue.clone(), job_id, priority, delay);
                }
            } else {
                let _ = registry
                    .update(job_id, move |record| {
                        record.mark_failed_terminal(ErrorCode::Transient, message.clone(), now)
                    })
                    .await;
            }
        }
        Ok(AttemptOutcome::Permanent(message)) => {
            let _ = registry
                .update(job_id, move |record| {
                    record.mark_failed_terminal(ErrorCode::Permanent, message.clone(), now)
                })
                .await;
        }
        Err(join_error) => {
            error!(worker_index, %job_id, %join_error, "worker attempt panicked");
            let _ = registry
                .update(job_id, move |record| {
                    record.mark_failed_terminal(
                        ErrorCode::Internal,
                        "internal error during processing".to_string(),
                        now,
                    )
                })
                .await;
        }
    }
}

fn schedule_retry(queue: WorkQueue, job_id: JobId, priority: super::job::Priority, delay: Duration) {
    tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        let _ = queue.enqueue(job_id, priority).await;
    });
}

/// Drives one attempt: the simulated processing delay (broken into
/// cancellable progress ticks), the transition into
/// `processing_artifacts`, and the stager invocation. The whole attempt,
/// not just the stager call, runs under the per-attempt timeout (spec
/// §4.5 step 7).
async fn run_attempt(
    job_id: JobId,
    registry: Registry,
    store: Arc<dyn ObjectStore>,
    clock: Arc<dyn Clock>,
    config: Arc<EngineConfig>,
) -> AttemptOutcome {
    let attempt = run_attempt_body(job_id, &registry, store, &clock, &config);
    match tokio::time::timeout(config.per_attempt_timeout(), attempt).await {
        Ok(outcome) => outcome,
        Err(_elapsed) => AttemptOutcome::Transient("attempt_timeout".to_string()),
    }
}

async fn run_attempt_body(
    job_id: JobId,
    registry: &Registry,
    store: Arc<dyn ObjectStore>,
    clock: &Arc<dyn Clock>,
    config: &Arc<EngineConfig>,
) -> AttemptOutcome {
    let (delay_min, delay_max) = config.delay_range();
    let total_delay = clock.sample_delay(delay_min, delay_max);
    let tick_interval = config.progress_tick_interval();

    if let Some(outcome) = run_progress_ticks(&job_id, registry, clock, total_delay, tick_interval).await {
        return outcome;
    }

    let transitioned = registry
        .update(job_id, |record| {
            if matches!(record.status, JobStatus::Cancelled | JobStatus::Expired) {
                return Ok(());
            }
            record.mark_processing_artifacts(clock.now())
        })
        .await;
    match transitioned {
        Ok(Some(record)) if record.status == JobStatus::ProcessingArtifacts => {}
        _ => return AttemptOutcome::Abandoned,
    }

    let Some(record) = registry.get(job_id).await else {
        return AttemptOutcome::Abandoned;
    };

    match stager::stage(store.as_ref(), &record, config.artifact_url_ttl()).await {
        Ok(artifact) => AttemptOutcome::Completed(artifact),
        Err(store_error) => classify_store_error(store_error),
    }
}

fn classify_store_error(error: StoreError) -> AttemptOutcome {
    if error.transient {
        AttemptOutcome::Transient(error.message)
    } else {
        AttemptOutcome::Permanent(error.message)
    }
}

/// Sleeps `total_delay` in increments of `tick_interval`, updating
/// `progressPercent` (capped at 95) and checking for external
/// cancellation/expiration after every tick. Returns `Some(Abandoned)` if
/// the job was cancelled/expired mid-delay; `None` if the full delay
/// elapsed uninterrupted.
async fn run_progress_ticks(
    job_id: &JobId,
    registry: &Registry,
    clock: &Arc<dyn Clock>,
    total_delay: Duration,
    tick_interval: Duration,
) -> Option<AttemptOutcome> {
    let start = clock.monotonic_now();
    loop {
        let elapsed = clock.monotonic_now().saturating_duration_since(start);
        if elapsed >= total_delay {
            return None;
        }
        let remaining = total_delay - elapsed;
        let sleep_for = remaining.min(tick_interval);
        tokio::time::sleep(sleep_for).await;

        let elapsed = clock.monotonic_now().saturating_duration_since(start);
        let fraction = if total_delay.is_zero() {
            1.0
        } else {
            (elapsed.as_secs_f64() / total_delay.as_secs_f64()).min(1.0)
        };
        let percent = (fraction * 95.0) as u8;

        let current = registry
            .update(*job_id, move |record| {
                if matches!(record.status, JobStatus::Cancelled | JobStatus::Expired) {
                    return Ok(());
                }
                record.set_progress(percent);
                Ok::<(), super::job::IllegalTransition>(())
            })
            .await;

        match current {
            Ok(Some(record)) if matches!(record.status, JobStatus::Cancelled | JobStatus::Expired) => {
                return Some(AttemptOutcome::Abandoned);
            }
            Ok(Some(_)) => {}
            _ => return Some(AttemptOutcome::Abandoned),
        }

        if elapsed >= total_delay {
            return None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::clock::SystemClock;
    use crate::engine::job::{JobRecord, Priority};
    use crate::engine::stager::LocalObjectStore;
    use std::sync::Mutex as StdMutex;

    fn test_config() -> Arc<EngineConfig> {
        Arc::new(EngineConfig::fast_for_tests())
    }

    async fn setup() -> (WorkQueue, Registry, Arc<dyn ObjectStore>, Arc<dyn Clock>, Arc<EngineConfig>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store: Arc<dyn ObjectStore> = Arc::new(LocalObjectStore::new(dir.path()));
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let config = test_config();
        let queue = WorkQueue::new(config.queue_capacity);
        let registry = Registry::new();
        (queue, registry, store, clock, config, dir)
    }

    #[tokio::test]
    async fn happy_path_job_completes() {
        let (queue, registry, store, clock, config, _dir) = setup().await;
        let record = JobRecord::new(
            clock.new_job_id(),
            vec![70_000],
            None,
            None,
            Priority::Standard,
            config.max_attempts,
            clock.now(),
            chrono::Duration::from_std(config.job_ttl()).unwrap(),
        );
        let job_id = record.job_id;
        registry.insert(record, clock.now());
        queue.enqueue(job_id, Priority::Standard).await.unwrap();

        let mut pool = WorkerPool::new(queue, registry.clone(), store, clock, config);
        pool.spawn();

        tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                if let Some(record) = registry.get(job_id).await {
                    if record.status == JobStatus::Completed {
                        assert_eq!(record.progress_percent, 100);
                        assert!(record.result.is_some());
                        assert_eq!(record.attempts, 1);
                        break;
                    }
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("job did not complete in time");

        pool.shutdown(Duration::from_secs(1)).await;
    }

    /// A stager double that fails transiently the first N calls, then
    /// succeeds.
    struct FlakyStore {
        inner: LocalObjectStore,
        fail_times: StdMutex<u32>,
    }

    #[async_trait::async_trait]
    impl ObjectStore for FlakyStore {
        async fn put_descriptor(&self, key: &str, bytes: &[u8]) -> Result<(), StoreError> {
            let mut remaining = self.fail_times.lock().unwrap();
            if *remaining > 0 {
                *remaining -= 1;
                return Err(StoreError::transient("simulated outage"));
            }
            drop(remaining);
            self.inner.put_descriptor(key, bytes).await
        }

        async fn presign_get(&self, key: &str, ttl: Duration) -> Result<stager::PresignedUrl, StoreError> {
            self.inner.presign_get(key, ttl).await
        }

        async fn health_check(&self) -> Result<(), StoreError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn retries_then_succeeds() {
        let dir = tempfile::tempdir().unwrap();
        let store: Arc<dyn ObjectStore> = Arc::new(FlakyStore {
            inner: LocalObjectStore::new(dir.path()),
            fail_times: StdMutex::new(2),
        });
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let config = test_config();
        let queue = WorkQueue::new(config.queue_capacity);
        let registry = Registry::new();

        let record = JobRecord::new(
            clock.new_job_id(),
            vec![70_000],
            None,
            None,
            Priority::Standard,
            config.max_attempts,
            clock.now(),
            chrono::Duration::from_std(config.job_ttl()).unwrap(),
        );
        let job_id = record.job_id;
        registry.insert(record, clock.now());
        queue.enqueue(job_id, Priority::Standard).await.unwrap();

        let mut pool = WorkerPool::new(queue, registry.clone(), store, clock, config);
        pool.spawn();

        tokio::time::timeout(Duration::from_secs(3), async {
            loop {
                if let Some(record) = registry.get(job_id).await {
                    if record.status == JobStatus::Completed {
                        assert_eq!(record.attempts, 3);
                        break;
                    }
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("job did not eventually complete");

        pool.shutdown(Duration::from_secs(1)).await;
    }

    #[tokio::test]
    async fn exhausts_retries_and_fails() {
        let dir = tempfile::tempdir().unwrap();
        let store: Arc<dyn ObjectStore> = Arc::new(FlakyStore {
            inner: LocalObjectStore::new(dir.path()),
            fail_times: StdMutex::new(100),
        });
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let mut config = EngineConfig::fast_for_tests();
        config.max_attempts = 2;
        let config = Arc::new(config);
        let queue = WorkQueue::new(config.queue_capacity);
        let registry = Registry::new();

        let record = JobRecord::new(
            clock.new_job_id(),
            vec![70_000],
            None,
            None,
            Priority::Standard,
            config.max_attempts,
            clock.now(),
            chrono::Duration::from_std(config.job_ttl()).unwrap(),
        );
        let job_id = record.job_id;
        registry.insert(record, clock.now());
        queue.enqueue(job_id, Priority::Standard).await.unwrap();

        let mut pool = WorkerPool::new(queue, registry.clone(), store, clock, config);
        pool.spawn();

        tokio::time::timeout(Duration::from_secs(3), async {
            loop {
                if let Some(record) = registry.get(job_id).await {
                    if record.status == JobStatus::Failed && record.attempts == 2 {
                        assert_eq!(record.error.as_ref().unwrap().code, ErrorCode::Transient);
                        break;
                    }
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("job did not terminally fail in time");

        pool.shutdown(Duration::from_secs(1)).await;
    }

    #[tokio::test]
    async fn cancellation_mid_run_abandons_without_staging() {
        let dir = tempfile::tempdir().unwrap();
        let store: Arc<dyn ObjectStore> = Arc::new(LocalObjectStore::new(dir.path()));
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let mut config = EngineConfig::fast_for_tests();
        config.delay_min_secs = 0;
        config.delay_max_secs = 0;
        config.progress_tick_interval_ms = 5;
        let config = Arc::new(config);
        let queue = WorkQueue::new(config.queue_capacity);
        let registry = Registry::new();

        let record = JobRecord::new(
            clock.new_job_id(),
            vec![70_000],
            None,
            None,
            Priority::Standard,
            config.max_attempts,
            clock.now(),
            chrono::Duration::seconds(30),
        );
        let job_id = record.job_id;
        registry.insert(record, clock.now());

        // Cancel before the job is ever dequeued: covers the "drop
        // already-terminal jobs" claim path without racing a tick window.
        let _ = registry
            .update(job_id, |r| r.mark_cancelled(Utc::now()))
            .await;
        queue.enqueue(job_id, Priority::Standard).await.unwrap();

        let mut pool = WorkerPool::new(queue, registry.clone(), store, clock, config);
        pool.spawn();

        tokio::time::sleep(Duration::from_millis(100)).await;
        let record = registry.get(job_id).await.unwrap();
        assert_eq!(record.status, JobStatus::Cancelled);
        assert!(record.result.is_none());

        pool.shutdown(Duration::from_secs(1)).await;
    }
}
