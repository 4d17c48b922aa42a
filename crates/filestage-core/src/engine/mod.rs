//! The job lifecycle engine: C1 (clock/IDs) through C7 (façade).
//!
//! Data flow (spec §2): the HTTP layer calls [`service::JobService::initiate`],
//! which normalizes input, consults the registry's idempotency index,
//! allocates a record, pushes the ID onto the work queue, and returns. A
//! worker in the pool blocks on the queue, pops an ID, loads the record,
//! drives the state machine, invokes the stager on success, and writes the
//! final state back to the registry. Polling handlers call
//! `status`/`resolve`, which read the registry directly. A background
//! sweeper expires stale jobs.

pub mod clock;
pub mod error;
pub mod job;
pub mod queue;
pub mod registry;
pub mod service;
pub mod stager;
pub mod worker;

pub use clock::{Clock, JobId, SystemClock};
pub use error::EngineError;
pub use job::{ErrorCode, JobFailure, JobOutcome, JobRecord, JobStatus, Priority};
pub use queue::{QueueError, WorkQueue};
pub use registry::Registry;
pub use service::{InitiateRequest, InitiateResponse, JobService, ResolveOutcome};
pub use stager::{LocalObjectStore, ObjectStore, S3ObjectStore, StoreError};
pub use worker::WorkerPool;

use std::sync::Arc;

use crate::config::{Config, StorageBackend};

/// Everything a binary needs to run the engine: the façade for the HTTP
/// layer, plus handles to stop the background tasks on shutdown.
pub struct Engine {
    pub service: JobService,
    pub registry: Registry,
    pool: WorkerPool,
    sweeper: tokio::task::JoinHandle<()>,
}

impl Engine {
    /// Builds every component per `config` and starts the worker pool and
    /// sweeper. `store` is injected so callers choose the object storage
    /// backend (or supply a test double) without this constructor needing
    /// to know about it.
    pub fn start(config: &Config, store: Arc<dyn ObjectStore>) -> Self {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let engine_config = Arc::new(config.engine.clone());
        let registry = Registry::new();
        let queue = WorkQueue::new(engine_config.queue_capacity);

        let sweeper = registry.spawn_sweeper(clock.clone(), engine_config.sweep_interval());

        let mut pool = WorkerPool::new(
            queue.clone(),
            registry.clone(),
            store,
            clock.clone(),
            engine_config.clone(),
        );
        pool.spawn();

        let service = JobService::new(registry.clone(), queue, clock, engine_config);

        Self {
            service,
            registry,
            pool,
            sweeper,
        }
    }

    /// Builds the configured object storage backend from `StorageConfig`.
    pub async fn build_store(config: &Config) -> Arc<dyn ObjectStore> {
        match config.storage.backend {
            StorageBackend::Local => Arc::new(LocalObjectStore::new(config.storage.local_dir.clone())),
            StorageBackend::S3 => {
                let s3_config = config.storage.s3.clone().expect(
                    "storage.backend = s3 requires a [storage.s3] section with at least `bucket`",
                );
                Arc::new(S3ObjectStore::new(s3_config.bucket, s3_config.endpoint, s3_config.region).await)
            }
        }
    }

    pub async fn shutdown(mut self, grace: std::time::Duration) {
        self.pool.shutdown(grace).await;
        self.sweeper.abort();
    }
}
