//! Job registry (C3): concurrent mapping from job ID to job record, an
//! idempotency index on `(userId, clientRequestId)`, and a periodic TTL
//! sweeper.
//!
//! Grounded on the `DashMap`-backed concurrency discipline in
//! `rcommerce-core::websocket::broadcast::BroadcastManager`: a primary
//! `DashMap` keyed by job ID, generalized here from a single global lock per
//! entry's contents to a per-record `tokio::sync::Mutex` so one worker
//! mutating job A never blocks a reader of job B.

use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use super::clock::{Clock, JobId};
use super::job::{JobRecord, JobStatus};

type IdempotencyKey = (Option<String>, String);

/// Concurrent job registry. Cheaply `Clone`able: all state lives behind
/// `Arc`, matching the handle-sharing pattern used throughout
/// `rcommerce-core::jobs::worker::Worker`.
#[derive(Clone)]
pub struct Registry {
    inner: Arc<RegistryInner>,
}

struct RegistryInner {
    records: DashMap<JobId, Arc<Mutex<JobRecord>>>,
    idempotency: DashMap<IdempotencyKey, JobId>,
}

impl Registry {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                records: DashMap::new(),
                idempotency: DashMap::new(),
            }),
        }
    }

    /// Inserts a freshly-created record. If an unexpired record already
    /// exists for the same `(userId, clientRequestId)` key, returns that
    /// existing record's snapshot instead and does not insert: the
    /// idempotency contract from spec §4.3.
    ///
    /// Claims the idempotency slot via `entry`/`or_insert_with` and holds
    /// that shard's guard for the rest of the call, so two concurrent
    /// inserts for the same key can never both observe an empty slot (I6).
    pub fn insert(&self, record: JobRecord, now: chrono::DateTime<Utc>) -> JobRecord {
        let job_id = record.job_id;

        let Some(key) = idempotency_key(&record) else {
            let snapshot = record.clone();
            self.inner.records.insert(job_id, Arc::new(Mutex::new(record)));
            return snapshot;
        };

        let mut slot = self.inner.idempotency.entry(key).or_insert_with(|| job_id);

        if *slot != job_id {
            let existing_id = *slot;
            if let Some(existing) = self.inner.records.get(&existing_id) {
                // `try_lock` is safe here: inserts race only with other
                // inserts/reads, never with a worker holding the lock
                // across an await.
                if let Ok(guard) = existing.try_lock() {
                    if guard.expires_at > now {
                        return guard.clone();
                    }
                }
            }
            *slot = job_id;
        }

        let snapshot = record.clone();
        self.inner.records.insert(job_id, Arc::new(Mutex::new(record)));
        snapshot
    }

    pub async fn get(&self, job_id: JobId) -> Option<JobRecord> {
        let handle = self.inner.records.get(&job_id)?.clone();
        Some(handle.lock().await.clone())
    }

    /// Applies `mutator` under the record's own lock and returns the
    /// post-image. `mutator` returns `Err` to signal the I8 guard rejected
    /// the requested transition; that error is propagated unchanged.
    pub async fn update<F, E>(&self, job_id: JobId, mutator: F) -> Result<Option<JobRecord>, E>
    where
        F: FnOnce(&mut JobRecord) -> Result<(), E>,
    {
        let Some(handle) = self.inner.records.get(&job_id).map(|r| r.clone()) else {
            return Ok(None);
        };
        let mut guard = handle.lock().await;
        mutator(&mut guard)?;
        Ok(Some(guard.clone()))
    }

    /// Diagnostics-only listing, optionally filtered by status. Never
    /// exposed over HTTP per spec §4.3.
    pub async fn list(&self, status: Option<JobStatus>) -> Vec<JobRecord> {
        let handles: Vec<_> = self
            .inner
            .records
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        let mut out = Vec::with_capacity(handles.len());
        for handle in handles {
            let snapshot = handle.lock().await.clone();
            if status.map_or(true, |s| snapshot.status == s) {
                out.push(snapshot);
            }
        }
        out
    }

    pub fn len(&self) -> usize {
        self.inner.records.len()
    }

    /// One sweep pass: expires non-terminal records past `expires_at`, then
    /// deletes any record (terminal or just-expired) whose `expires_at` has
    /// passed. Per spec §4.3 this may expire-then-delete in the same pass;
    /// we take that simpler option rather than deferring deletion to a
    /// later tick, since nothing downstream depends on the extra tick.
    pub async fn sweep(&self, now: chrono::DateTime<Utc>) {
        let handles: Vec<_> = self
            .inner
            .records
            .iter()
            .map(|entry| (*entry.key(), entry.value().clone()))
            .collect();

        let mut to_remove = Vec::new();
        for (job_id, handle) in handles {
            let mut guard = handle.lock().await;
            if now > guard.expires_at {
                if !guard.status.is_terminal() {
                    let _ = guard.mark_expired(now);
                }
                to_remove.push((job_id, idempotency_key(&guard)));
            }
        }

        for (job_id, key) in to_remove {
            self.inner.records.remove(&job_id);
            if let Some(key) = key {
                // Only remove the index entry if it still points at this
                // job (a newer submission may have reused the same key
                // after this one expired and was already superseded).
                if let Some(entry) = self.inner.idempotency.get(&key) {
                    if *entry == job_id {
                        drop(entry);
                        self.inner.idempotency.remove(&key);
                    }
                }
            }
        }
    }

    /// Spawns the periodic sweeper loop (C3's GC), grounded on
    /// `rcommerce-core::jobs::scheduler::JobScheduler::run`'s
    /// `tokio::spawn` + `tokio::time::sleep` idiom.
    pub fn spawn_sweeper(&self, clock: Arc<dyn Clock>, interval: std::time::Duration) -> JoinHandle<()> {
        let registry = self.clone();
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                registry.sweep(clock.now()).await;
            }
        })
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

fn idempotency_key(record: &JobRecord) -> Option<IdempotencyKey> {
    let client_request_id = record.client_request_id.clone()?;
    if client_request_id.is_empty() {
        return None;
    }
    Some((record.user_id.clone(), client_request_id))
}


#[cfg(test)]
impl JobRecord {
    /// Test-only helper: attempts an illegal `Queued -> Completed` jump to
    /// exercise the registry's error propagation path.
    fn mark_completed_test_helper(&mut self) -> Result<(), super::job::IllegalTransition> {
        self.transition(JobStatus::Completed, Utc::now())
    }
}
