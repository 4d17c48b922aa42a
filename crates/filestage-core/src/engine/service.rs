//! Job service façade (C7): the synchronous API consumed by the HTTP layer.
//!
//! Performs input normalization, idempotency lookup, job creation, and
//! enqueue: `Initiate`/`Status`/`Resolve`/`Cancel` exactly as named in
//! spec §4.7.

use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use validator::Validate;

use super::clock::{Clock, JobId};
use super::error::EngineError;
use super::job::{JobRecord, JobStatus, Priority};
use super::queue::{QueueError, WorkQueue};
use super::registry::Registry;
use crate::config::EngineConfig;

const MIN_FILE_ID: u64 = 10_000;
const MAX_FILE_ID: u64 = 100_000_000;
const MAX_CLIENT_REQUEST_ID_LEN: usize = 128;

/// Wire shape per spec §6's HTTP binding: `file_ids` stays snake_case while
/// the rest of the body is camelCase, matched exactly rather than
/// normalized under one `rename_all`.
#[derive(Debug, Clone, Deserialize)]
pub struct InitiateRequest {
    pub file_ids: Vec<u64>,
    #[serde(default, rename = "clientRequestId")]
    pub client_request_id: Option<String>,
    #[serde(default, rename = "userId")]
    pub user_id: Option<String>,
    #[serde(default)]
    pub priority: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct InitiateResponse {
    pub job_id: JobId,
    pub status: JobStatus,
    pub next_poll_in_ms: u64,
    pub expires_at: chrono::DateTime<Utc>,
    pub total_file_ids: usize,
}

pub enum ResolveOutcome {
    Redirect { url: String },
    NotReady(JobRecord),
    Gone(JobRecord),
    NotFound,
}

/// The C7 façade. Cheaply `Clone`able: holds only `Arc`/shared handles.
#[derive(Clone)]
pub struct JobService {
    registry: Registry,
    queue: WorkQueue,
    clock: Arc<dyn Clock>,
    config: Arc<EngineConfig>,
}

impl JobService {
    pub fn new(registry: Registry, queue: WorkQueue, clock: Arc<dyn Clock>, config: Arc<EngineConfig>) -> Self {
        Self {
            registry,
            queue,
            clock,
            config,
        }
    }

    pub async fn initiate(&self, req: InitiateRequest) -> Result<InitiateResponse, EngineError> {
        validate_initiate(&req)?;

        let priority = match req.priority.as_deref() {
            None => Priority::Standard,
            Some(raw) => raw
                .parse::<Priority>()
                .map_err(|_| EngineError::Validation(format!("unknown priority: {}", raw)))?,
        };

        let now = self.clock.now();
        let job_id = self.clock.new_job_id();
        let job_ttl = chrono::Duration::from_std(self.config.job_ttl()).unwrap_or(chrono::Duration::hours(1));

        let record = JobRecord::new(
            job_id,
            req.file_ids.clone(),
            req.client_request_id.clone(),
            req.user_id.clone(),
            priority,
            self.config.max_attempts,
            now,
            job_ttl,
        );

        let stored = self.registry.insert(record, now);
        let is_new = stored.job_id == job_id;

        if is_new {
            // Only a brand-new record needs enqueuing; the idempotency
            // path above already has a live (or terminal) job.
            if let Err(QueueError::Full) = self.queue.enqueue(stored.job_id, priority).await {
                // The record was already created but never made it onto
                // the queue; `Queued -> Expired` is a legal I8 edge, so
                // mark it terminal immediately rather than leaving an
                // orphan that would otherwise sit `queued` until the
                // sweeper's TTL catches up with it.
                let _ = self.registry.update(stored.job_id, |r| r.mark_expired(now)).await;
                return Err(EngineError::ServiceBusy {
                    next_poll_in_ms: self.config.next_poll_in_ms,
                });
            }
        }

        Ok(InitiateResponse {
            job_id: stored.job_id,
            status: stored.status,
            next_poll_in_ms: self.config.next_poll_in_ms,
            expires_at: stored.expires_at,
            total_file_ids: stored.file_ids.len(),
        })
    }

    pub async fn status(&self, job_id: JobId) -> Result<JobRecord, EngineError> {
        self.registry.get(job_id).await.ok_or(EngineError::NotFound(job_id))
    }

    pub async fn resolve(&self, job_id: JobId) -> ResolveOutcome {
        let Some(record) = self.registry.get(job_id).await else {
            return ResolveOutcome::NotFound;
        };

        match record.status {
            JobStatus::Completed => {
                let Some(result) = &record.result else {
                    return ResolveOutcome::NotFound;
                };
                if self.clock.now() < result.url_expires_at {
                    ResolveOutcome::Redirect {
                        url: result.url.clone(),
                    }
                } else {
                    ResolveOutcome::Gone(record)
                }
            }
            JobStatus::Queued | JobStatus::Running | JobStatus::ProcessingArtifacts => {
                ResolveOutcome::NotReady(record)
            }
            JobStatus::Failed | JobStatus::Cancelled => ResolveOutcome::Gone(record),
            JobStatus::Expired => ResolveOutcome::NotFound,
        }
    }

    /// Idempotent: cancelling an already-terminal job is a no-op, per
    /// `JobRecord::mark_cancelled`.
    pub async fn cancel(&self, job_id: JobId) -> Result<JobRecord, EngineError> {
        let now = self.clock.now();
        self.registry
            .update(job_id, |record| record.mark_cancelled(now))
            .await
            .map_err(|_| EngineError::NotFound(job_id))?
            .ok_or(EngineError::NotFound(job_id))
    }
}

fn validate_initiate(req: &InitiateRequest) -> Result<(), EngineError> {
    if req.file_ids.is_empty() {
        return Err(EngineError::Validation("file_ids must be non-empty".into()));
    }
    for &file_id in &req.file_ids {
        if !(MIN_FILE_ID..=MAX_FILE_ID).contains(&file_id) {
            return Err(EngineError::Validation(format!(
                "file id {} out of range [{}, {}]",
                file_id, MIN_FILE_ID, MAX_FILE_ID
            )));
        }
    }
    if let Some(client_request_id) = &req.client_request_id {
        if client_request_id.len() > MAX_CLIENT_REQUEST_ID_LEN {
            return Err(EngineError::Validation(format!(
                "clientRequestId exceeds {} characters",
                MAX_CLIENT_REQUEST_ID_LEN
            )));
        }
    }
    Ok(())
}

/// Request validator wiring for callers that want `validator`-derived
/// validation on the HTTP boundary (axum extractors), rather than this
/// module's own `validate_initiate`. Kept thin: the façade's own
/// validation above is authoritative and runs regardless.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct ValidatedInitiateRequest {
    #[validate(length(min = 1))]
    pub file_ids: Vec<u64>,
    #[serde(default, rename = "clientRequestId")]
    #[validate(length(max = 128))]
    pub client_request_id: Option<String>,
    #[serde(default, rename = "userId")]
    pub user_id: Option<String>,
    #[serde(default)]
    pub priority: Option<String>,
}

impl From<ValidatedInitiateRequest> for InitiateRequest {
    fn from(v: ValidatedInitiateRequest) -> Self {
        InitiateRequest {
            file_ids: v.file_ids,
            client_request_id: v.client_request_id,
            user_id: v.user_id,
            priority: v.priority,
        }
    }
}
