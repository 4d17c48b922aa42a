//! Job record & state machine (C2).
//!
//! A closed tagged-variant record whose populated fields depend on
//! `status`: `result` and `error` are never simultaneously populated, and
//! the state machine enforces every legal transition (I8).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::clock::JobId;

/// Priority class. Affects queue ordering only, never retry or timeout
/// behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Standard,
    Low,
}

impl Default for Priority {
    fn default() -> Self {
        Priority::Standard
    }
}

impl std::str::FromStr for Priority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "standard" => Ok(Priority::Standard),
            "low" => Ok(Priority::Low),
            other => Err(format!("unknown priority: {}", other)),
        }
    }
}

/// The state set from spec §3. Terminal states: `Completed`, `Failed`,
/// `Cancelled`, `Expired`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Running,
    ProcessingArtifacts,
    Completed,
    Failed,
    Cancelled,
    Expired,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled | JobStatus::Expired
        )
    }

    /// I8: the transition guard. `attempts`/`max_attempts` are needed to
    /// decide whether `Failed -> Queued` (retry) is legal.
    pub fn can_transition_to(&self, next: JobStatus, attempts: u32, max_attempts: u32) -> bool {
        use JobStatus::*;
        match (self, next) {
            (Queued, Running) | (Queued, Cancelled) | (Queued, Expired) => true,
            (Running, ProcessingArtifacts)
            | (Running, Failed)
            | (Running, Cancelled)
            | (Running, Expired) => true,
            (ProcessingArtifacts, Completed)
            | (ProcessingArtifacts, Failed)
            | (ProcessingArtifacts, Cancelled)
            | (ProcessingArtifacts, Expired) => true,
            (Failed, Queued) => attempts < max_attempts,
            _ => false,
        }
    }
}

/// Populated only when `status = completed`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobOutcome {
    pub url: String,
    pub checksum: String,
    pub size: u64,
    pub url_expires_at: DateTime<Utc>,
}

/// Error classification used internally by the worker pool; only
/// `Transient`/`Permanent` ever get assigned `error.code`, matching the
/// taxonomy in spec §7.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    Transient,
    Permanent,
    Internal,
}

/// Populated only when `status = failed`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobFailure {
    pub code: ErrorCode,
    pub message: String,
    pub last_attempt_at: DateTime<Utc>,
}

/// The job record. All field mutation happens only through
/// [`JobRecord::transition`] and the small set of mutator helpers below, so
/// callers cannot accidentally violate the invariants in spec §3.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRecord {
    pub job_id: JobId,
    pub file_ids: Vec<u64>,
    pub client_request_id: Option<String>,
    pub user_id: Option<String>,
    pub priority: Priority,
    pub status: JobStatus,
    pub progress_percent: u8,
    pub message: Option<String>,
    pub attempts: u32,
    pub max_attempts: u32,
    pub result: Option<JobOutcome>,
    pub error: Option<JobFailure>,
    pub retry_after_ms: Option<u64>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub expires_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Raised only when a caller attempts an illegal transition. Per spec
/// §4.2 this is an internal programming error, never surfaced to HTTP
/// clients as anything user-actionable.
#[derive(Debug, thiserror::Error)]
#[error("illegal transition from {from:?} to {to:?}")]
pub struct IllegalTransition {
    pub from: JobStatus,
    pub to: JobStatus,
}

impl JobRecord {
    pub fn new(
        job_id: JobId,
        file_ids: Vec<u64>,
        client_request_id: Option<String>,
        user_id: Option<String>,
        priority: Priority,
        max_attempts: u32,
        now: DateTime<Utc>,
        job_ttl: chrono::Duration,
    ) -> Self {
        Self {
            job_id,
            file_ids,
            client_request_id,
            user_id,
            priority,
            status: JobStatus::Queued,
            progress_percent: 0,
            message: None,
            attempts: 0,
            max_attempts,
            result: None,
            error: None,
            retry_after_ms: None,
            created_at: now,
            started_at: None,
            completed_at: None,
            expires_at: now + job_ttl,
            updated_at: now,
        }
    }

    /// Applies the I8 transition guard. On success, updates `status`,
    /// `updated_at`, and `completed_at` (I1) as a side effect.
    pub fn transition(
        &mut self,
        next: JobStatus,
        now: DateTime<Utc>,
    ) -> Result<(), IllegalTransition> {
        if !self
            .status
            .can_transition_to(next, self.attempts, self.max_attempts)
        {
            return Err(IllegalTransition {
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        self.updated_at = now;
        if next.is_terminal() {
            self.completed_at = Some(now);
        }
        if next == JobStatus::Queued {
            // Entering retry: clear the previous terminal `completed_at`
            // (a `Failed -> Queued` retry is not terminal).
            self.completed_at = None;
        }
        Ok(())
    }

    pub fn mark_started(&mut self, now: DateTime<Utc>) -> Result<(), IllegalTransition> {
        self.transition(JobStatus::Running, now)?;
        self.attempts += 1;
        self.started_at = Some(now);
        self.progress_percent = 0;
        Ok(())
    }

    pub fn set_progress(&mut self, percent: u8) {
        // P5: monotone within a single attempt.
        self.progress_percent = self.progress_percent.max(percent).min(100);
    }

    pub fn mark_processing_artifacts(&mut self, now: DateTime<Utc>) -> Result<(), IllegalTransition> {
        self.transition(JobStatus::ProcessingArtifacts, now)?;
        self.progress_percent = 95;
        Ok(())
    }

    pub fn mark_completed(
        &mut self,
        outcome: JobOutcome,
        now: DateTime<Utc>,
    ) -> Result<(), IllegalTransition> {
        self.transition(JobStatus::Completed, now)?;
        self.progress_percent = 100;
        self.result = Some(outcome);
        self.error = None;
        self.retry_after_ms = None;
        Ok(())
    }

    /// Terminal failure (permanent, or transient with attempts exhausted).
    pub fn mark_failed_terminal(
        &mut self,
        code: ErrorCode,
        message: String,
        now: DateTime<Utc>,
    ) -> Result<(), IllegalTransition> {
        self.transition(JobStatus::Failed, now)?;
        self.result = None;
        self.error = Some(JobFailure {
            code,
            message,
            last_attempt_at: now,
        });
        self.retry_after_ms = None;
        Ok(())
    }

    /// Transient failure with attempts remaining: bounces through `Failed`
    /// and immediately back to `Queued` for retry, per I8.
    pub fn mark_failed_and_retry(
        &mut self,
        message: String,
        retry_after_ms: u64,
        now: DateTime<Utc>,
    ) -> Result<(), IllegalTransition> {
        self.transition(JobStatus::Failed, now)?;
        self.error = Some(JobFailure {
            code: ErrorCode::Transient,
            message,
            last_attempt_at: now,
        });
        self.transition(JobStatus::Queued, now)?;
        self.retry_after_ms = Some(retry_after_ms);
        Ok(())
    }

    pub fn mark_cancelled(&mut self, now: DateTime<Utc>) -> Result<(), IllegalTransition> {
        if self.status.is_terminal() {
            return Ok(()); // idempotent per spec §4.7 Cancel
        }
        self.transition(JobStatus::Cancelled, now)
    }

    pub fn mark_expired(&mut self, now: DateTime<Utc>) -> Result<(), IllegalTransition> {
        if self.status.is_terminal() {
            return Ok(());
        }
        self.transition(JobStatus::Expired, now)
    }

    pub fn can_retry(&self) -> bool {
        self.attempts < self.max_attempts
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;

    fn fresh_job() -> JobRecord {
        JobRecord::new(
            JobId::new_v4(),
            vec![70_000],
            None,
            None,
            Priority::Standard,
            3,
            Utc::now(),
            ChronoDuration::hours(1),
        )
    }

    #[test]
    fn queued_to_running_sets_attempts_and_started_at() {
        let mut job = fresh_job();
        job.mark_started(Utc::now()).unwrap();
        assert_eq!(job.status, JobStatus::Running);
        assert_eq!(job.attempts, 1);
        assert!(job.started_at.is_some());
    }

    #[test]
    fn completed_has_result_and_no_error() {
        let mut job = fresh_job();
        job.mark_started(Utc::now()).unwrap();
        job.mark_processing_artifacts(Utc::now()).unwrap();
        job.mark_completed(
            JobOutcome {
                url: "https://example.com/x".into(),
                checksum: "abc".into(),
                size: 10,
                url_expires_at: Utc::now(),
            },
            Utc::now(),
        )
        .unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.progress_percent, 100);
        assert!(job.result.is_some());
        assert!(job.error.is_none());
    }

    #[test]
    fn failed_has_error_and_no_result() {
        let mut job = fresh_job();
        job.mark_started(Utc::now()).unwrap();
        job.mark_failed_terminal(ErrorCode::Permanent, "bad payload".into(), Utc::now())
            .unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert!(job.error.is_some());
        assert!(job.result.is_none());
    }

    #[test]
    fn retry_bounces_through_failed_back_to_queued() {
        let mut job = fresh_job();
        job.mark_started(Utc::now()).unwrap();
        job.mark_failed_and_retry("attempt_timeout".into(), 500, Utc::now())
            .unwrap();
        assert_eq!(job.status, JobStatus::Queued);
        assert_eq!(job.attempts, 1);
        assert!(job.can_retry());
    }

    #[test]
    fn retry_exhausted_rejects_failed_to_queued() {
        let mut job = fresh_job();
        job.max_attempts = 1;
        job.mark_started(Utc::now()).unwrap();
        // attempts == max_attempts now; Failed -> Queued must be illegal.
        let now = Utc::now();
        job.transition(JobStatus::Failed, now).unwrap();
        assert!(job.transition(JobStatus::Queued, now).is_err());
    }

    #[test]
    fn cancel_is_idempotent_on_terminal_state() {
        let mut job = fresh_job();
        job.mark_started(Utc::now()).unwrap();
        job.mark_failed_terminal(ErrorCode::Permanent, "x".into(), Utc::now())
            .unwrap();
        assert!(job.mark_cancelled(Utc::now()).is_ok());
        assert_eq!(job.status, JobStatus::Failed);
    }

    #[test]
    fn no_outgoing_edges_from_terminal_states() {
        let mut job = fresh_job();
        job.mark_started(Utc::now()).unwrap();
        job.mark_failed_terminal(ErrorCode::Permanent, "x".into(), Utc::now())
            .unwrap();
        assert!(job.transition(JobStatus::Running, Utc::now()).is_err());
    }

    #[test]
    fn progress_percent_is_monotone_within_attempt() {
        let mut job = fresh_job();
        job.set_progress(10);
        job.set_progress(40);
        job.set_progress(20); // should not decrease
        assert_eq!(job.progress_percent, 40);
    }

    #[test]
    fn running_to_expired_is_legal() {
        let mut job = fresh_job();
        job.mark_started(Utc::now()).unwrap();
        assert!(job.mark_expired(Utc::now()).is_ok());
        assert_eq!(job.status, JobStatus::Expired);
    }
}
