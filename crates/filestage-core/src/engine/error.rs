//! The job-engine error taxonomy (spec §7), distinct from the ambient
//! [`crate::error::Error`]. Grounded on `rcommerce-core::jobs::JobError`'s
//! `thiserror` enum, generalized to the façade-facing kinds this spec
//! names plus the internal-only `Transient`/`Permanent` classification used
//! by the worker pool and stager.

use super::clock::JobId;
use super::job::JobStatus;

#[derive(Debug, Clone, thiserror::Error)]
pub enum EngineError {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("service busy, retry after hint")]
    ServiceBusy { next_poll_in_ms: u64 },

    #[error("job not found: {0}")]
    NotFound(JobId),

    #[error("job not ready: {0:?}")]
    NotReady(JobStatus),

    #[error("job is gone: {message}")]
    Gone { message: String },

    /// Internal-only: retryable within the engine. Never returned from the
    /// façade directly; folded into a `failed` job or a retry instead.
    #[error("transient error: {0}")]
    Transient(String),

    /// Internal-only: terminal failure, short-circuits retries.
    #[error("permanent error: {0}")]
    Permanent(String),
}

impl EngineError {
    /// HTTP status code per the binding table in spec §6.2.
    pub fn status_code(&self) -> u16 {
        match self {
            EngineError::Validation(_) => 400,
            EngineError::ServiceBusy { .. } => 503,
            EngineError::NotFound(_) => 404,
            EngineError::NotReady(_) => 409,
            EngineError::Gone { .. } => 410,
            EngineError::Transient(_) | EngineError::Permanent(_) => 500,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            EngineError::Validation(_) => "validation",
            EngineError::ServiceBusy { .. } => "serviceBusy",
            EngineError::NotFound(_) => "notFound",
            EngineError::NotReady(_) => "notReady",
            EngineError::Gone { .. } => "gone",
            EngineError::Transient(_) => "transient",
            EngineError::Permanent(_) => "permanent",
        }
    }
}

impl From<EngineError> for crate::Error {
    fn from(err: EngineError) -> Self {
        crate::Error::Other(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_match_binding_table() {
        assert_eq!(EngineError::Validation("x".into()).status_code(), 400);
        assert_eq!(
            EngineError::ServiceBusy { next_poll_in_ms: 2000 }.status_code(),
            503
        );
        assert_eq!(EngineError::NotFound(JobId::new_v4()).status_code(), 404);
        assert_eq!(EngineError::NotReady(JobStatus::Queued).status_code(), 409);
        assert_eq!(
            EngineError::Gone { message: "x".into() }.status_code(),
            410
        );
    }
}
