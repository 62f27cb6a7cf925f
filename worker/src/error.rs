//! Error types for the worker runtime (§7.1).
//!
//! Grounded on `executor.py`'s `TransientError`/`PermanentError` split:
//! handlers raise one or the other to tell the runtime whether a failure is
//! worth retrying. [`HandlerError::Unclassified`] exists for the rare case
//! a handler lets an unrelated error escape (e.g. a bug, or a dependency's
//! error type the handler didn't anticipate) — the runtime treats those as
//! permanent, matching `main.py`'s bare `except Exception` branch, which
//! calls `mark_job_failed_async` rather than requeuing.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("transient error: {0}")]
    Transient(String),

    #[error("permanent error: {0}")]
    Permanent(String),

    #[error("unclassified error: {0}")]
    Unclassified(String),
}

impl HandlerError {
    pub fn is_permanent(&self) -> bool {
        matches!(self, HandlerError::Permanent(_) | HandlerError::Unclassified(_))
    }

    pub fn message(&self) -> &str {
        match self {
            HandlerError::Transient(m) | HandlerError::Permanent(m) | HandlerError::Unclassified(m) => m,
        }
    }
}

impl From<queue_core::error::FetchError> for HandlerError {
    fn from(err: queue_core::error::FetchError) -> Self {
        if err.is_permanent() {
            HandlerError::Permanent(err.to_string())
        } else {
            HandlerError::Transient(err.to_string())
        }
    }
}

#[derive(Debug, Error)]
pub enum WorkerLoopError {
    #[error("failed to claim job: {0}")]
    Claim(#[from] queue_core::error::ClaimError),
}
