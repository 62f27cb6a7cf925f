use std::error::Error as StdError;

use thiserror::Error;

/// Errors from talking to the job/webhook/quota tables.
#[derive(Error, Debug)]
pub enum DatabaseError {
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),
}

/// Errors raised while validating and fetching an outbound URL (C1).
#[derive(Error, Debug)]
pub enum FetchError {
    #[error("SSRF blocked: {0}")]
    SsrfBlocked(String),

    #[error("request timed out")]
    Timeout,

    #[error("network error: {0}")]
    Network(reqwest::Error),
}

impl FetchError {
    /// Permanent ⇒ blocked by policy; Transient ⇒ worth retrying.
    pub fn is_permanent(&self) -> bool {
        matches!(self, FetchError::SsrfBlocked(_))
    }
}

/// [`crate::dns::SafeResolver`] signals a blocked address by returning an
/// `io::Error` with kind `PermissionDenied` from inside the resolver
/// future; `reqwest` wraps that as an ordinary connector error. Without
/// unwrapping the source chain here, an SSRF rejection that happens at
/// resolution time (rather than at URL-parse time) would come back as a
/// ordinary `Network` error and get retried instead of blocked outright.
impl From<reqwest::Error> for FetchError {
    fn from(err: reqwest::Error) -> Self {
        let mut source = err.source();
        while let Some(err) = source {
            if let Some(io_err) = err.downcast_ref::<std::io::Error>() {
                if io_err.kind() == std::io::ErrorKind::PermissionDenied {
                    return FetchError::SsrfBlocked(io_err.to_string());
                }
            }
            source = err.source();
        }
        FetchError::Network(err)
    }
}

/// Errors raised while enqueuing new work (C5, C6, C7).
#[derive(Error, Debug)]
pub enum EnqueueError {
    #[error("quota exceeded: {kind} (limit={limit}, used={used})")]
    QuotaExceeded {
        kind: String,
        limit: i64,
        used: i64,
    },

    #[error(transparent)]
    Database(#[from] DatabaseError),
}

/// Errors raised while claiming, renewing, or terminating a job (C7, C8).
#[derive(Error, Debug)]
pub enum ClaimError {
    #[error(transparent)]
    Database(#[from] DatabaseError),
}
