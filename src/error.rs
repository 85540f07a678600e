//! Error taxonomy shared by the store, lease manager, scheduler and executor.
//!
//! `DuplicateKey` is a control-flow signal rather than a failure: it is how
//! deduplication is reported. Lease loss is not an error at all; the lease
//! layer reports it as an outcome and it only ends the current attempt.

use rusqlite::ffi;
use rusqlite::ErrorCode;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CrawlError {
    /// A unique index rejected an insert.
    #[error("Duplicate key: {0}")]
    DuplicateKey(String),

    /// Store busy/locked or otherwise temporarily unreachable.
    #[error("Transient store error: {0}")]
    TransientStore(String),

    /// Store failure that retrying will not fix (corrupt row, bad schema).
    #[error("Store error: {0}")]
    Store(String),

    /// A music-service or signal-processing collaborator failed.
    #[error("External service error from {service}: {message}")]
    ExternalService { service: String, message: String },

    /// The job can never succeed as defined (malformed def, missing user...).
    #[error("Permanent job error: {0}")]
    PermanentJob(String),

    /// The job was asked to stop (worker shutdown or lease loss).
    #[error("Job was cancelled")]
    Cancelled,
}

pub type CrawlResult<T> = Result<T, CrawlError>;

impl CrawlError {
    /// Whether the executor should give the job another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            CrawlError::TransientStore(_) | CrawlError::ExternalService { .. }
        )
    }

    pub fn external(service: impl Into<String>, err: impl std::fmt::Display) -> Self {
        CrawlError::ExternalService {
            service: service.into(),
            message: err.to_string(),
        }
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        CrawlError::PermanentJob(message.into())
    }
}

impl From<rusqlite::Error> for CrawlError {
    fn from(err: rusqlite::Error) -> Self {
        match &err {
            rusqlite::Error::SqliteFailure(failure, _) => match failure.code {
                ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked => {
                    CrawlError::TransientStore(err.to_string())
                }
                ErrorCode::ConstraintViolation
                    if failure.extended_code == ffi::SQLITE_CONSTRAINT_UNIQUE
                        || failure.extended_code == ffi::SQLITE_CONSTRAINT_PRIMARYKEY =>
                {
                    CrawlError::DuplicateKey(err.to_string())
                }
                _ => CrawlError::Store(err.to_string()),
            },
            _ => CrawlError::Store(err.to_string()),
        }
    }
}

impl From<serde_json::Error> for CrawlError {
    fn from(err: serde_json::Error) -> Self {
        CrawlError::Store(format!("Invalid stored document: {}", err))
    }
}
