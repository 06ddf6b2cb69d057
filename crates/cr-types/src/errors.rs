use thiserror::Error;

use crate::job::JobId;

/// Main error type for the Crucible system
#[derive(Error, Debug)]
pub enum CrError {
    #[error("Admission error: {0}")]
    Admission(#[from] AdmissionError),

    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("Persistence error: {0}")]
    Persistence(#[from] PersistenceError),

    #[error("Search error: {0}")]
    Search(#[from] SearchError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Validation error: {0}")]
    Validation(String),
}

/// Rejections at the submission boundary. The job is never created.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AdmissionError {
    #[error("rate limit exceeded: more than {cap} submissions in the last {window_secs}s")]
    RateLimitExceeded { cap: usize, window_secs: u64 },

    #[error("a {job_type} job is already active for this user: {existing}")]
    SingletonConflict { job_type: String, existing: JobId },
}

/// Errors surfaced by a single model invocation.
///
/// Always absorbed at the work-unit level: the unit is recorded as failed and
/// the job continues.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProviderError {
    #[error("provider timeout after {timeout_ms} ms")]
    Timeout { timeout_ms: u64 },

    #[error("rate limited by provider — retry after {retry_after_ms} ms")]
    RateLimited { retry_after_ms: u64 },

    #[error("endpoint unavailable: {message}")]
    Unavailable { message: String },

    #[error("invalid request: {message}")]
    InvalidRequest { message: String },

    #[error("authentication failed: {message}")]
    AuthenticationFailed { message: String },

    #[error("malformed provider response: {message}")]
    MalformedResponse { message: String },
}

/// Durable-store failures. Fatal for the affected job only.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PersistenceError {
    #[error("record not found: {id}")]
    NotFound { id: String },

    #[error("write failed: {message}")]
    WriteFailed { message: String },

    #[error("read failed: {message}")]
    ReadFailed { message: String },

    #[error("stored record is corrupt: {message}")]
    Corrupt { message: String },
}

/// Search-engine failures.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SearchError {
    #[error("search space resolves to zero combinations")]
    EmptySpace,

    #[error("invalid axis {name}: {message}")]
    InvalidAxis { name: String, message: String },

    #[error("unknown search strategy: {name}")]
    UnknownStrategy { name: String },

    #[error("surrogate fit failed: {message}")]
    SurrogateFit { message: String },
}

/// Result type alias for Crucible operations
pub type CrResult<T> = Result<T, CrError>;

/// Macro for creating validation errors
#[macro_export]
macro_rules! validation_error {
    ($($arg:tt)*) => {
        $crate::CrError::Validation(format!($($arg)*))
    };
}

/// Macro for creating internal errors
#[macro_export]
macro_rules! internal_error {
    ($($arg:tt)*) => {
        $crate::CrError::Internal(format!($($arg)*))
    };
}

/// Macro for creating configuration errors
#[macro_export]
macro_rules! config_error {
    ($($arg:tt)*) => {
        $crate::CrError::Config(format!($($arg)*))
    };
}
