//! Common error types for LoopForge

use thiserror::Error;

/// Common result type for LoopForge operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error types across the LoopForge backend
///
/// These are error *kinds*, not transport details: the API edge maps them to
/// HTTP statuses, the job orchestrator writes them to the job row.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid input: {0}")]
    BadInput(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Dependency missing: {0}")]
    DependencyMissing(String),

    #[error("Audio decode error: {0}")]
    AudioDecode(String),

    #[error("Job cancelled")]
    Cancelled,

    #[error("Timeout after {0} seconds")]
    Timeout(u64),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Short machine-readable reason written into `jobs.error_message`
    /// alongside the human text.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Database(_) => "database",
            Error::Io(_) => "io",
            Error::Config(_) => "config",
            Error::NotFound(_) => "not_found",
            Error::BadInput(_) => "bad_input",
            Error::Conflict(_) => "conflict",
            Error::DependencyMissing(_) => "dependency_missing",
            Error::AudioDecode(_) => "audio_decode",
            Error::Cancelled => "cancelled",
            Error::Timeout(_) => "timeout",
            Error::Internal(_) => "internal",
        }
    }
}
