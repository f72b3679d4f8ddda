use thiserror::Error;

use crate::types::{ProfileKey, RunStatus};

/// Result type alias for sync operations.
pub type Result<T> = std::result::Result<T, SyncError>;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("Scraping service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("No run on record for {0}")]
    NoRun(ProfileKey),

    #[error("Run for {key} is {status}, not ready to complete")]
    RunNotReady { key: ProfileKey, status: RunStatus },

    #[error("Invalid handle: {0:?}")]
    InvalidHandle(String),

    #[error("Unknown platform: {0:?}")]
    UnknownPlatform(String),

    #[error("Unknown merge mode: {0:?}")]
    UnknownMergeMode(String),
}

impl SyncError {
    pub(crate) fn service(err: anyhow::Error) -> Self {
        SyncError::ServiceUnavailable(format!("{err:#}"))
    }
}

impl From<sqlx::Error> for SyncError {
    fn from(err: sqlx::Error) -> Self {
        SyncError::StoreUnavailable(err.to_string())
    }
}

impl From<sqlx::migrate::MigrateError> for SyncError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        SyncError::StoreUnavailable(err.to_string())
    }
}
