mod aggregates;
mod configs;
mod leaderboards;
mod scoreboards;
mod watchers;

pub use aggregates::*;
pub use configs::*;
pub use leaderboards::*;
pub use scoreboards::*;
pub use watchers::*;

use leaderboards_core::CoreError;
use std::{future::Future, time::Duration};
use thiserror::Error;

/// Failures raised by a backing store
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("problem querying db: {0}")]
    Db(#[from] sqlx::Error),
    #[error("invalid json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("malformed record: {0}")]
    Malformed(String),
}

#[derive(Error, Debug)]
pub enum Error {
    #[error("unknown leaderboard: {0}")]
    ConfigNotFound(String),
    #[error("leaderboard configuration unavailable: {0}")]
    ConfigUnavailable(String),
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    InvalidSchedule(String),
    #[error("store call timed out after {0}ms")]
    StoreTimeout(u128),
    #[error("{0}")]
    Store(#[from] StoreError),
    #[error("malformed configuration: {0}")]
    Marshal(String),
    #[error("background thread died: {0}")]
    Thread(String),
}

impl From<CoreError> for Error {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::Validation(_) => Error::BadRequest(err.to_string()),
            CoreError::InvalidSchedule { .. } => Error::InvalidSchedule(err.to_string()),
            CoreError::Serialization(e) => Error::Marshal(e.to_string()),
        }
    }
}

impl Error {
    /// Timeouts and unavailable stores may succeed on retry
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::StoreTimeout(_) | Error::Store(StoreError::Db(_)) | Error::ConfigUnavailable(_)
        )
    }
}

/// Run a store call under `deadline`, turning an elapsed deadline into [`Error::StoreTimeout`]
pub async fn with_deadline<T, F>(deadline: Duration, call: F) -> Result<T, Error>
where
    F: Future<Output = Result<T, StoreError>>,
{
    match tokio::time::timeout(deadline, call).await {
        Ok(result) => result.map_err(Error::from),
        Err(_) => Err(Error::StoreTimeout(deadline.as_millis())),
    }
}
