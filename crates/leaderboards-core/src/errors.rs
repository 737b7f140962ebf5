//! Shared error types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("failed to parse cron expression '{expression}': {reason}")]
    InvalidSchedule { expression: String, reason: String },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl CoreError {
    pub fn invalid_schedule(expression: &str, reason: impl Into<String>) -> Self {
        CoreError::InvalidSchedule {
            expression: expression.to_string(),
            reason: reason.into(),
        }
    }
}
