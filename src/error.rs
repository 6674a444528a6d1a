use thiserror::Error;

use crate::auth::AuthError;
use crate::chart::ChartError;
use crate::storage::StorageError;

/// Everything a tracker operation can surface to the user.
#[derive(Debug, Error)]
pub enum TrackerError {
    #[error("{0}")]
    Validation(String),
    #[error("Total minutes cannot exceed {limit} (would be {attempted}).")]
    CapacityExceeded { attempted: i64, limit: u32 },
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Auth(#[from] AuthError),
    #[error(transparent)]
    Chart(#[from] ChartError),
}

impl TrackerError {
    pub fn validation(message: impl Into<String>) -> Self {
        TrackerError::Validation(message.into())
    }

    #[cfg(test)]
    pub fn is_capacity_exceeded(&self) -> bool {
        matches!(self, TrackerError::CapacityExceeded { .. })
    }
}

pub type TrackerResult<T> = Result<T, TrackerError>;
