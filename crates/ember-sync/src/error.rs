use thiserror::Error;
use uuid::Uuid;

use ember_api::ApiError;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error(transparent)]
    Api(#[from] ApiError),

    /// Rejected locally, nothing was sent.
    #[error("{reason}")]
    TurnViolation { reason: String },

    #[error("conversation {0} has expired")]
    Expired(Uuid),

    #[error("only the conversation owner can do that")]
    NotOwner,

    #[error("message {0} is not loaded")]
    UnknownMessage(i64),

    #[error("conversation {0} is not open")]
    NotOpen(Uuid),

    #[error("storage error: {0}")]
    Storage(#[from] anyhow::Error),
}

impl SyncError {
    /// Failures the next poll or pagination tick will retry on its own.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Api(e) if e.is_transient())
    }
}
