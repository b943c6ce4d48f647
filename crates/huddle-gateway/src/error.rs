use thiserror::Error;

use huddle_db::StoreError;

/// Outcome of a business rule that did not go through.
#[derive(Debug, Error)]
pub enum ChatError {
    #[error("invalid input: {0}")]
    Validation(String),

    #[error("caller is not a member of the room")]
    NotMember,

    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Why an inbound frame produced no effect.
///
/// None of these end the connection except `Unauthorized`, which is raised
/// before the connection is admitted.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("connection carries no verified identity")]
    Unauthorized,

    #[error("malformed frame: {0}")]
    MalformedFrame(#[from] serde_json::Error),

    #[error("rejected: {0}")]
    Rejected(ChatError),

    #[error("persistence failure: {0}")]
    Persistence(StoreError),

    #[error("blocking task failed: {0}")]
    Runtime(String),
}

impl From<ChatError> for GatewayError {
    fn from(e: ChatError) -> Self {
        match e {
            ChatError::Store(e) => Self::Persistence(e),
            other => Self::Rejected(other),
        }
    }
}

impl From<StoreError> for GatewayError {
    fn from(e: StoreError) -> Self {
        Self::Persistence(e)
    }
}
