use thiserror::Error;

use viralforge_common::{FailureKind, ForgeError};

/// Upload failures, tagged by where in the state machine they happened.
#[derive(Debug, Error)]
pub enum PublishError {
    #[error("upload init failed: {0}")]
    Init(String),

    #[error("chunk {index} failed after retries: {message}")]
    Chunk { index: u32, message: String },

    #[error("finalize failed: {0}")]
    Finalize(String),

    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("quota exhausted (retry after {retry_after_secs:?}s)")]
    Quota { retry_after_secs: Option<u64> },

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("transient upload failure: {0}")]
    Transient(String),
}

impl PublishError {
    pub fn kind(&self) -> FailureKind {
        match self {
            PublishError::Auth(_) => FailureKind::Auth,
            PublishError::Quota { .. } => FailureKind::Quota,
            PublishError::Protocol(_) => FailureKind::Protocol,
            PublishError::Transient(_)
            | PublishError::Init(_)
            | PublishError::Chunk { .. }
            | PublishError::Finalize(_) => FailureKind::Transient,
        }
    }
}

impl From<ForgeError> for PublishError {
    fn from(err: ForgeError) -> Self {
        match err {
            ForgeError::Auth(msg) => PublishError::Auth(msg),
            ForgeError::Quota { retry_after_secs } => PublishError::Quota { retry_after_secs },
            other => PublishError::Transient(other.to_string()),
        }
    }
}
