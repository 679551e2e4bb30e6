use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Failure classification carried by terminal job states. Decides retry
/// behavior and operator messaging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Network failures, 5xx, timeouts. Retryable where a retry is declared.
    Transient,
    /// 401/403 or a failed token refresh. Never retried.
    Auth,
    /// 429 or explicit quota exhaustion.
    Quota,
    /// Malformed JSON or an unknown response schema.
    Protocol,
    /// Bad input at the job boundary. Never retried.
    Validation,
    /// Cooperative cancellation or deadline expiry.
    Cancelled,
    /// Render crash after all fallbacks, disk full, caught panics.
    Fatal,
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureKind::Transient => write!(f, "transient"),
            FailureKind::Auth => write!(f, "auth"),
            FailureKind::Quota => write!(f, "quota"),
            FailureKind::Protocol => write!(f, "protocol"),
            FailureKind::Validation => write!(f, "validation"),
            FailureKind::Cancelled => write!(f, "cancelled"),
            FailureKind::Fatal => write!(f, "fatal"),
        }
    }
}

impl std::str::FromStr for FailureKind {
    type Err = String;
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "transient" => Ok(Self::Transient),
            "auth" => Ok(Self::Auth),
            "quota" => Ok(Self::Quota),
            "protocol" => Ok(Self::Protocol),
            "validation" => Ok(Self::Validation),
            "cancelled" => Ok(Self::Cancelled),
            "fatal" => Ok(Self::Fatal),
            other => Err(format!("unknown FailureKind: {other}")),
        }
    }
}

/// Errors crossing component boundaries. Messages must stay
/// operator-legible and must never embed secrets.
#[derive(Error, Debug)]
pub enum ForgeError {
    #[error("database error: {0}")]
    Database(String),

    #[error("cache error: {0}")]
    Cache(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("quota exhausted (retry after {retry_after_secs:?}s)")]
    Quota { retry_after_secs: Option<u64> },

    #[error("transient upstream failure: {0}")]
    Transient(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("media pipeline error: {0}")]
    Media(String),

    #[error("cancelled")]
    Cancelled,

    #[error("fatal: {0}")]
    Fatal(String),

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

impl ForgeError {
    /// Project onto the job-visible failure taxonomy.
    pub fn kind(&self) -> FailureKind {
        match self {
            ForgeError::Auth(_) => FailureKind::Auth,
            ForgeError::Quota { .. } => FailureKind::Quota,
            ForgeError::Transient(_) | ForgeError::Cache(_) => FailureKind::Transient,
            ForgeError::Protocol(_) => FailureKind::Protocol,
            ForgeError::Validation(_) | ForgeError::Config(_) => FailureKind::Validation,
            ForgeError::Cancelled => FailureKind::Cancelled,
            ForgeError::Database(_)
            | ForgeError::Media(_)
            | ForgeError::Fatal(_)
            | ForgeError::Anyhow(_) => FailureKind::Fatal,
        }
    }
}

pub type Result<T> = std::result::Result<T, ForgeError>;
