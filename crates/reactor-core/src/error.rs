//! One `ReactorError` enum implementing the kind taxonomy of §7, composed via
//! `#[from]` into a crate-wide `Result<T>` alias. `anyhow` is reserved for the
//! binary's top level and adapter code talking to genuinely unpredictable
//! externals; library-surface errors here are `thiserror`-derived so callers
//! can match on `.kind()` instead of strings.

use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    Auth,
    Conflict,
    NotFound,
    UpstreamUnavailable,
    PolicyRejection,
    Internal,
    /// The run queue is at capacity (§5 "If the queue is full -> 503 with
    /// `Retry-After`"). Distinct from `UpstreamUnavailable`: this is our own
    /// backpressure, not a downstream failure, and always carries a
    /// `Retry-After` hint at the HTTP layer.
    QueueSaturated,
}

#[derive(Debug, Error)]
pub enum ReactorError {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("auth error: {0}")]
    Auth(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    #[error("policy rejection: {0}")]
    PolicyRejection(String),

    #[error("internal error: {0}")]
    Internal(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("run queue is at capacity")]
    QueueFull,
}

impl From<crate::queue::QueueFull> for ReactorError {
    fn from(_: crate::queue::QueueFull) -> Self {
        ReactorError::QueueFull
    }
}

impl ReactorError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ReactorError::Validation(_) => ErrorKind::Validation,
            ReactorError::Auth(_) => ErrorKind::Auth,
            ReactorError::Conflict(_) => ErrorKind::Conflict,
            ReactorError::NotFound(_) => ErrorKind::NotFound,
            ReactorError::UpstreamUnavailable(_) => ErrorKind::UpstreamUnavailable,
            ReactorError::PolicyRejection(_) => ErrorKind::PolicyRejection,
            ReactorError::Internal(_) => ErrorKind::Internal,
            ReactorError::Io(_) | ReactorError::Serde(_) => ErrorKind::Internal,
            ReactorError::QueueFull => ErrorKind::QueueSaturated,
        }
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        ReactorError::NotFound(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        ReactorError::Conflict(msg.into())
    }

    pub fn policy_rejection(msg: impl Into<String>) -> Self {
        ReactorError::PolicyRejection(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        ReactorError::Internal(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, ReactorError>;
