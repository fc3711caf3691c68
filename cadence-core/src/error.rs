//! Error types for cadence-core

use thiserror::Error;

use crate::actions::{ActionType, Role};

/// Top-level error type for cadence-core
///
/// Low-signal statistics are not errors (they come back with
/// `low_signal = true`), and a repeated idempotency key is not an error
/// either (the stored record is returned).
#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Authorization denied: {actor} cannot perform {action} ({reason})")]
    AuthorizationDenied {
        actor: Role,
        action: ActionType,
        reason: String,
    },

    #[error("Upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    #[error("Compute timed out after {elapsed_ms}ms for {what}")]
    ComputeTimeout { what: String, elapsed_ms: u64 },

    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Idempotency key '{key}' was already used for {existing}")]
    IdempotencyKeyReused { key: String, existing: String },

    #[error("Record store error: {0}")]
    RecordStore(String),

    #[error("Integrity violation: {0}")]
    IntegrityViolation(String),
}

impl CoreError {
    /// Whether the caller may retry the same request later
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::UpstreamUnavailable(_) | Self::ComputeTimeout { .. } | Self::RecordStore(_)
        )
    }

    /// Whether the condition indicates corrupted shared state.
    ///
    /// Callers must not swallow these; the process is expected to stop.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::IntegrityViolation(_))
    }
}

/// Errors reported by a [`MetricStore`](crate::store::MetricStore)
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Malformed query: {0}")]
    InvalidQuery(String),
}

impl From<StoreError> for CoreError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Unavailable(msg) => CoreError::UpstreamUnavailable(msg),
            StoreError::InvalidQuery(msg) => CoreError::InvalidConfiguration(msg),
        }
    }
}

/// Errors reported by quick action collaborators
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CollaboratorError {
    #[error("Collaborator unavailable: {0}")]
    Unavailable(String),

    #[error("Collaborator rejected the action: {0}")]
    Rejected(String),
}

/// Result type alias for cadence-core operations
pub type Result<T> = std::result::Result<T, CoreError>;
