//! Error types for failover operations

use crate::registry::Protocol;

/// Terminal failures of a forwarded request, plus registry construction errors.
///
/// Per-attempt problems (timeouts, retriable statuses) never show up here:
/// the orchestrator absorbs them and only reports the outcome of the whole
/// candidate sequence.
#[derive(Debug, thiserror::Error)]
pub enum FailoverError {
    #[error("No available providers for protocol '{protocol}' (all cooling down or disabled).")]
    NoEligibleProviders { protocol: Protocol },

    #[error("All providers failed. Last error: {last_status}")]
    Exhausted {
        last_status: u16,
        /// The last recorded failure was a soft 400 (model rejected), which
        /// is reported to the client as 503 rather than echoed.
        soft: bool,
    },

    #[error("All providers failed with connection errors.")]
    ConnectionsFailed,

    #[error("invalid provider registry: {0}")]
    InvalidRegistry(String),
}

impl FailoverError {
    /// HTTP status the gateway should answer with.
    pub fn status(&self) -> u16 {
        match self {
            FailoverError::Exhausted {
                last_status,
                soft: false,
            } => *last_status,
            FailoverError::NoEligibleProviders { .. }
            | FailoverError::Exhausted { soft: true, .. }
            | FailoverError::ConnectionsFailed => 503,
            FailoverError::InvalidRegistry(_) => 500,
        }
    }
}

/// Result alias for failover operations.
pub type Result<T> = std::result::Result<T, FailoverError>;
