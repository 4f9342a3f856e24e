//! Error types for the gridscout exploration engine.
//!
//! We use `thiserror` for ergonomic error definitions with automatic
//! Display/Error implementations. The variants mirror the failure taxonomy of
//! the pipeline: validation and conflict errors surface synchronously to the
//! caller, gateway errors are recovered per-simulation, and constraint
//! violations are invariant breaches that fail the owning pipeline phase.

use thiserror::Error;
use uuid::Uuid;

/// Result type alias for gridscout operations
pub type Result<T> = std::result::Result<T, ExploreError>;

/// Main error type for exploration operations
#[derive(Error, Debug)]
pub enum ExploreError {
    /// Malformed exploration parameters, rejected before any persistence
    #[error("invalid exploration parameters: {0}")]
    Validation(String),

    /// A second exploration started while one is running, or stopping a
    /// non-running exploration
    #[error("conflict: {0}")]
    Conflict(String),

    /// Unknown exploration or simulation id
    #[error("not found: {0}")]
    NotFound(String),

    /// External optimizer service errors
    #[error("optimizer gateway error: {0}")]
    Gateway(#[from] GatewayError),

    /// Duplicate (exploration_id, cluster_id) simulation
    #[error("simulation for exploration {exploration_id} and cluster {cluster_id} already exists")]
    ConstraintViolation {
        exploration_id: Uuid,
        cluster_id: i64,
    },

    /// SQLite errors
    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    /// Serialization errors
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A worker phase failed in a way the pipeline cannot recover from
    #[error("pipeline phase '{phase}' failed: {message}")]
    PhaseFailed { phase: &'static str, message: String },
}

/// Errors from the external optimizer services
#[derive(Error, Debug)]
pub enum GatewayError {
    /// Transport failure or request timeout
    #[error("optimizer service unreachable: {0}")]
    Unreachable(#[from] reqwest::Error),

    /// Non-success HTTP status from the service
    #[error("optimizer request failed with HTTP status {0}")]
    RequestFailed(u16),

    /// The service answered but the body could not be decoded
    #[error("undecodable optimizer response: {0}")]
    Decode(String),
}

impl ExploreError {
    /// True for errors a single simulation absorbs without failing the run
    pub fn is_recoverable(&self) -> bool {
        matches!(self, ExploreError::Gateway(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gateway_errors_are_recoverable() {
        let err = ExploreError::Gateway(GatewayError::RequestFailed(503));
        assert!(err.is_recoverable());

        let err = ExploreError::ConstraintViolation {
            exploration_id: Uuid::new_v4(),
            cluster_id: 1,
        };
        assert!(!err.is_recoverable());
    }

    #[test]
    fn test_error_display() {
        let err = ExploreError::Validation("consumer_count_min must be > 30".to_string());
        assert!(err.to_string().contains("invalid exploration parameters"));

        let err = GatewayError::RequestFailed(500);
        assert!(err.to_string().contains("500"));
    }
}
