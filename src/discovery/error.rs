//! Discovery error taxonomy.

use std::time::Duration;
use thiserror::Error;

/// Errors produced by registry backends and the components built on them.
#[derive(Debug, Error)]
pub enum DiscoveryError {
    /// Invalid or missing backend parameters, or a malformed identity.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Backend could not be reached. Retryable.
    #[error("Backend unavailable: {0}")]
    BackendUnavailable(String),

    /// Unknown service or key.
    #[error("Service not found: {0}")]
    NotFound(String),

    /// Operation exceeded its deadline.
    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    /// Some items of a batch failed while others succeeded.
    #[error("{failed} of {total} operations failed")]
    PartialFailure { failed: usize, total: usize },

    /// Liveness call reached the node but failed.
    #[error("Probe failed: {0}")]
    ProbeFailed(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Codec error: {0}")]
    Codec(#[from] serde_json::Error),
}

impl DiscoveryError {
    /// Whether a background loop should retry after this error.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            DiscoveryError::BackendUnavailable(_)
                | DiscoveryError::Timeout(_)
                | DiscoveryError::ProbeFailed(_)
        )
    }

    /// Whether the active backend should be bypassed in favour of the disk mirror.
    pub fn is_unavailable(&self) -> bool {
        matches!(
            self,
            DiscoveryError::BackendUnavailable(_) | DiscoveryError::Timeout(_)
        )
    }
}

/// Result alias for discovery operations.
pub type Result<T> = std::result::Result<T, DiscoveryError>;
