//! Error types for the controller.
//!
//! Defines custom error types with classification for retry behavior.

use std::time::Duration;
use thiserror::Error;

/// Error type for controller operations
#[derive(Error, Debug)]
pub enum Error {
    /// Kubernetes API error
    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    /// The certificate secret exists but has no CA entry
    #[error("secret {secret:?} is missing {key:?} key")]
    MissingCaCert { secret: String, key: String },

    /// The targeted webhook entry has no service-based callback target
    #[error("missing service reference for webhook: {0}")]
    MissingServiceReference(String),

    /// An API call did not complete within the configured timeout
    #[error("timed out after {timeout:?} during {operation}")]
    Timeout {
        operation: &'static str,
        timeout: Duration,
    },

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// Check if this error indicates a not-found condition
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::Kube(kube::Error::Api(e)) if e.code == 404)
    }

    /// Check if this error is a configuration problem in the cluster
    /// (secret or webhook entry not shaped as expected).
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Error::MissingCaCert { .. } | Error::MissingServiceReference(_)
        )
    }

    /// Check if this error should be retried
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Kube(e) => {
                // Retry on network errors, rate limiting, conflicts and server errors
                matches!(
                    e,
                    kube::Error::Api(api_err)
                        if api_err.code >= 500 || api_err.code == 429 || api_err.code == 409
                ) || matches!(e, kube::Error::Service(_))
            }
            Error::Timeout { .. } => true,
            // Fixed by whoever owns the secret or the webhook configuration;
            // a change to either re-triggers reconciliation.
            Error::MissingCaCert { .. } | Error::MissingServiceReference(_) => true,
            Error::Serialization(_) => false,
        }
    }

    /// Get the recommended requeue duration for this error
    pub fn requeue_after(&self) -> Duration {
        if self.is_configuration() {
            Duration::from_secs(60)
        } else if self.is_retryable() {
            Duration::from_secs(30)
        } else {
            Duration::from_secs(300)
        }
    }
}

/// Result type alias for controller operations
pub type Result<T> = std::result::Result<T, Error>;
