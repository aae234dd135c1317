//! Controller-specific error types.

use bundle_manager::{BundleError, ResourceError};
use kube::Error as KubeError;
use thiserror::Error;

/// Errors that can occur in the Package Bundle Controller.
#[derive(Debug, Error)]
pub enum ControllerError {
    /// Kubernetes API error
    #[error("Kubernetes error: {0}")]
    Kube(#[from] KubeError),

    /// Bundle resolution failed in a way the framework should retry
    #[error("Bundle error: {0}")]
    Bundle(#[from] BundleError),

    /// Typed resource access failed
    #[error("Resource error: {0}")]
    Resource(#[from] ResourceError),

    /// Status write kept losing optimistic-concurrency races
    #[error("Conflict persisting {resource} after {attempts} attempts")]
    Conflict {
        /// `namespace/name` of the resource
        resource: String,
        /// Attempts made
        attempts: usize,
    },

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Metrics registry or server failure
    #[error("Metrics error: {0}")]
    Metrics(String),
}

impl ControllerError {
    /// Short label used for the error metric.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Kube(_) => "kube",
            Self::Bundle(BundleError::Discovery(_)) => "discovery",
            Self::Bundle(_) => "bundle",
            Self::Resource(_) => "resource",
            Self::Conflict { .. } => "conflict",
            Self::InvalidConfig(_) => "config",
            Self::Metrics(_) => "metrics",
        }
    }
}

impl From<prometheus::Error> for ControllerError {
    fn from(err: prometheus::Error) -> Self {
        Self::Metrics(err.to_string())
    }
}
