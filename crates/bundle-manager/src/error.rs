//! Bundle manager errors

use registry_client::RegistryError;
use thiserror::Error;

/// Errors from typed Kubernetes resource access
#[derive(Debug, Error)]
pub enum ResourceError {
    /// Resource does not exist
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// Write lost an optimistic-concurrency race; re-read and retry
    #[error("Resource version conflict: {0}")]
    Conflict(String),

    /// Resource could not be encoded for a write
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Any other Kubernetes API error
    #[error("Kubernetes error: {0}")]
    Kube(kube::Error),
}

impl From<kube::Error> for ResourceError {
    fn from(err: kube::Error) -> Self {
        match err {
            kube::Error::Api(ae) if ae.code == 409 => Self::Conflict(ae.message.clone()),
            kube::Error::Api(ae) if ae.code == 404 => Self::NotFound(ae.message.clone()),
            other => Self::Kube(other),
        }
    }
}

impl ResourceError {
    /// Whether this is an optimistic-lock conflict.
    #[must_use]
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict(_))
    }
}

/// A version string that does not follow the expected layout
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("Invalid version '{input}': {reason}")]
pub struct VersionError {
    /// Offending input
    pub input: String,
    /// What is wrong with it
    pub reason: String,
}

/// Errors returned by the bundle manager
#[derive(Debug, Error)]
pub enum BundleError {
    /// Bundle reference does not parse; never retried
    #[error("Invalid bundle reference: {0}")]
    BadReference(String),

    /// Registry could not serve the bundle
    #[error("Failed to pull bundle: {0}")]
    Pull(#[source] RegistryError),

    /// Bundle was fetched but is not a valid PackageBundle
    #[error("Malformed bundle {name}: {reason}")]
    MalformedBundle {
        /// Bundle name or reference
        name: String,
        /// Schema violation
        reason: String,
    },

    /// Bundle does not exist in the cluster or the registry
    #[error("Bundle not found: {0}")]
    NotFound(String),

    /// No bundle targets the cluster's Kubernetes version
    #[error("No bundle compatible with Kubernetes {0}")]
    NoCompatibleBundle(String),

    /// Cluster version could not be determined
    #[error("Kubernetes version discovery failed: {0}")]
    Discovery(String),

    /// Bundle catalog could not be read
    #[error(transparent)]
    Resource(#[from] ResourceError),
}

impl From<RegistryError> for BundleError {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::BadReference { .. } => Self::BadReference(err.to_string()),
            RegistryError::NotFound { reference } => Self::NotFound(reference),
            other => Self::Pull(other),
        }
    }
}

impl BundleError {
    /// Whether retrying later can succeed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Pull(e) => e.is_retryable(),
            Self::Discovery(_) | Self::Resource(_) => true,
            Self::BadReference(_)
            | Self::MalformedBundle { .. }
            | Self::NotFound(_)
            | Self::NoCompatibleBundle(_) => false,
        }
    }

    /// Whether the registry was unreachable (as opposed to answering badly).
    #[must_use]
    pub fn is_disconnected(&self) -> bool {
        matches!(self, Self::Pull(e) if e.is_retryable())
    }
}
