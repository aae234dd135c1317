//! Registry client errors

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur while pulling artifacts from a registry
#[derive(Debug, Error)]
pub enum RegistryError {
    /// The artifact reference could not be parsed
    #[error("Invalid artifact reference '{reference}': {reason}")]
    BadReference {
        /// Reference as supplied by the caller
        reference: String,
        /// What is wrong with it
        reason: String,
    },

    /// The credential file exists but cannot be used
    #[error("Credential store error at {}: {message}", path.display())]
    CredentialStore {
        /// Credential file path
        path: PathBuf,
        /// Error message
        message: String,
    },

    /// The trusted certificate bundle cannot be used
    #[error("Certificate error at {}: {message}", path.display())]
    Certificate {
        /// Certificate file path
        path: PathBuf,
        /// Error message
        message: String,
    },

    /// Registry could not be reached
    #[error("Failed to connect to registry {registry}: {message}")]
    Connection {
        /// Registry host or URL
        registry: String,
        /// Error message
        message: String,
    },

    /// Pull did not finish in time
    #[error("Pull of {reference} timed out")]
    Timeout {
        /// Reference or URL being fetched
        reference: String,
    },

    /// Artifact does not exist in the registry
    #[error("Artifact not found: {reference}")]
    NotFound {
        /// Missing reference
        reference: String,
    },

    /// Registry rejected our credentials
    #[error("Authentication failed for {registry}: {message}")]
    Authentication {
        /// Registry host
        registry: String,
        /// Error message
        message: String,
    },

    /// Unexpected HTTP status from the registry
    #[error("HTTP error from registry: {status} - {message}")]
    Http {
        /// HTTP status code
        status: u16,
        /// Response body or reason
        message: String,
    },

    /// Manifest could not be decoded or has no content layer
    #[error("Invalid manifest for {reference}: {message}")]
    InvalidManifest {
        /// Reference the manifest belongs to
        reference: String,
        /// Error message
        message: String,
    },

    /// Downloaded content does not match its advertised digest
    #[error("Checksum mismatch for {reference}: expected {expected}, got {actual}")]
    ChecksumMismatch {
        /// Reference being pulled
        reference: String,
        /// Advertised digest
        expected: String,
        /// Computed digest
        actual: String,
    },

    /// Any other transport failure
    #[error("Registry transport error: {0}")]
    Transport(String),
}

impl RegistryError {
    /// Whether retrying the same pull later can succeed.
    ///
    /// Parse, credential file and manifest errors are static defects;
    /// a missing artifact is a legitimate answer.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Connection { .. }
            | Self::Timeout { .. }
            | Self::Authentication { .. }
            | Self::ChecksumMismatch { .. }
            | Self::Transport(_) => true,
            Self::Http { status, .. } => *status >= 500 || *status == 429,
            Self::BadReference { .. }
            | Self::CredentialStore { .. }
            | Self::Certificate { .. }
            | Self::NotFound { .. }
            | Self::InvalidManifest { .. } => false,
        }
    }
}

impl From<reqwest::Error> for RegistryError {
    fn from(err: reqwest::Error) -> Self {
        let url = err
            .url()
            .map_or_else(|| "unknown".to_string(), ToString::to_string);
        if err.is_timeout() {
            Self::Timeout { reference: url }
        } else if err.is_connect() {
            Self::Connection {
                registry: url,
                message: err.to_string(),
            }
        } else if err.is_status() {
            Self::Http {
                status: err.status().map_or(0, |s| s.as_u16()),
                message: err.to_string(),
            }
        } else {
            Self::Transport(err.to_string())
        }
    }
}
