//! Puller trait for mocking
//!
//! The bundle manager only needs "bytes for this reference". The
//! production [`RegistryPuller`](crate::RegistryPuller) implements it against
//! a real registry, tests use [`MockPuller`](crate::MockPuller).

use crate::error::RegistryError;

/// Fetches raw artifact bytes by reference
///
/// All async methods must be `Send` to work with Tokio's work-stealing runtime.
#[async_trait::async_trait]
pub trait Puller: Send + Sync {
    /// Pulls the content of `reference`.
    ///
    /// A reference that does not parse fails with
    /// [`RegistryError::BadReference`] before any network traffic.
    async fn pull(&self, reference: &str) -> Result<Vec<u8>, RegistryError>;
}
