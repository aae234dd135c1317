//! Mock Puller for unit testing
//!
//! Serves canned bytes or canned failures per reference and records every
//! pull so tests can assert what was (or was not) fetched.

use crate::error::RegistryError;
use crate::puller_trait::Puller;
use crate::reference::ArtifactReference;
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Failure a [`MockPuller`] can be told to return
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockFailure {
    /// `RegistryError::NotFound`
    NotFound,
    /// `RegistryError::Connection`
    Unreachable,
    /// `RegistryError::Timeout`
    Timeout,
}

#[derive(Debug, Clone)]
enum MockResponse {
    Data(Vec<u8>),
    Fail(MockFailure),
}

/// Mock Puller for testing
///
/// References are parsed exactly like the production puller does, so a
/// malformed reference fails before it is recorded as a fetch.
#[derive(Debug, Clone, Default)]
pub struct MockPuller {
    responses: Arc<Mutex<HashMap<String, MockResponse>>>,
    fallback: Arc<Mutex<Option<MockResponse>>>,
    attempts: Arc<Mutex<Vec<String>>>,
    fetches: Arc<Mutex<Vec<String>>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl MockPuller {
    /// Create a mock that answers `NotFound` for everything
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve `data` for `reference`
    pub fn add_data(&self, reference: &str, data: impl Into<Vec<u8>>) {
        lock(&self.responses).insert(reference.to_string(), MockResponse::Data(data.into()));
    }

    /// Serve the contents of `path` for `reference`
    ///
    /// # Errors
    ///
    /// Returns the I/O error if the fixture cannot be read.
    pub fn add_file_data(&self, reference: &str, path: impl AsRef<Path>) -> std::io::Result<()> {
        let data = std::fs::read(path)?;
        self.add_data(reference, data);
        Ok(())
    }

    /// Serve `data` for any reference without a specific entry
    pub fn set_default_data(&self, data: impl Into<Vec<u8>>) {
        *lock(&self.fallback) = Some(MockResponse::Data(data.into()));
    }

    /// Fail pulls of `reference`
    pub fn add_failure(&self, reference: &str, failure: MockFailure) {
        lock(&self.responses).insert(reference.to_string(), MockResponse::Fail(failure));
    }

    /// Fail every pull without a specific entry
    pub fn set_default_failure(&self, failure: MockFailure) {
        *lock(&self.fallback) = Some(MockResponse::Fail(failure));
    }

    /// Every reference passed to `pull`, in order
    #[must_use]
    pub fn attempts(&self) -> Vec<String> {
        lock(&self.attempts).clone()
    }

    /// References that parsed and would have gone to a registry
    #[must_use]
    pub fn fetches(&self) -> Vec<String> {
        lock(&self.fetches).clone()
    }
}

#[async_trait::async_trait]
impl Puller for MockPuller {
    async fn pull(&self, reference: &str) -> Result<Vec<u8>, RegistryError> {
        lock(&self.attempts).push(reference.to_string());
        let artifact = ArtifactReference::parse(reference)?;
        lock(&self.fetches).push(reference.to_string());

        let response = lock(&self.responses)
            .get(reference)
            .cloned()
            .or_else(|| lock(&self.fallback).clone());

        match response {
            Some(MockResponse::Data(data)) => Ok(data),
            Some(MockResponse::Fail(MockFailure::Unreachable)) => Err(RegistryError::Connection {
                registry: artifact.registry,
                message: "connection refused".to_string(),
            }),
            Some(MockResponse::Fail(MockFailure::Timeout)) => Err(RegistryError::Timeout {
                reference: reference.to_string(),
            }),
            Some(MockResponse::Fail(MockFailure::NotFound)) | None => {
                Err(RegistryError::NotFound {
                    reference: reference.to_string(),
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_serves_and_records() {
        let mock = MockPuller::new();
        mock.add_data("public.ecr.aws/bundles:v1-21-1001", b"bundle".to_vec());
        mock.add_failure("public.ecr.aws/bundles:v1-21-1002", MockFailure::Unreachable);

        assert_eq!(mock.pull("public.ecr.aws/bundles:v1-21-1001").await.unwrap(), b"bundle");
        let err = mock.pull("public.ecr.aws/bundles:v1-21-1002").await.unwrap_err();
        assert!(err.is_retryable());
        let err = mock.pull("public.ecr.aws/bundles:v1-21-1003").await.unwrap_err();
        assert!(matches!(err, RegistryError::NotFound { .. }));

        let err = mock.pull("garbage").await.unwrap_err();
        assert!(matches!(err, RegistryError::BadReference { .. }));
        assert_eq!(mock.attempts().len(), 4);
        assert_eq!(mock.fetches().len(), 3);
    }

    #[tokio::test]
    async fn test_default_data_yields_to_specific_entries() {
        let mock = MockPuller::new();
        mock.set_default_data(b"any bundle".to_vec());
        mock.add_failure("public.ecr.aws/bundles:v1-21-1002", MockFailure::NotFound);

        assert_eq!(mock.pull("public.ecr.aws/bundles:v1-21-1001").await.unwrap(), b"any bundle");
        let err = mock.pull("public.ecr.aws/bundles:v1-21-1002").await.unwrap_err();
        assert!(matches!(err, RegistryError::NotFound { .. }));
    }
}
