//! OCI Registry Client
//!
//! Pulls package bundle manifests from OCI-compatible registries.
//!
//! # Example
//!
//! ```no_run
//! use registry_client::{Puller, PullerConfig, RegistryPuller};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let puller = RegistryPuller::new(PullerConfig::default());
//! let bytes = puller
//!     .pull("public.ecr.aws/eks-anywhere/eks-anywhere-packages-bundles:v1-21-1001")
//!     .await?;
//! println!("pulled {} bytes", bytes.len());
//! # Ok(())
//! # }
//! ```
//!
//! # Features
//!
//! - **Reference parsing**: `registry/repository[:tag][@digest]`, validated before any I/O
//! - **Credentials**: Docker `config.json`, exact host matching, anonymous fallback
//! - **Private CAs**: optional PEM bundle added to the trust roots
//! - **Token auth**: Basic and Bearer registry challenges
//! - **Integrity**: blob size and sha256 digest verification

pub mod certificates;
pub mod credentials;
pub mod error;
pub mod puller;
#[path = "trait.rs"]
pub mod puller_trait;
pub mod reference;
pub mod storage;
#[cfg(feature = "test-util")]
pub mod mock;
#[cfg(test)]
mod test_registry;

pub use certificates::load_certificates;
pub use credentials::{Credential, CredentialStore};
pub use error::RegistryError;
pub use puller::{PullerConfig, RegistryPuller};
pub use puller_trait::Puller;
pub use reference::ArtifactReference;
pub use storage::{StorageClient, StorageContext};
#[cfg(feature = "test-util")]
pub use mock::{MockFailure, MockPuller};
