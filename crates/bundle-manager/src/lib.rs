//! Package Bundle Manager
//!
//! Decides which PackageBundle is active for a cluster, which compatible
//! bundle is newest, and whether an upgrade is available.
//!
//! # Features
//!
//! - **Version ordering**: bundles compare by `(major, minor, ordinal)` parsed from their names
//! - **Catalog lookups**: active bundle from the catalog namespace, registry pull as fallback
//! - **Bundle validation**: pulled content must decode as a well-formed PackageBundle
//! - **Capability traits**: [`Discovery`] and [`ResourceClient`] keep cluster access mockable

pub mod discovery;
pub mod error;
pub mod manager;
pub mod resource;
pub mod version;
#[cfg(any(test, feature = "test-util"))]
pub mod mock;

pub use discovery::{Discovery, KubeDiscovery, StaticDiscovery};
pub use error::{BundleError, ResourceError, VersionError};
pub use manager::{BundleManager, BundleManagerConfig};
pub use resource::{KubeResourceClient, ResourceClient};
pub use version::{BundleVersion, KubeVersion};
#[cfg(any(test, feature = "test-util"))]
pub use mock::{FailingDiscovery, MockResourceClient, test_bundle, test_controller};
