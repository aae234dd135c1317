//! Cluster Kubernetes version discovery

use crate::error::BundleError;
use crate::version::KubeVersion;
use tracing::debug;

/// Reports the Kubernetes version of the running cluster
#[async_trait::async_trait]
pub trait Discovery: Send + Sync {
    /// Kubernetes `major.minor` of the API server.
    async fn kube_version(&self) -> Result<KubeVersion, BundleError>;
}

/// Discovery backed by the API server's `/version` endpoint
#[derive(Clone)]
pub struct KubeDiscovery {
    client: kube::Client,
}

impl std::fmt::Debug for KubeDiscovery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeDiscovery").finish_non_exhaustive()
    }
}

impl KubeDiscovery {
    /// Creates a discovery client from a Kubernetes client.
    #[must_use]
    pub fn new(client: kube::Client) -> Self {
        Self { client }
    }
}

#[async_trait::async_trait]
impl Discovery for KubeDiscovery {
    async fn kube_version(&self) -> Result<KubeVersion, BundleError> {
        let info = self
            .client
            .apiserver_version()
            .await
            .map_err(|e| BundleError::Discovery(e.to_string()))?;
        debug!(version = %info.git_version, "Discovered API server version");

        // Some distributions leave major/minor empty; fall back to gitVersion.
        KubeVersion::from_parts(&info.major, &info.minor)
            .or_else(|_| KubeVersion::parse(&info.git_version))
            .map_err(|e| BundleError::Discovery(e.to_string()))
    }
}

/// Discovery that always reports the same version
#[derive(Debug, Clone, Copy)]
pub struct StaticDiscovery {
    version: KubeVersion,
}

impl StaticDiscovery {
    /// Reports `version` on every call.
    #[must_use]
    pub const fn new(version: KubeVersion) -> Self {
        Self { version }
    }
}

#[async_trait::async_trait]
impl Discovery for StaticDiscovery {
    async fn kube_version(&self) -> Result<KubeVersion, BundleError> {
        Ok(self.version)
    }
}
