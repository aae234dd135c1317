//! Production puller
//!
//! Wires the reference parser, certificate loading, credential store and
//! storage client together. Certificates and credentials are read once per
//! process and shared by every pull.

use crate::certificates::load_certificates;
use crate::credentials::CredentialStore;
use crate::error::RegistryError;
use crate::puller_trait::Puller;
use crate::reference::ArtifactReference;
use crate::storage::{StorageClient, StorageContext};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

/// Directory the credential store and CA bundle are read from by default.
pub const DEFAULT_CONFIG_DIR: &str = "/tmp/config/registry";
/// CA bundle file name inside the config directory.
pub const CA_FILE_NAME: &str = "ca.crt";

/// Settings for [`RegistryPuller`]
#[derive(Debug, Clone)]
pub struct PullerConfig {
    /// Directory holding `config.json`
    pub config_dir: PathBuf,
    /// Optional PEM bundle of extra trusted CAs
    pub ca_file: PathBuf,
    /// Skip TLS verification
    pub insecure: bool,
    /// Use plain HTTP (local development registries)
    pub plain_http: bool,
    /// Deadline for a whole pull, manifest and blob included
    pub timeout: Duration,
}

impl Default for PullerConfig {
    fn default() -> Self {
        let config_dir = PathBuf::from(DEFAULT_CONFIG_DIR);
        Self {
            ca_file: config_dir.join(CA_FILE_NAME),
            config_dir,
            insecure: false,
            plain_http: false,
            timeout: Duration::from_secs(30),
        }
    }
}

/// Pulls artifacts from OCI registries
#[derive(Debug)]
pub struct RegistryPuller {
    config: PullerConfig,
    credentials: OnceCell<Arc<CredentialStore>>,
    certificates: OnceCell<Vec<reqwest::Certificate>>,
}

impl RegistryPuller {
    /// Creates a puller. Nothing is read from disk until the first pull.
    #[must_use]
    pub fn new(config: PullerConfig) -> Self {
        Self {
            config,
            credentials: OnceCell::new(),
            certificates: OnceCell::new(),
        }
    }

    async fn certificates(&self) -> &[reqwest::Certificate] {
        self.certificates
            .get_or_init(|| async {
                load_certificates(&self.config.ca_file).unwrap_or_else(|e| {
                    warn!("Ignoring registry CA bundle: {}", e);
                    Vec::new()
                })
            })
            .await
    }

    /// Loads the credential store once. A failed load is not cached.
    async fn credential_store(&self) -> Result<Arc<CredentialStore>, RegistryError> {
        self.credentials
            .get_or_try_init(|| async {
                CredentialStore::load(&self.config.config_dir).map(Arc::new)
            })
            .await
            .map(Arc::clone)
    }

    async fn pull_artifact(&self, artifact: &ArtifactReference) -> Result<Vec<u8>, RegistryError> {
        let certificates = self.certificates().await.to_vec();
        let store = self.credential_store().await?;

        let credential = store.credential(&artifact.registry);
        if credential.is_anonymous() {
            debug!("No credential for {}, pulling anonymously", artifact.registry);
        }

        let client = StorageClient::new(StorageContext {
            registry: artifact.registry.clone(),
            credential,
            certificates,
            insecure: self.config.insecure,
            plain_http: self.config.plain_http,
            timeout: self.config.timeout,
        })?;
        client.pull_bytes(artifact).await
    }
}

#[async_trait::async_trait]
impl Puller for RegistryPuller {
    async fn pull(&self, reference: &str) -> Result<Vec<u8>, RegistryError> {
        let artifact = ArtifactReference::parse(reference)?;
        info!("Pulling {}", artifact);

        match tokio::time::timeout(self.config.timeout, self.pull_artifact(&artifact)).await {
            Ok(result) => result,
            Err(_elapsed) => Err(RegistryError::Timeout {
                reference: artifact.to_string(),
            }),
        }
    }
}
