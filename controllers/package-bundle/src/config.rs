//! Controller configuration
//!
//! Read once from the environment in `main` and passed down; nothing below
//! `main` reads environment variables.

use crate::error::ControllerError;
use bundle_manager::{BundleManagerConfig, KubeVersion};
use registry_client::PullerConfig;
use registry_client::puller::{CA_FILE_NAME, DEFAULT_CONFIG_DIR};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use tracing::info;

const DEFAULT_CONTROLLER_NAMESPACE: &str = "eksa-packages";
const DEFAULT_CONTROLLER_NAME: &str = "eksa-packages-bundle-controller";
const DEFAULT_BUNDLE_REPOSITORY: &str = "public.ecr.aws/eks-anywhere/eks-anywhere-packages-bundles";

/// Output format for log lines
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Human-readable text
    #[default]
    Text,
    /// One JSON object per line
    Json,
}

/// Everything the controller needs to run
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Namespace of the one controller resource this process owns
    pub controller_namespace: String,
    /// Name of the one controller resource this process owns
    pub controller_name: String,
    /// Namespace holding the PackageBundle catalog
    pub bundle_namespace: String,
    /// Namespace watched for controllers, `None` for all
    pub watch_namespace: Option<String>,
    /// Repository bundles are pulled from by name
    pub bundle_repository: String,
    /// Registry access settings
    pub puller: PullerConfig,
    /// Requeue delay while the registry is unreachable
    pub disconnected_requeue: Duration,
    /// First error-policy delay
    pub backoff_min: Duration,
    /// Largest error-policy delay
    pub backoff_max: Duration,
    /// Reconciles allowed to run at once
    pub concurrency: u16,
    /// Listen address for metrics and probes
    pub metrics_addr: SocketAddr,
    /// Fixed cluster version instead of asking the API server
    pub kube_version: Option<KubeVersion>,
    /// Log line format
    pub log_format: LogFormat,
}

impl ControllerConfig {
    /// Reads the configuration from process environment variables.
    ///
    /// # Errors
    ///
    /// Returns [`ControllerError::InvalidConfig`] for unparsable values.
    pub fn from_env() -> Result<Self, ControllerError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Reads the configuration through `lookup`, which returns the value of
    /// a variable or `None` when unset.
    ///
    /// # Errors
    ///
    /// Returns [`ControllerError::InvalidConfig`] for unparsable values.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ControllerError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let controller_namespace =
            get("CONTROLLER_NAMESPACE").unwrap_or_else(|| DEFAULT_CONTROLLER_NAMESPACE.to_string());
        let controller_name =
            get("CONTROLLER_NAME").unwrap_or_else(|| DEFAULT_CONTROLLER_NAME.to_string());
        let bundle_namespace = get("BUNDLE_NAMESPACE").unwrap_or_else(|| controller_namespace.clone());
        let config_dir = PathBuf::from(
            get("REGISTRY_CONFIG_DIR").unwrap_or_else(|| DEFAULT_CONFIG_DIR.to_string()),
        );
        let ca_file = get("REGISTRY_CA_FILE").map_or_else(|| config_dir.join(CA_FILE_NAME), PathBuf::from);

        let kube_version = get("KUBE_VERSION")
            .map(|v| {
                KubeVersion::parse(&v).map_err(|e| ControllerError::InvalidConfig(format!("KUBE_VERSION: {e}")))
            })
            .transpose()?;

        let log_format = match get("LOG_FORMAT").as_deref() {
            None | Some("text") => LogFormat::Text,
            Some("json") => LogFormat::Json,
            Some(other) => {
                return Err(ControllerError::InvalidConfig(format!(
                    "LOG_FORMAT must be text or json, got {other}"
                )));
            }
        };

        let backoff_min = Duration::from_secs(parse_or(&get, "BACKOFF_MIN_SECS", 5)?);
        let backoff_max = Duration::from_secs(parse_or(&get, "BACKOFF_MAX_SECS", 300)?);
        if backoff_max < backoff_min {
            return Err(ControllerError::InvalidConfig(
                "BACKOFF_MAX_SECS must not be below BACKOFF_MIN_SECS".to_string(),
            ));
        }

        let concurrency: u16 = parse_or(&get, "RECONCILE_CONCURRENCY", 4)?;
        if concurrency == 0 {
            return Err(ControllerError::InvalidConfig(
                "RECONCILE_CONCURRENCY must be at least 1".to_string(),
            ));
        }

        Ok(Self {
            controller_namespace,
            controller_name,
            bundle_namespace,
            watch_namespace: get("WATCH_NAMESPACE"),
            bundle_repository: get("BUNDLE_REPOSITORY")
                .unwrap_or_else(|| DEFAULT_BUNDLE_REPOSITORY.to_string()),
            puller: PullerConfig {
                config_dir,
                ca_file,
                insecure: parse_bool(&get, "REGISTRY_INSECURE")?,
                plain_http: parse_bool(&get, "REGISTRY_PLAIN_HTTP")?,
                timeout: Duration::from_secs(parse_or(&get, "PULL_TIMEOUT_SECS", 30)?),
            },
            disconnected_requeue: Duration::from_secs(parse_or(&get, "DISCONNECTED_REQUEUE_SECS", 60)?),
            backoff_min,
            backoff_max,
            concurrency,
            metrics_addr: parse_or(&get, "METRICS_ADDR", SocketAddr::from(([0, 0, 0, 0], 8080)))?,
            kube_version,
            log_format,
        })
    }

    /// Settings for the bundle manager.
    #[must_use]
    pub fn bundle_manager(&self) -> BundleManagerConfig {
        BundleManagerConfig {
            catalog_namespace: self.bundle_namespace.clone(),
            bundle_repository: self.bundle_repository.clone(),
        }
    }

    /// Logs the effective configuration.
    pub fn log(&self) {
        info!("Configuration:");
        info!("  Controller: {}/{}", self.controller_namespace, self.controller_name);
        info!("  Bundle namespace: {}", self.bundle_namespace);
        info!(
            "  Watch namespace: {}",
            self.watch_namespace.as_deref().unwrap_or("all namespaces")
        );
        info!("  Bundle repository: {}", self.bundle_repository);
        info!("  Registry config: {}", self.puller.config_dir.display());
        info!("  Pull timeout: {:?}", self.puller.timeout);
        info!("  Concurrency: {}", self.concurrency);
        info!("  Metrics: {}", self.metrics_addr);
        if let Some(version) = self.kube_version {
            info!("  Kubernetes version override: {}", version);
        }
    }
}

fn parse_or<T, G>(get: &G, key: &str, default: T) -> Result<T, ControllerError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        Some(raw) => raw
            .parse()
            .map_err(|e| ControllerError::InvalidConfig(format!("{key}={raw}: {e}"))),
        None => Ok(default),
    }
}

fn parse_bool<G>(get: &G, key: &str) -> Result<bool, ControllerError>
where
    G: Fn(&str) -> Option<String>,
{
    match get(key).map(|v| v.to_ascii_lowercase()).as_deref() {
        None | Some("false" | "0" | "no") => Ok(false),
        Some("true" | "1" | "yes") => Ok(true),
        Some(other) => Err(ControllerError::InvalidConfig(format!(
            "{key} must be true or false, got {other}"
        ))),
    }
}
