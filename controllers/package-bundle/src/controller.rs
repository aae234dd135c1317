//! Main controller implementation.
//!
//! Wires the Kubernetes client, registry puller and bundle manager into a
//! reconciler, then runs the watcher beside the metrics server.

use crate::config::ControllerConfig;
use crate::error::ControllerError;
use crate::metrics::Metrics;
use crate::reconciler::Reconciler;
use crate::watcher::watch_controllers;
use bundle_manager::{
    BundleManager, Discovery, KubeDiscovery, KubeResourceClient, ResourceClient, StaticDiscovery,
};
use crds::{PackageBundle, PackageBundleController};
use kube::{Api, Client};
use registry_client::RegistryPuller;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{error, info};

/// Main controller for package bundle management.
pub struct Controller {
    config: ControllerConfig,
    reconciler: Arc<Reconciler>,
    controllers_api: Api<PackageBundleController>,
    bundles_api: Api<PackageBundle>,
    metrics: Metrics,
}

impl std::fmt::Debug for Controller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Controller")
            .field("config", &self.config)
            .field("reconciler", &self.reconciler)
            .finish_non_exhaustive()
    }
}

impl Controller {
    /// Creates a controller from in-cluster or kubeconfig credentials.
    ///
    /// # Errors
    ///
    /// Returns an error if no Kubernetes client can be built or the metrics
    /// registry cannot be created.
    pub async fn new(config: ControllerConfig) -> Result<Self, ControllerError> {
        let client = Client::try_default().await?;
        let metrics = Metrics::new()?;

        let discovery: Arc<dyn Discovery> = match config.kube_version {
            Some(version) => Arc::new(StaticDiscovery::new(version)),
            None => Arc::new(KubeDiscovery::new(client.clone())),
        };
        let controllers: Arc<dyn ResourceClient<PackageBundleController>> =
            Arc::new(KubeResourceClient::<PackageBundleController>::new(client.clone()));
        let bundles: Arc<dyn ResourceClient<PackageBundle>> =
            Arc::new(KubeResourceClient::<PackageBundle>::new(client.clone()));

        let manager = BundleManager::new(
            config.bundle_manager(),
            discovery,
            Arc::new(RegistryPuller::new(config.puller.clone())),
            Arc::clone(&bundles),
        );
        let reconciler = Arc::new(Reconciler::new(
            &config,
            manager,
            controllers,
            bundles,
            metrics.clone(),
        ));

        let controllers_api = match &config.watch_namespace {
            Some(namespace) => Api::namespaced(client.clone(), namespace),
            None => Api::all(client.clone()),
        };
        let bundles_api = Api::namespaced(client, &config.bundle_namespace);

        Ok(Self {
            config,
            reconciler,
            controllers_api,
            bundles_api,
            metrics,
        })
    }

    /// Runs until the watcher stops or the metrics server fails.
    ///
    /// # Errors
    ///
    /// Returns the first error from either task.
    pub async fn run(self) -> Result<(), ControllerError> {
        let metrics_server: JoinHandle<Result<(), ControllerError>> =
            tokio::spawn(self.metrics.clone().serve(self.config.metrics_addr));

        self.metrics.set_ready(true);
        info!("Package Bundle Controller running");

        let result = tokio::select! {
            result = watch_controllers(
                self.controllers_api,
                self.bundles_api,
                self.reconciler,
                self.config.concurrency,
            ) => result,
            joined = metrics_server => match joined {
                Ok(result) => result,
                Err(e) => Err(ControllerError::Metrics(format!("metrics server task failed: {e}"))),
            },
        };

        if let Err(e) = &result {
            error!("Package Bundle Controller stopped: {}", e);
        }
        result
    }
}
