//! Test utilities for unit testing the reconciler
//!
//! Builds a [`Reconciler`] over in-memory resource clients, a mock puller
//! and a fixed cluster version.

use crate::config::ControllerConfig;
use crate::metrics::Metrics;
use crate::reconciler::{ReconcileRequest, Reconciler};
use bundle_manager::{
    BundleManager, Discovery, KubeVersion, MockResourceClient, ResourceClient, StaticDiscovery,
    test_bundle,
};
use crds::{PackageBundle, PackageBundleController, UpgradePolicy};
use registry_client::MockPuller;
use std::sync::Arc;

pub const NAMESPACE: &str = "eksa-packages";
pub const OWNED_NAME: &str = "pbc";
pub const REPOSITORY: &str = "public.ecr.aws/eks-anywhere/eks-anywhere-packages-bundles";

/// Reconciler plus handles on every test double behind it
pub struct TestHarness {
    pub reconciler: Reconciler,
    pub puller: MockPuller,
    pub controllers: Arc<MockResourceClient<PackageBundleController>>,
    pub bundles: Arc<MockResourceClient<PackageBundle>>,
    pub metrics: Metrics,
}

impl TestHarness {
    /// Request for the owned controller.
    pub fn owned_request() -> ReconcileRequest {
        ReconcileRequest::new(NAMESPACE, OWNED_NAME)
    }

    /// Adds v1.21 bundles to the catalog namespace.
    pub fn add_bundles(&self, names: &[&str]) {
        for name in names {
            self.bundles.insert(test_bundle(name, NAMESPACE, "v1.21"));
        }
    }

    /// Adds a controller pointing at `active_bundle`.
    pub fn add_controller(&self, name: &str, active_bundle: &str) {
        self.controllers
            .insert(create_test_controller(name, NAMESPACE, active_bundle, UpgradePolicy::Manual));
    }

    /// Stored copy of controller `name`.
    pub fn controller(&self, name: &str) -> PackageBundleController {
        self.controllers
            .object(NAMESPACE, name)
            .expect("controller exists in the test store")
    }

    /// Stored copy of bundle `name`.
    pub fn bundle(&self, name: &str) -> PackageBundle {
        self.bundles
            .object(NAMESPACE, name)
            .expect("bundle exists in the test store")
    }
}

/// Configuration owning `eksa-packages/pbc`, with `vars` applied on top.
pub fn create_test_config(vars: &[(&str, &str)]) -> ControllerConfig {
    ControllerConfig::from_lookup(|key| match key {
        "CONTROLLER_NAMESPACE" => Some(NAMESPACE.to_string()),
        "CONTROLLER_NAME" => Some(OWNED_NAME.to_string()),
        "BUNDLE_REPOSITORY" => Some(REPOSITORY.to_string()),
        _ => vars
            .iter()
            .find(|(k, _)| *k == key)
            .map(|(_, v)| (*v).to_string()),
    })
    .expect("test configuration is valid")
}

/// Harness on a v1.21 cluster.
pub fn create_test_harness() -> TestHarness {
    create_test_harness_with_discovery(Arc::new(StaticDiscovery::new(KubeVersion::new(1, 21))))
}

/// Harness using `discovery` for the cluster version.
pub fn create_test_harness_with_discovery(discovery: Arc<dyn Discovery>) -> TestHarness {
    let config = create_test_config(&[]);
    let puller = MockPuller::new();
    let controllers: Arc<MockResourceClient<PackageBundleController>> =
        Arc::new(MockResourceClient::new());
    let bundles: Arc<MockResourceClient<PackageBundle>> = Arc::new(MockResourceClient::new());
    let metrics = Metrics::new().expect("metrics registry builds");

    let manager = BundleManager::new(
        config.bundle_manager(),
        discovery,
        Arc::new(puller.clone()),
        Arc::clone(&bundles) as Arc<dyn ResourceClient<PackageBundle>>,
    );
    let reconciler = Reconciler::new(
        &config,
        manager,
        Arc::clone(&controllers) as Arc<dyn ResourceClient<PackageBundleController>>,
        Arc::clone(&bundles) as Arc<dyn ResourceClient<PackageBundle>>,
        metrics.clone(),
    );

    TestHarness {
        reconciler,
        puller,
        controllers,
        bundles,
        metrics,
    }
}

/// Helper to create a test PackageBundleController
pub fn create_test_controller(
    name: &str,
    namespace: &str,
    active_bundle: &str,
    upgrade_policy: UpgradePolicy,
) -> PackageBundleController {
    let mut controller = bundle_manager::test_controller(name, namespace, active_bundle);
    controller.spec.upgrade_policy = upgrade_policy;
    controller
}
