//! Reconciliation logic for PackageBundleController resources.
//!
//! - `package_bundle_controller`: the controller state machine and status writes
//! - `package_bundle`: projects the controller's decision onto bundle statuses

pub mod package_bundle;
pub mod package_bundle_controller;


use crate::backoff::FibonacciBackoff;
use crate::config::ControllerConfig;
use crate::error::ControllerError;
use crate::metrics::Metrics;
use bundle_manager::{BundleManager, ResourceClient};
use crds::{BundleControllerState, PackageBundle, PackageBundleController};
use kube_runtime::controller::Action;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, warn};

/// Identity of a resource to reconcile
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ReconcileRequest {
    /// Resource namespace
    pub namespace: String,
    /// Resource name
    pub name: String,
}

impl ReconcileRequest {
    /// Creates a request for `namespace/name`.
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for ReconcileRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// What a reconcile decided
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Resource no longer exists
    NotFound,
    /// Resource is not the one this process owns
    Ignored,
    /// Registry unreachable, retry after a delay
    Disconnected,
    /// Active bundle missing or invalid
    Inactive,
    /// Active bundle is the newest compatible one
    Active,
    /// A newer compatible bundle exists
    UpgradeAvailable,
}

impl Outcome {
    /// Metric label for this outcome.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::NotFound => "not_found",
            Self::Ignored => "ignored",
            Self::Disconnected => "disconnected",
            Self::Inactive => "inactive",
            Self::Active => "active",
            Self::UpgradeAvailable => "upgrade_available",
        }
    }

    /// State of the owned controller, when this outcome describes one.
    #[must_use]
    pub const fn owned_state(self) -> Option<BundleControllerState> {
        match self {
            Self::NotFound | Self::Ignored => None,
            Self::Disconnected => Some(BundleControllerState::Disconnected),
            Self::Inactive => Some(BundleControllerState::Inactive),
            Self::Active => Some(BundleControllerState::Active),
            Self::UpgradeAvailable => Some(BundleControllerState::UpgradeAvailable),
        }
    }
}

/// Backoff state for a resource
#[derive(Debug, Clone)]
struct BackoffState {
    backoff: FibonacciBackoff,
    error_count: u32,
}

impl BackoffState {
    fn new(min: Duration, max: Duration) -> Self {
        Self {
            backoff: FibonacciBackoff::new(min, max),
            error_count: 0,
        }
    }

    fn increment_error(&mut self) {
        self.error_count += 1;
    }

    fn reset(&mut self) {
        self.error_count = 0;
        self.backoff.reset();
    }
}

/// Reconciles PackageBundleController resources.
pub struct Reconciler {
    pub(crate) manager: BundleManager,
    pub(crate) controllers: Arc<dyn ResourceClient<PackageBundleController>>,
    pub(crate) bundles: Arc<dyn ResourceClient<PackageBundle>>,
    pub(crate) owner: ReconcileRequest,
    pub(crate) disconnected_requeue: Duration,
    pub(crate) metrics: Metrics,
    backoff_min: Duration,
    backoff_max: Duration,
    /// Error count tracking per resource (namespace/name -> BackoffState)
    backoff_states: Arc<Mutex<HashMap<String, BackoffState>>>,
}

impl fmt::Debug for Reconciler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reconciler")
            .field("owner", &self.owner)
            .field("manager", &self.manager)
            .finish_non_exhaustive()
    }
}

impl Reconciler {
    /// Creates a new reconciler instance.
    pub fn new(
        config: &ControllerConfig,
        manager: BundleManager,
        controllers: Arc<dyn ResourceClient<PackageBundleController>>,
        bundles: Arc<dyn ResourceClient<PackageBundle>>,
        metrics: Metrics,
    ) -> Self {
        Self {
            manager,
            controllers,
            bundles,
            owner: ReconcileRequest::new(&config.controller_namespace, &config.controller_name),
            disconnected_requeue: config.disconnected_requeue,
            metrics,
            backoff_min: config.backoff_min,
            backoff_max: config.backoff_max,
            backoff_states: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Identity of the controller resource this process owns.
    #[must_use]
    pub fn owner(&self) -> &ReconcileRequest {
        &self.owner
    }

    /// Reconciles one PackageBundleController.
    ///
    /// Success awaits the next change, except while disconnected, which
    /// requeues after a fixed delay.
    ///
    /// # Errors
    ///
    /// Kubernetes API and discovery failures are returned for the error
    /// policy to retry with backoff.
    pub async fn reconcile(&self, request: &ReconcileRequest) -> Result<Action, ControllerError> {
        debug!("Reconciling PackageBundleController {}", request);
        match self.reconcile_controller(request).await {
            Ok(outcome) => {
                if outcome == Outcome::NotFound {
                    self.forget_resource(&request.to_string());
                } else {
                    self.reset_error(&request.to_string());
                }
                self.metrics.record_reconcile(outcome.label());
                if let Some(state) = outcome.owned_state() {
                    self.metrics.set_state(state);
                }
                Ok(match outcome {
                    Outcome::Disconnected => Action::requeue(self.disconnected_requeue),
                    _ => Action::await_change(),
                })
            }
            Err(e) => {
                self.metrics.record_error(&e);
                Err(e)
            }
        }
    }

    /// Get the Fibonacci backoff duration for a resource based on its error count
    ///
    /// Returns (backoff, error_count)
    pub fn get_backoff_for_resource(&self, resource_key: &str) -> (Duration, u32) {
        match self.backoff_states.lock() {
            Ok(mut states) => {
                let state = states
                    .entry(resource_key.to_string())
                    .or_insert_with(|| BackoffState::new(self.backoff_min, self.backoff_max));
                (state.backoff.next_backoff(), state.error_count)
            }
            Err(e) => {
                warn!("Failed to lock backoff_states: {}, using default backoff", e);
                (self.backoff_min, 0)
            }
        }
    }

    /// Increment error count for a resource
    pub fn increment_error(&self, resource_key: &str) {
        if let Ok(mut states) = self.backoff_states.lock() {
            states
                .entry(resource_key.to_string())
                .or_insert_with(|| BackoffState::new(self.backoff_min, self.backoff_max))
                .increment_error();
        }
    }

    /// Drop backoff tracking for a resource that no longer exists
    pub fn forget_resource(&self, resource_key: &str) {
        if let Ok(mut states) = self.backoff_states.lock() {
            states.remove(resource_key);
        }
    }

    /// Reset error count for a resource (on successful reconciliation)
    pub fn reset_error(&self, resource_key: &str) {
        if let Ok(mut states) = self.backoff_states.lock() {
            if let Some(state) = states.get_mut(resource_key) {
                state.reset();
            }
        }
    }
}
