//! Kubernetes resource watchers.
//!
//! Drives the reconciler from a `kube_runtime::Controller` watching
//! PackageBundleController resources. PackageBundle changes in the catalog
//! namespace re-trigger the owned controller, since they can change which
//! bundle is the latest.

use crate::error::ControllerError;
use crate::reconciler::{ReconcileRequest, Reconciler};
use crds::{PackageBundle, PackageBundleController};
use futures::StreamExt;
use kube::{Api, ResourceExt};
use kube_runtime::reflector::ObjectRef;
use kube_runtime::{Controller, controller::{Action, Config as ControllerConfig}, watcher};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info};

async fn reconcile(
    controller: Arc<PackageBundleController>,
    reconciler: Arc<Reconciler>,
) -> Result<Action, ControllerError> {
    let request = ReconcileRequest::new(
        controller.namespace().unwrap_or_default(),
        controller.name_any(),
    );
    reconciler.reconcile(&request).await
}

/// Requeue with per-resource Fibonacci backoff on errors
fn error_policy(
    controller: Arc<PackageBundleController>,
    error: &ControllerError,
    reconciler: Arc<Reconciler>,
) -> Action {
    let key = format!(
        "{}/{}",
        controller.namespace().unwrap_or_default(),
        controller.name_any()
    );
    reconciler.increment_error(&key);
    let (backoff, error_count) = reconciler.get_backoff_for_resource(&key);
    error!(
        "Reconciliation error for PackageBundleController {} (errors: {}), retrying in {:?}: {}",
        key, error_count, backoff, error
    );
    Action::requeue(backoff)
}

/// Watches PackageBundleController resources until shutdown.
///
/// # Errors
///
/// Never fails once started; the signature matches the other long-running
/// tasks `main` joins on.
pub async fn watch_controllers(
    controllers: Api<PackageBundleController>,
    bundles: Api<PackageBundle>,
    reconciler: Arc<Reconciler>,
    concurrency: u16,
) -> Result<(), ControllerError> {
    info!("Starting PackageBundleController watcher");

    let owner = reconciler.owner().clone();
    let owned_ref = ObjectRef::<PackageBundleController>::new(&owner.name).within(&owner.namespace);

    // Debounce batches bursts of bundle status updates into one reconcile.
    let controller_config = ControllerConfig::default()
        .debounce(Duration::from_secs(1))
        .concurrency(concurrency);

    Controller::new(controllers, watcher::Config::default())
        .watches(bundles, watcher::Config::default(), move |bundle: PackageBundle| {
            debug!("PackageBundle {} changed, requeueing {}", bundle.name_any(), owner);
            Some(owned_ref.clone())
        })
        .with_config(controller_config)
        .shutdown_on_signal()
        .run(reconcile, error_policy, reconciler)
        .for_each(|res| async move {
            match res {
                Ok((object, action)) => debug!("Reconciled {} ({:?})", object.name, action),
                Err(e) => error!("Controller error for PackageBundleController: {}", e),
            }
        })
        .await;

    info!("PackageBundleController watcher stopped");
    Ok(())
}
