use super::{Outcome, ReconcileRequest, Reconciler};
use crate::error::ControllerError;
use bundle_manager::BundleError;
use crds::{
    BundleControllerState, PackageBundle, PackageBundleController, PackageBundleControllerStatus,
    UpgradePolicy,
};
use kube::ResourceExt;
use tracing::{debug, info, warn};

/// Status writes attempted before giving up on conflicts
const MAX_STATUS_ATTEMPTS: usize = 5;

impl Reconciler {
    /// Recomputes the state of one controller and persists it.
    pub(crate) async fn reconcile_controller(
        &self,
        request: &ReconcileRequest,
    ) -> Result<Outcome, ControllerError> {
        let Some(controller) = self
            .controllers
            .get(&request.namespace, &request.name)
            .await?
        else {
            debug!("PackageBundleController {} not found, nothing to do", request);
            return Ok(Outcome::NotFound);
        };

        if *request != self.owner {
            info!(
                "Ignoring PackageBundleController {}: this controller owns {}",
                request, self.owner
            );
            self.persist_status(request, &PackageBundleControllerStatus::with_state(BundleControllerState::Ignored))
                .await?;
            return Ok(Outcome::Ignored);
        }

        let active = match self.manager.active_bundle(&controller).await {
            Ok(bundle) => bundle,
            Err(e) if e.is_disconnected() => {
                warn!("Registry unreachable reconciling {}: {}", request, e);
                self.persist_status(request, &failed_status(BundleControllerState::Disconnected, &e))
                    .await?;
                self.project_bundle_states(None, BundleControllerState::Disconnected)
                    .await?;
                return Ok(Outcome::Disconnected);
            }
            Err(e @ (BundleError::Discovery(_) | BundleError::Resource(_))) => return Err(e.into()),
            Err(e) => {
                warn!(
                    "Active bundle {} for {} is unusable: {}",
                    controller.spec.active_bundle, request, e
                );
                self.persist_status(request, &failed_status(BundleControllerState::Inactive, &e))
                    .await?;
                self.project_bundle_states(None, BundleControllerState::Inactive)
                    .await?;
                return Ok(Outcome::Inactive);
            }
        };

        let kube_version = self.manager.kube_version().await?;
        let latest = match self.manager.latest_bundle(&kube_version).await {
            Ok(bundle) => Some(bundle),
            Err(BundleError::NoCompatibleBundle(version)) => {
                info!("No bundle in the catalog targets Kubernetes {}", version);
                None
            }
            Err(e) => return Err(e.into()),
        };

        let mut active_name = active.name_any();
        let mut upgrade = latest
            .as_ref()
            .is_some_and(|latest| self.manager.is_upgrade_available(&active, latest));

        if upgrade && controller.spec.upgrade_policy == UpgradePolicy::Automatic {
            if let Some(latest) = &latest {
                self.switch_active_bundle(&controller, latest).await?;
                active_name = latest.name_any();
                upgrade = false;
            }
        }

        let state = if upgrade {
            BundleControllerState::UpgradeAvailable
        } else {
            BundleControllerState::Active
        };
        let status = PackageBundleControllerStatus {
            state,
            detail: None,
            latest_bundle: latest.as_ref().map(ResourceExt::name_any),
        };
        self.persist_status(request, &status).await?;
        self.project_bundle_states(Some(&active_name), state).await?;

        info!("PackageBundleController {} is {} on bundle {}", request, state, active_name);
        Ok(if upgrade { Outcome::UpgradeAvailable } else { Outcome::Active })
    }

    /// Writes `desired` as the status of `request` unless it already is.
    ///
    /// Returns whether a write happened. Conflicts are retried against a
    /// fresh read.
    pub(crate) async fn persist_status(
        &self,
        request: &ReconcileRequest,
        desired: &PackageBundleControllerStatus,
    ) -> Result<bool, ControllerError> {
        for attempt in 1..=MAX_STATUS_ATTEMPTS {
            let Some(mut current) = self
                .controllers
                .get(&request.namespace, &request.name)
                .await?
            else {
                debug!("PackageBundleController {} deleted before status write", request);
                return Ok(false);
            };

            if current.status.as_ref() == Some(desired) {
                debug!("Status of {} unchanged ({})", request, desired.state);
                return Ok(false);
            }

            current.status = Some(desired.clone());
            match self.controllers.replace_status(&current).await {
                Ok(_) => {
                    info!("Updated status of {} to {}", request, desired.state);
                    return Ok(true);
                }
                Err(e) if e.is_conflict() => {
                    debug!(
                        "Conflict writing status of {} (attempt {}/{}), retrying",
                        request, attempt, MAX_STATUS_ATTEMPTS
                    );
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(ControllerError::Conflict {
            resource: request.to_string(),
            attempts: MAX_STATUS_ATTEMPTS,
        })
    }

    /// Points `spec.activeBundle` at `latest`, guarded by the observed
    /// resource version.
    async fn switch_active_bundle(
        &self,
        controller: &PackageBundleController,
        latest: &PackageBundle,
    ) -> Result<(), ControllerError> {
        let mut updated = controller.clone();
        updated.spec.active_bundle = latest.name_any();
        self.controllers.replace(&updated).await?;
        info!(
            "Upgraded {}/{} from bundle {} to {}",
            controller.namespace().unwrap_or_default(),
            controller.name_any(),
            controller.spec.active_bundle,
            updated.spec.active_bundle
        );
        Ok(())
    }
}

fn failed_status(state: BundleControllerState, error: &BundleError) -> PackageBundleControllerStatus {
    PackageBundleControllerStatus {
        state,
        detail: Some(error.to_string()),
        latest_bundle: None,
    }
}
