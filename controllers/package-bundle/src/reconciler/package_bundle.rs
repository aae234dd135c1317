use super::Reconciler;
use crate::error::ControllerError;
use crds::{BundleControllerState, PackageBundleState, PackageBundleStatus};
use kube::ResourceExt;
use tracing::{debug, warn};

impl Reconciler {
    /// Marks `active_name` in the catalog with the controller's state and
    /// every other bundle inactive. With no active bundle every bundle is
    /// inactive. Bundles already in the right state are not written; a lost
    /// write race is left for the next reconcile.
    pub(crate) async fn project_bundle_states(
        &self,
        active_name: Option<&str>,
        controller_state: BundleControllerState,
    ) -> Result<usize, ControllerError> {
        let namespace = self.manager.catalog_namespace();
        let active_state = match controller_state {
            BundleControllerState::UpgradeAvailable => PackageBundleState::UpgradeAvailable,
            _ => PackageBundleState::Active,
        };

        let mut written = 0;
        for mut bundle in self.bundles.list(namespace).await? {
            let name = bundle.name_any();
            let desired = if active_name == Some(name.as_str()) {
                active_state
            } else {
                PackageBundleState::Inactive
            };
            if bundle.state() == desired {
                continue;
            }

            bundle.status = Some(PackageBundleStatus { state: desired });
            match self.bundles.replace_status(&bundle).await {
                Ok(_) => {
                    debug!("Marked bundle {}/{} {:?}", namespace, name, desired);
                    written += 1;
                }
                Err(e) if e.is_conflict() => {
                    warn!("Bundle {}/{} changed while updating its status, skipping", namespace, name);
                }
                Err(e) => return Err(e.into()),
            }
        }
        Ok(written)
    }
}
