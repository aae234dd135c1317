//! PackageBundleController CRD
//!
//! Selects the active PackageBundle for a cluster. Exactly one instance,
//! identified by namespace and name, is owned by a running controller;
//! all others are marked ignored.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// PackageBundleControllerSpec selects the bundle to run
#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
#[kube(
    group = "packages.eks.amazonaws.com",
    version = "v1alpha1",
    kind = "PackageBundleController",
    namespaced,
    status = "PackageBundleControllerStatus",
    shortname = "pbc",
    printcolumn = r#"{"name":"ActiveBundle","type":"string","jsonPath":".spec.activeBundle"}"#,
    printcolumn = r#"{"name":"State","type":"string","jsonPath":".status.state"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct PackageBundleControllerSpec {
    /// Name of the PackageBundle the cluster should run
    #[serde(default)]
    pub active_bundle: String,

    /// Whether newer compatible bundles are adopted automatically
    #[serde(default)]
    pub upgrade_policy: UpgradePolicy,
}

/// How an available upgrade is handled
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
pub enum UpgradePolicy {
    /// Report the upgrade in status, leave `activeBundle` alone
    #[default]
    Manual,

    /// Move `activeBundle` to the latest compatible bundle
    Automatic,
}

/// Observed state of a PackageBundleController
///
/// Contains no timestamps: every field is derived from cluster and registry
/// state, so recomputing it for an unchanged world yields an equal value.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PackageBundleControllerStatus {
    /// Controller state
    #[serde(default)]
    pub state: BundleControllerState,

    /// Why the controller is not active
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,

    /// Latest compatible bundle seen during the last reconcile
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latest_bundle: Option<String>,
}

/// PackageBundleController state
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
pub enum BundleControllerState {
    /// Active bundle could not be resolved
    #[default]
    #[serde(rename = "inactive")]
    Inactive,

    /// Active bundle resolved, nothing newer
    #[serde(rename = "active")]
    Active,

    /// Active bundle resolved, a newer compatible bundle exists
    #[serde(rename = "active (upgrade available)")]
    UpgradeAvailable,

    /// Not the controller instance owned by this process
    #[serde(rename = "ignored")]
    Ignored,

    /// Registry unreachable, retrying
    #[serde(rename = "disconnected")]
    Disconnected,
}

impl BundleControllerState {
    /// Operator-facing label, identical to the serialized form.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Inactive => "inactive",
            Self::Active => "active",
            Self::UpgradeAvailable => "active (upgrade available)",
            Self::Ignored => "ignored",
            Self::Disconnected => "disconnected",
        }
    }
}

impl std::fmt::Display for BundleControllerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl PackageBundleControllerStatus {
    /// Status carrying only a state.
    #[must_use]
    pub fn with_state(state: BundleControllerState) -> Self {
        Self {
            state,
            ..Self::default()
        }
    }
}
