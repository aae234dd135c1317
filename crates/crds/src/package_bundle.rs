//! PackageBundle CRD
//!
//! An immutable, versioned catalog of package sources targeting one
//! Kubernetes minor version. Only `status` is ever written by controllers.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// PackageBundleSpec lists the packages shipped for a Kubernetes version
#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
#[kube(
    group = "packages.eks.amazonaws.com",
    version = "v1alpha1",
    kind = "PackageBundle",
    namespaced,
    status = "PackageBundleStatus",
    printcolumn = r#"{"name":"Version","type":"string","jsonPath":".spec.kubeVersion"}"#,
    printcolumn = r#"{"name":"State","type":"string","jsonPath":".status.state"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct PackageBundleSpec {
    /// Kubernetes version this bundle is compatible with (e.g. "v1.21")
    #[serde(default)]
    pub kube_version: String,

    /// Packages supported by this bundle
    #[serde(default)]
    pub packages: Vec<BundlePackage>,
}

/// A package within a bundle
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct BundlePackage {
    /// Name of the package
    pub name: String,

    /// Source location for the package (usually a helm chart)
    pub source: BundlePackageSource,
}

/// Location of a package in a registry
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct BundlePackageSource {
    /// Registry in which the package is found
    pub registry: String,

    /// Repository within the registry
    pub repository: String,

    /// Versions of the package supported by this bundle
    #[serde(default)]
    pub versions: Vec<SourceVersion>,
}

/// A version of a package within a repository
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SourceVersion {
    /// Human-friendly label, e.g. "v1.0"
    pub name: String,

    /// sha256 digest identifying the package contents
    pub tag: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
/// Observed state of a PackageBundle
pub struct PackageBundleStatus {
    /// Whether this bundle is the active one for the cluster
    #[serde(default)]
    pub state: PackageBundleState,
}

/// PackageBundle lifecycle state
///
/// Serialized with the exact strings shown to operators by `kubectl get`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
pub enum PackageBundleState {
    /// Not the active bundle
    #[default]
    #[serde(rename = "inactive")]
    Inactive,

    /// The active bundle, no newer compatible bundle known
    #[serde(rename = "active")]
    Active,

    /// The active bundle, a newer compatible bundle exists
    #[serde(rename = "active (upgrade available)")]
    UpgradeAvailable,
}

impl PackageBundle {
    /// Looks up a package by name.
    #[must_use]
    pub fn find_package(&self, name: &str) -> Option<&BundlePackage> {
        self.spec.packages.iter().find(|p| p.name == name)
    }

    /// Current status state, `Inactive` when no status was recorded yet.
    #[must_use]
    pub fn state(&self) -> PackageBundleState {
        self.status.as_ref().map(|s| s.state).unwrap_or_default()
    }
}
