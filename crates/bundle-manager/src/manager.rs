//! Bundle selection
//!
//! The [`BundleManager`] answers three questions for the reconciler: which
//! bundle is active, which compatible bundle is newest, and whether the
//! second is an upgrade of the first. It never writes cluster state.

use crate::discovery::Discovery;
use crate::error::BundleError;
use crate::resource::ResourceClient;
use crate::version::{BundleVersion, KubeVersion};
use crds::{PackageBundle, PackageBundleController};
use kube::ResourceExt;
use registry_client::Puller;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

const BUNDLE_KIND: &str = "PackageBundle";

/// Where bundles live
#[derive(Debug, Clone)]
pub struct BundleManagerConfig {
    /// Namespace holding the PackageBundle catalog
    pub catalog_namespace: String,
    /// Registry repository bundles are published to, tagged by bundle name
    pub bundle_repository: String,
}

/// Resolves active and latest bundles
pub struct BundleManager {
    config: BundleManagerConfig,
    discovery: Arc<dyn Discovery>,
    puller: Arc<dyn Puller>,
    bundles: Arc<dyn ResourceClient<PackageBundle>>,
}

impl fmt::Debug for BundleManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BundleManager")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl BundleManager {
    /// Creates a bundle manager.
    #[must_use]
    pub fn new(
        config: BundleManagerConfig,
        discovery: Arc<dyn Discovery>,
        puller: Arc<dyn Puller>,
        bundles: Arc<dyn ResourceClient<PackageBundle>>,
    ) -> Self {
        Self {
            config,
            discovery,
            puller,
            bundles,
        }
    }

    /// Namespace holding the bundle catalog.
    #[must_use]
    pub fn catalog_namespace(&self) -> &str {
        &self.config.catalog_namespace
    }

    /// Registry reference a bundle named `name` is published under.
    #[must_use]
    pub fn bundle_reference(&self, name: &str) -> String {
        format!("{}:{}", self.config.bundle_repository, name)
    }

    /// Kubernetes version of the running cluster.
    ///
    /// # Errors
    ///
    /// Returns [`BundleError::Discovery`] when the version cannot be determined.
    pub async fn kube_version(&self) -> Result<KubeVersion, BundleError> {
        self.discovery.kube_version().await
    }

    /// Every bundle in the catalog namespace, in listing order.
    ///
    /// # Errors
    ///
    /// Returns [`BundleError::Resource`] when the catalog cannot be listed.
    pub async fn catalog(&self) -> Result<Vec<PackageBundle>, BundleError> {
        Ok(self.bundles.list(&self.config.catalog_namespace).await?)
    }

    /// The bundle named by `spec.activeBundle`.
    ///
    /// Read from the catalog when present, otherwise pulled from the bundle
    /// repository.
    ///
    /// # Errors
    ///
    /// `NotFound` when neither the catalog nor the registry has it,
    /// `Pull` when the registry is unreachable, `MalformedBundle` when the
    /// pulled content is not a valid bundle.
    pub async fn active_bundle(
        &self,
        controller: &PackageBundleController,
    ) -> Result<PackageBundle, BundleError> {
        let name = controller.spec.active_bundle.trim();
        if name.is_empty() {
            return Err(BundleError::NotFound(format!(
                "{} does not name an active bundle",
                controller.name_any()
            )));
        }

        if let Some(bundle) = self.bundles.get(&self.config.catalog_namespace, name).await? {
            debug!("Active bundle {} found in {}", name, self.config.catalog_namespace);
            return Ok(bundle);
        }

        info!("Active bundle {} not in catalog, pulling from registry", name);
        let bundle = self.download_bundle(&self.bundle_reference(name)).await?;
        if bundle.name_any() != name {
            return Err(BundleError::MalformedBundle {
                name: name.to_string(),
                reason: format!("registry returned bundle {}", bundle.name_any()),
            });
        }
        Ok(bundle)
    }

    /// Newest catalog bundle compatible with `kube_version`.
    ///
    /// # Errors
    ///
    /// `NoCompatibleBundle` when no bundle targets that version; this is an
    /// expected outcome for clusters newer than any published bundle.
    pub async fn latest_bundle(&self, kube_version: &KubeVersion) -> Result<PackageBundle, BundleError> {
        let bundles = self.catalog().await?;
        select_latest(bundles, kube_version)
            .ok_or_else(|| BundleError::NoCompatibleBundle(kube_version.to_string()))
    }

    /// Whether `latest` is a strictly newer release of `active`'s line.
    ///
    /// Bundles for different Kubernetes versions are never upgrades of
    /// each other, and unparsable names never report an upgrade.
    #[must_use]
    pub fn is_upgrade_available(&self, active: &PackageBundle, latest: &PackageBundle) -> bool {
        let (Ok(active_version), Ok(latest_version)) = (
            BundleVersion::parse(&active.name_any()),
            BundleVersion::parse(&latest.name_any()),
        ) else {
            return false;
        };
        let declared_lines_differ = matches!(
            (
                KubeVersion::parse(&active.spec.kube_version),
                KubeVersion::parse(&latest.spec.kube_version),
            ),
            (Ok(a), Ok(l)) if a != l
        );
        !declared_lines_differ && latest_version.is_upgrade_over(&active_version)
    }

    /// Pulls `reference` and decodes it as a PackageBundle.
    ///
    /// # Errors
    ///
    /// Pull failures keep their registry classification (`BadReference`,
    /// `NotFound`, `Pull`); content that arrives but is not a valid bundle
    /// is `MalformedBundle`.
    pub async fn download_bundle(&self, reference: &str) -> Result<PackageBundle, BundleError> {
        let bytes = self.puller.pull(reference).await?;
        parse_bundle(&bytes).map_err(|reason| BundleError::MalformedBundle {
            name: reference.to_string(),
            reason,
        })
    }
}

/// Picks the highest `(kube, ordinal)` among bundles targeting `kube_version`.
fn select_latest(bundles: Vec<PackageBundle>, kube_version: &KubeVersion) -> Option<PackageBundle> {
    bundles
        .into_iter()
        .filter_map(|bundle| {
            let name = bundle.name_any();
            let target = KubeVersion::parse(&bundle.spec.kube_version).ok()?;
            if target != *kube_version {
                return None;
            }
            match BundleVersion::parse(&name) {
                Ok(version) if version.kube == target => Some((version, name, bundle)),
                Ok(version) => {
                    warn!(
                        "Bundle {} is named for {} but targets {}, skipping",
                        name, version.kube, target
                    );
                    None
                }
                Err(e) => {
                    warn!("Skipping bundle with unparsable name: {}", e);
                    None
                }
            }
        })
        .max_by(|(va, na, _), (vb, nb, _)| va.cmp(vb).then_with(|| na.cmp(nb)))
        .map(|(_, _, bundle)| bundle)
}

fn parse_bundle(bytes: &[u8]) -> Result<PackageBundle, String> {
    let value: serde_yaml::Value =
        serde_yaml::from_slice(bytes).map_err(|e| format!("not YAML: {e}"))?;
    match value.get("kind").and_then(serde_yaml::Value::as_str) {
        Some(BUNDLE_KIND) => {}
        Some(other) => return Err(format!("expected kind {BUNDLE_KIND}, got {other}")),
        None => return Err("missing kind".to_string()),
    }
    let bundle: PackageBundle =
        serde_yaml::from_value(value).map_err(|e| format!("schema violation: {e}"))?;
    validate_bundle(&bundle)?;
    Ok(bundle)
}

fn validate_bundle(bundle: &PackageBundle) -> Result<(), String> {
    if bundle.metadata.name.as_deref().is_none_or(str::is_empty) {
        return Err("missing metadata.name".to_string());
    }
    KubeVersion::parse(&bundle.spec.kube_version).map_err(|e| format!("spec.kubeVersion: {e}"))?;

    let mut seen = HashSet::new();
    for package in &bundle.spec.packages {
        if package.name.is_empty() {
            return Err("package with empty name".to_string());
        }
        if !seen.insert(package.name.as_str()) {
            return Err(format!("duplicate package {}", package.name));
        }
        if package.source.versions.is_empty() {
            return Err(format!("package {} has no versions", package.name));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discovery::StaticDiscovery;
    use crate::mock::{MockResourceClient, test_bundle, test_controller};
    use registry_client::{MockFailure, MockPuller};

    const REPOSITORY: &str = "public.ecr.aws/eks-anywhere/eks-anywhere-packages-bundles";
    const BUNDLE_ONE: &str = include_str!("../testdata/bundle_one.yaml");

    struct Fixture {
        manager: BundleManager,
        puller: MockPuller,
        bundles: Arc<MockResourceClient<PackageBundle>>,
    }

    fn fixture(catalog: &[&str]) -> Fixture {
        let puller = MockPuller::new();
        let bundles: Arc<MockResourceClient<PackageBundle>> = Arc::new(MockResourceClient::new());
        for name in catalog {
            bundles.insert(test_bundle(name, "eksa-packages", "v1.21"));
        }
        let manager = BundleManager::new(
            BundleManagerConfig {
                catalog_namespace: "eksa-packages".to_string(),
                bundle_repository: REPOSITORY.to_string(),
            },
            Arc::new(StaticDiscovery::new(KubeVersion::new(1, 21))),
            Arc::new(puller.clone()),
            Arc::clone(&bundles) as Arc<dyn ResourceClient<PackageBundle>>,
        );
        Fixture { manager, puller, bundles }
    }

    #[tokio::test]
    async fn test_active_bundle_from_catalog_does_not_pull() {
        let f = fixture(&["v1.21-1001"]);
        let controller = test_controller("pbc", "eksa-packages", "v1.21-1001");

        let bundle = f.manager.active_bundle(&controller).await.unwrap();
        assert_eq!(bundle.name_any(), "v1.21-1001");
        assert!(f.puller.attempts().is_empty());
    }

    #[tokio::test]
    async fn test_active_bundle_pulled_when_not_in_catalog() {
        let f = fixture(&[]);
        f.puller.add_data(&format!("{REPOSITORY}:v1.21-1001"), BUNDLE_ONE);
        let controller = test_controller("pbc", "eksa-packages", "v1.21-1001");

        let bundle = f.manager.active_bundle(&controller).await.unwrap();
        assert_eq!(bundle.name_any(), "v1.21-1001");
        assert_eq!(bundle.spec.packages.len(), 1);
        assert_eq!(f.puller.fetches(), [format!("{REPOSITORY}:v1.21-1001")]);
    }

    #[tokio::test]
    async fn test_active_bundle_missing_everywhere_is_not_found() {
        let f = fixture(&[]);
        let controller = test_controller("pbc", "eksa-packages", "v1.21-1001");

        let err = f.manager.active_bundle(&controller).await.unwrap_err();
        assert!(matches!(err, BundleError::NotFound(_)), "{err:?}");
    }

    #[tokio::test]
    async fn test_active_bundle_unreachable_registry_is_disconnected() {
        let f = fixture(&[]);
        f.puller.set_default_failure(MockFailure::Unreachable);
        let controller = test_controller("pbc", "eksa-packages", "v1.21-1001");

        let err = f.manager.active_bundle(&controller).await.unwrap_err();
        assert!(err.is_disconnected(), "{err:?}");
    }

    #[tokio::test]
    async fn test_active_bundle_empty_name_is_not_found() {
        let f = fixture(&["v1.21-1001"]);
        let controller = test_controller("pbc", "eksa-packages", "  ");

        let err = f.manager.active_bundle(&controller).await.unwrap_err();
        assert!(matches!(err, BundleError::NotFound(_)));
        assert!(f.puller.attempts().is_empty());
    }

    #[tokio::test]
    async fn test_latest_bundle_uses_ordinal_not_listing_order() {
        let f = fixture(&["v1.21-1002", "v1.21-1010", "v1.21-999"]);
        f.bundles.insert(test_bundle("v1.22-5000", "eksa-packages", "v1.22"));
        f.bundles.insert(test_bundle("not-a-version", "eksa-packages", "v1.21"));

        let latest = f.manager.latest_bundle(&KubeVersion::new(1, 21)).await.unwrap();
        assert_eq!(latest.name_any(), "v1.21-1010");
    }

    #[tokio::test]
    async fn test_latest_bundle_without_compatible_bundles() {
        let f = fixture(&["v1.21-1001"]);

        let err = f.manager.latest_bundle(&KubeVersion::new(1, 30)).await.unwrap_err();
        assert!(matches!(err, BundleError::NoCompatibleBundle(ref v) if v == "v1.30"));
    }

    #[test]
    fn test_upgrade_available_compares_ordinals_within_line() {
        let f = fixture(&[]);
        let active = test_bundle("v1.21-1001", "eksa-packages", "v1.21");
        let newer = test_bundle("v1.21-1002", "eksa-packages", "v1.21");
        let other_line = test_bundle("v1.22-1", "eksa-packages", "v1.22");
        let unparsable = test_bundle("latest", "eksa-packages", "v1.21");

        assert!(f.manager.is_upgrade_available(&active, &newer));
        assert!(!f.manager.is_upgrade_available(&newer, &active));
        assert!(!f.manager.is_upgrade_available(&active, &active));
        assert!(!f.manager.is_upgrade_available(&active, &other_line));
        assert!(!f.manager.is_upgrade_available(&active, &unparsable));
    }

    #[tokio::test]
    async fn test_download_bundle_from_file_fixture() {
        let f = fixture(&[]);
        let reference = format!("{REPOSITORY}:v1.21-1002");
        f.puller
            .add_file_data(
                &reference,
                concat!(env!("CARGO_MANIFEST_DIR"), "/testdata/bundle_two.yaml"),
            )
            .unwrap();

        let bundle = f.manager.download_bundle(&reference).await.unwrap();
        assert_eq!(bundle.name_any(), "v1.21-1002");
        assert_eq!(bundle.spec.packages.len(), 2);
        let hello = bundle.find_package("hello-eks-anywhere").unwrap();
        assert_eq!(hello.source.versions.len(), 2);
        assert!(bundle.find_package("harbor").is_some());
    }

    #[tokio::test]
    async fn test_download_distinguishes_garbage_from_unreachable() {
        let f = fixture(&[]);
        f.puller.add_data("public.ecr.aws/bundles:garbage", "kind: [unterminated");
        f.puller.add_data("public.ecr.aws/bundles:wrong-kind", "kind: ConfigMap\nmetadata:\n  name: x\n");
        f.puller.add_failure("public.ecr.aws/bundles:offline", MockFailure::Timeout);

        let err = f.manager.download_bundle("public.ecr.aws/bundles:garbage").await.unwrap_err();
        assert!(matches!(err, BundleError::MalformedBundle { .. }));
        let err = f.manager.download_bundle("public.ecr.aws/bundles:wrong-kind").await.unwrap_err();
        assert!(matches!(err, BundleError::MalformedBundle { .. }));
        let err = f.manager.download_bundle("public.ecr.aws/bundles:offline").await.unwrap_err();
        assert!(matches!(err, BundleError::Pull(_)));
        let err = f.manager.download_bundle("no registry here").await.unwrap_err();
        assert!(matches!(err, BundleError::BadReference(_)));
    }

    #[test]
    fn test_validate_rejects_duplicate_packages() {
        let yaml = r"
kind: PackageBundle
metadata:
  name: v1.21-1001
spec:
  kubeVersion: v1.21
  packages:
    - name: flux
      source: {registry: r, repository: flux, versions: [{name: v1, tag: sha256:aa}]}
    - name: flux
      source: {registry: r, repository: flux, versions: [{name: v2, tag: sha256:bb}]}
";
        let err = parse_bundle(yaml.as_bytes()).unwrap_err();
        assert!(err.contains("duplicate package flux"));
    }

    #[test]
    fn test_validate_rejects_package_without_versions() {
        let yaml = r"
kind: PackageBundle
metadata:
  name: v1.21-1001
spec:
  kubeVersion: v1.21
  packages:
    - name: harbor
      source: {registry: r, repository: harbor, versions: []}
";
        let err = parse_bundle(yaml.as_bytes()).unwrap_err();
        assert!(err.contains("no versions"));
    }

    #[test]
    fn test_parse_bundle_fixture() {
        let bundle = parse_bundle(BUNDLE_ONE.as_bytes()).unwrap();
        assert_eq!(bundle.spec.kube_version, "v1.21");
    }
}
