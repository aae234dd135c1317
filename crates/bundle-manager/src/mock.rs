//! In-memory resource clients and fixtures for unit testing
//!
//! [`MockResourceClient`] behaves like an API server for one kind: it keeps
//! objects by `(namespace, name)`, bumps `resourceVersion` on every write and
//! rejects writes that carry a stale one. Status writes replace only the
//! stored `status`, as the status subresource does.

use crate::discovery::Discovery;
use crate::error::{BundleError, ResourceError};
use crate::resource::ResourceClient;
use crate::version::KubeVersion;
use crds::{
    BundlePackage, BundlePackageSource, PackageBundle, PackageBundleController,
    PackageBundleControllerSpec, PackageBundleSpec, SourceVersion,
};
use kube::Resource;
use kube::core::object::HasStatus;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug)]
struct Store<K> {
    objects: BTreeMap<(String, String), K>,
    next_version: u64,
    pending_conflicts: usize,
    fail_reads: bool,
    gets: usize,
    lists: usize,
    status_writes: usize,
    writes: usize,
}

impl<K> Default for Store<K> {
    fn default() -> Self {
        Self {
            objects: BTreeMap::new(),
            next_version: 1,
            pending_conflicts: 0,
            fail_reads: false,
            gets: 0,
            lists: 0,
            status_writes: 0,
            writes: 0,
        }
    }
}

impl<K: Resource + Clone> Store<K> {
    fn stamp(&mut self, object: &mut K) {
        object.meta_mut().resource_version = Some(self.next_version.to_string());
        self.next_version += 1;
    }

    /// Applies `incoming` to the stored object if its resourceVersion
    /// matches.
    fn write(&mut self, incoming: &K, apply: impl FnOnce(&mut K, &K)) -> Result<K, ResourceError> {
        let key = key_of(incoming)?;

        if self.pending_conflicts > 0 {
            self.pending_conflicts -= 1;
            // Someone else wrote first: the stored version moves on.
            if let Some(mut current) = self.objects.get(&key).cloned() {
                self.stamp(&mut current);
                self.objects.insert(key.clone(), current);
            }
            return Err(ResourceError::Conflict(format!("{}/{} was modified", key.0, key.1)));
        }

        let current = self
            .objects
            .get(&key)
            .ok_or_else(|| ResourceError::NotFound(format!("{}/{}", key.0, key.1)))?;
        if current.meta().resource_version != incoming.meta().resource_version {
            return Err(ResourceError::Conflict(format!(
                "{}/{} has resourceVersion {:?}, write carried {:?}",
                key.0,
                key.1,
                current.meta().resource_version,
                incoming.meta().resource_version
            )));
        }

        let mut stored = current.clone();
        apply(&mut stored, incoming);
        self.stamp(&mut stored);
        self.objects.insert(key, stored.clone());
        Ok(stored)
    }
}

fn key_of<K: Resource>(object: &K) -> Result<(String, String), ResourceError> {
    let meta = object.meta();
    match (&meta.namespace, &meta.name) {
        (Some(namespace), Some(name)) => Ok((namespace.clone(), name.clone())),
        _ => Err(ResourceError::NotFound("object has no namespace or name".to_string())),
    }
}

/// In-memory [`ResourceClient`] for testing
#[derive(Debug)]
pub struct MockResourceClient<K> {
    store: Arc<Mutex<Store<K>>>,
}

impl<K> Clone for MockResourceClient<K> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
        }
    }
}

impl<K> Default for MockResourceClient<K> {
    fn default() -> Self {
        Self {
            store: Arc::new(Mutex::new(Store::default())),
        }
    }
}

impl<K: Resource + Clone> MockResourceClient<K> {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or overwrites an object without counting it as a write.
    ///
    /// # Panics
    ///
    /// Panics if the object has no namespace or name.
    pub fn insert(&self, mut object: K) {
        let mut store = lock(&self.store);
        let key = key_of(&object).expect("fixture objects need a namespace and name");
        store.stamp(&mut object);
        store.objects.insert(key, object);
    }

    /// Current stored copy of `namespace/name`.
    #[must_use]
    pub fn object(&self, namespace: &str, name: &str) -> Option<K> {
        lock(&self.store)
            .objects
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
    }

    /// Fails the next `count` writes with a conflict, as if another writer
    /// got in first.
    pub fn inject_conflicts(&self, count: usize) {
        lock(&self.store).pending_conflicts = count;
    }

    /// Makes every `get` and `list` fail.
    pub fn fail_reads(&self, fail: bool) {
        lock(&self.store).fail_reads = fail;
    }

    /// Number of `get` calls.
    #[must_use]
    pub fn gets(&self) -> usize {
        lock(&self.store).gets
    }

    /// Number of `list` calls.
    #[must_use]
    pub fn lists(&self) -> usize {
        lock(&self.store).lists
    }

    /// Number of successful status writes.
    #[must_use]
    pub fn status_writes(&self) -> usize {
        lock(&self.store).status_writes
    }

    /// Number of successful whole-object writes.
    #[must_use]
    pub fn writes(&self) -> usize {
        lock(&self.store).writes
    }
}

#[async_trait::async_trait]
impl<K> ResourceClient<K> for MockResourceClient<K>
where
    K: Resource + HasStatus + Clone + Send + Sync + 'static,
    K::Status: Clone,
{
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<K>, ResourceError> {
        let mut store = lock(&self.store);
        store.gets += 1;
        if store.fail_reads {
            return Err(ResourceError::NotFound(format!("injected read failure for {namespace}/{name}")));
        }
        Ok(store
            .objects
            .get(&(namespace.to_string(), name.to_string()))
            .cloned())
    }

    async fn list(&self, namespace: &str) -> Result<Vec<K>, ResourceError> {
        let mut store = lock(&self.store);
        store.lists += 1;
        if store.fail_reads {
            return Err(ResourceError::NotFound(format!("injected read failure for {namespace}")));
        }
        Ok(store
            .objects
            .iter()
            .filter(|((ns, _), _)| ns == namespace)
            .map(|(_, object)| object.clone())
            .collect())
    }

    async fn replace_status(&self, resource: &K) -> Result<K, ResourceError> {
        let mut store = lock(&self.store);
        let stored = store.write(resource, |stored, incoming| {
            *stored.status_mut() = incoming.status().cloned();
        })?;
        store.status_writes += 1;
        Ok(stored)
    }

    async fn replace(&self, resource: &K) -> Result<K, ResourceError> {
        let mut store = lock(&self.store);
        let stored = store.write(resource, |stored, incoming| *stored = incoming.clone())?;
        store.writes += 1;
        Ok(stored)
    }
}

/// Discovery that always fails
#[derive(Debug, Clone, Default)]
pub struct FailingDiscovery;

#[async_trait::async_trait]
impl Discovery for FailingDiscovery {
    async fn kube_version(&self) -> Result<KubeVersion, BundleError> {
        Err(BundleError::Discovery("API server unavailable".to_string()))
    }
}

/// A single-package bundle named `name` targeting `kube_version`.
#[must_use]
pub fn test_bundle(name: &str, namespace: &str, kube_version: &str) -> PackageBundle {
    PackageBundle {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            ..Default::default()
        },
        spec: PackageBundleSpec {
            kube_version: kube_version.to_string(),
            packages: vec![BundlePackage {
                name: "hello-eks-anywhere".to_string(),
                source: BundlePackageSource {
                    registry: "public.ecr.aws/l0g8r8j6".to_string(),
                    repository: "hello-eks-anywhere".to_string(),
                    versions: vec![SourceVersion {
                        name: "0.1.0".to_string(),
                        tag: "sha256:0526725a65691a3cd8a3ed4c8f7b5c8d1c9b3e2a4f6d7e8b9a0c1d2e3f4a5b6c".to_string(),
                    }],
                },
            }],
        },
        status: None,
    }
}

/// A PackageBundleController pointing at `active_bundle`.
#[must_use]
pub fn test_controller(name: &str, namespace: &str, active_bundle: &str) -> PackageBundleController {
    PackageBundleController {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            ..Default::default()
        },
        spec: PackageBundleControllerSpec {
            active_bundle: active_bundle.to_string(),
            ..Default::default()
        },
        status: None,
    }
}
