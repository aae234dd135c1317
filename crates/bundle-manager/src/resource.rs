//! Typed Kubernetes resource access
//!
//! One [`ResourceClient`] instance per resource kind. Writes carry the
//! resource version that was read, so a stale write fails with
//! [`ResourceError::Conflict`] instead of overwriting a newer object.

use crate::error::ResourceError;
use k8s_openapi::NamespaceResourceScope;
use kube::Resource;
use kube::api::{Api, ListParams, PostParams};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::fmt::Debug;
use std::marker::PhantomData;

/// Get, list and write access to one namespaced resource kind
#[async_trait::async_trait]
pub trait ResourceClient<K>: Send + Sync
where
    K: Send + Sync + 'static,
{
    /// Fetches `namespace/name`, `None` when it does not exist.
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<K>, ResourceError>;

    /// Lists every resource in `namespace`.
    async fn list(&self, namespace: &str) -> Result<Vec<K>, ResourceError>;

    /// Replaces the status of `resource`, guarded by its resource version.
    async fn replace_status(&self, resource: &K) -> Result<K, ResourceError>;

    /// Replaces the whole object, guarded by its resource version.
    async fn replace(&self, resource: &K) -> Result<K, ResourceError>;
}

/// [`ResourceClient`] backed by the Kubernetes API
pub struct KubeResourceClient<K> {
    client: kube::Client,
    kind: PhantomData<fn() -> K>,
}

impl<K> Clone for KubeResourceClient<K> {
    fn clone(&self) -> Self {
        Self {
            client: self.client.clone(),
            kind: PhantomData,
        }
    }
}

impl<K> Debug for KubeResourceClient<K> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeResourceClient")
            .field("kind", &std::any::type_name::<K>())
            .finish_non_exhaustive()
    }
}

impl<K> KubeResourceClient<K> {
    /// Creates a resource client from a Kubernetes client.
    #[must_use]
    pub fn new(client: kube::Client) -> Self {
        Self {
            client,
            kind: PhantomData,
        }
    }
}

fn identity<K: Resource>(resource: &K) -> Result<(String, String), ResourceError> {
    let name = resource
        .meta()
        .name
        .clone()
        .ok_or_else(|| ResourceError::NotFound("resource has no name".to_string()))?;
    let namespace = resource
        .meta()
        .namespace
        .clone()
        .ok_or_else(|| ResourceError::NotFound(format!("{name} has no namespace")))?;
    Ok((namespace, name))
}

/// Body of a status replace: the whole object. Status fields missing from it
/// are cleared, and its `resourceVersion` rejects stale writes with 409.
fn status_body<K: Serialize>(resource: &K) -> Result<Vec<u8>, ResourceError> {
    Ok(serde_json::to_vec(resource)?)
}

#[async_trait::async_trait]
impl<K> ResourceClient<K> for KubeResourceClient<K>
where
    K: Resource<Scope = NamespaceResourceScope, DynamicType = ()>
        + Clone
        + Debug
        + DeserializeOwned
        + Serialize
        + Send
        + Sync
        + 'static,
{
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<K>, ResourceError> {
        let api: Api<K> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get_opt(name).await?)
    }

    async fn list(&self, namespace: &str) -> Result<Vec<K>, ResourceError> {
        let api: Api<K> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.list(&ListParams::default()).await?.items)
    }

    async fn replace_status(&self, resource: &K) -> Result<K, ResourceError> {
        let (namespace, name) = identity(resource)?;
        let api: Api<K> = Api::namespaced(self.client.clone(), &namespace);
        Ok(api
            .replace_status(&name, &PostParams::default(), status_body(resource)?)
            .await?)
    }

    async fn replace(&self, resource: &K) -> Result<K, ResourceError> {
        let (namespace, name) = identity(resource)?;
        let api: Api<K> = Api::namespaced(self.client.clone(), &namespace);
        Ok(api.replace(&name, &PostParams::default(), resource).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::test_controller;
    use crds::{BundleControllerState, PackageBundleControllerStatus};

    #[test]
    fn test_status_body_is_the_complete_object() {
        let mut controller = test_controller("pbc", "eksa-packages", "v1.21-1001");
        controller.metadata.resource_version = Some("42".to_string());
        controller.status = Some(PackageBundleControllerStatus::with_state(BundleControllerState::Active));

        let body: serde_json::Value =
            serde_json::from_slice(&status_body(&controller).unwrap()).unwrap();

        assert_eq!(body["metadata"]["resourceVersion"], "42");
        assert_eq!(body["status"], serde_json::json!({"state": "active"}));
        assert_eq!(body["spec"]["activeBundle"], "v1.21-1001");
    }
}
