//! # Object Store
//!
//! Narrow access to the cluster store used by reconcile actions, resolution
//! and status persistence. `KubeStore` talks to the API server; tests use an
//! in-memory implementation.

use async_trait::async_trait;
use k8s_openapi::NamespaceResourceScope;
use kube::api::{Api, DeleteParams, ListParams, Patch, PatchParams, PostParams};
use kube::{Client, Resource, ResourceExt};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt::Debug;
use thiserror::Error;

/// Any namespaced object this controller reads or writes.
pub trait Managed:
    Resource<DynamicType = (), Scope = NamespaceResourceScope>
    + Clone
    + Debug
    + Serialize
    + DeserializeOwned
    + Send
    + Sync
    + 'static
{
}

impl<K> Managed for K where
    K: Resource<DynamicType = (), Scope = NamespaceResourceScope>
        + Clone
        + Debug
        + Serialize
        + DeserializeOwned
        + Send
        + Sync
        + 'static
{
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{kind} {namespace}/{name} not found")]
    NotFound {
        kind: String,
        namespace: String,
        name: String,
    },
    #[error("conflict writing {kind} {namespace}/{name}: {message}")]
    Conflict {
        kind: String,
        namespace: String,
        name: String,
        message: String,
    },
    #[error("{kind} {namespace}/{name}: {source}")]
    Api {
        kind: String,
        namespace: String,
        name: String,
        #[source]
        source: kube::Error,
    },
    #[error("failed to encode {kind}: {source}")]
    Encode {
        kind: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("{0}")]
    Other(String),
}

impl StoreError {
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound { .. })
    }

    #[must_use]
    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::Conflict { .. })
    }

    /// Classify a kube error by its API status code.
    #[must_use]
    pub fn from_kube(kind: &str, namespace: &str, name: &str, error: kube::Error) -> Self {
        match &error {
            kube::Error::Api(response) if response.code == 404 => StoreError::NotFound {
                kind: kind.to_string(),
                namespace: namespace.to_string(),
                name: name.to_string(),
            },
            kube::Error::Api(response) if response.code == 409 => StoreError::Conflict {
                kind: kind.to_string(),
                namespace: namespace.to_string(),
                name: name.to_string(),
                message: response.message.clone(),
            },
            _ => StoreError::Api {
                kind: kind.to_string(),
                namespace: namespace.to_string(),
                name: name.to_string(),
                source: error,
            },
        }
    }
}

/// Kind name of a managed type
#[must_use]
pub fn kind_of<K: Managed>() -> String {
    K::kind(&()).to_string()
}

#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// `Ok(None)` when the object does not exist.
    async fn get<K: Managed>(&self, namespace: &str, name: &str) -> Result<Option<K>, StoreError>;

    async fn create<K: Managed>(&self, object: &K) -> Result<K, StoreError>;

    /// Full replace; a stale resource version is a `Conflict`.
    async fn update<K: Managed>(&self, object: &K) -> Result<K, StoreError>;

    async fn delete<K: Managed>(&self, namespace: &str, name: &str) -> Result<(), StoreError>;

    async fn list<K: Managed>(
        &self,
        namespace: &str,
        label_selector: &str,
    ) -> Result<Vec<K>, StoreError>;

    /// Write the status sub-resource; a stale resource version is a `Conflict`.
    async fn update_status<K: Managed>(
        &self,
        object: &K,
        status: &serde_json::Value,
    ) -> Result<K, StoreError>;
}

/// `ObjectStore` backed by the Kubernetes API
#[derive(Clone)]
pub struct KubeStore {
    client: Client,
    field_manager: String,
}

impl std::fmt::Debug for KubeStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeStore")
            .field("field_manager", &self.field_manager)
            .finish_non_exhaustive()
    }
}

impl KubeStore {
    #[must_use]
    pub fn new(client: Client, field_manager: impl Into<String>) -> Self {
        Self {
            client,
            field_manager: field_manager.into(),
        }
    }

    fn api<K: Managed>(&self, namespace: &str) -> Api<K> {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn post_params(&self) -> PostParams {
        PostParams {
            field_manager: Some(self.field_manager.clone()),
            ..PostParams::default()
        }
    }
}

fn identity<K: Managed>(object: &K) -> (String, String) {
    (
        object.namespace().unwrap_or_default(),
        object.name_any(),
    )
}

#[async_trait]
impl ObjectStore for KubeStore {
    async fn get<K: Managed>(&self, namespace: &str, name: &str) -> Result<Option<K>, StoreError> {
        self.api::<K>(namespace)
            .get_opt(name)
            .await
            .map_err(|e| StoreError::from_kube(&kind_of::<K>(), namespace, name, e))
    }

    async fn create<K: Managed>(&self, object: &K) -> Result<K, StoreError> {
        let (namespace, name) = identity(object);
        self.api::<K>(&namespace)
            .create(&self.post_params(), object)
            .await
            .map_err(|e| StoreError::from_kube(&kind_of::<K>(), &namespace, &name, e))
    }

    async fn update<K: Managed>(&self, object: &K) -> Result<K, StoreError> {
        let (namespace, name) = identity(object);
        self.api::<K>(&namespace)
            .replace(&name, &self.post_params(), object)
            .await
            .map_err(|e| StoreError::from_kube(&kind_of::<K>(), &namespace, &name, e))
    }

    async fn delete<K: Managed>(&self, namespace: &str, name: &str) -> Result<(), StoreError> {
        self.api::<K>(namespace)
            .delete(name, &DeleteParams::background())
            .await
            .map(|_| ())
            .map_err(|e| StoreError::from_kube(&kind_of::<K>(), namespace, name, e))
    }

    async fn list<K: Managed>(
        &self,
        namespace: &str,
        label_selector: &str,
    ) -> Result<Vec<K>, StoreError> {
        let params = ListParams::default().labels(label_selector);
        self.api::<K>(namespace)
            .list(&params)
            .await
            .map(|list| list.items)
            .map_err(|e| StoreError::from_kube(&kind_of::<K>(), namespace, "", e))
    }

    async fn update_status<K: Managed>(
        &self,
        object: &K,
        status: &serde_json::Value,
    ) -> Result<K, StoreError> {
        let (namespace, name) = identity(object);
        // resourceVersion in a merge patch makes the API server reject stale writes
        let patch = serde_json::json!({
            "metadata": { "resourceVersion": object.resource_version() },
            "status": status,
        });
        self.api::<K>(&namespace)
            .patch_status(
                &name,
                &PatchParams::apply(&self.field_manager),
                &Patch::Merge(patch),
            )
            .await
            .map_err(|e| StoreError::from_kube(&kind_of::<K>(), &namespace, &name, e))
    }
}
