//! Keel kubehub: the seams through which the engine reads and writes the
//! cluster object store, plus their kube-rs implementation.

#![forbid(unsafe_code)]

#[cfg(any(test, feature = "testing"))]
pub mod memory;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::ByteString;
use keel_core::crd::{Project, Reconcilable};
use keel_core::state::StateStatus;
use keel_core::{ObjectKey, SecretData};
use kube::api::{Api, Patch, PatchParams, PostParams};
use kube::{Client, ResourceExt};
use serde_json::json;
use tracing::{debug, info};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("conflict writing {kind} {key}: the object changed since it was read")]
    Conflict { kind: String, key: String },
    #[error("kubernetes error: {0}")]
    Kube(#[from] kube::Error),
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

impl StoreError {
    fn from_write(e: kube::Error, kind: &str, key: &ObjectKey) -> Self {
        match e {
            kube::Error::Api(ae) if ae.code == 409 => StoreError::Conflict { kind: kind.to_string(), key: key.to_string() },
            e => StoreError::Kube(e),
        }
    }
}

/// Read-only access to the objects a resolver needs.
#[async_trait]
pub trait ClusterReader: Send + Sync {
    async fn get_secret(&self, key: &ObjectKey) -> Result<Option<Secret>, StoreError>;
    async fn get_project(&self, key: &ObjectKey) -> Result<Option<Project>, StoreError>;
}

/// Engine-side writes against one reconcilable kind. Only `status` and the
/// finalizer set are ever mutated.
#[async_trait]
pub trait ObjectStore<K: Reconcilable>: Send + Sync {
    async fn get(&self, key: &ObjectKey) -> Result<Option<K>, StoreError>;

    /// Merge-patch the engine-owned status fields, guarded by the object's
    /// resource version. Returns the object as stored after the write.
    async fn patch_status(&self, obj: &K, status: &StateStatus) -> Result<K, StoreError>;

    /// Replace the finalizer set, guarded by the object's resource version.
    async fn set_finalizers(&self, obj: &K, finalizers: Vec<String>) -> Result<(), StoreError>;
}

/// Secret writes needed by the token reconciler.
#[async_trait]
pub trait SecretStore: ClusterReader {
    /// Create the secret, or replace its data when it already exists.
    async fn upsert_secret(&self, secret: Secret) -> Result<(), StoreError>;

    async fn annotate_secret(&self, key: &ObjectKey, annotation: &str, value: &str) -> Result<(), StoreError>;
}

/// Decode a Secret's `data` (and `stringData`) into UTF-8 strings.
pub fn secret_data(secret: &Secret) -> SecretData {
    let mut out = SecretData::new();
    if let Some(data) = &secret.data {
        for (k, v) in data {
            out.insert(k.clone(), String::from_utf8_lossy(&v.0).into_owned());
        }
    }
    if let Some(data) = &secret.string_data {
        for (k, v) in data {
            out.insert(k.clone(), v.clone());
        }
    }
    out
}

pub fn encode_secret_data(data: &SecretData) -> std::collections::BTreeMap<String, ByteString> {
    data.iter().map(|(k, v)| (k.clone(), ByteString(v.as_bytes().to_vec()))).collect()
}

/// Merge-patch body for the engine-owned status fields. Unset fields are sent
/// as `null` so a cleared message or condition list is removed, not kept.
pub fn status_patch(status: &StateStatus) -> Result<serde_json::Value, StoreError> {
    let mut v = serde_json::to_value(status)?;
    if let Some(obj) = v.as_object_mut() {
        for field in ["conditions", "observedGeneration", "state", "stateMsg"] {
            obj.entry(field).or_insert(serde_json::Value::Null);
        }
    }
    Ok(v)
}

pub fn object_key<K: kube::Resource>(obj: &K) -> ObjectKey {
    ObjectKey::new(obj.namespace().unwrap_or_default(), obj.name_any())
}

pub async fn get_kube_client() -> Result<Client, StoreError> {
    Ok(Client::try_default().await?)
}

/// kube-rs backed implementation of every store seam.
#[derive(Clone)]
pub struct KubeStore {
    client: Client,
}

impl KubeStore {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    pub fn client(&self) -> &Client {
        &self.client
    }
}

async fn get_opt<K>(api: Api<K>, name: &str) -> Result<Option<K>, StoreError>
where
    K: kube::Resource + Clone + serde::de::DeserializeOwned + std::fmt::Debug,
{
    Ok(api.get_opt(name).await?)
}

#[async_trait]
impl ClusterReader for KubeStore {
    async fn get_secret(&self, key: &ObjectKey) -> Result<Option<Secret>, StoreError> {
        get_opt(Api::<Secret>::namespaced(self.client.clone(), &key.namespace), &key.name).await
    }

    async fn get_project(&self, key: &ObjectKey) -> Result<Option<Project>, StoreError> {
        get_opt(Api::<Project>::namespaced(self.client.clone(), &key.namespace), &key.name).await
    }
}

#[async_trait]
impl<K: Reconcilable> ObjectStore<K> for KubeStore {
    async fn get(&self, key: &ObjectKey) -> Result<Option<K>, StoreError> {
        get_opt(Api::<K>::namespaced(self.client.clone(), &key.namespace), &key.name).await
    }

    async fn patch_status(&self, obj: &K, status: &StateStatus) -> Result<K, StoreError> {
        let key = object_key(obj);
        let api: Api<K> = Api::namespaced(self.client.clone(), &key.namespace);
        let patch = json!({
            "metadata": { "resourceVersion": obj.resource_version() },
            "status": status_patch(status)?,
        });
        let updated = api
            .patch_status(&key.name, &PatchParams::default(), &Patch::Merge(&patch))
            .await
            .map_err(|e| StoreError::from_write(e, &K::kind(&()), &key))?;
        debug!(%key, state = ?status.state, "status patched");
        Ok(updated)
    }

    async fn set_finalizers(&self, obj: &K, finalizers: Vec<String>) -> Result<(), StoreError> {
        let key = object_key(obj);
        let api: Api<K> = Api::namespaced(self.client.clone(), &key.namespace);
        let patch = json!({
            "metadata": { "resourceVersion": obj.resource_version(), "finalizers": finalizers }
        });
        api.patch(&key.name, &PatchParams::default(), &Patch::Merge(&patch))
            .await
            .map_err(|e| StoreError::from_write(e, &K::kind(&()), &key))?;
        debug!(%key, ?finalizers, "finalizers updated");
        Ok(())
    }
}

#[async_trait]
impl SecretStore for KubeStore {
    async fn upsert_secret(&self, secret: Secret) -> Result<(), StoreError> {
        let key = object_key(&secret);
        let api: Api<Secret> = Api::namespaced(self.client.clone(), &key.namespace);
        match api.get_opt(&key.name).await? {
            Some(mut live) => {
                live.data = secret.data;
                live.string_data = None;
                live.metadata.owner_references = secret.metadata.owner_references.or(live.metadata.owner_references);
                api.replace(&key.name, &PostParams::default(), &live)
                    .await
                    .map_err(|e| StoreError::from_write(e, "Secret", &key))?;
                debug!(%key, "secret replaced");
            }
            None => {
                api.create(&PostParams::default(), &secret)
                    .await
                    .map_err(|e| StoreError::from_write(e, "Secret", &key))?;
                info!(%key, "secret created");
            }
        }
        Ok(())
    }

    async fn annotate_secret(&self, key: &ObjectKey, annotation: &str, value: &str) -> Result<(), StoreError> {
        let api: Api<Secret> = Api::namespaced(self.client.clone(), &key.namespace);
        let mut annotations = serde_json::Map::new();
        annotations.insert(annotation.to_string(), json!(value));
        let patch = json!({ "metadata": { "annotations": annotations } });
        api.patch(&key.name, &PatchParams::default(), &Patch::Merge(&patch))
            .await
            .map_err(|e| StoreError::from_write(e, "Secret", key))?;
        Ok(())
    }
}
