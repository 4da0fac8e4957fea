//! In-memory object store with resource-version checks, used by tests.
//!
//! Objects are kept as JSON keyed by (kind, namespace/name). Writes bump a
//! global resource version; a write carrying a stale version fails with
//! `StoreError::Conflict`. Clearing the finalizers of an object that has a
//! deletion timestamp removes it, mirroring the API server.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Secret;
use keel_core::crd::{Project, Reconcilable};
use keel_core::state::StateStatus;
use keel_core::ObjectKey;
use kube::core::ErrorResponse;
use kube::{Resource, ResourceExt};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::{json, Value};

use crate::{object_key, status_patch, ClusterReader, ObjectStore, SecretStore, StoreError};

type Slot = (String, ObjectKey);

#[derive(Default)]
pub struct MemoryStore {
    objects: Mutex<BTreeMap<Slot, Value>>,
    version: AtomicU64,
    status_writes: AtomicUsize,
    finalizer_writes: AtomicUsize,
    secret_writes: AtomicUsize,
}

fn kind_of<K: Resource<DynamicType = ()>>() -> String {
    K::kind(&()).to_string()
}

fn not_found(kind: &str, key: &ObjectKey) -> StoreError {
    StoreError::Kube(kube::Error::Api(ErrorResponse {
        status: "Failure".into(),
        message: format!("{kind} {key} not found"),
        reason: "NotFound".into(),
        code: 404,
    }))
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_version(&self) -> String {
        (self.version.fetch_add(1, Ordering::SeqCst) + 1).to_string()
    }

    /// Insert or overwrite an object, assigning a fresh resource version.
    pub fn insert<K: Resource<DynamicType = ()> + Serialize>(&self, obj: &K) {
        let mut v = serde_json::to_value(obj).unwrap_or(Value::Null);
        v["metadata"]["resourceVersion"] = json!(self.next_version());
        let mut objects = self.objects.lock().unwrap_or_else(|e| e.into_inner());
        objects.insert((kind_of::<K>(), object_key(obj)), v);
    }

    pub fn get_typed<K: Resource<DynamicType = ()> + DeserializeOwned>(&self, key: &ObjectKey) -> Option<K> {
        let objects = self.objects.lock().unwrap_or_else(|e| e.into_inner());
        objects
            .get(&(kind_of::<K>(), key.clone()))
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    pub fn contains<K: Resource<DynamicType = ()>>(&self, key: &ObjectKey) -> bool {
        let objects = self.objects.lock().unwrap_or_else(|e| e.into_inner());
        objects.contains_key(&(kind_of::<K>(), key.clone()))
    }

    /// Request deletion: stamps `deletionTimestamp`, or removes the object
    /// outright when it carries no finalizers.
    pub fn request_delete<K: Resource<DynamicType = ()>>(&self, key: &ObjectKey) {
        let version = self.next_version();
        let mut objects = self.objects.lock().unwrap_or_else(|e| e.into_inner());
        let slot = (kind_of::<K>(), key.clone());
        let Some(v) = objects.get_mut(&slot) else { return };
        let has_finalizers = v["metadata"]["finalizers"].as_array().map(|f| !f.is_empty()).unwrap_or(false);
        if has_finalizers {
            v["metadata"]["deletionTimestamp"] = json!(chrono::Utc::now().to_rfc3339());
            v["metadata"]["resourceVersion"] = json!(version);
        } else {
            objects.remove(&slot);
        }
    }

    pub fn status_writes(&self) -> usize {
        self.status_writes.load(Ordering::SeqCst)
    }

    pub fn finalizer_writes(&self) -> usize {
        self.finalizer_writes.load(Ordering::SeqCst)
    }

    pub fn secret_writes(&self) -> usize {
        self.secret_writes.load(Ordering::SeqCst)
    }

    fn guarded_write<F>(&self, kind: &str, key: &ObjectKey, rv: Option<String>, f: F) -> Result<(), StoreError>
    where
        F: FnOnce(&mut Value) -> bool,
    {
        let version = self.next_version();
        let mut objects = self.objects.lock().unwrap_or_else(|e| e.into_inner());
        let slot = (kind.to_string(), key.clone());
        let v = objects.get_mut(&slot).ok_or_else(|| not_found(kind, key))?;
        let stored = v["metadata"]["resourceVersion"].as_str().map(str::to_string);
        if rv.is_some() && rv != stored {
            return Err(StoreError::Conflict { kind: kind.to_string(), key: key.to_string() });
        }
        let remove = f(v);
        v["metadata"]["resourceVersion"] = json!(version);
        if remove {
            objects.remove(&slot);
        }
        Ok(())
    }
}

#[async_trait]
impl ClusterReader for MemoryStore {
    async fn get_secret(&self, key: &ObjectKey) -> Result<Option<Secret>, StoreError> {
        Ok(self.get_typed(key))
    }

    async fn get_project(&self, key: &ObjectKey) -> Result<Option<Project>, StoreError> {
        Ok(self.get_typed(key))
    }
}

#[async_trait]
impl<K: Reconcilable> ObjectStore<K> for MemoryStore {
    async fn get(&self, key: &ObjectKey) -> Result<Option<K>, StoreError> {
        Ok(self.get_typed(key))
    }

    async fn patch_status(&self, obj: &K, status: &StateStatus) -> Result<K, StoreError> {
        let patch = status_patch(status)?;
        let key = object_key(obj);
        self.guarded_write(&kind_of::<K>(), &key, obj.resource_version(), |v| {
            if !v["status"].is_object() {
                v["status"] = json!({});
            }
            if let (Some(dst), Some(src)) = (v["status"].as_object_mut(), patch.as_object()) {
                for (k, val) in src {
                    if val.is_null() {
                        dst.remove(k);
                    } else {
                        dst.insert(k.clone(), val.clone());
                    }
                }
            }
            false
        })?;
        self.status_writes.fetch_add(1, Ordering::SeqCst);
        self.get_typed(&key).ok_or_else(|| not_found(&kind_of::<K>(), &key))
    }

    async fn set_finalizers(&self, obj: &K, finalizers: Vec<String>) -> Result<(), StoreError> {
        let clear = finalizers.is_empty();
        self.guarded_write(&kind_of::<K>(), &object_key(obj), obj.resource_version(), |v| {
            v["metadata"]["finalizers"] = json!(finalizers);
            clear && !v["metadata"]["deletionTimestamp"].is_null()
        })?;
        self.finalizer_writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[async_trait]
impl SecretStore for MemoryStore {
    async fn upsert_secret(&self, secret: Secret) -> Result<(), StoreError> {
        let key = object_key(&secret);
        match self.get_typed::<Secret>(&key) {
            Some(mut live) => {
                live.data = secret.data;
                live.metadata.owner_references = secret.metadata.owner_references.or(live.metadata.owner_references);
                self.insert(&live);
            }
            None => self.insert(&secret),
        }
        self.secret_writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn annotate_secret(&self, key: &ObjectKey, annotation: &str, value: &str) -> Result<(), StoreError> {
        self.guarded_write("Secret", key, None, |v| {
            v["metadata"]["annotations"][annotation] = json!(value);
            false
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keel_core::crd::{IpAccessList, IpAccessListSpec};

    fn list(name: &str) -> IpAccessList {
        let mut l = IpAccessList::new(name, IpAccessListSpec::default());
        l.metadata.namespace = Some("ns".into());
        l
    }

    #[tokio::test]
    async fn stale_resource_version_conflicts() {
        let store = MemoryStore::new();
        store.insert(&list("a"));
        let key = ObjectKey::new("ns", "a");
        let first: IpAccessList = ObjectStore::<IpAccessList>::get(&store, &key).await.unwrap().unwrap();
        store.set_finalizers(&first, vec!["f".into()]).await.unwrap();
        let err = store.patch_status(&first, &StateStatus::default()).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict { .. }));
    }

    #[tokio::test]
    async fn clearing_finalizers_after_delete_request_removes_object() {
        let store = MemoryStore::new();
        let mut obj = list("a");
        obj.metadata.finalizers = Some(vec!["f".into()]);
        store.insert(&obj);
        let key = ObjectKey::new("ns", "a");
        store.request_delete::<IpAccessList>(&key);
        let live: IpAccessList = store.get_typed(&key).unwrap();
        assert!(live.metadata.deletion_timestamp.is_some());
        store.set_finalizers(&live, vec![]).await.unwrap();
        assert!(!store.contains::<IpAccessList>(&key));
    }
}
