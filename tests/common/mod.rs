//! In-memory collaborators for driving the reconciler end to end

#![allow(dead_code)]

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, Time};
use kube::core::ErrorResponse;
use kube::ResourceExt;

use zfs_operator::adapters::{Dataset, DestroyFlags, VolumeStore, ZfsBackend};
use zfs_operator::crd::{Volume, VolumeSpec, STORAGE_RESOURCE};
use zfs_operator::{Error, Result};

// ============================================================================
// Fixtures
// ============================================================================

pub fn new_volume(name: &str, node_name: &str, volume_name: &str, size: &str) -> Volume {
    Volume {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            ..Default::default()
        },
        spec: VolumeSpec {
            node_name: node_name.to_string(),
            volume_name: volume_name.to_string(),
            capacity: BTreeMap::from([(STORAGE_RESOURCE.to_string(), Quantity(size.to_string()))]),
            properties: None,
        },
        status: None,
    }
}

pub fn with_properties(mut volume: Volume, props: &[(&str, &str)]) -> Volume {
    volume.spec.properties = Some(
        props
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect(),
    );
    volume
}

fn api_error(code: u16, reason: &str, message: String) -> Error {
    Error::Kube(kube::Error::Api(ErrorResponse {
        status: "Failure".to_string(),
        message,
        reason: reason.to_string(),
        code,
    }))
}

// ============================================================================
// Volume store
// ============================================================================

/// Behaves like the API server for a status-enabled, cluster-scoped CRD:
/// updates bump the resourceVersion, main-resource updates ignore status,
/// and a record pending deletion disappears once its finalizers are empty.
#[derive(Default)]
pub struct InMemoryVolumeStore {
    volumes: Mutex<BTreeMap<String, Volume>>,
    version: Mutex<u64>,
    fail_status_updates: Mutex<bool>,
}

impl InMemoryVolumeStore {
    fn next_version(&self) -> String {
        let mut version = self.version.lock().unwrap();
        *version += 1;
        version.to_string()
    }

    pub fn create(&self, mut volume: Volume) {
        volume.metadata.resource_version = Some(self.next_version());
        self.volumes
            .lock()
            .unwrap()
            .insert(volume.name_any(), volume);
    }

    /// Emulate `kubectl delete`
    pub fn request_delete(&self, name: &str) {
        let mut volumes = self.volumes.lock().unwrap();
        let Some(volume) = volumes.get_mut(name) else {
            return;
        };
        if volume.finalizers().is_empty() {
            volumes.remove(name);
            return;
        }
        volume.metadata.deletion_timestamp = Some(Time(Utc::now()));
        volume.metadata.resource_version = Some(self.next_version());
    }

    pub fn snapshot(&self, name: &str) -> Option<Volume> {
        self.volumes.lock().unwrap().get(name).cloned()
    }

    pub fn set_fail_status_updates(&self, fail: bool) {
        *self.fail_status_updates.lock().unwrap() = fail;
    }

    fn check_version<'a>(
        volumes: &'a mut BTreeMap<String, Volume>,
        volume: &Volume,
    ) -> Result<&'a mut Volume> {
        let name = volume.name_any();
        let stored = volumes
            .get_mut(&name)
            .ok_or_else(|| api_error(404, "NotFound", format!("volumes \"{}\" not found", name)))?;
        if stored.metadata.resource_version != volume.metadata.resource_version {
            return Err(api_error(
                409,
                "Conflict",
                format!("the object \"{}\" has been modified", name),
            ));
        }
        Ok(stored)
    }
}

#[async_trait]
impl VolumeStore for InMemoryVolumeStore {
    async fn get(&self, name: &str) -> Result<Option<Volume>> {
        Ok(self.snapshot(name))
    }

    async fn update(&self, volume: &Volume) -> Result<Volume> {
        let version = self.next_version();
        let mut volumes = self.volumes.lock().unwrap();
        let stored = Self::check_version(&mut volumes, volume)?;

        let deletion_timestamp = stored.metadata.deletion_timestamp.clone();
        stored.metadata = volume.metadata.clone();
        stored.metadata.deletion_timestamp = deletion_timestamp;
        stored.metadata.resource_version = Some(version);
        stored.spec = volume.spec.clone();

        let updated = stored.clone();
        if updated.metadata.deletion_timestamp.is_some() && updated.finalizers().is_empty() {
            volumes.remove(&updated.name_any());
        }
        Ok(updated)
    }

    async fn update_status(&self, volume: &Volume) -> Result<Volume> {
        if *self.fail_status_updates.lock().unwrap() {
            return Err(api_error(500, "InternalError", "etcd unavailable".to_string()));
        }

        let version = self.next_version();
        let mut volumes = self.volumes.lock().unwrap();
        let stored = Self::check_version(&mut volumes, volume)?;
        stored.status = volume.status.clone();
        stored.metadata.resource_version = Some(version);
        Ok(stored.clone())
    }

    async fn delete_all(&self) -> Result<()> {
        self.volumes.lock().unwrap().clear();
        Ok(())
    }
}

// ============================================================================
// ZFS backend
// ============================================================================

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ZfsCall {
    List(String),
    Create { name: String, size_bytes: u64 },
    SetProperty { name: String, key: String, value: String },
    Destroy(String),
}

/// Keeps zvols in memory. `zfs create -p` semantics: missing parents are
/// created, and creating an existing zvol returns it unchanged.
#[derive(Default)]
pub struct FakeZfs {
    parents: Mutex<BTreeSet<String>>,
    datasets: Mutex<BTreeMap<String, Dataset>>,
    calls: Mutex<Vec<ZfsCall>>,
    fail_set_property: Mutex<bool>,
    fail_destroy: Mutex<bool>,
}

impl FakeZfs {
    pub fn with_parent(parent: &str) -> Self {
        let zfs = Self::default();
        zfs.parents.lock().unwrap().insert(parent.to_string());
        zfs
    }

    pub fn add_dataset(&self, name: &str, size_bytes: u64) {
        let mut dataset = Dataset::new(name);
        dataset
            .properties
            .insert("volsize".to_string(), size_bytes.to_string());
        self.datasets
            .lock()
            .unwrap()
            .insert(name.to_string(), dataset);
    }

    pub fn dataset(&self, name: &str) -> Option<Dataset> {
        self.datasets.lock().unwrap().get(name).cloned()
    }

    pub fn dataset_names(&self) -> Vec<String> {
        self.datasets.lock().unwrap().keys().cloned().collect()
    }

    pub fn calls(&self) -> Vec<ZfsCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn create_calls(&self) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, ZfsCall::Create { .. }))
            .count()
    }

    pub fn set_fail_set_property(&self, fail: bool) {
        *self.fail_set_property.lock().unwrap() = fail;
    }

    pub fn set_fail_destroy(&self, fail: bool) {
        *self.fail_destroy.lock().unwrap() = fail;
    }

    fn record(&self, call: ZfsCall) {
        self.calls.lock().unwrap().push(call);
    }

    fn exists(&self, name: &str) -> bool {
        self.parents.lock().unwrap().contains(name) || self.datasets.lock().unwrap().contains_key(name)
    }
}

#[async_trait]
impl ZfsBackend for FakeZfs {
    async fn list_children(&self, parent: &str) -> Result<Vec<Dataset>> {
        self.record(ZfsCall::List(parent.to_string()));
        if !self.exists(parent) {
            return Err(Error::zfs(
                format!("zfs list {}", parent),
                format!("cannot open '{}': dataset does not exist", parent),
            ));
        }

        Ok(self
            .datasets
            .lock()
            .unwrap()
            .values()
            .filter(|ds| ds.name.rsplit_once('/').map(|(p, _)| p) == Some(parent))
            .cloned()
            .collect())
    }

    async fn create_volume(
        &self,
        name: &str,
        size_bytes: u64,
        properties: &BTreeMap<String, String>,
    ) -> Result<Dataset> {
        self.record(ZfsCall::Create {
            name: name.to_string(),
            size_bytes,
        });
        if let Some(existing) = self.dataset(name) {
            return Ok(existing);
        }

        if let Some((parent, _)) = name.rsplit_once('/') {
            self.parents.lock().unwrap().insert(parent.to_string());
        }
        let mut dataset = Dataset::new(name);
        dataset.properties = properties.clone();
        dataset
            .properties
            .insert("volsize".to_string(), size_bytes.to_string());
        self.datasets
            .lock()
            .unwrap()
            .insert(name.to_string(), dataset.clone());
        Ok(dataset)
    }

    async fn set_property(&self, dataset: &Dataset, key: &str, value: &str) -> Result<()> {
        self.record(ZfsCall::SetProperty {
            name: dataset.name.clone(),
            key: key.to_string(),
            value: value.to_string(),
        });
        if *self.fail_set_property.lock().unwrap() {
            return Err(Error::zfs(
                format!("zfs set {}={} {}", key, value, dataset.name),
                format!("cannot set property for '{}': permission denied", dataset.name),
            ));
        }

        let mut datasets = self.datasets.lock().unwrap();
        let stored = datasets.get_mut(&dataset.name).ok_or_else(|| {
            Error::zfs("zfs set", format!("cannot open '{}'", dataset.name))
        })?;
        stored.properties.insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn destroy(&self, dataset: &Dataset, _flags: DestroyFlags) -> Result<()> {
        self.record(ZfsCall::Destroy(dataset.name.clone()));
        if *self.fail_destroy.lock().unwrap() {
            return Err(Error::zfs(
                format!("zfs destroy {}", dataset.name),
                format!("cannot destroy '{}': dataset is busy", dataset.name),
            ));
        }

        self.datasets
            .lock()
            .unwrap()
            .remove(&dataset.name)
            .map(|_| ())
            .ok_or_else(|| Error::zfs("zfs destroy", format!("cannot open '{}'", dataset.name)))
    }
}

/// Backend whose listing never completes
pub struct HangingZfs;

#[async_trait]
impl ZfsBackend for HangingZfs {
    async fn list_children(&self, _parent: &str) -> Result<Vec<Dataset>> {
        std::future::pending().await
    }

    async fn create_volume(
        &self,
        _name: &str,
        _size_bytes: u64,
        _properties: &BTreeMap<String, String>,
    ) -> Result<Dataset> {
        std::future::pending().await
    }

    async fn set_property(&self, _dataset: &Dataset, _key: &str, _value: &str) -> Result<()> {
        std::future::pending().await
    }

    async fn destroy(&self, _dataset: &Dataset, _flags: DestroyFlags) -> Result<()> {
        std::future::pending().await
    }
}
