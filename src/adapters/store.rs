//! Volume record store adapter
//!
//! [`VolumeStore`] is the slice of the Kubernetes API the reconciler needs;
//! [`KubeVolumeStore`] implements it on top of `Api<Volume>`.

use async_trait::async_trait;
use kube::{
    api::{DeleteParams, ListParams, PostParams},
    Api, Client, ResourceExt,
};

use crate::crd::Volume;
use crate::error::Result;

#[cfg(test)]
use mockall::automock;

/// Typed access to Volume records
#[cfg_attr(test, automock)]
#[async_trait]
pub trait VolumeStore: Send + Sync {
    /// Fetch a Volume by name; `None` if it does not exist
    async fn get(&self, name: &str) -> Result<Option<Volume>>;

    /// Replace metadata and spec, subject to the record's resourceVersion
    async fn update(&self, volume: &Volume) -> Result<Volume>;

    /// Replace the status subresource
    async fn update_status(&self, volume: &Volume) -> Result<Volume>;

    /// Delete every Volume record
    async fn delete_all(&self) -> Result<()>;
}

/// [`VolumeStore`] backed by the Kubernetes API server
#[derive(Clone)]
pub struct KubeVolumeStore {
    api: Api<Volume>,
}

impl KubeVolumeStore {
    /// Volumes are cluster scoped
    pub fn new(client: Client) -> Self {
        Self {
            api: Api::all(client),
        }
    }
}

#[async_trait]
impl VolumeStore for KubeVolumeStore {
    async fn get(&self, name: &str) -> Result<Option<Volume>> {
        Ok(self.api.get_opt(name).await?)
    }

    async fn update(&self, volume: &Volume) -> Result<Volume> {
        Ok(self
            .api
            .replace(&volume.name_any(), &PostParams::default(), volume)
            .await?)
    }

    async fn update_status(&self, volume: &Volume) -> Result<Volume> {
        let data = serde_json::to_vec(volume)?;
        Ok(self
            .api
            .replace_status(&volume.name_any(), &PostParams::default(), data)
            .await?)
    }

    async fn delete_all(&self) -> Result<()> {
        self.api
            .delete_collection(&DeleteParams::default(), &ListParams::default())
            .await?;
        Ok(())
    }
}
