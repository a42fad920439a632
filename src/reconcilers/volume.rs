//! Volume reconciler
//!
//! Drives a single Volume record towards its desired state:
//! - Ownership filtering by node name
//! - Cleanup finalizer lifecycle
//! - Locating, creating, updating and destroying the backing zvol
//! - Ready condition reporting

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use kube::runtime::controller::Action;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::adapters::{Dataset, DestroyFlags, VolumeStore, ZfsBackend};
use crate::crd::{
    is_valid_volume_name, ConditionStatus, Volume, VOLUME_CLEANUP_FINALIZER,
    VOLUME_CONDITION_READY, VOLUME_NAME_PATTERN,
};
use crate::error::{Error, Result};
use crate::metrics;

/// A zfs property could not be applied to an existing zvol
pub const REASON_FAILED_UPDATE_PROPERTY: &str = "FailedUpdateProperty";

/// The zvol could not be created
pub const REASON_FAILED_GET_DATASET: &str = "FailedGetDataset";

/// The Volume spec cannot be acted upon
pub const REASON_INVALID_SPEC: &str = "InvalidSpec";

/// Reconciles Volume records owned by one node
pub struct VolumeReconciler {
    store: Arc<dyn VolumeStore>,
    zfs: Arc<dyn ZfsBackend>,
    node_name: String,
}

impl VolumeReconciler {
    pub fn new(
        store: Arc<dyn VolumeStore>,
        zfs: Arc<dyn ZfsBackend>,
        node_name: impl Into<String>,
    ) -> Self {
        Self {
            store,
            zfs,
            node_name: node_name.into(),
        }
    }

    /// Reconcile under a deadline, aborting early on shutdown.
    ///
    /// Dropping the in-flight reconciliation kills any running `zfs` child.
    pub async fn reconcile_bounded(
        &self,
        name: &str,
        timeout: Duration,
        shutdown: &CancellationToken,
    ) -> Result<Action> {
        tokio::select! {
            biased;
            _ = shutdown.cancelled() => Err(Error::cancelled("operator is shutting down")),
            result = tokio::time::timeout(timeout, self.reconcile(name)) => match result {
                Ok(result) => result,
                Err(_) => Err(Error::cancelled(format!(
                    "reconciliation exceeded {}s deadline",
                    timeout.as_secs_f64()
                ))),
            },
        }
    }

    /// Reconcile the Volume called `name`
    pub async fn reconcile(&self, name: &str) -> Result<Action> {
        let Some(mut volume) = self.store.get(name).await? else {
            info!(name = %name, "Volume not found, skipping");
            return Ok(Action::await_change());
        };

        if volume.spec.node_name != self.node_name {
            debug!(
                name = %name,
                volume_node_name = %volume.spec.node_name,
                node_name = %self.node_name,
                "Volume belongs to another node, skipping"
            );
            return Ok(Action::await_change());
        }

        if volume.is_being_deleted() {
            delete_volume(self.zfs.as_ref(), &volume).await?;
            if volume.remove_finalizer(VOLUME_CLEANUP_FINALIZER) {
                if let Err(e) = self.store.update(&volume).await {
                    error!(name = %name, error = %e, "Failed to remove cleanup finalizer");
                    return Err(e);
                }
            }
            return Ok(Action::await_change());
        }

        if volume.add_finalizer(VOLUME_CLEANUP_FINALIZER) {
            volume = self.store.update(&volume).await.inspect_err(|e| {
                error!(name = %name, error = %e, "Failed to add cleanup finalizer");
            })?;
        }

        let result = self.apply(&mut volume, Utc::now()).await;
        let status = self.store.update_status(&volume).await;

        match (result, status) {
            (Ok(()), Ok(_)) => Ok(Action::await_change()),
            (Ok(()), Err(e)) => {
                error!(name = %name, error = %e, "Failed to update Volume status");
                Err(e)
            }
            (Err(e), Ok(_)) => Err(e),
            (Err(e), Err(status_err)) => {
                warn!(name = %name, error = %status_err, "Failed to record failure in Volume status");
                Err(e)
            }
        }
    }

    async fn apply(&self, volume: &mut Volume, now: DateTime<Utc>) -> Result<()> {
        if let Err(e) = validate(volume) {
            warn!(error = %e, "Volume spec is invalid");
            volume.set_condition_reason(
                VOLUME_CONDITION_READY,
                ConditionStatus::False,
                REASON_INVALID_SPEC,
                e.to_string(),
                now,
            );
            return Err(e);
        }

        let found = find_dataset(self.zfs.as_ref(), &volume.spec.volume_name).await?;
        sync_volume(self.zfs.as_ref(), volume, found.as_ref(), now).await
    }
}

/// Validate the parts of the spec every branch depends on.
///
/// Capacity is only read when a zvol is created, so it is checked there.
pub fn validate(volume: &Volume) -> Result<()> {
    if !is_valid_volume_name(&volume.spec.volume_name) {
        return Err(Error::validation(format!(
            "volumeName '{}' must match {}",
            volume.spec.volume_name, VOLUME_NAME_PATTERN
        )));
    }
    if volume.spec.node_name.is_empty() {
        return Err(Error::validation("nodeName must be specified"));
    }
    Ok(())
}

/// Parent dataset of a volume name: everything before the last `/`
pub fn parent_of(volume_name: &str) -> Result<&str> {
    match volume_name.rsplit_once('/') {
        Some((parent, leaf)) if !parent.is_empty() && !leaf.is_empty() => Ok(parent),
        _ => Err(Error::validation(format!(
            "volumeName '{}' has no parent dataset",
            volume_name
        ))),
    }
}

/// Find the zvol called `volume_name` among the children of its parent.
///
/// The parent must already exist; listing it is a hard error otherwise.
/// A missing leaf is `Ok(None)`.
pub async fn find_dataset(zfs: &dyn ZfsBackend, volume_name: &str) -> Result<Option<Dataset>> {
    let parent = parent_of(volume_name)?;
    let datasets = zfs.list_children(parent).await.inspect_err(|e| {
        error!(parent = %parent, error = %e, "Failed to get zfs dataset info");
    })?;

    let found = datasets.into_iter().find(|ds| ds.name == volume_name);
    match &found {
        Some(_) => debug!(volume_name = %volume_name, "Dataset found"),
        None => debug!(volume_name = %volume_name, "Dataset not found"),
    }
    Ok(found)
}

/// Bring the zvol in line with the spec and record the Ready condition.
///
/// An existing zvol with desired properties only has its properties set;
/// everything else goes through creation, which the backend treats as
/// idempotent for an existing zvol.
pub async fn sync_volume(
    zfs: &dyn ZfsBackend,
    volume: &mut Volume,
    found: Option<&Dataset>,
    now: DateTime<Utc>,
) -> Result<()> {
    let properties = volume.spec.properties.clone().unwrap_or_default();

    match found {
        Some(dataset) if !properties.is_empty() => {
            for (key, value) in &properties {
                if let Err(e) = zfs.set_property(dataset, key, value).await {
                    let msg = format!("Failed to update property[{}] to {}", key, value);
                    error!(error = %e, "{}", msg);
                    volume.set_condition_reason(
                        VOLUME_CONDITION_READY,
                        ConditionStatus::False,
                        REASON_FAILED_UPDATE_PROPERTY,
                        msg,
                        now,
                    );
                    return Err(e);
                }
            }
        }
        _ => {
            let size_bytes = match volume.capacity_bytes() {
                Ok(size_bytes) => size_bytes,
                Err(e) => {
                    warn!(error = %e, "Volume capacity is invalid");
                    volume.set_condition_reason(
                        VOLUME_CONDITION_READY,
                        ConditionStatus::False,
                        REASON_INVALID_SPEC,
                        e.to_string(),
                        now,
                    );
                    return Err(e);
                }
            };
            if let Err(e) = zfs
                .create_volume(&volume.spec.volume_name, size_bytes, &properties)
                .await
            {
                let msg = "Failed to create zfs volume";
                error!(error = %e, "{}", msg);
                volume.set_condition_reason(
                    VOLUME_CONDITION_READY,
                    ConditionStatus::False,
                    REASON_FAILED_GET_DATASET,
                    msg,
                    now,
                );
                return Err(e);
            }
        }
    }

    volume.set_condition(VOLUME_CONDITION_READY, ConditionStatus::True, now);
    Ok(())
}

/// Destroy the zvol backing `volume`; a missing zvol counts as success
pub async fn delete_volume(zfs: &dyn ZfsBackend, volume: &Volume) -> Result<()> {
    let Some(found) = find_dataset(zfs, &volume.spec.volume_name).await? else {
        return Ok(());
    };

    info!(volume_name = %found.name, "Destroying zvol");
    zfs.destroy(&found, DestroyFlags::default())
        .await
        .inspect_err(|e| error!(error = %e, "Failed to destroy dataset"))?;

    metrics::CLEANUPS.with_label_values(&["Volume"]).inc();
    Ok(())
}
