//! Kubernetes controllers for the ZFS operator CRDs
//!
//! This module contains the controller implementations that watch for CRD changes
//! and trigger reconciliation.

mod volume_controller;

pub use volume_controller::run as run_volume_controller;

use tokio_util::sync::CancellationToken;

use crate::config::OperatorConfig;
use crate::reconcilers::volume::VolumeReconciler;

/// Shared context for all controllers, built once at start-up
pub struct Context {
    /// Reconciler bound to this node's store and zfs backend
    pub reconciler: VolumeReconciler,
    /// Operator configuration
    pub config: OperatorConfig,
    /// Cancelled when the operator shuts down
    pub shutdown: CancellationToken,
}

impl Context {
    /// Create a new context
    pub fn new(
        reconciler: VolumeReconciler,
        config: OperatorConfig,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            reconciler,
            config,
            shutdown,
        }
    }
}
