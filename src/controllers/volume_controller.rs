//! Volume controller
//!
//! Watches Volume resources and triggers reconciliation. The controller
//! runtime serializes reconciliations per Volume and runs different Volumes
//! concurrently, up to the configured limit.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use kube::{
    api::ListParams,
    runtime::{
        controller::{Action, Config as ControllerConfig, Controller},
        watcher::Config as WatcherConfig,
    },
    Api, Client, ResourceExt,
};
use tracing::{error, info, instrument};

use crate::controllers::Context;
use crate::crd::Volume;
use crate::error::{Error, Result};
use crate::metrics;

/// Run the Volume controller
pub async fn run(client: Client, context: Arc<Context>) {
    let api: Api<Volume> = Api::all(client);

    // Verify CRD is installed
    if let Err(e) = api.list(&ListParams::default().limit(1)).await {
        error!("Volume CRD not installed: {}", e);
        return;
    }

    info!(node_name = %context.config.node_name, "Starting Volume controller");

    let config = ControllerConfig::default().concurrency(context.config.max_concurrent_reconciles);

    Controller::new(api, WatcherConfig::default())
        .with_config(config)
        .shutdown_on_signal()
        .run(reconcile, error_policy, context)
        .for_each(|result| async move {
            match result {
                Ok((obj, _action)) => {
                    info!(name = %obj.name, "Reconciled Volume");
                }
                Err(e) => {
                    error!(error = %e, "Reconciliation error");
                    metrics::RECONCILIATION_ERRORS
                        .with_label_values(&["Volume"])
                        .inc();
                }
            }
        })
        .await;

    info!("Volume controller stopped");
}

/// Main reconciliation function
#[instrument(skip(obj, ctx), fields(name = %obj.name_any(), volume_name = %obj.spec.volume_name))]
async fn reconcile(obj: Arc<Volume>, ctx: Arc<Context>) -> Result<Action> {
    let _timer = metrics::RECONCILE_DURATION
        .with_label_values(&["Volume"])
        .start_timer();
    metrics::RECONCILIATIONS.with_label_values(&["Volume"]).inc();

    // Re-read the record so every attempt acts on the latest state
    ctx.reconciler
        .reconcile_bounded(&obj.name_any(), ctx.config.reconcile_timeout, &ctx.shutdown)
        .await
}

/// Error policy for the controller
fn error_policy(obj: Arc<Volume>, error: &Error, ctx: Arc<Context>) -> Action {
    error!(
        name = %obj.name_any(),
        error = %error,
        "Reconciliation failed, scheduling retry"
    );

    Action::requeue(requeue_delay(error, ctx.config.error_requeue))
}

/// Records that cannot succeed until edited are retried less eagerly
fn requeue_delay(error: &Error, base: Duration) -> Duration {
    if error.is_permanent() {
        base * 10
    } else {
        base
    }
}
