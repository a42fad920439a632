//! ZFS Kubernetes Operator
//!
//! Main entry point for the node agent. Parses configuration, sets up the
//! Kubernetes client and zfs backend, and runs the Volume controller.

use std::sync::Arc;

use clap::Parser;
use kube::Client;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use zfs_operator::{
    adapters::{KubeVolumeStore, ZfsCli},
    config::{Args, LogFormat},
    controllers::{self, Context},
    metrics,
    reconcilers::volume::VolumeReconciler,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize tracing
    init_tracing(args.log_format);

    let config = match args.into_config() {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "Invalid configuration");
            return Err(e.into());
        }
    };

    info!(node_name = %config.node_name, "Starting ZFS Operator");

    // Create Kubernetes client
    let client = Client::try_default().await?;
    info!("Connected to Kubernetes API server");

    let reconciler = VolumeReconciler::new(
        Arc::new(KubeVolumeStore::new(client.clone())),
        Arc::new(ZfsCli::new(&config.zfs_bin)),
        config.node_name.clone(),
    );
    let shutdown = CancellationToken::new();
    let metrics_port = config.metrics_port;
    let context = Arc::new(Context::new(reconciler, config, shutdown.clone()));

    // Start metrics server
    let metrics_handle = tokio::spawn(metrics::serve(metrics_port));
    info!("Metrics server starting on port {}", metrics_port);

    // Abort in-flight reconciliations on shutdown; the controller drains itself
    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        info!("Received shutdown signal, stopping operator");
        signal_token.cancel();
    });

    let volume_controller = controllers::run_volume_controller(client, context);

    tokio::select! {
        _ = volume_controller => {
            if !shutdown.is_cancelled() {
                error!("Volume controller exited unexpectedly");
            }
        }
        _ = metrics_handle => {
            error!("Metrics server exited unexpectedly");
        }
    }

    info!("ZFS Operator stopped");
    Ok(())
}

/// Initialize tracing subscriber
fn init_tracing(format: LogFormat) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,kube=warn,hyper=warn"));

    let registry = tracing_subscriber::registry().with(env_filter);
    match format {
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).init(),
        LogFormat::Text => registry.with(tracing_subscriber::fmt::layer()).init(),
    }
}

/// Wait for shutdown signal (SIGTERM or SIGINT)
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install CTRL+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received CTRL+C signal");
        }
        _ = terminate => {
            info!("Received SIGTERM signal");
        }
    }
}
