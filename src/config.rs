//! Command line and environment configuration

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, ValueEnum};

use crate::error::{Error, Result};

/// Log output format
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Json,
    Text,
}

/// ZFS operator - reconciles Volume resources into zvols on this node
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Node name where this agent is placed
    #[arg(long, env = "NODE_NAME")]
    pub node_name: Option<String>,

    /// Port the metrics and health endpoints bind to
    #[arg(long, env = "METRICS_PORT", default_value_t = 8080)]
    pub metrics_port: u16,

    /// Path to the zfs binary
    #[arg(long, env = "ZFS_BIN", default_value = "zfs")]
    pub zfs_bin: PathBuf,

    /// Deadline for a single reconciliation, in seconds
    #[arg(long, env = "RECONCILE_TIMEOUT_SECS", default_value_t = 120)]
    pub reconcile_timeout_secs: u64,

    /// Delay before a failed reconciliation is retried, in seconds
    #[arg(long, env = "ERROR_REQUEUE_SECS", default_value_t = 30)]
    pub error_requeue_secs: u64,

    /// Maximum number of Volumes reconciled concurrently
    #[arg(long, env = "MAX_CONCURRENT_RECONCILES", default_value_t = 4)]
    pub max_concurrent_reconciles: u16,

    /// Log output format
    #[arg(long, env = "LOG_FORMAT", value_enum, default_value_t = LogFormat::Json)]
    pub log_format: LogFormat,
}

/// Validated operator configuration
#[derive(Clone, Debug)]
pub struct OperatorConfig {
    pub node_name: String,
    pub metrics_port: u16,
    pub zfs_bin: PathBuf,
    pub reconcile_timeout: Duration,
    pub error_requeue: Duration,
    pub max_concurrent_reconciles: u16,
}

impl Args {
    /// Validate the arguments into an [`OperatorConfig`]
    pub fn into_config(self) -> Result<OperatorConfig> {
        let node_name = self
            .node_name
            .map(|n| n.trim().to_string())
            .filter(|n| !n.is_empty())
            .ok_or_else(|| Error::config("Node name must be specified"))?;

        if self.reconcile_timeout_secs == 0 {
            return Err(Error::config("reconcile timeout must be greater than zero"));
        }
        if self.max_concurrent_reconciles == 0 {
            return Err(Error::config(
                "max concurrent reconciles must be greater than zero",
            ));
        }

        Ok(OperatorConfig {
            node_name,
            metrics_port: self.metrics_port,
            zfs_bin: self.zfs_bin,
            reconcile_timeout: Duration::from_secs(self.reconcile_timeout_secs),
            error_requeue: Duration::from_secs(self.error_requeue_secs),
            max_concurrent_reconciles: self.max_concurrent_reconciles,
        })
    }
}
