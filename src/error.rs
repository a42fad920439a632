//! Error types for the ZFS operator

use thiserror::Error;

/// Result type alias using the operator's Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Operator error types
#[derive(Error, Debug)]
pub enum Error {
    /// Kubernetes API error
    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    /// A `zfs` invocation exited unsuccessfully
    #[error("zfs command `{command}` failed: {stderr}")]
    Zfs { command: String, stderr: String },

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Validation error
    #[error("Validation error: {0}")]
    Validation(String),

    /// Quantity could not be converted to a byte count
    #[error("Invalid quantity: {0}")]
    Quantity(String),

    /// Reconciliation aborted by deadline or shutdown
    #[error("Reconciliation cancelled: {0}")]
    Cancelled(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Error::Config(msg.into())
    }

    /// Create a validation error
    pub fn validation(msg: impl Into<String>) -> Self {
        Error::Validation(msg.into())
    }

    /// Create a quantity error
    pub fn quantity(msg: impl Into<String>) -> Self {
        Error::Quantity(msg.into())
    }

    /// Create a cancellation error
    pub fn cancelled(msg: impl Into<String>) -> Self {
        Error::Cancelled(msg.into())
    }

    /// Create a zfs command error
    pub fn zfs(command: impl Into<String>, stderr: impl Into<String>) -> Self {
        Error::Zfs {
            command: command.into(),
            stderr: stderr.into(),
        }
    }

    /// Whether the error is caused by the record itself rather than the environment
    pub fn is_permanent(&self) -> bool {
        matches!(self, Error::Validation(_) | Error::Quantity(_))
    }
}
