//! ZFS Kubernetes Operator
//!
//! Node agent that reconciles `Volume` custom resources into ZFS zvols.
//! Each agent only acts on Volumes whose `spec.nodeName` matches its own
//! node name.

pub mod adapters;
pub mod config;
pub mod controllers;
pub mod crd;
pub mod error;
pub mod metrics;
pub mod reconcilers;

pub use error::{Error, Result};
