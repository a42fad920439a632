//! Prometheus metrics for the ZFS operator
//!
//! This module exposes metrics for monitoring reconciliation and zfs activity.

mod prometheus;

pub use self::prometheus::*;
