//! Reconcilers for the ZFS operator CRDs
//!
//! This module contains the business logic for reconciling each CRD type.
//! Reconcilers are responsible for:
//! - Filtering records owned by this node
//! - Creating, updating and destroying zvols
//! - Updating resource status

pub mod volume;
