//! Adapters for the collaborators the reconciler drives: the Volume record
//! store and the ZFS backend

mod store;
mod zfs;

pub use store::*;
pub use zfs::*;
