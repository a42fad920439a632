//! Custom Resource Definitions for the ZFS operator

mod quantity;
mod volume;

pub use quantity::parse_quantity;
pub use volume::*;

use kube::CustomResourceExt;

/// Generate all CRD YAML manifests
pub fn generate_crds() -> Result<Vec<String>, serde_yaml::Error> {
    Ok(vec![serde_yaml::to_string(&Volume::crd())?])
}
