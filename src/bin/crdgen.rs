//! CRD YAML Generator
//!
//! This binary generates the Kubernetes CRD manifest for the Volume
//! resource reconciled by the zfs-operator.
//!
//! Usage: cargo run --bin crdgen > config/crd/volumes.yaml

use zfs_operator::crd::generate_crds;

fn main() -> anyhow::Result<()> {
    for crd in generate_crds()? {
        println!("---");
        print!("{}", crd);
    }
    Ok(())
}
