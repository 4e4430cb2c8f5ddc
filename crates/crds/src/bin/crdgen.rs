//! Prints the HADeployment CustomResourceDefinition as YAML.
//!
//! Usage: `cargo run -p crds --bin crdgen > hadeployment-crd.yaml`

use crds::HADeployment;
use kube::CustomResourceExt;

fn main() -> anyhow::Result<()> {
    print!("{}", serde_yaml::to_string(&HADeployment::crd())?);
    Ok(())
}
