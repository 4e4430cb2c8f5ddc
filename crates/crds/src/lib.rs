//! deploycontrol CRD Definitions
//!
//! Kubernetes Custom Resource Definitions consumed by the HADeployment controller.

pub mod ha_deployment;

pub use ha_deployment::*;
