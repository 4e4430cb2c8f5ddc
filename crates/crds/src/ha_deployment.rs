//! HADeployment CRD
//!
//! Declares the desired replica count and container image for a named
//! application. The controller derives a managed `Deployment` from it.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[kube(
    group = "sahil.dev",
    version = "v1alpha1",
    kind = "HADeployment",
    plural = "hadeployments",
    shortname = "had",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct HADeploymentSpec {
    /// Desired number of pod replicas
    #[schemars(range(min = 0))]
    pub replicas: i32,

    /// Container image for the managed deployment
    #[schemars(length(min = 1))]
    pub image: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::{CustomResourceExt, Resource};

    #[test]
    fn test_spec_deserializes_from_manifest() {
        let manifest = serde_json::json!({
            "apiVersion": "sahil.dev/v1alpha1",
            "kind": "HADeployment",
            "metadata": { "name": "web", "namespace": "default" },
            "spec": { "replicas": 3, "image": "nginx:1.21" }
        });

        let ha: HADeployment = serde_json::from_value(manifest).unwrap();
        assert_eq!(ha.metadata.name.as_deref(), Some("web"));
        assert_eq!(ha.spec.replicas, 3);
        assert_eq!(ha.spec.image, "nginx:1.21");
    }

    #[test]
    fn test_missing_image_is_rejected() {
        let manifest = serde_json::json!({
            "apiVersion": "sahil.dev/v1alpha1",
            "kind": "HADeployment",
            "metadata": { "name": "web" },
            "spec": { "replicas": 1 }
        });

        assert!(serde_json::from_value::<HADeployment>(manifest).is_err());
    }

    #[test]
    fn test_resource_identity() {
        assert_eq!(HADeployment::group(&()), "sahil.dev");
        assert_eq!(HADeployment::version(&()), "v1alpha1");
        assert_eq!(HADeployment::kind(&()), "HADeployment");
        assert_eq!(HADeployment::plural(&()), "hadeployments");

        let crd = HADeployment::crd();
        assert_eq!(crd.metadata.name.as_deref(), Some("hadeployments.sahil.dev"));
        assert_eq!(crd.spec.scope, "Namespaced");
    }
}
