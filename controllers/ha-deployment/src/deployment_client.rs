//! Target resource API.
//!
//! Abstracts Deployment creation so the reconciler can be tested against an
//! in-memory implementation. The concrete client talks to the apps/v1 API.

use k8s_openapi::api::apps::v1::Deployment;
use kube::api::PostParams;
use kube::{Api, Client};
use thiserror::Error;

/// Errors creating a Deployment.
#[derive(Debug, Error)]
pub enum DeploymentClientError {
    /// Kubernetes API error
    #[error("Kubernetes error: {0}")]
    Kube(#[from] kube::Error),

    /// A Deployment with the same name already exists (HTTP 409)
    #[error("deployment {namespace}/{name} already exists")]
    AlreadyExists {
        /// Namespace of the existing Deployment
        namespace: String,
        /// Name of the existing Deployment
        name: String,
    },
}

/// Creates Deployments in the target cluster.
///
/// All async methods must be `Send` to work with Tokio's work-stealing runtime.
#[async_trait::async_trait]
pub trait DeploymentClient: Send + Sync {
    /// Create `deployment` in `namespace`. Not idempotent: creating the same
    /// name twice fails.
    async fn create_deployment(
        &self,
        namespace: &str,
        deployment: &Deployment,
    ) -> Result<Deployment, DeploymentClientError>;
}

/// Deployment client backed by the Kubernetes API.
#[derive(Clone)]
pub struct KubeDeploymentClient {
    client: Client,
}

impl std::fmt::Debug for KubeDeploymentClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeDeploymentClient").finish_non_exhaustive()
    }
}

impl KubeDeploymentClient {
    /// Creates a new client.
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait::async_trait]
impl DeploymentClient for KubeDeploymentClient {
    async fn create_deployment(
        &self,
        namespace: &str,
        deployment: &Deployment,
    ) -> Result<Deployment, DeploymentClientError> {
        let api: Api<Deployment> = Api::namespaced(self.client.clone(), namespace);
        api.create(&PostParams::default(), deployment)
            .await
            .map_err(|e| create_error(namespace, deployment, e))
    }
}

/// Classify a failed create; a name conflict becomes `AlreadyExists`.
fn create_error(namespace: &str, deployment: &Deployment, error: kube::Error) -> DeploymentClientError {
    match error {
        kube::Error::Api(ref response) if response.code == 409 => DeploymentClientError::AlreadyExists {
            namespace: namespace.to_string(),
            name: deployment.metadata.name.clone().unwrap_or_default(),
        },
        other => DeploymentClientError::Kube(other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
    use kube::core::ErrorResponse;

    fn api_error(code: u16, reason: &str) -> kube::Error {
        kube::Error::Api(ErrorResponse {
            status: "Failure".to_string(),
            message: format!("request failed: {reason}"),
            reason: reason.to_string(),
            code,
        })
    }

    fn deployment() -> Deployment {
        Deployment {
            metadata: ObjectMeta {
                name: Some("web-deployment".to_string()),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[test]
    fn test_conflict_is_already_exists() {
        let err = create_error("default", &deployment(), api_error(409, "AlreadyExists"));

        assert!(matches!(
            err,
            DeploymentClientError::AlreadyExists { ref namespace, ref name }
                if namespace == "default" && name == "web-deployment"
        ));
        assert_eq!(err.to_string(), "deployment default/web-deployment already exists");
    }

    #[test]
    fn test_other_api_errors_are_kept() {
        let err = create_error("default", &deployment(), api_error(403, "Forbidden"));

        assert!(matches!(err, DeploymentClientError::Kube(kube::Error::Api(ref r)) if r.code == 403));
    }
}
