//! Reconciliation logic for HADeployment CRDs.
//!
//! Maps one HADeployment to its managed Deployment and creates it. The
//! Deployment is derived once from the spec at reconciliation time; later
//! changes to the HADeployment are not propagated.

use crate::deployment_client::DeploymentClient;
use crate::error::ControllerError;
use crate::recorder::{EventRecorder, reasons};
use crds::HADeployment;
use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::core::v1::{Container, PodSpec, PodTemplateSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use kube::Resource;
use kube_runtime::events::EventType;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info};

/// Suffix appended to the HADeployment name to name its Deployment
pub const DEPLOYMENT_SUFFIX: &str = "-deployment";

/// Suffix appended to the HADeployment name to name the pod container
pub const CONTAINER_SUFFIX: &str = "-container";

/// Name of the Deployment managed for the HADeployment `name`.
pub fn deployment_name(name: &str) -> String {
    format!("{name}{DEPLOYMENT_SUFFIX}")
}

/// Labels shared by the Deployment selector and its pod template.
pub fn deployment_labels(name: &str) -> BTreeMap<String, String> {
    BTreeMap::from([
        ("app".to_string(), "nginx".to_string()),
        ("controller".to_string(), name.to_string()),
    ])
}

/// Build the Deployment for an HADeployment.
///
/// Replicas and image are copied verbatim from the spec.
pub fn build_deployment(ha: &HADeployment) -> Result<Deployment, ControllerError> {
    let name = ha
        .metadata
        .name
        .as_deref()
        .ok_or_else(|| ControllerError::InvalidResource("HADeployment missing name".to_string()))?;
    let labels = deployment_labels(name);

    Ok(Deployment {
        metadata: ObjectMeta {
            name: Some(deployment_name(name)),
            namespace: ha.metadata.namespace.clone(),
            ..Default::default()
        },
        spec: Some(DeploymentSpec {
            replicas: Some(ha.spec.replicas),
            selector: LabelSelector {
                match_labels: Some(labels.clone()),
                ..Default::default()
            },
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(labels),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    containers: vec![Container {
                        name: format!("{name}{CONTAINER_SUFFIX}"),
                        image: Some(ha.spec.image.clone()),
                        ..Default::default()
                    }],
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        ..Default::default()
    })
}

/// Reconciles HADeployment resources.
#[derive(Clone)]
pub struct Reconciler {
    deployments: Arc<dyn DeploymentClient>,
    recorder: Arc<dyn EventRecorder>,
}

impl std::fmt::Debug for Reconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reconciler").finish_non_exhaustive()
    }
}

impl Reconciler {
    /// Creates a new reconciler instance.
    pub fn new(deployments: Arc<dyn DeploymentClient>, recorder: Arc<dyn EventRecorder>) -> Self {
        Self { deployments, recorder }
    }

    /// Reconciles an HADeployment resource.
    ///
    /// This method:
    /// 1. Builds the managed Deployment from the spec
    /// 2. Creates it (no existence check; an existing Deployment is an error)
    /// 3. Records a Normal `CREATE` event on the HADeployment
    ///
    /// Returns `true` when the Deployment was created.
    pub async fn reconcile(&self, ha: &HADeployment) -> Result<bool, ControllerError> {
        let deployment = build_deployment(ha)?;
        let namespace = ha.metadata.namespace.clone().unwrap_or_default();
        let name = deployment.metadata.name.clone().unwrap_or_default();

        debug!(namespace = %namespace, name = %name, spec = ?ha.spec, "Creating deployment");

        self.deployments
            .create_deployment(&namespace, &deployment)
            .await
            .map_err(|source| ControllerError::CreateDeployment {
                namespace: namespace.clone(),
                name: name.clone(),
                source,
            })?;

        info!("Created deployment {}/{}", namespace, name);

        self.recorder
            .event(
                &ha.object_ref(&()),
                EventType::Normal,
                reasons::CREATE,
                "Deployment was created",
            )
            .await;

        Ok(true)
    }
}
