//! Controller-specific error types.
//!
//! This module defines error types specific to the HADeployment Controller
//! that are not covered by upstream library errors.

use crate::deployment_client::DeploymentClientError;
use crate::key::KeyError;
use crate::lister::ListerError;
use thiserror::Error;

/// Errors that can occur in the HADeployment Controller.
#[derive(Debug, Error)]
pub enum ControllerError {
    /// Kubernetes API error
    #[error("Kubernetes error: {0}")]
    Kube(#[from] kube::Error),

    /// Neither the kubeconfig nor the in-cluster environment produced a usable configuration
    #[error("Connection setup failed: {0}")]
    Connection(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Object key could not be built or decoded
    #[error("Invalid object key: {0}")]
    Key(#[from] KeyError),

    /// Object missing from the local cache
    #[error(transparent)]
    Lister(#[from] ListerError),

    /// HADeployment is missing metadata needed to derive its Deployment
    #[error("Invalid HADeployment: {0}")]
    InvalidResource(String),

    /// Deployment create call failed (including "already exists")
    #[error("Creating deployment {namespace}/{name} failed: {source}")]
    CreateDeployment {
        /// Namespace of the derived Deployment
        namespace: String,
        /// Name of the derived Deployment
        name: String,
        /// Underlying client error
        #[source]
        source: DeploymentClientError,
    },

    /// Resource watch failed
    #[error("Resource watch failed: {0}")]
    Watch(String),

    /// The worker task stopped abnormally
    #[error("Worker failed: {0}")]
    Worker(String),
}
