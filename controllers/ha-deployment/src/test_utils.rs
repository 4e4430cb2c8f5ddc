//! Test utilities for unit testing the controller
//!
//! This module provides helpers for creating test data and in-memory
//! implementations of the Deployment client and Event recorder.

use crate::deployment_client::{DeploymentClient, DeploymentClientError};
use crate::recorder::EventRecorder;
use crds::{HADeployment, HADeploymentSpec};
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::ObjectReference;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube_runtime::events::EventType;
use kube_runtime::reflector::Store;
use kube_runtime::reflector::store::Writer;
use kube_runtime::watcher;
use std::collections::HashSet;
use std::sync::Mutex;
use std::time::Duration;

/// Helper to create test HADeployment CRD
pub fn create_test_ha_deployment(name: &str, namespace: &str, replicas: i32, image: &str) -> HADeployment {
    HADeployment {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            ..Default::default()
        },
        spec: HADeploymentSpec {
            replicas,
            image: image.to_string(),
        },
    }
}

/// Helper to create a synced reflector store holding `objects`
pub fn cached_store(objects: Vec<HADeployment>) -> Store<HADeployment> {
    let mut writer = Writer::default();
    writer.apply_watcher_event(&watcher::Event::Init);
    for obj in objects {
        writer.apply_watcher_event(&watcher::Event::InitApply(obj));
    }
    writer.apply_watcher_event(&watcher::Event::InitDone);
    writer.as_reader()
}

/// In-memory Deployment client
///
/// Rejects a second create for the same namespace/name, like the API server.
#[derive(Default)]
pub struct MockDeploymentClient {
    existing: Mutex<HashSet<(String, String)>>,
    created: Mutex<Vec<(String, Deployment)>>,
    fail_all: Mutex<bool>,
    panic_all: Mutex<bool>,
    create_delay: Mutex<Duration>,
}

impl MockDeploymentClient {
    /// Create a new mock client
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent create fail
    pub fn fail_creates(&self) {
        *self.fail_all.lock().unwrap() = true;
    }

    /// Make every subsequent create panic
    pub fn panic_on_create(&self) {
        *self.panic_all.lock().unwrap() = true;
    }

    /// Make every create take `delay` before it completes
    pub fn delay_creates(&self, delay: Duration) {
        *self.create_delay.lock().unwrap() = delay;
    }

    /// Every successful create call, in order
    pub fn created(&self) -> Vec<(String, Deployment)> {
        self.created.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl DeploymentClient for MockDeploymentClient {
    async fn create_deployment(
        &self,
        namespace: &str,
        deployment: &Deployment,
    ) -> Result<Deployment, DeploymentClientError> {
        let name = deployment.metadata.name.clone().unwrap_or_default();
        let already_exists = DeploymentClientError::AlreadyExists {
            namespace: namespace.to_string(),
            name: name.clone(),
        };

        let delay = *self.create_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if *self.panic_all.lock().unwrap() {
            panic!("create_deployment panicked for {namespace}/{name}");
        }
        if *self.fail_all.lock().unwrap() {
            return Err(already_exists);
        }
        if !self.existing.lock().unwrap().insert((namespace.to_string(), name)) {
            return Err(already_exists);
        }

        self.created
            .lock()
            .unwrap()
            .push((namespace.to_string(), deployment.clone()));
        Ok(deployment.clone())
    }
}

/// An event captured by [`MockEventRecorder`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedEvent {
    /// `namespace/name` of the object the event was attached to
    pub object: String,
    pub type_: EventType,
    pub reason: String,
    pub message: String,
}

/// Event recorder that keeps every event in memory
#[derive(Default)]
pub struct MockEventRecorder {
    events: Mutex<Vec<RecordedEvent>>,
}

impl MockEventRecorder {
    /// Create a new mock recorder
    pub fn new() -> Self {
        Self::default()
    }

    /// Every recorded event, in order
    pub fn events(&self) -> Vec<RecordedEvent> {
        self.events.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl EventRecorder for MockEventRecorder {
    async fn event(&self, reference: &ObjectReference, type_: EventType, reason: &str, message: &str) {
        let object = format!(
            "{}/{}",
            reference.namespace.as_deref().unwrap_or_default(),
            reference.name.as_deref().unwrap_or_default()
        );
        self.events.lock().unwrap().push(RecordedEvent {
            object,
            type_,
            reason: reason.to_string(),
            message: message.to_string(),
        });
    }
}
