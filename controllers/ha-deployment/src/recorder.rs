//! Kubernetes Event recording.
//!
//! Events are fire-and-forget annotations on the HADeployment, visible via
//! `kubectl describe` and `kubectl get events`. A failed publish is logged
//! and never reaches the caller.

use k8s_openapi::api::core::v1::ObjectReference;
use kube::Client;
use kube_runtime::events::{Event, EventType, Recorder, Reporter};
use tracing::{info, warn};

/// Event source component reported on every Event
pub const EVENT_SOURCE: &str = "HADeployment";

/// Well-known event reason strings.
pub mod reasons {
    /// The managed Deployment was created
    pub const CREATE: &str = "CREATE";
}

/// Publishes Events attached to an object.
#[async_trait::async_trait]
pub trait EventRecorder: Send + Sync {
    /// Record an event on the referenced object. Never fails.
    async fn event(&self, reference: &ObjectReference, type_: EventType, reason: &str, message: &str);
}

/// Recorder backed by `kube_runtime::events::Recorder`.
pub struct KubeEventRecorder {
    recorder: Recorder,
}

impl std::fmt::Debug for KubeEventRecorder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeEventRecorder").finish_non_exhaustive()
    }
}

impl KubeEventRecorder {
    /// Create a recorder reporting as `controller`.
    pub fn new(client: Client, controller: &str) -> Self {
        let reporter = Reporter {
            controller: controller.to_string(),
            instance: None,
        };
        Self {
            recorder: Recorder::new(client, reporter),
        }
    }
}

#[async_trait::async_trait]
impl EventRecorder for KubeEventRecorder {
    async fn event(&self, reference: &ObjectReference, type_: EventType, reason: &str, message: &str) {
        let event = build_event(type_, reason, message);

        info!(
            object = reference.name.as_deref().unwrap_or("<unknown>"),
            namespace = reference.namespace.as_deref().unwrap_or_default(),
            type_ = ?type_,
            reason,
            "Event: {}",
            message
        );

        if let Err(e) = self.recorder.publish(&event, reference).await {
            warn!(
                reason,
                object = reference.name.as_deref().unwrap_or("<unknown>"),
                error = %e,
                "Failed to publish Kubernetes event"
            );
        }
    }
}

/// The Event published for `reason`; the action mirrors the reason.
fn build_event(type_: EventType, reason: &str, message: &str) -> Event {
    Event {
        type_,
        reason: reason.to_string(),
        note: Some(message.to_string()),
        action: reason.to_string(),
        secondary: None,
    }
}
