//! Events on the Installation being reconciled
//!
//! Pass outcomes show up in `kubectl describe installation`. Publishing is
//! fire-and-forget: a failed event is logged and never fails a pass.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::ObjectReference;
use kube::runtime::events::{EventType, Recorder, Reporter};
use kube::Client;
use tracing::warn;

/// Publishes Kubernetes Events
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Record an event about `resource_ref`
    ///
    /// `reason` is one of [`reasons`] and `action` one of [`actions`];
    /// `note` carries the human-readable detail.
    async fn publish(
        &self,
        resource_ref: &ObjectReference,
        type_: EventType,
        reason: &str,
        action: &str,
        note: Option<String>,
    );
}

/// [`EventPublisher`] recording through `kube::runtime::events::Recorder`
pub struct KubeEventPublisher {
    recorder: Recorder,
}

/// Event reporter for `controller`, optionally naming the replica that
/// recorded the event
fn reporter(controller: &str, instance: Option<String>) -> Reporter {
    Reporter {
        controller: controller.to_string(),
        instance: instance.filter(|i| !i.is_empty()),
    }
}

impl KubeEventPublisher {
    /// Publisher reporting as `controller` (the event's reportingComponent)
    ///
    /// `instance` becomes the reportingInstance, e.g. the operator pod name.
    pub fn new(client: Client, controller: &str, instance: Option<String>) -> Self {
        Self {
            recorder: Recorder::new(client, reporter(controller, instance)),
        }
    }
}

#[async_trait]
impl EventPublisher for KubeEventPublisher {
    async fn publish(
        &self,
        resource_ref: &ObjectReference,
        type_: EventType,
        reason: &str,
        action: &str,
        note: Option<String>,
    ) {
        let event = kube::runtime::events::Event {
            type_,
            reason: reason.to_string(),
            note,
            action: action.to_string(),
            secondary: None,
        };
        if let Err(e) = self.recorder.publish(&event, resource_ref).await {
            warn!(reason, action, error = %e, "could not record event");
        }
    }
}

/// No-op implementation for tests and dry runs.
pub struct NoopEventPublisher;

#[async_trait]
impl EventPublisher for NoopEventPublisher {
    async fn publish(
        &self,
        _resource_ref: &ObjectReference,
        _type_: EventType,
        _reason: &str,
        _action: &str,
        _note: Option<String>,
    ) {
    }
}

/// Well-known event reason strings.
pub mod reasons {
    /// Mirrors and access grants converged
    pub const MONITORING_SYNCED: &str = "MonitoringSynced";
    /// Monitoring operator install plan has not completed yet
    pub const OPERATOR_INSTALLING: &str = "OperatorInstalling";
    /// A reconcile pass failed
    pub const RECONCILE_FAILED: &str = "ReconcileFailed";
    /// Teardown removed every owned object and the operator is gone
    pub const UNINSTALL_COMPLETE: &str = "UninstallComplete";
}

/// Well-known event action strings.
pub mod actions {
    /// Standard reconciliation pass
    pub const RECONCILE: &str = "Reconcile";
    /// Teardown pass
    pub const UNINSTALL: &str = "Uninstall";
}
