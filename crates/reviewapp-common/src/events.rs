//! Kubernetes Event recording for the ReviewApp controller.
//!
//! Provides a trait-based abstraction over `kube::runtime::events::Recorder`
//! so that user-visible failures (missing credentials, failed pushes, a
//! timed-out pre-stop Job) show up in `kubectl describe reviewapp`.
//!
//! Events are **fire-and-forget**: failures are logged as warnings and never
//! propagate errors.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::ObjectReference;
use kube::runtime::events::{EventType, Recorder, Reporter};
use kube::Client;
use tracing::warn;

/// Trait for publishing Kubernetes Events.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Publish a Kubernetes Event on the given resource.
    ///
    /// # Arguments
    ///
    /// * `resource_ref` - The Kubernetes object this event is about
    /// * `type_` - Normal or Warning
    /// * `reason` - Machine-readable reason string (e.g. "InfraRepoUpdated")
    /// * `action` - What action was taken (e.g. "Deploy")
    /// * `note` - Optional human-readable message
    async fn publish(
        &self,
        resource_ref: &ObjectReference,
        type_: EventType,
        reason: &str,
        action: &str,
        note: Option<String>,
    );
}

/// Production implementation wrapping `kube::runtime::events::Recorder`.
pub struct KubeEventPublisher {
    recorder: Recorder,
}

impl KubeEventPublisher {
    /// Create a new publisher reporting as the given controller name.
    pub fn new(client: Client, controller_name: &str) -> Self {
        let reporter = Reporter {
            controller: controller_name.to_string(),
            instance: std::env::var("POD_NAME").ok(),
        };
        Self {
            recorder: Recorder::new(client, reporter),
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
            warn!(
                reason,
                action,
                error = %e,
                "Failed to publish Kubernetes event"
            );
        }
    }
}

/// No-op implementation for tests.
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
    /// Credential Secret or key is missing
    pub const MISSING_CREDENTIAL: &str = "MissingCredential";
    /// Spec failed validation (variables, regex)
    pub const VALIDATION_FAILED: &str = "ValidationFailed";
    /// Referenced template resource does not exist
    pub const TEMPLATE_NOT_FOUND: &str = "TemplateNotFound";
    /// Pull request is excluded by label or title
    pub const PULL_REQUEST_IGNORED: &str = "PullRequestIgnored";
    /// Pull request could not be found, ReviewApp is being removed
    pub const PULL_REQUEST_GONE: &str = "PullRequestGone";
    /// Rendered artifacts differ from the last push
    pub const CHANGE_DETECTED: &str = "ChangeDetected";
    /// Manifests pushed to the infra repository
    pub const INFRA_REPO_UPDATED: &str = "InfraRepoUpdated";
    /// Push to the infra repository failed after retries
    pub const INFRA_REPO_UPDATE_FAILED: &str = "InfraRepoUpdateFailed";
    /// Comment posted to the pull request
    pub const MESSAGE_SENT: &str = "MessageSent";
    /// Pre-stop Job created
    pub const PRE_STOP_JOB_CREATED: &str = "PreStopJobCreated";
    /// Pre-stop Job failed or timed out; deletion continues
    pub const PRE_STOP_JOB_FAILED: &str = "PreStopJobFailed";
    /// Files removed from the infra repository
    pub const INFRA_REPO_CLEANED: &str = "InfraRepoCleaned";
}

/// Well-known event action strings.
pub mod actions {
    /// Standard reconciliation loop
    pub const RECONCILE: &str = "Reconcile";
    /// Pushing to the infra repository
    pub const DEPLOY: &str = "Deploy";
    /// Commenting on the pull request
    pub const NOTIFY: &str = "Notify";
    /// Tearing down a ReviewApp
    pub const DELETE: &str = "Delete";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn noop_publisher_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<NoopEventPublisher>();
    }

    #[tokio::test]
    async fn noop_publisher_does_not_panic() {
        let publisher = NoopEventPublisher;
        publisher
            .publish(
                &ObjectReference::default(),
                EventType::Warning,
                reasons::PRE_STOP_JOB_FAILED,
                actions::DELETE,
                Some("timed out".to_string()),
            )
            .await;
    }
}
