//! Phase handlers for the ReviewApp controller.
//!
//! A reconcile runs prepare, confirm, deploy and comment in that order, each
//! mutating an in-memory status that the controller persists once at the
//! end. Deletion runs [`reconcile_delete`] instead.

mod comment;
mod confirm;
mod delete;
mod deploy;
mod prepare;

pub use comment::comment_to_pull_request;
pub use confirm::confirm_updated;
pub use delete::reconcile_delete;
pub use deploy::deploy_to_infra_repo;
pub use prepare::prepare;

use kube::runtime::controller::Action;
use kube::runtime::events::EventType;
use kube::Resource;

use reviewapp_common::crd::{
    GitCredential, InfraConfig, InfraTarget, ManifestsTemplateSpec, ReviewApp, TemplateRef,
};
use reviewapp_common::template::TemplateContext;
use reviewapp_common::Error;

use crate::context::Context;
use crate::fingerprint::DesiredFingerprint;
use crate::git::{join_repo_path, InfraRepoTarget};
use crate::github::HostingCredential;
use crate::pull_request::PullRequest;
use crate::render::RenderedConfig;

/// Result of a phase that may end the reconcile early
#[derive(Debug)]
pub enum PhaseOutcome {
    /// Run the next phase
    Continue,
    /// End this reconcile with the given requeue
    Stop(Action),
}

/// Result of the prepare phase
#[derive(Debug)]
pub enum Prepare {
    /// Everything rendered, the remaining phases can run
    Ready(Box<Prepared>),
    /// End this reconcile with the given requeue
    Stop(Action),
    /// The pull request is gone and the ReviewApp was deleted
    Removed,
}

/// Artifacts produced by the prepare phase
#[derive(Clone, Debug)]
pub struct Prepared {
    /// Resolved pull request
    pub pull_request: PullRequest,
    /// Context every template was rendered with
    pub template_context: TemplateContext,
    /// `appConfig` and `infraConfig` with placeholders resolved
    pub config: RenderedConfig,
    /// Rendered Application and manifests
    pub desired: DesiredFingerprint,
}

/// Read a hosting credential from its Secret
///
/// `Ok(None)` when the Secret or the key is absent.
pub(crate) async fn resolve_credential(
    ctx: &Context,
    namespace: &str,
    credential: &GitCredential,
    username: &str,
) -> Result<Option<HostingCredential>, Error> {
    let secret = &credential.secret_ref;
    let token = ctx
        .kube
        .get_secret_value(namespace, &secret.name, &secret.key)
        .await?;
    Ok(token.map(|token| HostingCredential {
        username: username.to_string(),
        token: token.trim().to_string(),
    }))
}

/// Message recorded when a credential Secret cannot be read
pub(crate) fn missing_credential_message(namespace: &str, credential: &GitCredential) -> String {
    Error::missing_credential(
        namespace,
        &credential.secret_ref.name,
        &credential.secret_ref.key,
    )
    .to_string()
}

pub(crate) fn infra_repo_target(
    target: &InfraTarget,
    credential: HostingCredential,
) -> InfraRepoTarget {
    InfraRepoTarget {
        organization: target.organization.clone(),
        repository: target.repository.clone(),
        branch: target.branch.clone(),
        credential,
    }
}

/// Infra repository paths: the Application file first, then one per manifest key
pub(crate) fn infra_paths<'a>(
    infra: &InfraConfig,
    manifest_keys: impl IntoIterator<Item = &'a String>,
) -> Vec<String> {
    std::iter::once(infra.argocd_app.filepath.clone())
        .chain(
            manifest_keys
                .into_iter()
                .map(|key| join_repo_path(&infra.manifests.dirpath, key)),
        )
        .collect()
}

/// Fetch the referenced ManifestsTemplates in order
///
/// The inner `Err` names the first template that does not exist.
pub(crate) async fn fetch_manifests_templates(
    ctx: &Context,
    namespace: &str,
    refs: &[TemplateRef],
) -> Result<Result<Vec<ManifestsTemplateSpec>, String>, Error> {
    let mut templates = Vec::with_capacity(refs.len());
    for template_ref in refs {
        let template_namespace = template_ref.namespace_or(namespace);
        match ctx
            .kube
            .get_manifests_template(template_namespace, &template_ref.name)
            .await?
        {
            Some(template) => templates.push(template.spec),
            None => {
                return Ok(Err(format!(
                    "ManifestsTemplate {template_namespace}/{} not found",
                    template_ref.name
                )))
            }
        }
    }
    Ok(Ok(templates))
}

pub(crate) async fn emit(
    ctx: &Context,
    ra: &ReviewApp,
    type_: EventType,
    reason: &str,
    action: &str,
    note: impl Into<String>,
) {
    ctx.events
        .publish(&ra.object_ref(&()), type_, reason, action, Some(note.into()))
        .await;
}
