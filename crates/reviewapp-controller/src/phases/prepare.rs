//! Prepare phase: resolve the pull request and render every artifact.

use chrono::Utc;
use kube::runtime::controller::Action;
use kube::runtime::events::EventType;
use kube::ResourceExt;
use tracing::{debug, info, warn};

use reviewapp_common::crd::{ReviewApp, ReviewAppStatus, SyncStatus, TemplateVariant};
use reviewapp_common::events::{actions, reasons};
use reviewapp_common::Error;

use crate::context::Context;
use crate::fingerprint::DesiredFingerprint;
use crate::pull_request::{self, ExclusionRules, Resolution};
use crate::render;

use super::{
    emit, fetch_manifests_templates, missing_credential_message, resolve_credential, Prepare,
    Prepared,
};

/// Resolve the pull request and render the Application and manifests.
///
/// Stops early without rendering when the app credential is missing, the
/// pull request is excluded, or a referenced template does not exist. A pull
/// request that fails every lookup and is absent from the open list deletes
/// the ReviewApp.
pub async fn prepare(
    ra: &ReviewApp,
    namespace: &str,
    ctx: &Context,
    status: &mut ReviewAppStatus,
) -> Result<Prepare, Error> {
    let spec = &ra.spec;

    let variables = match spec.validate() {
        Ok(variables) => variables,
        Err(e) => {
            warn!(error = %e, "review app validation failed");
            emit(
                ctx,
                ra,
                EventType::Warning,
                reasons::VALIDATION_FAILED,
                actions::RECONCILE,
                e.to_string(),
            )
            .await;
            return Err(e);
        }
    };
    let rules = ExclusionRules::from_target(&spec.app_target)?;

    let app = &spec.app_target;
    let Some(credential) =
        resolve_credential(ctx, namespace, &app.git_credential, &app.username).await?
    else {
        let message = missing_credential_message(namespace, &app.git_credential);
        warn!(%message, "app repository credential not available");
        emit(
            ctx,
            ra,
            EventType::Warning,
            reasons::MISSING_CREDENTIAL,
            actions::RECONCILE,
            message.clone(),
        )
        .await;
        status.message = Some(message);
        return Ok(Prepare::Stop(Action::requeue(ctx.config.soft_stop_requeue)));
    };

    let resolution = pull_request::resolve(
        ctx.hosting.as_ref(),
        spec,
        status,
        &credential,
        &ctx.config.pull_request_retry,
        Utc::now(),
    )
    .await?;
    let pr = match resolution {
        Resolution::Found(pr) => pr,
        Resolution::Gone { reason } => {
            warn!(%reason, "pull request is gone, deleting review app");
            emit(
                ctx,
                ra,
                EventType::Warning,
                reasons::PULL_REQUEST_GONE,
                actions::RECONCILE,
                format!(
                    "{}/{}#{} could not be resolved: {reason}",
                    app.organization, app.repository, spec.pull_request_number
                ),
            )
            .await;
            ctx.kube.delete_review_app(namespace, &ra.name_any()).await?;
            return Ok(Prepare::Removed);
        }
    };

    if pr.is_excluded(&rules) {
        info!(number = pr.number, title = %pr.title, "pull request is excluded");
        let message = format!("pull request #{} is excluded by label or title", pr.number);
        let previous = ra.status.as_ref().and_then(|s| s.message.as_deref());
        if previous != Some(message.as_str()) {
            emit(
                ctx,
                ra,
                EventType::Normal,
                reasons::PULL_REQUEST_IGNORED,
                actions::RECONCILE,
                message.clone(),
            )
            .await;
        }
        status.message = Some(message);
        return Ok(Prepare::Stop(Action::requeue(ctx.config.steady_requeue)));
    }

    if status.sync.status == SyncStatus::Unknown {
        status.sync.status = SyncStatus::WatchingAppRepo;
    }

    let variant = TemplateVariant::select(pr.is_candidate(spec.candidate_label()));
    debug!(?variant, head = %pr.head_sha, "rendering templates");

    let template_context = render::template_context(spec, &pr, variables);
    let config = render::render_config(&ctx.engine, spec, &template_context)?;

    let app_ref = &config.infra_config.argocd_app.template;
    let app_namespace = app_ref.namespace_or(namespace);
    let Some(app_template) = ctx
        .kube
        .get_application_template(app_namespace, &app_ref.name)
        .await?
    else {
        let message = format!("ApplicationTemplate {app_namespace}/{} not found", app_ref.name);
        return Ok(template_missing(ra, ctx, status, message).await);
    };

    let manifests_templates =
        match fetch_manifests_templates(ctx, namespace, &config.infra_config.manifests.templates)
            .await?
        {
            Ok(templates) => templates,
            Err(message) => return Ok(template_missing(ra, ctx, status, message).await),
        };

    let application =
        render::render_application(&ctx.engine, &app_template.spec, variant, &template_context)?;
    let identity = render::application_identity(&application)?;
    let manifests = render::render_manifests(
        &ctx.engine,
        &manifests_templates,
        variant,
        &template_context,
    )?;

    let desired = DesiredFingerprint::new(application, identity, manifests, pr.head_sha.clone());
    Ok(Prepare::Ready(Box::new(Prepared {
        pull_request: pr,
        template_context,
        config,
        desired,
    })))
}

async fn template_missing(
    ra: &ReviewApp,
    ctx: &Context,
    status: &mut ReviewAppStatus,
    message: String,
) -> Prepare {
    warn!(%message, "template not available yet");
    emit(
        ctx,
        ra,
        EventType::Warning,
        reasons::TEMPLATE_NOT_FOUND,
        actions::RECONCILE,
        message.clone(),
    )
    .await;
    status.message = Some(message);
    Prepare::Stop(Action::requeue(ctx.config.soft_stop_requeue))
}
