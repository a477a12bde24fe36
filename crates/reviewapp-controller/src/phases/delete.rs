//! Delete path: pre-stop Job, infra repository cleanup, finalizer removal.

use std::collections::BTreeSet;

use kube::runtime::controller::Action;
use kube::runtime::events::EventType;
use kube::ResourceExt;
use tracing::{info, warn};

use reviewapp_common::crd::{merge_manifests, ReviewApp, TemplateRef, TemplateVariant};
use reviewapp_common::events::{actions, reasons};
use reviewapp_common::template::TemplateContext;
use reviewapp_common::{metrics, Error, REVIEW_APP_FINALIZER};

use crate::context::Context;
use crate::git::{InfraFile, WriteMode};
use crate::prestop::{latest_job_state, wait_for_job, WaitOutcome};
use crate::pull_request::PullRequest;
use crate::render::{self, JobOwner, RenderedConfig};

use super::{
    emit, fetch_manifests_templates, infra_paths, infra_repo_target, missing_credential_message,
    resolve_credential,
};

fn has_finalizer(ra: &ReviewApp) -> bool {
    ra.finalizers().iter().any(|f| f == REVIEW_APP_FINALIZER)
}

/// Tear down a ReviewApp that is being deleted.
///
/// The pre-stop Job never blocks deletion: a failure or timeout is reported
/// as a warning Event and cleanup continues. The infra repository is always
/// cleaned, whether or not a push was recorded on the status.
pub async fn reconcile_delete(
    ra: &ReviewApp,
    namespace: &str,
    ctx: &Context,
) -> Result<Action, Error> {
    let name = ra.name_any();
    if !has_finalizer(ra) {
        return Ok(Action::await_change());
    }
    info!("review app is being deleted");

    let variables = match ra.spec.parsed_variables() {
        Ok(variables) => variables,
        Err(e) => {
            emit(
                ctx,
                ra,
                EventType::Warning,
                reasons::VALIDATION_FAILED,
                actions::DELETE,
                e.to_string(),
            )
            .await;
            return Err(e);
        }
    };
    let pr = PullRequest::last_known(&ra.spec, ra.status.as_ref());
    let variant = TemplateVariant::select(pr.is_candidate(ra.spec.candidate_label()));
    let template_context = render::template_context(&ra.spec, &pr, variables);

    if let Some(job_ref) = &ra.spec.pre_stop_job {
        run_pre_stop_job(ra, namespace, ctx, &template_context, variant, job_ref).await;
    }

    let infra = &ra.spec.infra_target;
    let Some(credential) =
        resolve_credential(ctx, namespace, &infra.git_credential, &infra.username).await?
    else {
        let message = missing_credential_message(namespace, &infra.git_credential);
        warn!(%message, "cannot clean infra repository without credential");
        emit(
            ctx,
            ra,
            EventType::Warning,
            reasons::MISSING_CREDENTIAL,
            actions::DELETE,
            message,
        )
        .await;
        return Ok(Action::requeue(ctx.config.soft_stop_requeue));
    };

    let config = render::render_config(&ctx.engine, &ra.spec, &template_context)?;
    let keys = manifest_keys(ra, namespace, ctx, &config, variant).await;
    let files: Vec<InfraFile> = infra_paths(&config.infra_config, &keys)
        .into_iter()
        .map(InfraFile::path_only)
        .collect();

    let message = format!(
        "Remove review app {}/{}#{}",
        pr.organization, pr.repository, pr.number
    );
    let target = infra_repo_target(infra, credential);
    match ctx
        .writer()
        .apply(&target, &files, WriteMode::Delete, &message)
        .await
    {
        Ok(outcome) if outcome.pushed => {
            emit(
                ctx,
                ra,
                EventType::Normal,
                reasons::INFRA_REPO_CLEANED,
                actions::DELETE,
                format!("removed {} files", files.len()),
            )
            .await;
        }
        Ok(_) => info!("infra repository holds no files of this review app"),
        Err(e) => {
            emit(
                ctx,
                ra,
                EventType::Warning,
                reasons::INFRA_REPO_UPDATE_FAILED,
                actions::DELETE,
                e.to_string(),
            )
            .await;
            return Err(e);
        }
    }

    ctx.kube.remove_finalizer(namespace, &name).await?;
    metrics::forget_review_app(namespace, &name);
    info!("review app finalized");
    Ok(Action::await_change())
}

/// Manifest keys to remove: the recorded ones plus the currently rendered ones
///
/// Falls back to the recorded keys when the templates cannot be read.
async fn manifest_keys(
    ra: &ReviewApp,
    namespace: &str,
    ctx: &Context,
    config: &RenderedConfig,
    variant: TemplateVariant,
) -> BTreeSet<String> {
    let mut keys: BTreeSet<String> = ra
        .status
        .as_ref()
        .and_then(|s| s.manifests_cache.as_ref())
        .map(|cache| cache.manifests.keys().cloned().collect())
        .unwrap_or_default();

    let refs = &config.infra_config.manifests.templates;
    match fetch_manifests_templates(ctx, namespace, refs).await {
        Ok(Ok(templates)) => {
            keys.extend(merge_manifests(templates.iter().map(|t| t.manifests(variant))).into_keys());
        }
        Ok(Err(message)) => warn!(%message, "removing recorded manifests only"),
        Err(e) => warn!(error = %e, "removing recorded manifests only"),
    }
    keys
}

async fn run_pre_stop_job(
    ra: &ReviewApp,
    namespace: &str,
    ctx: &Context,
    template_context: &TemplateContext,
    variant: TemplateVariant,
    job_ref: &TemplateRef,
) {
    let started =
        ensure_pre_stop_job(ra, namespace, ctx, template_context, variant, job_ref).await;
    let (job_namespace, selector) = match started {
        Ok(found) => found,
        Err(e) => {
            warn!(error = %e, "pre-stop job could not be started, continuing deletion");
            emit(
                ctx,
                ra,
                EventType::Warning,
                reasons::PRE_STOP_JOB_FAILED,
                actions::DELETE,
                e.to_string(),
            )
            .await;
            return;
        }
    };

    let client = ctx.kube.as_ref();
    let (job_namespace, selector) = (job_namespace.as_str(), selector.as_str());
    let outcome = wait_for_job(ctx.config.pre_stop, move || async move {
        let jobs = client.list_jobs(job_namespace, selector).await?;
        Ok(latest_job_state(&jobs))
    })
    .await;

    match outcome {
        WaitOutcome::Succeeded => info!("pre-stop job succeeded"),
        WaitOutcome::Failed | WaitOutcome::TimedOut => {
            let note = match outcome {
                WaitOutcome::Failed => "pre-stop job failed, continuing deletion".to_string(),
                _ => format!(
                    "pre-stop job did not finish within {:?}, continuing deletion",
                    ctx.config.pre_stop.timeout
                ),
            };
            warn!("{note}");
            emit(
                ctx,
                ra,
                EventType::Warning,
                reasons::PRE_STOP_JOB_FAILED,
                actions::DELETE,
                note,
            )
            .await;
        }
    }
}

/// Render the pre-stop Job and create it unless this ReviewApp already has one.
///
/// Jobs are matched on the ReviewApp's uid as well as its name, so a Job left
/// behind by an earlier ReviewApp of the same name is not reused. Returns the
/// Job namespace and the selector matching it.
async fn ensure_pre_stop_job(
    ra: &ReviewApp,
    namespace: &str,
    ctx: &Context,
    template_context: &TemplateContext,
    variant: TemplateVariant,
    job_ref: &TemplateRef,
) -> Result<(String, String), Error> {
    let name = ra.name_any();
    let uid = ra
        .uid()
        .ok_or_else(|| Error::validation_for_field(&name, "metadata.uid", "ReviewApp has no uid"))?;
    let template_namespace = job_ref.namespace_or(namespace);
    let template = ctx
        .kube
        .get_job_template(template_namespace, &job_ref.name)
        .await?
        .ok_or_else(|| {
            Error::validation_for_field(
                &name,
                "spec.preStopJob",
                format!("JobTemplate {template_namespace}/{} not found", job_ref.name),
            )
        })?;

    let owner = JobOwner {
        name: &name,
        uid: &uid,
        namespace,
    };
    let job = render::render_job(&ctx.engine, &template.spec, variant, template_context, owner)?;
    let job_namespace = job
        .metadata
        .namespace
        .clone()
        .unwrap_or_else(|| namespace.to_string());

    let selector = owner.selector();
    if ctx.kube.list_jobs(&job_namespace, &selector).await?.is_empty() {
        let created = ctx.kube.create_job(&job).await?;
        info!(job = %created.name_any(), namespace = %job_namespace, "created pre-stop job");
        emit(
            ctx,
            ra,
            EventType::Normal,
            reasons::PRE_STOP_JOB_CREATED,
            actions::DELETE,
            created.name_any(),
        )
        .await;
    }
    Ok((job_namespace, selector))
}
