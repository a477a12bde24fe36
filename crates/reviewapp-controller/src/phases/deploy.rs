//! Deploy phase: push the rendered Application and manifests.

use kube::runtime::controller::Action;
use kube::runtime::events::EventType;
use tracing::{info, warn};

use reviewapp_common::crd::{ManifestsCache, ReviewApp, ReviewAppStatus, SyncStatus};
use reviewapp_common::events::{actions, reasons};
use reviewapp_common::Error;

use crate::context::Context;
use crate::git::{InfraFile, WriteMode};
use crate::render;

use super::{
    emit, infra_paths, infra_repo_target, missing_credential_message, resolve_credential,
    PhaseOutcome, Prepared,
};

/// Write the rendered artifacts to the infra repository.
///
/// Runs only in `NeedToUpdateInfraRepo`. The last-applied fingerprint on the
/// status is replaced only after the push succeeded.
pub async fn deploy_to_infra_repo(
    ra: &ReviewApp,
    namespace: &str,
    ctx: &Context,
    prepared: &Prepared,
    status: &mut ReviewAppStatus,
) -> Result<PhaseOutcome, Error> {
    if status.sync.status != SyncStatus::NeedToUpdateInfraRepo {
        return Ok(PhaseOutcome::Continue);
    }

    let infra = &ra.spec.infra_target;
    let Some(credential) =
        resolve_credential(ctx, namespace, &infra.git_credential, &infra.username).await?
    else {
        let message = missing_credential_message(namespace, &infra.git_credential);
        warn!(%message, "infra repository credential not available");
        emit(
            ctx,
            ra,
            EventType::Warning,
            reasons::MISSING_CREDENTIAL,
            actions::DEPLOY,
            message.clone(),
        )
        .await;
        status.message = Some(message);
        return Ok(PhaseOutcome::Stop(Action::requeue(
            ctx.config.soft_stop_requeue,
        )));
    };

    let pr = &prepared.pull_request;
    let desired = &prepared.desired;
    let annotated = render::annotate_application(&desired.application, pr)?;
    let paths = infra_paths(&prepared.config.infra_config, desired.manifests.keys());
    let contents = std::iter::once(annotated.as_str())
        .chain(desired.manifests.values().map(String::as_str));
    let files: Vec<InfraFile> = paths
        .into_iter()
        .zip(contents)
        .map(|(path, content)| InfraFile::new(path, content))
        .collect();

    let message = format!(
        "Update review app {}/{}#{} to {}",
        pr.organization, pr.repository, pr.number, pr.head_sha
    );
    let target = infra_repo_target(infra, credential);

    let outcome = match ctx
        .writer()
        .apply(&target, &files, WriteMode::Upsert, &message)
        .await
    {
        Ok(outcome) => outcome,
        Err(e) => {
            emit(
                ctx,
                ra,
                EventType::Warning,
                reasons::INFRA_REPO_UPDATE_FAILED,
                actions::DEPLOY,
                e.to_string(),
            )
            .await;
            return Err(e);
        }
    };

    status.manifests_cache = Some(ManifestsCache {
        application: desired.application.clone(),
        manifests: desired.manifests.clone(),
    });
    status.sync.app_repo_latest_commit_sha = Some(pr.head_sha.clone());
    status.sync.infra_repo_latest_commit_sha = Some(outcome.head_sha.clone());
    status.sync.application_name = Some(desired.application_identity.name.clone());
    status.sync.application_namespace = Some(desired.application_identity.namespace.clone());
    status.sync.status = SyncStatus::UpdatedInfraRepo;

    info!(
        infra_head = %outcome.head_sha,
        pushed = outcome.pushed,
        files = files.len(),
        "infra repository updated"
    );
    emit(
        ctx,
        ra,
        EventType::Normal,
        reasons::INFRA_REPO_UPDATED,
        actions::DEPLOY,
        format!(
            "{} files at {}/{}@{}",
            files.len(),
            target.organization,
            target.repository,
            outcome.head_sha
        ),
    )
    .await;
    Ok(PhaseOutcome::Continue)
}
