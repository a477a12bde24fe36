//! Comment phase: tell the pull request that its preview is live.

use kube::runtime::controller::Action;
use kube::runtime::events::EventType;
use tracing::{debug, info, warn};

use reviewapp_common::crd::{ReviewApp, ReviewAppStatus, SyncStatus};
use reviewapp_common::events::{actions, reasons};
use reviewapp_common::{annotations, metrics, Error};

use crate::context::Context;
use crate::notify::{self, NotificationDecision, NotificationInputs};

use super::{emit, missing_credential_message, resolve_credential, PhaseOutcome, Prepared};

/// Post the configured comment once ArgoCD applied the last push.
///
/// Runs only in `UpdatedInfraRepo`. Advances to `WatchingAppRepoAndTemplates`
/// as soon as the pushed commit is observed on the live Application, whether
/// or not a comment was posted.
pub async fn comment_to_pull_request(
    ra: &ReviewApp,
    namespace: &str,
    ctx: &Context,
    prepared: &Prepared,
    status: &mut ReviewAppStatus,
) -> Result<PhaseOutcome, Error> {
    if status.sync.status != SyncStatus::UpdatedInfraRepo {
        return Ok(PhaseOutcome::Continue);
    }

    let (Some(app_name), Some(app_namespace)) = (
        status.sync.application_name.clone(),
        status.sync.application_namespace.clone(),
    ) else {
        warn!("no application recorded for the last push");
        return Ok(PhaseOutcome::Continue);
    };

    let applied = ctx
        .kube
        .get_application_annotation(&app_namespace, &app_name, annotations::APP_COMMIT_SHA)
        .await?;

    let app_config = &prepared.config.app_config;
    let message = app_config
        .message
        .as_deref()
        .filter(|m| !m.trim().is_empty());
    let decision = notify::decide(NotificationInputs {
        applied_sha: applied.as_deref(),
        cached_sha: status.sync.app_repo_latest_commit_sha.as_deref(),
        message_configured: message.is_some(),
        send_every_time: app_config.send_message_every_time,
        already_sent: status.sync.already_sent_message,
    });

    let body = match (decision, message) {
        (NotificationDecision::Wait, _) => {
            debug!(
                application = %app_name,
                applied = applied.as_deref().unwrap_or("<none>"),
                "waiting for ArgoCD to apply the last push"
            );
            return Ok(PhaseOutcome::Continue);
        }
        (NotificationDecision::Send, Some(body)) => body,
        _ => {
            debug!("last push applied, no comment to post");
            status.sync.status = SyncStatus::WatchingAppRepoAndTemplates;
            return Ok(PhaseOutcome::Continue);
        }
    };

    let app = &ra.spec.app_target;
    let Some(credential) =
        resolve_credential(ctx, namespace, &app.git_credential, &app.username).await?
    else {
        let message = missing_credential_message(namespace, &app.git_credential);
        warn!(%message, "app repository credential not available for comment");
        status.message = Some(message);
        return Ok(PhaseOutcome::Stop(Action::requeue(
            ctx.config.soft_stop_requeue,
        )));
    };

    let pr = &prepared.pull_request;
    ctx.hosting
        .create_issue_comment(&credential, &pr.organization, &pr.repository, pr.number, body)
        .await?;
    metrics::record_comment();

    info!(number = pr.number, "commented on pull request");
    status.sync.already_sent_message = true;
    status.sync.status = SyncStatus::WatchingAppRepoAndTemplates;
    emit(
        ctx,
        ra,
        EventType::Normal,
        reasons::MESSAGE_SENT,
        actions::NOTIFY,
        format!("{}/{}#{}", pr.organization, pr.repository, pr.number),
    )
    .await;
    Ok(PhaseOutcome::Continue)
}
