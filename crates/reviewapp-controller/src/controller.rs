//! ReviewApp reconciliation entry points

use std::sync::Arc;
use std::time::Duration;

use kube::runtime::controller::Action;
use kube::ResourceExt;
use tracing::{debug, error, info, instrument, warn};

use reviewapp_common::crd::{ReviewApp, ReviewAppStatus};
use reviewapp_common::{metrics, Error, REVIEW_APP_FINALIZER};

use crate::context::Context;
use crate::kube_client::status_merge_patch;
use crate::phases::{self, PhaseOutcome, Prepare};

fn has_finalizer(ra: &ReviewApp) -> bool {
    ra.finalizers().iter().any(|f| f == REVIEW_APP_FINALIZER)
}

/// Reconcile a ReviewApp resource
///
/// Runs the delete path when the resource is being deleted. Otherwise makes
/// sure the cleanup finalizer is present, runs the phase pipeline against an
/// in-memory copy of the status and writes the status back once, only if it
/// changed.
#[instrument(
    skip(ra, ctx),
    fields(review_app = %ra.name_any(), namespace = %ra.namespace().unwrap_or_default())
)]
pub async fn reconcile(ra: Arc<ReviewApp>, ctx: Arc<Context>) -> Result<Action, Error> {
    let name = ra.name_any();
    let namespace = ra.namespace().ok_or_else(|| {
        Error::validation_for_field(&name, "metadata.namespace", "ReviewApp must be namespaced")
    })?;
    debug!("reconciling review app");

    if ra.metadata.deletion_timestamp.is_some() {
        let result = phases::reconcile_delete(&ra, &namespace, &ctx).await;
        metrics::record_reconcile(result.is_ok());
        return result;
    }

    if !has_finalizer(&ra) {
        info!("adding cleanup finalizer");
        ctx.kube.add_finalizer(&namespace, &name).await?;
        return Ok(Action::requeue(Duration::from_secs(1)));
    }

    let original = ra.status.clone().unwrap_or_default();
    let mut status = original.clone();
    let outcome = run_phases(&ra, &namespace, &ctx, &mut status).await;

    let action = match outcome {
        Ok(None) => {
            metrics::record_reconcile(true);
            metrics::forget_review_app(&namespace, &name);
            return Ok(Action::await_change());
        }
        Ok(Some(action)) => Ok(action),
        Err(e) => {
            status.message = Some(e.to_string());
            Err(e)
        }
    };
    status.observed_generation = ra.metadata.generation;

    let persisted = if status != original {
        match status_merge_patch(ra.status.as_ref(), &status) {
            Ok(patch) => ctx.kube.patch_status(&namespace, &name, &patch).await,
            Err(e) => Err(e),
        }
    } else {
        Ok(())
    };

    metrics::record_sync_status(&namespace, &name, status.sync.status.code());
    let result = match (action, persisted) {
        (Ok(action), Ok(())) => Ok(action),
        (Ok(_), Err(patch_err)) => Err(patch_err),
        (Err(e), Ok(())) => Err(e),
        (Err(e), Err(patch_err)) => {
            warn!(error = %patch_err, "failed to record reconcile error on status");
            Err(e)
        }
    };
    metrics::record_reconcile(result.is_ok());
    result
}

/// Run prepare, confirm, deploy and comment
///
/// `Ok(None)` when the ReviewApp was deleted because its pull request is gone.
async fn run_phases(
    ra: &ReviewApp,
    namespace: &str,
    ctx: &Context,
    status: &mut ReviewAppStatus,
) -> Result<Option<Action>, Error> {
    let prepared = match phases::prepare(ra, namespace, ctx, status).await? {
        Prepare::Ready(prepared) => prepared,
        Prepare::Stop(action) => return Ok(Some(action)),
        Prepare::Removed => return Ok(None),
    };
    status.message = None;

    phases::confirm_updated(ra, ctx, &prepared, status).await;

    if let PhaseOutcome::Stop(action) =
        phases::deploy_to_infra_repo(ra, namespace, ctx, &prepared, status).await?
    {
        return Ok(Some(action));
    }
    if let PhaseOutcome::Stop(action) =
        phases::comment_to_pull_request(ra, namespace, ctx, &prepared, status).await?
    {
        return Ok(Some(action));
    }

    Ok(Some(Action::requeue(ctx.config.steady_requeue)))
}

/// Error policy for the controller
///
/// Failed reconciles are retried after a fixed delay.
pub fn error_policy(ra: Arc<ReviewApp>, error: &Error, ctx: Arc<Context>) -> Action {
    error!(
        ?error,
        review_app = %ra.name_any(),
        retryable = error.is_retryable(),
        "reconciliation failed"
    );
    Action::requeue(ctx.config.error_requeue)
}
