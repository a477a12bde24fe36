//! Confirm phase: compare rendered artifacts against the last push.

use kube::runtime::events::EventType;
use tracing::{debug, info};

use reviewapp_common::crd::{ReviewApp, ReviewAppStatus, SyncStatus};
use reviewapp_common::events::{actions, reasons};

use crate::context::Context;
use crate::fingerprint::{ChangeSet, LastAppliedFingerprint};

use super::{emit, Prepared};

/// Move the status to `NeedToUpdateInfraRepo` when anything changed.
///
/// Only the in-memory status is touched. The last-applied fingerprint is left
/// alone so a failed push is retried with the same diff.
pub async fn confirm_updated(
    ra: &ReviewApp,
    ctx: &Context,
    prepared: &Prepared,
    status: &mut ReviewAppStatus,
) -> ChangeSet {
    let last = LastAppliedFingerprint::from_status(status);
    let changes = ChangeSet::between(&prepared.desired, last.as_ref());

    if !changes.any() {
        debug!("rendered artifacts match the last push");
        return changes;
    }
    if status.sync.status == SyncStatus::NeedToUpdateInfraRepo {
        debug!(%changes, "infra repository update still pending");
        return changes;
    }

    info!(%changes, "infra repository needs an update");
    status.sync.status = SyncStatus::NeedToUpdateInfraRepo;
    emit(
        ctx,
        ra,
        EventType::Normal,
        reasons::CHANGE_DETECTED,
        actions::RECONCILE,
        changes.to_string(),
    )
    .await;
    changes
}
