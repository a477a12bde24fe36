//! Prometheus metrics for the ReviewApp controller
//!
//! Per-resource series are keyed by `namespace`/`name` and removed when the
//! ReviewApp is finalized.

use once_cell::sync::Lazy;
use prometheus::{Encoder, IntCounter, IntCounterVec, IntGaugeVec, Opts, Registry, TextEncoder};
use tracing::{debug, warn};

/// Registry served on the operator's `/metrics` endpoint
pub static REGISTRY: Lazy<Registry> = Lazy::new(Registry::new);

static METRICS: Lazy<Option<Metrics>> = Lazy::new(|| match Metrics::register(&REGISTRY) {
    Ok(metrics) => Some(metrics),
    Err(e) => {
        warn!(error = %e, "failed to register metrics, continuing without them");
        None
    }
});

struct Metrics {
    /// Sync state code per ReviewApp (see `SyncStatus::code`)
    ///
    /// Labels:
    /// - `namespace`, `name`: the ReviewApp
    sync_status: IntGaugeVec,

    /// Labels:
    /// - `result`: success, error
    reconcile_total: IntCounterVec,

    /// Labels:
    /// - `result`: pushed, unchanged, failed
    infra_push_total: IntCounterVec,

    comments_total: IntCounter,
}

impl Metrics {
    fn register(registry: &Registry) -> prometheus::Result<Self> {
        let sync_status = IntGaugeVec::new(
            Opts::new(
                "reviewapp_sync_status",
                "Sync state machine position of each ReviewApp",
            ),
            &["namespace", "name"],
        )?;
        let reconcile_total = IntCounterVec::new(
            Opts::new("reviewapp_reconcile_total", "Total ReviewApp reconciliations"),
            &["result"],
        )?;
        let infra_push_total = IntCounterVec::new(
            Opts::new(
                "reviewapp_infra_push_total",
                "Total infra repository updates by outcome",
            ),
            &["result"],
        )?;
        let comments_total = IntCounter::new(
            "reviewapp_comments_total",
            "Total pull request comments posted",
        )?;

        registry.register(Box::new(sync_status.clone()))?;
        registry.register(Box::new(reconcile_total.clone()))?;
        registry.register(Box::new(infra_push_total.clone()))?;
        registry.register(Box::new(comments_total.clone()))?;

        Ok(Self {
            sync_status,
            reconcile_total,
            infra_push_total,
            comments_total,
        })
    }
}

/// Outcome of an infra repository update
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PushResult {
    /// A commit was pushed
    Pushed,
    /// The working tree matched the desired state, nothing was pushed
    Unchanged,
    /// Every attempt failed
    Failed,
}

impl PushResult {
    fn as_label(self) -> &'static str {
        match self {
            Self::Pushed => "pushed",
            Self::Unchanged => "unchanged",
            Self::Failed => "failed",
        }
    }
}

/// Record the current sync state of a ReviewApp
pub fn record_sync_status(namespace: &str, name: &str, code: i64) {
    if let Some(m) = METRICS.as_ref() {
        m.sync_status.with_label_values(&[namespace, name]).set(code);
    }
}

/// Count a finished reconciliation
pub fn record_reconcile(success: bool) {
    if let Some(m) = METRICS.as_ref() {
        let result = if success { "success" } else { "error" };
        m.reconcile_total.with_label_values(&[result]).inc();
    }
}

/// Count an infra repository update
pub fn record_infra_push(result: PushResult) {
    if let Some(m) = METRICS.as_ref() {
        m.infra_push_total
            .with_label_values(&[result.as_label()])
            .inc();
    }
}

/// Count a posted pull request comment
pub fn record_comment() {
    if let Some(m) = METRICS.as_ref() {
        m.comments_total.inc();
    }
}

/// Remove every per-resource series of a ReviewApp
pub fn forget_review_app(namespace: &str, name: &str) {
    if let Some(m) = METRICS.as_ref() {
        if m.sync_status.remove_label_values(&[namespace, name]).is_err() {
            debug!(namespace, name, "no sync status series to remove");
        }
    }
}

/// Render all registered metrics in the Prometheus text format
pub fn gather_text() -> String {
    Lazy::force(&METRICS);
    let mut buf = Vec::new();
    if let Err(e) = TextEncoder::new().encode(&REGISTRY.gather(), &mut buf) {
        warn!(error = %e, "failed to encode metrics");
        return String::new();
    }
    String::from_utf8_lossy(&buf).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sync_status_series_is_removed_on_forget() {
        record_sync_status("previews", "shop-pr-1", 3);
        assert!(gather_text().contains("shop-pr-1"));

        forget_review_app("previews", "shop-pr-1");
        assert!(!gather_text().contains("shop-pr-1"));
    }

    #[test]
    fn counters_are_exported() {
        record_reconcile(true);
        record_infra_push(PushResult::Unchanged);
        record_comment();
        let text = gather_text();
        assert!(text.contains("reviewapp_reconcile_total"));
        assert!(text.contains("result=\"unchanged\""));
        assert!(text.contains("reviewapp_comments_total"));
    }

    #[test]
    fn forgetting_unknown_series_is_harmless() {
        forget_review_app("nowhere", "nothing");
    }
}
