//! Controller runner - builds the ReviewApp controller future
//!
//! Template edits re-enqueue every ReviewApp in the template's namespace.
//! References across namespaces are picked up by the periodic requeue.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use futures::StreamExt;
use kube::runtime::reflector::{ObjectRef, Store};
use kube::runtime::watcher::Config as WatcherConfig;
use kube::runtime::Controller;
use kube::{Api, Client, Resource, ResourceExt};

use reviewapp_common::crd::{ApplicationTemplate, ManifestsTemplate, ReviewApp};
use reviewapp_controller::{error_policy, reconcile, Context};

/// Watcher timeout (seconds) - must be less than client read_timeout (30s)
/// This forces the API server to close the watch before the client times out,
/// preventing "body read timed out" errors on idle watches.
const WATCH_TIMEOUT_SECS: u32 = 25;

/// Build the ReviewApp controller future
///
/// With a `namespace` the controller watches only that namespace, otherwise
/// the whole cluster.
pub fn build_review_app_controller(
    client: Client,
    ctx: Arc<Context>,
    namespace: Option<&str>,
) -> Pin<Box<dyn Future<Output = ()> + Send>> {
    let review_apps: Api<ReviewApp> = scoped_api(&client, namespace);
    let app_templates: Api<ApplicationTemplate> = scoped_api(&client, namespace);
    let manifests_templates: Api<ManifestsTemplate> = scoped_api(&client, namespace);

    match namespace {
        Some(ns) => tracing::info!(namespace = %ns, "- ReviewApp controller"),
        None => tracing::info!("- ReviewApp controller (all namespaces)"),
    }

    let controller = Controller::new(
        review_apps,
        WatcherConfig::default().timeout(WATCH_TIMEOUT_SECS),
    );
    let store = controller.store();

    Box::pin(
        controller
            .watches(
                app_templates,
                WatcherConfig::default().timeout(WATCH_TIMEOUT_SECS),
                enqueue_namespace(store.clone()),
            )
            .watches(
                manifests_templates,
                WatcherConfig::default().timeout(WATCH_TIMEOUT_SECS),
                enqueue_namespace(store),
            )
            .shutdown_on_signal()
            .run(reconcile, error_policy, ctx)
            .for_each(log_reconcile_result("ReviewApp")),
    )
}

fn scoped_api<K>(client: &Client, namespace: Option<&str>) -> Api<K>
where
    K: Resource<Scope = k8s_openapi::NamespaceResourceScope>,
    K::DynamicType: Default,
{
    match namespace {
        Some(ns) => Api::namespaced(client.clone(), ns),
        None => Api::all(client.clone()),
    }
}

/// Mapper from a template change to the ReviewApps sharing its namespace
fn enqueue_namespace<K>(
    store: Store<ReviewApp>,
) -> impl Fn(K) -> Vec<ObjectRef<ReviewApp>> + Send + Sync + 'static
where
    K: ResourceExt + 'static,
{
    move |template| {
        let Some(namespace) = template.namespace() else {
            return vec![];
        };
        let affected = review_apps_in(store.state(), &namespace);
        tracing::debug!(
            template = %template.name_any(),
            namespace = %namespace,
            affected_count = affected.len(),
            "Triggering re-reconciliation of review apps"
        );
        affected
    }
}

fn review_apps_in(apps: Vec<Arc<ReviewApp>>, namespace: &str) -> Vec<ObjectRef<ReviewApp>> {
    apps.iter()
        .filter(|ra| ra.namespace().as_deref() == Some(namespace))
        .map(|ra| ObjectRef::from_obj(ra.as_ref()))
        .collect()
}

/// Creates a closure for logging reconciliation results.
fn log_reconcile_result<T: std::fmt::Debug, E: std::fmt::Debug>(
    controller_name: &'static str,
) -> impl Fn(Result<T, E>) -> std::future::Ready<()> {
    move |result| {
        match result {
            Ok(action) => tracing::debug!(?action, "{} reconciliation completed", controller_name),
            Err(e) => tracing::error!(error = ?e, "{} reconciliation error", controller_name),
        }
        std::future::ready(())
    }
}
