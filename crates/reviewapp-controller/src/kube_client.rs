//! Kubernetes API gateway for the ReviewApp controller
//!
//! Everything the reconciler reads or writes in the cluster goes through
//! [`KubeClient`] so the phases can be tested against mocks.

use async_trait::async_trait;
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::Secret;
use kube::api::{
    Api, DynamicObject, GroupVersionKind, ListParams, Patch, PatchParams, PostParams,
};
use kube::discovery::ApiResource;
use kube::Client;
use serde_json::{Map, Value};
use tracing::debug;

#[cfg(test)]
use mockall::automock;

use reviewapp_common::crd::{
    ApplicationTemplate, JobTemplate, ManifestsTemplate, ReviewApp, ReviewAppStatus,
};
use reviewapp_common::{Error, FIELD_MANAGER, REVIEW_APP_FINALIZER};

/// ArgoCD Application group
pub const ARGOCD_GROUP: &str = "argoproj.io";
/// ArgoCD Application version
pub const ARGOCD_VERSION: &str = "v1alpha1";

/// Trait abstracting Kubernetes client operations for ReviewApp
///
/// This trait allows mocking the Kubernetes client in tests while using
/// the real client in production.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait KubeClient: Send + Sync {
    /// Apply a JSON merge patch (see [`status_merge_patch`]) to the status
    /// subresource of a ReviewApp
    async fn patch_status(
        &self,
        namespace: &str,
        name: &str,
        patch: &serde_json::Value,
    ) -> Result<(), Error>;

    /// Add the cleanup finalizer (no-op if present)
    async fn add_finalizer(&self, namespace: &str, name: &str) -> Result<(), Error>;

    /// Remove the cleanup finalizer
    async fn remove_finalizer(&self, namespace: &str, name: &str) -> Result<(), Error>;

    /// Delete a ReviewApp, treating 404 as success
    async fn delete_review_app(&self, namespace: &str, name: &str) -> Result<(), Error>;

    /// Read one key of a Secret as UTF-8
    ///
    /// Returns `None` when the Secret or the key does not exist.
    async fn get_secret_value(
        &self,
        namespace: &str,
        name: &str,
        key: &str,
    ) -> Result<Option<String>, Error>;

    /// Get an ApplicationTemplate, `None` if absent
    async fn get_application_template(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<ApplicationTemplate>, Error>;

    /// Get a ManifestsTemplate, `None` if absent
    async fn get_manifests_template(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<ManifestsTemplate>, Error>;

    /// Get a JobTemplate, `None` if absent
    async fn get_job_template(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<JobTemplate>, Error>;

    /// Read an annotation of a live ArgoCD Application
    ///
    /// Returns `None` when the Application or the annotation does not exist.
    async fn get_application_annotation(
        &self,
        namespace: &str,
        name: &str,
        key: &str,
    ) -> Result<Option<String>, Error>;

    /// Create a Job in the namespace set on its metadata
    async fn create_job(&self, job: &Job) -> Result<Job, Error>;

    /// List Jobs matching a label selector
    async fn list_jobs(&self, namespace: &str, label_selector: &str) -> Result<Vec<Job>, Error>;
}

/// Build the merge patch that turns `previous` into `desired`
///
/// Fields and map keys dropped since `previous` are sent as `null`, which a
/// JSON merge patch (RFC 7386) needs to remove them on the server. Without a
/// previous status the whole status is sent.
pub fn status_merge_patch(
    previous: Option<&ReviewAppStatus>,
    desired: &ReviewAppStatus,
) -> Result<Value, Error> {
    let to_json = |status: &ReviewAppStatus| {
        serde_json::to_value(status)
            .map_err(|e| Error::serialization_for_kind("ReviewAppStatus", e.to_string()))
    };
    let desired = to_json(desired)?;
    let status = match previous {
        Some(previous) => {
            merge_diff(&to_json(previous)?, &desired).unwrap_or_else(|| Value::Object(Map::new()))
        }
        None => desired,
    };
    Ok(serde_json::json!({ "status": status }))
}

/// Minimal merge patch from `from` to `to`, `None` when they are equal
fn merge_diff(from: &Value, to: &Value) -> Option<Value> {
    match (from, to) {
        (Value::Object(from), Value::Object(to)) => {
            let mut patch = Map::new();
            for (key, old) in from {
                match to.get(key) {
                    None => {
                        patch.insert(key.clone(), Value::Null);
                    }
                    Some(new) => {
                        if let Some(diff) = merge_diff(old, new) {
                            patch.insert(key.clone(), diff);
                        }
                    }
                }
            }
            for (key, new) in to {
                if !from.contains_key(key) {
                    patch.insert(key.clone(), new.clone());
                }
            }
            (!patch.is_empty()).then_some(Value::Object(patch))
        }
        _ if from == to => None,
        _ => Some(to.clone()),
    }
}

/// Apply a JSON merge patch the way the API server does
#[cfg(test)]
pub(crate) fn apply_merge_patch(target: &mut Value, patch: &Value) {
    let Value::Object(patch) = patch else {
        *target = patch.clone();
        return;
    };
    if !target.is_object() {
        *target = Value::Object(Map::new());
    }
    if let Value::Object(target) = target {
        for (key, value) in patch {
            if value.is_null() {
                target.remove(key);
            } else {
                apply_merge_patch(target.entry(key.clone()).or_insert(Value::Null), value);
            }
        }
    }
}

/// Real Kubernetes client implementation
pub struct KubeClientImpl {
    client: Client,
}

impl KubeClientImpl {
    /// Create a new KubeClientImpl wrapping the given kube Client
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn review_apps(&self, namespace: &str) -> Api<ReviewApp> {
        Api::namespaced(self.client.clone(), namespace)
    }

    async fn patch_finalizers(
        &self,
        namespace: &str,
        name: &str,
        finalizers: Vec<String>,
    ) -> Result<(), Error> {
        let patch = serde_json::json!({
            "metadata": {
                "finalizers": finalizers
            }
        });
        self.review_apps(namespace)
            .patch(
                name,
                &PatchParams::apply(FIELD_MANAGER),
                &Patch::Merge(&patch),
            )
            .await?;
        Ok(())
    }
}

/// `Ok(None)` on 404, the object otherwise
async fn get_opt<K>(api: Api<K>, name: &str) -> Result<Option<K>, Error>
where
    K: kube::Resource + Clone + serde::de::DeserializeOwned + std::fmt::Debug,
{
    match api.get(name).await {
        Ok(obj) => Ok(Some(obj)),
        Err(kube::Error::Api(ae)) if ae.code == 404 => Ok(None),
        Err(e) => Err(e.into()),
    }
}

#[async_trait]
impl KubeClient for KubeClientImpl {
    async fn patch_status(
        &self,
        namespace: &str,
        name: &str,
        patch: &serde_json::Value,
    ) -> Result<(), Error> {
        self.review_apps(namespace)
            .patch_status(name, &PatchParams::apply(FIELD_MANAGER), &Patch::Merge(patch))
            .await?;

        Ok(())
    }

    async fn add_finalizer(&self, namespace: &str, name: &str) -> Result<(), Error> {
        let ra = self.review_apps(namespace).get(name).await?;
        let mut finalizers = ra.metadata.finalizers.unwrap_or_default();

        if finalizers.iter().any(|f| f == REVIEW_APP_FINALIZER) {
            return Ok(());
        }

        finalizers.push(REVIEW_APP_FINALIZER.to_string());
        self.patch_finalizers(namespace, name, finalizers).await
    }

    async fn remove_finalizer(&self, namespace: &str, name: &str) -> Result<(), Error> {
        let ra = match get_opt(self.review_apps(namespace), name).await? {
            Some(ra) => ra,
            None => return Ok(()),
        };
        let finalizers: Vec<String> = ra
            .metadata
            .finalizers
            .unwrap_or_default()
            .into_iter()
            .filter(|f| f != REVIEW_APP_FINALIZER)
            .collect();

        self.patch_finalizers(namespace, name, finalizers).await
    }

    async fn delete_review_app(&self, namespace: &str, name: &str) -> Result<(), Error> {
        match self
            .review_apps(namespace)
            .delete(name, &Default::default())
            .await
        {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(ae)) if ae.code == 404 => {
                debug!(review_app = %name, "ReviewApp not found (already deleted)");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn get_secret_value(
        &self,
        namespace: &str,
        name: &str,
        key: &str,
    ) -> Result<Option<String>, Error> {
        let api: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        let Some(secret) = get_opt(api, name).await? else {
            return Ok(None);
        };

        let Some(bytes) = secret.data.and_then(|mut data| data.remove(key)) else {
            return Ok(None);
        };

        String::from_utf8(bytes.0).map(Some).map_err(|e| {
            Error::serialization_for_kind("Secret", format!("{namespace}/{name}[{key}]: {e}"))
        })
    }

    async fn get_application_template(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<ApplicationTemplate>, Error> {
        get_opt(Api::namespaced(self.client.clone(), namespace), name).await
    }

    async fn get_manifests_template(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<ManifestsTemplate>, Error> {
        get_opt(Api::namespaced(self.client.clone(), namespace), name).await
    }

    async fn get_job_template(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<JobTemplate>, Error> {
        get_opt(Api::namespaced(self.client.clone(), namespace), name).await
    }

    async fn get_application_annotation(
        &self,
        namespace: &str,
        name: &str,
        key: &str,
    ) -> Result<Option<String>, Error> {
        let gvk = GroupVersionKind::gvk(ARGOCD_GROUP, ARGOCD_VERSION, "Application");
        let ar = ApiResource::from_gvk_with_plural(&gvk, "applications");
        let api: Api<DynamicObject> = Api::namespaced_with(self.client.clone(), namespace, &ar);

        let app = match api.get(name).await {
            Ok(app) => app,
            Err(kube::Error::Api(ae)) if ae.code == 404 => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        Ok(app
            .metadata
            .annotations
            .and_then(|mut annotations| annotations.remove(key)))
    }

    async fn create_job(&self, job: &Job) -> Result<Job, Error> {
        let namespace = job
            .metadata
            .namespace
            .as_deref()
            .ok_or_else(|| Error::validation("pre-stop Job has no namespace"))?;
        let api: Api<Job> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.create(&PostParams::default(), job).await?)
    }

    async fn list_jobs(&self, namespace: &str, label_selector: &str) -> Result<Vec<Job>, Error> {
        let api: Api<Job> = Api::namespaced(self.client.clone(), namespace);
        let list = api
            .list(&ListParams::default().labels(label_selector))
            .await?;
        Ok(list.items)
    }
}
