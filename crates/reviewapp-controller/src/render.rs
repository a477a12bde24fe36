//! Template rendering for a resolved pull request
//!
//! Produces the ArgoCD Application descriptor, the merged manifest map and
//! the pre-stop Job from the template resources, plus the rendered copies of
//! `appConfig` and `infraConfig`.

use std::collections::BTreeMap;

use k8s_openapi::api::batch::v1::Job;
use serde_yaml::{Mapping, Value};

use reviewapp_common::crd::{
    merge_manifests, AppConfig, ApplicationTemplateSpec, InfraConfig, JobTemplateSpec,
    ManifestsTemplateSpec, ReviewAppSpec, TemplateVariant,
};
use reviewapp_common::template::{InfraRepoContext, TemplateContext, TemplateEngine};
use reviewapp_common::{
    annotations, Error, Variables, REVIEW_APP_LABEL_KEY, REVIEW_APP_UID_LABEL_KEY,
};

use crate::pull_request::PullRequest;

/// Namespace assumed for an Application descriptor without one
pub const DEFAULT_APPLICATION_NAMESPACE: &str = "argocd";

/// Name and namespace of a rendered ArgoCD Application
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ApplicationIdentity {
    /// `metadata.name`
    pub name: String,
    /// `metadata.namespace`, defaulted to [`DEFAULT_APPLICATION_NAMESPACE`]
    pub namespace: String,
}

/// Everything a reconcile renders before deciding whether to push
#[derive(Clone, Debug, PartialEq)]
pub struct RenderedConfig {
    /// `appConfig` with placeholders resolved
    pub app_config: AppConfig,
    /// `infraConfig` with placeholders resolved
    pub infra_config: InfraConfig,
}

/// Build the template context for a pull request
pub fn template_context(
    spec: &ReviewAppSpec,
    pr: &PullRequest,
    variables: Variables,
) -> TemplateContext {
    TemplateContext::new(
        pr.app_repo_context(),
        InfraRepoContext {
            organization: spec.infra_target.organization.clone(),
            repository: spec.infra_target.repository.clone(),
            branch: spec.infra_target.branch.clone(),
        },
        variables,
    )
}

/// Render the `appConfig` and `infraConfig` sub-trees
pub fn render_config(
    engine: &TemplateEngine,
    spec: &ReviewAppSpec,
    ctx: &TemplateContext,
) -> Result<RenderedConfig, Error> {
    let app_config = engine
        .render_structured(&spec.app_config, ctx)
        .map_err(|e| Error::template("spec.appConfig", e))?;
    let infra_config = engine
        .render_structured(&spec.infra_config, ctx)
        .map_err(|e| Error::template("spec.infraConfig", e))?;
    Ok(RenderedConfig {
        app_config,
        infra_config,
    })
}

/// Render the ArgoCD Application descriptor
pub fn render_application(
    engine: &TemplateEngine,
    template: &ApplicationTemplateSpec,
    variant: TemplateVariant,
    ctx: &TemplateContext,
) -> Result<String, Error> {
    engine
        .render(template.body(variant), ctx)
        .map_err(|e| Error::template("ApplicationTemplate", e))
}

/// Merge and render manifest templates
///
/// Later templates override earlier keys. One failing body fails the whole map.
pub fn render_manifests(
    engine: &TemplateEngine,
    templates: &[ManifestsTemplateSpec],
    variant: TemplateVariant,
    ctx: &TemplateContext,
) -> Result<BTreeMap<String, String>, Error> {
    let merged = merge_manifests(templates.iter().map(|t| t.manifests(variant)));
    merged
        .into_iter()
        .map(|(key, body)| {
            let rendered = engine
                .render(&body, ctx)
                .map_err(|e| Error::template(format!("ManifestsTemplate[{key}]"), e))?;
            Ok((key, rendered))
        })
        .collect()
}

/// ReviewApp a pre-stop Job is rendered for
#[derive(Clone, Copy, Debug)]
pub struct JobOwner<'a> {
    /// ReviewApp name
    pub name: &'a str,
    /// ReviewApp uid, distinguishes a recreated ReviewApp of the same name
    pub uid: &'a str,
    /// Namespace used when the template sets none
    pub namespace: &'a str,
}

impl JobOwner<'_> {
    /// Label selector matching the Jobs of this owner only
    pub fn selector(&self) -> String {
        format!(
            "{REVIEW_APP_LABEL_KEY}={},{REVIEW_APP_UID_LABEL_KEY}={}",
            self.name, self.uid
        )
    }
}

/// Render the pre-stop Job
///
/// The Job is labelled with the owning ReviewApp's name and uid, placed in
/// the owner's namespace unless the template sets one, and given a
/// `generateName` when the template leaves it unnamed.
pub fn render_job(
    engine: &TemplateEngine,
    template: &JobTemplateSpec,
    variant: TemplateVariant,
    ctx: &TemplateContext,
    owner: JobOwner<'_>,
) -> Result<Job, Error> {
    let body = engine
        .render(template.body(variant), ctx)
        .map_err(|e| Error::template("JobTemplate", e))?;
    let mut job: Job = serde_yaml::from_str(&body)
        .map_err(|e| Error::serialization_for_kind("Job", e.to_string()))?;

    let meta = &mut job.metadata;
    let labels = meta.labels.get_or_insert_with(BTreeMap::new);
    labels.insert(REVIEW_APP_LABEL_KEY.to_string(), owner.name.to_string());
    labels.insert(REVIEW_APP_UID_LABEL_KEY.to_string(), owner.uid.to_string());
    if meta.namespace.is_none() {
        meta.namespace = Some(owner.namespace.to_string());
    }
    if meta.name.is_none() && meta.generate_name.is_none() {
        meta.generate_name = Some(format!("{}-prestop-", owner.name));
    }
    Ok(job)
}

fn parse_mapping(descriptor: &str) -> Result<Mapping, Error> {
    match serde_yaml::from_str::<Value>(descriptor) {
        Ok(Value::Mapping(m)) => Ok(m),
        Ok(_) => Err(Error::serialization_for_kind(
            "Application",
            "descriptor is not a YAML mapping",
        )),
        Err(e) => Err(Error::serialization_for_kind("Application", e.to_string())),
    }
}

/// Extract `metadata.name` and `metadata.namespace` from a rendered descriptor
pub fn application_identity(descriptor: &str) -> Result<ApplicationIdentity, Error> {
    let doc = parse_mapping(descriptor)?;
    let metadata = doc.get("metadata");
    let field = |key: &str| {
        metadata
            .and_then(|m| m.get(key))
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    };

    let name = field("name").ok_or_else(|| {
        Error::validation_for_field(
            "ApplicationTemplate",
            "metadata.name",
            "rendered Application has no name",
        )
    })?;
    Ok(ApplicationIdentity {
        name,
        namespace: field("namespace")
            .unwrap_or_else(|| DEFAULT_APPLICATION_NAMESPACE.to_string()),
    })
}

/// Stamp the app repository annotations onto a rendered descriptor
///
/// ArgoCD carries them onto the live Application, which is how a sync of a
/// given commit is observed later.
pub fn annotate_application(descriptor: &str, pr: &PullRequest) -> Result<String, Error> {
    let mut doc = parse_mapping(descriptor)?;

    let metadata = doc
        .entry(Value::from("metadata"))
        .or_insert_with(|| Value::Mapping(Mapping::new()));
    let Value::Mapping(metadata) = metadata else {
        return Err(Error::serialization_for_kind(
            "Application",
            "metadata is not a mapping",
        ));
    };

    let annotations_value = metadata
        .entry(Value::from("annotations"))
        .or_insert_with(|| Value::Mapping(Mapping::new()));
    if annotations_value.is_null() {
        *annotations_value = Value::Mapping(Mapping::new());
    }
    let Value::Mapping(ann) = annotations_value else {
        return Err(Error::serialization_for_kind(
            "Application",
            "metadata.annotations is not a mapping",
        ));
    };

    ann.insert(
        Value::from(annotations::APP_ORGANIZATION),
        Value::from(pr.organization.as_str()),
    );
    ann.insert(
        Value::from(annotations::APP_REPOSITORY),
        Value::from(pr.repository.as_str()),
    );
    ann.insert(
        Value::from(annotations::APP_COMMIT_SHA),
        Value::from(pr.head_sha.as_str()),
    );

    serde_yaml::to_string(&doc).map_err(|e| Error::serialization_for_kind("Application", e.to_string()))
}
