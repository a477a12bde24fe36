//! Custom Resource Definitions for the Review App operator
//!
//! - [`ReviewApp`] - one preview environment per pull request
//! - [`ApplicationTemplate`] - ArgoCD Application descriptor template
//! - [`ManifestsTemplate`] - named manifest bodies
//! - [`JobTemplate`] - optional pre-stop Job

mod review_app;
mod templates;

pub use review_app::{
    AppConfig, AppTarget, ArgoCdAppConfig, GitCredential, InfraConfig, InfraTarget,
    ManifestsCache, ManifestsConfig, PullRequestCache, ReviewApp, ReviewAppSpec, ReviewAppStatus,
    SecretKeyRef, SyncState, SyncStatus, TemplateRef, DEFAULT_CANDIDATE_LABEL,
};
pub use templates::{
    merge_manifests, ApplicationTemplate, ApplicationTemplateSpec, JobTemplate, JobTemplateSpec,
    ManifestsTemplate, ManifestsTemplateSpec, TemplateVariant,
};
