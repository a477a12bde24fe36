//! ReviewApp CRD types
//!
//! One ReviewApp exists per (app repository, pull request). The spec describes
//! where the pull request lives, which templates render its manifests and
//! where they go in the infra repository. The status doubles as the
//! controller's change-detection cache.

use std::collections::BTreeMap;

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::{Error, Variables};

/// Label that selects the candidate variant of every template when present
pub const DEFAULT_CANDIDATE_LABEL: &str = "candidate-template";

// =============================================================================
// Sync status
// =============================================================================

/// Position of a ReviewApp in the reconcile state machine
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum SyncStatus {
    /// Never reconciled
    #[default]
    Unknown,
    /// Pull request resolved, nothing pushed yet
    WatchingAppRepo,
    /// Rendered artifacts differ from what was last pushed
    NeedToUpdateInfraRepo,
    /// Manifests pushed, waiting for the GitOps tool to apply them
    UpdatedInfraRepo,
    /// Steady state
    WatchingAppRepoAndTemplates,
}

impl SyncStatus {
    /// Numeric code exported as a metric value
    pub fn code(&self) -> i64 {
        match self {
            Self::Unknown => 0,
            Self::WatchingAppRepo => 1,
            Self::NeedToUpdateInfraRepo => 2,
            Self::UpdatedInfraRepo => 3,
            Self::WatchingAppRepoAndTemplates => 4,
        }
    }
}

impl std::fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unknown => write!(f, "Unknown"),
            Self::WatchingAppRepo => write!(f, "WatchingAppRepo"),
            Self::NeedToUpdateInfraRepo => write!(f, "NeedToUpdateInfraRepo"),
            Self::UpdatedInfraRepo => write!(f, "UpdatedInfraRepo"),
            Self::WatchingAppRepoAndTemplates => write!(f, "WatchingAppRepoAndTemplates"),
        }
    }
}

// =============================================================================
// Shared references
// =============================================================================

/// Reference to a key within a Secret in the ReviewApp's namespace
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SecretKeyRef {
    /// Secret name
    pub name: String,
    /// Key inside the Secret's data
    pub key: String,
}

/// Git hosting credential: a username plus a token stored in a Secret
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GitCredential {
    /// Secret holding the access token
    pub secret_ref: SecretKeyRef,
}

/// Reference to a template resource
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TemplateRef {
    /// Template name
    pub name: String,
    /// Template namespace, defaults to the ReviewApp's namespace
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}

impl TemplateRef {
    /// Namespace to look the template up in
    pub fn namespace_or<'a>(&'a self, default: &'a str) -> &'a str {
        self.namespace.as_deref().unwrap_or(default)
    }
}

// =============================================================================
// Spec
// =============================================================================

/// Pull request source repository
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AppTarget {
    /// GitHub organization or user
    pub organization: String,
    /// Repository name
    pub repository: String,
    /// Username paired with the token from `gitCredential`
    pub username: String,
    /// Token used for hosting API calls
    pub git_credential: GitCredential,
    /// Pull requests carrying any of these labels are ignored
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ignore_labels: Vec<String>,
    /// Pull requests whose title matches this regular expression are ignored
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ignore_title_exp: Option<String>,
}

/// Behaviour towards the app repository
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AppConfig {
    /// Comment posted on the pull request once the GitOps tool applied it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Post the comment after every update instead of only the first one
    #[serde(default)]
    pub send_message_every_time: bool,
}

/// GitOps infra repository target
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct InfraTarget {
    /// GitHub organization or user
    pub organization: String,
    /// Repository name
    pub repository: String,
    /// Branch that the GitOps tool watches
    pub branch: String,
    /// Username paired with the token from `gitCredential`
    pub username: String,
    /// Token used for cloning and pushing
    pub git_credential: GitCredential,
}

/// Where rendered manifests are written
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ManifestsConfig {
    /// ManifestsTemplates merged in order, later entries win on key collision
    #[serde(default)]
    pub templates: Vec<TemplateRef>,
    /// Destination directory (templated), relative to the repository root
    pub dirpath: String,
}

/// Where the rendered ArgoCD Application is written
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ArgoCdAppConfig {
    /// ApplicationTemplate to render
    pub template: TemplateRef,
    /// Destination file (templated), relative to the repository root
    pub filepath: String,
}

/// Infra repository layout
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct InfraConfig {
    /// Manifests destination
    pub manifests: ManifestsConfig,
    /// Application destination
    pub argocd_app: ArgoCdAppConfig,
}

/// Preview environment for one pull request
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "reviewapp.dev",
    version = "v1alpha1",
    kind = "ReviewApp",
    plural = "reviewapps",
    shortname = "ra",
    namespaced,
    status = "ReviewAppStatus",
    printcolumn = r#"{"name":"PR","type":"integer","jsonPath":".spec.pullRequestNumber"}"#,
    printcolumn = r#"{"name":"Status","type":"string","jsonPath":".status.sync.status"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct ReviewAppSpec {
    /// App repository hosting the pull request
    pub app_target: AppTarget,
    /// App repository behaviour
    #[serde(default)]
    pub app_config: AppConfig,
    /// Infra repository receiving rendered manifests
    pub infra_target: InfraTarget,
    /// Infra repository layout
    pub infra_config: InfraConfig,
    /// JobTemplate run before the ReviewApp is torn down
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pre_stop_job: Option<TemplateRef>,
    /// `key=value` lines exposed as `{{ Variables.key }}`
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub variables: Vec<String>,
    /// Pull request number in the app repository
    pub pull_request_number: u64,
    /// Label that switches templates to their candidate variant
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub candidate_label: Option<String>,
}

impl ReviewAppSpec {
    /// Label selecting candidate templates
    pub fn candidate_label(&self) -> &str {
        self.candidate_label
            .as_deref()
            .unwrap_or(DEFAULT_CANDIDATE_LABEL)
    }

    /// Parse and validate the variable lines
    pub fn parsed_variables(&self) -> Result<Variables, Error> {
        Variables::parse(&self.variables)
    }

    /// Validate the parts of the spec that the schema cannot express
    ///
    /// Returns the parsed variables.
    pub fn validate(&self) -> Result<Variables, Error> {
        let variables = self.parsed_variables()?;
        if let Some(exp) = &self.app_target.ignore_title_exp {
            regex::Regex::new(exp).map_err(|e| {
                Error::validation_for_field(
                    "ReviewApp",
                    "spec.appTarget.ignoreTitleExp",
                    e.to_string(),
                )
            })?;
        }
        if self.infra_config.argocd_app.filepath.trim().is_empty() {
            return Err(Error::validation_for_field(
                "ReviewApp",
                "spec.infraConfig.argocdApp.filepath",
                "must not be empty",
            ));
        }
        Ok(variables)
    }
}

// =============================================================================
// Status
// =============================================================================

/// Sync bookkeeping
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SyncState {
    /// State machine position
    #[serde(default)]
    pub status: SyncStatus,
    /// Name of the ArgoCD Application last pushed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub application_name: Option<String>,
    /// Namespace of the ArgoCD Application last pushed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub application_namespace: Option<String>,
    /// App repository commit the last push was rendered from
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app_repo_latest_commit_sha: Option<String>,
    /// Infra repository HEAD after the last push
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub infra_repo_latest_commit_sha: Option<String>,
    /// Whether the pull request comment has been posted
    #[serde(default)]
    pub already_sent_message: bool,
}

/// Last artifacts pushed to the infra repository
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ManifestsCache {
    /// Rendered ArgoCD Application descriptor
    #[serde(default)]
    pub application: String,
    /// Rendered manifests by file name
    #[serde(default)]
    pub manifests: BTreeMap<String, String>,
}

/// Pull request facts cached to bound hosting API calls
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PullRequestCache {
    /// Pull request number these facts belong to
    #[serde(default)]
    pub number: u64,
    /// Head branch
    pub branch: String,
    /// Head commit
    pub head_sha: String,
    /// Title
    #[serde(default)]
    pub title: String,
    /// Labels
    #[serde(default)]
    pub labels: Vec<String>,
    /// When these facts were fetched (RFC 3339)
    pub synced_at: String,
}

/// Observed state of a ReviewApp
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ReviewAppStatus {
    /// Sync bookkeeping
    #[serde(default)]
    pub sync: SyncState,
    /// Last pushed artifacts
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub manifests_cache: Option<ManifestsCache>,
    /// Cached pull request facts
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pull_request_cache: Option<PullRequestCache>,
    /// Generation last reconciled
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
    /// Human-readable outcome of the last reconcile
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}
