//! Common types for the Review App operator: CRDs, errors, templating and utilities

#![deny(missing_docs)]

pub mod crd;
pub mod error;
pub mod events;
pub mod metrics;
pub mod retry;
pub mod telemetry;
pub mod template;
pub mod variables;

pub use error::Error;
pub use variables::Variables;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Finalizer guarding infra-repo cleanup of a ReviewApp
pub const REVIEW_APP_FINALIZER: &str = "reviewapp.dev/cleanup";

/// Label stamped on pre-stop Jobs, value is the owning ReviewApp's name
pub const REVIEW_APP_LABEL_KEY: &str = "reviewapp.dev/review-app";

/// Label stamped on pre-stop Jobs, value is the owning ReviewApp's uid
pub const REVIEW_APP_UID_LABEL_KEY: &str = "reviewapp.dev/review-app-uid";

/// Field manager used for status and finalizer patches
pub const FIELD_MANAGER: &str = "reviewapp-controller";

/// Annotation keys written into the ArgoCD Application pushed to the infra repo.
///
/// ArgoCD copies them onto the live Application resource once it has synced,
/// which is how the controller learns that a given app-repo commit is deployed.
pub mod annotations {
    /// App repository organization
    pub const APP_ORGANIZATION: &str = "reviewapp.dev/app-organization";
    /// App repository name
    pub const APP_REPOSITORY: &str = "reviewapp.dev/app-repository";
    /// App repository commit the pushed manifests were rendered from
    pub const APP_COMMIT_SHA: &str = "reviewapp.dev/app-commit-sha";
}
