//! ReviewApp reconciliation
//!
//! Turns an open pull request into manifests in a GitOps infra repository:
//! resolve the pull request, render templates, detect changes against the last
//! push, write to the infra repository, wait for ArgoCD to apply, then comment
//! on the pull request. Deletion runs an optional pre-stop Job and removes the
//! pushed files.

#![deny(missing_docs)]

pub mod context;
pub mod controller;
pub mod fingerprint;
pub mod git;
pub mod github;
pub mod kube_client;
pub mod notify;
pub mod phases;
pub mod prestop;
pub mod pull_request;
pub mod render;

pub use context::{Context, ContextBuilder, ControllerConfig};
pub use controller::{error_policy, reconcile};
