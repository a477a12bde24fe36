//! Error types for the Review App operator
//!
//! Errors are structured with fields to aid debugging in production. The
//! variants follow the failure taxonomy of the reconciler: Kubernetes API
//! failures, configuration mistakes that a human must fix (validation,
//! templating, serialization), transient remote failures (git, hosting API)
//! and missing credentials that resolve themselves once a Secret appears.

use thiserror::Error;

use crate::template::TemplateError;

/// Default context value when no specific context is available
pub const UNKNOWN_CONTEXT: &str = "unknown";

/// Main error type for Review App operations
#[derive(Debug, Error)]
pub enum Error {
    /// Kubernetes API error
    #[error("kubernetes error: {source}")]
    Kube {
        /// The underlying kube-rs error
        #[from]
        source: kube::Error,
    },

    /// Invalid ReviewApp or template configuration
    #[error("validation error for {resource}: {message}")]
    Validation {
        /// Name of the resource with invalid configuration
        resource: String,
        /// Description of what's invalid
        message: String,
        /// The invalid field path (e.g., "spec.variables")
        field: Option<String>,
    },

    /// Template rendering failed
    #[error("template error [{context}]: {source}")]
    Template {
        /// What was being rendered (e.g., "application", "manifests/app.yaml")
        context: String,
        /// The underlying template error
        source: TemplateError,
    },

    /// Serialization/deserialization error
    #[error("serialization error: {message}")]
    Serialization {
        /// Description of what failed
        message: String,
        /// The resource kind being serialized (if known)
        kind: Option<String>,
    },

    /// Local git operation against the infra repository failed
    #[error("git error [{operation}]: {message}")]
    Git {
        /// Git sub-command or step that failed (clone, push, ...)
        operation: String,
        /// Description of what failed (usually stderr)
        message: String,
    },

    /// Git hosting API error
    #[error("hosting API error: {message}")]
    Hosting {
        /// Description of what failed
        message: String,
        /// HTTP status code, if the request got a response
        status: Option<u16>,
    },

    /// Credential Secret or key is absent
    #[error("missing credential {namespace}/{name} (key {key})")]
    MissingCredential {
        /// Namespace of the referenced Secret
        namespace: String,
        /// Name of the referenced Secret
        name: String,
        /// Key inside the Secret
        key: String,
    },
}

impl Error {
    /// Create a validation error with the given message
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            resource: UNKNOWN_CONTEXT.to_string(),
            message: msg.into(),
            field: None,
        }
    }

    /// Create a validation error with resource context and field path
    pub fn validation_for_field(
        resource: impl Into<String>,
        field: impl Into<String>,
        msg: impl Into<String>,
    ) -> Self {
        Self::Validation {
            resource: resource.into(),
            message: msg.into(),
            field: Some(field.into()),
        }
    }

    /// Create a template error for the named rendering target
    pub fn template(context: impl Into<String>, source: TemplateError) -> Self {
        Self::Template {
            context: context.into(),
            source,
        }
    }

    /// Create a serialization error with resource kind context
    pub fn serialization_for_kind(kind: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
            kind: Some(kind.into()),
        }
    }

    /// Create a git error for the given operation
    pub fn git(operation: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Git {
            operation: operation.into(),
            message: msg.into(),
        }
    }

    /// Create a hosting API error
    pub fn hosting(msg: impl Into<String>, status: Option<u16>) -> Self {
        Self::Hosting {
            message: msg.into(),
            status,
        }
    }

    /// Create a missing credential error
    pub fn missing_credential(
        namespace: impl Into<String>,
        name: impl Into<String>,
        key: impl Into<String>,
    ) -> Self {
        Self::MissingCredential {
            namespace: namespace.into(),
            name: name.into(),
            key: key.into(),
        }
    }

    /// Check if this error is retryable
    ///
    /// Validation, template and serialization errors are not retryable
    /// (they require a template or spec fix). Git and hosting errors are.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Kube { source } => !matches!(
                source,
                kube::Error::Api(ae) if (400..500).contains(&ae.code)
            ),
            Error::Validation { .. } => false,
            Error::Template { .. } => false,
            Error::Serialization { .. } => false,
            Error::Git { .. } => true,
            Error::Hosting { status, .. } => !matches!(status, Some(400..=499)),
            Error::MissingCredential { .. } => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_errors_are_not_retried() {
        let err = Error::validation_for_field("my-ra", "spec.variables", "line 2 has no '='");
        assert!(!err.is_retryable());
        assert!(err.to_string().contains("my-ra"));
        match &err {
            Error::Validation { field, .. } => assert_eq!(field.as_deref(), Some("spec.variables")),
            _ => panic!("Expected Validation variant"),
        }
    }

    #[test]
    fn git_errors_are_retryable_and_carry_operation() {
        let err = Error::git("push", "rejected: fetch first");
        assert!(err.is_retryable());
        assert!(err.to_string().contains("[push]"));
    }

    #[test]
    fn hosting_client_errors_are_permanent() {
        assert!(!Error::hosting("bad credentials", Some(401)).is_retryable());
        assert!(Error::hosting("bad gateway", Some(502)).is_retryable());
        assert!(Error::hosting("connection reset", None).is_retryable());
    }

    #[test]
    fn missing_credential_names_secret() {
        let err = Error::missing_credential("apps", "github-token", "token");
        assert!(err.to_string().contains("apps/github-token"));
        assert!(!err.is_retryable());
    }
}
