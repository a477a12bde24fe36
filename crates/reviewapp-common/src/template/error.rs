//! Template error types

use std::fmt;

/// Stage of a structured (serialize → render → parse) rendering pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoundTripStage {
    /// Typed value could not be serialized to YAML text
    Serialize,
    /// Rendered YAML text could not be parsed back into the typed value
    Parse,
}

impl fmt::Display for RoundTripStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Serialize => write!(f, "serialize"),
            Self::Parse => write!(f, "parse"),
        }
    }
}

/// Errors that can occur during template operations
#[derive(Debug)]
pub enum TemplateError {
    /// Template syntax is invalid or rendering failed
    Render(minijinja::Error),
    /// Structured value did not survive the YAML round trip
    RoundTrip {
        /// Which side of the round trip failed
        stage: RoundTripStage,
        /// Underlying serde message
        message: String,
    },
}

impl fmt::Display for TemplateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Render(e) => write!(f, "template render error: {}", e),
            Self::RoundTrip { stage, message } => {
                write!(f, "structured template {} failed: {}", stage, message)
            }
        }
    }
}

impl std::error::Error for TemplateError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Render(e) => Some(e),
            Self::RoundTrip { .. } => None,
        }
    }
}

impl From<minijinja::Error> for TemplateError {
    fn from(err: minijinja::Error) -> Self {
        Self::Render(err)
    }
}
