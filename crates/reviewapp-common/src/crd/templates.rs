//! Template CRDs: ApplicationTemplate, ManifestsTemplate and JobTemplate
//!
//! Every template carries a `stable` variant and an optional `candidate`
//! variant. A pull request labelled with the ReviewApp's candidate label
//! renders the candidate variant; without one, stable is used.

use std::collections::BTreeMap;

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Which variant of a template to render
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TemplateVariant {
    /// Default variant
    Stable,
    /// Variant for pull requests carrying the candidate label
    Candidate,
}

impl TemplateVariant {
    /// Select the variant for a pull request
    pub fn select(is_candidate: bool) -> Self {
        if is_candidate {
            Self::Candidate
        } else {
            Self::Stable
        }
    }
}

/// ArgoCD Application descriptor template
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "reviewapp.dev",
    version = "v1alpha1",
    kind = "ApplicationTemplate",
    plural = "applicationtemplates",
    shortname = "at",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationTemplateSpec {
    /// Stable descriptor body
    pub stable: String,
    /// Candidate descriptor body
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub candidate: Option<String>,
}

impl ApplicationTemplateSpec {
    /// Body for the given variant, falling back to stable
    pub fn body(&self, variant: TemplateVariant) -> &str {
        match (variant, &self.candidate) {
            (TemplateVariant::Candidate, Some(candidate)) => candidate,
            _ => &self.stable,
        }
    }
}

/// Named manifest bodies template
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "reviewapp.dev",
    version = "v1alpha1",
    kind = "ManifestsTemplate",
    plural = "manifeststemplates",
    shortname = "mt",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct ManifestsTemplateSpec {
    /// Stable manifests by file name
    #[serde(default)]
    pub stable: BTreeMap<String, String>,
    /// Candidate manifests by file name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub candidate: Option<BTreeMap<String, String>>,
}

impl ManifestsTemplateSpec {
    /// Manifests for the given variant, falling back to stable
    pub fn manifests(&self, variant: TemplateVariant) -> &BTreeMap<String, String> {
        match (variant, &self.candidate) {
            (TemplateVariant::Candidate, Some(candidate)) => candidate,
            _ => &self.stable,
        }
    }
}

/// Merge manifests from several templates.
///
/// Later templates overwrite earlier ones on key collision. An empty input
/// produces an empty map.
pub fn merge_manifests<'a, I>(maps: I) -> BTreeMap<String, String>
where
    I: IntoIterator<Item = &'a BTreeMap<String, String>>,
{
    let mut merged = BTreeMap::new();
    for map in maps {
        for (key, body) in map {
            merged.insert(key.clone(), body.clone());
        }
    }
    merged
}

/// Pre-stop Job descriptor template
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "reviewapp.dev",
    version = "v1alpha1",
    kind = "JobTemplate",
    plural = "jobtemplates",
    shortname = "jt",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct JobTemplateSpec {
    /// Stable Job body (YAML)
    pub stable: String,
    /// Candidate Job body (YAML)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub candidate: Option<String>,
}

impl JobTemplateSpec {
    /// Body for the given variant, falling back to stable
    pub fn body(&self, variant: TemplateVariant) -> &str {
        match (variant, &self.candidate) {
            (TemplateVariant::Candidate, Some(candidate)) => candidate,
            _ => &self.stable,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map(entries: &[(&str, &str)]) -> BTreeMap<String, String> {
        entries
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn candidate_falls_back_to_stable() {
        let spec = ApplicationTemplateSpec {
            stable: "stable".to_string(),
            candidate: None,
        };
        assert_eq!(spec.body(TemplateVariant::Candidate), "stable");

        let spec = ApplicationTemplateSpec {
            stable: "stable".to_string(),
            candidate: Some("next".to_string()),
        };
        assert_eq!(spec.body(TemplateVariant::Candidate), "next");
        assert_eq!(spec.body(TemplateVariant::Stable), "stable");
    }

    #[test]
    fn later_templates_override_earlier_keys() {
        let base = map(&[("deploy.yaml", "v1"), ("svc.yaml", "svc")]);
        let overlay = map(&[("deploy.yaml", "v2"), ("ing.yaml", "ing")]);
        let merged = merge_manifests([&base, &overlay]);
        assert_eq!(merged.len(), 3);
        assert_eq!(merged["deploy.yaml"], "v2");
        assert_eq!(merged["svc.yaml"], "svc");
    }

    #[test]
    fn merging_empty_templates_is_empty() {
        let empty = ManifestsTemplateSpec::default();
        let merged = merge_manifests([empty.manifests(TemplateVariant::Candidate)]);
        assert!(merged.is_empty());
        assert!(merge_manifests(std::iter::empty()).is_empty());
    }
}
