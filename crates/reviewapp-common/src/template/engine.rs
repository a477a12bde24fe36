//! Template engine for ReviewApp templates
//!
//! Uses minijinja with its default syntax (`{{ ... }}` variables,
//! `{% ... %}` blocks) and chainable undefined handling so that
//! `{{ Variables.missing }}` renders as an empty string.

use minijinja::{Environment, UndefinedBehavior};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_yaml::Value;

use super::context::TemplateContext;
use super::error::{RoundTripStage, TemplateError};

/// Template engine used for application, manifest, job and config rendering
pub struct TemplateEngine {
    env: Environment<'static>,
}

impl Default for TemplateEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl TemplateEngine {
    /// Create a new template engine
    pub fn new() -> Self {
        let mut env = Environment::new();
        env.set_undefined_behavior(UndefinedBehavior::Chainable);
        // Manifest bodies are written to files verbatim
        env.set_keep_trailing_newline(true);
        Self { env }
    }

    /// Render a template string with the given context
    ///
    /// # Errors
    ///
    /// Returns `TemplateError::Render` if the template syntax is invalid or a
    /// filter/expression fails to evaluate.
    pub fn render(&self, template: &str, ctx: &TemplateContext) -> Result<String, TemplateError> {
        self.env
            .render_str(template, ctx.to_value())
            .map_err(TemplateError::from)
    }

    /// Render every string inside a structured value.
    ///
    /// The value is converted to a YAML tree and each string scalar holding
    /// template syntax is rendered on its own, so rendered text is never
    /// re-parsed as YAML. Converting in and out of the tree reports its own
    /// [`TemplateError::RoundTrip`] stage.
    pub fn render_structured<T>(&self, value: &T, ctx: &TemplateContext) -> Result<T, TemplateError>
    where
        T: Serialize + DeserializeOwned,
    {
        let mut tree = serde_yaml::to_value(value).map_err(|e| TemplateError::RoundTrip {
            stage: RoundTripStage::Serialize,
            message: e.to_string(),
        })?;
        self.render_scalars(&mut tree, ctx)?;
        serde_yaml::from_value(tree).map_err(|e| TemplateError::RoundTrip {
            stage: RoundTripStage::Parse,
            message: e.to_string(),
        })
    }

    fn render_scalars(&self, value: &mut Value, ctx: &TemplateContext) -> Result<(), TemplateError> {
        match value {
            Value::String(s) if Self::has_template_syntax(s) => *s = self.render(s, ctx)?,
            Value::Sequence(items) => {
                for item in items {
                    self.render_scalars(item, ctx)?;
                }
            }
            Value::Mapping(map) => {
                for (_, item) in map.iter_mut() {
                    self.render_scalars(item, ctx)?;
                }
            }
            Value::Tagged(tagged) => self.render_scalars(&mut tagged.value, ctx)?,
            _ => {}
        }
        Ok(())
    }

    /// Check if a string contains any template syntax
    pub fn has_template_syntax(s: &str) -> bool {
        s.contains("{{") || s.contains("{%") || s.contains("{#")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::template::{AppRepoContext, InfraRepoContext};
    use crate::variables::Variables;
    use serde::Deserialize;

    fn ctx() -> TemplateContext {
        TemplateContext::new(
            AppRepoContext {
                organization: "acme".to_string(),
                repository: "shop".to_string(),
                pr_number: 42,
                branch: "feature/cart".to_string(),
                latest_commit_sha: "0123abcd".to_string(),
            },
            InfraRepoContext {
                organization: "acme".to_string(),
                repository: "infra".to_string(),
                branch: "main".to_string(),
            },
            Variables::parse(&["image=registry/shop", "replicas = 2"]).unwrap(),
        )
    }

    #[test]
    fn test_renders_pull_request_fields() {
        let engine = TemplateEngine::new();
        let out = engine
            .render(
                "{{ AppRepo.Organization }}/{{ AppRepo.Repository }}#{{ AppRepo.PrNumber }}@{{ AppRepo.LatestCommitSha }}",
                &ctx(),
            )
            .unwrap();
        assert_eq!(out, "acme/shop#42@0123abcd");
    }

    #[test]
    fn test_renders_infra_and_variables() {
        let engine = TemplateEngine::new();
        let out = engine
            .render(
                "{{ InfraRepo.Repository }}:{{ InfraRepo.Branch }} {{ Variables.image }} x{{ Variables.replicas }}",
                &ctx(),
            )
            .unwrap();
        assert_eq!(out, "infra:main registry/shop x2");
    }

    #[test]
    fn test_missing_variable_renders_empty() {
        let engine = TemplateEngine::new();
        let out = engine
            .render("tag=[{{ Variables.tag }}] deep=[{{ Variables.a.b }}]", &ctx())
            .unwrap();
        assert_eq!(out, "tag=[] deep=[]");
    }

    #[test]
    fn test_invalid_syntax_fails() {
        let engine = TemplateEngine::new();
        let err = engine.render("{{ AppRepo.Branch ", &ctx()).unwrap_err();
        assert!(matches!(err, TemplateError::Render(_)));
    }

    #[test]
    fn test_trailing_newline_is_kept() {
        let engine = TemplateEngine::new();
        let out = engine.render("kind: ConfigMap\n", &ctx()).unwrap();
        assert_eq!(out, "kind: ConfigMap\n");
    }

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Destination {
        dirpath: String,
        enabled: bool,
    }

    #[test]
    fn test_render_structured_round_trip() {
        let engine = TemplateEngine::new();
        let value = Destination {
            dirpath: "overlays/pr-{{ AppRepo.PrNumber }}".to_string(),
            enabled: true,
        };
        let rendered = engine.render_structured(&value, &ctx()).unwrap();
        assert_eq!(rendered.dirpath, "overlays/pr-42");
        assert!(rendered.enabled);
    }

    #[test]
    fn test_render_structured_surfaces_syntax_errors() {
        let engine = TemplateEngine::new();
        let value = Destination {
            dirpath: "overlays/{{ AppRepo.PrNumber".to_string(),
            enabled: false,
        };
        let err = engine.render_structured(&value, &ctx()).unwrap_err();
        assert!(matches!(err, TemplateError::Render(_)));
    }

    #[test]
    fn test_render_structured_keeps_yaml_syntax_in_values() {
        let engine = TemplateEngine::new();
        let ctx = TemplateContext::new(
            ctx().app_repo,
            ctx().infra_repo,
            Variables::parse(&["dir=team #7", "note=owner: web", "quote=it's"]).unwrap(),
        );
        let value = Destination {
            dirpath: "previews/{{ Variables.dir }}/{{ Variables.note }}/{{ Variables.quote }}"
                .to_string(),
            enabled: true,
        };

        let rendered = engine.render_structured(&value, &ctx).unwrap();
        assert_eq!(rendered.dirpath, "previews/team #7/owner: web/it's");
        assert!(rendered.enabled);
    }

    #[test]
    fn test_render_structured_leaves_plain_strings_alone() {
        let engine = TemplateEngine::new();
        let value = Destination {
            dirpath: "yes".to_string(),
            enabled: false,
        };
        let rendered = engine.render_structured(&value, &ctx()).unwrap();
        assert_eq!(rendered, value);
    }

    #[test]
    fn test_has_template_syntax() {
        assert!(TemplateEngine::has_template_syntax("{{ AppRepo.Branch }}"));
        assert!(!TemplateEngine::has_template_syntax("plain"));
    }
}
