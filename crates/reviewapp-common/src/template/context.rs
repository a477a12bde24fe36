//! Template context for ReviewApp rendering

use std::collections::BTreeMap;

use minijinja::Value;

use crate::variables::Variables;

/// Pull request facts available as `{{ AppRepo.* }}`
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AppRepoContext {
    /// `{{ AppRepo.Organization }}`
    pub organization: String,
    /// `{{ AppRepo.Repository }}`
    pub repository: String,
    /// `{{ AppRepo.PrNumber }}`
    pub pr_number: u64,
    /// `{{ AppRepo.Branch }}` - head branch of the pull request
    pub branch: String,
    /// `{{ AppRepo.LatestCommitSha }}`
    pub latest_commit_sha: String,
}

/// Infra repository facts available as `{{ InfraRepo.* }}`
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InfraRepoContext {
    /// `{{ InfraRepo.Organization }}`
    pub organization: String,
    /// `{{ InfraRepo.Repository }}`
    pub repository: String,
    /// `{{ InfraRepo.Branch }}`
    pub branch: String,
}

/// Template context containing all values available for placeholder resolution
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TemplateContext {
    /// Pull request facts
    pub app_repo: AppRepoContext,
    /// Infra repository target
    pub infra_repo: InfraRepoContext,
    /// Free-form `key=value` variables from the ReviewApp
    pub variables: Variables,
}

impl TemplateContext {
    /// Create a context from its three parts
    pub fn new(app_repo: AppRepoContext, infra_repo: InfraRepoContext, variables: Variables) -> Self {
        Self {
            app_repo,
            infra_repo,
            variables,
        }
    }

    /// Convert to minijinja Value for rendering
    pub fn to_value(&self) -> Value {
        let mut app = BTreeMap::new();
        app.insert("Organization", Value::from(self.app_repo.organization.clone()));
        app.insert("Repository", Value::from(self.app_repo.repository.clone()));
        app.insert("PrNumber", Value::from(self.app_repo.pr_number));
        app.insert("Branch", Value::from(self.app_repo.branch.clone()));
        app.insert(
            "LatestCommitSha",
            Value::from(self.app_repo.latest_commit_sha.clone()),
        );

        let mut infra = BTreeMap::new();
        infra.insert("Organization", Value::from(self.infra_repo.organization.clone()));
        infra.insert("Repository", Value::from(self.infra_repo.repository.clone()));
        infra.insert("Branch", Value::from(self.infra_repo.branch.clone()));

        let variables: BTreeMap<String, Value> = self
            .variables
            .iter()
            .map(|(k, v)| (k.to_string(), Value::from(v.to_string())))
            .collect();

        let mut root = BTreeMap::new();
        root.insert("AppRepo", Value::from_iter(app));
        root.insert("InfraRepo", Value::from_iter(infra));
        root.insert("Variables", Value::from_iter(variables));
        Value::from_iter(root)
    }
}
