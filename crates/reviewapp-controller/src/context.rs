//! Shared reconciler state

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use kube::Client;

use reviewapp_common::events::{EventPublisher, KubeEventPublisher};
use reviewapp_common::retry::{RetryConfig, INFRA_REPO_RETRY, PULL_REQUEST_RETRY};
use reviewapp_common::template::TemplateEngine;
use reviewapp_common::Error;

use crate::git::{CommandGitRunner, CommitAuthor, GitRunner, InfraRepoWriter};
use crate::github::{GitHubClient, HostingClient, DEFAULT_GITHUB_API_URL};
use crate::kube_client::{KubeClient, KubeClientImpl};
use crate::prestop::PreStopWait;

/// Name the controller reports Events under
pub const CONTROLLER_NAME: &str = "reviewapp-controller";

/// Tunables of the reconciler
#[derive(Clone, Debug)]
pub struct ControllerConfig {
    /// Base URL of the GitHub REST API
    pub github_api_url: String,
    /// Host serving the infra repositories over HTTPS
    pub git_host: String,
    /// Parent of the per-attempt clone directories
    pub scratch_dir: PathBuf,
    /// Author of infra repository commits
    pub commit_author: CommitAuthor,
    /// Budget of the clone/commit/push cycle
    pub infra_retry: RetryConfig,
    /// Budget of the pull request lookup
    pub pull_request_retry: RetryConfig,
    /// Pre-stop Job polling
    pub pre_stop: PreStopWait,
    /// Requeue after a reconcile that needed nothing
    pub steady_requeue: Duration,
    /// Requeue while a credential or template is missing
    pub soft_stop_requeue: Duration,
    /// Requeue after a failed reconcile
    pub error_requeue: Duration,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            github_api_url: DEFAULT_GITHUB_API_URL.to_string(),
            git_host: "github.com".to_string(),
            scratch_dir: std::env::temp_dir().join("reviewapp"),
            commit_author: CommitAuthor::default(),
            infra_retry: INFRA_REPO_RETRY,
            pull_request_retry: PULL_REQUEST_RETRY,
            pre_stop: PreStopWait::default(),
            steady_requeue: Duration::from_secs(30),
            soft_stop_requeue: Duration::from_secs(60),
            error_requeue: Duration::from_secs(30),
        }
    }
}

/// Shared context for the ReviewApp controller
///
/// Use [`ContextBuilder`] to construct instances:
///
/// ```text
/// let ctx = Context::builder(client)
///     .config(config)
///     .build()?;
/// ```
pub struct Context {
    /// Kubernetes client for API operations (trait object for testability)
    pub kube: Arc<dyn KubeClient>,
    /// Git hosting API
    pub hosting: Arc<dyn HostingClient>,
    /// git CLI used by the infra repository writer
    pub git: Arc<dyn GitRunner>,
    /// Event publisher for user-visible failures
    pub events: Arc<dyn EventPublisher>,
    /// Template engine shared by every render
    pub engine: TemplateEngine,
    /// Tunables
    pub config: ControllerConfig,
}

impl Context {
    /// Create a builder for constructing a Context
    pub fn builder(client: Client) -> ContextBuilder {
        ContextBuilder::new(client)
    }

    /// Infra repository writer configured from this context
    pub fn writer(&self) -> InfraRepoWriter {
        InfraRepoWriter::new(
            self.git.clone(),
            self.config.scratch_dir.clone(),
            self.config.git_host.clone(),
            self.config.commit_author.clone(),
        )
        .with_retry(self.config.infra_retry.clone())
    }

    /// Create a context for testing with custom mock clients
    ///
    /// Retry and pre-stop budgets are shrunk to keep tests fast.
    #[cfg(test)]
    pub fn for_testing(
        kube: Arc<dyn KubeClient>,
        hosting: Arc<dyn HostingClient>,
        git: Arc<dyn GitRunner>,
        scratch_dir: PathBuf,
    ) -> Self {
        let fast = RetryConfig {
            max_attempts: 3,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            backoff_multiplier: 2.0,
        };
        Self {
            kube,
            hosting,
            git,
            events: Arc::new(reviewapp_common::events::NoopEventPublisher),
            engine: TemplateEngine::new(),
            config: ControllerConfig {
                scratch_dir,
                infra_retry: fast.clone(),
                pull_request_retry: fast,
                ..Default::default()
            },
        }
    }
}

/// Builder for constructing [`Context`] instances
pub struct ContextBuilder {
    client: Client,
    kube: Option<Arc<dyn KubeClient>>,
    hosting: Option<Arc<dyn HostingClient>>,
    git: Option<Arc<dyn GitRunner>>,
    events: Option<Arc<dyn EventPublisher>>,
    config: ControllerConfig,
}

impl ContextBuilder {
    fn new(client: Client) -> Self {
        Self {
            client,
            kube: None,
            hosting: None,
            git: None,
            events: None,
            config: ControllerConfig::default(),
        }
    }

    /// Set the reconciler tunables
    pub fn config(mut self, config: ControllerConfig) -> Self {
        self.config = config;
        self
    }

    /// Override the Kubernetes client (primarily for testing)
    pub fn kube_client(mut self, kube: Arc<dyn KubeClient>) -> Self {
        self.kube = Some(kube);
        self
    }

    /// Override the hosting API client
    pub fn hosting_client(mut self, hosting: Arc<dyn HostingClient>) -> Self {
        self.hosting = Some(hosting);
        self
    }

    /// Override the git runner
    pub fn git_runner(mut self, git: Arc<dyn GitRunner>) -> Self {
        self.git = Some(git);
        self
    }

    /// Override the event publisher
    pub fn event_publisher(mut self, events: Arc<dyn EventPublisher>) -> Self {
        self.events = Some(events);
        self
    }

    /// Build the Context
    ///
    /// Fails only when the default GitHub client cannot be constructed.
    pub fn build(self) -> Result<Context, Error> {
        let hosting: Arc<dyn HostingClient> = match self.hosting {
            Some(hosting) => hosting,
            None => Arc::new(GitHubClient::new(self.config.github_api_url.clone())?),
        };

        Ok(Context {
            kube: self
                .kube
                .unwrap_or_else(|| Arc::new(KubeClientImpl::new(self.client.clone()))),
            hosting,
            git: self
                .git
                .unwrap_or_else(|| Arc::new(CommandGitRunner::default())),
            events: self.events.unwrap_or_else(|| {
                Arc::new(KubeEventPublisher::new(self.client.clone(), CONTROLLER_NAME))
            }),
            engine: TemplateEngine::new(),
            config: self.config,
        })
    }
}
