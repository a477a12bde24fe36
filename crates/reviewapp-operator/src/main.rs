//! Review App operator - pull request previews through a GitOps infra repository

mod controller_runner;
mod server;
mod startup;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{ArgAction, Args, Parser, Subcommand};
use kube::Client;

use reviewapp_common::telemetry::{init_telemetry, TelemetryConfig};
use reviewapp_controller::git::CommitAuthor;
use reviewapp_controller::github::DEFAULT_GITHUB_API_URL;
use reviewapp_controller::{Context, ControllerConfig};

/// Review App - deploys every pull request as an ArgoCD Application
#[derive(Parser, Debug)]
#[command(name = "reviewapp-operator", version, about, long_about = None)]
struct Cli {
    /// Generate CRD manifests and exit
    #[arg(long)]
    crd: bool,

    #[command(flatten)]
    operator: OperatorArgs,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run as controller (default mode)
    ///
    /// Watches ReviewApps, pushes rendered manifests to their infra
    /// repositories and comments on pull requests once ArgoCD applied them.
    Controller,
}

#[derive(Args, Debug, Clone)]
struct OperatorArgs {
    /// Base URL of the GitHub REST API
    #[arg(long, env = "REVIEWAPP_GITHUB_API_URL", default_value = DEFAULT_GITHUB_API_URL, global = true)]
    github_api_url: String,

    /// Host the infra repositories are cloned from
    #[arg(long, env = "REVIEWAPP_GIT_HOST", default_value = "github.com", global = true)]
    git_host: String,

    /// Directory for temporary infra repository clones
    #[arg(long, env = "REVIEWAPP_SCRATCH_DIR", global = true)]
    scratch_dir: Option<PathBuf>,

    /// Commit author name for infra repository commits
    #[arg(long, env = "REVIEWAPP_GIT_AUTHOR_NAME", global = true)]
    git_author_name: Option<String>,

    /// Commit author email for infra repository commits
    #[arg(long, env = "REVIEWAPP_GIT_AUTHOR_EMAIL", global = true)]
    git_author_email: Option<String>,

    /// Only watch ReviewApps in this namespace
    #[arg(long, env = "REVIEWAPP_WATCH_NAMESPACE", global = true)]
    namespace: Option<String>,

    /// Address of the health and metrics server
    #[arg(long, env = "REVIEWAPP_LISTEN_ADDR", default_value = "0.0.0.0:8080", global = true)]
    listen_addr: SocketAddr,

    /// Emit JSON log lines
    #[arg(long, env = "REVIEWAPP_LOG_JSON", default_value_t = true, action = ArgAction::Set, global = true)]
    log_json: bool,

    /// Do not install CRDs on startup
    #[arg(long, env = "REVIEWAPP_SKIP_CRD_INSTALL", global = true)]
    skip_crd_install: bool,
}

impl OperatorArgs {
    fn controller_config(&self) -> ControllerConfig {
        let defaults = ControllerConfig::default();
        let author = CommitAuthor::default();
        ControllerConfig {
            github_api_url: self.github_api_url.clone(),
            git_host: self.git_host.clone(),
            scratch_dir: self.scratch_dir.clone().unwrap_or(defaults.scratch_dir.clone()),
            commit_author: CommitAuthor {
                name: self.git_author_name.clone().unwrap_or(author.name),
                email: self.git_author_email.clone().unwrap_or(author.email),
            },
            ..defaults
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if cli.crd {
        print!("{}", startup::crd_manifests()?);
        return Ok(());
    }

    init_telemetry(TelemetryConfig {
        json: cli.operator.log_json,
        ..TelemetryConfig::default()
    })
    .map_err(|e| anyhow::anyhow!("Failed to initialize telemetry: {}", e))?;

    if rustls::crypto::ring::default_provider()
        .install_default()
        .is_err()
    {
        return Err(anyhow::anyhow!("Failed to install rustls crypto provider"));
    }

    match cli.command {
        Some(Commands::Controller) | None => run_controller(cli.operator).await,
    }
}

async fn run_controller(args: OperatorArgs) -> anyhow::Result<()> {
    tracing::info!("Review App controller starting...");

    let client = Client::try_default()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to create Kubernetes client: {}", e))?;

    if args.skip_crd_install {
        tracing::info!("Skipping CRD installation");
    } else {
        startup::ensure_crds_installed(&client).await?;
    }

    let config = args.controller_config();
    tracing::info!(
        github_api_url = %config.github_api_url,
        git_host = %config.git_host,
        scratch_dir = %config.scratch_dir.display(),
        "controller configuration"
    );
    let ctx = Arc::new(Context::builder(client.clone()).config(config).build()?);

    let listener = tokio::net::TcpListener::bind(args.listen_addr)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to bind {}: {}", args.listen_addr, e))?;
    tracing::info!(addr = %args.listen_addr, "Serving /healthz and /metrics");

    tracing::info!("Starting controllers:");
    let controller =
        controller_runner::build_review_app_controller(client, ctx, args.namespace.as_deref());

    tokio::select! {
        _ = controller => tracing::info!("ReviewApp controller completed"),
        result = server::serve(listener) => {
            if let Err(e) = result {
                tracing::error!(error = %e, "Health server stopped");
            }
        }
    }

    tracing::info!("Review App controller shutting down");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn controller_is_the_default_command() {
        let cli = Cli::try_parse_from(["reviewapp-operator"]).unwrap();
        assert!(cli.command.is_none());
        assert!(!cli.crd);
    }

    #[test]
    fn flags_override_controller_config() {
        let cli = Cli::try_parse_from([
            "reviewapp-operator",
            "controller",
            "--github-api-url",
            "https://ghe.example.com/api/v3",
            "--git-host",
            "ghe.example.com",
            "--scratch-dir",
            "/var/tmp/reviewapp",
            "--git-author-name",
            "preview-bot",
            "--log-json",
            "false",
        ])
        .unwrap();
        assert!(matches!(cli.command, Some(Commands::Controller)));
        assert!(!cli.operator.log_json);

        let config = cli.operator.controller_config();
        assert_eq!(config.github_api_url, "https://ghe.example.com/api/v3");
        assert_eq!(config.git_host, "ghe.example.com");
        assert_eq!(config.scratch_dir, PathBuf::from("/var/tmp/reviewapp"));
        assert_eq!(config.commit_author.name, "preview-bot");
        assert_eq!(config.commit_author.email, CommitAuthor::default().email);
    }

    #[test]
    fn unset_flags_keep_controller_defaults() {
        let cli = Cli::try_parse_from(["reviewapp-operator"]).unwrap();
        let config = cli.operator.controller_config();
        let defaults = ControllerConfig::default();
        assert_eq!(config.scratch_dir, defaults.scratch_dir);
        assert_eq!(config.steady_requeue, defaults.steady_requeue);
        assert_eq!(config.soft_stop_requeue, defaults.soft_stop_requeue);
    }
}
