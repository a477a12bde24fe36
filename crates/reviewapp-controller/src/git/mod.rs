//! Infra repository write-back over the git CLI

mod runner;
mod writer;

pub use runner::{CommandGitRunner, GitRunner, GIT_COMMAND_TIMEOUT};
pub use writer::{
    join_repo_path, safe_relative_path, CommitAuthor, InfraFile, InfraRepoLocalDir,
    InfraRepoTarget, InfraRepoWriter, WriteMode, WriteOutcome,
};

#[cfg(test)]
pub(crate) use runner::subcommand;
#[cfg(test)]
pub use runner::MockGitRunner;
