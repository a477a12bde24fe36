//! Double-brace templating for Review App resources
//!
//! Templates are rendered with minijinja's default `{{ ... }}` syntax against a
//! [`TemplateContext`] describing the pull request, the infra repository and
//! the ReviewApp's free-form variables:
//!
//! - `{{ AppRepo.Organization }}`, `{{ AppRepo.Repository }}`, `{{ AppRepo.PrNumber }}`
//! - `{{ AppRepo.Branch }}`, `{{ AppRepo.LatestCommitSha }}`
//! - `{{ InfraRepo.Organization }}`, `{{ InfraRepo.Repository }}`, `{{ InfraRepo.Branch }}`
//! - `{{ Variables.KEY }}`
//!
//! Missing values render as the empty string so that partially specified
//! variable sets still produce output. Syntax errors always fail.

mod context;
mod engine;
mod error;

pub use context::{AppRepoContext, InfraRepoContext, TemplateContext};
pub use engine::TemplateEngine;
pub use error::{RoundTripStage, TemplateError};
