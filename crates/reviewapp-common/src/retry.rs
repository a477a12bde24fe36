//! Retry utilities with exponential backoff and jitter.
//!
//! Two places in the reconciler retry in-process: the pull request lookup and
//! the infra-repo clone/commit/push cycle. The latter is the only thing that
//! keeps concurrent writers to one infra branch from losing updates, so its
//! budget lives here as a named constant rather than a literal at the call site.
//!
//! # Example
//!
//! ```ignore
//! use reviewapp_common::retry::{retry_with_backoff, INFRA_REPO_RETRY};
//!
//! let head = retry_with_backoff(&INFRA_REPO_RETRY, "push_infra_repo", || async {
//!     writer.attempt(&files).await
//! })
//! .await?;
//! ```

use std::time::Duration;

use rand::Rng;
use tracing::{error, warn};

/// Configuration for operations that may fail transiently.
#[derive(Clone, Debug, PartialEq)]
pub struct RetryConfig {
    /// Maximum number of attempts (0 retries without limit)
    pub max_attempts: u32,
    /// Initial delay between retries
    pub initial_delay: Duration,
    /// Maximum delay between retries
    pub max_delay: Duration,
    /// Multiplier for exponential backoff
    pub backoff_multiplier: f64,
}

/// Budget for the infra-repo clone → write → commit → push cycle.
///
/// Each attempt re-clones from scratch, so a push rejected because another
/// ReviewApp pushed to the same branch is re-applied against fresh remote state.
pub const INFRA_REPO_RETRY: RetryConfig = RetryConfig {
    max_attempts: 3,
    initial_delay: Duration::from_millis(500),
    max_delay: Duration::from_secs(8),
    backoff_multiplier: 2.0,
};

/// Budget for resolving a pull request through the hosting API.
///
/// Exhausting it is taken to mean the pull request is gone.
pub const PULL_REQUEST_RETRY: RetryConfig = RetryConfig {
    max_attempts: 3,
    initial_delay: Duration::from_millis(500),
    max_delay: Duration::from_secs(8),
    backoff_multiplier: 2.0,
};

/// Execute an async operation with exponential backoff and jitter.
///
/// Retries indefinitely (or up to max_attempts if set) until success.
///
/// # Returns
/// The result of the operation, or the last error if max_attempts is exhausted.
pub async fn retry_with_backoff<F, Fut, T, E>(
    config: &RetryConfig,
    operation_name: &str,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let mut attempt = 0u32;
    let mut delay = config.initial_delay;

    loop {
        attempt += 1;

        match operation().await {
            Ok(result) => return Ok(result),
            Err(e) => {
                if config.max_attempts > 0 && attempt >= config.max_attempts {
                    error!(
                        operation = %operation_name,
                        attempt = attempt,
                        error = %e,
                        "Operation failed after max retries"
                    );
                    return Err(e);
                }

                // Jitter: 0.5x to 1.5x of the delay
                let jitter = rand::thread_rng().gen_range(0.5..1.5);
                let jittered_delay = Duration::from_secs_f64(delay.as_secs_f64() * jitter);

                warn!(
                    operation = %operation_name,
                    attempt = attempt,
                    error = %e,
                    delay_ms = jittered_delay.as_millis(),
                    "Operation failed, retrying"
                );

                tokio::time::sleep(jittered_delay).await;

                delay = Duration::from_secs_f64(
                    (delay.as_secs_f64() * config.backoff_multiplier)
                        .min(config.max_delay.as_secs_f64()),
                );
            }
        }
    }
}
