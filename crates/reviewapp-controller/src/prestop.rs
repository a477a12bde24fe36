//! Pre-stop Job waiting
//!
//! The wait only reports what happened. Whether deletion continues after a
//! failure or timeout is decided by the caller.

use std::future::Future;
use std::time::Duration;

use k8s_openapi::api::batch::v1::Job;
use tokio::time::Instant;
use tracing::{debug, trace};

use reviewapp_common::Error;

/// Poll interval and deadline for the pre-stop Job
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PreStopWait {
    /// Time between status checks
    pub poll_interval: Duration,
    /// Absolute bound on the wait
    pub timeout: Duration,
}

impl Default for PreStopWait {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(10),
            timeout: Duration::from_secs(300),
        }
    }
}

/// Observed state of the latest pre-stop Job
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum JobState {
    /// Not finished, or not created yet
    Pending,
    /// At least one pod succeeded
    Succeeded,
    /// The Job reported a `Failed` condition
    Failed,
}

/// How the wait ended
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WaitOutcome {
    /// The Job succeeded
    Succeeded,
    /// The Job failed
    Failed,
    /// The deadline passed first
    TimedOut,
}

/// State of the most recently created Job
pub fn latest_job_state(jobs: &[Job]) -> JobState {
    let Some(latest) = jobs
        .iter()
        .max_by_key(|job| job.metadata.creation_timestamp.clone())
    else {
        return JobState::Pending;
    };
    let Some(status) = latest.status.as_ref() else {
        return JobState::Pending;
    };

    if status.succeeded.unwrap_or(0) >= 1 {
        return JobState::Succeeded;
    }
    let failed = status
        .conditions
        .iter()
        .flatten()
        .any(|c| c.type_ == "Failed" && c.status == "True");
    if failed {
        JobState::Failed
    } else {
        JobState::Pending
    }
}

/// Poll `check` until the Job finishes or the deadline passes
///
/// Check errors are treated like a pending Job.
pub async fn wait_for_job<F, Fut>(wait: PreStopWait, mut check: F) -> WaitOutcome
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<JobState, Error>>,
{
    let deadline = Instant::now() + wait.timeout;

    loop {
        match check().await {
            Ok(JobState::Succeeded) => return WaitOutcome::Succeeded,
            Ok(JobState::Failed) => return WaitOutcome::Failed,
            Ok(JobState::Pending) => trace!("pre-stop job still running"),
            Err(e) => debug!(error = %e, "pre-stop job check failed, retrying"),
        }

        let now = Instant::now();
        if now >= deadline {
            return WaitOutcome::TimedOut;
        }
        tokio::time::sleep_until((now + wait.poll_interval).min(deadline)).await;
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    fn job(created: &str, status: serde_json::Value) -> Job {
        serde_json::from_value(serde_json::json!({
            "apiVersion": "batch/v1",
            "kind": "Job",
            "metadata": {"name": format!("job-{created}"), "creationTimestamp": created},
            "status": status,
        }))
        .unwrap()
    }

    #[test]
    fn latest_job_decides_the_state() {
        let old_ok = job("2024-05-01T10:00:00Z", serde_json::json!({"succeeded": 1}));
        let new_running = job("2024-05-01T11:00:00Z", serde_json::json!({"active": 1}));
        assert_eq!(latest_job_state(&[old_ok.clone(), new_running.clone()]), JobState::Pending);
        assert_eq!(latest_job_state(&[new_running, old_ok]), JobState::Pending);

        let failed = job(
            "2024-05-01T12:00:00Z",
            serde_json::json!({"failed": 6, "conditions": [{"type": "Failed", "status": "True"}]}),
        );
        assert_eq!(latest_job_state(&[failed]), JobState::Failed);
        assert_eq!(latest_job_state(&[]), JobState::Pending);
    }

    #[tokio::test(start_paused = true)]
    async fn times_out_at_the_deadline() {
        let checks = AtomicU32::new(0);
        let counter = &checks;
        let start = Instant::now();

        let outcome = wait_for_job(PreStopWait::default(), move || async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(JobState::Pending)
        })
        .await;

        assert_eq!(outcome, WaitOutcome::TimedOut);
        assert_eq!(start.elapsed(), Duration::from_secs(300));
        assert_eq!(checks.load(Ordering::SeqCst), 31);
    }

    #[tokio::test(start_paused = true)]
    async fn returns_as_soon_as_the_job_succeeds() {
        let checks = AtomicU32::new(0);
        let counter = &checks;
        let start = Instant::now();

        let outcome = wait_for_job(PreStopWait::default(), move || async move {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            if n == 0 {
                Err(Error::hosting("api hiccup", Some(502)))
            } else if n < 3 {
                Ok(JobState::Pending)
            } else {
                Ok(JobState::Succeeded)
            }
        })
        .await;

        assert_eq!(outcome, WaitOutcome::Succeeded);
        assert_eq!(start.elapsed(), Duration::from_secs(30));
    }
}
