//! Pull request facts and their resolution
//!
//! A [`PullRequest`] is resolved once per reconcile and never mutated
//! afterwards. Resolution goes through a short-lived cache on the ReviewApp
//! status to keep hosting API traffic bounded when many ReviewApps requeue.

use std::time::Duration;

use chrono::{DateTime, Utc};
use regex::Regex;
use tracing::{debug, info, warn};

use reviewapp_common::crd::{AppTarget, PullRequestCache, ReviewAppSpec, ReviewAppStatus};
use reviewapp_common::retry::{retry_with_backoff, RetryConfig};
use reviewapp_common::template::AppRepoContext;
use reviewapp_common::Error;

use crate::github::{HostingClient, HostingCredential};

/// Cached pull request facts younger than this are reused without an API call
pub const PULL_REQUEST_RESYNC_PERIOD: Duration = Duration::from_secs(60);

/// Pull request facts relevant to rendering and change detection
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PullRequest {
    /// App repository organization
    pub organization: String,
    /// App repository name
    pub repository: String,
    /// Head branch
    pub branch: String,
    /// Pull request number
    pub number: u64,
    /// Head commit
    pub head_sha: String,
    /// Title
    pub title: String,
    /// Label names
    pub labels: Vec<String>,
}

impl PullRequest {
    /// Whether the pull request selects candidate templates
    pub fn is_candidate(&self, candidate_label: &str) -> bool {
        self.labels.iter().any(|l| l == candidate_label)
    }

    /// Whether the pull request is filtered out by label or title
    pub fn is_excluded(&self, rules: &ExclusionRules) -> bool {
        rules.excludes(self)
    }

    /// Values exposed to templates as `AppRepo.*`
    pub fn app_repo_context(&self) -> AppRepoContext {
        AppRepoContext {
            organization: self.organization.clone(),
            repository: self.repository.clone(),
            pr_number: self.number,
            branch: self.branch.clone(),
            latest_commit_sha: self.head_sha.clone(),
        }
    }

    /// Pull request as last recorded on the status, or a stub carrying only
    /// the number when nothing was ever resolved
    ///
    /// Used on deletion, where the pull request is usually already closed.
    pub fn last_known(spec: &ReviewAppSpec, status: Option<&ReviewAppStatus>) -> Self {
        match status.and_then(|s| s.pull_request_cache.as_ref()) {
            Some(cache) => Self::from_cache(&spec.app_target, cache),
            None => Self {
                organization: spec.app_target.organization.clone(),
                repository: spec.app_target.repository.clone(),
                number: spec.pull_request_number,
                ..Default::default()
            },
        }
    }

    fn from_cache(target: &AppTarget, cache: &PullRequestCache) -> Self {
        Self {
            organization: target.organization.clone(),
            repository: target.repository.clone(),
            branch: cache.branch.clone(),
            number: cache.number,
            head_sha: cache.head_sha.clone(),
            title: cache.title.clone(),
            labels: cache.labels.clone(),
        }
    }

    fn to_cache(&self, synced_at: DateTime<Utc>) -> PullRequestCache {
        PullRequestCache {
            number: self.number,
            branch: self.branch.clone(),
            head_sha: self.head_sha.clone(),
            title: self.title.clone(),
            labels: self.labels.clone(),
            synced_at: synced_at.to_rfc3339(),
        }
    }
}

/// Label and title rules that exclude a pull request from previews
#[derive(Clone, Debug, Default)]
pub struct ExclusionRules {
    labels: Vec<String>,
    title: Option<Regex>,
}

impl ExclusionRules {
    /// Build the rules of an app target
    pub fn from_target(target: &AppTarget) -> Result<Self, Error> {
        let title = target
            .ignore_title_exp
            .as_deref()
            .filter(|exp| !exp.is_empty())
            .map(Regex::new)
            .transpose()
            .map_err(|e| {
                Error::validation_for_field(
                    "ReviewApp",
                    "spec.appTarget.ignoreTitleExp",
                    e.to_string(),
                )
            })?;
        Ok(Self {
            labels: target.ignore_labels.clone(),
            title,
        })
    }

    fn excludes(&self, pr: &PullRequest) -> bool {
        if pr.labels.iter().any(|l| self.labels.contains(l)) {
            return true;
        }
        self.title.as_ref().is_some_and(|re| re.is_match(&pr.title))
    }
}

/// Outcome of resolving a pull request
#[derive(Debug)]
pub enum Resolution {
    /// Current facts
    Found(PullRequest),
    /// The lookup budget was exhausted; the pull request is treated as closed
    Gone {
        /// Last lookup error
        reason: String,
    },
}

/// Cached facts for `number` if they are younger than the resync period
pub fn cached_if_fresh(
    spec: &ReviewAppSpec,
    status: &ReviewAppStatus,
    now: DateTime<Utc>,
) -> Option<PullRequest> {
    let cache = status.pull_request_cache.as_ref()?;
    if cache.number != spec.pull_request_number {
        return None;
    }
    let synced_at = DateTime::parse_from_rfc3339(&cache.synced_at).ok()?;
    let age = now.signed_duration_since(synced_at.with_timezone(&Utc));
    let period = chrono::Duration::from_std(PULL_REQUEST_RESYNC_PERIOD).ok()?;
    (age < period).then(|| PullRequest::from_cache(&spec.app_target, cache))
}

/// Resolve the pull request of a ReviewApp
///
/// Fresh cached facts are returned as-is. Otherwise the hosting API is asked
/// under `retry`; on success the cache on `status` is refreshed. When every
/// attempt fails the open pull request list is consulted once: the pull
/// request is [`Resolution::Gone`] only if the listing succeeds without it.
/// A failed listing returns the last lookup error.
pub async fn resolve(
    hosting: &dyn HostingClient,
    spec: &ReviewAppSpec,
    status: &mut ReviewAppStatus,
    credential: &HostingCredential,
    retry: &RetryConfig,
    now: DateTime<Utc>,
) -> Result<Resolution, Error> {
    if let Some(pr) = cached_if_fresh(spec, status, now) {
        debug!(number = pr.number, "using cached pull request facts");
        return Ok(Resolution::Found(pr));
    }

    let org = spec.app_target.organization.as_str();
    let repo = spec.app_target.repository.as_str();
    let number = spec.pull_request_number;

    let lookup = retry_with_backoff(retry, "get_pull_request", || {
        hosting.get_pull_request(credential, org, repo, number)
    })
    .await;

    let pr = match lookup {
        Ok(pr) => pr,
        Err(e) => match hosting.list_open_pull_requests(credential, org, repo).await {
            Ok(open) => match open.into_iter().find(|pr| pr.number == number) {
                Some(pr) => {
                    info!(number, error = %e, "pull request lookup failed but it is still open");
                    pr
                }
                None => {
                    warn!(number, error = %e, "pull request is no longer open");
                    return Ok(Resolution::Gone {
                        reason: e.to_string(),
                    });
                }
            },
            Err(list_err) => {
                debug!(error = %list_err, "listing open pull requests failed");
                return Err(e);
            }
        },
    };

    status.pull_request_cache = Some(pr.to_cache(now));
    Ok(Resolution::Found(pr))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::github::MockHostingClient;

    fn fast_retry() -> RetryConfig {
        RetryConfig {
            max_attempts: 3,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(1),
            backoff_multiplier: 1.0,
        }
    }

    fn credential() -> HostingCredential {
        HostingCredential {
            username: "bot".to_string(),
            token: "t".to_string(),
        }
    }

    fn spec() -> ReviewAppSpec {
        ReviewAppSpec {
            app_target: AppTarget {
                organization: "acme".to_string(),
                repository: "shop".to_string(),
                ignore_labels: vec!["no-preview".to_string()],
                ignore_title_exp: Some("^(WIP|Draft):".to_string()),
                ..Default::default()
            },
            pull_request_number: 42,
            ..Default::default()
        }
    }

    fn pr(labels: &[&str]) -> PullRequest {
        PullRequest {
            organization: "acme".to_string(),
            repository: "shop".to_string(),
            branch: "feature/checkout".to_string(),
            number: 42,
            head_sha: "0123abcd".to_string(),
            title: "Add checkout page".to_string(),
            labels: labels.iter().map(|l| l.to_string()).collect(),
        }
    }

    #[test]
    fn candidate_selection_only_depends_on_the_candidate_label() {
        let base = pr(&["ui"]);
        assert!(!base.is_candidate("candidate-template"));

        let unrelated = pr(&["ui", "backend", "needs-review"]);
        assert_eq!(
            base.is_candidate("candidate-template"),
            unrelated.is_candidate("candidate-template")
        );

        let candidate = pr(&["ui", "candidate-template"]);
        assert!(candidate.is_candidate("candidate-template"));
        assert!(pr(&["candidate-template", "backend"]).is_candidate("candidate-template"));
    }

    #[test]
    fn exclusion_by_label_or_title() {
        let rules = ExclusionRules::from_target(&spec().app_target).unwrap();

        assert!(!pr(&["ui"]).is_excluded(&rules));
        assert!(pr(&["ui", "no-preview"]).is_excluded(&rules));

        let mut draft = pr(&[]);
        draft.title = "WIP: checkout".to_string();
        assert!(draft.is_excluded(&rules));
    }

    #[test]
    fn invalid_title_expression_is_a_validation_error() {
        let mut target = spec().app_target;
        target.ignore_title_exp = Some("(".to_string());
        let err = ExclusionRules::from_target(&target).unwrap_err();
        assert!(matches!(err, Error::Validation { .. }));
    }

    #[tokio::test]
    async fn fresh_cache_skips_the_api() {
        let now = Utc::now();
        let mut status = ReviewAppStatus {
            pull_request_cache: Some(pr(&["ui"]).to_cache(now - chrono::Duration::seconds(10))),
            ..Default::default()
        };
        let mut hosting = MockHostingClient::new();
        hosting.expect_get_pull_request().times(0);

        let res = resolve(&hosting, &spec(), &mut status, &credential(), &fast_retry(), now)
            .await
            .unwrap();
        match res {
            Resolution::Found(found) => assert_eq!(found, pr(&["ui"])),
            other => panic!("expected Found, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn stale_cache_refreshes_from_the_api() {
        let now = Utc::now();
        let mut status = ReviewAppStatus {
            pull_request_cache: Some(pr(&[]).to_cache(now - chrono::Duration::seconds(120))),
            ..Default::default()
        };
        let mut hosting = MockHostingClient::new();
        hosting
            .expect_get_pull_request()
            .times(1)
            .returning(|_, _, _, _| {
                let mut fresh = pr(&["candidate-template"]);
                fresh.head_sha = "fedcba98".to_string();
                Ok(fresh)
            });

        let res = resolve(&hosting, &spec(), &mut status, &credential(), &fast_retry(), now)
            .await
            .unwrap();
        assert!(matches!(res, Resolution::Found(ref p) if p.head_sha == "fedcba98"));

        let cache = status.pull_request_cache.unwrap();
        assert_eq!(cache.head_sha, "fedcba98");
        assert_eq!(cache.synced_at, now.to_rfc3339());
    }

    #[tokio::test]
    async fn cache_for_another_number_is_ignored() {
        let now = Utc::now();
        let mut other = pr(&[]);
        other.number = 7;
        let status = ReviewAppStatus {
            pull_request_cache: Some(other.to_cache(now)),
            ..Default::default()
        };
        assert!(cached_if_fresh(&spec(), &status, now).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_lookup_reports_gone() {
        let mut status = ReviewAppStatus::default();
        let mut hosting = MockHostingClient::new();
        hosting
            .expect_get_pull_request()
            .times(3)
            .returning(|_, _, _, _| Err(Error::hosting("Not Found", Some(404))));
        hosting
            .expect_list_open_pull_requests()
            .times(1)
            .returning(|_, _, _| Ok(vec![]));

        let res = resolve(
            &hosting,
            &spec(),
            &mut status,
            &credential(),
            &fast_retry(),
            Utc::now(),
        )
        .await
        .unwrap();
        assert!(matches!(res, Resolution::Gone { .. }));
        assert!(status.pull_request_cache.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn still_open_pull_request_survives_failed_lookups() {
        let mut status = ReviewAppStatus::default();
        let mut hosting = MockHostingClient::new();
        hosting
            .expect_get_pull_request()
            .times(3)
            .returning(|_, _, _, _| Err(Error::hosting("bad gateway", Some(502))));
        hosting
            .expect_list_open_pull_requests()
            .returning(|_, _, _| Ok(vec![pr(&["ui"])]));

        let res = resolve(
            &hosting,
            &spec(),
            &mut status,
            &credential(),
            &fast_retry(),
            Utc::now(),
        )
        .await
        .unwrap();
        assert!(matches!(res, Resolution::Found(_)));
        assert!(status.pull_request_cache.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn failed_listing_surfaces_the_lookup_error() {
        let mut status = ReviewAppStatus::default();
        let mut hosting = MockHostingClient::new();
        hosting
            .expect_get_pull_request()
            .times(3)
            .returning(|_, _, _, _| Err(Error::hosting("bad gateway", Some(502))));
        hosting
            .expect_list_open_pull_requests()
            .times(1)
            .returning(|_, _, _| Err(Error::hosting("service unavailable", Some(503))));

        let err = resolve(
            &hosting,
            &spec(),
            &mut status,
            &credential(),
            &fast_retry(),
            Utc::now(),
        )
        .await
        .unwrap_err();
        assert!(err.to_string().contains("bad gateway"));
        assert!(status.pull_request_cache.is_none());
    }

    #[test]
    fn last_known_falls_back_to_the_spec_number() {
        let stub = PullRequest::last_known(&spec(), None);
        assert_eq!(stub.number, 42);
        assert!(stub.head_sha.is_empty());

        let status = ReviewAppStatus {
            pull_request_cache: Some(pr(&["ui"]).to_cache(Utc::now())),
            ..Default::default()
        };
        assert_eq!(PullRequest::last_known(&spec(), Some(&status)).branch, "feature/checkout");
    }
}
