//! Git hosting API client
//!
//! [`HostingClient`] is the seam the reconciler talks to; [`GitHubClient`]
//! implements it against the GitHub REST API with basic auth.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, LINK};
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

#[cfg(test)]
use mockall::automock;

use reviewapp_common::Error;

use crate::pull_request::PullRequest;

/// Default GitHub REST endpoint
pub const DEFAULT_GITHUB_API_URL: &str = "https://api.github.com";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const USER_AGENT: &str = concat!("reviewapp-operator/", env!("CARGO_PKG_VERSION"));
const MAX_LIST_PAGES: usize = 50;

/// Username and token read from a ReviewApp's credential Secret
#[derive(Clone, PartialEq, Eq)]
pub struct HostingCredential {
    /// Account name
    pub username: String,
    /// Personal access token
    pub token: String,
}

impl std::fmt::Debug for HostingCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostingCredential")
            .field("username", &self.username)
            .field("token", &"<redacted>")
            .finish()
    }
}

/// Pull request operations on the git hosting service
#[cfg_attr(test, automock)]
#[async_trait]
pub trait HostingClient: Send + Sync {
    /// Get one pull request by number
    async fn get_pull_request(
        &self,
        credential: &HostingCredential,
        organization: &str,
        repository: &str,
        number: u64,
    ) -> Result<PullRequest, Error>;

    /// List open pull requests of a repository
    async fn list_open_pull_requests(
        &self,
        credential: &HostingCredential,
        organization: &str,
        repository: &str,
    ) -> Result<Vec<PullRequest>, Error>;

    /// Post a comment on a pull request
    async fn create_issue_comment(
        &self,
        credential: &HostingCredential,
        organization: &str,
        repository: &str,
        number: u64,
        body: &str,
    ) -> Result<(), Error>;
}

#[derive(Debug, Deserialize)]
struct GhPullRequest {
    number: u64,
    #[serde(default)]
    title: String,
    head: GhHead,
    #[serde(default)]
    labels: Vec<GhLabel>,
}

#[derive(Debug, Deserialize)]
struct GhHead {
    #[serde(rename = "ref")]
    branch: String,
    sha: String,
}

#[derive(Debug, Deserialize)]
struct GhLabel {
    name: String,
}

#[derive(Debug, Serialize)]
struct GhComment<'a> {
    body: &'a str,
}

impl GhPullRequest {
    fn into_pull_request(self, organization: &str, repository: &str) -> PullRequest {
        PullRequest {
            organization: organization.to_string(),
            repository: repository.to_string(),
            branch: self.head.branch,
            number: self.number,
            head_sha: self.head.sha,
            title: self.title,
            labels: self.labels.into_iter().map(|l| l.name).collect(),
        }
    }
}

/// GitHub REST implementation of [`HostingClient`]
pub struct GitHubClient {
    http: Client,
    api_url: String,
}

impl GitHubClient {
    /// Create a client for the given API base URL
    pub fn new(api_url: impl Into<String>) -> Result<Self, Error> {
        let http = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| Error::hosting(format!("failed to build HTTP client: {e}"), None))?;
        Ok(Self {
            http,
            api_url: api_url.into().trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.api_url, path)
    }

    fn authed(&self, req: RequestBuilder, credential: &HostingCredential) -> RequestBuilder {
        req.basic_auth(&credential.username, Some(&credential.token))
            .header("Accept", "application/vnd.github+json")
    }

    async fn send(&self, req: RequestBuilder, what: &str) -> Result<reqwest::Response, Error> {
        let resp = req
            .send()
            .await
            .map_err(|e| Error::hosting(format!("{what}: {e}"), e.status().map(|s| s.as_u16())))?;

        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }

        let body = resp.text().await.unwrap_or_default();
        Err(hosting_error(what, status, &body))
    }
}

/// Target of the `rel="next"` entry of a `Link` header
fn next_page_url(headers: &HeaderMap) -> Option<String> {
    let link = headers.get(LINK)?.to_str().ok()?;
    link.split(',').find_map(|entry| {
        let (target, params) = entry.split_once(';')?;
        params
            .split(';')
            .any(|param| param.trim() == "rel=\"next\"")
            .then(|| target.trim().trim_start_matches('<').trim_end_matches('>').to_string())
    })
}

fn hosting_error(what: &str, status: StatusCode, body: &str) -> Error {
    let detail = body.lines().next().unwrap_or_default();
    Error::hosting(
        format!("{what}: HTTP {status}: {detail}"),
        Some(status.as_u16()),
    )
}

#[async_trait]
impl HostingClient for GitHubClient {
    async fn get_pull_request(
        &self,
        credential: &HostingCredential,
        organization: &str,
        repository: &str,
        number: u64,
    ) -> Result<PullRequest, Error> {
        let what = format!("get pull request {organization}/{repository}#{number}");
        let url = self.url(&format!("/repos/{organization}/{repository}/pulls/{number}"));
        debug!(%url, "fetching pull request");

        let resp = self
            .send(self.authed(self.http.get(&url), credential), &what)
            .await?;
        let pr: GhPullRequest = resp
            .json()
            .await
            .map_err(|e| Error::hosting(format!("{what}: invalid body: {e}"), None))?;

        Ok(pr.into_pull_request(organization, repository))
    }

    async fn list_open_pull_requests(
        &self,
        credential: &HostingCredential,
        organization: &str,
        repository: &str,
    ) -> Result<Vec<PullRequest>, Error> {
        let what = format!("list pull requests of {organization}/{repository}");
        let url = self.url(&format!("/repos/{organization}/{repository}/pulls"));

        let mut req = self
            .http
            .get(&url)
            .query(&[("state", "open"), ("per_page", "100")]);
        let mut prs = Vec::new();
        for page in 1..=MAX_LIST_PAGES {
            let resp = self.send(self.authed(req, credential), &what).await?;
            let next = next_page_url(resp.headers());
            let batch: Vec<GhPullRequest> = resp
                .json()
                .await
                .map_err(|e| Error::hosting(format!("{what}: invalid body: {e}"), None))?;
            prs.extend(
                batch
                    .into_iter()
                    .map(|pr| pr.into_pull_request(organization, repository)),
            );

            match next {
                Some(next) => {
                    debug!(url = %next, page, "following next page");
                    req = self.http.get(next);
                }
                None => return Ok(prs),
            }
        }
        warn!(pages = MAX_LIST_PAGES, "stopped listing pull requests at the page limit");
        Ok(prs)
    }

    async fn create_issue_comment(
        &self,
        credential: &HostingCredential,
        organization: &str,
        repository: &str,
        number: u64,
        body: &str,
    ) -> Result<(), Error> {
        let what = format!("comment on {organization}/{repository}#{number}");
        let url = self.url(&format!(
            "/repos/{organization}/{repository}/issues/{number}/comments"
        ));

        let req = self.http.post(&url).json(&GhComment { body });
        self.send(self.authed(req, credential), &what).await?;
        Ok(())
    }
}
