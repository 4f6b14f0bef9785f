mod github;
mod gitlab;
mod helm;

pub use github::GithubTracker;
pub use gitlab::GitlabTracker;
pub use helm::HelmTracker;

use reqwest::Response;
use reqwest::header::HeaderMap;
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware};
use reqwest_retry::{RetryTransientMiddleware, policies::ExponentialBackoff};
use secrecy::SecretString;

use crate::error::TrackError;
use crate::model::{Release, TrackerConfig, TrackerKind};

/// A source adapter bound to one configured tracker.
///
/// Adapters normalize upstream payloads into [`Release`] drafts and do no
/// filtering of their own; the channel filter sees the full recent window.
#[derive(Debug)]
pub enum Tracker {
    Github(GithubTracker),
    Gitlab(GitlabTracker),
    Helm(HelmTracker),
}

impl Tracker {
    /// Builds the adapter for a config, with the token the credential
    /// resolver produced (`None` means anonymous access).
    pub fn from_config(
        config: &TrackerConfig,
        token: Option<SecretString>,
    ) -> Result<Self, TrackError> {
        match &config.kind {
            TrackerKind::Github { repo } => Ok(Self::Github(GithubTracker::new(
                config.name.clone(),
                repo.clone(),
                token,
            )?)),
            TrackerKind::Gitlab { project, instance } => Ok(Self::Gitlab(GitlabTracker::new(
                config.name.clone(),
                project.clone(),
                instance.clone(),
                token,
            )?)),
            TrackerKind::Helm { repo, chart } => Ok(Self::Helm(HelmTracker::new(
                config.name.clone(),
                repo.clone(),
                chart.clone(),
                token,
            )?)),
        }
    }

    /// Fetches up to `limit` recent releases, newest first.
    pub async fn fetch_all(&self, limit: usize) -> Result<Vec<Release>, TrackError> {
        match self {
            Self::Github(t) => t.fetch_all(limit).await,
            Self::Gitlab(t) => t.fetch_all(limit).await,
            Self::Helm(t) => t.fetch_all(limit).await,
        }
    }

    /// Single-latest fallback for upstreams whose list endpoint came back
    /// empty.
    pub async fn fetch_latest(&self) -> Result<Option<Release>, TrackError> {
        Ok(self.fetch_all(1).await?.into_iter().next())
    }
}

/// Retry-wrapped client shared by all adapters: transient transport
/// failures get up to three exponential-backoff retries.
pub(crate) fn adapter_client(headers: HeaderMap) -> Result<ClientWithMiddleware, TrackError> {
    let reqwest_client = crate::http_client::http_client_builder()
        .default_headers(headers)
        .build()
        .map_err(TrackError::upstream)?;
    let retry_policy = ExponentialBackoff::builder().build_with_max_retries(3);
    Ok(ClientBuilder::new(reqwest_client)
        .with(RetryTransientMiddleware::new_with_policy(retry_policy))
        .build())
}

/// Maps non-success statuses to `Upstream`, keeping a bounded body excerpt
/// for the status row.
pub(crate) async fn successful_status(resp: Response) -> Result<Response, TrackError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    let excerpt: String = body.chars().take(200).collect();
    Err(TrackError::Upstream(format!("HTTP {status}: {excerpt}")))
}

/// Tags are displayed verbatim; versions drop the `v` prefix convention.
pub(crate) fn version_of(tag: &str) -> String {
    tag.trim_start_matches('v').to_string()
}
