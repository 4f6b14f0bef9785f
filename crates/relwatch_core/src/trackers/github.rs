use chrono::{DateTime, Utc};
use reqwest::header::{ACCEPT, HeaderMap, HeaderValue};
use reqwest_middleware::ClientWithMiddleware;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, instrument};

use crate::error::TrackError;
use crate::model::Release;

use super::{adapter_client, successful_status, version_of};

const GITHUB_API: &str = "https://api.github.com";

/// Releases of a GitHub repository, read through the GraphQL endpoint so
/// one round trip carries tag, notes, prerelease flag and tag commit.
#[derive(Debug)]
pub struct GithubTracker {
    name: String,
    owner: String,
    repo: String,
    token: Option<SecretString>,
    base_url: String,
    client: ClientWithMiddleware,
}

const RELEASES_QUERY: &str = r#"
query ($owner: String!, $name: String!, $limit: Int!) {
  repository(owner: $owner, name: $name) {
    releases(first: $limit, orderBy: {field: CREATED_AT, direction: DESC}) {
      nodes {
        name
        tagName
        description
        publishedAt
        isPrerelease
        url
        tagCommit {
          oid
          message
        }
      }
    }
  }
}
"#;

#[derive(Deserialize)]
struct GraphQlResponse {
    data: Option<GraphQlData>,
    errors: Option<Vec<GraphQlError>>,
}

#[derive(Deserialize)]
struct GraphQlError {
    message: String,
}

#[derive(Deserialize)]
struct GraphQlData {
    repository: Option<Repository>,
}

#[derive(Deserialize)]
struct Repository {
    releases: ReleaseConnection,
}

#[derive(Deserialize)]
struct ReleaseConnection {
    nodes: Vec<ReleaseNode>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReleaseNode {
    name: Option<String>,
    tag_name: String,
    description: Option<String>,
    published_at: Option<DateTime<Utc>>,
    is_prerelease: bool,
    url: String,
    tag_commit: Option<TagCommit>,
}

#[derive(Deserialize)]
struct TagCommit {
    oid: String,
    message: Option<String>,
}

impl GithubTracker {
    pub fn new(
        name: String,
        repo: String,
        token: Option<SecretString>,
    ) -> Result<Self, TrackError> {
        let (owner, repo_name) = repo.split_once('/').ok_or_else(|| {
            TrackError::Config(format!("github repo must be owner/name, got {repo:?}"))
        })?;
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/vnd.github+json"));
        headers.insert(
            "X-GitHub-Api-Version",
            HeaderValue::from_static("2022-11-28"),
        );
        Ok(Self {
            name,
            owner: owner.to_string(),
            repo: repo_name.to_string(),
            token,
            base_url: GITHUB_API.to_string(),
            client: adapter_client(headers)?,
        })
    }

    /// Point the adapter at a different API host. Test hook.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    #[instrument(skip(self), fields(repo = %format!("{}/{}", self.owner, self.repo)))]
    pub async fn fetch_all(&self, limit: usize) -> Result<Vec<Release>, TrackError> {
        // The GraphQL endpoint rejects anonymous queries outright.
        let Some(token) = &self.token else {
            return Err(TrackError::AuthRequired(format!(
                "{}/{}",
                self.owner, self.repo
            )));
        };

        debug!("fetching up to {limit} releases via GraphQL");
        let body = json!({
            "query": RELEASES_QUERY,
            "variables": {
                "owner": self.owner,
                "name": self.repo,
                "limit": limit as i64,
            },
        });

        let resp = self
            .client
            .post(format!("{}/graphql", self.base_url))
            .bearer_auth(token.expose_secret())
            .json(&body)
            .send()
            .await?;
        let resp = successful_status(resp).await?;

        let parsed: GraphQlResponse = resp
            .json()
            .await
            .map_err(|e| TrackError::Upstream(format!("failed to parse GraphQL response: {e}")))?;

        if let Some(errors) = parsed.errors
            && let Some(first) = errors.first()
        {
            return Err(TrackError::Upstream(format!("GraphQL: {}", first.message)));
        }

        let nodes = parsed
            .data
            .and_then(|d| d.repository)
            .map(|r| r.releases.nodes)
            .ok_or_else(|| {
                TrackError::Upstream(format!(
                    "repository {}/{} not found or not visible",
                    self.owner, self.repo
                ))
            })?;

        let now = Utc::now();
        let releases = nodes
            .into_iter()
            .map(|node| {
                // Release notes fall back to the tag commit message.
                let body = node
                    .description
                    .filter(|d| !d.is_empty())
                    .or_else(|| node.tag_commit.as_ref().and_then(|c| c.message.clone()));
                Release {
                    id: None,
                    tracker_name: self.name.clone(),
                    name: node.name.filter(|n| !n.is_empty()).unwrap_or_else(|| node.tag_name.clone()),
                    version: version_of(&node.tag_name),
                    tag_name: node.tag_name,
                    published_at: node.published_at.unwrap_or(now),
                    url: node.url,
                    prerelease: node.is_prerelease,
                    body,
                    channel_name: None,
                    commit_sha: node.tag_commit.map(|c| c.oid),
                    republish_count: 0,
                    created_at: now,
                }
            })
            .collect();
        Ok(releases)
    }
}
