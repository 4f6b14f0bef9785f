use chrono::{DateTime, Utc};
use futures::future::join_all;
use reqwest::header::{HeaderMap, HeaderValue};
use reqwest_middleware::ClientWithMiddleware;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tracing::{debug, instrument, warn};

use crate::error::TrackError;
use crate::model::Release;

use super::{adapter_client, successful_status};

/// Releases of a GitLab project, via the REST releases endpoint.
///
/// That endpoint omits the tag commit on some instances and permission
/// levels, so drafts missing one get a secondary fetch against the tag
/// details endpoint. GitLab has no prerelease flag; classification falls
/// entirely on channel regexes.
#[derive(Debug)]
pub struct GitlabTracker {
    name: String,
    project: String,
    instance: String,
    token: Option<SecretString>,
    client: ClientWithMiddleware,
}

#[derive(Deserialize)]
struct GitlabRelease {
    tag_name: String,
    name: Option<String>,
    description: Option<String>,
    released_at: Option<DateTime<Utc>>,
    created_at: Option<DateTime<Utc>>,
    commit: Option<GitlabCommit>,
}

#[derive(Deserialize)]
struct GitlabCommit {
    id: String,
}

#[derive(Deserialize)]
struct GitlabTag {
    commit: Option<GitlabCommit>,
}

impl GitlabTracker {
    pub fn new(
        name: String,
        project: String,
        instance: String,
        token: Option<SecretString>,
    ) -> Result<Self, TrackError> {
        let mut headers = HeaderMap::new();
        if let Some(token) = &token {
            let value = HeaderValue::from_str(token.expose_secret())
                .map_err(|_| TrackError::Config("gitlab token contains invalid bytes".into()))?;
            headers.insert("PRIVATE-TOKEN", value);
        }
        Ok(Self {
            name,
            project,
            instance: instance.trim_end_matches('/').to_string(),
            token,
            client: adapter_client(headers)?,
        })
    }

    fn project_api(&self) -> String {
        format!(
            "{}/api/v4/projects/{}",
            self.instance,
            urlencoding::encode(&self.project)
        )
    }

    #[instrument(skip(self), fields(project = %self.project))]
    pub async fn fetch_all(&self, limit: usize) -> Result<Vec<Release>, TrackError> {
        let url = format!(
            "{}/releases?per_page={}",
            self.project_api(),
            limit.min(100)
        );
        debug!("fetching releases from {url}");

        let resp = self.client.get(&url).send().await?;
        let resp = successful_status(resp).await?;
        let items: Vec<GitlabRelease> = resp
            .json()
            .await
            .map_err(|e| TrackError::Upstream(format!("failed to parse releases: {e}")))?;

        let commits = self.backfill_commits(&items).await;

        let now = Utc::now();
        let releases = items
            .into_iter()
            .zip(commits)
            .map(|(item, backfilled)| {
                let commit_sha = item.commit.map(|c| c.id).or(backfilled);
                if commit_sha.is_none() {
                    warn!(tag = %item.tag_name, "no commit identity for release");
                }
                Release {
                    id: None,
                    tracker_name: self.name.clone(),
                    name: item
                        .name
                        .filter(|n| !n.is_empty())
                        .unwrap_or_else(|| item.tag_name.clone()),
                    version: item.tag_name.clone(),
                    url: format!(
                        "{}/{}/-/releases/{}",
                        self.instance, self.project, item.tag_name
                    ),
                    tag_name: item.tag_name,
                    published_at: item.released_at.or(item.created_at).unwrap_or(now),
                    prerelease: false,
                    body: item.description,
                    channel_name: None,
                    commit_sha,
                    republish_count: 0,
                    created_at: now,
                }
            })
            .take(limit)
            .collect();
        Ok(releases)
    }

    /// One tag-details request per release whose commit is absent, in
    /// parallel. Failures degrade to a missing SHA, never to an error.
    async fn backfill_commits(&self, items: &[GitlabRelease]) -> Vec<Option<String>> {
        let missing = items.iter().filter(|i| i.commit.is_none()).count();
        if missing > 0 {
            debug!("fetching commit identity for {missing} releases from tags API");
        }
        let fetches = items.iter().map(|item| async {
            if item.commit.is_some() {
                return None;
            }
            let url = format!(
                "{}/repository/tags/{}",
                self.project_api(),
                urlencoding::encode(&item.tag_name)
            );
            match self.fetch_tag(&url).await {
                Ok(sha) => sha,
                Err(e) => {
                    warn!(tag = %item.tag_name, "failed to fetch tag details: {e}");
                    None
                }
            }
        });
        join_all(fetches).await
    }

    async fn fetch_tag(&self, url: &str) -> Result<Option<String>, TrackError> {
        let resp = self.client.get(url).send().await?;
        let resp = successful_status(resp).await?;
        let tag: GitlabTag = resp
            .json()
            .await
            .map_err(|e| TrackError::Upstream(format!("failed to parse tag: {e}")))?;
        Ok(tag.commit.map(|c| c.id))
    }
}
