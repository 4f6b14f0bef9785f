use std::collections::HashMap;

use chrono::{DateTime, Utc};
use reqwest::header::HeaderMap;
use reqwest_middleware::ClientWithMiddleware;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tracing::{debug, instrument};

use crate::error::TrackError;
use crate::model::Release;

use super::{adapter_client, successful_status};

/// Versions of one chart in a Helm repository, read from `index.yaml`.
#[derive(Debug)]
pub struct HelmTracker {
    name: String,
    repo: String,
    chart: String,
    token: Option<SecretString>,
    client: ClientWithMiddleware,
}

#[derive(Deserialize)]
struct ChartIndex {
    #[serde(default)]
    entries: HashMap<String, Vec<ChartEntry>>,
}

#[derive(Deserialize)]
struct ChartEntry {
    version: String,
    created: Option<DateTime<Utc>>,
    #[serde(default)]
    description: Option<String>,
}

impl HelmTracker {
    pub fn new(
        name: String,
        repo: String,
        chart: String,
        token: Option<SecretString>,
    ) -> Result<Self, TrackError> {
        Ok(Self {
            name,
            repo: repo.trim_end_matches('/').to_string(),
            chart,
            token,
            client: adapter_client(HeaderMap::new())?,
        })
    }

    #[instrument(skip(self), fields(chart = %self.chart))]
    pub async fn fetch_all(&self, limit: usize) -> Result<Vec<Release>, TrackError> {
        let url = format!("{}/index.yaml", self.repo);
        debug!("fetching chart index from {url}");

        let mut req = self.client.get(&url);
        if let Some(token) = &self.token {
            req = req.bearer_auth(token.expose_secret());
        }
        let resp = successful_status(req.send().await?).await?;
        let text = resp.text().await.map_err(TrackError::upstream)?;

        let index: ChartIndex = serde_yaml::from_str(&text)
            .map_err(|e| TrackError::Upstream(format!("failed to parse chart index: {e}")))?;

        let Some(entries) = index.entries.get(&self.chart) else {
            return Ok(Vec::new());
        };

        let now = Utc::now();
        let mut releases: Vec<Release> = entries
            .iter()
            .map(|entry| Release {
                id: None,
                tracker_name: self.name.clone(),
                name: self.chart.clone(),
                tag_name: entry.version.clone(),
                version: entry.version.clone(),
                published_at: entry.created.unwrap_or(now),
                url: self.repo.clone(),
                prerelease: looks_prerelease(&entry.version),
                body: entry.description.clone(),
                channel_name: None,
                commit_sha: None,
                republish_count: 0,
                created_at: now,
            })
            .collect();

        releases.sort_by(|a, b| b.published_at.cmp(&a.published_at));
        releases.truncate(limit);
        Ok(releases)
    }
}

/// Chart indexes carry no prerelease flag; infer one from the version
/// string.
fn looks_prerelease(version: &str) -> bool {
    let v = version.to_lowercase();
    v.contains('-') || v.contains("alpha") || v.contains("beta") || v.contains("rc")
}
