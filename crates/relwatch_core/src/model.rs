use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::error::TrackError;

/// One observed release of a tracked project.
///
/// Adapters produce these as drafts (everything except `channel_name`,
/// which the channel filter assigns before the store sees the record).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Release {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    pub tracker_name: String,
    pub name: String,
    pub tag_name: String,
    pub version: String,
    pub published_at: DateTime<Utc>,
    pub url: String,
    #[serde(default)]
    pub prerelease: bool,
    pub body: Option<String>,
    pub channel_name: Option<ChannelName>,
    pub commit_sha: Option<String>,
    #[serde(default)]
    pub republish_count: i64,
    pub created_at: DateTime<Utc>,
}

/// The four named streams a channel can feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelName {
    Stable,
    Prerelease,
    Beta,
    Canary,
}

impl ChannelName {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Stable => "stable",
            Self::Prerelease => "prerelease",
            Self::Beta => "beta",
            Self::Canary => "canary",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "stable" => Some(Self::Stable),
            "prerelease" => Some(Self::Prerelease),
            "beta" => Some(Self::Beta),
            "canary" => Some(Self::Canary),
            _ => None,
        }
    }
}

/// Platform-type predicate of a channel. `None` on the channel means both
/// release kinds pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelType {
    Release,
    Prerelease,
}

/// A named classification rule embedded in a tracker config.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Channel {
    pub name: ChannelName,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub channel_type: Option<ChannelType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub include_pattern: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exclude_pattern: Option<String>,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_true() -> bool {
    true
}

/// Where a tracker polls, with the kind-specific locators.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum TrackerKind {
    /// `repo` is `owner/name`.
    Github { repo: String },
    /// `project` is the namespaced path, `instance` the base URL of the
    /// GitLab installation.
    Gitlab {
        project: String,
        #[serde(default = "default_gitlab_instance")]
        instance: String,
    },
    /// `repo` is the chart repository URL, `chart` the entry name in its
    /// index.
    Helm { repo: String, chart: String },
}

fn default_gitlab_instance() -> String {
    "https://gitlab.com".to_string()
}

impl TrackerKind {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Github { .. } => "github",
            Self::Gitlab { .. } => "gitlab",
            Self::Helm { .. } => "helm",
        }
    }

    /// Rejects empty locator fields early, so a broken config never
    /// reaches the scheduler.
    pub fn validate(&self) -> Result<(), TrackError> {
        match self {
            Self::Github { repo } => {
                if repo.split('/').filter(|p| !p.is_empty()).count() != 2 {
                    return Err(TrackError::Config(format!(
                        "github repo must be owner/name, got {repo:?}"
                    )));
                }
            }
            Self::Gitlab { project, instance } => {
                if project.is_empty() {
                    return Err(TrackError::Config("gitlab project is empty".into()));
                }
                url::Url::parse(instance)
                    .map_err(|e| TrackError::Config(format!("gitlab instance: {e}")))?;
            }
            Self::Helm { repo, chart } => {
                url::Url::parse(repo)
                    .map_err(|e| TrackError::Config(format!("helm repo: {e}")))?;
                if chart.is_empty() {
                    return Err(TrackError::Config("helm chart is empty".into()));
                }
            }
        }
        Ok(())
    }
}

/// A poll target as configured through the admin API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackerConfig {
    pub name: String,
    #[serde(flatten)]
    pub kind: TrackerKind,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_interval")]
    pub interval_minutes: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credential_name: Option<String>,
    #[serde(default)]
    pub channels: Vec<Channel>,
}

fn default_interval() -> u32 {
    60
}

impl TrackerConfig {
    pub fn validate(&self) -> Result<(), TrackError> {
        if self.name.is_empty() {
            return Err(TrackError::Config("tracker name is empty".into()));
        }
        if self.interval_minutes < 1 {
            return Err(TrackError::Config("interval_minutes must be >= 1".into()));
        }
        self.kind.validate()?;
        for channel in &self.channels {
            for pattern in [&channel.include_pattern, &channel.exclude_pattern]
                .into_iter()
                .flatten()
            {
                regex::Regex::new(pattern).map_err(|e| {
                    TrackError::Config(format!(
                        "channel {} pattern {pattern:?}: {e}",
                        channel.name.as_str()
                    ))
                })?;
            }
        }
        Ok(())
    }

    /// A tracker with channels counts as enabled only while at least one
    /// channel is.
    pub fn effective_enabled(&self) -> bool {
        if self.channels.is_empty() {
            self.enabled
        } else {
            self.enabled && self.channels.iter().any(|c| c.enabled)
        }
    }
}

/// Mutable per-tracker summary, rewritten after every check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackerStatus {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub enabled: bool,
    pub last_check: Option<DateTime<Utc>>,
    pub last_version: Option<String>,
    pub error: Option<String>,
    #[serde(default)]
    pub channel_count: usize,
}

/// An upstream API token. The `token` field holds cleartext in memory;
/// the store encrypts on write and decrypts on read.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Credential {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Credential {
    /// First-four…last-four form used by every external response.
    pub fn masked_token(&self) -> String {
        if self.token.len() > 8 {
            format!("{}...{}", &self.token[..4], &self.token[self.token.len() - 4..])
        } else {
            "****".to_string()
        }
    }
}

/// Event kinds a notifier can subscribe to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationEvent {
    NewRelease,
    Republish,
    Error,
}

impl NotificationEvent {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NewRelease => "new_release",
            Self::Republish => "republish",
            Self::Error => "error",
        }
    }

    /// Human form used in notification text, e.g. "New Release".
    pub fn title(self) -> &'static str {
        match self {
            Self::NewRelease => "New Release",
            Self::Republish => "Republish",
            Self::Error => "Error",
        }
    }
}

/// A delivery target for release events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notifier {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub url: String,
    #[serde(default)]
    pub events: Vec<NotificationEvent>,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Outcome of saving a release draft.
#[derive(Debug, Clone, PartialEq)]
pub enum SaveVerdict {
    /// First sighting of this `(tracker, tag)`.
    New,
    /// Same tag, different underlying commit identity.
    Republish { old_commit: Option<String> },
    /// Only metadata changed; commit identity untouched.
    Metadata,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyStat {
    pub date: NaiveDate,
    pub channels: BTreeMap<String, i64>,
}

/// Aggregates for the dashboard.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReleaseStats {
    pub total_trackers: i64,
    pub total_releases: i64,
    pub recent_releases: i64,
    pub latest_update: Option<DateTime<Utc>>,
    pub daily_stats: Vec<DailyStat>,
    pub channel_stats: BTreeMap<String, i64>,
    pub release_type_stats: BTreeMap<String, i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    pub username: String,
    pub email: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub last_login_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Session {
    pub id: Option<i64>,
    pub user_id: i64,
    pub token_hash: String,
    pub refresh_token_hash: Option<String>,
    pub user_agent: Option<String>,
    pub ip_address: Option<String>,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}
