use chrono::{DateTime, TimeZone as _, Utc};
use serde_json::{Value, json};
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use relwatch_core::crypto::TokenCipher;
use relwatch_core::model::{
    Channel, ChannelName, ChannelType, NotificationEvent, Notifier, Release, TrackerConfig,
    TrackerKind,
};
use relwatch_core::store::Store;

/// A store backed by a throwaway database file. The directory lives as
/// long as the value does.
pub struct TestStore {
    pub store: Store,
    _dir: TempDir,
}

pub async fn test_store() -> TestStore {
    let dir = tempfile::tempdir().unwrap();
    let cipher = TokenCipher::new(None).unwrap();
    let store = Store::open(&dir.path().join("test.db"), cipher).await.unwrap();
    TestStore { store, _dir: dir }
}

pub fn published(hour: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 7, 1, hour, 0, 0).unwrap()
}

pub fn draft(
    tracker: &str,
    tag: &str,
    commit_sha: Option<&str>,
    prerelease: bool,
    published_at: DateTime<Utc>,
) -> Release {
    Release {
        id: None,
        tracker_name: tracker.to_string(),
        name: tag.to_string(),
        tag_name: tag.to_string(),
        version: tag.trim_start_matches('v').to_string(),
        published_at,
        url: format!("https://example.com/{tracker}/releases/{tag}"),
        prerelease,
        body: Some(format!("notes for {tag}")),
        channel_name: Some(ChannelName::Stable),
        commit_sha: commit_sha.map(str::to_string),
        republish_count: 0,
        created_at: Utc::now(),
    }
}

pub fn stable_channel() -> Channel {
    Channel {
        name: ChannelName::Stable,
        channel_type: Some(ChannelType::Release),
        include_pattern: None,
        exclude_pattern: Some("-rc".to_string()),
        enabled: true,
    }
}

pub fn canary_channel() -> Channel {
    Channel {
        name: ChannelName::Canary,
        channel_type: None,
        include_pattern: Some("-rc".to_string()),
        exclude_pattern: None,
        enabled: true,
    }
}

/// A tracker pointed at a mock GitLab instance.
pub fn gitlab_config(name: &str, project: &str, instance: &str) -> TrackerConfig {
    TrackerConfig {
        name: name.to_string(),
        kind: TrackerKind::Gitlab {
            project: project.to_string(),
            instance: instance.to_string(),
        },
        enabled: true,
        interval_minutes: 60,
        credential_name: None,
        channels: vec![stable_channel()],
    }
}

pub fn gitlab_release_json(tag: &str, sha: Option<&str>, published_at: DateTime<Utc>) -> Value {
    let mut release = json!({
        "tag_name": tag,
        "name": tag,
        "description": format!("notes for {tag}"),
        "released_at": published_at.to_rfc3339(),
        "created_at": published_at.to_rfc3339(),
    });
    if let Some(sha) = sha {
        release["commit"] = json!({"id": sha});
    }
    release
}

pub async fn mount_gitlab_releases(server: &MockServer, project: &str, releases: Value) {
    Mock::given(method("GET"))
        .and(path(format!("/api/v4/projects/{project}/releases")))
        .respond_with(ResponseTemplate::new(200).set_body_json(releases))
        .mount(server)
        .await;
}

pub async fn webhook_notifier(store: &Store, url: &str, events: Vec<NotificationEvent>) {
    let now = Utc::now();
    store
        .create_notifier(&Notifier {
            id: None,
            name: "hook".to_string(),
            kind: "webhook".to_string(),
            url: url.to_string(),
            events,
            enabled: true,
            description: None,
            created_at: now,
            updated_at: now,
        })
        .await
        .unwrap();
}
