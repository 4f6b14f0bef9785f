use serde_json::{Value, json};
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use relwatch_core::TrackError;
use relwatch_core::model::{ChannelName, Credential, NotificationEvent, TrackerConfig, TrackerKind};
use relwatch_core::scheduler::Scheduler;
use relwatch_core::store::ReleaseFilter;

use crate::helpers::{
    canary_channel, gitlab_config, gitlab_release_json, mount_gitlab_releases, published,
    stable_channel, test_store, webhook_notifier,
};

fn all_events() -> Vec<NotificationEvent> {
    vec![NotificationEvent::NewRelease, NotificationEvent::Republish]
}

async fn mount_ok_webhook(webhook: &MockServer) {
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(204))
        .mount(webhook)
        .await;
}

async fn webhook_events(webhook: &MockServer) -> Vec<String> {
    webhook
        .received_requests()
        .await
        .unwrap()
        .iter()
        .map(|r| {
            let body: Value = serde_json::from_slice(&r.body).unwrap();
            body["event"].as_str().unwrap().to_string()
        })
        .collect()
}

fn releases_filter(tracker: &str, include_history: bool) -> ReleaseFilter {
    ReleaseFilter {
        tracker: Some(tracker.to_string()),
        include_history,
        ..ReleaseFilter::default()
    }
}

#[tokio::test]
async fn first_observation_saves_classifies_and_notifies() {
    let ts = test_store().await;
    let upstream = MockServer::start().await;
    let webhook = MockServer::start().await;
    mount_ok_webhook(&webhook).await;
    webhook_notifier(&ts.store, &webhook.uri(), all_events()).await;

    mount_gitlab_releases(
        &upstream,
        "proj",
        json!([gitlab_release_json("v1.0.0", Some("aaa"), published(8))]),
    )
    .await;
    ts.store
        .save_tracker_config(&gitlab_config("s1", "proj", &upstream.uri()))
        .await
        .unwrap();

    let scheduler = Scheduler::new(ts.store.clone());
    let status = scheduler.check_now("s1").await.unwrap();

    assert_eq!(status.last_version.as_deref(), Some("v1.0.0"));
    assert!(status.error.is_none());
    assert!(status.enabled);

    let rows = ts.store.get_releases(&releases_filter("s1", true), 0, 10).await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].channel_name, Some(ChannelName::Stable));
    assert_eq!(rows[0].republish_count, 0);
    assert_eq!(webhook_events(&webhook).await, ["new_release"]);
}

#[tokio::test]
async fn identical_re_poll_is_silent() {
    let ts = test_store().await;
    let upstream = MockServer::start().await;
    let webhook = MockServer::start().await;
    mount_ok_webhook(&webhook).await;
    webhook_notifier(&ts.store, &webhook.uri(), all_events()).await;

    mount_gitlab_releases(
        &upstream,
        "proj",
        json!([gitlab_release_json("v1.0.0", Some("aaa"), published(8))]),
    )
    .await;
    ts.store
        .save_tracker_config(&gitlab_config("s1", "proj", &upstream.uri()))
        .await
        .unwrap();

    let scheduler = Scheduler::new(ts.store.clone());
    scheduler.check_now("s1").await.unwrap();
    scheduler.check_now("s1").await.unwrap();

    let rows = ts.store.get_releases(&releases_filter("s1", true), 0, 10).await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].republish_count, 0);
    assert_eq!(webhook_events(&webhook).await, ["new_release"]);
}

#[tokio::test]
async fn silent_republish_snapshots_and_notifies_once() {
    let ts = test_store().await;
    let upstream = MockServer::start().await;
    let webhook = MockServer::start().await;
    mount_ok_webhook(&webhook).await;
    webhook_notifier(&ts.store, &webhook.uri(), all_events()).await;
    ts.store
        .save_tracker_config(&gitlab_config("s1", "proj", &upstream.uri()))
        .await
        .unwrap();
    let scheduler = Scheduler::new(ts.store.clone());

    mount_gitlab_releases(
        &upstream,
        "proj",
        json!([gitlab_release_json("v1.0.0", Some("aaa"), published(8))]),
    )
    .await;
    scheduler.check_now("s1").await.unwrap();

    // Same tag, different commit.
    upstream.reset().await;
    mount_gitlab_releases(
        &upstream,
        "proj",
        json!([gitlab_release_json("v1.0.0", Some("bbb"), published(8))]),
    )
    .await;
    scheduler.check_now("s1").await.unwrap();

    let current = ts.store.get_releases(&releases_filter("s1", false), 0, 10).await.unwrap();
    assert_eq!(current.len(), 1);
    assert_eq!(current[0].commit_sha.as_deref(), Some("bbb"));
    assert_eq!(current[0].republish_count, 1);

    let with_history = ts.store.get_releases(&releases_filter("s1", true), 0, 10).await.unwrap();
    assert_eq!(with_history.len(), 2);
    assert!(with_history.iter().any(|r| r.commit_sha.as_deref() == Some("aaa")));

    assert_eq!(webhook_events(&webhook).await, ["new_release", "republish"]);
}

#[tokio::test]
async fn channel_split_saves_one_row_per_stream() {
    let ts = test_store().await;
    let upstream = MockServer::start().await;
    let webhook = MockServer::start().await;
    mount_ok_webhook(&webhook).await;
    webhook_notifier(&ts.store, &webhook.uri(), all_events()).await;

    let mut config = gitlab_config("s4", "proj", &upstream.uri());
    config.channels = vec![stable_channel(), canary_channel()];
    ts.store.save_tracker_config(&config).await.unwrap();

    mount_gitlab_releases(
        &upstream,
        "proj",
        json!([
            gitlab_release_json("v2.0.0-rc1", Some("xxx"), published(10)),
            gitlab_release_json("v1.9.0", Some("yyy"), published(8)),
        ]),
    )
    .await;

    let scheduler = Scheduler::new(ts.store.clone());
    let status = scheduler.check_now("s4").await.unwrap();
    assert_eq!(status.last_version.as_deref(), Some("v2.0.0-rc1"));

    let rows = ts.store.get_releases(&releases_filter("s4", false), 0, 10).await.unwrap();
    assert_eq!(rows.len(), 2);
    let canary = rows.iter().find(|r| r.tag_name == "v2.0.0-rc1").unwrap();
    assert_eq!(canary.channel_name, Some(ChannelName::Canary));
    let stable = rows.iter().find(|r| r.tag_name == "v1.9.0").unwrap();
    assert_eq!(stable.channel_name, Some(ChannelName::Stable));

    assert_eq!(webhook_events(&webhook).await, ["new_release", "new_release"]);
}

#[tokio::test]
async fn republish_during_multi_channel_poll_touches_only_the_moved_tag() {
    let ts = test_store().await;
    let upstream = MockServer::start().await;
    let webhook = MockServer::start().await;
    mount_ok_webhook(&webhook).await;
    webhook_notifier(&ts.store, &webhook.uri(), all_events()).await;

    let mut config = gitlab_config("s5", "proj", &upstream.uri());
    config.channels = vec![stable_channel(), canary_channel()];
    ts.store.save_tracker_config(&config).await.unwrap();
    let scheduler = Scheduler::new(ts.store.clone());

    mount_gitlab_releases(
        &upstream,
        "proj",
        json!([
            gitlab_release_json("v2.0.0-rc1", Some("xxx"), published(10)),
            gitlab_release_json("v1.9.0", Some("yyy"), published(8)),
        ]),
    )
    .await;
    scheduler.check_now("s5").await.unwrap();

    upstream.reset().await;
    mount_gitlab_releases(
        &upstream,
        "proj",
        json!([
            gitlab_release_json("v2.0.0-rc1", Some("zzz"), published(10)),
            gitlab_release_json("v1.9.0", Some("yyy"), published(8)),
        ]),
    )
    .await;
    scheduler.check_now("s5").await.unwrap();

    let rows = ts.store.get_releases(&releases_filter("s5", false), 0, 10).await.unwrap();
    let canary = rows.iter().find(|r| r.tag_name == "v2.0.0-rc1").unwrap();
    assert_eq!(canary.commit_sha.as_deref(), Some("zzz"));
    assert_eq!(canary.republish_count, 1);
    let stable = rows.iter().find(|r| r.tag_name == "v1.9.0").unwrap();
    assert_eq!(stable.republish_count, 0);

    assert_eq!(
        webhook_events(&webhook).await,
        ["new_release", "new_release", "republish"]
    );
}

#[tokio::test]
async fn rate_limited_webhook_does_not_duplicate_save_side_effects() {
    let ts = test_store().await;
    let upstream = MockServer::start().await;
    let webhook = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "1"))
        .up_to_n_times(2)
        .mount(&webhook)
        .await;
    mount_ok_webhook(&webhook).await;
    webhook_notifier(&ts.store, &webhook.uri(), all_events()).await;

    mount_gitlab_releases(
        &upstream,
        "proj",
        json!([gitlab_release_json("v1.0.0", Some("aaa"), published(8))]),
    )
    .await;
    ts.store
        .save_tracker_config(&gitlab_config("s6", "proj", &upstream.uri()))
        .await
        .unwrap();

    let scheduler = Scheduler::new(ts.store.clone());
    let started = std::time::Instant::now();
    let status = scheduler.check_now("s6").await.unwrap();
    assert!(status.error.is_none());
    assert!(started.elapsed() >= std::time::Duration::from_secs(2));

    // Three deliveries of the same payload, one committed row.
    let requests = webhook.received_requests().await.unwrap();
    assert_eq!(requests.len(), 3);
    assert_eq!(requests[0].body, requests[2].body);
    assert_eq!(
        ts.store.count_releases(&releases_filter("s6", true)).await.unwrap(),
        1
    );
}

#[tokio::test]
async fn empty_upstream_writes_no_versions_found() {
    let ts = test_store().await;
    let upstream = MockServer::start().await;
    let webhook = MockServer::start().await;
    mount_ok_webhook(&webhook).await;
    webhook_notifier(&ts.store, &webhook.uri(), all_events()).await;

    mount_gitlab_releases(&upstream, "proj", json!([])).await;
    ts.store
        .save_tracker_config(&gitlab_config("s7", "proj", &upstream.uri()))
        .await
        .unwrap();

    let scheduler = Scheduler::new(ts.store.clone());
    let status = scheduler.check_now("s7").await.unwrap();
    assert_eq!(status.error.as_deref(), Some("no versions found"));
    assert!(webhook.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn disabled_tracker_is_recorded_and_never_polled() {
    let ts = test_store().await;
    let upstream = MockServer::start().await;

    let mut config = gitlab_config("s8", "proj", &upstream.uri());
    config.enabled = false;
    ts.store.save_tracker_config(&config).await.unwrap();

    let scheduler = Scheduler::new(ts.store.clone());
    let status = scheduler.check_now("s8").await.unwrap();
    assert!(!status.enabled);
    assert_eq!(status.error.as_deref(), Some("disabled"));
    assert!(upstream.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn github_without_credential_errors_interactively_and_persists_status() {
    let ts = test_store().await;
    let config = TrackerConfig {
        name: "gh".to_string(),
        kind: TrackerKind::Github { repo: "kubernetes/kubernetes".to_string() },
        enabled: true,
        interval_minutes: 60,
        credential_name: None,
        channels: vec![stable_channel()],
    };
    ts.store.save_tracker_config(&config).await.unwrap();

    let scheduler = Scheduler::new(ts.store.clone());
    let err = scheduler.check_now("gh").await.unwrap_err();
    assert!(matches!(err, TrackError::AuthRequired(_)));

    let status = ts.store.get_tracker_status("gh").await.unwrap().unwrap();
    assert!(status.error.unwrap().contains("credential required"));
}

#[tokio::test]
async fn named_credential_reaches_the_adapter_in_cleartext() {
    let ts = test_store().await;
    let upstream = MockServer::start().await;
    let now = chrono::Utc::now();
    ts.store
        .create_credential(&Credential {
            id: None,
            name: "lab".to_string(),
            kind: "gitlab".to_string(),
            token: "glpat-resolved".to_string(),
            description: None,
            created_at: now,
            updated_at: now,
        })
        .await
        .unwrap();

    Mock::given(method("GET"))
        .and(path("/api/v4/projects/proj/releases"))
        .and(header("PRIVATE-TOKEN", "glpat-resolved"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            gitlab_release_json("v3.0.0", Some("ccc"), published(8))
        ])))
        .expect(1)
        .mount(&upstream)
        .await;

    let mut config = gitlab_config("s10", "proj", &upstream.uri());
    config.credential_name = Some("lab".to_string());
    ts.store.save_tracker_config(&config).await.unwrap();

    let scheduler = Scheduler::new(ts.store.clone());
    let status = scheduler.check_now("s10").await.unwrap();
    assert!(status.error.is_none());
}

#[tokio::test]
async fn dangling_credential_degrades_to_anonymous() {
    let ts = test_store().await;
    let upstream = MockServer::start().await;
    mount_gitlab_releases(
        &upstream,
        "proj",
        json!([gitlab_release_json("v1.0.0", Some("aaa"), published(8))]),
    )
    .await;

    let mut config = gitlab_config("s11", "proj", &upstream.uri());
    config.credential_name = Some("no-such-credential".to_string());
    ts.store.save_tracker_config(&config).await.unwrap();

    let scheduler = Scheduler::new(ts.store.clone());
    let status = scheduler.check_now("s11").await.unwrap();
    assert!(status.error.is_none());
    assert_eq!(status.last_version.as_deref(), Some("v1.0.0"));
}

#[tokio::test]
async fn startup_sweep_covers_every_tracker_in_parallel() {
    let ts = test_store().await;
    let upstream = MockServer::start().await;
    mount_gitlab_releases(
        &upstream,
        "one",
        json!([gitlab_release_json("v1.0.0", Some("a"), published(8))]),
    )
    .await;
    // The second tracker fails; its error must stay inside its own status.
    Mock::given(method("GET"))
        .and(path("/api/v4/projects/two/releases"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&upstream)
        .await;

    ts.store
        .save_tracker_config(&gitlab_config("one", "one", &upstream.uri()))
        .await
        .unwrap();
    ts.store
        .save_tracker_config(&gitlab_config("two", "two", &upstream.uri()))
        .await
        .unwrap();

    let scheduler = Scheduler::new(ts.store.clone());
    scheduler.initialize().await.unwrap();
    scheduler.start().await;

    let ok = ts.store.get_tracker_status("one").await.unwrap().unwrap();
    assert!(ok.error.is_none());
    assert_eq!(ok.last_version.as_deref(), Some("v1.0.0"));

    let failed = ts.store.get_tracker_status("two").await.unwrap().unwrap();
    assert!(failed.error.unwrap().contains("404"));

    scheduler.shutdown();
}

#[tokio::test]
async fn unknown_tracker_check_is_a_config_error() {
    let ts = test_store().await;
    let scheduler = Scheduler::new(ts.store.clone());
    let err = scheduler.check_now("ghost").await.unwrap_err();
    assert!(matches!(err, TrackError::Config(_)));
}
