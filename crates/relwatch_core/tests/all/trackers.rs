use secrecy::SecretString;
use serde_json::json;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use relwatch_core::trackers::{GitlabTracker, HelmTracker, Tracker};

use crate::helpers::{gitlab_release_json, mount_gitlab_releases, published};

#[tokio::test]
async fn gitlab_drafts_carry_commits_and_no_prerelease_flag() {
    let server = MockServer::start().await;
    mount_gitlab_releases(
        &server,
        "inkscape",
        json!([
            gitlab_release_json("v1.1.0", Some("bbb"), published(10)),
            gitlab_release_json("v1.0.0", Some("aaa"), published(8)),
        ]),
    )
    .await;

    let tracker =
        GitlabTracker::new("ink".to_string(), "inkscape".to_string(), server.uri(), None).unwrap();
    let drafts = tracker.fetch_all(10).await.unwrap();

    assert_eq!(drafts.len(), 2);
    assert_eq!(drafts[0].tag_name, "v1.1.0");
    assert_eq!(drafts[0].commit_sha.as_deref(), Some("bbb"));
    assert!(drafts.iter().all(|d| !d.prerelease));
    assert!(drafts[0].url.contains("/inkscape/-/releases/v1.1.0"));
}

#[tokio::test]
async fn gitlab_backfills_missing_commits_from_the_tags_endpoint() {
    let server = MockServer::start().await;
    mount_gitlab_releases(
        &server,
        "inkscape",
        json!([gitlab_release_json("v2.0.0", None, published(10))]),
    )
    .await;
    Mock::given(method("GET"))
        .and(path("/api/v4/projects/inkscape/repository/tags/v2.0.0"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "name": "v2.0.0",
            "commit": {"id": "cafe1234"},
        })))
        .mount(&server)
        .await;

    let tracker =
        GitlabTracker::new("ink".to_string(), "inkscape".to_string(), server.uri(), None).unwrap();
    let drafts = tracker.fetch_all(10).await.unwrap();
    assert_eq!(drafts[0].commit_sha.as_deref(), Some("cafe1234"));
}

#[tokio::test]
async fn gitlab_sends_the_resolved_token_as_private_token() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v4/projects/secretive/releases"))
        .and(header("PRIVATE-TOKEN", "glpat-abc"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .expect(1)
        .mount(&server)
        .await;

    let tracker = GitlabTracker::new(
        "sec".to_string(),
        "secretive".to_string(),
        server.uri(),
        Some(SecretString::from("glpat-abc")),
    )
    .unwrap();
    assert!(tracker.fetch_all(5).await.unwrap().is_empty());
}

#[tokio::test]
async fn gitlab_upstream_failure_is_an_upstream_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(404).set_body_string("project not found"))
        .mount(&server)
        .await;

    let tracker =
        GitlabTracker::new("ink".to_string(), "inkscape".to_string(), server.uri(), None).unwrap();
    let err = tracker.fetch_all(5).await.unwrap_err();
    assert!(err.to_string().contains("404"));
}

#[tokio::test]
async fn helm_index_is_sorted_and_classified() {
    let server = MockServer::start().await;
    let index = "\
apiVersion: v1
entries:
  cert-manager:
    - version: 1.14.0
      created: 2026-06-01T00:00:00Z
    - version: 1.15.0-beta.1
      created: 2026-06-20T00:00:00Z
    - version: 1.14.1
      created: 2026-06-10T00:00:00Z
  other-chart:
    - version: 9.9.9
      created: 2026-06-15T00:00:00Z
";
    Mock::given(method("GET"))
        .and(path("/index.yaml"))
        .respond_with(ResponseTemplate::new(200).set_body_string(index))
        .mount(&server)
        .await;

    let tracker = HelmTracker::new(
        "cm".to_string(),
        server.uri(),
        "cert-manager".to_string(),
        None,
    )
    .unwrap();
    let drafts = tracker.fetch_all(10).await.unwrap();

    assert_eq!(
        drafts.iter().map(|d| d.version.as_str()).collect::<Vec<_>>(),
        ["1.15.0-beta.1", "1.14.1", "1.14.0"]
    );
    assert!(drafts[0].prerelease);
    assert!(!drafts[1].prerelease);
}

#[tokio::test]
async fn helm_unknown_chart_yields_no_drafts() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/index.yaml"))
        .respond_with(ResponseTemplate::new(200).set_body_string("entries: {}\n"))
        .mount(&server)
        .await;

    let tracker =
        HelmTracker::new("cm".to_string(), server.uri(), "missing".to_string(), None).unwrap();
    assert!(tracker.fetch_all(10).await.unwrap().is_empty());
    assert!(tracker.fetch_latest().await.unwrap().is_none());
}

#[tokio::test]
async fn github_without_a_credential_refuses_to_fetch() {
    let config: relwatch_core::model::TrackerConfig = serde_json::from_value(json!({
        "name": "k8s",
        "type": "github",
        "repo": "kubernetes/kubernetes",
    }))
    .unwrap();
    let tracker = Tracker::from_config(&config, None).unwrap();
    let err = tracker.fetch_all(5).await.unwrap_err();
    assert!(matches!(err, relwatch_core::TrackError::AuthRequired(_)));
}

#[tokio::test]
async fn github_parses_graphql_releases() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/graphql"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": {
                "repository": {
                    "releases": {
                        "nodes": [
                            {
                                "name": "v1.30.0",
                                "tagName": "v1.30.0",
                                "description": "notes",
                                "publishedAt": "2026-06-30T12:00:00Z",
                                "isPrerelease": false,
                                "url": "https://github.com/kubernetes/kubernetes/releases/tag/v1.30.0",
                                "tagCommit": {"oid": "feedbeef", "message": "release"}
                            },
                            {
                                "name": null,
                                "tagName": "v1.31.0-rc.0",
                                "description": null,
                                "publishedAt": "2026-06-29T12:00:00Z",
                                "isPrerelease": true,
                                "url": "https://github.com/kubernetes/kubernetes/releases/tag/v1.31.0-rc.0",
                                "tagCommit": {"oid": "0ddba11", "message": "cut rc"}
                            }
                        ]
                    }
                }
            }
        })))
        .mount(&server)
        .await;

    let tracker = relwatch_core::trackers::GithubTracker::new(
        "k8s".to_string(),
        "kubernetes/kubernetes".to_string(),
        Some(SecretString::from("ghp_token")),
    )
    .unwrap()
    .with_base_url(server.uri());

    let drafts = tracker.fetch_all(10).await.unwrap();
    assert_eq!(drafts.len(), 2);
    assert_eq!(drafts[0].version, "1.30.0");
    assert_eq!(drafts[0].commit_sha.as_deref(), Some("feedbeef"));
    // Display name falls back to the tag, notes to the commit message.
    assert_eq!(drafts[1].name, "v1.31.0-rc.0");
    assert_eq!(drafts[1].body.as_deref(), Some("cut rc"));
    assert!(drafts[1].prerelease);
}

#[tokio::test]
async fn github_graphql_errors_surface_as_upstream() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/graphql"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": null,
            "errors": [{"message": "API rate limit exceeded"}]
        })))
        .mount(&server)
        .await;

    let tracker = relwatch_core::trackers::GithubTracker::new(
        "k8s".to_string(),
        "kubernetes/kubernetes".to_string(),
        Some(SecretString::from("ghp_token")),
    )
    .unwrap()
    .with_base_url(server.uri());

    let err = tracker.fetch_all(10).await.unwrap_err();
    assert!(err.to_string().contains("rate limit"));
}
