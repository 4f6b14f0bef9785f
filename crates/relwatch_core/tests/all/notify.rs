use std::time::{Duration, Instant};

use wiremock::matchers::method;
use wiremock::{Mock, MockServer, ResponseTemplate};

use relwatch_core::model::NotificationEvent;
use relwatch_core::notify::WebhookNotifier;

use crate::helpers::{draft, published};

fn notifier_for(server: &MockServer) -> WebhookNotifier {
    WebhookNotifier::new("hook".to_string(), server.uri())
}

#[tokio::test]
async fn rate_limited_delivery_retries_with_the_same_payload() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "1"))
        .up_to_n_times(2)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(204))
        .mount(&server)
        .await;

    let release = draft("s1", "v1.0.0", Some("aaa"), false, published(8));
    let started = Instant::now();
    notifier_for(&server)
        .notify(NotificationEvent::NewRelease, &release)
        .await
        .unwrap();
    assert!(started.elapsed() >= Duration::from_secs(2));

    let requests = server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 3);
    assert_eq!(requests[0].body, requests[1].body);
    assert_eq!(requests[1].body, requests[2].body);
}

#[tokio::test]
async fn fractional_retry_after_header_is_honored() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "0.7"))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(204))
        .mount(&server)
        .await;

    let release = draft("s1", "v1.0.0", Some("aaa"), false, published(8));
    let started = Instant::now();
    notifier_for(&server)
        .notify(NotificationEvent::NewRelease, &release)
        .await
        .unwrap();

    // 0.7 s indicated plus the half-second safety margin.
    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_millis(1190), "waited only {elapsed:?}");
    assert!(elapsed < Duration::from_millis(2500), "waited {elapsed:?}");
    assert_eq!(server.received_requests().await.unwrap().len(), 2);
}

#[tokio::test]
async fn millisecond_body_convention_is_divided_down() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(
            ResponseTemplate::new(429).set_body_json(serde_json::json!({"retry_after": 2500})),
        )
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(204))
        .mount(&server)
        .await;

    let release = draft("s1", "v1.0.0", Some("aaa"), false, published(8));
    let started = Instant::now();
    notifier_for(&server)
        .notify(NotificationEvent::NewRelease, &release)
        .await
        .unwrap();

    // 2500 ms -> 2.5 s, plus the margin.
    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_millis(2900), "waited only {elapsed:?}");
    assert!(elapsed < Duration::from_millis(4500), "waited {elapsed:?}");
}

#[tokio::test]
async fn persistent_rate_limiting_gives_up_after_four_attempts() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "0"))
        .mount(&server)
        .await;

    let release = draft("s1", "v1.0.0", Some("aaa"), false, published(8));
    let result = notifier_for(&server)
        .notify(NotificationEvent::NewRelease, &release)
        .await;
    assert!(result.is_err());
    assert_eq!(server.received_requests().await.unwrap().len(), 4);
}

#[tokio::test]
async fn non_429_http_errors_are_terminal() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let release = draft("s1", "v1.0.0", Some("aaa"), false, published(8));
    let result = notifier_for(&server)
        .notify(NotificationEvent::NewRelease, &release)
        .await;
    assert!(result.is_err());
    assert_eq!(server.received_requests().await.unwrap().len(), 1);
}
