use axum::extract::{Path, Query, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use serde::Deserialize;
use serde_json::{Value, json};

use crate::model::{ChannelName, NotificationEvent, Notifier, Release};
use crate::notify::WebhookNotifier;

use super::{ApiError, AppState, CurrentUser, Page};

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/", get(list).post(create))
        .route("/{id}", get(detail).put(update).delete(remove))
        .route("/{id}/test", post(send_test))
}

#[derive(Deserialize)]
struct ListParams {
    #[serde(default)]
    skip: usize,
    #[serde(default = "default_limit")]
    limit: usize,
}

fn default_limit() -> usize {
    20
}

async fn list(
    State(state): State<AppState>,
    _user: CurrentUser,
    Query(params): Query<ListParams>,
) -> Result<Json<Page<Notifier>>, ApiError> {
    let total = state.store.count_notifiers().await?;
    let items = state
        .store
        .get_notifiers_paginated(params.skip, params.limit)
        .await?;
    Ok(Json(Page { items, total, skip: params.skip, limit: params.limit }))
}

async fn detail(
    State(state): State<AppState>,
    _user: CurrentUser,
    Path(id): Path<i64>,
) -> Result<Json<Notifier>, ApiError> {
    let notifier = state
        .store
        .get_notifier(id)
        .await?
        .ok_or_else(|| ApiError::not_found("notifier not found"))?;
    Ok(Json(notifier))
}

#[derive(Deserialize)]
struct NotifierRequest {
    name: String,
    #[serde(rename = "type")]
    kind: String,
    url: String,
    #[serde(default = "default_events")]
    events: Vec<NotificationEvent>,
    #[serde(default = "default_enabled")]
    enabled: bool,
    #[serde(default)]
    description: Option<String>,
}

fn default_events() -> Vec<NotificationEvent> {
    vec![NotificationEvent::NewRelease]
}

fn default_enabled() -> bool {
    true
}

impl NotifierRequest {
    fn validate(&self) -> Result<(), ApiError> {
        if self.name.is_empty() {
            return Err(ApiError::bad_request("notifier name is required"));
        }
        if self.kind != "webhook" {
            return Err(ApiError::bad_request("only webhook notifiers are supported"));
        }
        url::Url::parse(&self.url)
            .map_err(|e| ApiError::bad_request(format!("notifier url: {e}")))?;
        Ok(())
    }

    fn into_notifier(self) -> Notifier {
        let now = Utc::now();
        Notifier {
            id: None,
            name: self.name,
            kind: self.kind,
            url: self.url,
            events: self.events,
            enabled: self.enabled,
            description: self.description,
            created_at: now,
            updated_at: now,
        }
    }
}

async fn create(
    State(state): State<AppState>,
    _user: CurrentUser,
    Json(req): Json<NotifierRequest>,
) -> Result<Json<Value>, ApiError> {
    req.validate()?;
    if state.store.get_notifier_by_name(&req.name).await?.is_some() {
        return Err(ApiError::bad_request("notifier name already exists"));
    }
    let notifier = req.into_notifier();
    let id = state.store.create_notifier(&notifier).await?;
    Ok(Json(json!({"message": format!("notifier {} created", notifier.name), "id": id})))
}

async fn update(
    State(state): State<AppState>,
    _user: CurrentUser,
    Path(id): Path<i64>,
    Json(req): Json<NotifierRequest>,
) -> Result<Json<Value>, ApiError> {
    req.validate()?;
    let updated = state.store.update_notifier(id, &req.into_notifier()).await?;
    if !updated {
        return Err(ApiError::not_found("notifier not found"));
    }
    Ok(Json(json!({"message": "notifier updated"})))
}

async fn remove(
    State(state): State<AppState>,
    _user: CurrentUser,
    Path(id): Path<i64>,
) -> Result<Json<Value>, ApiError> {
    if !state.store.delete_notifier(id).await? {
        return Err(ApiError::not_found("notifier not found"));
    }
    Ok(Json(json!({"message": "notifier deleted"})))
}

/// Delivers a synthetic release so operators can verify the endpoint
/// without waiting for a real event.
async fn send_test(
    State(state): State<AppState>,
    _user: CurrentUser,
    Path(id): Path<i64>,
) -> Result<Json<Value>, ApiError> {
    let notifier = state
        .store
        .get_notifier(id)
        .await?
        .ok_or_else(|| ApiError::not_found("notifier not found"))?;

    let now = Utc::now();
    let release = Release {
        id: None,
        tracker_name: "relwatch-test".to_string(),
        name: "v0.0.0-test".to_string(),
        tag_name: "v0.0.0-test".to_string(),
        version: "0.0.0-test".to_string(),
        published_at: now,
        url: "https://example.com/releases/v0.0.0-test".to_string(),
        prerelease: false,
        body: Some("Test notification from relwatch.".to_string()),
        channel_name: Some(ChannelName::Stable),
        commit_sha: None,
        republish_count: 0,
        created_at: now,
    };

    let webhook = WebhookNotifier::new(notifier.name.clone(), notifier.url.clone());
    match webhook.notify(NotificationEvent::NewRelease, &release).await {
        Ok(()) => Ok(Json(json!({"message": "test notification sent"}))),
        Err(e) => Err(ApiError::bad_request(format!("test delivery failed: {e}"))),
    }
}
