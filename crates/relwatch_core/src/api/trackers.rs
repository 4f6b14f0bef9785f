use std::collections::HashMap;

use axum::extract::{Path, Query, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{Value, json};

use crate::channel;
use crate::model::{TrackerConfig, TrackerStatus};

use super::{ApiError, AppState, CurrentUser, Page};

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/", get(list).post(create))
        .route("/{name}", get(detail).put(update).delete(remove))
        .route("/{name}/config", get(config_detail))
        .route("/{name}/check", post(check_now))
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

/// Status rows joined with computed fields: enabled derives from channel
/// enablement, latest version from the bulk recent-releases query run
/// through the channel filter.
async fn list(
    State(state): State<AppState>,
    _user: CurrentUser,
    Query(params): Query<ListParams>,
) -> Result<Json<Page<TrackerStatus>>, ApiError> {
    let total = state.store.count_tracker_configs().await?;
    let configs = state
        .store
        .get_tracker_configs_paginated(params.skip, params.limit)
        .await?;

    let statuses = state.store.get_all_tracker_status().await?;
    let mut status_map: HashMap<String, TrackerStatus> =
        statuses.into_iter().map(|s| (s.name.clone(), s)).collect();

    let names: Vec<String> = configs.iter().map(|c| c.name.clone()).collect();
    let bulk = state.store.releases_for_trackers_bulk(&names, 20).await?;

    let items = configs
        .iter()
        .map(|config| {
            let releases = bulk.get(&config.name).map(Vec::as_slice).unwrap_or(&[]);
            let latest = channel::select_best_release(releases, &config.channels)
                .map(|r| r.version);

            let mut status = status_map.remove(&config.name).unwrap_or(TrackerStatus {
                name: config.name.clone(),
                kind: config.kind.label().to_string(),
                enabled: false,
                last_check: None,
                last_version: None,
                error: None,
                channel_count: 0,
            });
            status.enabled = config.effective_enabled();
            status.channel_count = config.channels.len();
            if latest.is_some() {
                status.last_version = latest;
            }
            status
        })
        .collect();

    Ok(Json(Page { items, total, skip: params.skip, limit: params.limit }))
}

async fn detail(
    State(state): State<AppState>,
    _user: CurrentUser,
    Path(name): Path<String>,
) -> Result<Json<TrackerStatus>, ApiError> {
    let config = state
        .store
        .get_tracker_config(&name)
        .await?
        .ok_or_else(|| ApiError::not_found("tracker not found"))?;

    let mut status = state.store.get_tracker_status(&name).await?.unwrap_or(TrackerStatus {
        name: config.name.clone(),
        kind: config.kind.label().to_string(),
        enabled: false,
        last_check: None,
        last_version: None,
        error: None,
        channel_count: 0,
    });
    status.enabled = config.effective_enabled();
    status.channel_count = config.channels.len();
    if let Some(latest) = state
        .store
        .latest_release_for_channels(&name, &config.channels)
        .await?
    {
        status.last_version = Some(latest.version);
    }
    Ok(Json(status))
}

async fn config_detail(
    State(state): State<AppState>,
    _user: CurrentUser,
    Path(name): Path<String>,
) -> Result<Json<TrackerConfig>, ApiError> {
    let config = state
        .store
        .get_tracker_config(&name)
        .await?
        .ok_or_else(|| ApiError::not_found("tracker not found"))?;
    Ok(Json(config))
}

async fn create(
    State(state): State<AppState>,
    _user: CurrentUser,
    Json(config): Json<TrackerConfig>,
) -> Result<Json<Value>, ApiError> {
    config.validate()?;
    if state.store.get_tracker_config(&config.name).await?.is_some() {
        return Err(ApiError::bad_request("tracker name already exists"));
    }
    state.store.save_tracker_config(&config).await?;
    state.scheduler.refresh_tracker(&config.name).await?;
    Ok(Json(json!({"message": format!("tracker {} created", config.name)})))
}

async fn update(
    State(state): State<AppState>,
    _user: CurrentUser,
    Path(name): Path<String>,
    Json(config): Json<TrackerConfig>,
) -> Result<Json<Value>, ApiError> {
    if state.store.get_tracker_config(&name).await?.is_none() {
        return Err(ApiError::not_found("tracker not found"));
    }
    if config.name != name {
        return Err(ApiError::bad_request("tracker name cannot be changed"));
    }
    config.validate()?;
    state.store.save_tracker_config(&config).await?;
    state.scheduler.refresh_tracker(&name).await?;
    Ok(Json(json!({"message": format!("tracker {name} updated")})))
}

/// Cascades: config, status, releases (history follows by foreign key)
/// and the periodic job.
async fn remove(
    State(state): State<AppState>,
    _user: CurrentUser,
    Path(name): Path<String>,
) -> Result<Json<Value>, ApiError> {
    if state.store.get_tracker_config(&name).await?.is_none() {
        return Err(ApiError::not_found("tracker not found"));
    }
    state.store.delete_tracker_config(&name).await?;
    state.store.delete_tracker_status(&name).await?;
    state.store.delete_releases_by_tracker(&name).await?;
    state.scheduler.remove_tracker(&name).await;
    Ok(Json(json!({"message": format!("tracker {name} deleted")})))
}

async fn check_now(
    State(state): State<AppState>,
    _user: CurrentUser,
    Path(name): Path<String>,
) -> Result<Json<TrackerStatus>, ApiError> {
    let status = state.scheduler.check_now(&name).await?;
    Ok(Json(status))
}
