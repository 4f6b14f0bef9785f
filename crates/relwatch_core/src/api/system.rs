use axum::extract::{Path, State};
use axum::routing::get;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::model::ReleaseStats;

use super::{ApiError, AppState, CurrentUser};

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/api/stats", get(stats))
        .route("/api/config", get(config_snapshot))
        .route("/api/settings", get(settings_list).post(settings_set))
        .route("/api/settings/env", get(env_peek))
        .route("/api/settings/{key}", axum::routing::delete(settings_delete))
}

async fn stats(
    State(state): State<AppState>,
    _user: CurrentUser,
) -> Result<Json<ReleaseStats>, ApiError> {
    let tz = std::env::var("TZ")
        .ok()
        .and_then(|name| name.parse::<chrono_tz::Tz>().ok())
        .unwrap_or(chrono_tz::UTC);
    Ok(Json(state.store.stats(tz).await?))
}

/// Aggregated snapshot for the admin UI: store info plus every tracker
/// and notifier config.
async fn config_snapshot(
    State(state): State<AppState>,
    _user: CurrentUser,
) -> Result<Json<Value>, ApiError> {
    let trackers = state.store.get_all_tracker_configs().await?;
    let notifiers = state.store.get_notifiers().await?;
    Ok(Json(json!({
        "storage": {"type": "sqlite", "path": state.store.db_path()},
        "trackers": trackers,
        "notifiers": notifiers,
    })))
}

#[derive(Serialize, Deserialize)]
struct SettingItem {
    key: String,
    value: String,
}

async fn settings_list(
    State(state): State<AppState>,
    _user: CurrentUser,
) -> Result<Json<Vec<SettingItem>>, ApiError> {
    let settings = state.store.get_all_settings().await?;
    Ok(Json(
        settings
            .into_iter()
            .map(|(key, value)| SettingItem { key, value })
            .collect(),
    ))
}

async fn settings_set(
    State(state): State<AppState>,
    _user: CurrentUser,
    Json(setting): Json<SettingItem>,
) -> Result<Json<SettingItem>, ApiError> {
    state.store.set_setting(&setting.key, &setting.value).await?;
    Ok(Json(setting))
}

async fn settings_delete(
    State(state): State<AppState>,
    _user: CurrentUser,
    Path(key): Path<String>,
) -> Result<Json<Value>, ApiError> {
    state.store.delete_setting(&key).await?;
    Ok(Json(json!({"message": "setting deleted"})))
}

/// Operator peek at the environment the service actually sees. Secret
/// material leaves masked, like credential tokens do.
async fn env_peek(_user: CurrentUser) -> Json<Vec<SettingItem>> {
    const ALLOWED: [(&str, bool); 4] = [
        ("ENCRYPTION_KEY", true),
        ("JWT_SECRET", true),
        ("LOG_LEVEL", false),
        ("TZ", false),
    ];

    let items = ALLOWED
        .iter()
        .map(|(key, sensitive)| {
            let value = match std::env::var(key) {
                Ok(v) if *sensitive => mask(&v),
                Ok(v) => v,
                Err(_) => "(not set)".to_string(),
            };
            SettingItem { key: (*key).to_string(), value }
        })
        .collect();
    Json(items)
}

fn mask(value: &str) -> String {
    if value.len() > 8 {
        format!("{}...{}", &value[..4], &value[value.len() - 4..])
    } else {
        "******".to_string()
    }
}
