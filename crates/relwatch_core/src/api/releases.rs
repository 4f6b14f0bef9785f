use axum::extract::{Query, State};
use axum::routing::get;
use axum::{Json, Router};
use serde::Deserialize;

use crate::model::Release;
use crate::store::ReleaseFilter;

use super::{ApiError, AppState, CurrentUser, Page};

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/api/releases", get(list))
        .route("/api/releases/latest", get(latest))
}

#[derive(Deserialize)]
struct ListParams {
    #[serde(default)]
    tracker: Option<String>,
    #[serde(default)]
    skip: usize,
    #[serde(default = "default_limit")]
    limit: usize,
    #[serde(default)]
    search: Option<String>,
    #[serde(default)]
    prerelease: Option<bool>,
    #[serde(default = "default_include_history")]
    include_history: bool,
}

fn default_limit() -> usize {
    20
}

fn default_include_history() -> bool {
    true
}

async fn list(
    State(state): State<AppState>,
    _user: CurrentUser,
    Query(params): Query<ListParams>,
) -> Result<Json<Page<Release>>, ApiError> {
    let limit = params.limit.min(100);
    let filter = ReleaseFilter {
        tracker: params.tracker,
        search: params.search,
        prerelease: params.prerelease,
        include_history: params.include_history,
    };
    let total = state.store.count_releases(&filter).await?;
    let items = state.store.get_releases(&filter, params.skip, limit).await?;
    Ok(Json(Page { items, total, skip: params.skip, limit }))
}

async fn latest(
    State(state): State<AppState>,
    _user: CurrentUser,
) -> Result<Json<Vec<Release>>, ApiError> {
    Ok(Json(state.store.latest_releases(5).await?))
}
