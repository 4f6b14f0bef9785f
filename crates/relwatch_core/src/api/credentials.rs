use axum::extract::{Path, Query, State};
use axum::routing::get;
use axum::{Json, Router};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::model::Credential;

use super::{ApiError, AppState, CurrentUser, Page};

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/", get(list).post(create))
        .route("/{id}", get(detail).put(update).delete(remove))
}

/// External view of a credential; the token only ever leaves masked.
#[derive(Serialize)]
struct CredentialView {
    id: i64,
    name: String,
    #[serde(rename = "type")]
    kind: String,
    token: String,
    description: Option<String>,
    created_at: chrono::DateTime<Utc>,
    updated_at: chrono::DateTime<Utc>,
}

impl From<Credential> for CredentialView {
    fn from(credential: Credential) -> Self {
        let token = credential.masked_token();
        Self {
            id: credential.id.unwrap_or_default(),
            name: credential.name,
            kind: credential.kind,
            token,
            description: credential.description,
            created_at: credential.created_at,
            updated_at: credential.updated_at,
        }
    }
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
) -> Result<Json<Page<CredentialView>>, ApiError> {
    let total = state.store.count_credentials().await?;
    let items = state
        .store
        .get_credentials_paginated(params.skip, params.limit)
        .await?
        .into_iter()
        .map(CredentialView::from)
        .collect();
    Ok(Json(Page { items, total, skip: params.skip, limit: params.limit }))
}

async fn detail(
    State(state): State<AppState>,
    _user: CurrentUser,
    Path(id): Path<i64>,
) -> Result<Json<CredentialView>, ApiError> {
    let credential = state
        .store
        .get_credential(id)
        .await?
        .ok_or_else(|| ApiError::not_found("credential not found"))?;
    Ok(Json(credential.into()))
}

#[derive(Deserialize)]
struct CreateRequest {
    name: String,
    #[serde(rename = "type")]
    kind: String,
    token: String,
    #[serde(default)]
    description: Option<String>,
}

async fn create(
    State(state): State<AppState>,
    _user: CurrentUser,
    Json(req): Json<CreateRequest>,
) -> Result<Json<Value>, ApiError> {
    if req.name.is_empty() || req.token.is_empty() {
        return Err(ApiError::bad_request("name and token are required"));
    }
    if state.store.get_credential_by_name(&req.name).await?.is_some() {
        return Err(ApiError::bad_request("credential name already exists"));
    }
    let now = Utc::now();
    let credential = Credential {
        id: None,
        name: req.name.clone(),
        kind: req.kind,
        token: req.token,
        description: req.description,
        created_at: now,
        updated_at: now,
    };
    let id = state.store.create_credential(&credential).await?;
    Ok(Json(json!({"message": format!("credential {} created", req.name), "id": id})))
}

#[derive(Deserialize)]
struct UpdateRequest {
    #[serde(rename = "type")]
    kind: String,
    /// Omitted or empty keeps the stored token.
    #[serde(default)]
    token: Option<String>,
    #[serde(default)]
    description: Option<String>,
}

async fn update(
    State(state): State<AppState>,
    _user: CurrentUser,
    Path(id): Path<i64>,
    Json(req): Json<UpdateRequest>,
) -> Result<Json<Value>, ApiError> {
    let updated = state
        .store
        .update_credential(id, &req.kind, req.token.as_deref(), req.description.as_deref())
        .await?;
    if !updated {
        return Err(ApiError::not_found("credential not found"));
    }
    Ok(Json(json!({"message": "credential updated"})))
}

async fn remove(
    State(state): State<AppState>,
    _user: CurrentUser,
    Path(id): Path<i64>,
) -> Result<Json<Value>, ApiError> {
    if !state.store.delete_credential(id).await? {
        return Err(ApiError::not_found("credential not found"));
    }
    Ok(Json(json!({"message": "credential deleted"})))
}
