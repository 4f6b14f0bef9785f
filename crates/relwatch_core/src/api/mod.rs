mod auth;
mod credentials;
mod notifiers;
mod releases;
mod system;
mod trackers;

use axum::Router;
use axum::extract::FromRequestParts;
use axum::http::{StatusCode, request::Parts};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use serde_json::json;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::auth::{AuthError, AuthService};
use crate::error::TrackError;
use crate::model::User;
use crate::scheduler::Scheduler;
use crate::store::Store;

#[derive(Clone)]
pub struct AppState {
    pub store: Store,
    pub scheduler: Scheduler,
    pub auth: AuthService,
}

/// All admin routes, rooted at `/api`.
pub fn router(state: AppState) -> Router {
    Router::new()
        .nest("/api/auth", auth::routes())
        .nest("/api/trackers", trackers::routes())
        .nest("/api/credentials", credentials::routes())
        .nest("/api/notifiers", notifiers::routes())
        .merge(releases::routes())
        .merge(system::routes())
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Uniform error body: `{"detail": "..."}` with a matching status.
pub struct ApiError {
    status: StatusCode,
    detail: String,
}

impl ApiError {
    pub fn bad_request(detail: impl Into<String>) -> Self {
        Self { status: StatusCode::BAD_REQUEST, detail: detail.into() }
    }

    pub fn not_found(detail: impl Into<String>) -> Self {
        Self { status: StatusCode::NOT_FOUND, detail: detail.into() }
    }

    pub fn unauthorized(detail: impl Into<String>) -> Self {
        Self { status: StatusCode::UNAUTHORIZED, detail: detail.into() }
    }

    pub fn internal(detail: impl Into<String>) -> Self {
        Self { status: StatusCode::INTERNAL_SERVER_ERROR, detail: detail.into() }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({"detail": self.detail}))).into_response()
    }
}

impl From<TrackError> for ApiError {
    fn from(err: TrackError) -> Self {
        match &err {
            TrackError::Config(_) | TrackError::AuthRequired(_) => {
                Self::bad_request(err.to_string())
            }
            TrackError::Upstream(_) => Self { status: StatusCode::BAD_GATEWAY, detail: err.to_string() },
            TrackError::Store(_) => Self::internal(err.to_string()),
        }
    }
}

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        match &err {
            AuthError::InvalidCredentials | AuthError::InvalidToken | AuthError::Inactive => {
                Self::unauthorized(err.to_string())
            }
            AuthError::Conflict(_) => Self::bad_request(err.to_string()),
            AuthError::Store(_) => Self::internal(err.to_string()),
        }
    }
}

/// Paginated list envelope shared by every collection endpoint.
#[derive(Serialize)]
pub struct Page<T: Serialize> {
    pub items: Vec<T>,
    pub total: i64,
    pub skip: usize,
    pub limit: usize,
}

/// Extracts and verifies the bearer token, yielding the session's user.
pub struct CurrentUser(pub User);

impl FromRequestParts<AppState> for CurrentUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let token = bearer_token(parts)
            .ok_or_else(|| ApiError::unauthorized("missing bearer token"))?;
        let user = state.auth.current_user(&token).await?;
        Ok(Self(user))
    }
}

/// The raw bearer token, for endpoints that act on the token itself
/// (logout, change-password).
pub struct BearerToken(pub String);

impl FromRequestParts<AppState> for BearerToken {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        _state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        bearer_token(parts)
            .map(Self)
            .ok_or_else(|| ApiError::unauthorized("missing bearer token"))
    }
}

fn bearer_token(parts: &Parts) -> Option<String> {
    parts
        .headers
        .get(axum::http::header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(|t| t.to_string())
}
