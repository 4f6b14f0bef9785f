use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Form, Json, Router};
use serde::Deserialize;
use serde_json::{Value, json};

use crate::auth::TokenPair;
use crate::model::User;

use super::{ApiError, AppState, BearerToken, CurrentUser};

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/token", post(token))
        .route("/register", post(register))
        .route("/me", get(me))
        .route("/refresh", post(refresh))
        .route("/logout", post(logout))
        .route("/change-password", post(change_password))
}

#[derive(Deserialize)]
struct LoginForm {
    username: String,
    password: String,
}

async fn token(
    State(state): State<AppState>,
    Form(form): Form<LoginForm>,
) -> Result<Json<TokenPair>, ApiError> {
    let (_, pair) = state
        .auth
        .login(&form.username, &form.password, None)
        .await?;
    Ok(Json(pair))
}

#[derive(Deserialize)]
struct RegisterRequest {
    username: String,
    email: String,
    password: String,
}

async fn register(
    State(state): State<AppState>,
    _user: CurrentUser,
    Json(req): Json<RegisterRequest>,
) -> Result<(StatusCode, Json<User>), ApiError> {
    let user = state
        .auth
        .register(&req.username, &req.email, &req.password)
        .await?;
    Ok((StatusCode::CREATED, Json(user)))
}

async fn me(CurrentUser(user): CurrentUser) -> Json<User> {
    Json(user)
}

#[derive(Deserialize)]
struct RefreshRequest {
    refresh_token: String,
}

async fn refresh(
    State(state): State<AppState>,
    Json(req): Json<RefreshRequest>,
) -> Result<Json<TokenPair>, ApiError> {
    Ok(Json(state.auth.refresh(&req.refresh_token).await?))
}

async fn logout(
    State(state): State<AppState>,
    _user: CurrentUser,
    BearerToken(token): BearerToken,
) -> Result<Json<Value>, ApiError> {
    state.auth.logout(&token).await?;
    Ok(Json(json!({"message": "logged out"})))
}

#[derive(Deserialize)]
struct ChangePasswordRequest {
    old_password: String,
    new_password: String,
}

async fn change_password(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Json(req): Json<ChangePasswordRequest>,
) -> Result<Json<Value>, ApiError> {
    state
        .auth
        .change_password(&user, &req.old_password, &req.new_password)
        .await?;
    Ok(Json(json!({"message": "password changed"})))
}
