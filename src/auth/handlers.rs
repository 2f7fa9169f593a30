use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    middleware,
    routing::{get, patch, post},
    Json, Router,
};
use tracing::instrument;

use crate::{
    auth::{
        dto::{
            AuthResponse, ChangePasswordRequest, LoginRequest, MessageResponse,
            RegisterRequest, ResetPasswordRequest,
        },
        extractors::{require_auth, AuthUser},
        jwt::TokenService,
        repo_types::PublicUser,
    },
    error::AuthError,
    state::AppState,
};

pub fn auth_routes() -> Router<AppState> {
    Router::new()
        .route("/auth/createUser", post(register))
        .route("/auth/login", post(login))
        .route("/auth/reset-password", patch(reset_password))
}

pub fn session_routes(tokens: Arc<TokenService>) -> Router<AppState> {
    Router::new()
        .route("/auth/fetchuser", get(fetch_user))
        .route("/auth/change-password", patch(change_password))
        .route_layer(middleware::from_fn_with_state(tokens, require_auth))
}

#[instrument(skip(state, payload))]
pub async fn register(
    State(state): State<AppState>,
    Json(payload): Json<RegisterRequest>,
) -> Result<(StatusCode, Json<AuthResponse>), AuthError> {
    let res = state.credentials.register(payload).await?;
    Ok((StatusCode::CREATED, Json(res)))
}

#[instrument(skip(state, payload))]
pub async fn login(
    State(state): State<AppState>,
    Json(payload): Json<LoginRequest>,
) -> Result<Json<AuthResponse>, AuthError> {
    Ok(Json(state.credentials.login(payload).await?))
}

#[instrument(skip(state))]
pub async fn fetch_user(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
) -> Result<Json<PublicUser>, AuthError> {
    Ok(Json(state.credentials.current_user(user_id).await?))
}

#[instrument(skip(state, payload))]
pub async fn change_password(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Json(payload): Json<ChangePasswordRequest>,
) -> Result<Json<MessageResponse>, AuthError> {
    state.credentials.change_password(user_id, payload).await?;
    Ok(Json(MessageResponse::password_changed()))
}

#[instrument(skip(state, payload))]
pub async fn reset_password(
    State(state): State<AppState>,
    Json(payload): Json<ResetPasswordRequest>,
) -> Result<Json<MessageResponse>, AuthError> {
    state.credentials.reset_password(payload).await?;
    Ok(Json(MessageResponse::password_changed()))
}
