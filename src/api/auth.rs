use axum::{extract::State, routing::post, Json, Router};
use serde::Deserialize;

use crate::{
    api::{
        extract::{ApiJson, CurrentUser},
        ApiResponse,
    },
    app_state::AppState,
    error::AppResult,
    models::AuthSession,
};

#[derive(Debug, Deserialize)]
pub struct SignUpRequest {
    pub name: String,
    pub email: String,
    pub password: String,
}

/// `email` may also carry the user name.
#[derive(Debug, Deserialize)]
pub struct SignInRequest {
    #[serde(alias = "name")]
    pub email: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdatePasswordRequest {
    pub current_password: String,
    pub new_password: String,
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/auth/signup", post(sign_up))
        .route("/auth/signin", post(sign_in))
        .route("/auth/update-password", post(update_password))
}

async fn sign_up(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<SignUpRequest>,
) -> AppResult<Json<ApiResponse<AuthSession>>> {
    let session = state
        .credentials
        .sign_up(&req.name, &req.email, &req.password)
        .await?;
    Ok(ApiResponse::ok(session))
}

async fn sign_in(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<SignInRequest>,
) -> AppResult<Json<ApiResponse<AuthSession>>> {
    let session = state.credentials.sign_in(&req.email, &req.password).await?;
    Ok(ApiResponse::ok(session))
}

async fn update_password(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    ApiJson(req): ApiJson<UpdatePasswordRequest>,
) -> AppResult<Json<ApiResponse<AuthSession>>> {
    let session = state
        .credentials
        .change_password(user.id, &req.current_password, &req.new_password)
        .await?;
    Ok(ApiResponse::ok(session))
}
