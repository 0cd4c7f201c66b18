use axum::{
    extract::State,
    routing::{get, post},
    Json, Router,
};

use crate::{
    api::{
        extract::{ApiJson, ApiPath, CurrentUser},
        ApiResponse,
    },
    app_state::AppState,
    core::UserId,
    error::AppResult,
    models::{ProfileUpdate, User},
};

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/user/me", get(me))
        .route("/user/profile/{id}", get(profile))
        .route("/user/update", post(update))
}

async fn me(CurrentUser(user): CurrentUser) -> Json<ApiResponse<User>> {
    ApiResponse::ok(user)
}

async fn profile(
    State(state): State<AppState>,
    _caller: CurrentUser,
    ApiPath(id): ApiPath<i64>,
) -> AppResult<Json<ApiResponse<User>>> {
    let user = state.credentials.get_user(UserId::new(id)).await?;
    Ok(ApiResponse::ok(user))
}

async fn update(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    ApiJson(update): ApiJson<ProfileUpdate>,
) -> AppResult<Json<ApiResponse<User>>> {
    let user = state.credentials.update_profile(user.id, update).await?;
    Ok(ApiResponse::ok(user))
}
