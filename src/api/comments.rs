use axum::{
    extract::State,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;

use crate::{
    api::{
        extract::{ApiJson, ApiPath, CurrentUser},
        ApiResponse,
    },
    app_state::AppState,
    core::CommentId,
    error::AppResult,
    models::Comment,
    services::MembershipChange,
};

#[derive(Debug, Deserialize)]
pub struct CommentRequest {
    pub text: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LikeRequest {
    pub to_like: bool,
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/comment/{id}/thread", get(thread))
        .route("/comment/{id}/reply", post(reply))
        .route("/comment/{id}/like", post(like))
        .route("/comment/{id}/delete", post(delete))
}

async fn thread(
    State(state): State<AppState>,
    _caller: CurrentUser,
    ApiPath(id): ApiPath<i64>,
) -> AppResult<Json<ApiResponse<Vec<Comment>>>> {
    let replies = state.comments.thread(CommentId::new(id)).await?;
    Ok(ApiResponse::ok(replies))
}

async fn reply(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    ApiPath(id): ApiPath<i64>,
    ApiJson(req): ApiJson<CommentRequest>,
) -> AppResult<Json<ApiResponse<Comment>>> {
    let reply = state
        .comments
        .add_reply(CommentId::new(id), &req.text, user.id)
        .await?;
    Ok(ApiResponse::ok(reply))
}

async fn like(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    ApiPath(id): ApiPath<i64>,
    ApiJson(req): ApiJson<LikeRequest>,
) -> AppResult<Json<ApiResponse<MembershipChange>>> {
    let change = state
        .comments
        .toggle_comment_like(CommentId::new(id), user.id, req.to_like)
        .await?;
    Ok(ApiResponse::ok(change))
}

async fn delete(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    ApiPath(id): ApiPath<i64>,
) -> AppResult<Json<ApiResponse<()>>> {
    state.comments.delete_comment(CommentId::new(id), user.id).await?;
    Ok(ApiResponse::empty())
}
