use axum::{
    extract::State,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;

use crate::{
    api::{
        extract::{ApiJson, CurrentUser},
        ApiResponse,
    },
    app_state::AppState,
    error::AppResult,
    models::Category,
};

#[derive(Debug, Deserialize)]
pub struct CreateCategoryRequest {
    pub name: String,
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/category", get(list))
        .route("/category/create", post(create))
}

async fn create(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    ApiJson(req): ApiJson<CreateCategoryRequest>,
) -> AppResult<Json<ApiResponse<Category>>> {
    let category = state.categories.create(&user, &req.name).await?;
    Ok(ApiResponse::ok(category))
}

async fn list(
    State(state): State<AppState>,
    _caller: CurrentUser,
) -> AppResult<Json<ApiResponse<Vec<Category>>>> {
    Ok(ApiResponse::ok(state.categories.list_all().await?))
}
