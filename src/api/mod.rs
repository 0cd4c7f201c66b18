// HTTP surface: JSON envelope, authentication extractor and route tables

pub mod articles;
pub mod auth;
pub mod categories;
pub mod comments;
pub mod extract;
pub mod users;

use axum::{extract::State, routing::get, Json, Router};
use serde::Serialize;
use tower_http::{cors::CorsLayer, services::ServeDir, trace::TraceLayer};

use crate::{app_state::AppState, error::AppResult};

#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn ok(data: T) -> Json<Self> {
        Json(Self {
            success: true,
            data: Some(data),
            error: None,
        })
    }
}

impl ApiResponse<()> {
    /// Success without a payload.
    pub fn empty() -> Json<Self> {
        Json(Self {
            success: true,
            data: None,
            error: None,
        })
    }
}

async fn health(State(state): State<AppState>) -> AppResult<Json<ApiResponse<&'static str>>> {
    state.db.health_check().await?;
    Ok(ApiResponse::ok("ok"))
}

pub fn create_router(state: AppState) -> Router {
    let api = Router::new()
        .merge(auth::routes())
        .merge(users::routes())
        .merge(articles::routes(state.config.storage.max_upload_bytes))
        .merge(comments::routes())
        .merge(categories::routes());

    Router::new()
        .nest("/api", api)
        .route("/health", get(health))
        .nest_service("/media", ServeDir::new(state.config.storage.upload_dir.clone()))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
