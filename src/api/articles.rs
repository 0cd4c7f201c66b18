use axum::{
    extract::{multipart::MultipartRejection, DefaultBodyLimit, Multipart, State},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;

use crate::{
    api::{
        extract::{ApiJson, ApiPath, ApiQuery, CurrentUser},
        ApiResponse,
    },
    app_state::AppState,
    core::{ArticleId, CategoryId, UserId},
    error::{AppError, AppResult},
    models::{
        Article, ArticleDetails, ArticleFilter, Comment, ImageUpload, NewArticle, Page, Pagination,
        Populate, SortOrder, UserArticleFilter,
    },
    services::MembershipChange,
};

/// Room for the text fields and multipart framing around the image.
const FORM_OVERHEAD_BYTES: usize = 64 * 1024;

#[derive(Debug, Default, Deserialize)]
pub struct ListQuery {
    pub category: Option<i64>,
    pub text: Option<String>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
    /// `1` sorts newest first.
    pub sort: Option<i64>,
}

#[derive(Debug, Default, Deserialize)]
pub struct UserArticlesQuery {
    #[serde(rename = "myArticles")]
    pub my_articles: Option<i64>,
    #[serde(rename = "favouriteArticles")]
    pub favourite_articles: Option<i64>,
    pub user_id: Option<i64>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FavoriteRequest {
    pub to_favorite: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LikeRequest {
    pub to_like: bool,
}

#[derive(Debug, Deserialize)]
pub struct CommentRequest {
    pub text: String,
}

pub fn routes(max_upload_bytes: usize) -> Router<AppState> {
    Router::new()
        .route(
            "/articles/create",
            post(create).layer(DefaultBodyLimit::max(max_upload_bytes + FORM_OVERHEAD_BYTES)),
        )
        .route("/articles", get(list))
        .route("/articles/user-articles", get(user_articles))
        .route("/articles/popular", get(popular))
        .route("/articles/{id}", get(get_by_id))
        .route("/articles/{id}/favorite", post(favorite))
        .route("/articles/{id}/like", post(like))
        .route("/articles/{id}/remove", post(remove))
        .route("/articles/{id}/comment", post(comment))
}

async fn create(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    multipart: Result<Multipart, MultipartRejection>,
) -> AppResult<Json<ApiResponse<Article>>> {
    let mut multipart = multipart?;
    let max_bytes = state.config.storage.max_upload_bytes;
    let mut input = NewArticle::default();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::Validation(format!("Malformed form data: {}", e.body_text())))?
    {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "title" => input.title = field_text(field).await?,
            "description" => input.description = field_text(field).await?,
            "category" => {
                let raw = field_text(field).await?;
                let raw = raw.trim();
                if !raw.is_empty() {
                    let id = raw
                        .parse::<i64>()
                        .map_err(|_| AppError::Validation(format!("Invalid category id {}", raw)))?;
                    input.category = Some(CategoryId::new(id));
                }
            }
            "file" => {
                let file_name = field.file_name().map(str::to_string);
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| AppError::Validation(format!("Failed to read file: {}", e.body_text())))?;
                if bytes.len() > max_bytes {
                    return Err(AppError::Validation(format!(
                        "File exceeds the {} byte limit",
                        max_bytes
                    )));
                }
                input.image = Some(ImageUpload { bytes: bytes.to_vec(), file_name });
            }
            _ => {}
        }
    }

    let article = state.articles.create(input, user.id).await?;
    Ok(ApiResponse::ok(article))
}

async fn field_text(field: axum::extract::multipart::Field<'_>) -> AppResult<String> {
    field
        .text()
        .await
        .map_err(|e| AppError::Validation(format!("Malformed form field: {}", e.body_text())))
}

async fn list(
    State(state): State<AppState>,
    _caller: CurrentUser,
    ApiQuery(query): ApiQuery<ListQuery>,
) -> AppResult<Json<ApiResponse<Page<ArticleDetails>>>> {
    let filter = ArticleFilter {
        category: query.category.map(CategoryId::new),
        text: query.text,
        sort: SortOrder::from_flag(query.sort),
        page: Pagination {
            limit: query.limit.unwrap_or(0),
            offset: query.offset.unwrap_or(0),
        },
    };
    let page = state.articles.list_all(filter, Populate::FULL).await?;
    Ok(ApiResponse::ok(page))
}

async fn user_articles(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    ApiQuery(query): ApiQuery<UserArticlesQuery>,
) -> AppResult<Json<ApiResponse<Page<ArticleDetails>>>> {
    let filter = UserArticleFilter {
        only_mine: query.my_articles.unwrap_or(0) != 0,
        only_favorites: query.favourite_articles.unwrap_or(0) != 0,
        author_id: query.user_id.map(UserId::new),
        page: Pagination {
            limit: query.limit.unwrap_or(0),
            offset: query.offset.unwrap_or(0),
        },
    };
    let page = state
        .articles
        .list_for_user(filter, user.id, Populate::FULL)
        .await?;
    Ok(ApiResponse::ok(page))
}

async fn popular(
    State(state): State<AppState>,
    _caller: CurrentUser,
) -> AppResult<Json<ApiResponse<Option<ArticleDetails>>>> {
    Ok(ApiResponse::ok(state.articles.most_popular().await?))
}

async fn get_by_id(
    State(state): State<AppState>,
    _caller: CurrentUser,
    ApiPath(id): ApiPath<i64>,
) -> AppResult<Json<ApiResponse<ArticleDetails>>> {
    let article = state.articles.get_by_id(ArticleId::new(id)).await?;
    Ok(ApiResponse::ok(article))
}

async fn favorite(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    ApiPath(id): ApiPath<i64>,
    ApiJson(req): ApiJson<FavoriteRequest>,
) -> AppResult<Json<ApiResponse<MembershipChange>>> {
    let change = state
        .toggles
        .set_article_favorite(user.id, ArticleId::new(id), req.to_favorite)
        .await?;
    Ok(ApiResponse::ok(change))
}

async fn like(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    ApiPath(id): ApiPath<i64>,
    ApiJson(req): ApiJson<LikeRequest>,
) -> AppResult<Json<ApiResponse<MembershipChange>>> {
    let change = state
        .toggles
        .set_article_like(ArticleId::new(id), user.id, req.to_like)
        .await?;
    Ok(ApiResponse::ok(change))
}

async fn remove(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    ApiPath(id): ApiPath<i64>,
) -> AppResult<Json<ApiResponse<()>>> {
    state.articles.remove(ArticleId::new(id), user.id).await?;
    Ok(ApiResponse::empty())
}

async fn comment(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    ApiPath(id): ApiPath<i64>,
    ApiJson(req): ApiJson<CommentRequest>,
) -> AppResult<Json<ApiResponse<Comment>>> {
    let comment = state
        .comments
        .add_top_level_comment(ArticleId::new(id), &req.text, user.id)
        .await?;
    Ok(ApiResponse::ok(comment))
}
