use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::{ArticleId, CategoryId, UserId};
use crate::infrastructure::object_storage::ImageDescriptor;
use crate::models::{Category, CommentNode, UserSummary};

/// An article row as stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Article {
    pub id: ArticleId,
    pub title: String,
    pub description: String,
    pub image: ImageDescriptor,
    pub author: UserId,
    pub category: CategoryId,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// An article with its relations joined in. Relations the read did not ask
/// for stay `None` / empty.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ArticleDetails {
    #[serde(flatten)]
    pub article: Article,
    pub author_details: Option<UserSummary>,
    pub category_details: Option<Category>,
    pub likes: Vec<UserId>,
    pub comments: Vec<CommentNode>,
}

/// Input for publishing an article. The image travels as raw bytes until the
/// object storage turns it into a descriptor.
#[derive(Debug, Clone, Default)]
pub struct NewArticle {
    pub title: String,
    pub description: String,
    pub category: Option<CategoryId>,
    pub image: Option<ImageUpload>,
}

#[derive(Debug, Clone)]
pub struct ImageUpload {
    pub bytes: Vec<u8>,
    pub file_name: Option<String>,
}

/// Sort direction on creation time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortOrder {
    #[default]
    Ascending,
    Descending,
}

impl SortOrder {
    /// The wire flag: `1` asks for newest first, anything else oldest first.
    pub fn from_flag(flag: Option<i64>) -> Self {
        match flag {
            Some(1) => SortOrder::Descending,
            _ => SortOrder::Ascending,
        }
    }

    pub fn as_sql(&self) -> &'static str {
        match self {
            SortOrder::Ascending => "ASC",
            SortOrder::Descending => "DESC",
        }
    }
}

/// `limit == 0` means no limit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Pagination {
    pub limit: u64,
    pub offset: u64,
}

#[derive(Debug, Clone, Default)]
pub struct ArticleFilter {
    pub category: Option<CategoryId>,
    pub text: Option<String>,
    pub sort: SortOrder,
    pub page: Pagination,
}

#[derive(Debug, Clone, Default)]
pub struct UserArticleFilter {
    pub only_mine: bool,
    pub only_favorites: bool,
    pub author_id: Option<UserId>,
    pub page: Pagination,
}

#[derive(Debug, Clone, Serialize)]
pub struct Page<T> {
    pub total: u64,
    pub result: Vec<T>,
}
