use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::{ArticleId, CommentId, UserId};
use crate::models::UserSummary;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Comment {
    pub id: CommentId,
    pub text: String,
    pub author: Option<UserId>,
    pub article: ArticleId,
    pub parent: Option<CommentId>,
    /// Top-level ancestor of a reply; `None` on a top-level comment.
    pub main_parent: Option<CommentId>,
    /// Direct replies in creation order.
    pub replies: Vec<CommentId>,
    pub likes: Vec<UserId>,
    pub created_at: DateTime<Utc>,
}

impl Comment {
    pub fn is_root(&self) -> bool {
        self.parent.is_none()
    }
}

/// A comment with its author joined and its replies expanded, newest first.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CommentNode {
    pub id: CommentId,
    pub text: String,
    pub author: Option<UserId>,
    pub author_details: Option<UserSummary>,
    pub article: ArticleId,
    pub parent: Option<CommentId>,
    pub main_parent: Option<CommentId>,
    pub likes: Vec<UserId>,
    pub replies: Vec<CommentNode>,
    pub created_at: DateTime<Utc>,
}

impl CommentNode {
    pub fn new(comment: Comment, author_details: Option<UserSummary>, replies: Vec<CommentNode>) -> Self {
        Self {
            id: comment.id,
            text: comment.text,
            author: comment.author,
            author_details,
            article: comment.article,
            parent: comment.parent,
            main_parent: comment.main_parent,
            likes: comment.likes,
            replies,
            created_at: comment.created_at,
        }
    }
}
