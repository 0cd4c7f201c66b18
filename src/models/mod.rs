pub mod article;
pub mod category;
pub mod comment;
pub mod user;

pub use article::{
    Article, ArticleDetails, ArticleFilter, ImageUpload, NewArticle, Page, Pagination, SortOrder,
    UserArticleFilter,
};
pub use category::Category;
pub use comment::{Comment, CommentNode};
pub use user::{AuthSession, AuthType, Gender, ProfileUpdate, Role, User, UserSummary};

/// Which relations a read joins into an article.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Populate {
    pub author: bool,
    pub category: bool,
    pub likes: bool,
    pub comments: bool,
}

impl Populate {
    pub const FULL: Populate = Populate {
        author: true,
        category: true,
        likes: true,
        comments: true,
    };

    /// Author and category only, no engagement data.
    pub const SUMMARY: Populate = Populate {
        author: true,
        category: true,
        likes: false,
        comments: false,
    };

    pub const NONE: Populate = Populate {
        author: false,
        category: false,
        likes: false,
        comments: false,
    };
}

impl Default for Populate {
    fn default() -> Self {
        Populate::FULL
    }
}
