pub mod article_store;
pub mod category_store;
pub mod comment_tree;
pub mod credential_store;
pub mod toggle;

pub use article_store::ArticleStore;
pub use category_store::CategoryStore;
pub use comment_tree::CommentTree;
pub use credential_store::CredentialStore;
pub use toggle::{MembershipChange, MembershipSet, ToggleEngine};
