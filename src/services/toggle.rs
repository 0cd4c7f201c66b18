// Toggle Engine - one idempotent set-membership primitive behind every
// favorite and like endpoint.

use serde::Serialize;
use tracing::{debug, instrument};

use crate::core::{ArticleId, CommentId, UserId};
use crate::error::{AppError, AppResult};
use crate::infrastructure::associations::{self, AssocType};
use crate::infrastructure::database::Database;

/// A like-set or favorite-set, addressed by its owner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MembershipSet {
    pub owner: i64,
    pub relation: AssocType,
}

impl MembershipSet {
    pub fn article_likes(article: ArticleId) -> Self {
        Self { owner: article.value(), relation: AssocType::ArticleLikes }
    }

    pub fn comment_likes(comment: CommentId) -> Self {
        Self { owner: comment.value(), relation: AssocType::CommentLikes }
    }

    pub fn user_favorites(user: UserId) -> Self {
        Self { owner: user.value(), relation: AssocType::UserFavorites }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MembershipChange {
    /// Membership after the call.
    pub present: bool,
    /// Whether the call modified the set.
    pub changed: bool,
}

#[derive(Clone)]
pub struct ToggleEngine {
    db: Database,
}

impl ToggleEngine {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Bring `element` to the desired membership. Redundant calls are no-ops.
    pub async fn set_membership(
        &self,
        set: MembershipSet,
        element: i64,
        desired_present: bool,
    ) -> AppResult<MembershipChange> {
        let changed = if desired_present {
            associations::add(self.db.pool(), set.owner, set.relation, element).await?
        } else {
            associations::remove(self.db.pool(), set.owner, set.relation, element).await?
        };

        debug!(
            "{} {} in {}:{} (changed: {})",
            if desired_present { "Added" } else { "Removed" },
            element,
            set.relation.as_str(),
            set.owner,
            changed
        );

        Ok(MembershipChange { present: desired_present, changed })
    }

    #[instrument(skip(self))]
    pub async fn set_article_favorite(
        &self,
        user: UserId,
        article: ArticleId,
        to_favorite: bool,
    ) -> AppResult<MembershipChange> {
        self.ensure_article(article).await?;
        self.set_membership(MembershipSet::user_favorites(user), article.value(), to_favorite)
            .await
    }

    #[instrument(skip(self))]
    pub async fn set_article_like(
        &self,
        article: ArticleId,
        user: UserId,
        to_like: bool,
    ) -> AppResult<MembershipChange> {
        self.ensure_article(article).await?;
        self.set_membership(MembershipSet::article_likes(article), user.value(), to_like)
            .await
    }

    #[instrument(skip(self))]
    pub async fn set_comment_like(
        &self,
        comment: CommentId,
        user: UserId,
        to_like: bool,
    ) -> AppResult<MembershipChange> {
        let found = sqlx::query_scalar::<_, i64>("SELECT 1 FROM comments WHERE id = ?")
            .bind(comment)
            .fetch_optional(self.db.pool())
            .await?;
        if found.is_none() {
            return Err(AppError::NotFound("Comment not found".to_string()));
        }
        self.set_membership(MembershipSet::comment_likes(comment), user.value(), to_like)
            .await
    }

    async fn ensure_article(&self, article: ArticleId) -> AppResult<()> {
        let found = sqlx::query_scalar::<_, i64>("SELECT 1 FROM articles WHERE id = ?")
            .bind(article)
            .fetch_optional(self.db.pool())
            .await?;
        match found {
            Some(_) => Ok(()),
            None => Err(AppError::NotFound("Article not found".to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_repeated_desired_state_is_noop() {
        let db = Database::in_memory().await.unwrap();
        let engine = ToggleEngine::new(db.clone());
        let set = MembershipSet::article_likes(ArticleId::new(1));

        let first = engine.set_membership(set, 7, true).await.unwrap();
        assert_eq!(first, MembershipChange { present: true, changed: true });

        let again = engine.set_membership(set, 7, true).await.unwrap();
        assert_eq!(again, MembershipChange { present: true, changed: false });
        assert_eq!(associations::count(db.pool(), 1, AssocType::ArticleLikes).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_alternating_calls_track_last_state() {
        let db = Database::in_memory().await.unwrap();
        let engine = ToggleEngine::new(db.clone());
        let set = MembershipSet::user_favorites(UserId::new(3));

        for desired in [true, false, false, true, false] {
            let change = engine.set_membership(set, 11, desired).await.unwrap();
            assert_eq!(change.present, desired);
            let present = associations::exists(db.pool(), 3, AssocType::UserFavorites, 11)
                .await
                .unwrap();
            assert_eq!(present, desired);
        }
    }

    #[tokio::test]
    async fn test_unlike_when_absent_is_harmless() {
        let db = Database::in_memory().await.unwrap();
        let engine = ToggleEngine::new(db);
        let change = engine
            .set_membership(MembershipSet::comment_likes(CommentId::new(5)), 1, false)
            .await
            .unwrap();
        assert_eq!(change, MembershipChange { present: false, changed: false });
    }

    #[tokio::test]
    async fn test_wrappers_require_existing_target() {
        let db = Database::in_memory().await.unwrap();
        let engine = ToggleEngine::new(db);

        let err = engine
            .set_article_favorite(UserId::new(1), ArticleId::new(404), true)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));

        let err = engine
            .set_article_like(ArticleId::new(404), UserId::new(1), true)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));

        let err = engine
            .set_comment_like(CommentId::new(404), UserId::new(1), false)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }
}
