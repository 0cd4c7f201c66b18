// Comment Tree - top-level comments and replies. Every reply records its
// direct parent and the top-level comment of its thread (main parent).

use sqlx::sqlite::SqliteRow;
use sqlx::{QueryBuilder, Row, Sqlite};
use std::collections::HashMap;
use tracing::{debug, info, instrument};

use crate::core::{current_time_millis, millis_to_datetime, ArticleId, CommentId, UserId};
use crate::error::{AppError, AppResult};
use crate::infrastructure::associations::{self, AssocType};
use crate::infrastructure::database::Database;
use crate::models::{Comment, CommentNode, UserSummary};
use crate::services::credential_store::load_summaries;
use crate::services::toggle::{MembershipChange, ToggleEngine};

const COMMENT_COLUMNS: &str = "id, text, author_id, article_id, parent_id, main_parent_id, created_at";

#[derive(Clone)]
pub struct CommentTree {
    db: Database,
    toggles: ToggleEngine,
}

impl CommentTree {
    pub fn new(db: Database, toggles: ToggleEngine) -> Self {
        Self { db, toggles }
    }

    #[instrument(skip(self, text))]
    pub async fn add_top_level_comment(
        &self,
        article: ArticleId,
        text: &str,
        author: UserId,
    ) -> AppResult<Comment> {
        let found = sqlx::query_scalar::<_, i64>("SELECT 1 FROM articles WHERE id = ?")
            .bind(article)
            .fetch_optional(self.db.pool())
            .await?;
        if found.is_none() {
            return Err(AppError::NotFound("Article not found".to_string()));
        }
        let text = required_text(text)?;

        let comment = Comment {
            id: CommentId::new(self.db.next_id()),
            text: text.to_string(),
            author: Some(author),
            article,
            parent: None,
            main_parent: None,
            replies: Vec::new(),
            likes: Vec::new(),
            created_at: millis_to_datetime(current_time_millis()),
        };

        let mut tx = self.db.begin().await?;
        insert_comment(&mut *tx, &comment).await?;
        associations::add(&mut *tx, article.value(), AssocType::ArticleComments, comment.id.value())
            .await?;
        tx.commit().await?;

        info!("Comment {} added to article {}", comment.id, article);
        Ok(comment)
    }

    #[instrument(skip(self, text))]
    pub async fn add_reply(&self, parent: CommentId, text: &str, author: UserId) -> AppResult<Comment> {
        let parent = self.get_comment(parent).await?;
        let text = required_text(text)?;

        let reply = Comment {
            id: CommentId::new(self.db.next_id()),
            text: text.to_string(),
            author: Some(author),
            article: parent.article,
            parent: Some(parent.id),
            main_parent: Some(parent.main_parent.unwrap_or(parent.id)),
            replies: Vec::new(),
            likes: Vec::new(),
            created_at: millis_to_datetime(current_time_millis()),
        };

        let mut tx = self.db.begin().await?;
        insert_comment(&mut *tx, &reply).await?;
        associations::add(&mut *tx, parent.id.value(), AssocType::CommentReplies, reply.id.value())
            .await?;
        tx.commit().await?;

        info!("Reply {} added under comment {}", reply.id, parent.id);
        Ok(reply)
    }

    /// Deletes the comment and everything below it. Only the author may do
    /// this; a comment without an author is never deletable.
    #[instrument(skip(self))]
    pub async fn delete_comment(&self, id: CommentId, caller: UserId) -> AppResult<()> {
        let comment = self.get_comment(id).await?;
        if comment.author != Some(caller) {
            return Err(AppError::Forbidden(
                "You are not the author of the comment".to_string(),
            ));
        }

        let mut tx = self.db.begin().await?;

        match comment.parent {
            Some(parent) => {
                associations::remove(&mut *tx, parent.value(), AssocType::CommentReplies, id.value())
                    .await?
            }
            None => {
                associations::remove(
                    &mut *tx,
                    comment.article.value(),
                    AssocType::ArticleComments,
                    id.value(),
                )
                .await?
            }
        };

        // Breadth-first levels, then walk them backwards so children go first
        let mut levels = vec![vec![id.value()]];
        loop {
            let frontier = levels.last().map(Vec::as_slice).unwrap_or_default();
            let children: Vec<i64> =
                associations::edges_from(&mut *tx, frontier, AssocType::CommentReplies)
                    .await?
                    .into_iter()
                    .map(|(_, child)| child)
                    .collect();
            if children.is_empty() {
                break;
            }
            levels.push(children);
        }

        let mut deleted = 0;
        for level in levels.iter().rev() {
            for comment_id in level {
                delete_comment_row(&mut tx, *comment_id).await?;
                deleted += 1;
            }
        }

        tx.commit().await?;
        info!("Deleted comment {} with {} replies", id, deleted - 1);
        Ok(())
    }

    pub async fn toggle_comment_like(
        &self,
        id: CommentId,
        user: UserId,
        want_liked: bool,
    ) -> AppResult<MembershipChange> {
        self.toggles.set_comment_like(id, user, want_liked).await
    }

    pub async fn get_comment(&self, id: CommentId) -> AppResult<Comment> {
        let row = sqlx::query(&format!("SELECT {} FROM comments WHERE id = ?", COMMENT_COLUMNS))
            .bind(id)
            .fetch_optional(self.db.pool())
            .await?
            .ok_or_else(|| AppError::NotFound("Comment not found".to_string()))?;

        let mut comment = comment_from_row(&row)?;
        comment.replies = associations::targets(self.db.pool(), id.value(), AssocType::CommentReplies)
            .await?
            .into_iter()
            .map(CommentId::new)
            .collect();
        comment.likes = associations::targets(self.db.pool(), id.value(), AssocType::CommentLikes)
            .await?
            .into_iter()
            .map(UserId::new)
            .collect();
        Ok(comment)
    }

    /// Every reply under a top-level comment, flattened, oldest first.
    pub async fn thread(&self, root: CommentId) -> AppResult<Vec<Comment>> {
        let root = self.get_comment(root).await?;
        if !root.is_root() {
            return Err(AppError::Validation(format!(
                "Comment {} is a reply, not a thread root",
                root.id
            )));
        }

        let rows = sqlx::query(&format!(
            "SELECT {} FROM comments WHERE main_parent_id = ? ORDER BY id",
            COMMENT_COLUMNS
        ))
        .bind(root.id)
        .fetch_all(self.db.pool())
        .await?;

        let mut replies = rows.iter().map(comment_from_row).collect::<AppResult<Vec<_>>>()?;
        let ids: Vec<i64> = replies.iter().map(|c| c.id.value()).collect();
        let mut children = group(associations::edges_from(self.db.pool(), &ids, AssocType::CommentReplies).await?);
        let mut likes = group(associations::edges_from(self.db.pool(), &ids, AssocType::CommentLikes).await?);

        for reply in &mut replies {
            let id = reply.id.value();
            reply.replies = children.remove(&id).unwrap_or_default().into_iter().map(CommentId::new).collect();
            reply.likes = likes.remove(&id).unwrap_or_default().into_iter().map(UserId::new).collect();
        }

        debug!("Thread {} has {} replies", root.id, replies.len());
        Ok(replies)
    }

    /// Comment trees of several articles at once: top-level comments newest
    /// first, and every replies list newest first, all the way down.
    pub async fn trees_for(
        &self,
        articles: &[ArticleId],
    ) -> AppResult<HashMap<ArticleId, Vec<CommentNode>>> {
        let article_ids: Vec<i64> = articles.iter().map(|a| a.value()).collect();
        if article_ids.is_empty() {
            return Ok(HashMap::new());
        }

        let mut qb = QueryBuilder::<Sqlite>::new(format!(
            "SELECT {} FROM comments WHERE article_id IN (",
            COMMENT_COLUMNS
        ));
        let mut separated = qb.separated(",");
        for id in &article_ids {
            separated.push_bind(*id);
        }
        qb.push(")");
        let rows = qb.build().fetch_all(self.db.pool()).await?;

        let mut comments: HashMap<i64, Comment> = HashMap::with_capacity(rows.len());
        for row in &rows {
            let comment = comment_from_row(row)?;
            comments.insert(comment.id.value(), comment);
        }

        let ids: Vec<i64> = comments.keys().copied().collect();
        let mut replies = group(associations::edges_from(self.db.pool(), &ids, AssocType::CommentReplies).await?);
        let mut likes = group(associations::edges_from(self.db.pool(), &ids, AssocType::CommentLikes).await?);
        for (id, comment) in comments.iter_mut() {
            comment.replies = replies.remove(id).unwrap_or_default().into_iter().map(CommentId::new).collect();
            comment.likes = likes.remove(id).unwrap_or_default().into_iter().map(UserId::new).collect();
        }

        let mut author_ids: Vec<i64> = comments
            .values()
            .filter_map(|c| c.author.map(UserId::value))
            .collect();
        author_ids.sort_unstable();
        author_ids.dedup();
        let authors = load_summaries(&self.db, &author_ids).await?;

        let top_level = group(
            associations::edges_from(self.db.pool(), &article_ids, AssocType::ArticleComments).await?,
        );

        let mut trees = HashMap::with_capacity(articles.len());
        for article in articles {
            let roots = top_level.get(&article.value()).map(Vec::as_slice).unwrap_or_default();
            let nodes = roots
                .iter()
                .rev()
                .filter_map(|id| build_node(*id, &comments, &authors))
                .collect();
            trees.insert(*article, nodes);
        }
        Ok(trees)
    }
}

fn required_text(text: &str) -> AppResult<&str> {
    let text = text.trim();
    if text.is_empty() {
        return Err(AppError::Validation("Comment text is required".to_string()));
    }
    Ok(text)
}

/// Group edges by source, keeping each target list in insertion order.
fn group(edges: Vec<(i64, i64)>) -> HashMap<i64, Vec<i64>> {
    let mut grouped: HashMap<i64, Vec<i64>> = HashMap::new();
    for (from, to) in edges {
        grouped.entry(from).or_default().push(to);
    }
    grouped
}

fn build_node(
    id: i64,
    comments: &HashMap<i64, Comment>,
    authors: &HashMap<UserId, UserSummary>,
) -> Option<CommentNode> {
    let comment = comments.get(&id)?;
    let replies = comment
        .replies
        .iter()
        .rev()
        .filter_map(|reply| build_node(reply.value(), comments, authors))
        .collect();

    let author = comment.author.and_then(|a| authors.get(&a).cloned());
    Some(CommentNode::new(comment.clone(), author, replies))
}

async fn insert_comment<'e, E>(executor: E, comment: &Comment) -> AppResult<()>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    sqlx::query(
        "INSERT INTO comments (id, text, author_id, article_id, parent_id, main_parent_id, created_at) \
         VALUES (?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(comment.id)
    .bind(&comment.text)
    .bind(comment.author)
    .bind(comment.article)
    .bind(comment.parent)
    .bind(comment.main_parent)
    .bind(comment.created_at.timestamp_millis())
    .execute(executor)
    .await?;
    Ok(())
}

/// Remove one comment row with its like-set and reply links.
pub(crate) async fn delete_comment_row(
    tx: &mut sqlx::Transaction<'static, Sqlite>,
    id: i64,
) -> AppResult<()> {
    associations::remove_all_from(&mut **tx, &[id], AssocType::CommentLikes).await?;
    associations::remove_all_from(&mut **tx, &[id], AssocType::CommentReplies).await?;
    sqlx::query("DELETE FROM comments WHERE id = ?")
        .bind(id)
        .execute(&mut **tx)
        .await?;
    Ok(())
}

pub(crate) fn comment_from_row(row: &SqliteRow) -> AppResult<Comment> {
    Ok(Comment {
        id: CommentId::new(row.try_get("id")?),
        text: row.try_get("text")?,
        author: row.try_get::<Option<i64>, _>("author_id")?.map(UserId::new),
        article: ArticleId::new(row.try_get("article_id")?),
        parent: row.try_get::<Option<i64>, _>("parent_id")?.map(CommentId::new),
        main_parent: row.try_get::<Option<i64>, _>("main_parent_id")?.map(CommentId::new),
        replies: Vec::new(),
        likes: Vec::new(),
        created_at: millis_to_datetime(row.try_get("created_at")?),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixture {
        db: Database,
        tree: CommentTree,
        article: ArticleId,
    }

    const ALICE: UserId = UserId(1);
    const BOB: UserId = UserId(2);

    async fn fixture() -> Fixture {
        let db = Database::in_memory().await.unwrap();
        let article = ArticleId::new(db.next_id());
        sqlx::query(
            "INSERT INTO articles (id, title, title_folded, description, image_public_id, image_url, \
             image_secure_url, image_created_at, author_id, category_id, created_at, updated_at) \
             VALUES (?, 'Hello', 'hello', 'World', 'p', 'u', 's', 0, ?, 1, 0, 0)",
        )
        .bind(article)
        .bind(ALICE)
        .execute(db.pool())
        .await
        .unwrap();

        let tree = CommentTree::new(db.clone(), ToggleEngine::new(db.clone()));
        Fixture { db, tree, article }
    }

    async fn comment_count(db: &Database) -> i64 {
        sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM comments")
            .fetch_one(db.pool())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_thread_scenario() {
        let f = fixture().await;
        let first = f.tree.add_top_level_comment(f.article, "first", ALICE).await.unwrap();
        assert!(first.is_root());
        assert_eq!(first.main_parent, None);

        let re1 = f.tree.add_reply(first.id, "re1", BOB).await.unwrap();
        let re2 = f.tree.add_reply(re1.id, "re2", ALICE).await.unwrap();

        assert_eq!(re1.main_parent, Some(first.id));
        assert_eq!(re2.main_parent, Some(first.id));
        assert_eq!(re2.parent, Some(re1.id));
        assert_eq!(re2.article, f.article);

        let first = f.tree.get_comment(first.id).await.unwrap();
        assert_eq!(first.replies, vec![re1.id]);
        assert_eq!(f.tree.get_comment(re1.id).await.unwrap().replies, vec![re2.id]);

        let thread = f.tree.thread(first.id).await.unwrap();
        let ids: Vec<CommentId> = thread.iter().map(|c| c.id).collect();
        assert_eq!(ids, vec![re1.id, re2.id]);
        assert_eq!(thread[0].replies, vec![re2.id]);

        let err = f.tree.thread(re1.id).await.unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[tokio::test]
    async fn test_deep_chain_flattens_to_root() {
        let f = fixture().await;
        let root = f.tree.add_top_level_comment(f.article, "root", ALICE).await.unwrap();

        let mut parent = root.id;
        for depth in 0..6 {
            let reply = f.tree.add_reply(parent, &format!("r{}", depth), BOB).await.unwrap();
            assert_eq!(reply.main_parent, Some(root.id));
            parent = reply.id;
        }
    }

    #[tokio::test]
    async fn test_cascade_delete_of_root() {
        let f = fixture().await;
        let keep = f.tree.add_top_level_comment(f.article, "keep", BOB).await.unwrap();
        let root = f.tree.add_top_level_comment(f.article, "root", ALICE).await.unwrap();
        let r1 = f.tree.add_reply(root.id, "r1", BOB).await.unwrap();
        let r2 = f.tree.add_reply(root.id, "r2", ALICE).await.unwrap();
        f.tree.add_reply(r1.id, "r1a", ALICE).await.unwrap();
        f.tree.toggle_comment_like(r2.id, BOB, true).await.unwrap();

        assert_eq!(comment_count(&f.db).await, 5);
        f.tree.delete_comment(root.id, ALICE).await.unwrap();

        // K = 3 replies plus the root itself
        assert_eq!(comment_count(&f.db).await, 1);
        assert_eq!(
            associations::targets(f.db.pool(), f.article.value(), AssocType::ArticleComments)
                .await
                .unwrap(),
            vec![keep.id.value()]
        );
        assert_eq!(associations::count(f.db.pool(), r2.id.value(), AssocType::CommentLikes).await.unwrap(), 0);
        assert!(matches!(f.tree.get_comment(r1.id).await, Err(AppError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_deleting_reply_unlinks_from_parent() {
        let f = fixture().await;
        let root = f.tree.add_top_level_comment(f.article, "root", ALICE).await.unwrap();
        let r1 = f.tree.add_reply(root.id, "r1", BOB).await.unwrap();
        let r2 = f.tree.add_reply(root.id, "r2", BOB).await.unwrap();

        f.tree.delete_comment(r1.id, BOB).await.unwrap();
        assert_eq!(f.tree.get_comment(root.id).await.unwrap().replies, vec![r2.id]);
    }

    #[tokio::test]
    async fn test_only_author_may_delete() {
        let f = fixture().await;
        let root = f.tree.add_top_level_comment(f.article, "root", ALICE).await.unwrap();
        f.tree.add_reply(root.id, "r1", BOB).await.unwrap();

        let err = f.tree.delete_comment(root.id, BOB).await.unwrap_err();
        assert!(matches!(err, AppError::Forbidden(_)));
        assert_eq!(comment_count(&f.db).await, 2);

        // Comments without an author cannot be deleted at all
        let orphan = CommentId::new(f.db.next_id());
        sqlx::query(
            "INSERT INTO comments (id, text, author_id, article_id, created_at) VALUES (?, 'x', NULL, ?, 0)",
        )
        .bind(orphan)
        .bind(f.article)
        .execute(f.db.pool())
        .await
        .unwrap();
        let err = f.tree.delete_comment(orphan, ALICE).await.unwrap_err();
        assert!(matches!(err, AppError::Forbidden(_)));
    }

    #[tokio::test]
    async fn test_input_errors() {
        let f = fixture().await;

        let err = f.tree.add_top_level_comment(ArticleId::new(404), "hi", ALICE).await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));

        let err = f.tree.add_top_level_comment(f.article, "   ", ALICE).await.unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));

        let err = f.tree.add_reply(CommentId::new(404), "hi", ALICE).await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));

        let err = f.tree.delete_comment(CommentId::new(404), ALICE).await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_comment_likes_are_idempotent() {
        let f = fixture().await;
        let c = f.tree.add_top_level_comment(f.article, "hi", ALICE).await.unwrap();

        f.tree.toggle_comment_like(c.id, BOB, true).await.unwrap();
        f.tree.toggle_comment_like(c.id, BOB, true).await.unwrap();
        assert_eq!(f.tree.get_comment(c.id).await.unwrap().likes, vec![BOB]);

        let change = f.tree.toggle_comment_like(c.id, BOB, false).await.unwrap();
        assert!(change.changed);
        assert!(f.tree.get_comment(c.id).await.unwrap().likes.is_empty());
    }

    #[tokio::test]
    async fn test_trees_are_newest_first() {
        let f = fixture().await;
        let older = f.tree.add_top_level_comment(f.article, "older", ALICE).await.unwrap();
        let newer = f.tree.add_top_level_comment(f.article, "newer", BOB).await.unwrap();
        let a = f.tree.add_reply(older.id, "a", BOB).await.unwrap();
        let b = f.tree.add_reply(older.id, "b", BOB).await.unwrap();
        let nested = f.tree.add_reply(a.id, "nested", ALICE).await.unwrap();

        let trees = f.tree.trees_for(&[f.article]).await.unwrap();
        let roots = &trees[&f.article];
        assert_eq!(roots.len(), 2);
        assert_eq!(roots[0].id, newer.id);
        assert_eq!(roots[1].id, older.id);
        assert_eq!(roots[0].author_details, None);

        let replies: Vec<CommentId> = roots[1].replies.iter().map(|n| n.id).collect();
        assert_eq!(replies, vec![b.id, a.id]);
        assert_eq!(roots[1].replies[1].replies[0].id, nested.id);
    }
}
