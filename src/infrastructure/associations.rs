// Associations - typed edges (id1 -[atype]-> id2) backing every set and
// ordered list of the data model. Lists are read in insertion order (`seq`).

use serde::{Deserialize, Serialize};
use sqlx::{Executor, QueryBuilder, Sqlite};

use crate::core::current_time_millis;
use crate::error::AppResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AssocType {
    /// article -> user
    ArticleLikes,
    /// article -> top-level comment
    ArticleComments,
    /// comment -> direct reply
    CommentReplies,
    /// comment -> user
    CommentLikes,
    /// user -> favorited article
    UserFavorites,
    /// user -> authored article
    UserArticles,
}

impl AssocType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AssocType::ArticleLikes => "article_likes",
            AssocType::ArticleComments => "article_comments",
            AssocType::CommentReplies => "comment_replies",
            AssocType::CommentLikes => "comment_likes",
            AssocType::UserFavorites => "user_favorites",
            AssocType::UserArticles => "user_articles",
        }
    }
}

/// Set-add. Returns false when the edge was already present.
pub async fn add<'e, E>(executor: E, id1: i64, atype: AssocType, id2: i64) -> AppResult<bool>
where
    E: Executor<'e, Database = Sqlite>,
{
    let result = sqlx::query(
        "INSERT OR IGNORE INTO associations (id1, atype, id2, time_created) VALUES (?, ?, ?, ?)",
    )
    .bind(id1)
    .bind(atype.as_str())
    .bind(id2)
    .bind(current_time_millis())
    .execute(executor)
    .await?;
    Ok(result.rows_affected() > 0)
}

/// Set-remove. Returns false when the edge was not present.
pub async fn remove<'e, E>(executor: E, id1: i64, atype: AssocType, id2: i64) -> AppResult<bool>
where
    E: Executor<'e, Database = Sqlite>,
{
    let result = sqlx::query("DELETE FROM associations WHERE id1 = ? AND atype = ? AND id2 = ?")
        .bind(id1)
        .bind(atype.as_str())
        .bind(id2)
        .execute(executor)
        .await?;
    Ok(result.rows_affected() > 0)
}

#[cfg(test)]
pub async fn exists<'e, E>(executor: E, id1: i64, atype: AssocType, id2: i64) -> AppResult<bool>
where
    E: Executor<'e, Database = Sqlite>,
{
    let row = sqlx::query_scalar::<_, i64>(
        "SELECT 1 FROM associations WHERE id1 = ? AND atype = ? AND id2 = ?",
    )
    .bind(id1)
    .bind(atype.as_str())
    .bind(id2)
    .fetch_optional(executor)
    .await?;
    Ok(row.is_some())
}

/// Targets of `id1` in insertion order.
pub async fn targets<'e, E>(executor: E, id1: i64, atype: AssocType) -> AppResult<Vec<i64>>
where
    E: Executor<'e, Database = Sqlite>,
{
    let ids = sqlx::query_scalar::<_, i64>(
        "SELECT id2 FROM associations WHERE id1 = ? AND atype = ? ORDER BY seq",
    )
    .bind(id1)
    .bind(atype.as_str())
    .fetch_all(executor)
    .await?;
    Ok(ids)
}

/// All `(id1, id2)` edges of one type whose source is in `sources`, in
/// insertion order.
pub async fn edges_from<'e, E>(
    executor: E,
    sources: &[i64],
    atype: AssocType,
) -> AppResult<Vec<(i64, i64)>>
where
    E: Executor<'e, Database = Sqlite>,
{
    if sources.is_empty() {
        return Ok(Vec::new());
    }

    let mut qb = QueryBuilder::<Sqlite>::new("SELECT id1, id2 FROM associations WHERE atype = ");
    qb.push_bind(atype.as_str());
    qb.push(" AND id1 IN (");
    let mut separated = qb.separated(",");
    for id in sources {
        separated.push_bind(*id);
    }
    qb.push(") ORDER BY seq");

    let edges = qb.build_query_as::<(i64, i64)>().fetch_all(executor).await?;
    Ok(edges)
}

pub async fn count<'e, E>(executor: E, id1: i64, atype: AssocType) -> AppResult<u64>
where
    E: Executor<'e, Database = Sqlite>,
{
    let n = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM associations WHERE id1 = ? AND atype = ?")
        .bind(id1)
        .bind(atype.as_str())
        .fetch_one(executor)
        .await?;
    Ok(n as u64)
}

/// Drop every edge of this type leaving one of `sources`.
pub async fn remove_all_from<'e, E>(executor: E, sources: &[i64], atype: AssocType) -> AppResult<u64>
where
    E: Executor<'e, Database = Sqlite>,
{
    if sources.is_empty() {
        return Ok(0);
    }

    let mut qb = QueryBuilder::<Sqlite>::new("DELETE FROM associations WHERE atype = ");
    qb.push_bind(atype.as_str());
    qb.push(" AND id1 IN (");
    let mut separated = qb.separated(",");
    for id in sources {
        separated.push_bind(*id);
    }
    qb.push(")");

    let result = qb.build().execute(executor).await?;
    Ok(result.rows_affected())
}

/// Drop every edge of this type pointing at `target`, whatever its source.
pub async fn remove_all_to<'e, E>(executor: E, atype: AssocType, target: i64) -> AppResult<u64>
where
    E: Executor<'e, Database = Sqlite>,
{
    let result = sqlx::query("DELETE FROM associations WHERE atype = ? AND id2 = ?")
        .bind(atype.as_str())
        .bind(target)
        .execute(executor)
        .await?;
    Ok(result.rows_affected())
}
