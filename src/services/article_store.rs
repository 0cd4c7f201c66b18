use sqlx::sqlite::SqliteRow;
use sqlx::{QueryBuilder, Row, Sqlite};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, instrument, warn};

use crate::config::ArticlesConfig;
use crate::core::{current_time_millis, millis_to_datetime, ArticleId, CategoryId, UserId};
use crate::error::{AppError, AppResult};
use crate::infrastructure::associations::{self, AssocType};
use crate::infrastructure::database::Database;
use crate::infrastructure::object_storage::{ImageDescriptor, ObjectStorage};
use crate::models::{
    Article, ArticleDetails, ArticleFilter, NewArticle, Page, Pagination, Populate, SortOrder,
    UserArticleFilter,
};
use crate::services::category_store::category_from_row;
use crate::services::comment_tree::{delete_comment_row, CommentTree};
use crate::services::credential_store::load_summaries;

const ARTICLE_COLUMNS: &str = "id, title, description, image_public_id, image_url, \
     image_secure_url, image_created_at, author_id, category_id, created_at, updated_at";

const DAY_MILLIS: i64 = 24 * 60 * 60 * 1000;

/// Conditions shared by the list reads; all present conditions must hold.
#[derive(Debug, Default)]
struct ArticleQuery {
    category: Option<CategoryId>,
    text: Option<String>,
    authors: Vec<UserId>,
    favorites_of: Option<UserId>,
    sort: SortOrder,
    page: Pagination,
}

impl ArticleQuery {
    fn push_conditions(&self, qb: &mut QueryBuilder<'_, Sqlite>) {
        qb.push(" WHERE 1 = 1");
        if let Some(category) = self.category {
            qb.push(" AND category_id = ").push_bind(category.value());
        }
        if let Some(text) = self.text.as_deref() {
            qb.push(" AND instr(title_folded, ")
                .push_bind(fold_title(text))
                .push(") > 0");
        }
        for author in &self.authors {
            qb.push(" AND author_id = ").push_bind(author.value());
        }
        if let Some(user) = self.favorites_of {
            qb.push(" AND id IN (SELECT id2 FROM associations WHERE atype = ")
                .push_bind(AssocType::UserFavorites.as_str())
                .push(" AND id1 = ")
                .push_bind(user.value())
                .push(")");
        }
    }
}

#[derive(Clone)]
pub struct ArticleStore {
    db: Database,
    storage: Arc<dyn ObjectStorage>,
    comments: CommentTree,
    config: ArticlesConfig,
}

impl ArticleStore {
    pub fn new(
        db: Database,
        storage: Arc<dyn ObjectStorage>,
        comments: CommentTree,
        config: ArticlesConfig,
    ) -> Self {
        Self { db, storage, comments, config }
    }

    /// Publish an article. The image is uploaded before anything is written;
    /// if the write then fails the upload is rolled back.
    #[instrument(skip(self, input), fields(title = %input.title))]
    pub async fn create(&self, input: NewArticle, author: UserId) -> AppResult<Article> {
        let title = input.title.trim();
        if title.is_empty() {
            return Err(AppError::Validation("The article does not contain a title".to_string()));
        }
        let description = input.description.trim();
        if description.is_empty() {
            return Err(AppError::Validation("Describe your article".to_string()));
        }
        let category = input.category.ok_or_else(|| {
            AppError::Validation("You must specify a category for your article".to_string())
        })?;
        let found = sqlx::query_scalar::<_, i64>("SELECT 1 FROM categories WHERE id = ?")
            .bind(category)
            .fetch_optional(self.db.pool())
            .await?;
        if found.is_none() {
            return Err(AppError::NotFound("The category not found".to_string()));
        }
        let upload = match input.image {
            Some(upload) if !upload.bytes.is_empty() => upload,
            _ => return Err(AppError::Validation("No files provided".to_string())),
        };

        let image = self
            .storage
            .upload(upload.bytes, upload.file_name.as_deref())
            .await?;

        let now = current_time_millis();
        let article = Article {
            id: ArticleId::new(self.db.next_id()),
            title: title.to_string(),
            description: description.to_string(),
            image,
            author,
            category,
            created_at: millis_to_datetime(now),
            updated_at: millis_to_datetime(now),
        };

        if let Err(e) = self.insert_with_link(&article).await {
            if let Err(cleanup) = self.storage.delete(&article.image.public_id).await {
                warn!("Failed to clean up image {}: {}", article.image.public_id, cleanup);
            }
            return Err(e);
        }

        info!("Article {} published by {}", article.id, author);
        Ok(article)
    }

    pub async fn get_by_id(&self, id: ArticleId) -> AppResult<ArticleDetails> {
        let article = self.get_article(id).await?;
        self.populate(vec![article], Populate::FULL)
            .await?
            .pop()
            .ok_or_else(|| AppError::NotFound("Article not found".to_string()))
    }

    /// The bare row, without relations.
    pub async fn get_article(&self, id: ArticleId) -> AppResult<Article> {
        let row = sqlx::query(&format!("SELECT {} FROM articles WHERE id = ?", ARTICLE_COLUMNS))
            .bind(id)
            .fetch_optional(self.db.pool())
            .await?
            .ok_or_else(|| AppError::NotFound("Article not found".to_string()))?;
        article_from_row(&row)
    }

    pub async fn list_all(
        &self,
        filter: ArticleFilter,
        populate: Populate,
    ) -> AppResult<Page<ArticleDetails>> {
        let text = filter.text.map(|t| t.trim().to_string()).filter(|t| !t.is_empty());
        let query = ArticleQuery {
            category: filter.category,
            text,
            sort: filter.sort,
            page: filter.page,
            ..ArticleQuery::default()
        };
        self.query_page(query, populate).await
    }

    /// Articles seen from one user: their own, their favorites, or those of a
    /// given author. Requested filters combine with AND.
    pub async fn list_for_user(
        &self,
        filter: UserArticleFilter,
        caller: UserId,
        populate: Populate,
    ) -> AppResult<Page<ArticleDetails>> {
        let mut query = ArticleQuery {
            page: filter.page,
            ..ArticleQuery::default()
        };
        if filter.only_mine {
            query.authors.push(caller);
        }
        if let Some(author) = filter.author_id {
            query.authors.push(author);
        }
        if filter.only_favorites {
            query.favorites_of = Some(caller);
        }
        self.query_page(query, populate).await
    }

    /// Remove an article with its comments and every reference to it. The
    /// image is deleted after the data, and a failure there is only logged.
    #[instrument(skip(self))]
    pub async fn remove(&self, id: ArticleId, caller: UserId) -> AppResult<()> {
        let article = self.get_article(id).await?;
        if article.author != caller {
            return Err(AppError::Forbidden("You are not author of this article".to_string()));
        }

        let mut tx = self.db.begin().await?;

        let comment_ids = sqlx::query_scalar::<_, i64>("SELECT id FROM comments WHERE article_id = ?")
            .bind(id)
            .fetch_all(&mut *tx)
            .await?;
        for comment_id in &comment_ids {
            delete_comment_row(&mut tx, *comment_id).await?;
        }

        associations::remove_all_from(&mut *tx, &[id.value()], AssocType::ArticleComments).await?;
        associations::remove_all_from(&mut *tx, &[id.value()], AssocType::ArticleLikes).await?;
        let unfavorited = associations::remove_all_to(&mut *tx, AssocType::UserFavorites, id.value()).await?;
        associations::remove_all_to(&mut *tx, AssocType::UserArticles, id.value()).await?;
        sqlx::query("DELETE FROM articles WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        info!(
            "Removed article {} ({} comments, {} favorites)",
            id,
            comment_ids.len(),
            unfavorited
        );

        if let Err(e) = self.storage.delete(&article.image.public_id).await {
            warn!("Failed to delete image {} of article {}: {}", article.image.public_id, id, e);
        }
        Ok(())
    }

    /// Most liked article created within the configured window.
    pub async fn most_popular(&self) -> AppResult<Option<ArticleDetails>> {
        self.most_popular_in_window(self.config.popular_window_days).await
    }

    /// Most liked article created in the last `days` days; ties go to the
    /// earliest created.
    pub async fn most_popular_in_window(&self, days: i64) -> AppResult<Option<ArticleDetails>> {
        let window = days.max(0).saturating_mul(DAY_MILLIS);
        let since = current_time_millis().saturating_sub(window);
        let id = sqlx::query_scalar::<_, i64>(
            "SELECT a.id FROM articles a \
             LEFT JOIN associations l ON l.id1 = a.id AND l.atype = ? \
             WHERE a.created_at >= ? \
             GROUP BY a.id \
             ORDER BY COUNT(l.id2) DESC, a.created_at ASC, a.id ASC \
             LIMIT 1",
        )
        .bind(AssocType::ArticleLikes.as_str())
        .bind(since)
        .fetch_optional(self.db.pool())
        .await?;

        match id {
            Some(id) => Ok(Some(self.get_by_id(ArticleId::new(id)).await?)),
            None => Ok(None),
        }
    }

    async fn insert_with_link(&self, article: &Article) -> AppResult<()> {
        let mut tx = self.db.begin().await?;

        sqlx::query(&format!(
            "INSERT INTO articles ({}, title_folded) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            ARTICLE_COLUMNS
        ))
        .bind(article.id)
        .bind(&article.title)
        .bind(&article.description)
        .bind(&article.image.public_id)
        .bind(&article.image.url)
        .bind(&article.image.secure_url)
        .bind(article.image.created_at.timestamp_millis())
        .bind(article.author)
        .bind(article.category)
        .bind(article.created_at.timestamp_millis())
        .bind(article.updated_at.timestamp_millis())
        .bind(fold_title(&article.title))
        .execute(&mut *tx)
        .await?;

        associations::add(&mut *tx, article.author.value(), AssocType::UserArticles, article.id.value())
            .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn query_page(
        &self,
        query: ArticleQuery,
        populate: Populate,
    ) -> AppResult<Page<ArticleDetails>> {
        let mut count = QueryBuilder::<Sqlite>::new("SELECT COUNT(*) FROM articles");
        query.push_conditions(&mut count);
        let total = count
            .build_query_scalar::<i64>()
            .fetch_one(self.db.pool())
            .await?;

        let mut select = QueryBuilder::<Sqlite>::new(format!("SELECT {} FROM articles", ARTICLE_COLUMNS));
        query.push_conditions(&mut select);
        let direction = query.sort.as_sql();
        select.push(format!(" ORDER BY created_at {}, id {}", direction, direction));
        // SQLite reads a negative LIMIT as unbounded
        let limit = if query.page.limit == 0 { -1 } else { query.page.limit as i64 };
        select.push(" LIMIT ").push_bind(limit);
        select.push(" OFFSET ").push_bind(query.page.offset as i64);

        let rows = select.build().fetch_all(self.db.pool()).await?;
        let articles = rows.iter().map(article_from_row).collect::<AppResult<Vec<_>>>()?;

        Ok(Page {
            total: total as u64,
            result: self.populate(articles, populate).await?,
        })
    }

    /// Join the selected relations onto a batch of articles, keeping order.
    async fn populate(
        &self,
        articles: Vec<Article>,
        populate: Populate,
    ) -> AppResult<Vec<ArticleDetails>> {
        let ids: Vec<ArticleId> = articles.iter().map(|a| a.id).collect();
        let raw_ids: Vec<i64> = ids.iter().map(|id| id.value()).collect();

        let authors = if populate.author {
            let mut author_ids: Vec<i64> = articles.iter().map(|a| a.author.value()).collect();
            author_ids.sort_unstable();
            author_ids.dedup();
            load_summaries(&self.db, &author_ids).await?
        } else {
            HashMap::new()
        };

        let mut categories = HashMap::new();
        if populate.category && !articles.is_empty() {
            let mut qb = QueryBuilder::<Sqlite>::new("SELECT id, name, created_at FROM categories WHERE id IN (");
            let mut separated = qb.separated(",");
            for article in &articles {
                separated.push_bind(article.category.value());
            }
            qb.push(")");
            for row in qb.build().fetch_all(self.db.pool()).await? {
                let category = category_from_row(&row)?;
                categories.insert(category.id, category);
            }
        }

        let mut likes: HashMap<i64, Vec<UserId>> = HashMap::new();
        if populate.likes {
            for (article, user) in
                associations::edges_from(self.db.pool(), &raw_ids, AssocType::ArticleLikes).await?
            {
                likes.entry(article).or_default().push(UserId::new(user));
            }
        }

        let mut trees = if populate.comments {
            self.comments.trees_for(&ids).await?
        } else {
            HashMap::new()
        };

        Ok(articles
            .into_iter()
            .map(|article| ArticleDetails {
                author_details: authors.get(&article.author).cloned(),
                category_details: categories.get(&article.category).cloned(),
                likes: likes.remove(&article.id.value()).unwrap_or_default(),
                comments: trees.remove(&article.id).unwrap_or_default(),
                article,
            })
            .collect())
    }
}

/// SQLite's `lower()` only folds ASCII, so titles are folded here and stored
/// alongside the original.
fn fold_title(text: &str) -> String {
    text.to_lowercase()
}

fn article_from_row(row: &SqliteRow) -> AppResult<Article> {
    Ok(Article {
        id: ArticleId::new(row.try_get("id")?),
        title: row.try_get("title")?,
        description: row.try_get("description")?,
        image: ImageDescriptor {
            public_id: row.try_get("image_public_id")?,
            url: row.try_get("image_url")?,
            secure_url: row.try_get("image_secure_url")?,
            created_at: millis_to_datetime(row.try_get("image_created_at")?),
        },
        author: UserId::new(row.try_get("author_id")?),
        category: CategoryId::new(row.try_get("category_id")?),
        created_at: millis_to_datetime(row.try_get("created_at")?),
        updated_at: millis_to_datetime(row.try_get("updated_at")?),
    })
}
