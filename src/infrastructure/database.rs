// Database - SQLite connection pool, schema bootstrap and id allocation.
// Every store receives a clone of this handle.

use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::{Sqlite, Transaction};
use std::str::FromStr;
use std::sync::Arc;
use tracing::info;

use crate::error::{AppError, AppResult};
use crate::infrastructure::id_generator::IdGenerator;

const SCHEMA: &[(&str, &str)] = &[
    (
        "users table",
        r#"
        CREATE TABLE IF NOT EXISTS users (
            id INTEGER PRIMARY KEY,
            name TEXT NOT NULL UNIQUE,
            email TEXT NOT NULL UNIQUE,
            password_hash TEXT,
            role TEXT NOT NULL DEFAULT 'USER',
            gender TEXT,
            avatar TEXT,
            age INTEGER,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        )
        "#,
    ),
    (
        "categories table",
        r#"
        CREATE TABLE IF NOT EXISTS categories (
            id INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            created_at INTEGER NOT NULL
        )
        "#,
    ),
    (
        "articles table",
        r#"
        CREATE TABLE IF NOT EXISTS articles (
            id INTEGER PRIMARY KEY,
            title TEXT NOT NULL,
            title_folded TEXT NOT NULL,
            description TEXT NOT NULL,
            image_public_id TEXT NOT NULL,
            image_url TEXT NOT NULL,
            image_secure_url TEXT NOT NULL,
            image_created_at INTEGER NOT NULL,
            author_id INTEGER NOT NULL,
            category_id INTEGER NOT NULL,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        )
        "#,
    ),
    (
        "comments table",
        r#"
        CREATE TABLE IF NOT EXISTS comments (
            id INTEGER PRIMARY KEY,
            text TEXT NOT NULL,
            author_id INTEGER,
            article_id INTEGER NOT NULL,
            parent_id INTEGER,
            main_parent_id INTEGER,
            created_at INTEGER NOT NULL
        )
        "#,
    ),
    (
        "associations table",
        r#"
        CREATE TABLE IF NOT EXISTS associations (
            seq INTEGER PRIMARY KEY AUTOINCREMENT,
            id1 INTEGER NOT NULL,
            atype TEXT NOT NULL,
            id2 INTEGER NOT NULL,
            time_created INTEGER NOT NULL,
            UNIQUE (id1, atype, id2)
        )
        "#,
    ),
    (
        "articles created index",
        "CREATE INDEX IF NOT EXISTS idx_articles_created ON articles(created_at, id)",
    ),
    (
        "articles author index",
        "CREATE INDEX IF NOT EXISTS idx_articles_author ON articles(author_id)",
    ),
    (
        "articles category index",
        "CREATE INDEX IF NOT EXISTS idx_articles_category ON articles(category_id)",
    ),
    (
        "comments article index",
        "CREATE INDEX IF NOT EXISTS idx_comments_article ON comments(article_id)",
    ),
    (
        "comments thread index",
        "CREATE INDEX IF NOT EXISTS idx_comments_main_parent ON comments(main_parent_id)",
    ),
    (
        "associations reverse index",
        "CREATE INDEX IF NOT EXISTS idx_assoc_id2_atype ON associations(id2, atype)",
    ),
];

#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
    ids: Arc<IdGenerator>,
}

impl Database {
    /// Connect to the database at `url`; the file is created when the URL asks
    /// for it (`?mode=rwc`).
    pub async fn connect(url: &str, max_connections: u32, node_id: u16) -> AppResult<Self> {
        let options = SqliteConnectOptions::from_str(url)
            .map_err(|e| AppError::Database(format!("Invalid database URL {}: {}", url, e)))?
            .foreign_keys(false);

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections.max(1))
            .connect_with(options)
            .await
            .map_err(|e| AppError::Database(format!("Failed to connect to {}: {}", url, e)))?;

        info!("Connected to database {}", url);
        Ok(Self::from_pool(pool, node_id))
    }

    /// Private in-memory database. The pool is pinned to one connection that
    /// never expires, since every SQLite memory connection is its own database.
    pub async fn in_memory() -> AppResult<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await
            .map_err(|e| {
                AppError::Database(format!("Failed to connect to in-memory SQLite: {}", e))
            })?;

        let db = Self::from_pool(pool, 0);
        db.initialize().await?;
        Ok(db)
    }

    pub fn from_pool(pool: SqlitePool, node_id: u16) -> Self {
        Self {
            pool,
            ids: Arc::new(IdGenerator::new(node_id)),
        }
    }

    /// Create tables and indexes that do not exist yet.
    pub async fn initialize(&self) -> AppResult<()> {
        for (name, statement) in SCHEMA {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .map_err(|e| AppError::Database(format!("Failed to create {}: {}", name, e)))?;
        }
        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn begin(&self) -> AppResult<Transaction<'static, Sqlite>> {
        self.pool
            .begin()
            .await
            .map_err(|e| AppError::Database(format!("Failed to begin transaction: {}", e)))
    }

    /// Allocate a fresh, time-ordered entity id.
    pub fn next_id(&self) -> i64 {
        self.ids.next_id()
    }

    /// Health check to verify database connectivity
    pub async fn health_check(&self) -> AppResult<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::Database(format!("Database health check failed: {}", e)))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::Row;

    #[tokio::test]
    async fn test_initialize_is_idempotent() {
        let db = Database::in_memory().await.unwrap();
        db.initialize().await.unwrap();
        db.health_check().await.unwrap();

        let row = sqlx::query(
            "SELECT COUNT(*) AS n FROM sqlite_master WHERE type = 'table' AND name IN \
             ('users', 'categories', 'articles', 'comments', 'associations')",
        )
        .fetch_one(db.pool())
        .await
        .unwrap();
        assert_eq!(row.get::<i64, _>("n"), 5);
    }

    #[tokio::test]
    async fn test_next_id_is_increasing() {
        let db = Database::in_memory().await.unwrap();
        let a = db.next_id();
        let b = db.next_id();
        assert!(a < b);
    }
}
