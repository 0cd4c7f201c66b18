use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use tracing::{info, instrument};

use crate::core::{current_time_millis, millis_to_datetime, CategoryId};
use crate::error::{AppError, AppResult};
use crate::infrastructure::database::Database;
use crate::models::{Category, User};

#[derive(Clone)]
pub struct CategoryStore {
    db: Database,
}

impl CategoryStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Only administrators may extend the vocabulary. Names are not unique.
    #[instrument(skip(self, caller), fields(caller = %caller.id))]
    pub async fn create(&self, caller: &User, name: &str) -> AppResult<Category> {
        if !caller.is_admin() {
            return Err(AppError::Forbidden(
                "Only administrators can create categories".to_string(),
            ));
        }

        let name = name.trim();
        if name.is_empty() {
            return Err(AppError::Validation("Category name is required".to_string()));
        }

        let id = CategoryId::new(self.db.next_id());
        let now = current_time_millis();
        sqlx::query("INSERT INTO categories (id, name, created_at) VALUES (?, ?, ?)")
            .bind(id)
            .bind(name)
            .bind(now)
            .execute(self.db.pool())
            .await?;

        info!("Created category {} ({})", name, id);
        Ok(Category {
            id,
            name: name.to_string(),
            created_at: millis_to_datetime(now),
        })
    }

    pub async fn list_all(&self) -> AppResult<Vec<Category>> {
        let rows = sqlx::query("SELECT id, name, created_at FROM categories ORDER BY id")
            .fetch_all(self.db.pool())
            .await?;
        rows.iter().map(category_from_row).collect()
    }

    pub async fn get(&self, id: CategoryId) -> AppResult<Category> {
        let row = sqlx::query("SELECT id, name, created_at FROM categories WHERE id = ?")
            .bind(id)
            .fetch_optional(self.db.pool())
            .await?;
        match row {
            Some(row) => category_from_row(&row),
            None => Err(AppError::NotFound("The category not found".to_string())),
        }
    }
}

pub(crate) fn category_from_row(row: &SqliteRow) -> AppResult<Category> {
    Ok(Category {
        id: CategoryId::new(row.try_get("id")?),
        name: row.try_get("name")?,
        created_at: millis_to_datetime(row.try_get("created_at")?),
    })
}
