use std::sync::Arc;
use std::time::Duration;

use crate::{
    config::Config,
    error::AppResult,
    infrastructure::{
        database::Database,
        object_storage::{LocalObjectStorage, ObjectStorage},
        security::{Argon2PasswordHasher, JwtTokenIssuer},
    },
    services::{ArticleStore, CategoryStore, CommentTree, CredentialStore, ToggleEngine},
};

#[derive(Clone)]
pub struct AppState {
    pub db: Database,
    pub credentials: CredentialStore,
    pub articles: ArticleStore,
    pub comments: CommentTree,
    pub toggles: ToggleEngine,
    pub categories: CategoryStore,
    pub config: Config,
}

impl AppState {
    /// Open the configured database, apply the schema and wire every store.
    pub async fn new(config: Config) -> AppResult<Self> {
        let db = Database::connect(
            &config.database.url,
            config.database.max_connections,
            config.id_node,
        )
        .await?;
        db.initialize().await?;

        let storage = Arc::new(LocalObjectStorage::new(
            config.storage.upload_dir.clone(),
            config.storage.public_base_url.clone(),
        ));
        Ok(Self::with_parts(db, storage, config))
    }

    /// Wire the stores around an existing database and object storage.
    pub fn with_parts(db: Database, storage: Arc<dyn ObjectStorage>, config: Config) -> Self {
        let tokens = Arc::new(JwtTokenIssuer::new(
            &config.auth.jwt_secret,
            Duration::from_secs(config.auth.jwt_expiry_secs),
        ));
        let credentials = CredentialStore::new(
            db.clone(),
            Arc::new(Argon2PasswordHasher),
            tokens,
            config.auth.clone(),
        );
        let toggles = ToggleEngine::new(db.clone());
        let comments = CommentTree::new(db.clone(), toggles.clone());
        let articles = ArticleStore::new(
            db.clone(),
            storage,
            comments.clone(),
            config.articles.clone(),
        );
        let categories = CategoryStore::new(db.clone());

        Self {
            db,
            credentials,
            articles,
            comments,
            toggles,
            categories,
            config,
        }
    }
}
