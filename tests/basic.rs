use std::sync::Arc;

use live_articles::{
    config::Config,
    infrastructure::{database::Database, object_storage::LocalObjectStorage},
    models::{ArticleFilter, ImageUpload, NewArticle, Pagination, Populate, Role, UserArticleFilter},
    AppError, AppState,
};

async fn state() -> (AppState, tempfile::TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let db = Database::in_memory().await.unwrap();
    let storage = Arc::new(LocalObjectStorage::new(dir.path(), "http://localhost:5000/media"));
    (AppState::with_parts(db, storage, Config::default()), dir)
}

fn article(title: &str, category: live_articles::core::CategoryId) -> NewArticle {
    NewArticle {
        title: title.to_string(),
        description: "A description".to_string(),
        category: Some(category),
        image: Some(ImageUpload { bytes: b"\x89PNG".to_vec(), file_name: Some("cover.png".into()) }),
    }
}

#[tokio::test]
async fn test_register_publish_favorite() {
    let (state, dir) = state().await;

    let alice = state.credentials.sign_up("alice", "alice@x.com", "pw1234").await.unwrap();
    let session = state.credentials.sign_in("alice@x.com", "pw1234").await.unwrap();
    assert!(!session.token.is_empty());
    assert!(matches!(
        state.credentials.sign_in("alice@x.com", "nope").await,
        Err(AppError::Unauthorized(_))
    ));

    let admin = state.credentials.set_role(alice.user.id, Role::Admin).await.unwrap();
    let tech = state.categories.create(&admin, "Tech").await.unwrap();

    let hello = state.articles.create(article("Hello", tech.id), admin.id).await.unwrap();
    assert!(dir.path().join(&hello.image.public_id).exists());

    state.toggles.set_article_favorite(admin.id, hello.id, true).await.unwrap();
    let favorites = state
        .articles
        .list_for_user(
            UserArticleFilter { only_favorites: true, ..Default::default() },
            admin.id,
            Populate::FULL,
        )
        .await
        .unwrap();
    assert_eq!(favorites.total, 1);
    assert_eq!(favorites.result[0].article.id, hello.id);

    let me = state.credentials.get_user(admin.id).await.unwrap();
    assert_eq!(me.favourite_articles, vec![hello.id]);
    assert_eq!(me.my_articles, vec![hello.id]);

    state.toggles.set_article_favorite(admin.id, hello.id, false).await.unwrap();
    let favorites = state
        .articles
        .list_for_user(
            UserArticleFilter { only_favorites: true, ..Default::default() },
            admin.id,
            Populate::FULL,
        )
        .await
        .unwrap();
    assert_eq!(favorites.total, 0);
    assert!(favorites.result.is_empty());
}

#[tokio::test]
async fn test_article_removal_cleans_everything() {
    let (state, dir) = state().await;

    let alice = state.credentials.create_user("alice", "alice@x.com", "pw1234").await.unwrap();
    let bob = state.credentials.create_user("bob", "bob@x.com", "pw1234").await.unwrap();
    let admin = state.credentials.set_role(alice.id, Role::Admin).await.unwrap();
    let tech = state.categories.create(&admin, "Tech").await.unwrap();

    let hello = state.articles.create(article("Hello", tech.id), alice.id).await.unwrap();
    let root = state.comments.add_top_level_comment(hello.id, "first", bob.id).await.unwrap();
    let reply = state.comments.add_reply(root.id, "re1", alice.id).await.unwrap();
    state.comments.add_reply(reply.id, "re2", bob.id).await.unwrap();
    state.toggles.set_article_favorite(bob.id, hello.id, true).await.unwrap();
    state.toggles.set_article_like(hello.id, bob.id, true).await.unwrap();

    let details = state.articles.get_by_id(hello.id).await.unwrap();
    assert_eq!(details.comments.len(), 1);
    assert_eq!(details.comments[0].replies[0].replies.len(), 1);
    assert_eq!(details.likes, vec![bob.id]);

    assert!(matches!(
        state.articles.remove(hello.id, bob.id).await,
        Err(AppError::Forbidden(_))
    ));

    state.articles.remove(hello.id, alice.id).await.unwrap();
    assert!(!dir.path().join(&hello.image.public_id).exists());
    assert!(state.credentials.get_user(bob.id).await.unwrap().favourite_articles.is_empty());
    assert!(state.credentials.get_user(alice.id).await.unwrap().my_articles.is_empty());
    assert!(matches!(
        state.comments.get_comment(reply.id).await,
        Err(AppError::NotFound(_))
    ));

    let page = state
        .articles
        .list_all(
            ArticleFilter { page: Pagination { limit: 10, offset: 0 }, ..Default::default() },
            Populate::FULL,
        )
        .await
        .unwrap();
    assert_eq!(page.total, 0);
}
