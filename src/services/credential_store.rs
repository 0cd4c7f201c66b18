use once_cell::sync::Lazy;
use regex::Regex;
use sqlx::sqlite::SqliteRow;
use sqlx::{QueryBuilder, Row, Sqlite};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, instrument, warn};

use crate::config::AuthConfig;
use crate::core::{current_time_millis, millis_to_datetime, ArticleId, UserId};
use crate::error::{AppError, AppResult};
use crate::infrastructure::associations::{self, AssocType};
use crate::infrastructure::database::Database;
use crate::infrastructure::security::{PasswordHasher, TokenIssuer};
use crate::models::{AuthSession, AuthType, Gender, ProfileUpdate, Role, User, UserSummary};

static EMAIL_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").unwrap());

const USER_COLUMNS: &str =
    "id, name, email, role, gender, avatar, age, created_at, updated_at";

/// Users and their credentials. Hashes never leave this type.
#[derive(Clone)]
pub struct CredentialStore {
    db: Database,
    hasher: Arc<dyn PasswordHasher>,
    tokens: Arc<dyn TokenIssuer>,
    config: AuthConfig,
}

impl CredentialStore {
    pub fn new(
        db: Database,
        hasher: Arc<dyn PasswordHasher>,
        tokens: Arc<dyn TokenIssuer>,
        config: AuthConfig,
    ) -> Self {
        Self { db, hasher, tokens, config }
    }

    #[instrument(skip(self, raw))]
    pub async fn create_user(&self, name: &str, email: &str, raw: &str) -> AppResult<User> {
        let name = name.trim();
        let email = email.trim().to_lowercase();

        if name.is_empty() {
            return Err(AppError::Validation("Please add username".to_string()));
        }
        if email.is_empty() {
            return Err(AppError::Validation("Please add an email".to_string()));
        }
        validate_email(&email)?;
        self.validate_password(raw)?;
        self.ensure_unique(None, Some(name), Some(&email)).await?;

        let digest = self.hash_password(raw).await?;
        let id = UserId::new(self.db.next_id());
        let now = current_time_millis();

        sqlx::query(
            "INSERT INTO users (id, name, email, password_hash, role, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(id)
        .bind(name)
        .bind(&email)
        .bind(&digest)
        .bind(Role::User.as_str())
        .bind(now)
        .bind(now)
        .execute(self.db.pool())
        .await?;

        info!("Registered user {} ({})", name, id);
        self.get_user(id).await
    }

    /// `identifier` is either the user name or the email (any case).
    #[instrument(skip(self, raw))]
    pub async fn verify_credential(&self, identifier: &str, raw: &str) -> AppResult<User> {
        let identifier = identifier.trim();
        let row = sqlx::query(
            "SELECT id, password_hash FROM users WHERE email = ? OR name = ? \
             ORDER BY CASE WHEN email = ? THEN 0 ELSE 1 END LIMIT 1",
        )
        .bind(identifier.to_lowercase())
        .bind(identifier)
        .bind(identifier.to_lowercase())
        .fetch_optional(self.db.pool())
        .await?;

        let row = row.ok_or_else(|| AppError::Unauthorized("The user is not registered".to_string()))?;
        let id = UserId::new(row.try_get("id")?);
        let digest: Option<String> = row.try_get("password_hash")?;

        self.check_password(id, digest.as_deref(), raw).await?;
        self.get_user(id).await
    }

    #[instrument(skip(self, old, new))]
    pub async fn update_credential(&self, user: UserId, old: &str, new: &str) -> AppResult<User> {
        let digest = sqlx::query_scalar::<_, Option<String>>(
            "SELECT password_hash FROM users WHERE id = ?",
        )
        .bind(user)
        .fetch_optional(self.db.pool())
        .await?
        .ok_or_else(|| AppError::NotFound("User not found".to_string()))?;

        self.check_password(user, digest.as_deref(), old).await?;
        self.validate_password(new)?;

        let digest = self.hash_password(new).await?;
        sqlx::query("UPDATE users SET password_hash = ?, updated_at = ? WHERE id = ?")
            .bind(&digest)
            .bind(current_time_millis())
            .bind(user)
            .execute(self.db.pool())
            .await?;

        info!("Updated credential of user {}", user);
        self.get_user(user).await
    }

    pub async fn sign_up(&self, name: &str, email: &str, raw: &str) -> AppResult<AuthSession> {
        let user = self.create_user(name, email, raw).await?;
        self.session(user, Some(AuthType::Signup))
    }

    pub async fn sign_in(&self, identifier: &str, raw: &str) -> AppResult<AuthSession> {
        let user = self.verify_credential(identifier, raw).await?;
        self.session(user, Some(AuthType::Signin))
    }

    pub async fn change_password(&self, user: UserId, old: &str, new: &str) -> AppResult<AuthSession> {
        let user = self.update_credential(user, old, new).await?;
        self.session(user, None)
    }

    pub async fn get_user(&self, id: UserId) -> AppResult<User> {
        self.load_user(id)
            .await?
            .ok_or_else(|| AppError::NotFound("User not found".to_string()))
    }

    /// Look a user up by email (any case) or by name.
    pub async fn find_by_identifier(&self, identifier: &str) -> AppResult<User> {
        let identifier = identifier.trim();
        let id = sqlx::query_scalar::<_, i64>(
            "SELECT id FROM users WHERE email = ? OR name = ? \
             ORDER BY CASE WHEN email = ? THEN 0 ELSE 1 END LIMIT 1",
        )
        .bind(identifier.to_lowercase())
        .bind(identifier)
        .bind(identifier.to_lowercase())
        .fetch_optional(self.db.pool())
        .await?
        .ok_or_else(|| AppError::NotFound(format!("No user named {}", identifier)))?;

        self.get_user(UserId::new(id)).await
    }

    #[instrument(skip(self, update))]
    pub async fn update_profile(&self, user: UserId, update: ProfileUpdate) -> AppResult<User> {
        let name = match update.name.as_deref().map(str::trim) {
            Some("") => return Err(AppError::Validation("Please add username".to_string())),
            other => other,
        };
        let email = match update.email.as_deref().map(|e| e.trim().to_lowercase()) {
            Some(e) if e.is_empty() => {
                return Err(AppError::Validation("Please add an email".to_string()))
            }
            Some(e) => {
                validate_email(&e)?;
                Some(e)
            }
            None => None,
        };
        if matches!(update.age, Some(age) if age < 0) {
            return Err(AppError::Validation("Age cannot be negative".to_string()));
        }

        self.get_user(user).await?;
        self.ensure_unique(Some(user), name, email.as_deref()).await?;

        sqlx::query(
            "UPDATE users SET name = COALESCE(?, name), email = COALESCE(?, email), \
             gender = COALESCE(?, gender), age = COALESCE(?, age), avatar = COALESCE(?, avatar), \
             updated_at = ? WHERE id = ?",
        )
        .bind(name)
        .bind(email.as_deref())
        .bind(update.gender.map(|g| g.as_str()))
        .bind(update.age)
        .bind(update.avatar.as_deref())
        .bind(current_time_millis())
        .bind(user)
        .execute(self.db.pool())
        .await?;

        self.get_user(user).await
    }

    #[instrument(skip(self))]
    pub async fn set_role(&self, user: UserId, role: Role) -> AppResult<User> {
        let result = sqlx::query("UPDATE users SET role = ?, updated_at = ? WHERE id = ?")
            .bind(role.as_str())
            .bind(current_time_millis())
            .bind(user)
            .execute(self.db.pool())
            .await?;
        if result.rows_affected() == 0 {
            return Err(AppError::NotFound("User not found".to_string()));
        }

        info!("User {} now has role {}", user, role);
        self.get_user(user).await
    }

    /// Resolve a bearer token to its user.
    pub async fn authenticate_token(&self, token: &str) -> AppResult<User> {
        let claims = self.tokens.verify(token)?;
        let id = claims.user_id()?;
        self.load_user(id)
            .await?
            .ok_or_else(|| AppError::Unauthorized("User not authenticated".to_string()))
    }

    fn session(&self, user: User, auth_type: Option<AuthType>) -> AppResult<AuthSession> {
        let token = self.tokens.sign(user.id, user.role)?;
        Ok(AuthSession { user, token, auth_type })
    }

    async fn check_password(&self, user: UserId, digest: Option<&str>, raw: &str) -> AppResult<()> {
        match digest {
            Some(digest) => {
                if self.verify_password(raw, digest).await? {
                    Ok(())
                } else {
                    Err(AppError::Unauthorized("Invalid credential".to_string()))
                }
            }
            None if self.config.legacy_passwordless_login => {
                warn!("User {} has no stored credential, accepting passwordless login", user);
                Ok(())
            }
            None => Err(AppError::Unauthorized("Invalid credential".to_string())),
        }
    }

    // Argon2 is deliberately slow, so it runs on the blocking pool.
    async fn hash_password(&self, raw: &str) -> AppResult<String> {
        let hasher = Arc::clone(&self.hasher);
        let raw = raw.to_string();
        tokio::task::spawn_blocking(move || hasher.hash(&raw))
            .await
            .map_err(|e| AppError::Internal(format!("Password hashing task failed: {}", e)))?
    }

    async fn verify_password(&self, raw: &str, digest: &str) -> AppResult<bool> {
        let hasher = Arc::clone(&self.hasher);
        let (raw, digest) = (raw.to_string(), digest.to_string());
        tokio::task::spawn_blocking(move || hasher.verify(&raw, &digest))
            .await
            .map_err(|e| AppError::Internal(format!("Password verification task failed: {}", e)))?
    }

    fn validate_password(&self, raw: &str) -> AppResult<()> {
        if raw.chars().count() < self.config.password_min_length {
            return Err(AppError::Validation(format!(
                "Password must be at least {} characters",
                self.config.password_min_length
            )));
        }
        Ok(())
    }

    /// Conflict when another user (not `except`) already holds the name or email.
    async fn ensure_unique(
        &self,
        except: Option<UserId>,
        name: Option<&str>,
        email: Option<&str>,
    ) -> AppResult<()> {
        let except = except.map(UserId::value).unwrap_or(0);

        if let Some(name) = name {
            let taken = sqlx::query_scalar::<_, i64>("SELECT 1 FROM users WHERE name = ? AND id != ?")
                .bind(name)
                .bind(except)
                .fetch_optional(self.db.pool())
                .await?;
            if taken.is_some() {
                return Err(AppError::Conflict(format!("User name {} is already taken", name)));
            }
        }

        if let Some(email) = email {
            let taken = sqlx::query_scalar::<_, i64>("SELECT 1 FROM users WHERE email = ? AND id != ?")
                .bind(email)
                .bind(except)
                .fetch_optional(self.db.pool())
                .await?;
            if taken.is_some() {
                return Err(AppError::Conflict(format!("Email {} is already registered", email)));
            }
        }

        Ok(())
    }

    async fn load_user(&self, id: UserId) -> AppResult<Option<User>> {
        let row = sqlx::query(&format!("SELECT {} FROM users WHERE id = ?", USER_COLUMNS))
            .bind(id)
            .fetch_optional(self.db.pool())
            .await?;
        let Some(row) = row else {
            return Ok(None);
        };

        let mut user = user_from_row(&row)?;
        user.favourite_articles =
            associations::targets(self.db.pool(), id.value(), AssocType::UserFavorites)
                .await?
                .into_iter()
                .map(ArticleId::new)
                .collect();
        user.my_articles = associations::targets(self.db.pool(), id.value(), AssocType::UserArticles)
            .await?
            .into_iter()
            .map(ArticleId::new)
            .collect();
        Ok(Some(user))
    }
}

/// Author projections for a batch of user ids; unknown ids are skipped.
pub(crate) async fn load_summaries(
    db: &Database,
    ids: &[i64],
) -> AppResult<HashMap<UserId, UserSummary>> {
    if ids.is_empty() {
        return Ok(HashMap::new());
    }

    let mut qb = QueryBuilder::<Sqlite>::new("SELECT id, name, email, role, avatar FROM users WHERE id IN (");
    let mut separated = qb.separated(",");
    for id in ids {
        separated.push_bind(*id);
    }
    qb.push(")");

    let rows = qb.build().fetch_all(db.pool()).await?;
    let mut summaries = HashMap::with_capacity(rows.len());
    for row in rows {
        let role: String = row.try_get("role")?;
        let summary = UserSummary {
            id: UserId::new(row.try_get("id")?),
            name: row.try_get("name")?,
            email: row.try_get("email")?,
            role: role.parse()?,
            avatar: row.try_get("avatar")?,
        };
        summaries.insert(summary.id, summary);
    }
    Ok(summaries)
}

fn validate_email(email: &str) -> AppResult<()> {
    if EMAIL_PATTERN.is_match(email) {
        Ok(())
    } else {
        Err(AppError::Validation(format!("{} is not a valid email", email)))
    }
}

/// Map a `users` row; the association-backed lists start empty.
pub(crate) fn user_from_row(row: &SqliteRow) -> AppResult<User> {
    let role: String = row.try_get("role")?;
    let gender: Option<String> = row.try_get("gender")?;

    Ok(User {
        id: UserId::new(row.try_get("id")?),
        name: row.try_get("name")?,
        email: row.try_get("email")?,
        role: role.parse()?,
        gender: gender.map(|g| g.parse::<Gender>()).transpose()?,
        avatar: row.try_get("avatar")?,
        age: row.try_get("age")?,
        favourite_articles: Vec::new(),
        my_articles: Vec::new(),
        created_at: millis_to_datetime(row.try_get("created_at")?),
        updated_at: millis_to_datetime(row.try_get("updated_at")?),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::security::{Argon2PasswordHasher, JwtTokenIssuer};
    use std::time::Duration;

    /// Reversible stand-in so tests don't pay for argon2 on every call.
    struct PlainHasher;

    impl PasswordHasher for PlainHasher {
        fn hash(&self, raw: &str) -> AppResult<String> {
            Ok(format!("plain${}", raw.chars().rev().collect::<String>()))
        }

        fn verify(&self, raw: &str, digest: &str) -> AppResult<bool> {
            Ok(self.hash(raw)? == digest)
        }
    }

    async fn store_with(config: AuthConfig) -> CredentialStore {
        let db = Database::in_memory().await.unwrap();
        CredentialStore::new(
            db,
            Arc::new(PlainHasher),
            Arc::new(JwtTokenIssuer::new("test-secret", Duration::from_secs(3600))),
            config,
        )
    }

    async fn store() -> CredentialStore {
        store_with(AuthConfig::default()).await
    }

    async fn insert_passwordless(store: &CredentialStore, name: &str) -> UserId {
        let id = UserId::new(store.db.next_id());
        sqlx::query(
            "INSERT INTO users (id, name, email, role, created_at, updated_at) \
             VALUES (?, ?, ?, 'USER', 0, 0)",
        )
        .bind(id)
        .bind(name)
        .bind(format!("{}@legacy.io", name))
        .execute(store.db.pool())
        .await
        .unwrap();
        id
    }

    #[tokio::test]
    async fn test_sign_up_and_sign_in_by_name_or_email() {
        let store = store().await;

        let session = store.sign_up(" alice ", "Alice@X.com", "pw1234").await.unwrap();
        assert_eq!(session.auth_type, Some(AuthType::Signup));
        assert_eq!(session.user.name, "alice");
        assert_eq!(session.user.email, "alice@x.com");
        assert_eq!(session.user.role, Role::User);

        let by_email = store.sign_in("ALICE@x.com", "pw1234").await.unwrap();
        assert_eq!(by_email.auth_type, Some(AuthType::Signin));
        assert_eq!(by_email.user.id, session.user.id);
        assert!(!by_email.token.is_empty());

        let by_name = store.sign_in("alice", "pw1234").await.unwrap();
        assert_eq!(by_name.user.id, session.user.id);
    }

    #[tokio::test]
    async fn test_sign_in_failures() {
        let store = store().await;
        store.sign_up("alice", "alice@x.com", "pw1234").await.unwrap();

        let err = store.sign_in("alice@x.com", "wrong-pw").await.unwrap_err();
        assert!(matches!(err, AppError::Unauthorized(ref m) if m.contains("Invalid")));

        let err = store.sign_in("bob", "pw1234").await.unwrap_err();
        assert!(matches!(err, AppError::Unauthorized(ref m) if m.contains("not registered")));
    }

    #[tokio::test]
    async fn test_create_user_validation() {
        let store = store().await;

        for (name, email, pw) in [
            ("", "a@x.com", "pw1234"),
            ("alice", "  ", "pw1234"),
            ("alice", "not-an-email", "pw1234"),
            ("alice", "a@x.com", "short"),
        ] {
            let err = store.create_user(name, email, pw).await.unwrap_err();
            assert!(matches!(err, AppError::Validation(_)), "{} {} {}", name, email, pw);
        }
    }

    #[tokio::test]
    async fn test_duplicate_name_or_email_conflicts() {
        let store = store().await;
        store.create_user("alice", "alice@x.com", "pw1234").await.unwrap();

        let err = store.create_user("alice", "other@x.com", "pw1234").await.unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));

        let err = store.create_user("bob", "ALICE@x.com", "pw1234").await.unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_passwordless_login_follows_flag() {
        let store = store().await;
        let id = insert_passwordless(&store, "legacy").await;
        let user = store.verify_credential("legacy", "anything").await.unwrap();
        assert_eq!(user.id, id);

        let strict = store_with(AuthConfig {
            legacy_passwordless_login: false,
            ..AuthConfig::default()
        })
        .await;
        insert_passwordless(&strict, "legacy").await;
        let err = strict.verify_credential("legacy", "anything").await.unwrap_err();
        assert!(matches!(err, AppError::Unauthorized(_)));
    }

    #[tokio::test]
    async fn test_change_password() {
        let store = store().await;
        let alice = store.create_user("alice", "alice@x.com", "pw1234").await.unwrap();

        let err = store.change_password(alice.id, "nope", "newpw123").await.unwrap_err();
        assert!(matches!(err, AppError::Unauthorized(_)));

        let err = store.change_password(alice.id, "pw1234", "tiny").await.unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));

        let session = store.change_password(alice.id, "pw1234", "newpw123").await.unwrap();
        assert!(session.auth_type.is_none());
        assert!(store.sign_in("alice", "pw1234").await.is_err());
        assert!(store.sign_in("alice", "newpw123").await.is_ok());
    }

    #[tokio::test]
    async fn test_update_profile() {
        let store = store().await;
        let alice = store.create_user("alice", "alice@x.com", "pw1234").await.unwrap();
        store.create_user("bob", "bob@x.com", "pw1234").await.unwrap();

        let updated = store
            .update_profile(
                alice.id,
                ProfileUpdate {
                    gender: Some(Gender::Female),
                    age: Some(30),
                    ..ProfileUpdate::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.name, "alice");
        assert_eq!(updated.gender, Some(Gender::Female));
        assert_eq!(updated.age, Some(30));

        // Keeping your own name is not a collision
        store
            .update_profile(
                alice.id,
                ProfileUpdate { name: Some("alice".into()), ..ProfileUpdate::default() },
            )
            .await
            .unwrap();

        let err = store
            .update_profile(
                alice.id,
                ProfileUpdate { name: Some("bob".into()), ..ProfileUpdate::default() },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));

        let err = store
            .update_profile(
                alice.id,
                ProfileUpdate { email: Some("BOB@x.com".into()), ..ProfileUpdate::default() },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_set_role_and_tokens() {
        let store = store().await;
        let session = store.sign_up("alice", "alice@x.com", "pw1234").await.unwrap();

        let admin = store.set_role(session.user.id, Role::Admin).await.unwrap();
        assert!(admin.is_admin());

        let found = store.find_by_identifier("ALICE@X.COM").await.unwrap();
        assert_eq!(found.id, admin.id);

        let resolved = store.authenticate_token(&session.token).await.unwrap();
        assert_eq!(resolved.id, session.user.id);
        assert_eq!(resolved.role, Role::Admin);

        let err = store.authenticate_token("garbage").await.unwrap_err();
        assert!(matches!(err, AppError::Unauthorized(_)));

        let err = store.set_role(UserId::new(404), Role::Admin).await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_argon2_digest_is_stored() {
        let db = Database::in_memory().await.unwrap();
        let store = CredentialStore::new(
            db.clone(),
            Arc::new(Argon2PasswordHasher),
            Arc::new(JwtTokenIssuer::new("s", Duration::from_secs(60))),
            AuthConfig::default(),
        );
        let user = store.create_user("alice", "alice@x.com", "pw1234").await.unwrap();

        let digest = sqlx::query_scalar::<_, String>("SELECT password_hash FROM users WHERE id = ?")
            .bind(user.id)
            .fetch_one(db.pool())
            .await
            .unwrap();
        assert!(digest.starts_with("$argon2"));
        assert!(store.verify_credential("alice", "pw1234").await.is_ok());
    }

    /// Records the thread each call runs on.
    #[derive(Default)]
    struct ThreadRecordingHasher {
        threads: std::sync::Mutex<Vec<std::thread::ThreadId>>,
    }

    impl PasswordHasher for ThreadRecordingHasher {
        fn hash(&self, raw: &str) -> AppResult<String> {
            self.threads.lock().unwrap().push(std::thread::current().id());
            PlainHasher.hash(raw)
        }

        fn verify(&self, raw: &str, digest: &str) -> AppResult<bool> {
            self.threads.lock().unwrap().push(std::thread::current().id());
            PlainHasher.verify(raw, digest)
        }
    }

    #[tokio::test]
    async fn test_hashing_runs_off_the_runtime_thread() {
        let hasher = Arc::new(ThreadRecordingHasher::default());
        let store = CredentialStore::new(
            Database::in_memory().await.unwrap(),
            hasher.clone(),
            Arc::new(JwtTokenIssuer::new("s", Duration::from_secs(60))),
            AuthConfig::default(),
        );

        let user = store.create_user("alice", "alice@x.com", "pw1234").await.unwrap();
        store.verify_credential("alice", "pw1234").await.unwrap();
        store.update_credential(user.id, "pw1234", "secret99").await.unwrap();

        let runtime_thread = std::thread::current().id();
        let threads = hasher.threads.lock().unwrap();
        // hash, verify, verify old + hash new
        assert_eq!(threads.len(), 4);
        assert!(threads.iter().all(|id| *id != runtime_thread));
    }
}
