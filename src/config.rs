use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;
use std::str::FromStr;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub database: DatabaseConfig,
    pub server: ServerConfig,
    pub auth: AuthConfig,
    pub storage: StorageConfig,
    pub articles: ArticlesConfig,
    pub id_node: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    pub jwt_secret: String,
    pub jwt_expiry_secs: u64,
    pub password_min_length: usize,
    /// Accept sign-in for users that have no stored credential at all.
    /// Kept for old records until product decides what they mean.
    pub legacy_passwordless_login: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub upload_dir: PathBuf,
    pub public_base_url: String,
    pub max_upload_bytes: usize,
}

/// A century; anything longer is a misconfiguration.
pub const MAX_POPULAR_WINDOW_DAYS: i64 = 36_500;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArticlesConfig {
    pub popular_window_days: i64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite:data/live_articles.db?mode=rwc".to_string(),
            max_connections: 5,
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 5000,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            upload_dir: PathBuf::from("data/uploads"),
            public_base_url: "http://localhost:5000/media".to_string(),
            max_upload_bytes: 500_000,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database: DatabaseConfig::default(),
            server: ServerConfig::default(),
            auth: AuthConfig::default(),
            storage: StorageConfig::default(),
            articles: ArticlesConfig::default(),
            id_node: 0,
        }
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            jwt_secret: "change-me".to_string(),
            jwt_expiry_secs: 30 * 24 * 3600,
            password_min_length: 6,
            legacy_passwordless_login: true,
        }
    }
}

impl Default for ArticlesConfig {
    fn default() -> Self {
        Self {
            popular_window_days: 30,
        }
    }
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parse<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|value| value.trim().parse().ok())
        .unwrap_or(default)
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        let defaults = Self::default();
        let port = env_parse("SERVER_PORT", defaults.server.port);

        let config = Self {
            database: DatabaseConfig {
                url: env_or("DATABASE_URL", &defaults.database.url),
                max_connections: env_parse(
                    "DATABASE_MAX_CONNECTIONS",
                    defaults.database.max_connections,
                ),
            },
            server: ServerConfig {
                host: env_or("SERVER_HOST", &defaults.server.host),
                port,
            },
            auth: AuthConfig {
                jwt_secret: env_or("JWT_SECRET", &defaults.auth.jwt_secret),
                jwt_expiry_secs: env_parse("JWT_EXPIRE_SECS", defaults.auth.jwt_expiry_secs),
                password_min_length: env_parse(
                    "AUTH_PASSWORD_MIN_LENGTH",
                    defaults.auth.password_min_length,
                ),
                legacy_passwordless_login: env_parse(
                    "AUTH_LEGACY_PASSWORDLESS_LOGIN",
                    defaults.auth.legacy_passwordless_login,
                ),
            },
            storage: StorageConfig {
                upload_dir: env::var("STORAGE_UPLOAD_DIR")
                    .map(PathBuf::from)
                    .unwrap_or(defaults.storage.upload_dir),
                public_base_url: env_or(
                    "STORAGE_PUBLIC_BASE_URL",
                    &format!("http://localhost:{}/media", port),
                ),
                max_upload_bytes: env_parse(
                    "STORAGE_MAX_UPLOAD_BYTES",
                    defaults.storage.max_upload_bytes,
                ),
            },
            articles: ArticlesConfig {
                popular_window_days: env_parse(
                    "ARTICLES_POPULAR_WINDOW_DAYS",
                    defaults.articles.popular_window_days,
                ),
            },
            id_node: env_parse("ID_NODE", defaults.id_node),
        };

        config.validate()?;
        Ok(config)
    }

    /// Reject values the stores cannot work with.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.id_node >= 1024 {
            anyhow::bail!("ID_NODE must be less than 1024, got {}", self.id_node);
        }
        let days = self.articles.popular_window_days;
        if !(1..=MAX_POPULAR_WINDOW_DAYS).contains(&days) {
            anyhow::bail!(
                "ARTICLES_POPULAR_WINDOW_DAYS must be between 1 and {}, got {}",
                MAX_POPULAR_WINDOW_DAYS,
                days
            );
        }
        Ok(())
    }

    pub fn server_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_env_parse_falls_back_on_garbage() {
        env::set_var("LIVE_ARTICLES_TEST_PORT", "not-a-number");
        assert_eq!(env_parse("LIVE_ARTICLES_TEST_PORT", 42u16), 42);
        env::set_var("LIVE_ARTICLES_TEST_PORT", " 8080 ");
        assert_eq!(env_parse("LIVE_ARTICLES_TEST_PORT", 42u16), 8080);
        env::remove_var("LIVE_ARTICLES_TEST_PORT");
    }

    #[test]
    fn test_validate_bounds() {
        assert!(Config::default().validate().is_ok());

        let mut config = Config::default();
        config.id_node = 1024;
        assert!(config.validate().is_err());

        for days in [0, -1, MAX_POPULAR_WINDOW_DAYS + 1, i64::MAX / 1000] {
            let mut config = Config::default();
            config.articles.popular_window_days = days;
            assert!(config.validate().is_err(), "window of {} days", days);
        }

        let mut config = Config::default();
        config.articles.popular_window_days = MAX_POPULAR_WINDOW_DAYS;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_auth_defaults_keep_passwordless_fallback() {
        let auth = AuthConfig::default();
        assert!(auth.legacy_passwordless_login);
        assert_eq!(auth.password_min_length, 6);
    }
}
