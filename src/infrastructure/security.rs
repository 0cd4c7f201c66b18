// Security - credential hashing and token issuance.

use argon2::password_hash::{rand_core::OsRng, SaltString};
use argon2::{Argon2, PasswordHash, PasswordHasher as _, PasswordVerifier};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::core::{current_time_millis, UserId};
use crate::error::{AppError, AppResult};
use crate::models::Role;

/// One-way credential hashing.
pub trait PasswordHasher: Send + Sync {
    fn hash(&self, raw: &str) -> AppResult<String>;

    /// `Ok(false)` on mismatch; `Err` only when the stored digest is unreadable.
    fn verify(&self, raw: &str, digest: &str) -> AppResult<bool>;
}

#[derive(Debug, Default, Clone)]
pub struct Argon2PasswordHasher;

impl PasswordHasher for Argon2PasswordHasher {
    fn hash(&self, raw: &str) -> AppResult<String> {
        let salt = SaltString::generate(&mut OsRng);
        let password_hash = Argon2::default()
            .hash_password(raw.as_bytes(), &salt)
            .map_err(|e| AppError::Internal(format!("Failed to hash password: {}", e)))?;

        Ok(password_hash.to_string())
    }

    fn verify(&self, raw: &str, digest: &str) -> AppResult<bool> {
        let parsed_hash = PasswordHash::new(digest)
            .map_err(|e| AppError::Internal(format!("Invalid password hash: {}", e)))?;

        Ok(Argon2::default()
            .verify_password(raw.as_bytes(), &parsed_hash)
            .is_ok())
    }
}

/// JWT claims issued after sign-up / sign-in
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub role: Role,
    pub iat: u64,
    pub exp: u64,
}

impl Claims {
    pub fn user_id(&self) -> AppResult<UserId> {
        self.sub
            .parse::<i64>()
            .map(UserId::new)
            .map_err(|_| AppError::Unauthorized("Invalid token subject".to_string()))
    }
}

pub trait TokenIssuer: Send + Sync {
    fn sign(&self, user_id: UserId, role: Role) -> AppResult<String>;

    fn verify(&self, token: &str) -> AppResult<Claims>;
}

pub struct JwtTokenIssuer {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    expiry: Duration,
}

impl JwtTokenIssuer {
    pub fn new(secret: &str, expiry: Duration) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            expiry,
        }
    }
}

impl TokenIssuer for JwtTokenIssuer {
    fn sign(&self, user_id: UserId, role: Role) -> AppResult<String> {
        let now = (current_time_millis() / 1000) as u64;
        let claims = Claims {
            sub: user_id.to_string(),
            role,
            iat: now,
            exp: now + self.expiry.as_secs(),
        };

        encode(&Header::default(), &claims, &self.encoding_key)
            .map_err(|e| AppError::Internal(format!("Failed to create token: {}", e)))
    }

    fn verify(&self, token: &str) -> AppResult<Claims> {
        let validation = Validation::new(Algorithm::HS256);

        let token_data = decode::<Claims>(token, &self.decoding_key, &validation)
            .map_err(|e| AppError::Unauthorized(format!("Invalid token: {}", e)))?;

        Ok(token_data.claims)
    }
}
