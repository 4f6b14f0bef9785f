use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};
use rand::RngCore as _;
use serde::{Deserialize, Serialize};
use sha2::{Digest as _, Sha256};
use thiserror::Error;
use tracing::{info, warn};

use crate::error::TrackError;
use crate::model::{Session, User};
use crate::store::Store;

const ACCESS_TOKEN_TTL_MINUTES: i64 = 30;
const REFRESH_TOKEN_TTL_DAYS: i64 = 7;
const INSECURE_DEV_SECRET: &str = "dev-insecure-secret-key-do-not-use-in-prod";

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("invalid credentials")]
    InvalidCredentials,
    #[error("invalid or expired token")]
    InvalidToken,
    #[error("user account is not active")]
    Inactive,
    #[error("{0}")]
    Conflict(String),
    #[error(transparent)]
    Store(#[from] TrackError),
}

#[derive(Debug, Clone, Serialize)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: &'static str,
    pub expires_in: i64,
}

#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    sub: String,
    #[serde(rename = "type")]
    token_type: String,
    exp: i64,
}

/// Issues HS256 token pairs and checks them against session rows.
///
/// Every issued access token also lives as a hashed session row; a token
/// whose row is gone (logout, cleanup) is dead even before its `exp`.
#[derive(Clone)]
pub struct AuthService {
    store: Store,
    secret: String,
}

impl AuthService {
    pub fn new(store: Store, jwt_secret: Option<String>) -> Self {
        let secret = match jwt_secret.filter(|s| !s.is_empty()) {
            Some(secret) => secret,
            None => {
                warn!("no JWT_SECRET set, using insecure default key for development only");
                INSECURE_DEV_SECRET.to_string()
            }
        };
        Self { store, secret }
    }

    pub fn from_env(store: Store) -> Self {
        Self::new(store, std::env::var("JWT_SECRET").ok())
    }

    pub async fn register(
        &self,
        username: &str,
        email: &str,
        password: &str,
    ) -> Result<User, AuthError> {
        if self.store.get_user_by_username(username).await?.is_some() {
            return Err(AuthError::Conflict("username already exists".into()));
        }
        let user = User {
            id: None,
            username: username.to_string(),
            email: email.to_string(),
            password_hash: hash_password(password),
            status: "active".to_string(),
            created_at: Utc::now(),
            last_login_at: None,
        };
        let id = self.store.create_user(&user).await?;
        Ok(User { id: Some(id), ..user })
    }

    pub async fn login(
        &self,
        username: &str,
        password: &str,
        user_agent: Option<String>,
    ) -> Result<(User, TokenPair), AuthError> {
        let user = self
            .store
            .get_user_by_username(username)
            .await?
            .ok_or(AuthError::InvalidCredentials)?;
        if !verify_password(password, &user.password_hash) {
            return Err(AuthError::InvalidCredentials);
        }
        if user.status != "active" {
            return Err(AuthError::Inactive);
        }

        let user_id = user.id.ok_or(AuthError::InvalidCredentials)?;
        let pair = self.issue_pair(&user.username)?;
        self.persist_session(user_id, &pair, user_agent).await?;
        self.store.touch_user_login(user_id).await?;
        Ok((user, pair))
    }

    pub async fn logout(&self, token: &str) -> Result<(), AuthError> {
        self.store.delete_session(&hash_token(token)).await?;
        Ok(())
    }

    pub async fn change_password(
        &self,
        user: &User,
        old_password: &str,
        new_password: &str,
    ) -> Result<(), AuthError> {
        if !verify_password(old_password, &user.password_hash) {
            return Err(AuthError::Conflict("invalid old password".into()));
        }
        let user_id = user.id.ok_or(AuthError::InvalidToken)?;
        self.store
            .update_user_password(user_id, &hash_password(new_password))
            .await?;
        Ok(())
    }

    /// Exchanges a refresh token for a fresh pair, with its own session
    /// row so the new access token authenticates.
    pub async fn refresh(&self, refresh_token: &str) -> Result<TokenPair, AuthError> {
        let claims = self.decode_claims(refresh_token)?;
        if claims.token_type != "refresh" {
            return Err(AuthError::InvalidToken);
        }
        let user = self
            .store
            .get_user_by_username(&claims.sub)
            .await?
            .ok_or(AuthError::InvalidToken)?;
        let user_id = user.id.ok_or(AuthError::InvalidToken)?;
        let pair = self.issue_pair(&user.username)?;
        self.persist_session(user_id, &pair, None).await?;
        Ok(pair)
    }

    /// Bearer-token check run on every authenticated request: the token
    /// must decode *and* its session row must still exist and be fresh.
    pub async fn current_user(&self, token: &str) -> Result<User, AuthError> {
        let claims = self.decode_claims(token)?;
        if claims.token_type != "access" {
            return Err(AuthError::InvalidToken);
        }

        let token_hash = hash_token(token);
        let session = self
            .store
            .get_session(&token_hash)
            .await?
            .ok_or(AuthError::InvalidToken)?;
        if session.expires_at < Utc::now() {
            self.store.delete_session(&token_hash).await?;
            return Err(AuthError::InvalidToken);
        }

        self.store
            .get_user_by_id(session.user_id)
            .await?
            .ok_or(AuthError::InvalidToken)
    }

    /// Creates the built-in admin account on first start.
    pub async fn ensure_admin_user(&self) -> Result<(), AuthError> {
        if self.store.get_user_by_username("admin").await?.is_none() {
            info!("creating default admin user");
            self.register("admin", "admin@example.com", "admin").await?;
        }
        Ok(())
    }

    fn issue_pair(&self, username: &str) -> Result<TokenPair, AuthError> {
        let access = self.encode_claims(username, "access", Duration::minutes(ACCESS_TOKEN_TTL_MINUTES))?;
        let refresh = self.encode_claims(username, "refresh", Duration::days(REFRESH_TOKEN_TTL_DAYS))?;
        Ok(TokenPair {
            access_token: access,
            refresh_token: refresh,
            token_type: "bearer",
            expires_in: ACCESS_TOKEN_TTL_MINUTES * 60,
        })
    }

    async fn persist_session(
        &self,
        user_id: i64,
        pair: &TokenPair,
        user_agent: Option<String>,
    ) -> Result<(), AuthError> {
        let session = Session {
            id: None,
            user_id,
            token_hash: hash_token(&pair.access_token),
            refresh_token_hash: Some(hash_token(&pair.refresh_token)),
            user_agent,
            ip_address: None,
            expires_at: Utc::now() + Duration::minutes(ACCESS_TOKEN_TTL_MINUTES),
            created_at: Utc::now(),
        };
        self.store.create_session(&session).await?;
        Ok(())
    }

    fn encode_claims(
        &self,
        username: &str,
        token_type: &str,
        ttl: Duration,
    ) -> Result<String, AuthError> {
        let exp: DateTime<Utc> = Utc::now() + ttl;
        let claims = Claims {
            sub: username.to_string(),
            token_type: token_type.to_string(),
            exp: exp.timestamp(),
        };
        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(self.secret.as_bytes()),
        )
        .map_err(|_| AuthError::InvalidToken)
    }

    fn decode_claims(&self, token: &str) -> Result<Claims, AuthError> {
        decode::<Claims>(
            token,
            &DecodingKey::from_secret(self.secret.as_bytes()),
            &Validation::default(),
        )
        .map(|data| data.claims)
        .map_err(|_| AuthError::InvalidToken)
    }
}

pub fn hash_token(token: &str) -> String {
    hex_digest(token.as_bytes())
}

/// Salted SHA-256, stored as `sha256$<salt>$<digest>`.
pub fn hash_password(password: &str) -> String {
    let mut salt = [0u8; 16];
    rand::rng().fill_bytes(&mut salt);
    let salt_hex = hex_encode(&salt);
    let digest = salted_digest(&salt_hex, password);
    format!("sha256${salt_hex}${digest}")
}

pub fn verify_password(password: &str, stored: &str) -> bool {
    let mut parts = stored.split('$');
    match (parts.next(), parts.next(), parts.next()) {
        (Some("sha256"), Some(salt), Some(digest)) => salted_digest(salt, password) == digest,
        _ => false,
    }
}

fn salted_digest(salt: &str, password: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    hasher.update(password.as_bytes());
    hex_encode(&hasher.finalize())
}

fn hex_digest(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex_encode(&hasher.finalize())
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}
