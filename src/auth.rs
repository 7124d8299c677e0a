//! Users, roles and bearer-token sessions.
//!
//! Sessions live in process memory and are lost on restart. Handlers opt in
//! to authentication through the [`AuthUser`] and [`AdminUser`] extractors.

use axum::extract::FromRequestParts;
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sqlx::Row;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::instrument;

use crate::db::{DbError, Pool};
use crate::http::{ApiError, AppState};

pub const ROLE_ADMIN: &str = "Admin";
pub const ROLE_CUSTOMER: &str = "Customer";

/// Roles that must exist for the service to work.
pub const ROLES: [&str; 2] = [ROLE_ADMIN, ROLE_CUSTOMER];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub user_id: i64,
    pub user_name: String,
    pub roles: Vec<String>,
    pub expires_at: DateTime<Utc>,
}

impl Session {
    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r == role)
    }
}

pub struct SessionStore {
    sessions: HashMap<String, Session>,
    ttl: Duration,
}

impl SessionStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            sessions: HashMap::new(),
            ttl,
        }
    }

    /// Create a session and return its token (UUID v4). Expired sessions are
    /// dropped first.
    pub fn create(&mut self, user_id: i64, user_name: String, roles: Vec<String>) -> (String, Session) {
        let now = Utc::now();
        self.sessions.retain(|_, s| s.expires_at > now);
        let token = uuid::Uuid::new_v4().to_string();
        let session = Session {
            user_id,
            user_name,
            roles,
            expires_at: now + self.ttl,
        };
        self.sessions.insert(token.clone(), session.clone());
        (token, session)
    }

    /// The session behind `token`, if it exists and has not expired.
    pub fn validate(&self, token: &str) -> Option<Session> {
        self.sessions
            .get(token)
            .filter(|s| s.expires_at > Utc::now())
            .cloned()
    }
}

#[derive(Debug, Clone)]
pub struct User {
    pub id: i64,
    pub user_name: String,
    pub password_hash: String,
}

pub fn hash_password(password: &str, cost: u32) -> Result<String, bcrypt::BcryptError> {
    bcrypt::hash(password, cost)
}

pub fn verify_password(password: &str, hash: &str) -> Result<bool, bcrypt::BcryptError> {
    bcrypt::verify(password, hash)
}

/// Insert `name` into `roles` unless present. Returns true when created.
#[instrument(skip_all)]
pub async fn ensure_role(pool: &Pool, name: &str) -> Result<bool, DbError> {
    let result = sqlx::query("INSERT OR IGNORE INTO roles (name) VALUES (?)")
        .bind(name)
        .execute(pool)
        .await?;
    Ok(result.rows_affected() > 0)
}

#[instrument(skip_all)]
pub async fn role_exists(pool: &Pool, name: &str) -> Result<bool, DbError> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM roles WHERE name = ?")
        .bind(name)
        .fetch_one(pool)
        .await?;
    Ok(count > 0)
}

#[instrument(skip_all)]
pub async fn find_user(pool: &Pool, user_name: &str) -> Result<Option<User>, DbError> {
    let row = sqlx::query("SELECT id, user_name, password_hash FROM users WHERE user_name = ?")
        .bind(user_name)
        .fetch_optional(pool)
        .await?;
    Ok(row.map(|row| User {
        id: row.get("id"),
        user_name: row.get("user_name"),
        password_hash: row.get("password_hash"),
    }))
}

#[instrument(skip_all)]
pub async fn create_user(pool: &Pool, user_name: &str, password_hash: &str) -> Result<i64, DbError> {
    let rec = sqlx::query("INSERT INTO users (user_name, password_hash) VALUES (?, ?) RETURNING id")
        .bind(user_name)
        .bind(password_hash)
        .fetch_one(pool)
        .await?;
    Ok(rec.get::<i64, _>("id"))
}

#[instrument(skip_all)]
pub async fn add_to_role(pool: &Pool, user_id: i64, role: &str) -> Result<(), DbError> {
    sqlx::query(
        "INSERT OR IGNORE INTO user_roles (user_id, role_id) SELECT ?, id FROM roles WHERE name = ?",
    )
    .bind(user_id)
    .bind(role)
    .execute(pool)
    .await?;
    Ok(())
}

#[instrument(skip_all)]
pub async fn roles_for(pool: &Pool, user_id: i64) -> Result<Vec<String>, DbError> {
    let roles = sqlx::query_scalar(
        "SELECT r.name FROM roles r JOIN user_roles ur ON ur.role_id = r.id WHERE ur.user_id = ? ORDER BY r.name",
    )
    .bind(user_id)
    .fetch_all(pool)
    .await?;
    Ok(roles)
}

/// Any authenticated caller.
pub struct AuthUser(pub Session);

/// An authenticated caller holding the admin role.
pub struct AdminUser(pub Session);

fn bearer_token(parts: &Parts) -> Option<&str> {
    parts
        .headers
        .get(AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

fn session_for(state: &AppState, token: &str) -> Result<Session, ApiError> {
    let store = state
        .sessions
        .lock()
        .map_err(|e| ApiError::Internal(format!("session store poisoned: {e}")))?;
    store.validate(token).ok_or(ApiError::Unauthorized)
}

impl FromRequestParts<Arc<AppState>> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &Arc<AppState>) -> Result<Self, Self::Rejection> {
        let token = bearer_token(parts).ok_or(ApiError::Unauthorized)?;
        let session = session_for(state, token)?;
        Ok(Self(session))
    }
}

impl FromRequestParts<Arc<AppState>> for AdminUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &Arc<AppState>) -> Result<Self, Self::Rejection> {
        let AuthUser(session) = AuthUser::from_request_parts(parts, state).await?;
        if !session.has_role(ROLE_ADMIN) {
            return Err(ApiError::Forbidden);
        }
        Ok(Self(session))
    }
}
