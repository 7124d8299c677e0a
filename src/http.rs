//! HTTP plumbing: shared state, error mapping and the axum server.
//!
//! Every response body, success or failure, is an [`ApiResponse`] envelope.

use axum::extract::rejection::{JsonRejection, PathRejection, QueryRejection};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::{Json, Router};
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::auth::SessionStore;
use crate::config;
use crate::db::{DbError, Pool};
use crate::handlers;
use crate::model::ApiResponse;

/// Shared application state
pub struct AppState {
    pub pool: Pool,
    pub sessions: Mutex<SessionStore>,
    pub bcrypt_cost: u32,
}

impl AppState {
    pub fn new(pool: Pool, auth: &config::Auth) -> Self {
        let ttl = chrono::Duration::minutes(auth.session_ttl_minutes as i64);
        Self {
            pool,
            sessions: Mutex::new(SessionStore::new(ttl)),
            bcrypt_cost: auth.bcrypt_cost,
        }
    }
}

/// Handler error with its HTTP status mapping.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Payload rejected before reaching storage (400)
    #[error("validation failed: {0:?}")]
    Validation(Vec<String>),

    /// Duplicate of an existing record (400)
    #[error("conflict: {0}")]
    Conflict(String),

    #[error("not found")]
    NotFound,

    #[error("authentication required")]
    Unauthorized,

    #[error("forbidden")]
    Forbidden,

    /// Storage failure (500, logged)
    #[error(transparent)]
    Database(#[from] DbError),

    #[error("internal error: {0}")]
    Internal(String),
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::Validation(vec![message.into()])
    }

    /// Map a unique constraint failure to `Conflict(message)`; any other
    /// storage error stays a database error.
    pub fn conflict_on_unique(message: &str) -> impl FnOnce(DbError) -> ApiError + '_ {
        move |err| {
            if err.is_unique_violation() {
                ApiError::Conflict(message.to_string())
            } else {
                ApiError::Database(err)
            }
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::Validation(_) | Self::Conflict(_) => StatusCode::BAD_REQUEST,
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::Forbidden => StatusCode::FORBIDDEN,
            Self::Database(_) | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let messages = match self {
            Self::Validation(messages) => messages,
            Self::Conflict(message) => vec![message],
            Self::NotFound => Vec::new(),
            Self::Unauthorized => vec!["Authentication required".to_string()],
            Self::Forbidden => vec!["Access denied".to_string()],
            Self::Database(err) => {
                error!(?err, "database error");
                vec!["An internal error occurred".to_string()]
            }
            Self::Internal(message) => {
                error!(%message, "internal error");
                vec!["An internal error occurred".to_string()]
            }
        };
        ApiResponse::<serde_json::Value>::failure(status.as_u16(), messages).into_response()
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::bad_request(rejection.body_text())
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        Self::bad_request(rejection.body_text())
    }
}

impl From<PathRejection> for ApiError {
    fn from(rejection: PathRejection) -> Self {
        Self::bad_request(rejection.body_text())
    }
}

impl From<bcrypt::BcryptError> for ApiError {
    fn from(err: bcrypt::BcryptError) -> Self {
        Self::Internal(err.to_string())
    }
}

impl<T: Serialize> IntoResponse for ApiResponse<T> {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.status_code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, Json(self)).into_response()
    }
}

/// Build the application router with all routes
pub fn build_router(state: Arc<AppState>) -> Router {
    handlers::router()
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve until Ctrl+C or SIGTERM.
pub async fn serve(bind_addr: SocketAddr, state: Arc<AppState>) -> std::io::Result<()> {
    let app = build_router(state);
    let listener = TcpListener::bind(bind_addr).await?;
    info!(%bind_addr, "server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("server shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!(?err, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                error!(?err, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received Ctrl+C, starting shutdown"),
        _ = terminate => info!("received SIGTERM, starting shutdown"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;

    async fn envelope(err: ApiError) -> (StatusCode, ApiResponse) {
        let response = err.into_response();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn validation_error_is_400_with_messages() {
        let (status, body) = envelope(ApiError::Validation(vec!["a".into(), "b".into()])).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body.status_code, 400);
        assert!(!body.is_success);
        assert_eq!(body.error_messages, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn conflict_is_400() {
        let (status, body) = envelope(ApiError::Conflict("Coupon already exists".into())).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body.error_messages, vec!["Coupon already exists"]);
    }

    #[tokio::test]
    async fn not_found_has_no_payload() {
        let (status, body) = envelope(ApiError::NotFound).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(body.result.is_none());
        assert!(body.error_messages.is_empty());
    }

    #[tokio::test]
    async fn auth_errors_map_to_401_and_403() {
        assert_eq!(envelope(ApiError::Unauthorized).await.0, StatusCode::UNAUTHORIZED);
        assert_eq!(envelope(ApiError::Forbidden).await.0, StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn database_error_hides_details() {
        let err = ApiError::Database(DbError::MissingParameter { name: "id".into() });
        let (status, body) = envelope(err).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body.error_messages, vec!["An internal error occurred"]);
    }
}
