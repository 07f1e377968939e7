//! API error envelope.
//!
//! `{"code": 0, "data": ...}` on success, `{"code": N, "message": "..."}`
//! on failure, where `N` maps to an HTTP status carried alongside it.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use serde_json::json;

pub type AppResult<T> = Result<T, AppError>;

#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub message: String,
}

impl AppError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, message)
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, message)
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(StatusCode::FORBIDDEN, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(StatusCode::CONFLICT, message)
    }

    pub fn locked(message: impl Into<String>) -> Self {
        Self::new(StatusCode::LOCKED, message)
    }

    pub fn too_many_requests(message: impl Into<String>) -> Self {
        Self::new(StatusCode::TOO_MANY_REQUESTS, message)
    }

    pub fn payload_too_large(message: impl Into<String>) -> Self {
        Self::new(StatusCode::PAYLOAD_TOO_LARGE, message)
    }
}

impl std::fmt::Display for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for AppError {}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "code": self.status.as_u16(),
            "message": self.message,
        }));
        (self.status, body).into_response()
    }
}

impl From<accel_core::cache::CacheError> for AppError {
    fn from(err: accel_core::cache::CacheError) -> Self {
        use accel_core::cache::CacheError;
        match err {
            CacheError::DigestMismatch { .. } => Self::bad_request(err.to_string()),
            CacheError::TooLarge { .. } => Self::payload_too_large(err.to_string()),
            CacheError::Io(_) => Self::internal(err.to_string()),
        }
    }
}

impl From<accel_core::upstream::UpstreamError> for AppError {
    fn from(err: accel_core::upstream::UpstreamError) -> Self {
        use accel_core::upstream::UpstreamError;
        match err {
            UpstreamError::DuplicateName(_) => Self::conflict(err.to_string()),
            UpstreamError::NotFound(_) => Self::not_found(err.to_string()),
            UpstreamError::Io(_) | UpstreamError::Serde(_) => Self::internal(err.to_string()),
        }
    }
}

impl From<accel_core::proxy::ProxyError> for AppError {
    fn from(err: accel_core::proxy::ProxyError) -> Self {
        use accel_core::proxy::ProxyError;
        match err {
            ProxyError::InvalidDigest(_) => Self::bad_request(err.to_string()),
            ProxyError::NoEnabledUpstreams | ProxyError::AllUpstreamsFailed(_) => {
                Self::new(StatusCode::BAD_GATEWAY, err.to_string())
            }
            ProxyError::Cache(e) => e.into(),
        }
    }
}

impl From<accel_core::p2p::P2pError> for AppError {
    fn from(err: accel_core::p2p::P2pError) -> Self {
        use accel_core::p2p::P2pError;
        match err {
            P2pError::NotAvailable(_) => Self::not_found(err.to_string()),
            P2pError::InvalidDigest(_) => Self::bad_request(err.to_string()),
            P2pError::Io(_) | P2pError::Protocol(_) => Self::new(StatusCode::BAD_GATEWAY, err.to_string()),
        }
    }
}

impl From<accel_core::tuf::TufError> for AppError {
    fn from(err: accel_core::tuf::TufError) -> Self {
        use accel_core::tuf::TufError;
        match err {
            TufError::AlreadyInitialized => Self::conflict(err.to_string()),
            TufError::NotInitialized => Self::new(StatusCode::PRECONDITION_FAILED, err.to_string()),
            TufError::RoleExpired(_) => Self::new(StatusCode::GONE, err.to_string()),
            TufError::TargetNotFound(_) | TufError::DelegationNotFound(_) => Self::not_found(err.to_string()),
            TufError::DelegationPathsNotSubset => Self::bad_request(err.to_string()),
            TufError::Io(_) | TufError::Serde(_) => Self::internal(err.to_string()),
        }
    }
}

impl From<accel_core::security::LockError> for AppError {
    fn from(err: accel_core::security::LockError) -> Self {
        Self::new(StatusCode::LOCKED, err.to_string())
    }
}

impl From<accel_core::auth::AuthError> for AppError {
    fn from(err: accel_core::auth::AuthError) -> Self {
        use accel_core::auth::AuthError;
        match err {
            AuthError::SystemLocked => Self::locked(err.to_string()),
            AuthError::InvalidCredentials | AuthError::InvalidToken => Self::unauthorized(err.to_string()),
            AuthError::InactiveUser => Self::forbidden(err.to_string()),
            AuthError::Jwt(_) => Self::unauthorized(err.to_string()),
        }
    }
}

impl From<accel_core::automation::AutomationError> for AppError {
    fn from(err: accel_core::automation::AutomationError) -> Self {
        use accel_core::automation::AutomationError;
        match err {
            AutomationError::InvalidSchedule(_) => Self::bad_request(err.to_string()),
            AutomationError::NotFound(_) => Self::not_found(err.to_string()),
            AutomationError::NoHandler => Self::new(StatusCode::NOT_IMPLEMENTED, err.to_string()),
        }
    }
}

/// Wraps a success payload in the `{"code": 0, "data": ...}` envelope.
pub struct Api<T>(pub T);

impl<T: Serialize> IntoResponse for Api<T> {
    fn into_response(self) -> Response {
        Json(json!({ "code": 0, "data": self.0 })).into_response()
    }
}
