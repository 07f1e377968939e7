//! Bearer-token extraction: validates a session JWT or a `pat_`-prefixed
//! personal access token and injects the resulting identity into request
//! extensions via `request.extensions_mut().insert(identity)`.

use std::net::SocketAddr;

use axum::extract::{ConnectInfo, Request, State};
use axum::http::{header, StatusCode};
use axum::middleware::Next;
use axum::response::Response;

use crate::state::AppState;

/// The authenticated caller, set by [`auth_middleware`] for handlers that
/// need to know who's asking (audit actor, admin session registration).
#[derive(Debug, Clone)]
pub struct Identity {
    pub user_id: uuid::Uuid,
    pub username: String,
    pub role: String,
}

pub fn client_ip(request: &Request) -> std::net::IpAddr {
    request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ci| ci.0.ip())
        .unwrap_or(std::net::IpAddr::V4(std::net::Ipv4Addr::UNSPECIFIED))
}

/// Requires a valid bearer token (JWT or PAT); rejects with 401 otherwise.
/// Applied only to routes under the protected sub-router.
pub async fn auth_middleware(State(state): State<AppState>, mut request: Request, next: Next) -> Response {
    let ip = client_ip(&request);
    let token = match extract_bearer(&request) {
        Some(t) => t,
        None => return unauthorized("missing bearer token"),
    };

    if token.starts_with("pat_") {
        match state.auth.validate_token(&token, ip).await {
            Ok(pat) => {
                request.extensions_mut().insert(Identity {
                    user_id: pat.user_id,
                    username: String::new(),
                    role: "token".to_string(),
                });
            }
            Err(_) => return unauthorized("invalid token"),
        }
    } else {
        match state.auth.validate_jwt(&token, ip) {
            Ok(claims) => {
                request.extensions_mut().insert(Identity {
                    user_id: claims.user_id,
                    username: claims.username,
                    role: claims.role,
                });
            }
            Err(_) => return unauthorized("invalid or expired session"),
        }
    }

    next.run(request).await
}

fn extract_bearer(request: &Request) -> Option<String> {
    request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(|s| s.to_string())
}

fn unauthorized(message: &str) -> Response {
    use axum::response::IntoResponse;
    (
        StatusCode::UNAUTHORIZED,
        axum::Json(serde_json::json!({ "code": 401, "message": message })),
    )
        .into_response()
}
