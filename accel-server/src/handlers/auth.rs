use std::net::SocketAddr;

use axum::extract::{ConnectInfo, State};
use axum::response::IntoResponse;
use axum::Extension;
use serde::Deserialize;

use crate::error::{Api, AppError, AppResult};
use crate::middleware::auth::Identity;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

pub async fn login_handler(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    axum::Json(body): axum::Json<LoginRequest>,
) -> AppResult<impl IntoResponse> {
    let outcome = state.auth.login(&body.username, &body.password, addr.ip()).await?;
    state.audit
        .append("auth.login", Some(outcome.user.username.clone()), serde_json::json!({ "ip": addr.ip().to_string() }))
        .await
        .map_err(|e| AppError::internal(e.to_string()))?;
    Ok(Api(serde_json::json!({
        "user": {
            "id": outcome.user.id,
            "username": outcome.user.username,
            "role": outcome.user.role,
        },
        "token": outcome.token,
        "session": outcome.session,
        "must_change_password": outcome.must_change_password,
        "lock_warning": outcome.lock_warning,
    })))
}

pub async fn logout_handler(Extension(identity): Extension<Identity>) -> AppResult<impl IntoResponse> {
    Ok(Api(serde_json::json!({ "logged_out": identity.username })))
}

#[derive(Debug, Deserialize)]
pub struct VerifyTokenRequest {
    pub token: String,
}

pub async fn verify_token_handler(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    axum::Json(body): axum::Json<VerifyTokenRequest>,
) -> AppResult<impl IntoResponse> {
    if body.token.starts_with("pat_") {
        let pat = state.auth.validate_token(&body.token, addr.ip()).await?;
        Ok(Api(serde_json::json!({ "valid": true, "user_id": pat.user_id })))
    } else {
        let claims = state.auth.validate_jwt(&body.token, addr.ip())?;
        Ok(Api(serde_json::json!({ "valid": true, "claims": claims })))
    }
}

pub async fn heartbeat_handler(Extension(identity): Extension<Identity>) -> AppResult<impl IntoResponse> {
    Ok(Api(serde_json::json!({ "alive": true, "user_id": identity.user_id })))
}

pub async fn me_handler(Extension(identity): Extension<Identity>) -> AppResult<impl IntoResponse> {
    Ok(Api(serde_json::json!({
        "user_id": identity.user_id,
        "username": identity.username,
        "role": identity.role,
    })))
}
