use std::net::SocketAddr;

use axum::extract::{ConnectInfo, State};
use axum::response::IntoResponse;
use serde::Deserialize;

use accel_core::ws::WsEvent;

use crate::error::{Api, AppResult};
use crate::state::AppState;

pub async fn status_handler(State(state): State<AppState>) -> AppResult<impl IntoResponse> {
    Ok(Api(state.lock.state()))
}

#[derive(Debug, Deserialize)]
pub struct LockRequest {
    pub reason: String,
}

/// Manual administrative lock, distinct from the automatic
/// `IntrusionDetector` escalation path.
pub async fn lock_handler(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    axum::Json(body): axum::Json<LockRequest>,
) -> AppResult<impl IntoResponse> {
    state.lock.lock_system(&body.reason, addr.ip());
    state.ws.broadcast(WsEvent::LockStateChanged {
        locked: true,
        reason: Some(body.reason.clone()),
        at: chrono::Utc::now(),
    });
    Ok(Api(serde_json::json!({ "locked": true })))
}

#[derive(Debug, Deserialize)]
pub struct UnlockRequest {
    pub admin_password: String,
}

pub async fn unlock_handler(
    State(state): State<AppState>,
    axum::Json(body): axum::Json<UnlockRequest>,
) -> AppResult<impl IntoResponse> {
    state.lock.unlock_system(&body.admin_password)?;
    state.ws.broadcast(WsEvent::LockStateChanged {
        locked: false,
        reason: None,
        at: chrono::Utc::now(),
    });
    Ok(Api(serde_json::json!({ "unlocked": true })))
}
