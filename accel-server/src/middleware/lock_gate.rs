//! System-lockdown gate: front-ends every protected operation with
//! `LockService::is_system_locked`, per the design's request flow
//! (`H (identify) -> G (gate) -> ...`). `/lock/status` and `/lock/unlock`
//! are mounted outside this gate so a locked system can still be unlocked.

use axum::extract::{Request, State};
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};

use crate::state::AppState;

pub async fn lock_gate_middleware(State(state): State<AppState>, request: Request, next: Next) -> Response {
    if state.lock.is_system_locked() {
        return (
            StatusCode::LOCKED,
            axum::Json(serde_json::json!({
                "code": 423,
                "message": "system is locked",
            })),
        )
            .into_response();
    }
    next.run(request).await
}
