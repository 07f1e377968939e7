use axum::body::Body;
use axum::extract::{Path, State};
use axum::response::{IntoResponse, Response};
use serde::Deserialize;

use accel_core::ws::WsEvent;

use crate::error::{Api, AppError, AppResult};
use crate::state::AppState;

fn node(state: &AppState) -> AppResult<&std::sync::Arc<accel_core::p2p::P2pNode>> {
    state.p2p.as_ref().ok_or_else(|| AppError::new(axum::http::StatusCode::NOT_IMPLEMENTED, "p2p is disabled"))
}

pub async fn status_handler(State(state): State<AppState>) -> AppResult<impl IntoResponse> {
    let n = node(&state)?;
    Ok(Api(serde_json::json!({
        "node_id": n.node_id(),
        "stats": n.stats(),
    })))
}

pub async fn peers_handler(State(state): State<AppState>) -> AppResult<impl IntoResponse> {
    let n = node(&state)?;
    Ok(Api(n.peers()))
}

#[derive(Debug, Deserialize)]
pub struct ConnectPeerRequest {
    pub addr: String,
}

pub async fn connect_peer_handler(
    State(state): State<AppState>,
    axum::Json(body): axum::Json<ConnectPeerRequest>,
) -> AppResult<impl IntoResponse> {
    let n = node(&state)?;
    let addr: std::net::SocketAddr = body
        .addr
        .parse()
        .map_err(|_| AppError::bad_request(format!("invalid address: {}", body.addr)))?;
    let peer_id = n.connect_peer(addr).await?;
    state.ws.broadcast(WsEvent::PeerJoined {
        peer_id: peer_id.clone(),
        at: chrono::Utc::now(),
    });
    Ok(Api(serde_json::json!({ "peer_id": peer_id })))
}

pub async fn disconnect_peer_handler(State(state): State<AppState>, Path(peer_id): Path<String>) -> AppResult<impl IntoResponse> {
    let n = node(&state)?;
    n.disconnect_peer(&peer_id);
    state.ws.broadcast(WsEvent::PeerLeft {
        peer_id: peer_id.clone(),
        at: chrono::Utc::now(),
    });
    Ok(Api(serde_json::json!({ "disconnected": peer_id })))
}

/// `GET /p2p/blobs/{digest}`: fetches a blob from a connected peer and
/// streams it back to the caller.
pub async fn fetch_blob_handler(State(state): State<AppState>, Path(digest): Path<String>) -> AppResult<Response> {
    let n = node(&state)?;
    let (reader, size) = n.request_blob(&digest).await?;
    let stream = tokio_util::io::ReaderStream::new(reader);
    let mut resp = Response::new(Body::from_stream(stream));
    resp.headers_mut()
        .insert(axum::http::header::CONTENT_LENGTH, size.to_string().parse().unwrap());
    Ok(resp)
}

/// `GET /p2p/blobs`: lists blobs this node can serve (from its local
/// content-addressed store).
pub async fn list_blobs_handler(State(state): State<AppState>) -> AppResult<impl IntoResponse> {
    Ok(Api(
        state
            .cache
            .list_entries()
            .into_iter()
            .map(|e| e.digest.as_str().to_string())
            .collect::<Vec<_>>(),
    ))
}

pub async fn enable_handler(State(state): State<AppState>) -> AppResult<impl IntoResponse> {
    node(&state)?;
    state.p2p_enabled.store(true, std::sync::atomic::Ordering::SeqCst);
    Ok(Api(serde_json::json!({ "enabled": true })))
}

pub async fn disable_handler(State(state): State<AppState>) -> AppResult<impl IntoResponse> {
    node(&state)?;
    state.p2p_enabled.store(false, std::sync::atomic::Ordering::SeqCst);
    Ok(Api(serde_json::json!({ "enabled": false })))
}

/// `POST /p2p/blobs/{digest}/announce`: broadcasts over the WS hub that
/// this node holds `digest`, for other instances' UIs to pick up. The
/// blob/meta wire protocol itself is pull-based (peers ask `Have`), so
/// announcing is purely a local notification, not a P2P message.
pub async fn announce_blob_handler(State(state): State<AppState>, Path(digest): Path<String>) -> AppResult<impl IntoResponse> {
    let n = node(&state)?;
    let parsed: accel_core::blob::Digest = digest
        .parse()
        .map_err(|_| AppError::bad_request(format!("invalid digest: {digest}")))?;
    if !state.cache.exists(&parsed) {
        return Err(AppError::not_found("blob not held locally"));
    }
    let subscribers = state.ws.broadcast(WsEvent::BlobAnnounced {
        digest: digest.clone(),
        node_id: n.node_id(),
        at: chrono::Utc::now(),
    });
    Ok(Api(serde_json::json!({ "announced": digest, "subscribers": subscribers })))
}
