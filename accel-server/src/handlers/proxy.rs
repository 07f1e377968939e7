use axum::body::Body;
use axum::extract::{Path, State};
use axum::response::{IntoResponse, Response};
use tokio_util::io::ReaderStream;
use tracing::debug;

use crate::error::{AppError, AppResult};
use crate::state::AppState;

/// `GET /accel/pull/{name}/blobs/{digest}`.
///
/// Composes the cache with the upstream cascade. When P2P is enabled the
/// blob is tried on peers first (the "parallel pull path"), and whatever
/// arrives that way is fed back into the cache so a second request is
/// served locally.
pub async fn pull_blob_handler(
    State(state): State<AppState>,
    Path((name, digest)): Path<(String, String)>,
) -> AppResult<Response> {
    let parsed = digest.parse().map_err(|_| AppError::bad_request(format!("invalid digest: {digest}")))?;

    if let Some(node) = &state.p2p {
        let p2p_enabled = state.p2p_enabled.load(std::sync::atomic::Ordering::SeqCst);
        if p2p_enabled && !state.cache.exists(&parsed) {
            if let Ok((mut reader, size)) = node.request_blob(&digest).await {
                let mut buf = Vec::with_capacity(size as usize);
                use tokio::io::AsyncReadExt;
                if reader.read_to_end(&mut buf).await.is_ok() {
                    let _ = state.cache.put(&parsed, &mut std::io::Cursor::new(buf.clone())).await;
                    debug!(%digest, "served blob via p2p, cached for subsequent pulls");
                    return Ok(stream_bytes(buf));
                }
            }
        }
    }

    let (file, size) = state.proxy.pull_blob(&name, &digest).await?;
    let stream = ReaderStream::new(file);
    let mut resp = Response::new(Body::from_stream(stream));
    resp.headers_mut()
        .insert(axum::http::header::CONTENT_LENGTH, size.to_string().parse().unwrap());
    Ok(resp)
}

/// `GET /accel/pull/{name}/manifests/{reference}`. Manifests are mutable
/// by tag, so this never touches the cache.
pub async fn pull_manifest_handler(
    State(state): State<AppState>,
    Path((name, reference)): Path<(String, String)>,
) -> AppResult<impl IntoResponse> {
    let resp = state.proxy.pull_manifest(&name, &reference).await?;
    Ok((
        [(axum::http::header::CONTENT_TYPE, resp.content_type)],
        resp.bytes,
    ))
}

fn stream_bytes(buf: Vec<u8>) -> Response {
    let size = buf.len();
    let mut resp = Response::new(Body::from(buf));
    resp.headers_mut()
        .insert(axum::http::header::CONTENT_LENGTH, size.to_string().parse().unwrap());
    resp
}
