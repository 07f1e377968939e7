use axum::body::Body;
use axum::extract::{Path, State};
use axum::response::{IntoResponse, Response};
use tokio_util::io::ReaderStream;

use crate::error::{Api, AppError, AppResult};
use crate::state::AppState;

pub async fn stats_handler(State(state): State<AppState>) -> AppResult<impl IntoResponse> {
    Ok(Api(state.cache.stats()))
}

pub async fn entries_handler(State(state): State<AppState>) -> AppResult<impl IntoResponse> {
    Ok(Api(state.cache.list_entries()))
}

pub async fn get_blob_handler(State(state): State<AppState>, Path(digest): Path<String>) -> AppResult<Response> {
    let digest = digest
        .parse()
        .map_err(|_| AppError::bad_request(format!("invalid digest: {digest}")))?;
    match state.cache.get(&digest).await? {
        Some((file, size)) => {
            let stream = ReaderStream::new(file);
            let mut resp = Response::new(Body::from_stream(stream));
            resp.headers_mut().insert(
                axum::http::header::CONTENT_LENGTH,
                size.to_string().parse().unwrap(),
            );
            Ok(resp)
        }
        None => Err(AppError::not_found("blob not in cache")),
    }
}

pub async fn delete_blob_handler(State(state): State<AppState>, Path(digest): Path<String>) -> AppResult<impl IntoResponse> {
    let digest = digest
        .parse()
        .map_err(|_| AppError::bad_request(format!("invalid digest: {digest}")))?;
    state.cache.delete(&digest).await?;
    Ok(Api(serde_json::json!({ "deleted": digest.as_str() })))
}

pub async fn clear_handler(State(state): State<AppState>) -> AppResult<impl IntoResponse> {
    state.cache.clear().await?;
    Ok(Api(serde_json::json!({ "cleared": true })))
}
