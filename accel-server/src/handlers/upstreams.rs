use axum::extract::{Path, State};
use axum::response::IntoResponse;
use serde::Deserialize;

use accel_core::upstream::UpstreamSource;

use crate::error::{Api, AppResult};
use crate::state::AppState;

pub async fn list_handler(State(state): State<AppState>) -> AppResult<impl IntoResponse> {
    Ok(Api(state.upstreams.list().await))
}

#[derive(Debug, Deserialize)]
pub struct AddUpstreamRequest {
    pub name: String,
    pub url: String,
    pub priority: i32,
}

pub async fn add_handler(
    State(state): State<AppState>,
    axum::Json(body): axum::Json<AddUpstreamRequest>,
) -> AppResult<impl IntoResponse> {
    let source = UpstreamSource::new(body.name, body.url, body.priority);
    state.upstreams.add(source).await?;
    Ok(Api(serde_json::json!({ "added": true })))
}

#[derive(Debug, Deserialize)]
pub struct UpdateUpstreamRequest {
    pub url: String,
    pub priority: i32,
}

pub async fn update_handler(
    State(state): State<AppState>,
    Path(name): Path<String>,
    axum::Json(body): axum::Json<UpdateUpstreamRequest>,
) -> AppResult<impl IntoResponse> {
    state.upstreams.update(&name, body.url, body.priority).await?;
    Ok(Api(serde_json::json!({ "updated": true })))
}

pub async fn remove_handler(State(state): State<AppState>, Path(name): Path<String>) -> AppResult<impl IntoResponse> {
    state.upstreams.remove(&name).await?;
    Ok(Api(serde_json::json!({ "removed": true })))
}

pub async fn enable_handler(State(state): State<AppState>, Path(name): Path<String>) -> AppResult<impl IntoResponse> {
    state.upstreams.set_enabled(&name, true).await?;
    Ok(Api(serde_json::json!({ "enabled": true })))
}

pub async fn disable_handler(State(state): State<AppState>, Path(name): Path<String>) -> AppResult<impl IntoResponse> {
    state.upstreams.set_enabled(&name, false).await?;
    Ok(Api(serde_json::json!({ "enabled": false })))
}

pub async fn health_handler(State(state): State<AppState>, Path(name): Path<String>) -> AppResult<impl IntoResponse> {
    let reachable = state.upstreams.check_health(&name).await?;
    Ok(Api(serde_json::json!({ "name": name, "reachable": reachable })))
}
