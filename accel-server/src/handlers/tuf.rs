use axum::extract::{Multipart, Path, State};
use axum::response::IntoResponse;
use serde::Deserialize;

use accel_core::tuf::RoleName;

use crate::error::{Api, AppError, AppResult};
use crate::state::AppState;

pub async fn status_handler(State(state): State<AppState>) -> AppResult<impl IntoResponse> {
    let role_states: std::collections::BTreeMap<String, String> = state
        .tuf
        .role_states()
        .into_iter()
        .map(|(role, s)| (role, format!("{s:?}")))
        .collect();
    Ok(Api(serde_json::json!({
        "initialized": state.tuf.is_initialized(),
        "expiry_warnings": state.tuf.check_expiry(),
        "role_states": role_states,
    })))
}

pub async fn initialize_handler(State(state): State<AppState>) -> AppResult<impl IntoResponse> {
    state.tuf.initialize().await?;
    Ok(Api(serde_json::json!({ "initialized": true })))
}

pub async fn refresh_handler(State(state): State<AppState>) -> AppResult<impl IntoResponse> {
    state.tuf.refresh_timestamp().await?;
    Ok(Api(serde_json::json!({ "refreshed": true })))
}

pub async fn expiry_handler(State(state): State<AppState>) -> AppResult<impl IntoResponse> {
    Ok(Api(state.tuf.check_expiry()))
}

/// `POST /tuf/targets`, `multipart/form-data` per the admin API contract:
/// a `name` field and a `file` field holding the target bytes.
pub async fn add_target_handler(State(state): State<AppState>, mut multipart: Multipart) -> AppResult<impl IntoResponse> {
    let mut name: Option<String> = None;
    let mut bytes: Option<Vec<u8>> = None;
    let mut custom: Option<serde_json::Value> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::bad_request(e.to_string()))?
    {
        match field.name().unwrap_or_default() {
            "name" => {
                name = Some(field.text().await.map_err(|e| AppError::bad_request(e.to_string()))?);
            }
            "file" => {
                bytes = Some(field.bytes().await.map_err(|e| AppError::bad_request(e.to_string()))?.to_vec());
            }
            "custom" => {
                let text = field.text().await.map_err(|e| AppError::bad_request(e.to_string()))?;
                custom = serde_json::from_str(&text).ok();
            }
            _ => {}
        }
    }

    let name = name.ok_or_else(|| AppError::bad_request("missing 'name' field"))?;
    let bytes = bytes.ok_or_else(|| AppError::bad_request("missing 'file' field"))?;
    state.tuf.add_target(&name, &bytes, custom).await?;
    Ok(Api(serde_json::json!({ "added": name })))
}

pub async fn remove_target_handler(State(state): State<AppState>, Path(name): Path<String>) -> AppResult<impl IntoResponse> {
    state.tuf.remove_target(&name).await?;
    Ok(Api(serde_json::json!({ "removed": name })))
}

#[derive(Debug, Deserialize)]
pub struct VerifyTargetRequest {
    pub name: String,
    #[serde(with = "base64_bytes")]
    pub content: Vec<u8>,
}

pub async fn verify_target_handler(
    State(state): State<AppState>,
    axum::Json(body): axum::Json<VerifyTargetRequest>,
) -> AppResult<impl IntoResponse> {
    let ok = state.tuf.verify_target(&body.name, &body.content);
    Ok(Api(serde_json::json!({ "name": body.name, "verified": ok })))
}

#[derive(Debug, Deserialize)]
pub struct AddDelegationRequest {
    pub name: String,
    pub paths: Vec<String>,
    pub threshold: u32,
}

pub async fn add_delegation_handler(
    State(state): State<AppState>,
    axum::Json(body): axum::Json<AddDelegationRequest>,
) -> AppResult<impl IntoResponse> {
    state.tuf.add_delegation(&body.name, body.paths, body.threshold).await?;
    Ok(Api(serde_json::json!({ "added": body.name })))
}

pub async fn remove_delegation_handler(State(state): State<AppState>, Path(name): Path<String>) -> AppResult<impl IntoResponse> {
    state.tuf.remove_delegation(&name)?;
    Ok(Api(serde_json::json!({ "removed": name })))
}

pub async fn list_delegations_handler(State(state): State<AppState>) -> AppResult<impl IntoResponse> {
    Ok(Api(state.tuf.list_delegations()))
}

pub async fn rotate_key_handler(State(state): State<AppState>, Path(role): Path<String>) -> AppResult<impl IntoResponse> {
    let role = parse_role(&role)?;
    state.tuf.rotate_key(role.clone()).await?;
    Ok(Api(serde_json::json!({ "rotated": role.to_string() })))
}

/// `GET /tuf/keys/export`: public keys for every role, lifted from the
/// signed root payload rather than duplicated state.
pub async fn export_keys_handler(State(state): State<AppState>) -> AppResult<impl IntoResponse> {
    let root = state.tuf.get_root_metadata()?;
    let role_keys = root.get("role_keys").cloned().unwrap_or(serde_json::json!({}));
    Ok(Api(role_keys))
}

pub async fn root_metadata_handler(State(state): State<AppState>) -> AppResult<impl IntoResponse> {
    Ok(Api(state.tuf.get_root_metadata()?))
}

pub async fn targets_metadata_handler(State(state): State<AppState>) -> AppResult<impl IntoResponse> {
    Ok(Api(state.tuf.get_targets_metadata()?))
}

pub async fn snapshot_metadata_handler(State(state): State<AppState>) -> AppResult<impl IntoResponse> {
    Ok(Api(state.tuf.get_snapshot_metadata()?))
}

pub async fn timestamp_metadata_handler(State(state): State<AppState>) -> AppResult<impl IntoResponse> {
    Ok(Api(state.tuf.get_timestamp_metadata()?))
}

fn parse_role(role: &str) -> AppResult<RoleName> {
    match role {
        "root" => Ok(RoleName::Root),
        "targets" => Ok(RoleName::Targets),
        "snapshot" => Ok(RoleName::Snapshot),
        "timestamp" => Ok(RoleName::Timestamp),
        other => Ok(RoleName::Delegation(other.to_string())),
    }
}

mod base64_bytes {
    use base64::Engine;
    use serde::{Deserialize, Deserializer};

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        base64::engine::general_purpose::STANDARD
            .decode(s)
            .map_err(serde::de::Error::custom)
    }
}
