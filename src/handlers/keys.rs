use axum::extract::State;
use axum::http::HeaderMap;
use axum::Json;
use serde::Deserialize;
use serde_json::json;

use crate::auth;
use crate::middleware::response::{ApiResult, TapisResponse};
use crate::services::{rotation, AppState};

#[derive(Debug, Deserialize)]
pub struct NewSigningKeysRequest {
    pub tenant_id: String,
}

/// PUT /v3/tokens/keys - rotate a tenant's signing key pair.
pub async fn keys_put(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<NewSigningKeysRequest>,
) -> ApiResult {
    tracing::debug!("top of PUT /v3/tokens/keys for tenant {}", payload.tenant_id);
    auth::check_rotation(&state, &headers, &payload.tenant_id).await?;

    let public_key = rotation::rotate_signing_keys(&state, &payload.tenant_id).await?;

    Ok(TapisResponse::success(
        json!({ "public_key": public_key }),
        format!(
            "Signing keys for tenant {} have been updated.",
            payload.tenant_id
        ),
    ))
}
