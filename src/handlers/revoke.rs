use axum::extract::State;
use axum::http::HeaderMap;
use axum::Json;
use serde::Deserialize;
use serde_json::Value;

use crate::auth;
use crate::error::ApiError;
use crate::middleware::response::{ApiResult, TapisResponse};
use crate::services::AppState;

#[derive(Debug, Deserialize)]
pub struct RevokeTokenRequest {
    pub token: String,
}

/// POST /v3/tokens/revoke - delegate revocation of a token's jti to the
/// site-local revocation registry.
pub async fn revoke_post(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<RevokeTokenRequest>,
) -> ApiResult {
    tracing::debug!("top of POST /v3/tokens/revoke");
    auth::check_revoke(&state, &headers)?;

    let claims = auth::validate_token(&state.cache, &payload.token).map_err(|_| {
        ApiError::invalid_request("Could not validate the token; it may be malformed or expired.")
    })?;
    let jti = claims
        .get("jti")
        .and_then(Value::as_str)
        .ok_or_else(|| ApiError::invalid_request("The token carries no jti claim."))?
        .to_string();

    state.site_router.revoke_token(&payload.token).await?;
    tracing::info!("revoked token {}", jti);

    Ok(TapisResponse::success(
        Value::Null,
        format!("Token {} has been revoked.", jti),
    ))
}
