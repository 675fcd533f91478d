use axum::extract::State;
use axum::http::HeaderMap;
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Map, Value};

use crate::auth;
use crate::error::ApiError;
use crate::middleware::response::{ApiResult, TapisResponse};
use crate::services::AppState;
use crate::tokens::{
    rebuild_access_from_refresh, NewTokenRequest, TapisAccessToken, TapisRefreshToken,
    NAMESPACE_PRETEXT,
};

/// POST /v3/tokens - mint an access token, optionally with a companion
/// refresh token.
pub async fn tokens_post(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<NewTokenRequest>,
) -> ApiResult {
    tracing::debug!("top of POST /v3/tokens");
    auth::check_create_token(&state, &headers, &payload).await?;

    let mut access =
        TapisAccessToken::derive(&payload, &state.cache, &state.config.service.tenants)?;
    let tenant = state.cache.get_signing(&payload.token_tenant_id)?;
    access.sign(&tenant.private_key)?;

    let mut result = Map::new();
    result.insert("access_token".to_string(), access.serialize());

    if payload.generate_refresh_token.unwrap_or(false) {
        let mut refresh =
            TapisRefreshToken::from_access(&access, payload.refresh_token_ttl, &tenant);
        refresh.sign(&tenant.private_key)?;
        result.insert("refresh_token".to_string(), refresh.serialize());
    }

    Ok(TapisResponse::success(
        Value::Object(result),
        "Token generation successful.",
    ))
}

/// PUT /v3/tokens request body.
#[derive(Debug, Deserialize)]
pub struct RefreshTokenRequest {
    pub refresh_token: String,
}

/// PUT /v3/tokens - exchange a refresh token for a fresh pair. No further
/// authorization: possession of a valid refresh token is the credential.
/// The new access token reproduces the original claims and TTL, and the new
/// refresh token reuses the original `initial_ttl`, so both TTLs are
/// invariant across refresh cycles.
pub async fn tokens_put(
    State(state): State<AppState>,
    Json(payload): Json<RefreshTokenRequest>,
) -> ApiResult {
    tracing::debug!("top of PUT /v3/tokens");
    let refresh_claims = auth::validate_token(&state.cache, &payload.refresh_token)
        .map_err(|_| ApiError::invalid_request("Invalid PUT data: could not validate the refresh token."))?;

    let initial_ttl = refresh_claims
        .get(&format!("{NAMESPACE_PRETEXT}initial_ttl"))
        .and_then(Value::as_i64);

    let mut access = rebuild_access_from_refresh(&refresh_claims)
        .map_err(|_| ApiError::invalid_request("Invalid PUT data: not a usable refresh token."))?;
    let tenant = state.cache.get_signing(&access.tenant_id)?;
    access.sign(&tenant.private_key)?;

    let mut refresh = TapisRefreshToken::from_access(&access, initial_ttl, &tenant);
    refresh.sign(&tenant.private_key)?;

    Ok(TapisResponse::success(
        json!({
            "access_token": access.serialize(),
            "refresh_token": refresh.serialize(),
        }),
        "Token generation successful.",
    ))
}
