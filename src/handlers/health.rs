use axum::extract::State;
use serde_json::{json, Value};

use crate::error::ApiError;
use crate::middleware::response::{ApiResult, TapisResponse};
use crate::services::AppState;

/// GET /v3/tokens/hello - liveness.
pub async fn hello_get() -> TapisResponse {
    TapisResponse::success(Value::Null, "Hello from the Tokens API.")
}

/// GET /v3/tokens/ready - 200 only once bootstrap has filled the tenant
/// cache and, when the SK is in play, the SK answers its healthcheck.
pub async fn ready_get(State(state): State<AppState>) -> ApiResult {
    if !state.cache.is_ready() {
        return Err(ApiError::upstream("Tenant cache is not ready."));
    }
    if state.config.sk.use_sk {
        state.sk.ping().await?;
    }
    Ok(TapisResponse::success(json!({ "ready": true }), "Ready."))
}
