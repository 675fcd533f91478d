pub mod health;
pub mod keys;
pub mod revoke;
pub mod tokens;

use axum::{
    routing::{get, post, put},
    Router,
};

use crate::services::AppState;

/// All routes of the service. Layers (CORS, tracing) are attached by the
/// binary so tests can drive the bare router.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/v3/tokens/ready", get(health::ready_get))
        .route("/v3/tokens/hello", get(health::hello_get))
        .route(
            "/v3/tokens",
            post(tokens::tokens_post).put(tokens::tokens_put),
        )
        .route("/v3/tokens/revoke", post(revoke::revoke_post))
        .route("/v3/tokens/keys", put(keys::keys_put))
        .with_state(state)
}
