// HTTP API error types
use axum::{http::StatusCode, response::IntoResponse, Json};
use serde_json::{json, Value};

/// HTTP boundary error. Each variant is one of the service's error kinds and
/// maps to a fixed status code; messages are client-safe.
#[derive(Debug)]
pub enum ApiError {
    // 400 Bad Request - bad payload, bad header combination, claim collision
    InvalidRequest(String),

    // 401 Unauthorized - credentials missing or invalid
    Authentication(String),

    // 403 Forbidden - authenticated but not allowed
    Permission(String),

    // 502 Bad Gateway - SK / Tenants registry / site-router failure
    UpstreamUnavailable(String),

    // 500 Internal Server Error - rotation partial failure, operator attention required
    Inconsistency(String),

    // 500 Internal Server Error - signing or serialization bug
    Internal(String),
}

impl ApiError {
    pub fn status_code(&self) -> u16 {
        match self {
            ApiError::InvalidRequest(_) => 400,
            ApiError::Authentication(_) => 401,
            ApiError::Permission(_) => 403,
            ApiError::UpstreamUnavailable(_) => 502,
            ApiError::Inconsistency(_) => 500,
            ApiError::Internal(_) => 500,
        }
    }

    pub fn message(&self) -> &str {
        match self {
            ApiError::InvalidRequest(msg)
            | ApiError::Authentication(msg)
            | ApiError::Permission(msg)
            | ApiError::UpstreamUnavailable(msg)
            | ApiError::Inconsistency(msg)
            | ApiError::Internal(msg) => msg,
        }
    }

    /// Error body in the standard response envelope.
    pub fn to_json(&self) -> Value {
        json!({
            "status": "error",
            "message": self.message(),
            "version": env!("CARGO_PKG_VERSION"),
            "result": null,
        })
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        ApiError::InvalidRequest(message.into())
    }

    pub fn authentication(message: impl Into<String>) -> Self {
        ApiError::Authentication(message.into())
    }

    pub fn permission(message: impl Into<String>) -> Self {
        ApiError::Permission(message.into())
    }

    pub fn upstream(message: impl Into<String>) -> Self {
        ApiError::UpstreamUnavailable(message.into())
    }

    pub fn inconsistency(message: impl Into<String>) -> Self {
        ApiError::Inconsistency(message.into())
    }

    pub fn internal(message: impl Into<String>) -> Self {
        ApiError::Internal(message.into())
    }
}

impl From<crate::tokens::TokenError> for ApiError {
    fn from(err: crate::tokens::TokenError) -> Self {
        use crate::tokens::TokenError;
        match err {
            TokenError::UnknownTenant(_)
            | TokenError::MissingTargetSite
            | TokenError::UnexpectedTargetSite
            | TokenError::MissingDelegationSub
            | TokenError::ClaimCollision(_) => ApiError::invalid_request(err.to_string()),
            TokenError::UnsupportedAlgorithm(_) => {
                tracing::error!("token model error: {}", err);
                ApiError::internal("Unable to sign token. Please contact system administrator.")
            }
            TokenError::Signing(e) => {
                // Log the real error but return a generic message
                tracing::error!("Got exception trying to sign token: {}", e);
                ApiError::internal("Unable to sign token. Please contact system administrator.")
            }
        }
    }
}

impl From<crate::tenants::TenantError> for ApiError {
    fn from(err: crate::tenants::TenantError) -> Self {
        use crate::tenants::TenantError;
        match err {
            TenantError::NotFound(tenant_id) => {
                ApiError::invalid_request(format!("Unknown tenant: {}", tenant_id))
            }
            TenantError::NotReady => {
                ApiError::internal("Service is still starting up; try again shortly.")
            }
            TenantError::MissingPrivateKey(tenant_id) => {
                tracing::error!("tenant {} has no private key in the cache", tenant_id);
                ApiError::internal("Unable to sign token. Please contact system administrator.")
            }
        }
    }
}

impl From<crate::clients::ClientError> for ApiError {
    fn from(err: crate::clients::ClientError) -> Self {
        tracing::error!("upstream call failed: {}", err);
        ApiError::upstream("An upstream service is unavailable; try again later.")
    }
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message())
    }
}

impl std::error::Error for ApiError {}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let status =
            StatusCode::from_u16(self.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, Json(self.to_json())).into_response()
    }
}
