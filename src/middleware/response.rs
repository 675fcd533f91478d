use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde_json::{json, Value};

/// Success envelope shared by every endpoint:
/// `{status, message, version, result}`.
#[derive(Debug)]
pub struct TapisResponse {
    pub result: Value,
    pub message: String,
}

impl TapisResponse {
    pub fn success(result: Value, message: impl Into<String>) -> Self {
        Self {
            result,
            message: message.into(),
        }
    }
}

impl IntoResponse for TapisResponse {
    fn into_response(self) -> Response {
        let envelope = json!({
            "status": "success",
            "message": self.message,
            "version": env!("CARGO_PKG_VERSION"),
            "result": self.result,
        });
        (StatusCode::OK, Json(envelope)).into_response()
    }
}

/// Handler result alias; errors render through `ApiError::into_response`.
pub type ApiResult = Result<TapisResponse, crate::error::ApiError>;
