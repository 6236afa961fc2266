//! API error type and its mapping onto HTTP responses.
//!
//! Remote communication errors never surface here: rejection reasons are
//! local, reported as a status code plus a short message, and leave the
//! chain state untouched.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use ember_store::StoreError;

/// Errors returned by the HTTP surface.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Validation or consensus rejection of a submitted payload.
    #[error(transparent)]
    Store(#[from] StoreError),
    /// Lookup of an unknown block hash.
    #[error("block not found")]
    BlockNotFound,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::Store(_) => StatusCode::BAD_REQUEST,
            ApiError::BlockNotFound => StatusCode::NOT_FOUND,
        };
        let body = Json(json!({
            "status": "rejected",
            "error": self.to_string(),
        }));
        (status, body).into_response()
    }
}
