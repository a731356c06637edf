//! Mapping of engine errors onto HTTP responses.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use tracing::error;

use crate::document::core::errors::DocError;

/// Error returned by every handler.
#[derive(Debug)]
pub enum ApiError {
    /// Missing or malformed `x-user-id`.
    Unauthenticated,
    /// Malformed request input outside the engine.
    BadRequest(String),
    /// Engine failure.
    Doc(DocError),
}

impl From<DocError> for ApiError {
    fn from(err: DocError) -> Self {
        Self::Doc(err)
    }
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            Self::Unauthenticated => StatusCode::UNAUTHORIZED,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Doc(err) if err.is_not_found() => StatusCode::NOT_FOUND,
            Self::Doc(err) => match err {
                DocError::Authorization { .. } => StatusCode::FORBIDDEN,
                DocError::InvalidContent(_)
                | DocError::InvalidConfig(_)
                | DocError::InvalidId(_)
                | DocError::UnsupportedProvider(_) => StatusCode::BAD_REQUEST,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match &self {
            Self::Unauthenticated => "missing or invalid x-user-id header".to_string(),
            Self::BadRequest(message) => message.clone(),
            Self::Doc(err) if status == StatusCode::INTERNAL_SERVER_ERROR => {
                error!(error = %err, "request failed");
                "internal error".to_string()
            }
            Self::Doc(err) => err.to_string(),
        };
        (status, Json(serde_json::json!({ "error": message }))).into_response()
    }
}
