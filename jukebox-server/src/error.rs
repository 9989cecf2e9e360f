//! HTTP error mapping

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use jukebox_common::Error;
use serde_json::json;
use tracing::warn;

/// Error returned by request handlers
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// OAuth `state` did not match the one we issued
    #[error("Invalid state")]
    InvalidState,
    /// Failure bubbled up from the upstream client or auth layer
    #[error(transparent)]
    Service(#[from] Error),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::InvalidState => StatusCode::PRECONDITION_FAILED,
            ApiError::Service(e) => match e {
                Error::Auth(_) => StatusCode::UNAUTHORIZED,
                Error::InvalidInput(_) => StatusCode::BAD_REQUEST,
                Error::NotFound(_) => StatusCode::NOT_FOUND,
                Error::Upstream { .. } | Error::Http(_) | Error::Decode(_) => {
                    StatusCode::BAD_GATEWAY
                }
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if let ApiError::Service(e) = &self {
            warn!(status = status.as_u16(), error = %e, "Request failed");
        }
        let message = self.to_string();

        (status, Json(json!({ "error": message }))).into_response()
    }
}
