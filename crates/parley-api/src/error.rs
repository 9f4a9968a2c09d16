use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use thiserror::Error;
use tracing::error;

/// Error taxonomy for the REST surface. The gateway-side counterpart of
/// `ProtocolViolation` is a WebSocket close with reason "unacceptable data"
/// (see parley-gateway), since a bad frame has no HTTP response to map to.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("conversation not found")]
    ConversationNotFound,

    #[error("conversation is blocked")]
    ConversationBlocked,

    #[error("invalid pagination cursor")]
    InvalidCursor,

    #[error("unauthorized")]
    Unauthorized,

    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    Conflict(String),

    #[error("persistence failure")]
    Persistence(#[from] anyhow::Error),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::ConversationNotFound => StatusCode::NOT_FOUND,
            ApiError::ConversationBlocked => StatusCode::FORBIDDEN,
            ApiError::InvalidCursor | ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::Persistence(e) => {
                error!("Persistence failure: {:#}", e);
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_taxonomy_to_status_codes() {
        assert_eq!(
            ApiError::ConversationNotFound.into_response().status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ApiError::ConversationBlocked.into_response().status(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            ApiError::InvalidCursor.into_response().status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError::Unauthorized.into_response().status(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            ApiError::Persistence(anyhow::anyhow!("db down"))
                .into_response()
                .status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
