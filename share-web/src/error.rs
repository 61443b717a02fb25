//! HTTP error responses
//!
//! Library errors are wrapped in [`ApiError`], which maps each kind to a
//! status code and a JSON body `{ "error": ..., "type": ... }`.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use libsharecast::error::PlatformError;
use libsharecast::SharecastError;
use tracing::error;

#[derive(Debug)]
pub struct ApiError(pub SharecastError);

impl From<SharecastError> for ApiError {
    fn from(err: SharecastError) -> Self {
        ApiError(err)
    }
}

impl ApiError {
    fn status_and_type(&self) -> (StatusCode, &'static str) {
        match &self.0 {
            SharecastError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
            SharecastError::InvalidInput(_) => (StatusCode::BAD_REQUEST, "validation"),
            SharecastError::Callback(_) => (StatusCode::BAD_REQUEST, "callback"),
            SharecastError::MissingCapability { .. } => {
                (StatusCode::UNPROCESSABLE_ENTITY, "unsupported")
            }
            SharecastError::Platform(PlatformError::Authentication(_)) => {
                (StatusCode::UNAUTHORIZED, "authentication")
            }
            SharecastError::Platform(PlatformError::RateLimit(_)) => {
                (StatusCode::TOO_MANY_REQUESTS, "rate_limited")
            }
            SharecastError::Platform(_) => (StatusCode::BAD_GATEWAY, "platform"),
            SharecastError::TokenRefresh { .. } => (StatusCode::BAD_GATEWAY, "token_refresh"),
            SharecastError::InvalidTokenId(_) => (StatusCode::INTERNAL_SERVER_ERROR, "config"),
            SharecastError::Config(_) => (StatusCode::INTERNAL_SERVER_ERROR, "config"),
            SharecastError::Database(_) => (StatusCode::INTERNAL_SERVER_ERROR, "database"),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_type) = self.status_and_type();

        let message = match &self.0 {
            SharecastError::Database(e) => {
                error!(error = %e, "Database error while handling request");
                "Database error".to_string()
            }
            SharecastError::Callback(e) => e.message.clone(),
            other => other.to_string(),
        };

        let body = Json(serde_json::json!({
            "error": message,
            "type": error_type,
        }));

        (status, body).into_response()
    }
}

pub type ApiResult<T> = std::result::Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;
    use libsharecast::error::{CallbackError, Capability};

    fn status(err: SharecastError) -> StatusCode {
        ApiError(err).into_response().status()
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(status(SharecastError::NotFound("share 1".into())), StatusCode::NOT_FOUND);
        assert_eq!(
            status(SharecastError::InvalidInput("bad".into())),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status(CallbackError::without_redirect("No connect flow in progress").into()),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status(SharecastError::MissingCapability {
                provider: "Bare".into(),
                capability: Capability::Composing,
            }),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            status(PlatformError::Network("timeout".into()).into()),
            StatusCode::BAD_GATEWAY
        );
    }
}
