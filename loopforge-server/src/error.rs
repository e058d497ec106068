//! API error mapping
//!
//! One-to-one mapping from the common error kinds to HTTP responses.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use loopforge_common::Error;

/// Wrapper turning `loopforge_common::Error` into an HTTP response.
#[derive(Debug)]
pub struct ApiError(pub Error);

impl From<Error> for ApiError {
    fn from(error: Error) -> Self {
        ApiError(error)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::BadInput(_) | Error::Conflict(_) => StatusCode::BAD_REQUEST,
            Error::DependencyMissing(_) => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };

        if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!(error = ?self.0, "Internal error in API handler");
        }

        let body = Json(json!({
            "error": {
                "code": self.0.kind(),
                "message": self.0.to_string(),
            }
        }));
        (status, body).into_response()
    }
}

/// Result type for API handlers
pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    fn status_of(error: Error) -> StatusCode {
        ApiError(error).into_response().status()
    }

    #[test]
    fn test_error_status_mapping() {
        assert_eq!(status_of(Error::NotFound("x".into())), StatusCode::NOT_FOUND);
        assert_eq!(status_of(Error::BadInput("x".into())), StatusCode::BAD_REQUEST);
        assert_eq!(status_of(Error::Conflict("x".into())), StatusCode::BAD_REQUEST);
        assert_eq!(
            status_of(Error::DependencyMissing("x".into())),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            status_of(Error::Internal("x".into())),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(status_of(Error::Cancelled), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
