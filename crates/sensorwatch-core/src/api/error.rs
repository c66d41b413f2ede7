//! HTTP mapping of crate errors

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use tracing::error;

use crate::error::Error;

/// Handler error; renders as `{"status": "error", "error_kind", "message"}`
#[derive(Debug)]
pub struct ApiError(pub Error);

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        Self(err)
    }
}

/// Handler result type
pub type ApiResult<T> = std::result::Result<T, ApiError>;

/// Status code for an error discriminator
pub fn status_for_kind(kind: &str) -> StatusCode {
    match kind {
        "validation" | "invalid_config" | "unsupported_validation_kind" => StatusCode::BAD_REQUEST,
        "inactive_alert" => StatusCode::FORBIDDEN,
        "not_found" | "no_devices_found" => StatusCode::NOT_FOUND,
        "conflict" => StatusCode::CONFLICT,
        "timeout" => StatusCode::GATEWAY_TIMEOUT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let kind = self.0.kind();
        let status = status_for_kind(kind);

        if status == StatusCode::INTERNAL_SERVER_ERROR {
            error!(error = %self.0, "Request failed");
        }

        let body = match &self.0 {
            Error::Conflict { existing } => json!({
                "status": "error",
                "error_kind": kind,
                "message": self.0.to_string(),
                "existing_alert": existing,
            }),
            err => json!({
                "status": "error",
                "error_kind": kind,
                "message": err.to_string(),
            }),
        };

        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(status_for_kind(Error::validation("x").kind()), StatusCode::BAD_REQUEST);
        assert_eq!(
            status_for_kind(Error::InactiveAlert("a".into()).kind()),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            status_for_kind(Error::NoDevicesFound("7".into()).kind()),
            StatusCode::NOT_FOUND
        );
        assert_eq!(status_for_kind(Error::timeout("q").kind()), StatusCode::GATEWAY_TIMEOUT);
        assert_eq!(
            status_for_kind(Error::Database(sqlx::Error::PoolTimedOut).kind()),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
