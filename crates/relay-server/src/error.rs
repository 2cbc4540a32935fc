//! HTTP error responses.

use crate::metrics;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use relay_core::RelayError;
use relay_protocol::error_codes;
use thiserror::Error;

/// Errors returned by the HTTP polling API.
#[derive(Debug, Error)]
pub enum ApiError {
    /// A relay operation failed.
    #[error(transparent)]
    Relay(#[from] RelayError),

    /// The polling API is turned off in configuration.
    #[error("HTTP polling is disabled; connect over WebSocket instead")]
    PollingDisabled,
}

impl ApiError {
    /// HTTP status for this error.
    #[must_use]
    pub fn status(&self) -> StatusCode {
        match self {
            // The polling client treats 401 as "session expired, reconnect".
            ApiError::Relay(RelayError::SessionNotFound(_)) => StatusCode::UNAUTHORIZED,
            ApiError::Relay(RelayError::InvalidMessage(_)) => StatusCode::BAD_REQUEST,
            ApiError::Relay(RelayError::DeliveryModeConflict(_)) => StatusCode::CONFLICT,
            ApiError::PollingDisabled => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match &self {
            ApiError::Relay(e) => metrics::record_relay_error(e),
            ApiError::PollingDisabled => metrics::record_error("polling_disabled"),
        }

        let body = Json(serde_json::json!({ "error": self.to_string() }));
        (self.status(), body).into_response()
    }
}

/// Protocol error code for a relay error.
#[must_use]
pub fn frame_error_code(error: &RelayError) -> u16 {
    match error {
        RelayError::SessionNotFound(_) => error_codes::SESSION_NOT_FOUND,
        RelayError::InvalidMessage(_) => error_codes::INVALID_MESSAGE,
        RelayError::DeliveryModeConflict(_) => error_codes::DELIVERY_MODE_CONFLICT,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        let expired = ApiError::from(RelayError::SessionNotFound("client_1".into()));
        assert_eq!(expired.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(expired.into_response().status(), StatusCode::UNAUTHORIZED);

        let invalid = ApiError::from(RelayError::InvalidMessage("missing content"));
        assert_eq!(invalid.status(), StatusCode::BAD_REQUEST);

        assert_eq!(
            ApiError::PollingDisabled.into_response().status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[test]
    fn test_frame_error_codes() {
        assert_eq!(
            frame_error_code(&RelayError::InvalidMessage("x")),
            error_codes::INVALID_MESSAGE
        );
        assert_eq!(
            frame_error_code(&RelayError::DeliveryModeConflict("a".into())),
            error_codes::DELIVERY_MODE_CONFLICT
        );
    }
}
