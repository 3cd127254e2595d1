//! API error type for the gateway server.
//!
//! Wraps [`gateway_core::GatewayError`] and maps its taxonomy to an HTTP
//! status code and an OpenAI-style `{"error": {...}}` envelope.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use gateway_core::GatewayError;
use serde_json::json;

/// API error type for route handlers.
pub struct ApiError(pub GatewayError);

impl From<GatewayError> for ApiError {
    fn from(err: GatewayError) -> Self {
        Self(err)
    }
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match &self.0 {
            GatewayError::InvalidArgument(_) => StatusCode::BAD_REQUEST,
            GatewayError::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            GatewayError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            GatewayError::QueueFull | GatewayError::QueueTimeout | GatewayError::Shutdown => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            GatewayError::ExecutionTimeout => StatusCode::GATEWAY_TIMEOUT,
            GatewayError::UpstreamError(_) => StatusCode::BAD_GATEWAY,
            GatewayError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();

        if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!(error = %self.0, "internal error");
        }

        let mut body = json!({
            "error": {
                "message": self.0.to_string(),
                "type": self.0.error_type(),
            }
        });
        if let Some(code) = self.0.code() {
            body["error"]["code"] = json!(code);
        }
        if let GatewayError::RateLimited { retry_after_secs } = &self.0 {
            let mut response = (status, axum::Json(body)).into_response();
            if let Ok(value) = retry_after_secs.to_string().parse() {
                response.headers_mut().insert(axum::http::header::RETRY_AFTER, value);
            }
            return response;
        }

        (status, axum::Json(body)).into_response()
    }
}
