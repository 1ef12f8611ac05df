use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;

pub type LlmResult<T> = std::result::Result<T, LlmError>;

/// Gateway errors with appropriate HTTP status codes.
///
/// `UnknownModel` and `BadRequest` are raised before dispatch and never
/// reach the upstream; everything else may originate there.
#[derive(Debug, Error)]
pub enum LlmError {
    /// No provider is registered for the requested model.
    #[error("Unknown model: '{0}'")]
    UnknownModel(String),

    /// Invalid request parameters (missing tool_call_id, empty content, ...).
    #[error("Invalid request: {0}")]
    BadRequest(String),

    /// Authentication failed (missing or invalid API key).
    #[error("Authentication failed: {0}")]
    Auth(String),

    /// Upstream returned a non-2xx status; carries its status and body verbatim.
    #[error("Provider error ({status}): {body}")]
    ProviderError { status: u16, body: String },

    /// The upstream stream failed mid-flight.
    #[error("Upstream stream error: {0}")]
    UpstreamStreamError(String),

    /// The upstream call exceeded the configured timeout.
    #[error("Upstream request timed out")]
    Timeout,

    /// The client disconnected; no body is produced.
    #[error("Request canceled")]
    Canceled,

    /// Internal error. If Some(message), it came from a provider and can be
    /// shown; if None, details must not leak.
    #[error("Internal server error")]
    Internal(Option<String>),
}

impl LlmError {
    /// Get the appropriate HTTP status code for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::UnknownModel(_) | Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Auth(_) => StatusCode::UNAUTHORIZED,
            Self::ProviderError { status, .. } => {
                StatusCode::from_u16(*status).unwrap_or(StatusCode::BAD_GATEWAY)
            }
            Self::UpstreamStreamError(_) => StatusCode::BAD_GATEWAY,
            Self::Timeout => StatusCode::GATEWAY_TIMEOUT,
            // Non-standard nginx status for a closed client connection.
            Self::Canceled => StatusCode::from_u16(499).unwrap_or(StatusCode::BAD_REQUEST),
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Get the error kind string for the response body.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::UnknownModel(_) => "unknown_model",
            Self::BadRequest(_) => "bad_request",
            Self::Auth(_) => "auth",
            Self::ProviderError { .. } => "provider_error",
            Self::UpstreamStreamError(_) => "upstream_stream_error",
            Self::Timeout => "timeout",
            Self::Canceled => "canceled",
            Self::Internal(_) => "internal",
        }
    }

    /// The error rendered as an in-stream data payload for OpenAI-dialect
    /// egress, where a mid-stream failure must not abort the stream.
    pub fn stream_json(&self) -> String {
        let message = serde_json::to_string(&self.client_message()).unwrap_or_else(|_| "\"\"".to_string());
        format!(r#"{{"error":{{"type":"{}","message":{message}}}}}"#, self.kind())
    }

    /// Message that is safe to expose to API consumers.
    pub fn client_message(&self) -> String {
        match self {
            Self::ProviderError { body, .. } => body.clone(),
            Self::Internal(Some(provider_msg)) => provider_msg.clone(),
            Self::Internal(None) => "Internal server error".to_string(),
            _ => self.to_string(),
        }
    }
}

impl From<reqwest::Error> for LlmError {
    fn from(error: reqwest::Error) -> Self {
        if error.is_timeout() {
            Self::Timeout
        } else {
            Self::Internal(Some(error.to_string()))
        }
    }
}

/// Error response format compatible with the OpenAI API.
#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: ErrorDetails,
}

#[derive(Debug, Serialize)]
struct ErrorDetails {
    r#type: String,
    message: String,
}

impl IntoResponse for LlmError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        if matches!(self, Self::Canceled) {
            return status.into_response();
        }

        let error_response = ErrorResponse {
            error: ErrorDetails {
                r#type: self.kind().to_string(),
                message: self.client_message(),
            },
        };

        (status, Json(error_response)).into_response()
    }
}

/// The same error shaped for the `/v1/messages` dialect:
/// `{"type": "error", "error": {"type": ..., "message": ...}}`.
pub struct AnthropicErrorResponse(LlmError);

impl From<LlmError> for AnthropicErrorResponse {
    fn from(error: LlmError) -> Self {
        Self(error)
    }
}

impl IntoResponse for AnthropicErrorResponse {
    fn into_response(self) -> Response {
        let status = self.0.status_code();

        if matches!(self.0, LlmError::Canceled) {
            return status.into_response();
        }

        let body = crate::messages::anthropic::ErrorResponse::new(self.0.kind(), self.0.client_message());

        (status, Json(body)).into_response()
    }
}

pub type AnthropicResult<T> = std::result::Result<T, AnthropicErrorResponse>;
