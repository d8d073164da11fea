use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;

use crate::config::ProviderKind;
use crate::server::error_classifier::{ErrorCategory, classify_message, classify_status};

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Base64 decode error: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("Multipart error: {0}")]
    Multipart(#[from] axum::extract::multipart::MultipartError),

    #[error("Malformed request: {0}")]
    MalformedRequest(String),

    #[error("Request body too large: {0}")]
    PayloadTooLarge(String),

    #[error("Unauthenticated")]
    Unauthenticated,

    #[error("Provider {0} is not configured")]
    ProviderNotConfigured(ProviderKind),

    #[error("{provider} upstream error ({status}): {message}")]
    Upstream {
        provider: ProviderKind,
        status: u16,
        message: String,
    },

    #[error("Stream error: {0}")]
    Stream(String),

    #[error("Attachment error: {0}")]
    Attachment(String),

    #[error("Config error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, GatewayError>;

impl GatewayError {
    /// Typed signals first, then the substring table over the rendered message.
    pub fn category(&self) -> ErrorCategory {
        match self {
            GatewayError::Unauthenticated => ErrorCategory::Unauthenticated,
            GatewayError::PayloadTooLarge(_) => ErrorCategory::RequestTooLarge,
            GatewayError::Attachment(_) | GatewayError::Base64(_) => ErrorCategory::AttachmentError,
            GatewayError::Upstream {
                status, message, ..
            } => classify_status(*status).unwrap_or_else(|| classify_message(message)),
            GatewayError::Http(e) if e.is_timeout() => ErrorCategory::Timeout,
            GatewayError::Http(e) if e.is_connect() => ErrorCategory::NetworkError,
            GatewayError::Http(e) => match e.status() {
                Some(s) => classify_status(s.as_u16()).unwrap_or_else(|| classify_message(&e.to_string())),
                None => classify_message(&e.to_string()),
            },
            other => classify_message(&other.to_string()),
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            GatewayError::MalformedRequest(_) | GatewayError::Json(_) | GatewayError::Multipart(_) => {
                StatusCode::BAD_REQUEST
            }
            GatewayError::ProviderNotConfigured(_) => StatusCode::SERVICE_UNAVAILABLE,
            GatewayError::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
            _ => self.category().status(),
        }
    }

    /// Text shown to the caller. Validation failures keep their own detail; everything else is
    /// replaced by the category's template so raw upstream text never leaks.
    pub fn user_message(&self) -> String {
        match self {
            GatewayError::MalformedRequest(msg) => msg.clone(),
            GatewayError::Json(e) => format!("Invalid request body: {}", e),
            GatewayError::Multipart(e) => format!("Invalid multipart body: {}", e),
            GatewayError::ProviderNotConfigured(kind) => {
                format!("The {} provider is not configured on this server.", kind)
            }
            _ => self.category().user_message().to_string(),
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!("request failed: {}", self);
        } else {
            tracing::warn!("request rejected: {}", self);
        }
        let body = Json(json!({
            "success": false,
            "error": self.user_message(),
        }));
        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upstream_status_beats_message_text() {
        let err = GatewayError::Upstream {
            provider: ProviderKind::Anthropic,
            status: 529,
            message: "rate limit".into(),
        };
        assert_eq!(err.category(), ErrorCategory::ProviderOverloaded);
        assert_eq!(err.status_code(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[test]
    fn upstream_without_decisive_status_uses_heuristics() {
        let err = GatewayError::Upstream {
            provider: ProviderKind::OpenAI,
            status: 400,
            message: "Your request was rejected as a result of our safety system".into(),
        };
        assert_eq!(err.category(), ErrorCategory::ContentPolicy);
    }

    #[test]
    fn plain_rate_limit_stream_error_is_429() {
        let err = GatewayError::Stream("rate limit exceeded".into());
        assert_eq!(err.status_code(), StatusCode::TOO_MANY_REQUESTS);
        assert!(err.user_message().contains("sending messages too quickly"));
    }

    #[test]
    fn malformed_request_keeps_detail() {
        let err = GatewayError::MalformedRequest("messages must be an array".into());
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(err.user_message(), "messages must be an array");
    }

    #[test]
    fn unconfigured_provider_is_503() {
        let err = GatewayError::ProviderNotConfigured(ProviderKind::Google);
        assert_eq!(err.status_code(), StatusCode::SERVICE_UNAVAILABLE);
        assert!(err.user_message().contains("google"));
    }
}
