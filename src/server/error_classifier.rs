use axum::http::StatusCode;

/// Closed, user-facing failure taxonomy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    RequestTooLarge,
    RateLimited,
    Unauthenticated,
    Timeout,
    ContentPolicy,
    AttachmentError,
    NetworkError,
    ProviderOverloaded,
    Unknown,
}

impl ErrorCategory {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::RequestTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            Self::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            Self::Unauthenticated => StatusCode::UNAUTHORIZED,
            Self::Timeout => StatusCode::GATEWAY_TIMEOUT,
            Self::ContentPolicy => StatusCode::BAD_REQUEST,
            Self::AttachmentError => StatusCode::BAD_REQUEST,
            Self::NetworkError => StatusCode::BAD_GATEWAY,
            Self::ProviderOverloaded => StatusCode::SERVICE_UNAVAILABLE,
            Self::Unknown => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn user_message(&self) -> &'static str {
        match self {
            Self::RequestTooLarge => {
                "Your request is too large. Try removing some attachments or shortening the conversation."
            }
            Self::RateLimited => {
                "You're sending messages too quickly. Please wait a moment and try again."
            }
            Self::Unauthenticated => "Authentication failed. Please sign in again.",
            Self::Timeout => {
                "The AI provider took too long to respond. Please try again, or use a faster model."
            }
            Self::ContentPolicy => {
                "Your message was flagged by the provider's content policy. Please rephrase and try again."
            }
            Self::AttachmentError => {
                "One of your attachments could not be processed. Please check the file and try again."
            }
            Self::NetworkError => {
                "A network error occurred while contacting the AI provider. Please try again."
            }
            Self::ProviderOverloaded => {
                "The AI provider is currently overloaded. Please try again in a few moments."
            }
            Self::Unknown => "Something went wrong while generating a response. Please try again.",
        }
    }

    /// Stable key carried in the `error` field of a failed stream chunk.
    pub fn key(&self) -> &'static str {
        match self {
            Self::RequestTooLarge => "request_too_large",
            Self::RateLimited => "rate_limited",
            Self::Unauthenticated => "unauthenticated",
            Self::Timeout => "timeout",
            Self::ContentPolicy => "content_policy",
            Self::AttachmentError => "attachment_error",
            Self::NetworkError => "network_error",
            Self::ProviderOverloaded => "provider_overloaded",
            Self::Unknown => "unknown",
        }
    }
}

// Evaluated top to bottom, first hit wins. Provider wording drifts, so this table is brittle;
// typed status codes are consulted before it wherever they exist.
const PATTERNS: &[(ErrorCategory, &[&str])] = &[
    (
        ErrorCategory::RequestTooLarge,
        &[
            "request too large",
            "request_too_large",
            "payload too large",
            "entity too large",
            "prompt is too long",
            "context length",
            "context_length_exceeded",
            "maximum context",
            "too many tokens",
        ],
    ),
    (
        ErrorCategory::RateLimited,
        &[
            "rate limit",
            "rate_limit",
            "ratelimit",
            "too many requests",
            "resource_exhausted",
            "quota",
        ],
    ),
    (
        ErrorCategory::Unauthenticated,
        &[
            "unauthorized",
            "unauthenticated",
            "invalid api key",
            "invalid_api_key",
            "incorrect api key",
            "invalid x-api-key",
            "api key not valid",
            "authentication",
            "permission denied",
        ],
    ),
    (
        ErrorCategory::Timeout,
        &["timeout", "timed out", "deadline exceeded", "deadline_exceeded"],
    ),
    (
        ErrorCategory::ContentPolicy,
        &[
            "content policy",
            "content_policy",
            "content management policy",
            "content filter",
            "content_filter",
            "safety",
            "moderation",
            "flagged",
        ],
    ),
    (
        ErrorCategory::AttachmentError,
        &[
            "attachment",
            "unsupported file",
            "file type",
            "invalid image",
            "could not process image",
            "unsupported media",
            "media type",
            "pdf",
        ],
    ),
    (
        ErrorCategory::NetworkError,
        &[
            "network",
            "connection refused",
            "connection reset",
            "connection closed",
            "error sending request",
            "dns error",
            "econnrefused",
            "econnreset",
            "fetch failed",
            "socket",
        ],
    ),
    (
        ErrorCategory::ProviderOverloaded,
        &[
            "overloaded",
            "service unavailable",
            "temporarily unavailable",
            "at capacity",
            "server is busy",
        ],
    ),
];

/// Heuristic classification over a free-form failure message.
pub fn classify_message(message: &str) -> ErrorCategory {
    let lower = message.to_lowercase();
    PATTERNS
        .iter()
        .find(|(_, needles)| needles.iter().any(|n| lower.contains(n)))
        .map(|(category, _)| *category)
        .unwrap_or(ErrorCategory::Unknown)
}

/// Typed classification from an upstream HTTP status, when the status alone is decisive.
pub fn classify_status(status: u16) -> Option<ErrorCategory> {
    match status {
        401 | 403 => Some(ErrorCategory::Unauthenticated),
        408 | 504 => Some(ErrorCategory::Timeout),
        413 => Some(ErrorCategory::RequestTooLarge),
        429 => Some(ErrorCategory::RateLimited),
        502 => Some(ErrorCategory::NetworkError),
        503 | 529 => Some(ErrorCategory::ProviderOverloaded),
        _ => None,
    }
}
