//! Mail API error types.

use std::time::Duration;

use thiserror::Error;

/// Machine-readable codes attached to locally produced API errors.
///
/// Errors returned by the server carry the server's own code instead.
pub mod codes {
    /// Connection, TLS or other transport failure.
    pub const TRANSPORT: i64 = 1;
    /// The request exceeded the transport timeout.
    pub const TIMEOUT: i64 = 2;
    /// The response body was not a usable JSON document.
    pub const BAD_RESPONSE: i64 = 4;
    /// The response was JSON but did not have the expected shape.
    pub const UNABLE_TO_PARSE_RESPONSE: i64 = 5;
}

/// Errors that can occur while talking to the mail API.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ApiError {
    /// Request timed out at the transport layer.
    #[error("Request timed out: {0}")]
    Timeout(String),

    /// Connection or protocol failure before a response was received.
    #[error("Transport error: {0}")]
    Transport(String),

    /// The server answered with a non-success status.
    #[error("HTTP {status} (code {code}): {message}")]
    Http {
        status: u16,
        code: i64,
        message: String,
        retry_after: Option<Duration>,
    },

    /// The response body could not be read as JSON.
    #[error("Bad response: {0}")]
    BadResponse(String),

    /// The response was JSON but a required field had the wrong type or was missing.
    #[error("Unable to parse response: {0}")]
    UnableToParseResponse(String),
}

impl ApiError {
    /// Returns the machine-readable code for this error.
    pub fn code(&self) -> i64 {
        match self {
            ApiError::Timeout(_) => codes::TIMEOUT,
            ApiError::Transport(_) => codes::TRANSPORT,
            ApiError::Http { code, .. } => *code,
            ApiError::BadResponse(_) => codes::BAD_RESPONSE,
            ApiError::UnableToParseResponse(_) => codes::UNABLE_TO_PARSE_RESPONSE,
        }
    }

    /// Returns the HTTP status if the server produced one.
    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::Http { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Returns the server's `retry-after` hint, if any.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            ApiError::Http { retry_after, .. } => *retry_after,
            _ => None,
        }
    }

    /// Whether the failure is transient and worth retrying later.
    ///
    /// Timeouts, transport failures, rate limiting (429) and server errors
    /// (5xx) are transient. Other client errors and malformed responses are
    /// terminal.
    pub fn is_retryable(&self) -> bool {
        match self {
            ApiError::Timeout(_) | ApiError::Transport(_) => true,
            ApiError::Http { status, .. } => *status == 429 || *status >= 500,
            ApiError::BadResponse(_) | ApiError::UnableToParseResponse(_) => false,
        }
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ApiError::Timeout(err.to_string())
        } else if err.is_decode() {
            ApiError::BadResponse(err.to_string())
        } else {
            ApiError::Transport(err.to_string())
        }
    }
}

/// Result type for mail API operations.
pub type Result<T> = std::result::Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    fn http(status: u16) -> ApiError {
        ApiError::Http {
            status,
            code: 2001,
            message: "nope".to_string(),
            retry_after: None,
        }
    }

    #[test]
    fn test_codes_are_distinct() {
        let bad = ApiError::BadResponse("x".to_string());
        let parse = ApiError::UnableToParseResponse("x".to_string());
        assert_eq!(bad.code(), 4);
        assert_ne!(bad.code(), parse.code());
    }

    #[test]
    fn test_retryable_classification() {
        assert!(http(429).is_retryable());
        assert!(http(503).is_retryable());
        assert!(!http(400).is_retryable());
        assert!(!http(404).is_retryable());
        assert!(ApiError::Timeout("t".to_string()).is_retryable());
        assert!(!ApiError::UnableToParseResponse("p".to_string()).is_retryable());
    }

    #[test]
    fn test_http_error_preserves_status_and_code() {
        let err = http(422);
        assert_eq!(err.status(), Some(422));
        assert_eq!(err.code(), 2001);
        assert!(err.to_string().contains("422"));
    }
}
