use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::retry::retry_after_from_headers;

/// Code attached to authentication failures (HTTP 401).
pub const INVALID_API_KEY: &str = "INVALID_API_KEY";
/// Generic code for rejected requests when the vendor supplied none.
pub const INVALID_REQUEST: &str = "INVALID_REQUEST";
/// Generic code for throttled requests when the vendor supplied none.
pub const RATE_LIMIT_EXCEEDED: &str = "RATE_LIMIT_EXCEEDED";
/// Code attached to billing/quota exhaustion.
pub const INSUFFICIENT_QUOTA: &str = "INSUFFICIENT_QUOTA";
/// Code attached to client-side timeouts and aborted calls.
pub const TIMEOUT: &str = "TIMEOUT";
/// Code attached to connection-level failures.
pub const NETWORK_ERROR: &str = "NETWORK_ERROR";
/// Code attached to streams that ended before a completion signal.
pub const STREAM_CLOSED: &str = "STREAM_CLOSED";
/// Code attached to vendor payloads that could not be decoded.
pub const PARSE_ERROR: &str = "PARSE_ERROR";
/// Code attached to invalid client or provider configuration.
pub const CONFIG_ERROR: &str = "CONFIG_ERROR";
/// Code attached to calls addressing a handle that was never registered.
pub const UNKNOWN_PROVIDER: &str = "UNKNOWN_PROVIDER";

/// Closed set of normalized error categories.
///
/// The serialized names match the wire vocabulary consumed by the application
/// layer (`network_error`, `rate_limit`, ...).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    NetworkError,
    RateLimit,
    InvalidRequest,
    InsufficientQuota,
    ServerError,
}

impl ErrorKind {
    /// Wire name of the kind.
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::NetworkError => "network_error",
            ErrorKind::RateLimit => "rate_limit",
            ErrorKind::InvalidRequest => "invalid_request",
            ErrorKind::InsufficientQuota => "insufficient_quota",
            ErrorKind::ServerError => "server_error",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Every failure surfaced by the AI client core.
///
/// Callers match on the variant (or on [`AIClientError::kind`]) to decide between
/// retrying, switching provider, or surfacing a message to the user. Transient
/// variants (`Network`, `RateLimit`, `Server`) are retried by
/// [`crate::retry::RetryHandler`]; terminal ones propagate on first occurrence.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum AIClientError {
    /// DNS, refused connections and other transport failures.
    #[error("network error [{code}]: {message}")]
    Network { code: String, message: String },
    /// The vendor throttled the request.
    #[error("rate limited [{code}]: {message}")]
    RateLimit {
        code: String,
        message: String,
        /// Wait suggested by the vendor before retrying.
        retry_after: Option<Duration>,
    },
    /// The request was rejected and must not be retried as-is.
    #[error("invalid request [{code}]: {message}")]
    InvalidRequest { code: String, message: String },
    /// Billing or quota exhaustion.
    #[error("insufficient quota [{code}]: {message}")]
    InsufficientQuota { code: String, message: String },
    /// Vendor-side failures, timeouts and undecodable payloads.
    #[error("server error [{code}]: {message}")]
    Server { code: String, message: String },
}

impl AIClientError {
    /// Builds a [`AIClientError::Network`] error.
    ///
    /// # Examples
    ///
    /// ```
    /// use proposal_ai_client::error::{AIClientError, ErrorKind};
    ///
    /// let err = AIClientError::network("NETWORK_ERROR", "connection refused");
    /// assert_eq!(err.kind(), ErrorKind::NetworkError);
    /// assert!(err.is_retryable());
    /// ```
    pub fn network(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Network {
            code: code.into(),
            message: message.into(),
        }
    }

    pub fn rate_limit(
        code: impl Into<String>,
        message: impl Into<String>,
        retry_after: Option<Duration>,
    ) -> Self {
        Self::RateLimit {
            code: code.into(),
            message: message.into(),
            retry_after,
        }
    }

    pub fn invalid_request(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidRequest {
            code: code.into(),
            message: message.into(),
        }
    }

    pub fn insufficient_quota(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InsufficientQuota {
            code: code.into(),
            message: message.into(),
        }
    }

    pub fn server(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Server {
            code: code.into(),
            message: message.into(),
        }
    }

    /// Client-side abort or timeout, classified as a retryable server error.
    pub fn timeout(message: impl Into<String>) -> Self {
        Self::server(TIMEOUT, message)
    }

    /// Request rejected locally before any network traffic.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::invalid_request(INVALID_REQUEST, message)
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            AIClientError::Network { .. } => ErrorKind::NetworkError,
            AIClientError::RateLimit { .. } => ErrorKind::RateLimit,
            AIClientError::InvalidRequest { .. } => ErrorKind::InvalidRequest,
            AIClientError::InsufficientQuota { .. } => ErrorKind::InsufficientQuota,
            AIClientError::Server { .. } => ErrorKind::ServerError,
        }
    }

    pub fn code(&self) -> &str {
        match self {
            AIClientError::Network { code, .. }
            | AIClientError::RateLimit { code, .. }
            | AIClientError::InvalidRequest { code, .. }
            | AIClientError::InsufficientQuota { code, .. }
            | AIClientError::Server { code, .. } => code,
        }
    }

    pub fn message(&self) -> &str {
        match self {
            AIClientError::Network { message, .. }
            | AIClientError::RateLimit { message, .. }
            | AIClientError::InvalidRequest { message, .. }
            | AIClientError::InsufficientQuota { message, .. }
            | AIClientError::Server { message, .. } => message,
        }
    }

    /// Vendor-suggested wait, only ever present on rate limit errors.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            AIClientError::RateLimit { retry_after, .. } => *retry_after,
            _ => None,
        }
    }

    /// Whether the default retry policy treats this error as transient.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::NetworkError | ErrorKind::RateLimit | ErrorKind::ServerError
        )
    }
}

/// Normalizes a non-2xx vendor response into the error taxonomy.
///
/// `message` and `vendor_code` come from the vendor-specific error body parser;
/// the status decides the category:
///
/// | status | kind | code |
/// |--------|------|------|
/// | 401 | `invalid_request` | `INVALID_API_KEY` |
/// | 429 | `rate_limit` | vendor code or `RATE_LIMIT_EXCEEDED` |
/// | 400 | `invalid_request` | vendor code or `INVALID_REQUEST` |
/// | 402 | `insufficient_quota` | vendor code or `INSUFFICIENT_QUOTA` |
/// | other | `server_error` | vendor code or `HTTP_<status>` |
pub(crate) fn classify_status(
    status: u16,
    headers: &HashMap<String, String>,
    message: String,
    vendor_code: Option<String>,
) -> AIClientError {
    match status {
        401 => AIClientError::invalid_request(INVALID_API_KEY, message),
        429 => {
            if vendor_code.as_deref() == Some("insufficient_quota") {
                return AIClientError::insufficient_quota(INSUFFICIENT_QUOTA, message);
            }
            AIClientError::rate_limit(
                vendor_code.unwrap_or_else(|| RATE_LIMIT_EXCEEDED.to_string()),
                message,
                retry_after_from_headers(headers),
            )
        }
        400 => AIClientError::invalid_request(
            vendor_code.unwrap_or_else(|| INVALID_REQUEST.to_string()),
            message,
        ),
        402 => AIClientError::insufficient_quota(
            vendor_code.unwrap_or_else(|| INSUFFICIENT_QUOTA.to_string()),
            message,
        ),
        other => AIClientError::server(
            vendor_code.unwrap_or_else(|| format!("HTTP_{other}")),
            message,
        ),
    }
}

/// Returns the body text itself when it is short enough to be a useful message.
pub(crate) fn fallback_message(status: u16, body: &str) -> String {
    const MAX_LEN: usize = 512;
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return format!("status {status}");
    }
    let excerpt: String = trimmed.chars().take(MAX_LEN).collect();
    format!("status {status}: {excerpt}")
}
