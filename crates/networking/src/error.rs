//! Error taxonomy for the network core
//!
//! Transient failures (network, timeout, 5xx) are retried and queued; auth
//! failures get one refresh-and-retry; session invalidation is terminal.

use std::time::Duration;
use storage::StorageError;
use thiserror::Error;

/// Errors reported by a `TokenProvider`
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TokenError {
    /// No session is stored
    #[error("No active session - please login first")]
    NoSession,

    /// The session has no refresh token
    #[error("No refresh token available")]
    MissingRefreshToken,

    /// The token issuer rejected the refresh token
    #[error("Token refresh rejected: {0}")]
    Rejected(String),

    /// The token issuer could not be reached
    #[error("Token service unavailable: {0}")]
    Unavailable(String),

    /// Persisting or loading the session failed
    #[error("Session storage error: {0}")]
    Storage(String),
}

impl TokenError {
    /// Whether the failure is presumed to succeed on a later attempt
    pub fn is_transient(&self) -> bool {
        matches!(self, TokenError::Unavailable(_))
    }
}

/// Errors surfaced by the HTTP client
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HttpClientError {
    /// Transport-level failure (unreachable host, connection reset)
    #[error("Network error: {0}")]
    Network(String),

    /// The request exceeded its deadline
    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    /// The server answered with a non-2xx status
    #[error("HTTP {status} {status_text}: {message}")]
    Http {
        /// HTTP status code
        status: u16,
        /// Canonical reason phrase
        status_text: String,
        /// Message extracted from the response body
        message: String,
        /// Raw response body, if any
        body: Option<String>,
    },

    /// The server revoked the session; never retried
    #[error("Session invalidated: {0}")]
    SessionInvalidated(String),

    /// Obtaining or refreshing the bearer token failed
    #[error("Token error: {0}")]
    Token(#[from] TokenError),

    /// The request could not be built
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// The response body could not be decoded
    #[error("Failed to decode response: {0}")]
    Decode(String),

    /// Offline queue or device id persistence failed
    #[error("Storage error: {0}")]
    Storage(String),

    /// Configuration could not be loaded
    #[error("Configuration error: {0}")]
    Config(String),
}

impl From<StorageError> for HttpClientError {
    fn from(err: StorageError) -> Self {
        HttpClientError::Storage(err.to_string())
    }
}

impl HttpClientError {
    /// Build an HTTP status error
    pub fn http(status: u16, message: impl Into<String>) -> Self {
        HttpClientError::Http {
            status,
            status_text: status_text(status),
            message: message.into(),
            body: None,
        }
    }

    /// HTTP status code, if the server answered
    pub fn status(&self) -> Option<u16> {
        match self {
            HttpClientError::Http { status, .. } => Some(*status),
            HttpClientError::SessionInvalidated(_) => Some(401),
            _ => None,
        }
    }

    /// Network failure or timeout
    pub fn is_network_error(&self) -> bool {
        matches!(self, HttpClientError::Network(_) | HttpClientError::Timeout(_))
    }

    /// HTTP 5xx
    pub fn is_server_error(&self) -> bool {
        matches!(self, HttpClientError::Http { status, .. } if (500..600).contains(status))
    }

    /// Failure presumed to succeed on retry without intervention
    ///
    /// Network errors, timeouts, 5xx, and an unreachable token issuer.
    pub fn is_transient(&self) -> bool {
        match self {
            HttpClientError::Token(token) => token.is_transient(),
            other => other.is_network_error() || other.is_server_error(),
        }
    }

    /// HTTP 401 that is not a session revocation
    pub fn is_auth_expired(&self) -> bool {
        matches!(self, HttpClientError::Http { status: 401, .. })
    }

    /// Authentication failure of any kind
    pub fn is_auth_error(&self) -> bool {
        self.is_auth_expired()
            || matches!(
                self,
                HttpClientError::Token(TokenError::Rejected(_))
                    | HttpClientError::Token(TokenError::MissingRefreshToken)
                    | HttpClientError::Token(TokenError::NoSession)
            )
    }

    /// Server-declared forced logout
    pub fn is_session_invalidated(&self) -> bool {
        matches!(self, HttpClientError::SessionInvalidated(_))
    }
}

/// Canonical reason phrase for a status code
pub fn status_text(status: u16) -> String {
    reqwest::StatusCode::from_u16(status)
        .ok()
        .and_then(|code| code.canonical_reason())
        .unwrap_or("Unknown")
        .to_string()
}

/// Result type for HTTP client operations
pub type Result<T> = std::result::Result<T, HttpClientError>;
