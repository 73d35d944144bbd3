//! Envelope API client
//!
//! Session management on top of the `networking` request pipeline:
//! persisted tokens with coalesced refresh, the token issuer client, and a
//! high-level agent that wires storage, tokens and the HTTP client together.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod agent;
pub mod auth_api;
pub mod session;

pub use agent::{AgentConfig, ApiAgent, ApiAgentBuilder};
pub use auth_api::{AuthApi, AuthApiConfig, TokenGrant, TokenRefresher};
pub use session::{
    AuthenticatedSession, PersistedSession, SessionCallback, SessionError, SessionEvent,
    TokenManager, TokenManagerConfig,
};

use networking::{HttpClientError, TokenError};
use storage::StorageError;

/// Result type for API client operations
pub type Result<T> = std::result::Result<T, ApiError>;

/// Error types for API client operations
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Request pipeline error
    #[error(transparent)]
    Http(#[from] HttpClientError),

    /// Token error
    #[error(transparent)]
    Token(#[from] TokenError),

    /// Storage error
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// Session persistence error
    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    /// Authentication error
    #[error("Authentication error: {0}")]
    Auth(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl ApiError {
    /// HTTP 401 from the API
    pub fn is_auth_error(&self) -> bool {
        match self {
            ApiError::Http(err) => err.is_auth_expired(),
            _ => false,
        }
    }

    /// Server-declared forced logout
    pub fn is_session_invalidated(&self) -> bool {
        matches!(self, ApiError::Http(err) if err.is_session_invalidated())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_types() {
        let err = ApiError::InvalidInput("test".to_string());
        assert!(err.to_string().contains("Invalid input"));

        let err = ApiError::from(HttpClientError::http(401, "expired"));
        assert!(err.is_auth_error());
        assert!(err.to_string().contains("401"));

        let err = ApiError::from(TokenError::NoSession);
        assert!(!err.is_auth_error());
    }

    #[test]
    fn test_session_error_conversion() {
        let err = ApiError::from(SessionError::NoSession);
        assert_eq!(err.to_string(), "Session error: No active session");
    }

    #[test]
    fn test_session_invalidated() {
        let err = ApiError::from(HttpClientError::SessionInvalidated("elsewhere".to_string()));
        assert!(err.is_session_invalidated());
        assert!(!err.is_auth_error());
    }
}
