//! Session Management
//!
//! This module implements session handling for the envelope API, including:
//! - JWT parsing (expiry extraction only, signatures are not checked)
//! - The persisted session record
//! - Token persistence and coalesced refresh (`TokenManager`)
//! - Re-authenticating operations (`AuthenticatedSession`)
//!
//! # Example
//!
//! ```rust
//! use api_client::session::PersistedSession;
//! use api_client::TokenGrant;
//!
//! let grant = TokenGrant {
//!     access_token: "opaque-token".to_string(),
//!     refresh_token: Some("refresh".to_string()),
//!     expires_in: Some(3600),
//!     expires_at: None,
//!     user: None,
//! };
//!
//! let session = PersistedSession::from_grant(grant, None);
//! assert!(session.expires_at.is_some());
//! ```

mod authenticated;
mod manager;

pub use authenticated::AuthenticatedSession;
pub use manager::{TokenManager, TokenManagerBuilder, TokenManagerConfig, SESSION_STORAGE_KEY};

use crate::auth_api::TokenGrant;
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{decode, decode_header, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use storage::StorageError;
use thiserror::Error;

/// Errors from session persistence
#[derive(Debug, Error)]
pub enum SessionError {
    /// No session is stored
    #[error("No active session")]
    NoSession,

    /// Storage backend failure
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// Session blob could not be encoded
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for session operations
pub type Result<T> = std::result::Result<T, SessionError>;

/// Session lifecycle events
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    /// A session was stored after sign-in
    Created,
    /// Tokens were renewed
    Refreshed,
    /// The refresh token was rejected and the session discarded
    Expired,
    /// The session was removed by sign-out
    Cleared,
}

/// Session event callback; the session is `None` once it is gone
pub type SessionCallback = Arc<dyn Fn(SessionEvent, Option<&PersistedSession>) + Send + Sync>;

/// Stored authentication state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedSession {
    /// Access token
    pub access_token: String,
    /// Refresh token
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    /// Access token expiry; `None` means it never expires
    #[serde(default, with = "chrono::serde::ts_seconds_option")]
    pub expires_at: Option<DateTime<Utc>>,
    /// User record as returned by the issuer
    #[serde(default)]
    pub user: serde_json::Value,
    /// Lifetime in seconds reported at issue time
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_in: Option<i64>,
}

impl PersistedSession {
    /// Build a session from a token grant
    ///
    /// Expiry comes from the grant's absolute `expires_at`, then its
    /// `expires_in`, then the access token's `exp` claim. Fields missing from a
    /// refresh grant (refresh token, user) are carried over from `previous`.
    pub fn from_grant(grant: TokenGrant, previous: Option<&PersistedSession>) -> Self {
        let expires_at = grant
            .expires_at
            .and_then(|at| DateTime::from_timestamp(at, 0))
            .or_else(|| {
                grant
                    .expires_in
                    .filter(|secs| *secs > 0)
                    .map(|secs| Utc::now() + Duration::seconds(secs))
            })
            .or_else(|| get_jwt_expiration(&grant.access_token));

        Self {
            refresh_token: grant
                .refresh_token
                .or_else(|| previous.and_then(|p| p.refresh_token.clone())),
            user: grant
                .user
                .or_else(|| previous.map(|p| p.user.clone()))
                .unwrap_or(serde_json::Value::Null),
            expires_in: grant.expires_in,
            access_token: grant.access_token,
            expires_at,
        }
    }

    /// Whether a refresh token is available
    pub fn can_refresh(&self) -> bool {
        self.refresh_token.as_deref().is_some_and(|t| !t.is_empty())
    }
}

/// JWT claims structure
///
/// This represents the decoded payload of a JWT token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JwtClaims {
    /// Subject (user id)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sub: Option<String>,

    /// Issued at timestamp
    #[serde(skip_serializing_if = "Option::is_none")]
    pub iat: Option<i64>,

    /// Expiration timestamp
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exp: Option<i64>,

    /// Role claim
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,

    /// Additional claims
    #[serde(flatten)]
    pub extra: serde_json::Value,
}

/// Parse JWT claims without validation
///
/// Used only to read the expiry; the signature is not verified.
pub fn parse_jwt_claims(token: &str) -> std::result::Result<JwtClaims, jsonwebtoken::errors::Error> {
    let header = decode_header(token)?;

    let mut validation = Validation::new(header.alg);
    validation.insecure_disable_signature_validation();
    validation.validate_exp = false;
    validation.validate_nbf = false;
    validation.validate_aud = false;
    validation.required_spec_claims.clear();

    let token_data = decode::<JwtClaims>(token, &DecodingKey::from_secret(&[]), &validation)?;

    Ok(token_data.claims)
}

/// Get the expiration time from a JWT token
///
/// Returns None if the token is not a JWT or has no `exp` claim.
pub fn get_jwt_expiration(token: &str) -> Option<DateTime<Utc>> {
    let claims = parse_jwt_claims(token).ok()?;
    claims.exp.and_then(|exp| DateTime::from_timestamp(exp, 0))
}

/// Whether `expires_at` falls within `lead` of now
///
/// `None` never expires.
pub fn expires_within(expires_at: Option<DateTime<Utc>>, lead: Duration) -> bool {
    match expires_at {
        Some(at) => at <= Utc::now() + lead,
        None => false,
    }
}

/// Check if a JWT token will expire within `lead`
///
/// A token without a readable `exp` claim is treated as non-expiring.
pub fn is_jwt_expiring_soon(token: &str, lead: Duration) -> bool {
    expires_within(get_jwt_expiration(token), lead)
}

#[cfg(test)]
pub(crate) mod test_tokens {
    use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
    use serde_json::json;

    /// HS256 token expiring `offset_secs` from now
    pub fn jwt_expiring_in(sub: &str, offset_secs: i64) -> String {
        let exp = chrono::Utc::now().timestamp() + offset_secs;
        encode(
            &Header::new(Algorithm::HS256),
            &json!({"sub": sub, "exp": exp, "role": "authenticated"}),
            &EncodingKey::from_secret(b"test_secret"),
        )
        .unwrap()
    }

    /// HS256 token without an `exp` claim
    pub fn jwt_without_exp(sub: &str) -> String {
        encode(
            &Header::new(Algorithm::HS256),
            &json!({"sub": sub}),
            &EncodingKey::from_secret(b"test_secret"),
        )
        .unwrap()
    }
}
