//! Token issuer client
//!
//! Talks to the authentication service directly over `reqwest`: password
//! sign-in, refresh-token exchange and sign-out. Every call carries the
//! project `apikey` header.

use crate::{ApiError, Result};
use async_trait::async_trait;
use networking::{HttpClientError, TokenError};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Token issuer settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthApiConfig {
    /// Base URL of the auth service, e.g. `https://x.example.com/auth/v1`
    pub auth_url: String,
    /// Public API key sent as the `apikey` header
    pub api_key: String,
    /// Request timeout in milliseconds
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_timeout_ms() -> u64 {
    15_000
}

impl AuthApiConfig {
    /// Create settings for an auth service
    pub fn new(auth_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            auth_url: auth_url.into(),
            api_key: api_key.into(),
            timeout_ms: default_timeout_ms(),
        }
    }
}

/// Tokens issued by sign-in or refresh
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenGrant {
    /// Access token
    pub access_token: String,
    /// Refresh token
    #[serde(default)]
    pub refresh_token: Option<String>,
    /// Lifetime of the access token in seconds
    #[serde(default)]
    pub expires_in: Option<i64>,
    /// Absolute expiry as a unix timestamp
    #[serde(default)]
    pub expires_at: Option<i64>,
    /// User record
    #[serde(default)]
    pub user: Option<serde_json::Value>,
}

/// Exchanges a refresh token for new tokens
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TokenRefresher: Send + Sync {
    /// Perform the exchange
    ///
    /// A rejected refresh token is `TokenError::Rejected`; an unreachable
    /// issuer is `TokenError::Unavailable`.
    async fn refresh(&self, refresh_token: &str) -> std::result::Result<TokenGrant, TokenError>;
}

#[derive(Serialize)]
struct PasswordGrant<'a> {
    email: &'a str,
    password: &'a str,
}

#[derive(Serialize)]
struct RefreshGrant<'a> {
    refresh_token: &'a str,
}

/// Client for the token issuer
#[derive(Debug, Clone)]
pub struct AuthApi {
    http: reqwest::Client,
    config: AuthApiConfig,
}

impl AuthApi {
    /// Create a client
    pub fn new(config: AuthApiConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| ApiError::InvalidInput(format!("Failed to build auth client: {}", e)))?;

        Ok(Self { http, config })
    }

    /// Settings
    pub fn config(&self) -> &AuthApiConfig {
        &self.config
    }

    fn network_error(&self, e: reqwest::Error) -> ApiError {
        if e.is_timeout() {
            HttpClientError::Timeout(Duration::from_millis(self.config.timeout_ms)).into()
        } else {
            HttpClientError::Network(e.to_string()).into()
        }
    }

    fn token_url(&self, grant_type: &str) -> String {
        format!(
            "{}/token?grant_type={}",
            self.config.auth_url.trim_end_matches('/'),
            grant_type
        )
    }

    /// Sign in with email and password
    pub async fn sign_in_with_password(&self, email: &str, password: &str) -> Result<TokenGrant> {
        if email.trim().is_empty() || password.is_empty() {
            return Err(ApiError::InvalidInput("email and password are required".to_string()));
        }

        let response = self
            .http
            .post(self.token_url("password"))
            .header("apikey", &self.config.api_key)
            .json(&PasswordGrant { email, password })
            .send()
            .await
            .map_err(|e| self.network_error(e))?;

        let status = response.status().as_u16();
        let body = response.text().await.map_err(|e| self.network_error(e))?;

        match status {
            200..=299 => {
                info!("Signed in with password");
                parse_grant(&body).map_err(ApiError::from)
            }
            400 | 401 | 422 => Err(ApiError::Auth(error_message(&body, status))),
            _ => Err(HttpClientError::http(status, error_message(&body, status)).into()),
        }
    }

    /// Exchange a refresh token
    pub async fn refresh(&self, refresh_token: &str) -> std::result::Result<TokenGrant, TokenError> {
        let response = self
            .http
            .post(self.token_url("refresh_token"))
            .header("apikey", &self.config.api_key)
            .json(&RefreshGrant { refresh_token })
            .send()
            .await
            .map_err(|e| TokenError::Unavailable(e.to_string()))?;

        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| TokenError::Unavailable(e.to_string()))?;

        match status {
            200..=299 => {
                debug!("Refresh token exchanged");
                parse_grant(&body)
            }
            400 | 401 => Err(TokenError::Rejected(error_message(&body, status))),
            _ => Err(TokenError::Unavailable(format!(
                "HTTP {}: {}",
                status,
                error_message(&body, status)
            ))),
        }
    }

    /// Revoke the session on the server
    pub async fn sign_out(&self, access_token: &str) -> Result<()> {
        let url = format!("{}/logout", self.config.auth_url.trim_end_matches('/'));
        let response = self
            .http
            .post(url)
            .header("apikey", &self.config.api_key)
            .bearer_auth(access_token)
            .send()
            .await
            .map_err(|e| self.network_error(e))?;

        let status = response.status().as_u16();
        if (200..300).contains(&status) {
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        warn!(status, "Remote sign-out failed");
        Err(HttpClientError::http(status, error_message(&body, status)).into())
    }
}

#[async_trait]
impl TokenRefresher for AuthApi {
    async fn refresh(&self, refresh_token: &str) -> std::result::Result<TokenGrant, TokenError> {
        AuthApi::refresh(self, refresh_token).await
    }
}

fn parse_grant(body: &str) -> std::result::Result<TokenGrant, TokenError> {
    serde_json::from_str(body)
        .map_err(|e| TokenError::Unavailable(format!("Malformed token response: {}", e)))
}

fn error_message(body: &str, status: u16) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| {
            ["error_description", "msg", "message", "error"]
                .iter()
                .find_map(|field| v.get(*field).and_then(|m| m.as_str()).map(str::to_string))
        })
        .unwrap_or_else(|| format!("HTTP {}", status))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn api(server: &MockServer) -> AuthApi {
        AuthApi::new(AuthApiConfig::new(format!("{}/auth/v1", server.uri()), "anon-key")).unwrap()
    }

    fn grant_body() -> serde_json::Value {
        json!({
            "access_token": "access-1",
            "token_type": "bearer",
            "expires_in": 3600,
            "expires_at": 1_900_000_000,
            "refresh_token": "refresh-1",
            "user": {"id": "u1", "email": "a@b.c"}
        })
    }

    #[tokio::test]
    async fn test_sign_in_with_password() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/auth/v1/token"))
            .and(query_param("grant_type", "password"))
            .and(header("apikey", "anon-key"))
            .and(body_json(json!({"email": "a@b.c", "password": "secret"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(grant_body()))
            .expect(1)
            .mount(&server)
            .await;

        let grant = api(&server).sign_in_with_password("a@b.c", "secret").await.unwrap();

        assert_eq!(grant.access_token, "access-1");
        assert_eq!(grant.refresh_token.as_deref(), Some("refresh-1"));
        assert_eq!(grant.expires_in, Some(3600));
        assert_eq!(grant.user.unwrap()["id"], "u1");
    }

    #[tokio::test]
    async fn test_sign_in_invalid_credentials() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/auth/v1/token"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "error": "invalid_grant",
                "error_description": "Invalid login credentials"
            })))
            .mount(&server)
            .await;

        let err = api(&server).sign_in_with_password("a@b.c", "wrong").await.unwrap_err();
        match err {
            ApiError::Auth(message) => assert_eq!(message, "Invalid login credentials"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_sign_in_requires_credentials() {
        let server = MockServer::start().await;
        let err = api(&server).sign_in_with_password("", "x").await.unwrap_err();
        assert!(matches!(err, ApiError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn test_refresh() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/auth/v1/token"))
            .and(query_param("grant_type", "refresh_token"))
            .and(body_json(json!({"refresh_token": "refresh-1"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(grant_body()))
            .expect(1)
            .mount(&server)
            .await;

        let grant = api(&server).refresh("refresh-1").await.unwrap();
        assert_eq!(grant.access_token, "access-1");
    }

    #[tokio::test]
    async fn test_refresh_rejected() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/auth/v1/token"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "error_description": "Invalid Refresh Token: Already Used"
            })))
            .mount(&server)
            .await;

        let err = api(&server).refresh("used").await.unwrap_err();
        assert_eq!(
            err,
            TokenError::Rejected("Invalid Refresh Token: Already Used".to_string())
        );
    }

    #[tokio::test]
    async fn test_refresh_server_error_is_unavailable() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/auth/v1/token"))
            .respond_with(ResponseTemplate::new(502))
            .mount(&server)
            .await;

        let err = api(&server).refresh("refresh-1").await.unwrap_err();
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn test_refresh_unreachable_is_unavailable() {
        let api = AuthApi::new(AuthApiConfig::new("http://127.0.0.1:1", "k")).unwrap();
        let err = api.refresh("refresh-1").await.unwrap_err();
        assert!(matches!(err, TokenError::Unavailable(_)));
    }

    #[tokio::test]
    async fn test_sign_out() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/auth/v1/logout"))
            .and(header("authorization", "Bearer access-1"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        api(&server).sign_out("access-1").await.unwrap();
    }
}
