//! Bearer token source used by the HTTP client

use crate::error::TokenError;
use async_trait::async_trait;

/// Supplies and renews access tokens
///
/// Implementations must coalesce concurrent `refresh_token` calls into a
/// single upstream exchange.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TokenProvider: Send + Sync {
    /// Current access token, if signed in
    async fn get_token(&self) -> Result<Option<String>, TokenError>;

    /// Exchange the refresh token for a new access token
    async fn refresh_token(&self) -> Result<String, TokenError>;

    /// Whether `token` should be renewed before use
    fn is_token_expired(&self, token: &str) -> bool;
}

/// Current token, refreshed first when it has expired
pub async fn ensure_valid_token(
    provider: &dyn TokenProvider,
) -> Result<Option<String>, TokenError> {
    match provider.get_token().await? {
        Some(token) if provider.is_token_expired(&token) => {
            tracing::debug!("Access token expired, refreshing before request");
            provider.refresh_token().await.map(Some)
        }
        other => Ok(other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_valid_token_is_returned() {
        let mut provider = MockTokenProvider::new();
        provider
            .expect_get_token()
            .returning(|| Ok(Some("fresh".to_string())));
        provider.expect_is_token_expired().returning(|_| false);
        provider.expect_refresh_token().never();

        assert_eq!(ensure_valid_token(&provider).await.unwrap(), Some("fresh".to_string()));
    }

    #[tokio::test]
    async fn test_expired_token_is_refreshed() {
        let mut provider = MockTokenProvider::new();
        provider
            .expect_get_token()
            .returning(|| Ok(Some("stale".to_string())));
        provider
            .expect_is_token_expired()
            .withf(|token| token.to_string() == "stale")
            .returning(|_| true);
        provider
            .expect_refresh_token()
            .times(1)
            .returning(|| Ok("renewed".to_string()));

        assert_eq!(ensure_valid_token(&provider).await.unwrap(), Some("renewed".to_string()));
    }

    #[tokio::test]
    async fn test_signed_out_yields_none() {
        let mut provider = MockTokenProvider::new();
        provider.expect_get_token().returning(|| Ok(None));
        provider.expect_refresh_token().never();

        assert_eq!(ensure_valid_token(&provider).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_refresh_failure_propagates() {
        let mut provider = MockTokenProvider::new();
        provider
            .expect_get_token()
            .returning(|| Ok(Some("stale".to_string())));
        provider.expect_is_token_expired().returning(|_| true);
        provider
            .expect_refresh_token()
            .returning(|| Err(TokenError::Rejected("invalid grant".to_string())));

        let err = ensure_valid_token(&provider).await.unwrap_err();
        assert_eq!(err, TokenError::Rejected("invalid grant".to_string()));
    }
}
