//! Operations that need a signed-in session

use super::{PersistedSession, TokenManager};
use crate::{ApiError, Result};
use networking::{HttpClient, TokenError};
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, warn};

/// HTTP client paired with the session that authorizes it
#[derive(Debug, Clone)]
pub struct AuthenticatedSession {
    tokens: Arc<TokenManager>,
    client: HttpClient,
}

impl AuthenticatedSession {
    /// Pair a token manager with a client that uses it as token provider
    pub fn new(tokens: Arc<TokenManager>, client: HttpClient) -> Self {
        Self { tokens, client }
    }

    /// Token manager
    pub fn tokens(&self) -> &Arc<TokenManager> {
        &self.tokens
    }

    /// HTTP client
    pub fn client(&self) -> &HttpClient {
        &self.client
    }

    /// Current session, renewed first if it is about to expire
    pub async fn ensure_valid_session(&self) -> Result<PersistedSession> {
        let session = self
            .tokens
            .current_session()
            .await
            .ok_or(TokenError::NoSession)?;

        if self.tokens.needs_refresh(session.expires_at) {
            debug!("Session expiring, refreshing before operation");
            return Ok(self.tokens.refresh().await?);
        }

        Ok(session)
    }

    /// Run `operation`, retrying it once after a forced refresh if it fails
    /// with an auth error
    ///
    /// When the forced refresh itself fails the operation's error is returned.
    pub async fn with_auth<T, F, Fut>(&self, mut operation: F) -> Result<T>
    where
        F: FnMut(HttpClient) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.ensure_valid_session().await?;

        match operation(self.client.clone()).await {
            Err(err) if err.is_auth_error() => {
                debug!("Operation unauthorized, refreshing session and retrying once");
                if let Err(refresh_err) = self.tokens.refresh().await {
                    warn!(error = %refresh_err, "Forced refresh failed");
                    return Err(err);
                }
                operation(self.client.clone()).await
            }
            other => other,
        }
    }

    /// Run an operation that goes through the paired [`HttpClient`]
    ///
    /// The client already refreshes and resends once on a 401, so the
    /// operation runs a single time here. Use [`Self::with_auth`] for
    /// operations that reach the server some other way.
    pub async fn request<T, F, Fut>(&self, operation: F) -> Result<T>
    where
        F: FnOnce(HttpClient) -> Fut,
        Fut: Future<Output = networking::Result<T>>,
    {
        self.ensure_valid_session().await?;
        operation(self.client.clone()).await.map_err(ApiError::from)
    }
}
