//! Token Manager
//!
//! Owns the single persisted session: loads it from storage at construction,
//! writes it back as one blob on every change, and renews it through a
//! [`TokenRefresher`]. Concurrent refreshes are serialized behind an async
//! mutex; a caller that was waiting on an in-flight refresh reuses its result.
//!
//! # Example
//!
//! ```rust,no_run
//! use api_client::session::TokenManager;
//! use api_client::{AuthApi, AuthApiConfig};
//! use std::sync::Arc;
//! use storage::MemoryStorage;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let auth = AuthApi::new(AuthApiConfig::new("https://auth.example.com/auth/v1", "anon"))?;
//!     let tokens = TokenManager::builder(Arc::new(MemoryStorage::new()), Arc::new(auth))
//!         .build()
//!         .await?;
//!
//!     println!("signed in: {}", tokens.has_session().await);
//!     Ok(())
//! }
//! ```

use super::{
    expires_within, is_jwt_expiring_soon, PersistedSession, Result, SessionCallback, SessionEvent,
};
use crate::auth_api::{TokenGrant, TokenRefresher};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use networking::{TokenError, TokenProvider};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use storage::SharedStorage;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

/// Storage key of the session blob
pub const SESSION_STORAGE_KEY: &str = "auth_session";

/// Token manager settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TokenManagerConfig {
    /// Storage key of the session blob
    pub storage_key: String,
    /// Seconds before expiry at which a token counts as expired
    pub refresh_lead_secs: i64,
}

impl Default for TokenManagerConfig {
    fn default() -> Self {
        Self {
            storage_key: SESSION_STORAGE_KEY.to_string(),
            refresh_lead_secs: 60,
        }
    }
}

impl TokenManagerConfig {
    /// Override the storage key
    pub fn with_storage_key(mut self, key: impl Into<String>) -> Self {
        self.storage_key = key.into();
        self
    }

    /// Override the refresh lead time
    pub fn with_refresh_lead_secs(mut self, secs: i64) -> Self {
        self.refresh_lead_secs = secs.max(0);
        self
    }
}

/// Builder for [`TokenManager`]
pub struct TokenManagerBuilder {
    storage: SharedStorage,
    refresher: Arc<dyn TokenRefresher>,
    config: TokenManagerConfig,
    callbacks: Vec<SessionCallback>,
}

impl TokenManagerBuilder {
    /// Use explicit settings
    pub fn config(mut self, config: TokenManagerConfig) -> Self {
        self.config = config;
        self
    }

    /// Register a session event callback
    pub fn on_session_event(mut self, callback: SessionCallback) -> Self {
        self.callbacks.push(callback);
        self
    }

    /// Load any stored session and build the manager
    ///
    /// A stored blob that cannot be read back or parsed is removed.
    pub async fn build(self) -> Result<TokenManager> {
        let key = &self.config.storage_key;
        let loaded = match self.storage.get_item(key).await {
            Ok(None) => Ok(None),
            Ok(Some(raw)) => serde_json::from_str::<PersistedSession>(&raw)
                .map(Some)
                .map_err(|e| e.to_string()),
            Err(e) if e.is_unreadable() => Err(e.to_string()),
            Err(e) => return Err(e.into()),
        };
        let session = match loaded {
            Ok(Some(session)) => {
                debug!(expires_at = ?session.expires_at, "Restored stored session");
                Some(session)
            }
            Ok(None) => None,
            Err(reason) => {
                warn!(error = %reason, "Discarding unreadable stored session");
                self.storage.remove_item(key).await?;
                None
            }
        };

        Ok(TokenManager {
            storage: self.storage,
            refresher: self.refresher,
            config: self.config,
            callbacks: self.callbacks,
            session: RwLock::new(session),
            refresh_lock: Mutex::new(()),
            write_lock: Mutex::new(()),
        })
    }
}

/// Persisted session owner and [`TokenProvider`] implementation
pub struct TokenManager {
    storage: SharedStorage,
    refresher: Arc<dyn TokenRefresher>,
    config: TokenManagerConfig,
    callbacks: Vec<SessionCallback>,
    session: RwLock<Option<PersistedSession>>,
    refresh_lock: Mutex<()>,
    write_lock: Mutex<()>,
}

impl std::fmt::Debug for TokenManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenManager")
            .field("config", &self.config)
            .field("callbacks", &self.callbacks.len())
            .finish_non_exhaustive()
    }
}

impl TokenManager {
    /// Start building a manager over `storage`
    pub fn builder(storage: SharedStorage, refresher: Arc<dyn TokenRefresher>) -> TokenManagerBuilder {
        TokenManagerBuilder {
            storage,
            refresher,
            config: TokenManagerConfig::default(),
            callbacks: Vec::new(),
        }
    }

    /// Settings
    pub fn config(&self) -> &TokenManagerConfig {
        &self.config
    }

    /// Lead time before expiry at which tokens are renewed
    pub fn refresh_lead(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.config.refresh_lead_secs)
    }

    /// Snapshot of the current session
    pub async fn current_session(&self) -> Option<PersistedSession> {
        self.session.read().await.clone()
    }

    /// Whether a session is held
    pub async fn has_session(&self) -> bool {
        self.session.read().await.is_some()
    }

    /// Whether a token expiring at `expires_at` is due for renewal
    ///
    /// `None` never expires.
    pub fn needs_refresh(&self, expires_at: Option<DateTime<Utc>>) -> bool {
        expires_within(expires_at, self.refresh_lead())
    }

    /// Store a freshly created session, replacing any previous one
    pub async fn save_tokens(&self, session: PersistedSession) -> Result<()> {
        self.persist(&session).await?;
        info!(expires_at = ?session.expires_at, "Session stored");
        self.emit(SessionEvent::Created, Some(&session));
        Ok(())
    }

    /// Store the session described by a sign-in grant
    pub async fn save_grant(&self, grant: TokenGrant) -> Result<PersistedSession> {
        let session = PersistedSession::from_grant(grant, None);
        self.save_tokens(session.clone()).await?;
        Ok(session)
    }

    /// Remove the session from memory and storage
    pub async fn clear_tokens(&self) -> Result<()> {
        self.remove().await?;
        info!("Session cleared");
        self.emit(SessionEvent::Cleared, None);
        Ok(())
    }

    /// Renew the session
    ///
    /// A caller that waited on a refresh already performed by someone else
    /// gets that result without contacting the issuer again. A rejected
    /// refresh token discards the session.
    pub async fn refresh(&self) -> std::result::Result<PersistedSession, TokenError> {
        let stale = self
            .session
            .read()
            .await
            .as_ref()
            .map(|s| s.access_token.clone());

        let _guard = self.refresh_lock.lock().await;

        let current = self.current_session().await.ok_or(TokenError::NoSession)?;
        if stale.as_deref() != Some(current.access_token.as_str()) {
            debug!("Session was renewed while waiting, reusing it");
            return Ok(current);
        }

        let refresh_token = current
            .refresh_token
            .clone()
            .filter(|t| !t.is_empty())
            .ok_or(TokenError::MissingRefreshToken)?;

        match self.refresher.refresh(&refresh_token).await {
            Ok(grant) => {
                let session = PersistedSession::from_grant(grant, Some(&current));
                self.persist(&session)
                    .await
                    .map_err(|e| TokenError::Storage(e.to_string()))?;
                info!(expires_at = ?session.expires_at, "Session refreshed");
                self.emit(SessionEvent::Refreshed, Some(&session));
                Ok(session)
            }
            Err(TokenError::Rejected(reason)) => {
                warn!(%reason, "Refresh token rejected, discarding session");
                if let Err(e) = self.remove().await {
                    warn!(error = %e, "Failed to remove rejected session");
                }
                self.emit(SessionEvent::Expired, None);
                Err(TokenError::Rejected(reason))
            }
            Err(e) => {
                warn!(error = %e, "Session refresh failed");
                Err(e)
            }
        }
    }

    // Writers are ordered by `write_lock`; the session lock is only held for
    // the in-memory swap so readers never wait on storage.
    async fn persist(&self, session: &PersistedSession) -> Result<()> {
        let raw = serde_json::to_string(session)?;
        let _writing = self.write_lock.lock().await;
        self.storage.set_item(&self.config.storage_key, &raw).await?;
        *self.session.write().await = Some(session.clone());
        Ok(())
    }

    async fn remove(&self) -> Result<()> {
        let _writing = self.write_lock.lock().await;
        *self.session.write().await = None;
        self.storage.remove_item(&self.config.storage_key).await?;
        Ok(())
    }

    fn emit(&self, event: SessionEvent, session: Option<&PersistedSession>) {
        for callback in &self.callbacks {
            callback(event, session);
        }
    }
}

#[async_trait]
impl TokenProvider for TokenManager {
    async fn get_token(&self) -> std::result::Result<Option<String>, TokenError> {
        Ok(self
            .session
            .read()
            .await
            .as_ref()
            .map(|s| s.access_token.clone()))
    }

    async fn refresh_token(&self) -> std::result::Result<String, TokenError> {
        self.refresh().await.map(|session| session.access_token)
    }

    fn is_token_expired(&self, token: &str) -> bool {
        if let Ok(guard) = self.session.try_read() {
            if let Some(session) = guard.as_ref().filter(|s| s.access_token == token) {
                return self.needs_refresh(session.expires_at);
            }
        }
        is_jwt_expiring_soon(token, self.refresh_lead())
    }
}
