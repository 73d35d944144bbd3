//! ApiAgent - Main client for the envelope API
//!
//! The agent wires one storage backend into everything that persists state:
//! the session (through [`TokenManager`]), the offline queue and the device
//! id (through [`HttpClient`]). It signs in against the token issuer and
//! hands out an [`AuthenticatedSession`] for API calls.
//!
//! # Example
//!
//! ```rust,no_run
//! use api_client::{AgentConfig, ApiAgent, AuthApiConfig};
//! use networking::ClientConfig;
//! use std::sync::Arc;
//! use storage::{FileStorage, FileStorageConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let storage = Arc::new(FileStorage::open(FileStorageConfig::new("./state")).await?);
//!     let config = AgentConfig::new(
//!         ClientConfig::new("https://project.example.com/rest/v1"),
//!         AuthApiConfig::new("https://project.example.com/auth/v1", "anon-key"),
//!     );
//!
//!     let agent = ApiAgent::builder(config, storage).build().await?;
//!     agent.login("alice@example.com", "password").await?;
//!
//!     let budgets: serde_json::Value = agent
//!         .authenticated()
//!         .request(|client| async move { client.get::<serde_json::Value>("/budgets").await })
//!         .await?
//!         .data;
//!     println!("{budgets}");
//!
//!     Ok(())
//! }
//! ```

use crate::auth_api::{AuthApi, AuthApiConfig};
use crate::session::{
    AuthenticatedSession, PersistedSession, SessionCallback, TokenManager, TokenManagerConfig,
};
use crate::Result;
use networking::{ClientConfig, DeviceIdentityProvider, DrainReport, HttpClient, Transport};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use storage::SharedStorage;
use tracing::{info, warn};

/// Everything needed to build an [`ApiAgent`]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentConfig {
    /// API client settings
    pub client: ClientConfig,
    /// Token issuer settings
    pub auth: AuthApiConfig,
    /// Session persistence settings
    #[serde(default)]
    pub session: TokenManagerConfig,
}

impl AgentConfig {
    /// Settings with default session persistence
    pub fn new(client: ClientConfig, auth: AuthApiConfig) -> Self {
        Self {
            client,
            auth,
            session: TokenManagerConfig::default(),
        }
    }

    /// Override session persistence
    pub fn with_session(mut self, session: TokenManagerConfig) -> Self {
        self.session = session;
        self
    }

    /// Parse from JSON
    pub fn from_json_str(json: &str) -> Result<Self> {
        serde_json::from_str(json)
            .map_err(|e| crate::ApiError::InvalidInput(format!("Invalid agent config: {}", e)))
    }
}

/// Builder for [`ApiAgent`]
pub struct ApiAgentBuilder {
    config: AgentConfig,
    storage: SharedStorage,
    transport: Option<Arc<dyn Transport>>,
    device: Option<Arc<dyn DeviceIdentityProvider>>,
    callbacks: Vec<SessionCallback>,
}

impl ApiAgentBuilder {
    /// Use a specific HTTP transport for API calls
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Use a specific device identity
    pub fn device_identity(mut self, device: Arc<dyn DeviceIdentityProvider>) -> Self {
        self.device = Some(device);
        self
    }

    /// Register a session event callback
    pub fn on_session_event(mut self, callback: SessionCallback) -> Self {
        self.callbacks.push(callback);
        self
    }

    /// Restore any stored session and assemble the agent
    pub async fn build(self) -> Result<ApiAgent> {
        let auth = Arc::new(AuthApi::new(self.config.auth.clone())?);

        let mut tokens = TokenManager::builder(self.storage.clone(), auth.clone())
            .config(self.config.session.clone());
        for callback in self.callbacks {
            tokens = tokens.on_session_event(callback);
        }
        let tokens = Arc::new(tokens.build().await?);

        let client_config = self
            .config
            .client
            .clone()
            .with_header("apikey", self.config.auth.api_key.clone());

        let mut client = HttpClient::builder(client_config)
            .storage(self.storage)
            .token_provider(tokens.clone());
        if let Some(transport) = self.transport {
            client = client.transport(transport);
        }
        if let Some(device) = self.device {
            client = client.device_identity(device);
        }
        let client = client.build().await?;

        Ok(ApiAgent {
            auth,
            session: AuthenticatedSession::new(tokens, client),
        })
    }
}

/// Signed-in access to the envelope API
#[derive(Debug, Clone)]
pub struct ApiAgent {
    auth: Arc<AuthApi>,
    session: AuthenticatedSession,
}

impl ApiAgent {
    /// Start building an agent over `storage`
    pub fn builder(config: AgentConfig, storage: SharedStorage) -> ApiAgentBuilder {
        ApiAgentBuilder {
            config,
            storage,
            transport: None,
            device: None,
            callbacks: Vec::new(),
        }
    }

    /// Sign in and store the new session
    pub async fn login(&self, email: &str, password: &str) -> Result<PersistedSession> {
        let grant = self.auth.sign_in_with_password(email, password).await?;
        let session = self.tokens().save_grant(grant).await?;
        info!("Logged in");
        Ok(session)
    }

    /// Sign out
    ///
    /// The server-side sign-out is best effort; the local session is always
    /// removed.
    pub async fn logout(&self) -> Result<()> {
        if let Some(session) = self.tokens().current_session().await {
            if let Err(e) = self.auth.sign_out(&session.access_token).await {
                warn!(error = %e, "Remote sign-out failed, clearing local session anyway");
            }
        }
        self.tokens().clear_tokens().await?;
        Ok(())
    }

    /// Current session, if signed in
    pub async fn session(&self) -> Option<PersistedSession> {
        self.tokens().current_session().await
    }

    /// Whether a session is held
    pub async fn is_authenticated(&self) -> bool {
        self.tokens().has_session().await
    }

    /// HTTP client
    pub fn client(&self) -> &HttpClient {
        self.session.client()
    }

    /// Session-aware wrapper around the client
    pub fn authenticated(&self) -> &AuthenticatedSession {
        &self.session
    }

    /// Token manager
    pub fn tokens(&self) -> &Arc<TokenManager> {
        self.session.tokens()
    }

    /// Token issuer client
    pub fn auth(&self) -> &AuthApi {
        &self.auth
    }

    /// Replay requests queued while offline
    pub async fn process_offline_queue(&self) -> Result<DrainReport> {
        Ok(self.client().process_offline_queue().await?)
    }
}
