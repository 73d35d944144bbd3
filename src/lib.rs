//! Envelope client
//!
//! Resilient network core for the envelope-budgeting API. The pieces live in
//! the workspace crates and are re-exported here:
//!
//! - [`storage`]: offline key/value persistence backends
//! - [`networking`]: retrying HTTP client with offline queue and events
//! - [`api_client`]: session management, token issuer client and [`ApiAgent`]

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod telemetry;

pub use api_client::{
    self, AgentConfig, ApiAgent, ApiError, AuthApiConfig, AuthenticatedSession, PersistedSession,
    SessionEvent, TokenManager,
};
pub use networking::{
    self, ClientConfig, ClientEvent, EventKind, HttpClient, HttpClientError, NetworkState,
    OfflineQueueConfig, RequestSpec, RetryOptions,
};
pub use storage::{self, FileStorage, MemoryStorage, OfflineStorage, SharedStorage, SledStorage};
