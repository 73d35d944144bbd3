//! Resilient HTTP plumbing for the envelope budgeting client
//!
//! This crate provides the request pipeline: transient retry with backoff,
//! bearer token refresh on 401, server-driven session invalidation, and a
//! persisted offline queue that is replayed when connectivity returns.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod client;
pub mod config;
pub mod connectivity;
pub mod device;
pub mod error;
pub mod events;
pub mod offline_queue;
pub mod request;
pub mod response;
pub mod retry;
#[cfg(any(test, feature = "test-utils"))]
pub mod testing;
pub mod token;
pub mod transport;

pub use client::{HttpClient, HttpClientBuilder};
pub use config::ClientConfig;
pub use connectivity::NetworkState;
pub use device::{DeviceIdentityProvider, PersistentDeviceId, StaticDeviceId};
pub use error::{HttpClientError, Result, TokenError};
pub use events::{ClientEvent, EventBus, EventKind, ListenerId};
pub use offline_queue::{DrainReport, OfflineQueue, OfflineQueueConfig, QueuedRequest};
pub use request::{HttpMethod, RequestBody, RequestSpec};
pub use response::{ApiResponse, TransportResponse};
pub use retry::{BackoffKind, RetryOptions, RetryPolicy};
pub use token::TokenProvider;
pub use transport::{PreparedRequest, ReqwestTransport, Transport, TransportClient};
