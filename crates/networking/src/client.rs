//! Resilient HTTP client
//!
//! Layers, outermost first:
//!
//! 1. transient retry with backoff (network errors, timeouts, 5xx)
//! 2. one token refresh and resend on 401
//! 3. a single exchange through the transport
//!
//! A request that still fails transiently after the retry budget is stored
//! in the offline queue before its error is returned.

use crate::config::ClientConfig;
use crate::connectivity::NetworkState;
use crate::device::{DeviceIdentityProvider, PersistentDeviceId, StaticDeviceId};
use crate::error::{HttpClientError, Result};
use crate::events::{ClientEvent, EventBus, EventKind, ListenerId};
use crate::offline_queue::{DrainReport, OfflineQueue};
use crate::request::{HttpMethod, RequestSpec};
use crate::response::{ApiResponse, TransportResponse};
use crate::retry::{RetryOptions, RetryPolicy};
use crate::token::{ensure_valid_token, TokenProvider};
use crate::transport::{ReqwestTransport, Transport, TransportClient};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use storage::{MemoryStorage, SharedStorage};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

struct ClientInner {
    config: ClientConfig,
    transport: TransportClient,
    retry: RetryPolicy,
    tokens: Option<Arc<dyn TokenProvider>>,
    queue: Arc<OfflineQueue>,
    events: Arc<EventBus>,
}

/// HTTP client with retry, auth refresh and offline queueing
///
/// Cheap to clone; clones share the queue, listeners and token provider.
#[derive(Clone)]
pub struct HttpClient {
    inner: Arc<ClientInner>,
}

impl std::fmt::Debug for HttpClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpClient")
            .field("base_url", &self.inner.config.base_url)
            .field("authenticated", &self.inner.tokens.is_some())
            .finish()
    }
}

/// Assembles an [`HttpClient`]
pub struct HttpClientBuilder {
    config: ClientConfig,
    transport: Option<Arc<dyn Transport>>,
    tokens: Option<Arc<dyn TokenProvider>>,
    storage: Option<SharedStorage>,
    device: Option<Arc<dyn DeviceIdentityProvider>>,
    events: Option<Arc<EventBus>>,
}

impl HttpClientBuilder {
    /// Start from a configuration
    pub fn new(config: ClientConfig) -> Self {
        Self {
            config,
            transport: None,
            tokens: None,
            storage: None,
            device: None,
            events: None,
        }
    }

    /// Use a custom transport instead of `reqwest`
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Attach bearer tokens to requests
    pub fn token_provider(mut self, tokens: Arc<dyn TokenProvider>) -> Self {
        self.tokens = Some(tokens);
        self
    }

    /// Persist the offline queue and device id here
    pub fn storage(mut self, storage: SharedStorage) -> Self {
        self.storage = Some(storage);
        self
    }

    /// Supply the device identifier
    pub fn device_identity(mut self, device: Arc<dyn DeviceIdentityProvider>) -> Self {
        self.device = Some(device);
        self
    }

    /// Share an event bus with other components
    pub fn events(mut self, events: Arc<EventBus>) -> Self {
        self.events = Some(events);
        self
    }

    /// Build the client, restoring any persisted offline queue
    pub async fn build(self) -> Result<HttpClient> {
        let config = self.config;

        let transport = match self.transport {
            Some(transport) => transport,
            None => Arc::new(ReqwestTransport::new(&config.user_agent)?),
        };

        let storage: SharedStorage = match self.storage {
            Some(storage) => storage,
            None => {
                if config.offline_queue.enabled {
                    warn!("No storage configured, offline queue will not survive restarts");
                }
                Arc::new(MemoryStorage::new())
            }
        };

        let device: Arc<dyn DeviceIdentityProvider> = match (self.device, &config.device_id) {
            (Some(device), _) => device,
            (None, Some(id)) => Arc::new(StaticDeviceId::new(id.clone())),
            (None, None) => Arc::new(PersistentDeviceId::new(storage.clone())),
        };

        let events = self.events.unwrap_or_default();
        let queue = Arc::new(
            OfflineQueue::open(config.offline_queue.clone(), storage, events.clone()).await?,
        );

        let transport = TransportClient::new(
            transport,
            config.base_url.clone(),
            config.default_headers.clone(),
            config.timeout,
            device,
        );

        debug!(base_url = %config.base_url, "HTTP client ready");

        Ok(HttpClient {
            inner: Arc::new(ClientInner {
                retry: RetryPolicy::new(config.retry.clone()),
                config,
                transport,
                tokens: self.tokens,
                queue,
                events,
            }),
        })
    }
}

impl HttpClient {
    /// Start building a client
    pub fn builder(config: ClientConfig) -> HttpClientBuilder {
        HttpClientBuilder::new(config)
    }

    /// Client configuration
    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    /// The offline queue
    pub fn offline_queue(&self) -> &Arc<OfflineQueue> {
        &self.inner.queue
    }

    /// The event bus
    pub fn events(&self) -> &Arc<EventBus> {
        &self.inner.events
    }

    /// Register an event listener
    pub fn on(
        &self,
        kind: EventKind,
        listener: impl Fn(&ClientEvent) + Send + Sync + 'static,
    ) -> ListenerId {
        self.inner.events.on(kind, listener)
    }

    /// Unregister an event listener
    pub fn off(&self, id: ListenerId) -> bool {
        self.inner.events.off(id)
    }

    /// Execute a request and decode the JSON body
    pub async fn request<T: DeserializeOwned>(
        &self,
        path: &str,
        spec: RequestSpec,
    ) -> Result<ApiResponse<T>> {
        self.request_raw(path, spec).await?.into_api_response()
    }

    /// Execute a request and return the undecoded response
    pub async fn request_raw(&self, path: &str, spec: RequestSpec) -> Result<TransportResponse> {
        let url = self.inner.transport.resolve_url(path);
        let policy = match &spec.retry {
            Some(options) => RetryPolicy::new(options.clone()),
            None => self.inner.retry.clone(),
        };

        let result = self.execute(&url, &spec, &policy).await;

        if let Err(err) = &result {
            if spec.queue_on_failure && self.inner.queue.should_queue(err) {
                if let Err(queue_err) = self.inner.queue.enqueue(&url, &spec).await {
                    warn!(url = %url, error = %queue_err, "Failed to queue request");
                }
            }
        }

        result
    }

    /// GET and decode
    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<ApiResponse<T>> {
        self.request(path, RequestSpec::get()).await
    }

    /// POST a JSON body and decode
    pub async fn post<T: DeserializeOwned, B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<ApiResponse<T>> {
        self.request(path, RequestSpec::new(HttpMethod::Post).json(body)?).await
    }

    /// PUT a JSON body and decode
    pub async fn put<T: DeserializeOwned, B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<ApiResponse<T>> {
        self.request(path, RequestSpec::new(HttpMethod::Put).json(body)?).await
    }

    /// PATCH a JSON body and decode
    pub async fn patch<T: DeserializeOwned, B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<ApiResponse<T>> {
        self.request(path, RequestSpec::new(HttpMethod::Patch).json(body)?).await
    }

    /// DELETE and decode
    pub async fn delete<T: DeserializeOwned>(&self, path: &str) -> Result<ApiResponse<T>> {
        self.request(path, RequestSpec::delete()).await
    }

    /// Replay the offline queue
    ///
    /// Each entry gets a single attempt (with the 401 refresh) and is never
    /// re-queued through the normal failure path; the queue decides its fate.
    pub async fn process_offline_queue(&self) -> Result<DrainReport> {
        let single = RetryPolicy::new(RetryOptions {
            max_attempts: 1,
            ..self.inner.retry.options().clone()
        });
        let policy = &single;

        self.inner
            .queue
            .process_queue(|entry| async move {
                self.execute(&entry.target_url, &entry.request, policy)
                    .await
                    .map(|_| ())
            })
            .await
    }

    /// Drain the offline queue whenever connectivity returns
    ///
    /// The task ends when the sender side of `state` is dropped.
    pub fn watch_connectivity(&self, mut state: watch::Receiver<NetworkState>) -> JoinHandle<()> {
        let client = self.clone();
        let mut previous = *state.borrow_and_update();

        tokio::spawn(async move {
            while state.changed().await.is_ok() {
                let current = *state.borrow_and_update();
                debug!(from = %previous, to = %current, "Connectivity changed");

                if current.is_reconnect_from(previous)
                    && client.inner.queue.config().retry_on_reconnect
                {
                    info!("Connectivity restored, replaying offline queue");
                    if let Err(e) = client.process_offline_queue().await {
                        warn!(error = %e, "Offline queue replay failed");
                    }
                }

                previous = current;
            }
        })
    }

    async fn execute(
        &self,
        url: &str,
        spec: &RequestSpec,
        policy: &RetryPolicy,
    ) -> Result<TransportResponse> {
        policy
            .run(|attempt| async move {
                if attempt > 0 {
                    debug!(url, attempt, "Retrying request");
                }
                self.send_with_auth_retry(url, spec).await
            })
            .await
    }

    async fn send_with_auth_retry(&self, url: &str, spec: &RequestSpec) -> Result<TransportResponse> {
        let token = match &self.inner.tokens {
            Some(tokens) => ensure_valid_token(tokens.as_ref()).await?,
            None => None,
        };

        let original = match self.dispatch(url, spec, token.as_deref()).await {
            Err(err) if err.is_auth_expired() => err,
            other => return other,
        };

        let Some(tokens) = self.inner.tokens.as_ref().filter(|_| spec.auth_retry) else {
            return Err(original);
        };

        info!(url, "Access token rejected, refreshing");
        let refreshed = match tokens.refresh_token().await {
            Ok(token) => token,
            Err(e) => {
                warn!(url, error = %e, "Token refresh after 401 failed");
                return Err(original);
            }
        };

        match self.dispatch(url, spec, Some(&refreshed)).await {
            Ok(response) => Ok(response),
            Err(retry_err) => {
                debug!(url, error = %retry_err, "Request failed again after token refresh");
                Err(original)
            }
        }
    }

    async fn dispatch(
        &self,
        url: &str,
        spec: &RequestSpec,
        token: Option<&str>,
    ) -> Result<TransportResponse> {
        let result = self.inner.transport.send(url, spec, token).await;

        if let Err(HttpClientError::SessionInvalidated(reason)) = &result {
            warn!(url, reason = %reason, "Session invalidated by server");
            self.inner
                .events
                .emit(&ClientEvent::SessionInvalidated { reason: reason.clone() });
        }

        result
    }
}
