//! In-process test doubles
//!
//! Enabled for this crate's own tests and, through the `test-utils`
//! feature, for downstream integration tests.

use crate::error::{HttpClientError, Result, TokenError};
use crate::response::TransportResponse;
use crate::token::TokenProvider;
use crate::transport::{PreparedRequest, Transport};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// Transport that replays scripted outcomes and records every request
///
/// Scripted outcomes are consumed in order. When the script is empty the
/// standing failure (if any) is returned, otherwise a 200 with an empty body.
#[derive(Default)]
pub struct ScriptedTransport {
    script: Mutex<VecDeque<(Option<Duration>, Result<TransportResponse>)>>,
    failure: Mutex<Option<HttpClientError>>,
    calls: Mutex<Vec<PreparedRequest>>,
}

impl ScriptedTransport {
    /// Empty script
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a response
    pub fn push_response(&self, response: TransportResponse) {
        self.script.lock().push_back((None, Ok(response)));
    }

    /// Queue a JSON response
    pub fn push_json(&self, status: u16, body: serde_json::Value) {
        self.push_response(TransportResponse::json(status, &body));
    }

    /// Queue a response that arrives after `delay`
    pub fn push_delayed(&self, delay: Duration, response: TransportResponse) {
        self.script.lock().push_back((Some(delay), Ok(response)));
    }

    /// Queue a transport failure
    pub fn push_error(&self, error: HttpClientError) {
        self.script.lock().push_back((None, Err(error)));
    }

    /// Fail every request once the script runs out
    pub fn fail_with(&self, error: HttpClientError) {
        *self.failure.lock() = Some(error);
    }

    /// Stop failing once the script runs out
    pub fn clear_failure(&self) {
        *self.failure.lock() = None;
    }

    /// Requests received so far
    pub fn calls(&self) -> Vec<PreparedRequest> {
        self.calls.lock().clone()
    }

    /// Number of requests received
    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn execute(&self, request: PreparedRequest) -> Result<TransportResponse> {
        let timeout = request.timeout;
        self.calls.lock().push(request);

        let next = self.script.lock().pop_front();
        let (delay, outcome) = match next {
            Some(step) => step,
            None => match self.failure.lock().clone() {
                Some(error) => (None, Err(error)),
                None => (None, Ok(TransportResponse::new(200, Vec::new()))),
            },
        };

        if let Some(delay) = delay {
            if delay >= timeout {
                tokio::time::sleep(timeout).await;
                return Err(HttpClientError::Timeout(timeout));
            }
            tokio::time::sleep(delay).await;
        }

        outcome
    }
}

/// Token provider with a settable token and a counting refresh
pub struct StaticTokenProvider {
    token: Mutex<Option<String>>,
    refreshed: Mutex<Option<std::result::Result<String, TokenError>>>,
    refresh_calls: AtomicUsize,
    expired: Mutex<Vec<String>>,
}

impl StaticTokenProvider {
    /// Signed in with `token`; refreshing fails until configured
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: Mutex::new(Some(token.into())),
            refreshed: Mutex::new(None),
            refresh_calls: AtomicUsize::new(0),
            expired: Mutex::new(Vec::new()),
        }
    }

    /// Refresh yields `token`
    pub fn refresh_to(self, token: impl Into<String>) -> Self {
        *self.refreshed.lock() = Some(Ok(token.into()));
        self
    }

    /// Refresh fails with `error`
    pub fn refresh_fails(self, error: TokenError) -> Self {
        *self.refreshed.lock() = Some(Err(error));
        self
    }

    /// Treat `token` as expired
    pub fn expire(&self, token: impl Into<String>) {
        self.expired.lock().push(token.into());
    }

    /// Number of refreshes requested
    pub fn refresh_calls(&self) -> usize {
        self.refresh_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TokenProvider for StaticTokenProvider {
    async fn get_token(&self) -> std::result::Result<Option<String>, TokenError> {
        Ok(self.token.lock().clone())
    }

    async fn refresh_token(&self) -> std::result::Result<String, TokenError> {
        self.refresh_calls.fetch_add(1, Ordering::SeqCst);
        let outcome = self
            .refreshed
            .lock()
            .clone()
            .unwrap_or(Err(TokenError::MissingRefreshToken));

        if let Ok(token) = &outcome {
            *self.token.lock() = Some(token.clone());
        }
        outcome
    }

    fn is_token_expired(&self, token: &str) -> bool {
        self.expired.lock().iter().any(|t| t == token)
    }
}
