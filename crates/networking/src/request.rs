//! Request descriptions
//!
//! A `RequestSpec` is plain data so it can be persisted in the offline
//! queue and replayed later.

use crate::config::option_duration_ms;
use crate::error::{HttpClientError, Result};
use crate::retry::RetryOptions;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

/// HTTP method
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    /// GET request
    Get,
    /// POST request
    Post,
    /// PUT request
    Put,
    /// PATCH request
    Patch,
    /// DELETE request
    Delete,
}

impl HttpMethod {
    /// Convert to string
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Patch => "PATCH",
            HttpMethod::Delete => "DELETE",
        }
    }
}

impl std::fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Request payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "camelCase")]
pub enum RequestBody {
    /// Serialized as JSON; sets `Content-Type: application/json`
    Json(serde_json::Value),
    /// Sent verbatim
    Text(String),
    /// Sent verbatim
    Bytes(Vec<u8>),
}

impl RequestBody {
    /// Encoded bytes
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        match self {
            RequestBody::Json(value) => serde_json::to_vec(value)
                .map_err(|e| HttpClientError::InvalidRequest(e.to_string())),
            RequestBody::Text(text) => Ok(text.as_bytes().to_vec()),
            RequestBody::Bytes(bytes) => Ok(bytes.clone()),
        }
    }

    /// Whether this is a JSON payload
    pub fn is_json(&self) -> bool {
        matches!(self, RequestBody::Json(_))
    }
}

fn default_true() -> bool {
    true
}

/// One logical request
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestSpec {
    /// HTTP method
    pub method: HttpMethod,
    /// Per-request headers
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    /// Query parameters
    #[serde(default)]
    pub query: Vec<(String, String)>,
    /// Payload
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<RequestBody>,
    /// Overrides the client timeout
    #[serde(default, with = "option_duration_ms", skip_serializing_if = "Option::is_none")]
    pub timeout: Option<Duration>,
    /// Refresh the token and retry once on 401
    #[serde(default = "default_true")]
    pub auth_retry: bool,
    /// Queue the request when it ends in a transient failure
    #[serde(default = "default_true")]
    pub queue_on_failure: bool,
    /// Overrides the client retry options for this call only
    #[serde(skip)]
    pub retry: Option<RetryOptions>,
}

impl RequestSpec {
    /// Create a request with the given method
    pub fn new(method: HttpMethod) -> Self {
        Self {
            method,
            headers: BTreeMap::new(),
            query: Vec::new(),
            body: None,
            timeout: None,
            auth_retry: true,
            queue_on_failure: true,
            retry: None,
        }
    }

    /// GET request
    pub fn get() -> Self {
        Self::new(HttpMethod::Get)
    }

    /// POST request
    pub fn post() -> Self {
        Self::new(HttpMethod::Post)
    }

    /// PUT request
    pub fn put() -> Self {
        Self::new(HttpMethod::Put)
    }

    /// PATCH request
    pub fn patch() -> Self {
        Self::new(HttpMethod::Patch)
    }

    /// DELETE request
    pub fn delete() -> Self {
        Self::new(HttpMethod::Delete)
    }

    /// Add a header
    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    /// Add a query parameter
    pub fn param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    /// Set a JSON body from a serializable value
    pub fn json<T: Serialize + ?Sized>(mut self, value: &T) -> Result<Self> {
        let value = serde_json::to_value(value)
            .map_err(|e| HttpClientError::InvalidRequest(e.to_string()))?;
        self.body = Some(RequestBody::Json(value));
        Ok(self)
    }

    /// Set a text body
    pub fn text(mut self, text: impl Into<String>) -> Self {
        self.body = Some(RequestBody::Text(text.into()));
        self
    }

    /// Set a binary body
    pub fn bytes(mut self, bytes: Vec<u8>) -> Self {
        self.body = Some(RequestBody::Bytes(bytes));
        self
    }

    /// Override the timeout
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Override retry options for this call
    pub fn retry(mut self, retry: RetryOptions) -> Self {
        self.retry = Some(retry);
        self
    }

    /// Do not refresh and retry on 401
    pub fn without_auth_retry(mut self) -> Self {
        self.auth_retry = false;
        self
    }

    /// Do not queue on transient failure
    pub fn without_queueing(mut self) -> Self {
        self.queue_on_failure = false;
        self
    }

    /// Case-insensitive header lookup
    pub fn has_header(&self, name: &str) -> bool {
        self.headers.keys().any(|key| key.eq_ignore_ascii_case(name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_http_method_as_str() {
        assert_eq!(HttpMethod::Get.as_str(), "GET");
        assert_eq!(HttpMethod::Patch.as_str(), "PATCH");
        assert_eq!(HttpMethod::Delete.to_string(), "DELETE");
    }

    #[test]
    fn test_builder_defaults() {
        let spec = RequestSpec::get();
        assert_eq!(spec.method, HttpMethod::Get);
        assert!(spec.auth_retry);
        assert!(spec.queue_on_failure);
        assert!(spec.body.is_none());
    }

    #[test]
    fn test_json_body() {
        let spec = RequestSpec::post()
            .json(&json!({"name": "Groceries", "amount": 250}))
            .unwrap()
            .header("X-Request", "1")
            .param("month", "2024-05");

        assert!(spec.body.as_ref().unwrap().is_json());
        assert!(spec.has_header("x-request"));
        assert_eq!(spec.query, vec![("month".to_string(), "2024-05".to_string())]);

        let bytes = spec.body.unwrap().to_bytes().unwrap();
        let decoded: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(decoded["name"], "Groceries");
    }

    #[test]
    fn test_persisted_form() {
        let spec = RequestSpec::put()
            .text("hello")
            .timeout(Duration::from_millis(1500))
            .retry(RetryOptions::new(5))
            .without_queueing();

        let json = serde_json::to_value(&spec).unwrap();
        assert_eq!(json["method"], "PUT");
        assert_eq!(json["timeout"], 1500);
        assert_eq!(json["queueOnFailure"], false);
        assert_eq!(json["body"]["type"], "text");
        assert!(json.get("retry").is_none());

        let restored: RequestSpec = serde_json::from_value(json).unwrap();
        assert_eq!(restored.timeout, Some(Duration::from_millis(1500)));
        assert!(!restored.queue_on_failure);
        assert!(restored.retry.is_none());
    }

    #[test]
    fn test_minimal_persisted_form() {
        let restored: RequestSpec = serde_json::from_str(r#"{"method":"GET"}"#).unwrap();
        assert!(restored.auth_retry);
        assert!(restored.queue_on_failure);
        assert!(restored.timeout.is_none());
    }
}
