//! Single-request execution
//!
//! `Transport` sends one prepared request and reports what came back.
//! `TransportClient` sits on top of it: it resolves URLs, injects headers,
//! and turns non-2xx responses into classified errors.

use crate::device::DeviceIdentityProvider;
use crate::error::{HttpClientError, Result};
use crate::request::{HttpMethod, RequestSpec};
use crate::response::TransportResponse;
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace};

/// Header carrying the device identifier
pub const DEVICE_ID_HEADER: &str = "X-Device-ID";

/// Error code the server uses to revoke a session
pub const SESSION_INVALIDATED_CODE: &str = "SESSION_INVALIDATED";

/// A request with URL, headers and body fully resolved
#[derive(Debug, Clone, PartialEq)]
pub struct PreparedRequest {
    /// HTTP method
    pub method: HttpMethod,
    /// Absolute URL without query
    pub url: String,
    /// Query parameters
    pub query: Vec<(String, String)>,
    /// Final headers
    pub headers: BTreeMap<String, String>,
    /// Encoded body
    pub body: Option<Vec<u8>>,
    /// Deadline for the whole exchange
    pub timeout: Duration,
}

impl PreparedRequest {
    /// Case-insensitive header lookup
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

/// Sends one prepared request
#[async_trait]
pub trait Transport: Send + Sync {
    /// Execute the request
    ///
    /// Any HTTP status is a successful exchange; only transport failures
    /// and timeouts are errors.
    async fn execute(&self, request: PreparedRequest) -> Result<TransportResponse>;
}

/// Transport backed by `reqwest`
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    /// Build a transport with its own connection pool
    pub fn new(user_agent: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(user_agent)
            .build()
            .map_err(|e| HttpClientError::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self { client })
    }

    /// Wrap an existing client
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }

    fn map_error(error: reqwest::Error, timeout: Duration) -> HttpClientError {
        if error.is_timeout() {
            HttpClientError::Timeout(timeout)
        } else {
            HttpClientError::Network(error.to_string())
        }
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn execute(&self, request: PreparedRequest) -> Result<TransportResponse> {
        let timeout = request.timeout;
        let method = match request.method {
            HttpMethod::Get => reqwest::Method::GET,
            HttpMethod::Post => reqwest::Method::POST,
            HttpMethod::Put => reqwest::Method::PUT,
            HttpMethod::Patch => reqwest::Method::PATCH,
            HttpMethod::Delete => reqwest::Method::DELETE,
        };

        let mut builder = self.client.request(method, &request.url);
        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        for (key, value) in &request.headers {
            builder = builder.header(key.as_str(), value.as_str());
        }
        if let Some(body) = request.body {
            builder = builder.body(body);
        }

        let exchange = async {
            let response = builder
                .send()
                .await
                .map_err(|e| Self::map_error(e, timeout))?;

            let status = response.status();
            let headers: HashMap<String, String> = response
                .headers()
                .iter()
                .filter_map(|(k, v)| {
                    v.to_str()
                        .ok()
                        .map(|v| (k.as_str().to_ascii_lowercase(), v.to_string()))
                })
                .collect();

            let body = response
                .bytes()
                .await
                .map_err(|e| Self::map_error(e, timeout))?;

            Ok::<_, HttpClientError>(TransportResponse {
                status: status.as_u16(),
                status_text: status.canonical_reason().unwrap_or("Unknown").to_string(),
                headers,
                body: body.to_vec(),
            })
        };

        match tokio::time::timeout(timeout, exchange).await {
            Ok(result) => result,
            Err(_) => Err(HttpClientError::Timeout(timeout)),
        }
    }
}

/// How a response should be handled
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponseClass {
    /// 2xx
    Success,
    /// 5xx
    Retryable,
    /// Plain 401
    AuthExpired,
    /// 401 carrying the revocation code
    SessionInvalidated(String),
    /// Any other non-2xx
    ClientError,
}

/// Classify a response by status and error code
pub fn classify(response: &TransportResponse) -> ResponseClass {
    match response.status {
        200..=299 => ResponseClass::Success,
        401 => match session_invalidated_reason(response) {
            Some(reason) => ResponseClass::SessionInvalidated(reason),
            None => ResponseClass::AuthExpired,
        },
        500..=599 => ResponseClass::Retryable,
        _ => ResponseClass::ClientError,
    }
}

fn session_invalidated_reason(response: &TransportResponse) -> Option<String> {
    let body: serde_json::Value = serde_json::from_slice(&response.body).ok()?;
    if body.get("code").and_then(|c| c.as_str()) != Some(SESSION_INVALIDATED_CODE) {
        return None;
    }

    Some(
        ["error", "message"]
            .iter()
            .find_map(|field| body.get(*field).and_then(|v| v.as_str()))
            .unwrap_or("Session invalidated")
            .to_string(),
    )
}

/// Human-readable message from an error body
fn error_message(response: &TransportResponse) -> String {
    if let Ok(body) = serde_json::from_slice::<serde_json::Value>(&response.body) {
        let message = ["message", "error_description", "msg", "error"]
            .iter()
            .find_map(|field| body.get(*field).and_then(|v| v.as_str()));
        if let Some(message) = message {
            return message.to_string();
        }
    }

    let text = response.text();
    let text = text.trim();
    if text.is_empty() {
        response.status_text.clone()
    } else {
        text.chars().take(200).collect()
    }
}

/// Turn a response into `Ok` for 2xx, otherwise a classified error
pub fn into_result(response: TransportResponse) -> Result<TransportResponse> {
    match classify(&response) {
        ResponseClass::Success => Ok(response),
        ResponseClass::SessionInvalidated(reason) => Err(HttpClientError::SessionInvalidated(reason)),
        ResponseClass::Retryable | ResponseClass::AuthExpired | ResponseClass::ClientError => {
            let message = error_message(&response);
            let body = (!response.body.is_empty()).then(|| response.text());
            Err(HttpClientError::Http {
                status: response.status,
                status_text: response.status_text,
                message,
                body,
            })
        }
    }
}

/// URL resolution, header injection and response classification over a `Transport`
#[derive(Clone)]
pub struct TransportClient {
    transport: Arc<dyn Transport>,
    base_url: String,
    default_headers: BTreeMap<String, String>,
    default_timeout: Duration,
    device: Arc<dyn DeviceIdentityProvider>,
}

impl TransportClient {
    /// Create a client
    pub fn new(
        transport: Arc<dyn Transport>,
        base_url: impl Into<String>,
        default_headers: BTreeMap<String, String>,
        default_timeout: Duration,
        device: Arc<dyn DeviceIdentityProvider>,
    ) -> Self {
        Self {
            transport,
            base_url: base_url.into(),
            default_headers,
            default_timeout,
            device,
        }
    }

    /// Resolve a path against the base URL; absolute URLs pass through
    pub fn resolve_url(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            return path.to_string();
        }

        let base = self.base_url.trim_end_matches('/');
        if path.is_empty() {
            base.to_string()
        } else if path.starts_with('/') {
            format!("{}{}", base, path)
        } else {
            format!("{}/{}", base, path)
        }
    }

    /// Build the request that will go on the wire
    pub async fn prepare(
        &self,
        url: &str,
        spec: &RequestSpec,
        token: Option<&str>,
    ) -> Result<PreparedRequest> {
        let mut headers = self.default_headers.clone();
        for (key, value) in &spec.headers {
            headers.retain(|existing, _| !existing.eq_ignore_ascii_case(key));
            headers.insert(key.clone(), value.clone());
        }

        headers.insert(DEVICE_ID_HEADER.to_string(), self.device.device_id().await?);

        if let Some(token) = token {
            headers.retain(|existing, _| !existing.eq_ignore_ascii_case("authorization"));
            headers.insert("Authorization".to_string(), format!("Bearer {}", token));
        }

        let body = match &spec.body {
            Some(body) => {
                let has_content_type = headers
                    .keys()
                    .any(|key| key.eq_ignore_ascii_case("content-type"));
                if body.is_json() && !has_content_type {
                    headers.insert("Content-Type".to_string(), "application/json".to_string());
                }
                Some(body.to_bytes()?)
            }
            None => None,
        };

        Ok(PreparedRequest {
            method: spec.method,
            url: self.resolve_url(url),
            query: spec.query.clone(),
            headers,
            body,
            timeout: spec.timeout.unwrap_or(self.default_timeout),
        })
    }

    /// Send once and classify the outcome
    pub async fn send(
        &self,
        url: &str,
        spec: &RequestSpec,
        token: Option<&str>,
    ) -> Result<TransportResponse> {
        let prepared = self.prepare(url, spec, token).await?;
        let (method, target) = (prepared.method, prepared.url.clone());

        trace!(%method, url = %target, "Sending request");
        let response = self.transport.execute(prepared).await?;
        debug!(%method, url = %target, status = response.status, "Received response");

        into_result(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::StaticDeviceId;
    use serde_json::json;
    use wiremock::matchers::{body_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client_for(base_url: &str, transport: Arc<dyn Transport>) -> TransportClient {
        let mut defaults = BTreeMap::new();
        defaults.insert("X-App".to_string(), "budget".to_string());
        TransportClient::new(
            transport,
            base_url,
            defaults,
            Duration::from_secs(5),
            Arc::new(StaticDeviceId::new("device-123")),
        )
    }

    fn reqwest_transport() -> Arc<dyn Transport> {
        Arc::new(ReqwestTransport::new("test-agent").unwrap())
    }

    #[test]
    fn test_resolve_url() {
        let client = client_for("https://api.example.com/", reqwest_transport());
        assert_eq!(client.resolve_url("/envelopes"), "https://api.example.com/envelopes");
        assert_eq!(client.resolve_url("envelopes"), "https://api.example.com/envelopes");
        assert_eq!(client.resolve_url("http://other.test/x"), "http://other.test/x");
    }

    #[tokio::test]
    async fn test_prepare_injects_headers() {
        let client = client_for("https://api.example.com", reqwest_transport());
        let spec = RequestSpec::post()
            .json(&json!({"a": 1}))
            .unwrap()
            .header("x-app", "override");

        let prepared = client.prepare("/items", &spec, Some("tok")).await.unwrap();

        assert_eq!(prepared.url, "https://api.example.com/items");
        assert_eq!(prepared.header("authorization"), Some("Bearer tok"));
        assert_eq!(prepared.header("x-device-id"), Some("device-123"));
        assert_eq!(prepared.header("content-type"), Some("application/json"));
        assert_eq!(prepared.header("X-App"), Some("override"));
        assert_eq!(prepared.timeout, Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_prepare_keeps_explicit_content_type() {
        let client = client_for("https://api.example.com", reqwest_transport());
        let spec = RequestSpec::post()
            .json(&json!([1, 2]))
            .unwrap()
            .header("Content-Type", "application/vnd.budget+json")
            .timeout(Duration::from_millis(250));

        let prepared = client.prepare("/items", &spec, None).await.unwrap();

        assert_eq!(prepared.header("content-type"), Some("application/vnd.budget+json"));
        assert_eq!(prepared.header("authorization"), None);
        assert_eq!(prepared.timeout, Duration::from_millis(250));
    }

    #[test]
    fn test_classify() {
        assert_eq!(classify(&TransportResponse::new(204, "")), ResponseClass::Success);
        assert_eq!(classify(&TransportResponse::new(502, "")), ResponseClass::Retryable);
        assert_eq!(classify(&TransportResponse::new(404, "")), ResponseClass::ClientError);
        assert_eq!(
            classify(&TransportResponse::json(401, &json!({"error": "jwt expired"}))),
            ResponseClass::AuthExpired
        );
        assert_eq!(
            classify(&TransportResponse::json(
                401,
                &json!({"code": "SESSION_INVALIDATED", "error": "Signed in elsewhere"})
            )),
            ResponseClass::SessionInvalidated("Signed in elsewhere".to_string())
        );
    }

    #[test]
    fn test_into_result_extracts_message() {
        let err = into_result(TransportResponse::json(422, &json!({"message": "Amount required"})))
            .unwrap_err();
        match err {
            HttpClientError::Http { status, message, body, .. } => {
                assert_eq!(status, 422);
                assert_eq!(message, "Amount required");
                assert!(body.unwrap().contains("Amount required"));
            }
            other => panic!("unexpected error: {other:?}"),
        }

        let err = into_result(TransportResponse::new(503, "")).unwrap_err();
        assert!(err.to_string().contains("Service Unavailable"));
    }

    #[tokio::test]
    async fn test_reqwest_transport_roundtrip() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/envelopes"))
            .and(query_param("month", "2024-05"))
            .and(header("authorization", "Bearer abc"))
            .and(header("x-device-id", "device-123"))
            .and(body_json(json!({"name": "Rent"})))
            .respond_with(
                ResponseTemplate::new(201)
                    .insert_header("X-Request-Id", "r-1")
                    .set_body_json(json!({"id": "env-1"})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server.uri(), reqwest_transport());
        let spec = RequestSpec::post()
            .param("month", "2024-05")
            .json(&json!({"name": "Rent"}))
            .unwrap();

        let response = client.send("/envelopes", &spec, Some("abc")).await.unwrap();
        assert_eq!(response.status, 201);
        assert_eq!(response.headers.get("x-request-id"), Some(&"r-1".to_string()));
        let body: serde_json::Value = response.json_body().unwrap();
        assert_eq!(body["id"], "env-1");
    }

    #[tokio::test]
    async fn test_reqwest_transport_timeout() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/slow"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(500)))
            .mount(&server)
            .await;

        let client = client_for(&server.uri(), reqwest_transport());
        let spec = RequestSpec::get().timeout(Duration::from_millis(50));

        let err = client.send("/slow", &spec, None).await.unwrap_err();
        assert_eq!(err, HttpClientError::Timeout(Duration::from_millis(50)));
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn test_reqwest_transport_unreachable() {
        let client = client_for("http://127.0.0.1:1", reqwest_transport());
        let err = client.send("/x", &RequestSpec::get(), None).await.unwrap_err();
        assert!(err.is_network_error());
    }
}
