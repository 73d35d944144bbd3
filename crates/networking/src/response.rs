//! Response types

use crate::error::{status_text, HttpClientError, Result};
use serde::de::DeserializeOwned;
use std::collections::HashMap;

/// Raw response as received from a transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportResponse {
    /// HTTP status code
    pub status: u16,
    /// Reason phrase
    pub status_text: String,
    /// Response headers, names lowercased
    pub headers: HashMap<String, String>,
    /// Response body
    pub body: Vec<u8>,
}

impl TransportResponse {
    /// Create a response with the canonical reason phrase
    pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            status_text: status_text(status),
            headers: HashMap::new(),
            body: body.into(),
        }
    }

    /// Create a JSON response
    pub fn json(status: u16, value: &serde_json::Value) -> Self {
        let mut response = Self::new(status, value.to_string());
        response
            .headers
            .insert("content-type".to_string(), "application/json".to_string());
        response
    }

    /// Add a header
    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into().to_ascii_lowercase(), value.into());
        self
    }

    /// 2xx status
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Body as lossy UTF-8
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// Decode the body as JSON; an empty body decodes as `null`
    pub fn json_body<T: DeserializeOwned>(&self) -> Result<T> {
        let bytes: &[u8] = if self.body.iter().all(u8::is_ascii_whitespace) {
            b"null"
        } else {
            &self.body
        };

        serde_json::from_slice(bytes).map_err(|e| HttpClientError::Decode(e.to_string()))
    }

    /// Decode into an `ApiResponse`
    pub fn into_api_response<T: DeserializeOwned>(self) -> Result<ApiResponse<T>> {
        let data = self.json_body()?;
        Ok(ApiResponse::new(self.status, self.headers, data))
    }
}

/// Decoded response
#[derive(Debug, Clone)]
pub struct ApiResponse<T> {
    /// HTTP status code
    pub status: u16,
    /// Response headers, names lowercased
    pub headers: HashMap<String, String>,
    /// Decoded body
    pub data: T,
}

impl<T> ApiResponse<T> {
    /// Create a new response
    pub fn new(status: u16, headers: HashMap<String, String>, data: T) -> Self {
        Self { status, headers, data }
    }

    /// Case-insensitive header lookup
    pub fn header(&self, key: &str) -> Option<&String> {
        self.headers.get(&key.to_ascii_lowercase())
    }

    /// 2xx status
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}
