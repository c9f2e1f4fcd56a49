//! Outbound HTTP seam towards the ticketing API.
//!
//! Everything above this module talks to the remote system through the
//! [`Transport`] trait, so the token store and request executor can be tested
//! against a scripted transport instead of a live server.

pub mod http;
#[cfg(test)]
pub(crate) mod mock;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

pub use http::ReqwestTransport;

/// HTTP method used against the ticketing API
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
    Put,
}

/// A request to the ticketing API
#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub method: Method,
    pub url: String,
    pub query: Vec<(String, String)>,
    /// Credential attached as a bearer `Authorization` header
    pub bearer: Option<String>,
    pub body: Option<Value>,
}

impl ApiRequest {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            query: Vec::new(),
            bearer: None,
            body: None,
        }
    }

    pub fn with_query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    pub fn with_bearer(mut self, credential: impl Into<String>) -> Self {
        self.bearer = Some(credential.into());
        self
    }

    /// Attach a JSON payload.
    ///
    /// GET requests carry no body: top-level scalar fields of an object payload
    /// are sent as query parameters instead.
    pub fn with_payload(mut self, payload: Option<Value>) -> Self {
        let Some(payload) = payload else {
            return self;
        };
        if self.method != Method::Get {
            self.body = Some(payload);
            return self;
        }
        if let Value::Object(fields) = payload {
            for (key, value) in fields {
                match value {
                    Value::String(s) => self.query.push((key, s)),
                    Value::Number(n) => self.query.push((key, n.to_string())),
                    Value::Bool(b) => self.query.push((key, b.to_string())),
                    _ => {}
                }
            }
        }
        self
    }
}

/// Raw response from the ticketing API
#[derive(Debug, Clone)]
pub struct ApiResponse {
    pub status: u16,
    pub body: String,
}

impl ApiResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Parse the body as JSON, `None` if it is empty or not JSON
    pub fn json(&self) -> Option<Value> {
        if self.body.trim().is_empty() {
            return None;
        }
        serde_json::from_str(&self.body).ok()
    }
}

/// Network-level failure talking to the ticketing API
#[derive(Error, Debug, Clone)]
pub enum TransportError {
    #[error("connection failed: {0}")]
    Connect(String),

    #[error("request timed out: {0}")]
    Timeout(String),

    #[error("request failed: {0}")]
    Request(String),
}

impl TransportError {
    /// Connection failures and timeouts are worth retrying
    pub fn is_transient(&self) -> bool {
        matches!(self, TransportError::Connect(_) | TransportError::Timeout(_))
    }
}

/// Outbound HTTP capability
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: ApiRequest) -> Result<ApiResponse, TransportError>;
}

/// Join a base URL and an endpoint path with exactly one slash between them
pub fn join_url(base: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}
