//! Network Transport Contract
//!
//! The sync core never talks HTTP directly. It describes *what* to send with a
//! [`RequestKind`] and a [`RequestConfig`], and receives either the decoded
//! JSON body or a classified [`TransportError`]. The transport owns retries,
//! timeouts and `Authorization` header injection.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

use crate::http::HttpMethod;

/// Logical request identity. At most one request per kind is in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RequestKind {
    Login,
    RefreshToken,
    FetchTodos,
    PushTodos,
    FetchCategories,
    PushCategories,
}

impl RequestKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestKind::Login => "login",
            RequestKind::RefreshToken => "refresh_token",
            RequestKind::FetchTodos => "fetch_todos",
            RequestKind::PushTodos => "push_todos",
            RequestKind::FetchCategories => "fetch_categories",
            RequestKind::PushCategories => "push_categories",
        }
    }
}

impl fmt::Display for RequestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Transport-level failure classes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransportErrorKind {
    Timeout,
    Connection,
    Authentication,
    Server,
    Parse,
    Unknown,
}

impl TransportErrorKind {
    /// Whether the transport may retry a request that failed this way.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            TransportErrorKind::Timeout | TransportErrorKind::Connection | TransportErrorKind::Server
        )
    }
}

impl fmt::Display for TransportErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TransportErrorKind::Timeout => "timeout",
            TransportErrorKind::Connection => "connection",
            TransportErrorKind::Authentication => "authentication",
            TransportErrorKind::Server => "server",
            TransportErrorKind::Parse => "parse",
            TransportErrorKind::Unknown => "unknown",
        };
        f.write_str(name)
    }
}

/// A classified transport failure.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{kind} error: {message}")]
pub struct TransportError {
    pub kind: TransportErrorKind,
    pub message: String,
    /// HTTP status when the failure came from a response.
    pub status: Option<u16>,
}

impl TransportError {
    pub fn new(kind: TransportErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            status: None,
        }
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(TransportErrorKind::Timeout, message)
    }

    pub fn connection(message: impl Into<String>) -> Self {
        Self::new(TransportErrorKind::Connection, message)
    }

    pub fn authentication(message: impl Into<String>) -> Self {
        Self::new(TransportErrorKind::Authentication, message)
    }

    pub fn server(message: impl Into<String>) -> Self {
        Self::new(TransportErrorKind::Server, message)
    }

    pub fn parse(message: impl Into<String>) -> Self {
        Self::new(TransportErrorKind::Parse, message)
    }

    pub fn unknown(message: impl Into<String>) -> Self {
        Self::new(TransportErrorKind::Unknown, message)
    }

    pub fn is_retryable(&self) -> bool {
        self.kind.is_retryable()
    }
}

/// Per-request settings.
///
/// `timeout` and `max_retries` fall back to the transport defaults when unset.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestConfig {
    pub url: String,
    pub method: HttpMethod,
    pub body: Option<Value>,
    pub headers: HashMap<String, String>,
    pub timeout: Option<Duration>,
    pub max_retries: Option<u32>,
    pub requires_auth: bool,
}

impl RequestConfig {
    pub fn new(method: HttpMethod, url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            method,
            body: None,
            headers: HashMap::new(),
            timeout: None,
            max_retries: None,
            requires_auth: true,
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new(HttpMethod::Get, url)
    }

    pub fn post(url: impl Into<String>, body: Value) -> Self {
        Self::new(HttpMethod::Post, url).body(body)
    }

    pub fn body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn max_retries(mut self, retries: u32) -> Self {
        self.max_retries = Some(retries);
        self
    }

    /// Send without an `Authorization` header (login, refresh).
    pub fn unauthenticated(mut self) -> Self {
        self.requires_auth = false;
        self
    }
}

/// Joins a base URL and an endpoint path with exactly one slash between them.
pub fn join_url(base: &str, endpoint: &str) -> String {
    let base = base.trim_end_matches('/');
    let endpoint = endpoint.trim_start_matches('/');
    if endpoint.is_empty() {
        return base.to_string();
    }
    format!("{}/{}", base, endpoint)
}

/// Network transport used by the credential manager and the sync drivers.
///
/// # Example
///
/// ```ignore
/// use bridge_traits::network::{RequestConfig, RequestKind, Transport};
///
/// async fn fetch(transport: &dyn Transport) -> Result<serde_json::Value, TransportError> {
///     let url = transport.api_url("/todos");
///     transport.send(RequestKind::FetchTodos, RequestConfig::get(url)).await
/// }
/// ```
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send a request and decode the JSON response body.
    async fn send(
        &self,
        kind: RequestKind,
        config: RequestConfig,
    ) -> std::result::Result<Value, TransportError>;

    /// Configured server base URL; empty when unconfigured.
    fn server_base_url(&self) -> String;

    /// Absolute URL for an API endpoint path.
    fn api_url(&self, endpoint: &str) -> String {
        join_url(&self.server_base_url(), endpoint)
    }

    /// Replace the bearer token injected into authenticated requests.
    fn set_auth_token(&self, token: Option<String>);
}
