//! Network transport over an [`HttpClient`]
//!
//! Owns everything between "send this request kind" and "here is the decoded
//! JSON": bearer token injection, per-request timeout, bounded linear retry,
//! response classification and rejection of duplicate in-flight kinds.

use async_trait::async_trait;
use bridge_traits::{
    error::BridgeError,
    http::{HttpClient, HttpRequest, HttpResponse, RetryPolicy},
    network::{RequestConfig, RequestKind, Transport, TransportError},
};
use serde_json::Value;
use std::collections::HashSet;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tracing::{debug, instrument, warn};

/// Transport defaults applied when a [`RequestConfig`] leaves them unset.
#[derive(Debug, Clone)]
pub struct TransportSettings {
    pub server_base_url: String,
    pub request_timeout: Duration,
    pub retry: RetryPolicy,
}

impl Default for TransportSettings {
    fn default() -> Self {
        Self {
            server_base_url: String::new(),
            request_timeout: Duration::from_secs(10),
            retry: RetryPolicy::default(),
        }
    }
}

/// [`Transport`] implementation on top of any [`HttpClient`].
pub struct HttpTransport {
    client: Arc<dyn HttpClient>,
    settings: TransportSettings,
    base_url: RwLock<String>,
    auth_token: RwLock<Option<String>>,
    in_flight: Arc<Mutex<HashSet<RequestKind>>>,
}

impl HttpTransport {
    pub fn new(client: Arc<dyn HttpClient>, settings: TransportSettings) -> Self {
        let base_url = RwLock::new(settings.server_base_url.clone());
        Self {
            client,
            settings,
            base_url,
            auth_token: RwLock::new(None),
            in_flight: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// Point the transport at another server.
    pub fn set_server_base_url(&self, url: impl Into<String>) {
        let mut guard = self
            .base_url
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *guard = url.into();
    }

    pub fn has_auth_token(&self) -> bool {
        self.current_token().is_some()
    }

    fn current_token(&self) -> Option<String> {
        self.auth_token
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    fn build_request(&self, config: &RequestConfig) -> Result<HttpRequest, TransportError> {
        let timeout = config.timeout.unwrap_or(self.settings.request_timeout);
        let mut request = HttpRequest::new(config.method, config.url.clone())
            .timeout(timeout)
            .header("Accept", "application/json");

        for (key, value) in &config.headers {
            request = request.header(key.clone(), value.clone());
        }

        if config.requires_auth {
            match self.current_token() {
                Some(token) => request = request.bearer_token(token),
                None => {
                    return Err(TransportError::authentication(
                        "no access token available for authenticated request",
                    ))
                }
            }
        }

        if let Some(body) = &config.body {
            request = request
                .json(body)
                .map_err(|e| TransportError::unknown(e.to_string()))?;
        }

        Ok(request)
    }

    async fn attempt(&self, request: HttpRequest) -> Result<Value, TransportError> {
        let response = self
            .client
            .execute(request)
            .await
            .map_err(classify_bridge_error)?;
        classify_response(&response)
    }
}

/// Removes a request kind from the in-flight set when dropped.
struct InFlightGuard {
    kinds: Arc<Mutex<HashSet<RequestKind>>>,
    kind: RequestKind,
}

impl InFlightGuard {
    fn acquire(kinds: &Arc<Mutex<HashSet<RequestKind>>>, kind: RequestKind) -> Option<Self> {
        let mut set = kinds.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if !set.insert(kind) {
            return None;
        }
        Some(Self {
            kinds: Arc::clone(kinds),
            kind,
        })
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        let mut set = self
            .kinds
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        set.remove(&self.kind);
    }
}

#[async_trait]
impl Transport for HttpTransport {
    #[instrument(skip(self, config), fields(kind = %kind, url = %config.url))]
    async fn send(&self, kind: RequestKind, config: RequestConfig) -> Result<Value, TransportError> {
        let _guard = InFlightGuard::acquire(&self.in_flight, kind).ok_or_else(|| {
            warn!("Rejected duplicate in-flight request");
            TransportError::unknown("duplicate request")
        })?;

        let request = self.build_request(&config)?;
        let max_retries = config.max_retries.unwrap_or(self.settings.retry.max_retries);
        let mut attempt: u32 = 0;

        loop {
            match self.attempt(request.clone()).await {
                Ok(body) => {
                    debug!(attempt, "Request succeeded");
                    return Ok(body);
                }
                Err(error) if error.is_retryable() && attempt < max_retries => {
                    attempt += 1;
                    let delay = self.settings.retry.delay_for_attempt(attempt);
                    warn!(
                        error = %error,
                        attempt,
                        max_retries,
                        delay_ms = delay.as_millis() as u64,
                        "Request failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(error) => {
                    warn!(error = %error, attempt, "Request failed");
                    return Err(error);
                }
            }
        }
    }

    fn server_base_url(&self) -> String {
        self.base_url
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    fn set_auth_token(&self, token: Option<String>) {
        let mut guard = self
            .auth_token
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *guard = token.filter(|t| !t.is_empty());
    }
}

fn classify_bridge_error(error: BridgeError) -> TransportError {
    match error {
        BridgeError::Timeout(msg) => TransportError::timeout(msg),
        BridgeError::ConnectionFailed(msg) => TransportError::connection(msg),
        other => TransportError::unknown(other.to_string()),
    }
}

/// Maps an HTTP response onto the transport error taxonomy.
pub(crate) fn classify_response(response: &HttpResponse) -> Result<Value, TransportError> {
    let status = response.status;

    if response.is_success() {
        if response.body.is_empty() {
            return Ok(Value::Null);
        }
        return serde_json::from_slice(&response.body)
            .map_err(|e| TransportError::parse(format!("invalid JSON response: {}", e)));
    }

    let message = server_message(response).unwrap_or_else(|| format!("HTTP {}", status));
    let error = match status {
        401 | 403 => TransportError::authentication(message),
        429 | 500..=599 => TransportError::server(message),
        _ => TransportError::unknown(message),
    };
    Err(error.with_status(status))
}

fn server_message(response: &HttpResponse) -> Option<String> {
    let body: Value = serde_json::from_slice(&response.body).ok()?;
    body.get("message")
        .or_else(|| body.get("error"))
        .and_then(Value::as_str)
        .map(str::to_string)
}
