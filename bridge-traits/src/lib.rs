//! # Host Bridge Traits
//!
//! Platform abstraction traits that the sync core consumes and each host
//! platform implements.
//!
//! ## Traits
//!
//! ### Networking
//! - [`HttpClient`](http::HttpClient) - Single HTTP exchange
//! - [`Transport`](network::Transport) - Request-kind level transport with retry,
//!   timeouts, error classification and bearer token injection
//!
//! ### Security & Storage
//! - [`SecureStore`](storage::SecureStore) - Credential persistence (Keychain/Keystore)
//! - [`SettingsStore`](storage::SettingsStore) - Key-value state such as last sync times
//!
//! ### Utilities
//! - [`Clock`](time::Clock) - Time source for deterministic testing
//! - [`LoggerSink`](time::LoggerSink) - Forward structured logs to host logging
//!
//! ## Error Handling
//!
//! Bridge operations return [`BridgeError`](error::BridgeError). The transport
//! contract is the exception: it reports a classified
//! [`TransportError`](network::TransportError) because the sync core maps each
//! class to a different sync result.
//!
//! ## Thread Safety
//!
//! All bridge traits require `Send + Sync` so implementations can be shared
//! behind `Arc` across tasks.

pub mod error;
pub mod http;
pub mod network;
pub mod storage;
pub mod time;

pub use error::BridgeError;

pub use http::{HttpClient, HttpMethod, HttpRequest, HttpResponse, RetryPolicy};
pub use network::{
    RequestConfig, RequestKind, Transport, TransportError, TransportErrorKind,
};
pub use storage::{SecureStore, SettingsStore};
pub use time::{Clock, LogEntry, LogLevel, LoggerSink, ManualClock, SystemClock};
