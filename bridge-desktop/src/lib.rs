//! # Desktop Bridge Implementations
//!
//! Default implementations of bridge traits for desktop platforms
//! (macOS, Windows, Linux):
//! - `HttpClient` using `reqwest`
//! - `Transport` layered over any `HttpClient` (retry, bearer auth, error classes)
//! - `SecureStore` using the `keyring` crate, or in-memory for headless sessions
//! - `SettingsStore` using a SQLite-backed key-value table
//!
//! ## Feature Flags
//!
//! - `secure-store`: Enable OS keychain integration (default)
//!
//! ## Usage
//!
//! ```ignore
//! use bridge_desktop::{HttpTransport, ReqwestHttpClient, TransportSettings};
//! use std::sync::Arc;
//!
//! let client = Arc::new(ReqwestHttpClient::new()?);
//! let transport = HttpTransport::new(client, TransportSettings {
//!     server_base_url: "https://todo.example.com".into(),
//!     ..Default::default()
//! });
//! ```

mod http;
mod memory_store;
mod settings;
mod transport;

#[cfg(feature = "secure-store")]
mod secure_store;

pub use http::ReqwestHttpClient;
pub use memory_store::InMemorySecureStore;
pub use settings::SqliteSettingsStore;
pub use transport::{HttpTransport, TransportSettings};

#[cfg(feature = "secure-store")]
pub use secure_store::KeyringSecureStore;

use std::path::PathBuf;

/// Per-user data directory for the local store and settings.
///
/// Falls back to the working directory when the platform reports none.
pub fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("todo-sync")
}
