//! # Core Configuration Module
//!
//! Tunables for the sync core, assembled with a builder and validated once.
//!
//! ## Overview
//!
//! `CoreConfig` carries values only. Platform bridges (HTTP client, secure
//! store, settings store) are injected separately by the service layer, so a
//! config can be built and validated in unit tests without any I/O.
//!
//! ## Usage
//!
//! ```rust
//! use core_runtime::config::CoreConfig;
//! use std::time::Duration;
//!
//! let config = CoreConfig::builder()
//!     .server_base_url("https://todo.example.com")
//!     .auto_sync_interval(Duration::from_secs(15 * 60))
//!     .build()
//!     .unwrap();
//!
//! assert_eq!(config.max_batch_size, 100);
//! ```
//!
//! An empty `server_base_url` is valid: the core starts, but every sync
//! attempt is rejected until a server is configured.

use crate::error::{CoreError, Result};
use crate::events::EntityKind;
use crate::logging::LoggingConfig;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// Server-imposed upper bound on records per push request.
pub const MAX_BATCH_SIZE: usize = 100;

pub const DEFAULT_TODO_ENDPOINT: &str = "/todos";
pub const DEFAULT_CATEGORY_ENDPOINT: &str = "/categories";
pub const DEFAULT_AUTH_ENDPOINT: &str = "/auth";

/// Core configuration for the sync engine.
#[derive(Clone)]
pub struct CoreConfig {
    /// Server root, e.g. `https://todo.example.com`. Empty disables sync.
    pub server_base_url: String,

    pub todo_api_endpoint: String,
    pub category_api_endpoint: String,
    pub auth_api_endpoint: String,

    /// Per-request timeout
    pub request_timeout: Duration,

    /// Retries after the first attempt for timeout, connection and server errors
    pub max_retries: u32,

    /// Retry `n` waits `n * retry_base_delay`
    pub retry_base_delay: Duration,

    /// Auto-sync period. `Duration::ZERO` disables the timer.
    pub auto_sync_interval: Duration,

    /// How long before access token expiry the scheduled refresh fires
    pub refresh_ahead_window: Duration,

    /// Assumed access token lifetime when the server omits or garbles `expires_in`
    pub access_token_lifetime: Duration,

    pub max_batch_size: usize,

    /// In bidirectional mode, push before fetching when local changes exist
    pub push_first_when_pending: bool,

    /// SQLite file for the local store. `None` keeps records in memory.
    pub database_path: Option<PathBuf>,

    pub logging: LoggingConfig,
}

impl fmt::Debug for CoreConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CoreConfig")
            .field("server_base_url", &self.server_base_url)
            .field("todo_api_endpoint", &self.todo_api_endpoint)
            .field("category_api_endpoint", &self.category_api_endpoint)
            .field("auth_api_endpoint", &self.auth_api_endpoint)
            .field("request_timeout", &self.request_timeout)
            .field("max_retries", &self.max_retries)
            .field("retry_base_delay", &self.retry_base_delay)
            .field("auto_sync_interval", &self.auto_sync_interval)
            .field("refresh_ahead_window", &self.refresh_ahead_window)
            .field("access_token_lifetime", &self.access_token_lifetime)
            .field("max_batch_size", &self.max_batch_size)
            .field("push_first_when_pending", &self.push_first_when_pending)
            .field("database_path", &self.database_path)
            .field("logging", &self.logging.format)
            .finish()
    }
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            server_base_url: String::new(),
            todo_api_endpoint: DEFAULT_TODO_ENDPOINT.to_string(),
            category_api_endpoint: DEFAULT_CATEGORY_ENDPOINT.to_string(),
            auth_api_endpoint: DEFAULT_AUTH_ENDPOINT.to_string(),
            request_timeout: Duration::from_secs(10),
            max_retries: 3,
            retry_base_delay: Duration::from_secs(1),
            auto_sync_interval: Duration::from_secs(30 * 60),
            refresh_ahead_window: Duration::from_secs(300),
            access_token_lifetime: Duration::from_secs(3600),
            max_batch_size: MAX_BATCH_SIZE,
            push_first_when_pending: true,
            database_path: None,
            logging: LoggingConfig::default(),
        }
    }
}

impl CoreConfig {
    pub fn builder() -> CoreConfigBuilder {
        CoreConfigBuilder::default()
    }

    /// API endpoint path for an entity kind.
    pub fn endpoint_for(&self, entity: EntityKind) -> &str {
        match entity {
            EntityKind::Todo => &self.todo_api_endpoint,
            EntityKind::Category => &self.category_api_endpoint,
        }
    }

    pub fn auto_sync_enabled(&self) -> bool {
        !self.auto_sync_interval.is_zero()
    }

    /// Validates the configuration.
    ///
    /// Checks batch size bounds, timeout and token windows, endpoint shape and
    /// the server URL scheme.
    pub fn validate(&self) -> Result<()> {
        if self.max_batch_size == 0 || self.max_batch_size > MAX_BATCH_SIZE {
            return Err(CoreError::Config(format!(
                "max_batch_size must be between 1 and {}, got {}",
                MAX_BATCH_SIZE, self.max_batch_size
            )));
        }

        if self.request_timeout.is_zero() {
            return Err(CoreError::Config(
                "request_timeout must be greater than zero".to_string(),
            ));
        }

        if self.access_token_lifetime.is_zero() {
            return Err(CoreError::Config(
                "access_token_lifetime must be greater than zero".to_string(),
            ));
        }

        if self.refresh_ahead_window >= self.access_token_lifetime {
            return Err(CoreError::Config(format!(
                "refresh_ahead_window ({}s) must be shorter than access_token_lifetime ({}s)",
                self.refresh_ahead_window.as_secs(),
                self.access_token_lifetime.as_secs()
            )));
        }

        for (name, endpoint) in [
            ("todo_api_endpoint", &self.todo_api_endpoint),
            ("category_api_endpoint", &self.category_api_endpoint),
            ("auth_api_endpoint", &self.auth_api_endpoint),
        ] {
            // Empty endpoints are allowed and make that entity ineligible for sync.
            if !endpoint.is_empty() && !endpoint.starts_with('/') {
                return Err(CoreError::Config(format!(
                    "{} must start with '/', got '{}'",
                    name, endpoint
                )));
            }
        }

        if !self.server_base_url.is_empty()
            && !(self.server_base_url.starts_with("http://")
                || self.server_base_url.starts_with("https://"))
        {
            return Err(CoreError::Config(format!(
                "server_base_url must be an http(s) URL, got '{}'",
                self.server_base_url
            )));
        }

        Ok(())
    }
}

/// Builder for [`CoreConfig`]. Unset fields keep their defaults.
#[derive(Default)]
pub struct CoreConfigBuilder {
    config: CoreConfig,
}

impl CoreConfigBuilder {
    pub fn server_base_url(mut self, url: impl Into<String>) -> Self {
        self.config.server_base_url = url.into();
        self
    }

    pub fn todo_api_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.config.todo_api_endpoint = endpoint.into();
        self
    }

    pub fn category_api_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.config.category_api_endpoint = endpoint.into();
        self
    }

    pub fn auth_api_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.config.auth_api_endpoint = endpoint.into();
        self
    }

    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.config.request_timeout = timeout;
        self
    }

    pub fn max_retries(mut self, retries: u32) -> Self {
        self.config.max_retries = retries;
        self
    }

    pub fn retry_base_delay(mut self, delay: Duration) -> Self {
        self.config.retry_base_delay = delay;
        self
    }

    /// Sets the auto-sync period. `Duration::ZERO` disables auto-sync.
    pub fn auto_sync_interval(mut self, interval: Duration) -> Self {
        self.config.auto_sync_interval = interval;
        self
    }

    pub fn refresh_ahead_window(mut self, window: Duration) -> Self {
        self.config.refresh_ahead_window = window;
        self
    }

    pub fn access_token_lifetime(mut self, lifetime: Duration) -> Self {
        self.config.access_token_lifetime = lifetime;
        self
    }

    pub fn max_batch_size(mut self, size: usize) -> Self {
        self.config.max_batch_size = size;
        self
    }

    pub fn push_first_when_pending(mut self, enabled: bool) -> Self {
        self.config.push_first_when_pending = enabled;
        self
    }

    pub fn database_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.database_path = Some(path.into());
        self
    }

    pub fn logging(mut self, logging: LoggingConfig) -> Self {
        self.config.logging = logging;
        self
    }

    /// Validates and returns the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Config`] with an actionable message when a value
    /// is out of range.
    pub fn build(self) -> Result<CoreConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}
