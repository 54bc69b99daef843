//! # Credential Manager
//!
//! Owns the access/refresh token pair and its lifecycle.
//!
//! ## Overview
//!
//! The `CredentialManager` logs in against the auth endpoint, keeps the
//! access token pushed into the network transport, refreshes it ahead of its
//! expiry on a single-slot timer and persists the refresh token so a
//! restarted process can re-authenticate silently.
//!
//! ## Features
//!
//! - Account validation before any network traffic
//! - Refresh scheduled `refresh_ahead_window` before expiry
//! - Refresh deduplication: a refresh while one is in flight is a no-op
//! - A one-shot `FirstAuthCompleted` event per authenticated session
//! - Credentials are dropped and `LoginRequired` raised when the server
//!   rejects the refresh token; transient failures keep them
//!
//! ## Usage
//!
//! ```no_run
//! use core_auth::{AuthSettings, CredentialManager};
//! use core_runtime::events::EventBus;
//! use std::sync::Arc;
//! # use bridge_traits::{SecureStore, SystemClock, Transport};
//! # async fn example(
//! #     transport: Arc<dyn Transport>,
//! #     secure_store: Arc<dyn SecureStore>,
//! # ) -> core_auth::Result<()> {
//! let manager = CredentialManager::new(
//!     AuthSettings::default(),
//!     transport,
//!     secure_store,
//!     EventBus::default(),
//!     Arc::new(SystemClock),
//! );
//!
//! let user = manager.login("alice", "correct horse").await?;
//! println!("signed in as {}", user.username);
//! # Ok(())
//! # }
//! ```

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use bridge_traits::network::{RequestConfig, RequestKind, Transport};
use bridge_traits::storage::SecureStore;
use bridge_traits::time::Clock;
use chrono::{DateTime, Utc};
use core_runtime::config::CoreConfig;
use core_runtime::events::{AuthEvent, CoreEvent, EventBus};
use serde_json::json;
use tokio::sync::RwLock;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::error::{AuthError, Result};
use crate::provider::CredentialProvider;
use crate::scheduler::{compute_refresh_delay, RefreshTimer, MAX_REFRESH_DELAY};
use crate::token_store::{CredentialStore, StoredCredentials};
use crate::types::{parse_login_response, AccessGrant, Account, AuthState, UserIdentity};

/// Delay before retrying a refresh that failed for a transient reason.
const REFRESH_RETRY_DELAY: Duration = Duration::from_secs(60);

/// The slice of [`CoreConfig`] the credential manager needs.
#[derive(Debug, Clone)]
pub struct AuthSettings {
    pub auth_api_endpoint: String,
    pub request_timeout: Duration,
    pub max_retries: u32,
    pub refresh_ahead_window: Duration,
    pub access_token_lifetime: Duration,
}

impl AuthSettings {
    pub fn from_config(config: &CoreConfig) -> Self {
        Self {
            auth_api_endpoint: config.auth_api_endpoint.clone(),
            request_timeout: config.request_timeout,
            max_retries: config.max_retries,
            refresh_ahead_window: config.refresh_ahead_window,
            access_token_lifetime: config.access_token_lifetime,
        }
    }

    fn lifetime_secs(&self) -> i64 {
        self.access_token_lifetime.as_secs() as i64
    }
}

impl Default for AuthSettings {
    fn default() -> Self {
        Self::from_config(&CoreConfig::default())
    }
}

#[derive(Default)]
struct CredentialState {
    access_token: Option<String>,
    refresh_token: Option<String>,
    expires_at: Option<DateTime<Utc>>,
    user: Option<UserIdentity>,
}

struct Inner {
    settings: AuthSettings,
    transport: Arc<dyn Transport>,
    store: CredentialStore,
    event_bus: EventBus,
    clock: Arc<dyn Clock>,
    state: RwLock<CredentialState>,
    refreshing: AtomicBool,
    first_auth_emitted: AtomicBool,
    /// Bumped whenever the credential set is replaced or cleared so an
    /// in-flight refresh can tell its result is stale.
    epoch: AtomicU64,
    timer: RefreshTimer,
}

/// Credential lifecycle owner. Cloning is cheap; clones share state.
#[derive(Clone)]
pub struct CredentialManager {
    inner: Arc<Inner>,
}

/// Resets the in-flight flag when a refresh finishes, whatever the outcome.
struct RefreshingGuard<'a>(&'a AtomicBool);

impl Drop for RefreshingGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl CredentialManager {
    pub fn new(
        settings: AuthSettings,
        transport: Arc<dyn Transport>,
        secure_store: Arc<dyn SecureStore>,
        event_bus: EventBus,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                settings,
                transport,
                store: CredentialStore::new(secure_store),
                event_bus,
                clock,
                state: RwLock::new(CredentialState::default()),
                refreshing: AtomicBool::new(false),
                first_auth_emitted: AtomicBool::new(false),
                epoch: AtomicU64::new(0),
                timer: RefreshTimer::new(),
            }),
        }
    }

    /// Logs in with a username or email address.
    ///
    /// On success the tokens are applied, the refresh is scheduled and
    /// `LoginSucceeded` is emitted, followed by `FirstAuthCompleted` when this
    /// is the first authentication of the session.
    ///
    /// # Errors
    ///
    /// - `AuthError::InvalidAccount` - malformed account or empty password
    /// - `AuthError::Transport` - the request failed
    /// - `AuthError::InvalidResponse` - required fields are missing
    #[instrument(skip(self, password), fields(account = %account))]
    pub async fn login(&self, account: &str, password: &str) -> Result<UserIdentity> {
        let account = match self.validate_login(account, password) {
            Ok(account) => account,
            Err(e) => {
                warn!(error = %e, "Login rejected locally");
                self.emit(AuthEvent::LoginFailed {
                    message: e.to_string(),
                });
                return Err(e);
            }
        };

        info!("Logging in");
        let config = self
            .request(
                "login",
                json!({ "account": account.as_str(), "password": password }),
            )
            .timeout(self.inner.settings.request_timeout);

        let body = match self.inner.transport.send(RequestKind::Login, config).await {
            Ok(body) => body,
            Err(e) => {
                warn!(error = %e, "Login request failed");
                self.emit(AuthEvent::LoginFailed {
                    message: e.message.clone(),
                });
                return Err(e.into());
            }
        };

        let (grant, user) = match parse_login_response(&body, self.inner.settings.lifetime_secs()) {
            Ok(parsed) => parsed,
            Err(e) => {
                error!(error = %e, "Malformed login response");
                self.emit(AuthEvent::LoginFailed {
                    message: e.to_string(),
                });
                return Err(e);
            }
        };

        self.inner.epoch.fetch_add(1, Ordering::SeqCst);
        let expires_at = grant.expires_at(self.inner.clock.now());
        {
            let mut state = self.inner.state.write().await;
            state.access_token = Some(grant.access_token.clone());
            state.refresh_token = grant.refresh_token.clone();
            state.expires_at = Some(expires_at);
            state.user = Some(user.clone());
        }
        self.inner
            .transport
            .set_auth_token(Some(grant.access_token.clone()));

        if let Some(refresh_token) = &grant.refresh_token {
            self.persist(refresh_token, &user).await;
        }
        self.schedule_refresh(expires_at);

        info!(user_uuid = %user.uuid, username = %user.username, "Login successful");
        self.emit(AuthEvent::LoginSucceeded {
            user_uuid: user.uuid.to_string(),
            username: user.username.clone(),
        });
        self.maybe_emit_first_auth(user.uuid);

        Ok(user)
    }

    /// Rotates the access token using the held refresh token.
    ///
    /// Returns `Ok(false)` without doing anything when a refresh is already
    /// in flight, or when the credentials were replaced while the request was
    /// outstanding.
    ///
    /// # Errors
    ///
    /// - `AuthError::MissingRefreshToken` - nothing to refresh with
    /// - `AuthError::Transport` - the request failed; when the server
    ///   rejected the refresh token the credentials have been cleared
    /// - `AuthError::InvalidResponse` - the response carried no access token
    #[instrument(skip(self))]
    pub async fn refresh(&self) -> Result<bool> {
        let refresh_token = self.inner.state.read().await.refresh_token.clone();
        let Some(refresh_token) = refresh_token else {
            warn!("Cannot refresh: no refresh token");
            self.emit(AuthEvent::TokenRefreshFailed {
                message: AuthError::MissingRefreshToken.to_string(),
                recoverable: false,
            });
            return Err(AuthError::MissingRefreshToken);
        };

        if self
            .inner
            .refreshing
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!("Refresh already in flight, skipping");
            return Ok(false);
        }
        let _guard = RefreshingGuard(&self.inner.refreshing);
        let epoch = self.inner.epoch.load(Ordering::SeqCst);

        info!("Refreshing access token");
        self.emit(AuthEvent::TokenRefreshStarted);

        let config = self
            .request("refresh", json!({ "refresh_token": refresh_token }))
            .timeout(self.inner.settings.request_timeout);
        let lifetime = self.inner.settings.lifetime_secs();
        let outcome = self
            .inner
            .transport
            .send(RequestKind::RefreshToken, config)
            .await
            .map_err(AuthError::from)
            .and_then(|body| AccessGrant::from_refresh_response(&body, lifetime));

        if self.inner.epoch.load(Ordering::SeqCst) != epoch {
            info!("Credentials changed while refreshing, discarding refresh result");
            return Ok(false);
        }

        match outcome {
            Ok(grant) => {
                self.apply_refresh(grant).await;
                Ok(true)
            }
            Err(e) => {
                self.on_refresh_failure(&e).await;
                Err(e)
            }
        }
    }

    /// Reloads persisted credentials and refreshes the access token.
    ///
    /// Returns `Ok(false)` when nothing was persisted. A transient refresh
    /// failure is returned as an error but leaves the restored refresh token
    /// in place for a later retry.
    #[instrument(skip(self))]
    pub async fn restore(&self) -> Result<bool> {
        let Some(stored) = self.inner.store.load().await? else {
            debug!("No credentials to restore");
            return Ok(false);
        };

        info!(user_uuid = %stored.user.uuid, "Restoring credentials");
        self.inner.epoch.fetch_add(1, Ordering::SeqCst);
        {
            let mut state = self.inner.state.write().await;
            *state = CredentialState {
                access_token: None,
                refresh_token: Some(stored.refresh_token),
                expires_at: None,
                user: Some(stored.user),
            };
        }

        self.refresh().await
    }

    /// Clears every piece of credential state and emits `LoggedOut`.
    ///
    /// What happens to local records is the caller's decision.
    #[instrument(skip(self))]
    pub async fn logout(&self) {
        info!("Logging out");
        self.clear_credentials().await;
        self.emit(AuthEvent::LoggedOut);
    }

    /// Silent refresh after an authentication failure.
    ///
    /// With a refresh token held, refreshes and returns whether a new access
    /// token is in place. Without one, clears credentials and raises
    /// `LoginRequired`. While a refresh is already in flight nothing happens
    /// and `Ok(false)` is returned.
    #[instrument(skip(self))]
    pub async fn handle_auth_failure(&self) -> Result<bool> {
        if self.inner.refreshing.load(Ordering::SeqCst) {
            debug!("Refresh already in flight, waiting for its result");
            return Ok(false);
        }

        let has_refresh_token = self.inner.state.read().await.refresh_token.is_some();
        if !has_refresh_token {
            warn!("Access token rejected and no refresh token held");
            self.clear_credentials().await;
            self.emit(AuthEvent::LoginRequired {
                reason: "access token rejected".to_string(),
            });
            return Ok(false);
        }

        self.refresh().await
    }

    pub async fn is_authenticated(&self) -> bool {
        self.inner
            .state
            .read()
            .await
            .access_token
            .as_deref()
            .is_some_and(|t| !t.is_empty())
    }

    pub async fn access_token(&self) -> Option<String> {
        self.inner.state.read().await.access_token.clone()
    }

    pub async fn user(&self) -> Option<UserIdentity> {
        self.inner.state.read().await.user.clone()
    }

    pub async fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.inner.state.read().await.expires_at
    }

    pub async fn has_refresh_token(&self) -> bool {
        self.inner.state.read().await.refresh_token.is_some()
    }

    pub async fn state(&self) -> AuthState {
        if self.inner.refreshing.load(Ordering::SeqCst) {
            return AuthState::Refreshing;
        }
        let state = self.inner.state.read().await;
        match (&state.access_token, &state.refresh_token) {
            (Some(_), _) => AuthState::Authenticated,
            (None, Some(_)) => AuthState::Restored,
            (None, None) => AuthState::LoggedOut,
        }
    }

    /// Delay until the next scheduled refresh, computed from the current
    /// expiry. `None` when no access token is held.
    pub async fn refresh_delay(&self) -> Option<Duration> {
        let expires_at = self.expires_at().await?;
        Some(compute_refresh_delay(
            expires_at,
            self.inner.clock.now(),
            self.inner.settings.refresh_ahead_window,
        ))
    }

    pub fn is_refresh_scheduled(&self) -> bool {
        self.inner.timer.is_scheduled()
    }

    fn validate_login(&self, account: &str, password: &str) -> Result<Account> {
        if password.is_empty() {
            return Err(AuthError::InvalidAccount(
                "password must not be empty".to_string(),
            ));
        }
        let account = Account::parse(account)?;
        if self.inner.transport.server_base_url().is_empty() {
            return Err(AuthError::NotConfigured(
                "server URL is not set".to_string(),
            ));
        }
        Ok(account)
    }

    fn request(&self, action: &str, body: serde_json::Value) -> RequestConfig {
        let url = format!(
            "{}?action={}",
            self.inner
                .transport
                .api_url(&self.inner.settings.auth_api_endpoint),
            action
        );
        RequestConfig::post(url, body)
            .unauthenticated()
            .max_retries(self.inner.settings.max_retries)
    }

    async fn apply_refresh(&self, grant: AccessGrant) {
        let expires_at = grant.expires_at(self.inner.clock.now());
        let (rotated, user) = {
            let mut state = self.inner.state.write().await;
            state.access_token = Some(grant.access_token.clone());
            state.expires_at = Some(expires_at);
            let rotated = match grant.refresh_token {
                Some(token) => {
                    state.refresh_token = Some(token.clone());
                    Some(token)
                }
                None => None,
            };
            (rotated, state.user.clone())
        };
        self.inner
            .transport
            .set_auth_token(Some(grant.access_token));

        if let (Some(token), Some(user)) = (&rotated, &user) {
            self.persist(token, user).await;
        }
        self.schedule_refresh(expires_at);

        info!(
            expires_at = %expires_at,
            refresh_token_rotated = rotated.is_some(),
            "Access token refreshed"
        );
        self.emit(AuthEvent::TokenRefreshed {
            expires_at: expires_at.timestamp(),
        });
        if let Some(user) = user {
            self.maybe_emit_first_auth(user.uuid);
        }
    }

    async fn on_refresh_failure(&self, err: &AuthError) {
        if err.is_auth_rejection() {
            warn!(error = %err, "Refresh token rejected, clearing credentials");
            self.emit(AuthEvent::TokenRefreshFailed {
                message: err.to_string(),
                recoverable: false,
            });
            self.clear_credentials().await;
            self.emit(AuthEvent::LoginRequired {
                reason: err.to_string(),
            });
        } else {
            warn!(error = %err, "Refresh failed, keeping credentials for a retry");
            self.emit(AuthEvent::TokenRefreshFailed {
                message: err.to_string(),
                recoverable: true,
            });
            self.schedule_tick(REFRESH_RETRY_DELAY, true);
        }
    }

    async fn clear_credentials(&self) {
        self.inner.epoch.fetch_add(1, Ordering::SeqCst);
        self.inner.timer.cancel();
        *self.inner.state.write().await = CredentialState::default();
        self.inner.refreshing.store(false, Ordering::SeqCst);
        self.inner.first_auth_emitted.store(false, Ordering::SeqCst);
        self.inner.transport.set_auth_token(None);

        if let Err(e) = self.inner.store.clear().await {
            warn!(error = %e, "Failed to clear stored credentials");
        }
        debug!("Credentials cleared");
    }

    // A store failure does not fail the login: the session works, it just
    // won't survive a restart.
    async fn persist(&self, refresh_token: &str, user: &UserIdentity) {
        let stored = StoredCredentials::new(refresh_token, user.clone());
        if let Err(e) = self.inner.store.save(&stored).await {
            warn!(error = %e, "Credentials were not persisted");
        }
    }

    fn schedule_refresh(&self, expires_at: DateTime<Utc>) {
        let delay = compute_refresh_delay(
            expires_at,
            self.inner.clock.now(),
            self.inner.settings.refresh_ahead_window,
        );
        // A capped delay lands before the refresh window; re-evaluate then.
        let refresh_on_fire = delay < MAX_REFRESH_DELAY;
        debug!(delay_secs = delay.as_secs(), "Token refresh scheduled");
        self.schedule_tick(delay, refresh_on_fire);
    }

    fn schedule_tick(&self, delay: Duration, refresh_on_fire: bool) {
        let weak: Weak<Inner> = Arc::downgrade(&self.inner);
        self.inner.timer.schedule(delay, move || async move {
            let Some(inner) = weak.upgrade() else {
                return;
            };
            let manager = CredentialManager { inner };
            manager.on_timer(refresh_on_fire).await;
        });
    }

    async fn on_timer(&self, refresh_on_fire: bool) {
        if !refresh_on_fire {
            if let Some(expires_at) = self.expires_at().await {
                self.schedule_refresh(expires_at);
            }
            return;
        }
        if let Err(e) = self.refresh().await {
            debug!(error = %e, "Scheduled refresh failed");
        }
    }

    fn maybe_emit_first_auth(&self, user_uuid: Uuid) {
        if self
            .inner
            .first_auth_emitted
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            info!("First authentication completed");
            self.emit(AuthEvent::FirstAuthCompleted {
                user_uuid: user_uuid.to_string(),
            });
        }
    }

    fn emit(&self, event: AuthEvent) {
        let _ = self.inner.event_bus.emit(CoreEvent::Auth(event));
    }
}

#[async_trait]
impl CredentialProvider for CredentialManager {
    async fn is_authenticated(&self) -> bool {
        CredentialManager::is_authenticated(self).await
    }

    async fn access_token(&self) -> Option<String> {
        CredentialManager::access_token(self).await
    }

    async fn user_uuid(&self) -> Option<Uuid> {
        self.user().await.map(|u| u.uuid)
    }

    async fn handle_auth_failure(&self) -> bool {
        match CredentialManager::handle_auth_failure(self).await {
            Ok(renewed) => renewed,
            Err(e) => {
                debug!(error = %e, "Silent refresh failed");
                false
            }
        }
    }
}
