//! Credential Persistence
//!
//! Persists the refresh token and the user identity through the platform
//! `SecureStore` so a restarted process can silently re-authenticate. The
//! access token is never persisted: it is short-lived and is always obtained
//! again through a refresh after a restart.
//!
//! ## Example
//!
//! ```no_run
//! use core_auth::{CredentialStore, StoredCredentials, UserIdentity};
//! use std::sync::Arc;
//! # use bridge_traits::storage::SecureStore;
//! # async fn example(secure_store: Arc<dyn SecureStore>, user: UserIdentity) -> core_auth::Result<()> {
//! let store = CredentialStore::new(secure_store);
//!
//! store.save(&StoredCredentials::new("refresh_token_value", user)).await?;
//! let restored = store.load().await?;
//! store.clear().await?;
//! # Ok(())
//! # }
//! ```

use std::fmt;
use std::sync::Arc;

use bridge_traits::storage::SecureStore;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{AuthError, Result};
use crate::types::UserIdentity;

/// Secure store key holding the serialized credentials.
pub const CREDENTIALS_KEY: &str = "todo_sync.credentials";

/// What survives a restart.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredCredentials {
    pub refresh_token: String,
    pub user: UserIdentity,
}

impl StoredCredentials {
    pub fn new(refresh_token: impl Into<String>, user: UserIdentity) -> Self {
        Self {
            refresh_token: refresh_token.into(),
            user,
        }
    }
}

impl fmt::Debug for StoredCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoredCredentials")
            .field("refresh_token", &"[REDACTED]")
            .field("user", &self.user)
            .finish()
    }
}

/// Secure storage for the refresh token and user identity.
///
/// Values are serialized to JSON under [`CREDENTIALS_KEY`]. Token values are
/// never logged.
#[derive(Clone)]
pub struct CredentialStore {
    secure_store: Arc<dyn SecureStore>,
}

impl CredentialStore {
    pub fn new(secure_store: Arc<dyn SecureStore>) -> Self {
        debug!("Initializing CredentialStore");
        Self { secure_store }
    }

    /// Stores credentials, replacing whatever was stored before.
    pub async fn save(&self, credentials: &StoredCredentials) -> Result<()> {
        let json = serde_json::to_vec(credentials).map_err(|e| {
            warn!(error = %e, "Failed to serialize credentials");
            AuthError::CredentialsCorrupted(e.to_string())
        })?;

        self.secure_store
            .set_secret(CREDENTIALS_KEY, &json)
            .await
            .map_err(|e| {
                warn!(error = %e, "Failed to store credentials in secure storage");
                AuthError::SecureStorageUnavailable(e.to_string())
            })?;

        info!(user_uuid = %credentials.user.uuid, "Credentials stored securely");
        Ok(())
    }

    /// Loads stored credentials.
    ///
    /// Returns `Ok(None)` when nothing is stored. Corrupted data is deleted
    /// and reported as [`AuthError::CredentialsCorrupted`].
    pub async fn load(&self) -> Result<Option<StoredCredentials>> {
        let data = self
            .secure_store
            .get_secret(CREDENTIALS_KEY)
            .await
            .map_err(|e| {
                warn!(error = %e, "Failed to read credentials from secure storage");
                AuthError::SecureStorageUnavailable(e.to_string())
            })?;

        let Some(data) = data else {
            debug!("No stored credentials");
            return Ok(None);
        };

        let stored: StoredCredentials = match serde_json::from_slice(&data) {
            Ok(stored) => stored,
            Err(e) => {
                warn!(error = %e, "Stored credentials are corrupted, discarding them");
                if let Err(delete_err) = self.secure_store.delete_secret(CREDENTIALS_KEY).await {
                    warn!(error = %delete_err, "Failed to delete corrupted credentials");
                }
                return Err(AuthError::CredentialsCorrupted(e.to_string()));
            }
        };

        if stored.refresh_token.is_empty() {
            debug!("Stored credentials carry no refresh token");
            return Ok(None);
        }

        info!(user_uuid = %stored.user.uuid, "Stored credentials loaded");
        Ok(Some(stored))
    }

    /// Removes stored credentials. Idempotent.
    pub async fn clear(&self) -> Result<()> {
        self.secure_store
            .delete_secret(CREDENTIALS_KEY)
            .await
            .map_err(|e| {
                warn!(error = %e, "Failed to delete credentials from secure storage");
                AuthError::SecureStorageUnavailable(e.to_string())
            })?;
        info!("Stored credentials deleted");
        Ok(())
    }

    pub async fn has_credentials(&self) -> Result<bool> {
        self.secure_store
            .has_secret(CREDENTIALS_KEY)
            .await
            .map_err(|e| AuthError::SecureStorageUnavailable(e.to_string()))
    }
}
