//! Storage Abstractions
//!
//! Secure credential storage and key-value settings storage. The record store
//! itself is not a bridge: it lives in `core-library` on top of SQLite.

use async_trait::async_trait;

use crate::error::Result;

/// Secure credential storage trait
///
/// Abstracts platform-specific secure storage:
/// - macOS/iOS: Keychain
/// - Windows: Credential Manager
/// - Linux: Secret Service
///
/// # Example
///
/// ```ignore
/// use bridge_traits::storage::SecureStore;
///
/// async fn store_credentials(store: &dyn SecureStore, blob: &[u8]) -> Result<()> {
///     store.set_secret("credentials", blob).await
/// }
/// ```
#[async_trait]
pub trait SecureStore: Send + Sync {
    /// Store a secret value, replacing any previous value.
    async fn set_secret(&self, key: &str, value: &[u8]) -> Result<()>;

    /// Retrieve a secret value
    ///
    /// Returns `Ok(None)` if the key doesn't exist. Returned data must not be
    /// logged.
    async fn get_secret(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Delete a secret. Deleting a missing key is not an error.
    async fn delete_secret(&self, key: &str) -> Result<()>;

    /// Check if a secret exists without retrieving it
    async fn has_secret(&self, key: &str) -> Result<bool> {
        Ok(self.get_secret(key).await?.is_some())
    }

    /// List all secret keys (without values)
    async fn list_keys(&self) -> Result<Vec<String>>;

    /// Clear all secrets
    async fn clear_all(&self) -> Result<()>;
}

/// Key-value settings storage trait
///
/// Used for small pieces of non-secret state such as the last successful sync
/// time per entity.
#[async_trait]
pub trait SettingsStore: Send + Sync {
    async fn set_string(&self, key: &str, value: &str) -> Result<()>;

    async fn get_string(&self, key: &str) -> Result<Option<String>>;

    async fn set_i64(&self, key: &str, value: i64) -> Result<()>;

    async fn get_i64(&self, key: &str) -> Result<Option<i64>>;

    async fn delete(&self, key: &str) -> Result<()>;

    async fn has_key(&self, key: &str) -> Result<bool> {
        Ok(self.get_string(key).await?.is_some())
    }

    async fn list_keys(&self) -> Result<Vec<String>>;

    async fn clear_all(&self) -> Result<()>;
}
