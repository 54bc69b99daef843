use async_trait::async_trait;
use uuid::Uuid;

/// Read-side view of the credential lifecycle used to gate and recover sync.
///
/// Implemented by [`CredentialManager`](crate::CredentialManager); sync code
/// depends on this trait only, so tests can substitute a fixed identity.
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    /// Whether a non-empty access token is held.
    async fn is_authenticated(&self) -> bool;

    /// Current access token, if any.
    async fn access_token(&self) -> Option<String>;

    /// UUID of the signed-in user.
    async fn user_uuid(&self) -> Option<Uuid>;

    /// Silent refresh after the server rejected the access token.
    ///
    /// Returns `true` when a new access token is in place and the failed
    /// operation may be retried.
    async fn handle_auth_failure(&self) -> bool;
}
