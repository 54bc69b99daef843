use bridge_traits::network::TransportError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AuthError {
    #[error("Invalid account: {0}")]
    InvalidAccount(String),

    #[error("Authentication is not configured: {0}")]
    NotConfigured(String),

    #[error("Invalid server response: {0}")]
    InvalidResponse(String),

    #[error("No refresh token available")]
    MissingRefreshToken,

    #[error("Network request failed: {0}")]
    Transport(#[from] TransportError),

    #[error("Secure storage unavailable: {0}")]
    SecureStorageUnavailable(String),

    #[error("Stored credentials are corrupted: {0}")]
    CredentialsCorrupted(String),

    #[error("Not authenticated")]
    NotAuthenticated,
}

impl AuthError {
    /// True when the server rejected the credentials themselves, as opposed
    /// to a transient network failure.
    pub fn is_auth_rejection(&self) -> bool {
        matches!(
            self,
            AuthError::Transport(TransportError {
                kind: bridge_traits::network::TransportErrorKind::Authentication,
                ..
            })
        )
    }
}

pub type Result<T> = std::result::Result<T, AuthError>;
