use bridge_traits::network::{TransportError, TransportErrorKind};
use core_library::LibraryError;
use core_runtime::events::{EntityKind, SyncResult};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("sync already in progress for {0}")]
    AlreadySyncing(EntityKind),

    #[error("Sync not configured: {0}")]
    NotConfigured(String),

    #[error("Not authenticated")]
    NotAuthenticated,

    #[error("sync cancelled")]
    Cancelled,

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Local store error: {0}")]
    Library(#[from] LibraryError),

    #[error("Invalid server response: {0}")]
    InvalidResponse(String),
}

/// HTTP status the server uses to reject a whole request as conflicting.
const HTTP_CONFLICT: u16 = 409;

impl SyncError {
    /// Result code reported in the terminal sync event.
    pub fn result(&self) -> SyncResult {
        match self {
            SyncError::NotAuthenticated => SyncResult::AuthError,
            SyncError::Transport(e) if e.status == Some(HTTP_CONFLICT) => {
                SyncResult::ConflictError
            }
            SyncError::Transport(e) => SyncResult::from(e.kind),
            SyncError::AlreadySyncing(_)
            | SyncError::NotConfigured(_)
            | SyncError::Cancelled
            | SyncError::Library(_)
            | SyncError::InvalidResponse(_) => SyncResult::UnknownError,
        }
    }

    pub fn is_auth_rejection(&self) -> bool {
        matches!(self, SyncError::Transport(e) if e.kind == TransportErrorKind::Authentication)
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_result_mapping() {
        assert_eq!(
            SyncError::from(TransportError::timeout("slow")).result(),
            SyncResult::NetworkError
        );
        assert_eq!(
            SyncError::from(TransportError::connection("refused")).result(),
            SyncResult::NetworkError
        );
        assert_eq!(
            SyncError::from(TransportError::server("boom").with_status(503)).result(),
            SyncResult::NetworkError
        );
        assert_eq!(
            SyncError::from(TransportError::authentication("expired")).result(),
            SyncResult::AuthError
        );
        assert_eq!(
            SyncError::from(TransportError::parse("not json")).result(),
            SyncResult::UnknownError
        );
        assert_eq!(
            SyncError::from(TransportError::unknown("conflict").with_status(409)).result(),
            SyncResult::ConflictError
        );
        assert_eq!(SyncError::NotAuthenticated.result(), SyncResult::AuthError);
        assert_eq!(SyncError::Cancelled.result(), SyncResult::UnknownError);
    }

    #[test]
    fn test_auth_rejection() {
        assert!(SyncError::from(TransportError::authentication("401")).is_auth_rejection());
        assert!(!SyncError::NotAuthenticated.is_auth_rejection());
    }
}
