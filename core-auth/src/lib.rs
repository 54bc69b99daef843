//! # Credential Module
//!
//! Access/refresh token lifecycle for the sync engine.
//!
//! ## Overview
//!
//! This crate logs the user in against the auth endpoint, keeps the access
//! token fresh on a timer and persists the refresh token so the next process
//! start can re-authenticate without prompting. Sync code only sees the
//! [`CredentialProvider`] trait.
//!
//! ## Features
//!
//! - Account validation before login
//! - Refresh scheduled ahead of expiry with cancel-and-reschedule semantics
//! - Silent refresh on authentication failures
//! - Secure persistence via the platform `SecureStore`
//! - Auth state event emission

pub mod error;
pub mod manager;
pub mod provider;
pub mod scheduler;
pub mod token_store;
pub mod types;

pub use error::{AuthError, Result};
pub use manager::{AuthSettings, CredentialManager};
pub use provider::CredentialProvider;
pub use scheduler::{compute_refresh_delay, RefreshTimer};
pub use token_store::{CredentialStore, StoredCredentials, CREDENTIALS_KEY};
pub use types::{parse_login_response, AccessGrant, Account, AuthState, UserIdentity};
