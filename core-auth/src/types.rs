//! Credential types shared by the manager and the credential store.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::{AuthError, Result};

/// The signed-in user as reported by the login endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserIdentity {
    pub uuid: Uuid,
    pub username: String,
    /// May be empty: the server does not always return it.
    #[serde(default)]
    pub email: String,
}

/// A validated login account.
///
/// An account containing `@` is treated as an email address, anything else
/// as a username.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Account {
    Username(String),
    Email(String),
}

impl Account {
    /// Validates the account format.
    ///
    /// ```
    /// use core_auth::Account;
    ///
    /// assert!(Account::parse("alice_01").is_ok());
    /// assert!(Account::parse("alice@example.com").is_ok());
    /// assert!(Account::parse("al").is_err());
    /// ```
    pub fn parse(raw: &str) -> Result<Self> {
        let account = raw;
        if account.contains('@') {
            if account.starts_with('@') || account.ends_with('@') || !account.contains('.') {
                return Err(AuthError::InvalidAccount(
                    "invalid email address".to_string(),
                ));
            }
            return Ok(Account::Email(account.to_string()));
        }

        let len = account.chars().count();
        let charset_ok = account
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_');
        if !(3..=20).contains(&len) || !charset_ok {
            return Err(AuthError::InvalidAccount(
                "username must be 3-20 letters, digits or underscores".to_string(),
            ));
        }
        Ok(Account::Username(account.to_string()))
    }

    pub fn as_str(&self) -> &str {
        match self {
            Account::Username(s) | Account::Email(s) => s,
        }
    }
}

impl fmt::Display for Account {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tokens returned by a login or refresh call.
#[derive(Clone, PartialEq, Eq)]
pub struct AccessGrant {
    pub access_token: String,
    /// `None` when a refresh response did not rotate the refresh token.
    pub refresh_token: Option<String>,
    /// Seconds until the access token expires, already clamped to the
    /// configured lifetime.
    pub expires_in: i64,
}

impl AccessGrant {
    /// Parses a refresh response: `access_token` is required, `refresh_token`
    /// and `expires_in` are optional.
    pub fn from_refresh_response(body: &Value, lifetime_secs: i64) -> Result<Self> {
        let access_token = non_empty_str(body, "access_token").ok_or_else(|| {
            AuthError::InvalidResponse("response is missing access_token".to_string())
        })?;
        Ok(Self {
            access_token,
            refresh_token: non_empty_str(body, "refresh_token"),
            expires_in: clamp_expires_in(body.get("expires_in"), lifetime_secs),
        })
    }

    /// Expiry instant measured from `now`.
    pub fn expires_at(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now + chrono::Duration::seconds(self.expires_in)
    }
}

impl fmt::Debug for AccessGrant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessGrant")
            .field("access_token", &"[REDACTED]")
            .field(
                "refresh_token",
                &self.refresh_token.as_ref().map(|_| "[REDACTED]"),
            )
            .field("expires_in", &self.expires_in)
            .finish()
    }
}

/// Parses a login response into tokens and the user identity.
///
/// `access_token`, `refresh_token`, `user.username` and a valid `user.uuid`
/// are required.
pub fn parse_login_response(
    body: &Value,
    lifetime_secs: i64,
) -> Result<(AccessGrant, UserIdentity)> {
    let missing =
        |what: &str| AuthError::InvalidResponse(format!("response is missing {}", what));

    let access_token =
        non_empty_str(body, "access_token").ok_or_else(|| missing("access_token"))?;
    let refresh_token =
        non_empty_str(body, "refresh_token").ok_or_else(|| missing("refresh_token"))?;
    let user = body
        .get("user")
        .filter(|u| u.is_object())
        .ok_or_else(|| missing("user"))?;
    let username = non_empty_str(user, "username").ok_or_else(|| missing("user.username"))?;
    let uuid = user
        .get("uuid")
        .and_then(Value::as_str)
        .and_then(|s| Uuid::parse_str(s).ok())
        .filter(|u| !u.is_nil())
        .ok_or_else(|| missing("a valid user.uuid"))?;
    let email = user
        .get("email")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();

    let grant = AccessGrant {
        access_token,
        refresh_token: Some(refresh_token),
        expires_in: clamp_expires_in(body.get("expires_in"), lifetime_secs),
    };
    Ok((
        grant,
        UserIdentity {
            uuid,
            username,
            email,
        },
    ))
}

fn non_empty_str(value: &Value, key: &str) -> Option<String> {
    value
        .get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

// Out-of-range or missing lifetimes fall back to the configured lifetime.
fn clamp_expires_in(raw: Option<&Value>, lifetime_secs: i64) -> i64 {
    match raw.and_then(Value::as_i64) {
        Some(secs) if secs > 0 && secs <= lifetime_secs => secs,
        _ => lifetime_secs,
    }
}

/// Coarse credential state.
///
/// ```text
/// LoggedOut -> Authenticated <-> Refreshing
///     ^              |
///     +--------------+  (logout / refresh rejected)
/// ```
///
/// `Refreshing` says nothing about whether an access token is currently held.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AuthState {
    LoggedOut,
    /// A refresh token is held but no access token yet (after a restore).
    Restored,
    Authenticated,
    Refreshing,
}

impl fmt::Display for AuthState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthState::LoggedOut => write!(f, "Logged Out"),
            AuthState::Restored => write!(f, "Restored"),
            AuthState::Authenticated => write!(f, "Authenticated"),
            AuthState::Refreshing => write!(f, "Refreshing"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_username_rules() {
        assert_eq!(
            Account::parse("bob").unwrap(),
            Account::Username("bob".to_string())
        );
        assert!(Account::parse("a_very_long_username_1").is_err());
        assert!(Account::parse("bad name").is_err());
        assert!(Account::parse("ab").is_err());
        assert!(Account::parse("").is_err());
    }

    #[test]
    fn test_email_rules() {
        assert!(matches!(
            Account::parse("a@b.com").unwrap(),
            Account::Email(_)
        ));
        assert!(Account::parse("@b.com").is_err());
        assert!(Account::parse("a@").is_err());
        assert!(Account::parse("a@localhost").is_err());
    }

    #[test]
    fn test_parse_login_response() {
        let body = json!({
            "access_token": "at",
            "refresh_token": "rt",
            "expires_in": 1800,
            "user": {"uuid": "6f1c2a4e-6e0b-4a9b-9d55-3f1f7b2f9c10", "username": "alice"}
        });
        let (grant, user) = parse_login_response(&body, 3600).unwrap();
        assert_eq!(grant.access_token, "at");
        assert_eq!(grant.refresh_token.as_deref(), Some("rt"));
        assert_eq!(grant.expires_in, 1800);
        assert_eq!(user.username, "alice");
        assert_eq!(user.email, "");
    }

    #[test]
    fn test_login_response_requires_valid_uuid() {
        let body = json!({
            "access_token": "at",
            "refresh_token": "rt",
            "user": {"uuid": "not-a-uuid", "username": "alice"}
        });
        let err = parse_login_response(&body, 3600).unwrap_err();
        assert!(matches!(err, AuthError::InvalidResponse(_)));

        let body = json!({"access_token": "at", "user": {"username": "alice"}});
        assert!(parse_login_response(&body, 3600).is_err());
    }

    #[test]
    fn test_expires_in_is_clamped() {
        let grant = AccessGrant::from_refresh_response(
            &json!({"access_token": "a", "expires_in": 999_999}),
            3600,
        )
        .unwrap();
        assert_eq!(grant.expires_in, 3600);
        assert!(grant.refresh_token.is_none());

        let grant =
            AccessGrant::from_refresh_response(&json!({"access_token": "a", "expires_in": -5}), 3600)
                .unwrap();
        assert_eq!(grant.expires_in, 3600);
    }

    #[test]
    fn test_grant_debug_redacts_tokens() {
        let grant = AccessGrant {
            access_token: "secret-access".to_string(),
            refresh_token: Some("secret-refresh".to_string()),
            expires_in: 60,
        };
        let debug = format!("{:?}", grant);
        assert!(!debug.contains("secret-access"));
        assert!(!debug.contains("secret-refresh"));
        assert!(debug.contains("[REDACTED]"));
    }
}
