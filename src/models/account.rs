//! Linked account model.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

use super::pending::PendingTokenEnvelope;

/// Role of an account within a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum AccountRole {
    /// The account the session is signed in as.
    #[default]
    Primary,
    /// An additional linked account.
    Secondary,
}

impl AccountRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccountRole::Primary => "primary",
            AccountRole::Secondary => "secondary",
        }
    }
}

/// Credentials and profile for one linked account.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Account {
    /// Provider subject, or the email when the provider issued no ID token
    pub id: String,
    pub email: String,
    pub role: AccountRole,
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub id_token: Option<String>,
    pub expires_at: DateTime<Utc>,
    pub scopes: BTreeSet<String>,
    pub display_name: Option<String>,
    #[serde(rename = "photoURL")]
    pub photo_url: Option<String>,
}

impl Account {
    /// Build an account from a committed token envelope.
    pub fn from_envelope(envelope: PendingTokenEnvelope) -> Self {
        let id = envelope
            .subject
            .clone()
            .unwrap_or_else(|| envelope.email.to_lowercase());

        Self {
            id,
            email: envelope.email,
            role: envelope.role,
            access_token: envelope.access_token,
            refresh_token: envelope.refresh_token,
            id_token: envelope.id_token,
            expires_at: envelope.expires_at,
            scopes: envelope.scopes,
            display_name: envelope.display_name,
            photo_url: envelope.photo_url,
        }
    }

    /// True if the access token expires within `margin` of `now`.
    pub fn expires_within(&self, now: DateTime<Utc>, margin: Duration) -> bool {
        now + margin >= self.expires_at
    }

    /// Reference addressing this account in a [`SessionStore`](crate::session::SessionStore).
    pub fn reference(&self) -> AccountRef {
        match self.role {
            AccountRole::Primary => AccountRef::Primary,
            AccountRole::Secondary => AccountRef::Secondary(self.email.clone()),
        }
    }
}

// Tokens stay out of logs.
impl fmt::Debug for Account {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Account")
            .field("id", &self.id)
            .field("email", &self.email)
            .field("role", &self.role)
            .field("expires_at", &self.expires_at)
            .field("scopes", &self.scopes)
            .field("has_refresh_token", &self.refresh_token.is_some())
            .finish_non_exhaustive()
    }
}

/// Addresses an account within a session.
///
/// Absence of an email means the primary account.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum AccountRef {
    Primary,
    Secondary(String),
}

impl AccountRef {
    pub fn from_email(email: Option<&str>) -> Self {
        match email {
            Some(email) => AccountRef::Secondary(email.to_string()),
            None => AccountRef::Primary,
        }
    }

    /// Email carried in renewal requests (none for the primary account).
    pub fn email(&self) -> Option<&str> {
        match self {
            AccountRef::Primary => None,
            AccountRef::Secondary(email) => Some(email),
        }
    }
}
