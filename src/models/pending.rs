//! Short-lived handshake records.
//!
//! These live for minutes at most and are never written to durable storage.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use uuid::Uuid;
use validator::Validate;

use super::account::AccountRole;
use crate::error::AppError;

/// CSRF record created when a handshake starts; consumed once on callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingAuthorization {
    pub nonce: Uuid,
    pub role: AccountRole,
    pub email: Option<String>,
}

/// The opaque `state` parameter round-tripped through the identity provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct OAuthStateParam {
    pub mode: AccountRole,
    pub nonce: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[validate(email)]
    pub email: Option<String>,
}

impl OAuthStateParam {
    pub fn from_pending(pending: &PendingAuthorization) -> Self {
        Self {
            mode: pending.role,
            nonce: pending.nonce,
            email: pending.email.clone(),
        }
    }

    /// Serialize to the JSON form sent to the provider.
    pub fn encode(&self) -> Result<String, AppError> {
        serde_json::to_string(self)
            .map_err(|e| AppError::Internal(anyhow::anyhow!("State encode failed: {}", e)))
    }

    /// Parse and schema-validate a state parameter received on callback.
    pub fn decode(raw: &str) -> Result<Self, AppError> {
        let param: Self = serde_json::from_str(raw).map_err(|_| AppError::InvalidState)?;
        param.validate().map_err(|_| AppError::InvalidState)?;
        Ok(param)
    }
}

/// Exchanged credentials waiting for the commit step (about 60 seconds).
#[derive(Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct PendingTokenEnvelope {
    #[validate(length(min = 1))]
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub id_token: Option<String>,
    pub expires_at: DateTime<Utc>,
    #[validate(email)]
    pub email: String,
    #[serde(default)]
    pub subject: Option<String>,
    pub display_name: Option<String>,
    #[serde(rename = "photoURL")]
    pub photo_url: Option<String>,
    pub scopes: BTreeSet<String>,
    pub role: AccountRole,
}

impl PendingTokenEnvelope {
    /// Schema check applied when the envelope is read back for commit.
    pub fn check(&self) -> Result<(), AppError> {
        self.validate()
            .map_err(|e| AppError::Validation(format!("token envelope: {}", e)))
    }
}

impl std::fmt::Debug for PendingTokenEnvelope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingTokenEnvelope")
            .field("email", &self.email)
            .field("role", &self.role)
            .field("expires_at", &self.expires_at)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_param_decode_valid() {
        let nonce = Uuid::new_v4();
        let raw = format!(
            r#"{{"mode":"secondary","nonce":"{}","email":"bob@example.com"}}"#,
            nonce
        );
        let param = OAuthStateParam::decode(&raw).unwrap();
        assert_eq!(param.mode, AccountRole::Secondary);
        assert_eq!(param.nonce, nonce);
        assert_eq!(param.email.as_deref(), Some("bob@example.com"));
    }

    #[test]
    fn test_state_param_rejects_bad_email() {
        let raw = format!(
            r#"{{"mode":"primary","nonce":"{}","email":"not-an-email"}}"#,
            Uuid::new_v4()
        );
        assert!(matches!(
            OAuthStateParam::decode(&raw),
            Err(AppError::InvalidState)
        ));
    }

    #[test]
    fn test_state_param_rejects_missing_nonce_and_garbage() {
        assert!(OAuthStateParam::decode(r#"{"mode":"primary"}"#).is_err());
        assert!(OAuthStateParam::decode(r#"{"mode":"admin","nonce":"x"}"#).is_err());
        assert!(OAuthStateParam::decode("not json").is_err());
        assert!(OAuthStateParam::decode("").is_err());
    }

    #[test]
    fn test_state_param_rejects_unknown_fields() {
        let raw = format!(
            r#"{{"mode":"primary","nonce":"{}","redirect":"https://evil"}}"#,
            Uuid::new_v4()
        );
        assert!(OAuthStateParam::decode(&raw).is_err());
    }

    #[test]
    fn test_envelope_check_requires_access_token() {
        let envelope = PendingTokenEnvelope {
            access_token: String::new(),
            refresh_token: None,
            id_token: None,
            expires_at: Utc::now(),
            email: "a@example.com".to_string(),
            subject: None,
            display_name: None,
            photo_url: None,
            scopes: BTreeSet::new(),
            role: AccountRole::Primary,
        };
        assert!(matches!(envelope.check(), Err(AppError::Validation(_))));
    }
}
