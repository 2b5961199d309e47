// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Session cookie names, builders and the signed staged-account cookie.

use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use time::Duration;

use crate::error::AppError;
use crate::models::{Account, PendingTokenEnvelope};
use crate::session::RenewedCredential;

type HmacSha256 = Hmac<Sha256>;

pub const OAUTH_STATE: &str = "as_oauth_state";
pub const PENDING_TOKEN: &str = "as_pending_token";
pub const PENDING_ACCOUNT: &str = "as_pending_account";
pub const ACCESS_TOKEN: &str = "as_access_token";
pub const ID_TOKEN: &str = "as_id_token";
pub const REFRESH_TOKEN: &str = "as_refresh_token";
pub const USER: &str = "as_user";
pub const TOKEN_EXPIRY: &str = "as_token_expiry";

const OAUTH_STATE_MAX_AGE: Duration = Duration::seconds(600);
const PENDING_MAX_AGE: Duration = Duration::seconds(60);
const ACCESS_TOKEN_MAX_AGE: Duration = Duration::seconds(3600);
const REFRESH_TOKEN_MAX_AGE: Duration = Duration::days(30);
const USER_MAX_AGE: Duration = Duration::days(7);

/// Every artifact a session can leave in the browser.
const SESSION_COOKIES: &[&str] = &[
    OAUTH_STATE,
    PENDING_TOKEN,
    PENDING_ACCOUNT,
    ACCESS_TOKEN,
    ID_TOKEN,
    REFRESH_TOKEN,
    USER,
    TOKEN_EXPIRY,
];

/// Display metadata readable by the frontend (`as_user`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserMetadata {
    pub id: String,
    pub email: String,
    pub display_name: Option<String>,
    #[serde(rename = "photoURL")]
    pub photo_url: Option<String>,
}

impl UserMetadata {
    pub fn from_account(account: &Account) -> Self {
        Self {
            id: account.id.clone(),
            email: account.email.clone(),
            display_name: account.display_name.clone(),
            photo_url: account.photo_url.clone(),
        }
    }

    /// Cookie form: base64url JSON, so no cookie-unsafe characters.
    pub fn encode(&self) -> Result<String, AppError> {
        let json = serde_json::to_vec(self)
            .map_err(|e| AppError::Internal(anyhow::anyhow!("User metadata encode failed: {}", e)))?;
        Ok(URL_SAFE_NO_PAD.encode(json))
    }

    pub fn decode(raw: &str) -> Option<Self> {
        let bytes = URL_SAFE_NO_PAD.decode(raw).ok()?;
        serde_json::from_slice(&bytes).ok()
    }
}

/// Cookie factory bound to the deployment's `Secure` policy.
#[derive(Debug, Clone, Copy)]
pub struct CookieFactory {
    secure: bool,
}

impl CookieFactory {
    pub fn new(secure: bool) -> Self {
        Self { secure }
    }

    fn build(&self, name: &'static str, value: String, max_age: Duration, http_only: bool) -> Cookie<'static> {
        Cookie::build((name, value))
            .path("/")
            .http_only(http_only)
            .secure(self.secure)
            .same_site(SameSite::Lax)
            .max_age(max_age)
            .build()
    }

    /// Removal cookie carrying the same attributes the cookie was set with.
    pub fn removal(&self, name: &'static str) -> Cookie<'static> {
        let http_only = matches!(name, OAUTH_STATE | PENDING_TOKEN | ACCESS_TOKEN | REFRESH_TOKEN);
        let mut cookie = self.build(name, String::new(), Duration::ZERO, http_only);
        cookie.make_removal();
        cookie
    }

    pub fn oauth_state(&self, nonce: &str) -> Cookie<'static> {
        self.build(OAUTH_STATE, nonce.to_string(), OAUTH_STATE_MAX_AGE, true)
    }

    pub fn pending_token(&self, flow_id: &str) -> Cookie<'static> {
        self.build(PENDING_TOKEN, flow_id.to_string(), PENDING_MAX_AGE, true)
    }

    pub fn pending_account(&self, signed: String) -> Cookie<'static> {
        self.build(PENDING_ACCOUNT, signed, PENDING_MAX_AGE, false)
    }

    /// Long-lived artifacts for a committed primary account.
    pub fn primary_session(&self, jar: CookieJar, account: &Account) -> Result<CookieJar, AppError> {
        let metadata = UserMetadata::from_account(account).encode()?;

        let mut jar = jar
            .add(self.build(ACCESS_TOKEN, account.access_token.clone(), ACCESS_TOKEN_MAX_AGE, true))
            .add(self.build(USER, metadata, USER_MAX_AGE, false))
            .add(self.expiry(account.expires_at));

        jar = match &account.id_token {
            Some(id_token) => jar.add(self.build(ID_TOKEN, id_token.clone(), ACCESS_TOKEN_MAX_AGE, false)),
            None => jar.remove(self.removal(ID_TOKEN)),
        };
        if let Some(refresh_token) = &account.refresh_token {
            jar = jar.add(self.build(REFRESH_TOKEN, refresh_token.clone(), REFRESH_TOKEN_MAX_AGE, true));
        }
        Ok(jar)
    }

    /// Rotate the primary's artifacts after a renewal.
    pub fn renewed(&self, jar: CookieJar, credential: &RenewedCredential) -> CookieJar {
        let mut jar = jar
            .add(self.build(
                ACCESS_TOKEN,
                credential.access_token.clone(),
                ACCESS_TOKEN_MAX_AGE,
                true,
            ))
            .add(self.expiry(credential.expires_at));
        if let Some(refresh_token) = &credential.refresh_token {
            jar = jar.add(self.build(REFRESH_TOKEN, refresh_token.clone(), REFRESH_TOKEN_MAX_AGE, true));
        }
        jar
    }

    fn expiry(&self, expires_at: DateTime<Utc>) -> Cookie<'static> {
        self.build(
            TOKEN_EXPIRY,
            expires_at.timestamp_millis().to_string(),
            ACCESS_TOKEN_MAX_AGE,
            false,
        )
    }

    /// Drop every session artifact.
    pub fn clear_all(&self, mut jar: CookieJar) -> CookieJar {
        for name in SESSION_COOKIES.iter().copied() {
            jar = jar.remove(self.removal(name));
        }
        jar
    }
}

fn mac(key: &[u8], payload: &str) -> Result<HmacSha256, AppError> {
    let mut mac = HmacSha256::new_from_slice(key)
        .map_err(|e| AppError::Internal(anyhow::anyhow!("HMAC init failed: {}", e)))?;
    mac.update(payload.as_bytes());
    Ok(mac)
}

/// Sign a staged envelope as `payload.expiry_hex.signature_hex`.
pub fn sign_envelope(
    envelope: &PendingTokenEnvelope,
    key: &[u8],
    now: DateTime<Utc>,
) -> Result<String, AppError> {
    let json = serde_json::to_vec(envelope)
        .map_err(|e| AppError::Internal(anyhow::anyhow!("Envelope encode failed: {}", e)))?;
    let expires = now.timestamp() + PENDING_MAX_AGE.whole_seconds();
    let payload = format!("{}.{:x}", URL_SAFE_NO_PAD.encode(json), expires);

    let signature = mac(key, &payload)?.finalize().into_bytes();
    Ok(format!("{}.{}", payload, hex::encode(signature)))
}

/// Verify and decode a signed envelope. `None` for anything tampered,
/// expired or malformed.
pub fn verify_envelope(raw: &str, key: &[u8], now: DateTime<Utc>) -> Option<PendingTokenEnvelope> {
    let (payload, signature_hex) = raw.rsplit_once('.')?;
    let signature = hex::decode(signature_hex).ok()?;

    if mac(key, payload).ok()?.verify_slice(&signature).is_err() {
        tracing::error!("Staged account signature mismatch, possible tampering");
        return None;
    }

    let (body, expires_hex) = payload.split_once('.')?;
    let expires = i64::from_str_radix(expires_hex, 16).ok()?;
    if now.timestamp() > expires {
        tracing::debug!("Staged account cookie expired");
        return None;
    }

    let bytes = URL_SAFE_NO_PAD.decode(body).ok()?;
    serde_json::from_slice(&bytes).ok()
}
