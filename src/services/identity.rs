// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Identity provider client for the OAuth token endpoint.
//!
//! Handles:
//! - Authorization-code exchange
//! - Refresh-token grants (silent renewal)
//! - Classification of provider errors into revoked vs. transient
//! - Profile claims from the returned ID token

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{decode, DecodingKey, Validation};
use serde::Deserialize;
use std::collections::BTreeSet;
use std::sync::Arc;

use crate::config::Config;
use crate::error::AppError;
use crate::session::{CredentialRenewer, RenewalFailure, RenewalRequest, RenewedCredential};

/// Lifetime assumed when the provider omits `expires_in`.
const DEFAULT_EXPIRES_IN_SECS: i64 = 3600;

/// OAuth error codes meaning the grant is dead and the user must sign in again.
const REVOKED_ERROR_CODES: &[&str] = &["invalid_grant", "invalid_token", "unauthorized_client"];

/// Credentials returned by the token endpoint.
#[derive(Clone)]
pub struct ExchangedTokens {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub id_token: Option<String>,
    pub expires_at: DateTime<Utc>,
    pub scopes: BTreeSet<String>,
}

/// Profile claims read from an ID token.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct IdTokenClaims {
    #[serde(default)]
    pub sub: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub picture: Option<String>,
}

/// Token-endpoint operations the handshake and renewal depend on.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Exchange an authorization code for a credential set.
    async fn exchange_code(&self, code: &str) -> Result<ExchangedTokens, AppError>;

    /// Redeem a refresh token.
    async fn refresh(&self, refresh_token: &str) -> Result<ExchangedTokens, RenewalFailure>;
}

/// Raw token endpoint response.
#[derive(Debug, Deserialize)]
struct TokenResponse {
    #[serde(default)]
    access_token: Option<String>,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    id_token: Option<String>,
    #[serde(default)]
    expires_in: Option<i64>,
    #[serde(default)]
    scope: Option<String>,
}

impl TokenResponse {
    fn into_tokens(self) -> Option<ExchangedTokens> {
        let access_token = self.access_token.filter(|t| !t.is_empty())?;
        let expires_in = self.expires_in.unwrap_or(DEFAULT_EXPIRES_IN_SECS);
        Some(ExchangedTokens {
            access_token,
            refresh_token: self.refresh_token.filter(|t| !t.is_empty()),
            id_token: self.id_token,
            expires_at: Utc::now() + Duration::seconds(expires_in),
            scopes: self
                .scope
                .map(|s| s.split_whitespace().map(str::to_string).collect())
                .unwrap_or_default(),
        })
    }
}

/// OAuth error body (RFC 6749 section 5.2).
#[derive(Debug, Deserialize)]
struct OAuthErrorBody {
    error: String,
    #[serde(default)]
    error_description: Option<String>,
}

/// Classify a failed refresh response.
///
/// Revocation-style errors mean the user has to re-authenticate; anything
/// else (5xx, rate limits, garbage bodies) is transient.
pub fn classify_refresh_error(status: u16, body: &str) -> RenewalFailure {
    if let Ok(parsed) = serde_json::from_str::<OAuthErrorBody>(body) {
        let description = parsed.error_description.unwrap_or_default();
        let revoked = REVOKED_ERROR_CODES.contains(&parsed.error.as_str())
            || description.to_lowercase().contains("revoked");
        let message = if description.is_empty() {
            parsed.error
        } else {
            format!("{}: {}", parsed.error, description)
        };
        return RenewalFailure {
            error: message,
            needs_reauth: revoked,
        };
    }

    if status == 401 {
        return RenewalFailure::revoked(format!("HTTP {}", status));
    }
    RenewalFailure::transient(format!("HTTP {}", status))
}

/// Read profile claims from an ID token obtained directly from the token
/// endpoint over TLS, so the signature is not re-verified here.
pub fn decode_id_token_claims(id_token: &str) -> Option<IdTokenClaims> {
    let mut validation = Validation::default();
    validation.insecure_disable_signature_validation();
    validation.validate_aud = false;
    validation.validate_exp = false;
    validation.required_spec_claims.clear();

    decode::<IdTokenClaims>(id_token, &DecodingKey::from_secret(&[]), &validation)
        .map(|data| data.claims)
        .ok()
}

/// HTTP client for the configured token endpoint.
#[derive(Clone)]
pub struct OAuthClient {
    http: reqwest::Client,
    token_url: String,
    client_id: String,
    client_secret: String,
    redirect_uri: String,
}

impl OAuthClient {
    pub fn new(config: &Config) -> Self {
        Self {
            http: reqwest::Client::new(),
            token_url: config.idp_token_url.clone(),
            client_id: config.idp_client_id.clone(),
            client_secret: config.idp_client_secret.clone(),
            redirect_uri: config.callback_url(),
        }
    }
}

#[async_trait]
impl IdentityProvider for OAuthClient {
    async fn exchange_code(&self, code: &str) -> Result<ExchangedTokens, AppError> {
        let response = self
            .http
            .post(&self.token_url)
            .form(&[
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
                ("code", code),
                ("redirect_uri", self.redirect_uri.as_str()),
                ("grant_type", "authorization_code"),
            ])
            .send()
            .await
            .map_err(|e| AppError::TokenExchangeFailed(format!("request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            tracing::error!(status = %status, body = %body, "Token exchange failed");
            return Err(AppError::TokenExchangeFailed(format!(
                "token endpoint returned {}",
                status
            )));
        }

        let parsed: TokenResponse = response.json().await.map_err(|e| {
            AppError::TokenExchangeFailed(format!("failed to parse token response: {}", e))
        })?;

        parsed
            .into_tokens()
            .ok_or_else(|| AppError::TokenExchangeFailed("response has no access token".into()))
    }

    async fn refresh(&self, refresh_token: &str) -> Result<ExchangedTokens, RenewalFailure> {
        let response = self
            .http
            .post(&self.token_url)
            .form(&[
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
                ("refresh_token", refresh_token),
                ("grant_type", "refresh_token"),
            ])
            .send()
            .await
            .map_err(|e| RenewalFailure::transient(format!("request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let failure = classify_refresh_error(status.as_u16(), &body);
            tracing::warn!(
                status = %status,
                needs_reauth = failure.needs_reauth,
                "Refresh grant rejected"
            );
            return Err(failure);
        }

        let parsed: TokenResponse = response
            .json()
            .await
            .map_err(|e| RenewalFailure::transient(format!("JSON parse error: {}", e)))?;

        parsed
            .into_tokens()
            .ok_or_else(|| RenewalFailure::transient("response has no access token"))
    }
}

/// [`CredentialRenewer`] backed by the provider's refresh-token grant.
#[derive(Clone)]
pub struct ProviderRenewer {
    provider: Arc<dyn IdentityProvider>,
}

impl ProviderRenewer {
    pub fn new(provider: Arc<dyn IdentityProvider>) -> Self {
        Self { provider }
    }
}

#[async_trait]
impl CredentialRenewer for ProviderRenewer {
    async fn renew(&self, request: RenewalRequest) -> Result<RenewedCredential, RenewalFailure> {
        let refresh_token = request
            .refresh_token
            .ok_or_else(|| RenewalFailure::revoked("no refresh token available"))?;

        let tokens = self.provider.refresh(&refresh_token).await?;

        Ok(RenewedCredential {
            access_token: tokens.access_token,
            // Providers that do not rotate omit refresh_token; echoing the
            // old one back is not a rotation either.
            refresh_token: tokens.refresh_token.filter(|t| *t != refresh_token),
            expires_at: tokens.expires_at,
        })
    }
}
