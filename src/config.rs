// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Application configuration loaded from environment variables.
//!
//! Secrets are read once at startup and kept in memory.

use std::env;
use std::time::Duration;

/// Default OAuth authorization endpoint (Google).
pub const DEFAULT_AUTHORIZE_URL: &str = "https://accounts.google.com/o/oauth2/v2/auth";
/// Default OAuth token endpoint (Google).
pub const DEFAULT_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
/// Scopes requested when `IDP_SCOPES` is not set.
pub const DEFAULT_SCOPES: &str = "openid email profile";

/// Application configuration, loaded once at startup.
#[derive(Debug, Clone)]
pub struct Config {
    // --- Environment Variables (non-sensitive) ---
    /// OAuth client ID (public)
    pub idp_client_id: String,
    /// Identity provider authorization endpoint
    pub idp_authorize_url: String,
    /// Identity provider token endpoint
    pub idp_token_url: String,
    /// Space-separated scopes requested during the handshake
    pub idp_scopes: String,
    /// Frontend URL for post-handshake redirects
    pub frontend_url: String,
    /// Public URL of this API (used to build the OAuth callback URL)
    pub api_url: String,
    /// GCP project ID (Firestore settings store)
    pub gcp_project_id: String,
    /// Server port
    pub port: u16,
    /// Upper bound on waiting for focus before an interactive renewal
    pub focus_wait_timeout: Duration,
    /// Location of the local settings cache file
    pub settings_cache_path: String,

    // --- Secrets ---
    /// OAuth client secret
    pub idp_client_secret: String,
    /// HMAC key for signing the staged secondary-account cookie (raw bytes)
    pub state_signing_key: Vec<u8>,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// A `.env` file is honored for local development.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let focus_wait_secs = match env::var("FOCUS_WAIT_TIMEOUT_SECS") {
            Ok(raw) => raw
                .trim()
                .parse::<u64>()
                .map_err(|_| ConfigError::Invalid("FOCUS_WAIT_TIMEOUT_SECS", raw))?,
            Err(_) => 30,
        };

        let state_signing_key = env::var("STATE_SIGNING_KEY")
            .map_err(|_| ConfigError::Missing("STATE_SIGNING_KEY"))?
            .into_bytes();
        if state_signing_key.len() < 32 {
            return Err(ConfigError::Invalid(
                "STATE_SIGNING_KEY",
                "must be at least 32 bytes".to_string(),
            ));
        }

        Ok(Self {
            idp_client_id: env::var("IDP_CLIENT_ID")
                .map_err(|_| ConfigError::Missing("IDP_CLIENT_ID"))?,
            idp_authorize_url: env::var("IDP_AUTHORIZE_URL")
                .unwrap_or_else(|_| DEFAULT_AUTHORIZE_URL.to_string()),
            idp_token_url: env::var("IDP_TOKEN_URL")
                .unwrap_or_else(|_| DEFAULT_TOKEN_URL.to_string()),
            idp_scopes: env::var("IDP_SCOPES").unwrap_or_else(|_| DEFAULT_SCOPES.to_string()),
            frontend_url: env::var("FRONTEND_URL")
                .unwrap_or_else(|_| "http://localhost:5173".to_string()),
            api_url: env::var("API_URL").unwrap_or_else(|_| "http://localhost:8080".to_string()),
            gcp_project_id: env::var("GCP_PROJECT_ID").unwrap_or_else(|_| "local-dev".to_string()),
            port: env::var("PORT")
                .unwrap_or_else(|_| "8080".to_string())
                .parse()
                .unwrap_or(8080),
            focus_wait_timeout: Duration::from_secs(focus_wait_secs),
            settings_cache_path: env::var("SETTINGS_CACHE_PATH")
                .unwrap_or_else(|_| "settings-cache.json".to_string()),
            idp_client_secret: env::var("IDP_CLIENT_SECRET")
                .map(|v| v.trim().to_string())
                .map_err(|_| ConfigError::Missing("IDP_CLIENT_SECRET"))?,
            state_signing_key,
        })
    }

    /// Deterministic configuration for tests.
    pub fn test_default() -> Self {
        Self {
            idp_client_id: "test_client_id".to_string(),
            idp_authorize_url: "https://idp.example.com/authorize".to_string(),
            idp_token_url: "https://idp.example.com/token".to_string(),
            idp_scopes: DEFAULT_SCOPES.to_string(),
            frontend_url: "http://localhost:5173".to_string(),
            api_url: "http://localhost:8080".to_string(),
            gcp_project_id: "test-project".to_string(),
            port: 8080,
            focus_wait_timeout: Duration::from_secs(1),
            settings_cache_path: "settings-cache.json".to_string(),
            idp_client_secret: "test_secret".to_string(),
            state_signing_key: b"test_state_key_32_bytes_minimum!!".to_vec(),
        }
    }

    /// Callback URL registered with the identity provider.
    pub fn callback_url(&self) -> String {
        format!("{}/auth/callback", self.api_url.trim_end_matches('/'))
    }

    /// Focus-wait bound for interactive renewals; `0` seconds means unbounded.
    pub fn focus_wait_bound(&self) -> Option<Duration> {
        (!self.focus_wait_timeout.is_zero()).then_some(self.focus_wait_timeout)
    }

    /// Whether cookies should carry the `Secure` attribute.
    ///
    /// Plain-http localhost development would otherwise drop every cookie.
    pub fn secure_cookies(&self) -> bool {
        !(self.frontend_url.starts_with("http://localhost")
            || self.frontend_url.starts_with("http://127.0.0.1"))
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    Missing(&'static str),

    #[error("Invalid value for {0}: {1}")]
    Invalid(&'static str, String),
}
