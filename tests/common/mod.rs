// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

use account_sync::config::Config;
use account_sync::db::FirestoreDb;
use account_sync::error::AppError;
use account_sync::models::{Account, AccountRole};
use account_sync::routes::create_router;
use account_sync::services::identity::{ExchangedTokens, IdentityProvider};
use account_sync::session::{
    CredentialRenewer, RenewalFailure, RenewalRequest, RenewedCredential,
};
use account_sync::AppState;
use async_trait::async_trait;
use axum::http::header;
use axum::response::Response;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use chrono::{Duration, Utc};
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Check if emulator is available via environment variable.
#[allow(dead_code)]
pub fn emulator_available() -> bool {
    std::env::var("FIRESTORE_EMULATOR_HOST").is_ok()
}

/// Skip test with message if emulator not available.
#[macro_export]
macro_rules! require_emulator {
    () => {
        if !crate::common::emulator_available() {
            eprintln!("⚠️  Skipping: FIRESTORE_EMULATOR_HOST not set");
            return;
        }
    };
}

/// Create a test database connection.
#[allow(dead_code)]
pub async fn test_db() -> FirestoreDb {
    FirestoreDb::new("test-project")
        .await
        .expect("Failed to connect to Firestore emulator")
}

/// Unsigned ID token carrying the given profile claims.
#[allow(dead_code)]
pub fn unsigned_id_token(sub: &str, email: &str, name: &str) -> String {
    let header = URL_SAFE_NO_PAD.encode(r#"{"alg":"RS256","typ":"JWT"}"#);
    let claims = URL_SAFE_NO_PAD.encode(
        serde_json::json!({ "sub": sub, "email": email, "name": name }).to_string(),
    );
    format!("{}.{}.{}", header, claims, URL_SAFE_NO_PAD.encode("sig"))
}

fn local_part(email: &str) -> &str {
    email.split('@').next().unwrap_or(email)
}

/// Identity provider double: codes map to emails, refresh grants are counted
/// and can be made to fail.
#[derive(Default)]
pub struct FakeIdentityProvider {
    codes: Mutex<HashMap<String, String>>,
    refresh_failure: Mutex<Option<RenewalFailure>>,
    rotate_refresh_token: AtomicBool,
    pub exchange_calls: AtomicUsize,
    pub refresh_calls: AtomicUsize,
}

#[allow(dead_code)]
impl FakeIdentityProvider {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Make `code` exchange successfully for `email`.
    pub fn accept_code(&self, code: &str, email: &str) {
        self.codes
            .lock()
            .unwrap()
            .insert(code.to_string(), email.to_string());
    }

    pub fn fail_refresh(&self, failure: RenewalFailure) {
        *self.refresh_failure.lock().unwrap() = Some(failure);
    }

    pub fn rotate_refresh_tokens(&self, rotate: bool) {
        self.rotate_refresh_token.store(rotate, Ordering::SeqCst);
    }
}

#[async_trait]
impl IdentityProvider for FakeIdentityProvider {
    async fn exchange_code(&self, code: &str) -> Result<ExchangedTokens, AppError> {
        self.exchange_calls.fetch_add(1, Ordering::SeqCst);
        let email = self
            .codes
            .lock()
            .unwrap()
            .get(code)
            .cloned()
            .ok_or_else(|| AppError::TokenExchangeFailed("invalid_grant".to_string()))?;

        // Token values stay cookie-safe so tests can compare Set-Cookie values.
        let user = local_part(&email);
        Ok(ExchangedTokens {
            access_token: format!("access-{}", user),
            refresh_token: Some(format!("refresh-{}", user)),
            id_token: Some(unsigned_id_token(&format!("sub-{}", user), &email, "Test User")),
            expires_at: Utc::now() + Duration::hours(1),
            scopes: BTreeSet::from(["email".to_string(), "openid".to_string()]),
        })
    }

    async fn refresh(&self, refresh_token: &str) -> Result<ExchangedTokens, RenewalFailure> {
        let n = self.refresh_calls.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(failure) = self.refresh_failure.lock().unwrap().clone() {
            return Err(failure);
        }

        let rotated = self
            .rotate_refresh_token
            .load(Ordering::SeqCst)
            .then(|| format!("{}-rotated-{}", refresh_token, n));
        Ok(ExchangedTokens {
            access_token: format!("renewed-{}", n),
            refresh_token: rotated,
            id_token: None,
            expires_at: Utc::now() + Duration::hours(1),
            scopes: BTreeSet::new(),
        })
    }
}

/// Renewer double with a configurable delay, outcome and focus requirement.
#[allow(dead_code)]
pub struct FakeRenewer {
    pub calls: AtomicUsize,
    delay: std::time::Duration,
    failure: Mutex<Option<RenewalFailure>>,
    interactive: bool,
}

#[allow(dead_code)]
impl FakeRenewer {
    pub fn new(delay: std::time::Duration) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            delay,
            failure: Mutex::new(None),
            interactive: false,
        })
    }

    pub fn interactive(delay: std::time::Duration) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            delay,
            failure: Mutex::new(None),
            interactive: true,
        })
    }

    pub fn fail_with(&self, failure: RenewalFailure) {
        *self.failure.lock().unwrap() = Some(failure);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CredentialRenewer for FakeRenewer {
    async fn renew(&self, request: RenewalRequest) -> Result<RenewedCredential, RenewalFailure> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        tokio::time::sleep(self.delay).await;
        if let Some(failure) = self.failure.lock().unwrap().clone() {
            return Err(failure);
        }
        Ok(RenewedCredential {
            access_token: format!(
                "renewed-{}-{}",
                request.account.email().unwrap_or("primary"),
                n
            ),
            refresh_token: None,
            expires_at: Utc::now() + Duration::hours(1),
        })
    }

    fn requires_focus(&self) -> bool {
        self.interactive
    }
}

/// Account with an access token that the provider no longer accepts.
#[allow(dead_code)]
pub fn test_account(email: &str, role: AccountRole) -> Account {
    let user = local_part(email);
    Account {
        id: format!("sub-{}", user),
        email: email.to_string(),
        role,
        access_token: format!("stale-{}", user),
        refresh_token: Some(format!("refresh-{}", user)),
        id_token: None,
        expires_at: Utc::now() + Duration::minutes(30),
        scopes: BTreeSet::from(["email".to_string()]),
        display_name: None,
        photo_url: None,
    }
}

/// Create a test app with fake dependencies.
/// Returns the router, the shared state and the provider double.
#[allow(dead_code)]
pub fn create_test_app() -> (axum::Router, Arc<AppState>, Arc<FakeIdentityProvider>) {
    create_test_app_with_config(Config::test_default())
}

#[allow(dead_code)]
pub fn create_test_app_with_frontend_url(
    frontend_url: &str,
) -> (axum::Router, Arc<AppState>, Arc<FakeIdentityProvider>) {
    let mut config = Config::test_default();
    config.frontend_url = frontend_url.to_string();
    create_test_app_with_config(config)
}

fn create_test_app_with_config(
    config: Config,
) -> (axum::Router, Arc<AppState>, Arc<FakeIdentityProvider>) {
    let provider = FakeIdentityProvider::new();
    let state = Arc::new(AppState::new(config, provider.clone()));
    (create_router(state.clone()), state, provider)
}

#[allow(dead_code)]
pub fn set_cookie_headers(response: &Response) -> Vec<String> {
    response
        .headers()
        .get_all(header::SET_COOKIE)
        .iter()
        .map(|value| value.to_str().unwrap().to_string())
        .collect()
}

#[allow(dead_code)]
pub fn find_cookie(headers: &[String], name: &str) -> Option<String> {
    headers
        .iter()
        .find(|value| value.starts_with(&format!("{name}=")))
        .cloned()
}

/// Value part of a `Set-Cookie` header.
#[allow(dead_code)]
pub fn cookie_value(headers: &[String], name: &str) -> Option<String> {
    let cookie = find_cookie(headers, name)?;
    let pair = cookie.split(';').next()?;
    pair.split_once('=').map(|(_, v)| v.to_string())
}

#[allow(dead_code)]
pub fn location(response: &Response) -> String {
    response
        .headers()
        .get(header::LOCATION)
        .expect("response has no Location header")
        .to_str()
        .unwrap()
        .to_string()
}

/// Decoded `state` query parameter of a provider redirect URL.
#[allow(dead_code)]
pub fn state_param(redirect_url: &str) -> String {
    let query = redirect_url.split_once('?').map(|(_, q)| q).unwrap_or("");
    let raw = query
        .split('&')
        .find_map(|pair| pair.strip_prefix("state="))
        .expect("redirect has no state parameter");
    urlencoding::decode(raw).unwrap().into_owned()
}
