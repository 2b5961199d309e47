// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Account-linking handshake and credential renewal routes.

use axum::{
    body::Bytes,
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Redirect, Response},
    routing::{get, post},
    Json, Router,
};
use axum_extra::extract::cookie::CookieJar;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
#[cfg(feature = "binding-generation")]
use ts_rs::TS;

use crate::config::Config;
use crate::error::{AppError, Result};
use crate::models::{Account, AccountRef, AccountRole};
use crate::routes::cookies::{self, sign_envelope, verify_envelope, UserMetadata};
use crate::services::handshake::{CallbackParams, CommitOutcome, FailureReason};
use crate::session::RenewalRequest;
use crate::AppState;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/auth/login", get(login))
        .route("/auth/callback", get(callback))
        .route("/auth/complete", get(complete))
        .route("/auth/refresh", post(refresh))
        .route("/auth/accounts/confirm", post(confirm_account))
        .route("/auth/logout", post(logout))
}

/// Send the browser back to the application with `error=<code>`.
fn failure_redirect(config: &Config, code: &str) -> Redirect {
    let url = format!(
        "{}/?error={}",
        config.frontend_url.trim_end_matches('/'),
        urlencoding::encode(code)
    );
    Redirect::temporary(&url)
}

// ─── Handshake ───────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct LoginParams {
    #[serde(default)]
    mode: Option<String>,
    #[serde(default)]
    email: Option<String>,
}

/// Start a handshake for a primary or secondary account.
async fn login(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    Query(params): Query<LoginParams>,
) -> (CookieJar, Redirect) {
    let role = match params.mode.as_deref().map(str::trim) {
        None | Some("") | Some("primary") => AccountRole::Primary,
        Some("secondary") => AccountRole::Secondary,
        Some(other) => {
            tracing::warn!(mode = %other, "Unknown handshake mode");
            return (
                jar,
                failure_redirect(&state.config, &FailureReason::ValidationError.code()),
            );
        }
    };
    let email = params
        .email
        .map(|e| e.trim().to_string())
        .filter(|e| !e.is_empty());

    match state.handshake.begin(role, email) {
        Ok(start) => {
            let jar = jar.add(state.cookies.oauth_state(&start.nonce.to_string()));
            (jar, Redirect::temporary(&start.redirect_url))
        }
        Err(reason) => (jar, failure_redirect(&state.config, &reason.code())),
    }
}

/// Provider callback: validate state and exchange the code.
async fn callback(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    Query(params): Query<CallbackParams>,
) -> (CookieJar, Redirect) {
    let csrf_nonce = jar.get(cookies::OAUTH_STATE).map(|c| c.value().to_string());
    let jar = jar.remove(state.cookies.removal(cookies::OAUTH_STATE));

    match state
        .handshake
        .handle_callback(params, csrf_nonce.as_deref())
        .await
    {
        Ok(flow_id) => {
            let complete_url = format!(
                "{}/auth/complete",
                state.config.api_url.trim_end_matches('/')
            );
            (
                jar.add(state.cookies.pending_token(&flow_id)),
                Redirect::temporary(&complete_url),
            )
        }
        Err(reason) => (jar, failure_redirect(&state.config, &reason.code())),
    }
}

/// Commit the exchanged credentials according to the requested role.
async fn complete(State(state): State<Arc<AppState>>, jar: CookieJar) -> (CookieJar, Redirect) {
    let flow_id = jar.get(cookies::PENDING_TOKEN).map(|c| c.value().to_string());
    let cleared = jar.remove(state.cookies.removal(cookies::PENDING_TOKEN));

    let outcome = match state.handshake.commit(flow_id.as_deref()) {
        Ok(outcome) => outcome,
        Err(reason) => return (cleared, failure_redirect(&state.config, &reason.code())),
    };

    match issue_artifacts(&state, cleared.clone(), outcome) {
        Ok(done) => done,
        Err(e) => {
            tracing::error!(error = %e, "Failed to issue session artifacts");
            (cleared, failure_redirect(&state.config, e.code()))
        }
    }
}

fn issue_artifacts(
    state: &AppState,
    jar: CookieJar,
    outcome: CommitOutcome,
) -> Result<(CookieJar, Redirect)> {
    let frontend = state.config.frontend_url.trim_end_matches('/');

    match outcome {
        CommitOutcome::Primary(account) => {
            let jar = state.cookies.primary_session(jar, &account)?;
            tracing::info!(email = %account.email, "Primary account signed in");
            Ok((jar, Redirect::temporary(&format!("{}/", frontend))))
        }
        CommitOutcome::SecondaryStaged(envelope) => {
            let signed = sign_envelope(&envelope, &state.config.state_signing_key, Utc::now())?;
            tracing::info!(email = %envelope.email, "Secondary account staged for confirmation");
            Ok((
                jar.add(state.cookies.pending_account(signed)),
                Redirect::temporary(&format!("{}/settings?newAccount=pending", frontend)),
            ))
        }
    }
}

/// Accept the staged secondary account. The client adds the returned
/// account to its session.
async fn confirm_account(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
) -> Result<(CookieJar, Json<Account>)> {
    let primary = jar
        .get(cookies::USER)
        .and_then(|c| UserMetadata::decode(c.value()))
        .filter(|_| jar.get(cookies::ACCESS_TOKEN).is_some())
        .ok_or(AppError::Unauthorized)?;

    let raw = jar
        .get(cookies::PENDING_ACCOUNT)
        .map(|c| c.value().to_string())
        .ok_or_else(|| AppError::BadRequest("No account awaiting confirmation".to_string()))?;
    let jar = jar.remove(state.cookies.removal(cookies::PENDING_ACCOUNT));

    let envelope = verify_envelope(&raw, &state.config.state_signing_key, Utc::now())
        .ok_or(AppError::InvalidState)?;
    envelope.check()?;

    if envelope.role != AccountRole::Secondary {
        return Err(AppError::Validation("staged account is not secondary".to_string()));
    }
    if envelope.email.eq_ignore_ascii_case(&primary.email) {
        return Err(AppError::Validation(
            "account is already signed in as primary".to_string(),
        ));
    }

    let account = Account::from_envelope(envelope);
    tracing::info!(email = %account.email, primary = %primary.email, "Secondary account linked");
    Ok((jar, Json(account)))
}

/// Clear every session artifact.
async fn logout(State(state): State<Arc<AppState>>, jar: CookieJar) -> (CookieJar, StatusCode) {
    tracing::info!("Signing out");
    (state.cookies.clear_all(jar), StatusCode::NO_CONTENT)
}

// ─── Renewal ─────────────────────────────────────────────────

/// Renewal request. No email means the primary account; a missing refresh
/// token is read from the primary's cookie.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshRequest {
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
pub struct RefreshResponse {
    pub access_token: String,
    /// Present only when the provider rotated the refresh token
    pub refresh_token: Option<String>,
    /// Milliseconds since the Unix epoch
    #[cfg_attr(feature = "binding-generation", ts(type = "number"))]
    pub expires_at: i64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
pub struct RefreshFailureResponse {
    pub error: String,
    pub needs_reauth: bool,
}

async fn refresh(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    body: Bytes,
) -> Result<Response> {
    let request: RefreshRequest = if body.is_empty() {
        RefreshRequest::default()
    } else {
        serde_json::from_slice(&body)
            .map_err(|e| AppError::BadRequest(format!("Invalid refresh request: {}", e)))?
    };

    let account = AccountRef::from_email(request.email.as_deref());
    let refresh_token = request
        .refresh_token
        .filter(|t| !t.is_empty())
        .or_else(|| match account {
            AccountRef::Primary => jar.get(cookies::REFRESH_TOKEN).map(|c| c.value().to_string()),
            AccountRef::Secondary(_) => None,
        });

    let outcome = state
        .renewer
        .renew(RenewalRequest {
            account: account.clone(),
            refresh_token,
        })
        .await;

    match outcome {
        Ok(credential) => {
            tracing::info!(email = ?account.email(), "Credential renewed");
            let jar = match account {
                AccountRef::Primary => state.cookies.renewed(jar, &credential),
                AccountRef::Secondary(_) => jar,
            };
            let body = RefreshResponse {
                access_token: credential.access_token,
                refresh_token: credential.refresh_token,
                expires_at: credential.expires_at.timestamp_millis(),
            };
            Ok((jar, Json(body)).into_response())
        }
        Err(failure) => {
            tracing::warn!(
                email = ?account.email(),
                needs_reauth = failure.needs_reauth,
                error = %failure.error,
                "Credential renewal failed"
            );
            let status = if failure.needs_reauth {
                StatusCode::UNAUTHORIZED
            } else {
                StatusCode::BAD_GATEWAY
            };
            let body = RefreshFailureResponse {
                error: failure.error,
                needs_reauth: failure.needs_reauth,
            };
            Ok((status, Json(body)).into_response())
        }
    }
}
