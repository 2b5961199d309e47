// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Authorization handshake state machine.
//!
//! `Start → Redirected → CallbackReceived → Validated → Exchanged → Committed`,
//! with `Failed(reason)` reachable from every non-terminal state. Failures are
//! returned as a [`FailureReason`] that the HTTP layer turns into a redirect;
//! nothing here panics or escapes as an unhandled error.

use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use subtle::ConstantTimeEq;
use uuid::Uuid;
use validator::ValidateEmail;

use crate::config::Config;
use crate::models::{Account, AccountRole, OAuthStateParam, PendingAuthorization, PendingTokenEnvelope};
use crate::services::identity::{decode_id_token_claims, IdentityProvider};
use crate::services::transient::TransientStore;

/// Lifetime of a CSRF nonce.
pub const NONCE_TTL: Duration = Duration::from_secs(600);
/// Lifetime of exchanged credentials awaiting commit.
pub const ENVELOPE_TTL: Duration = Duration::from_secs(60);

/// Handshake states.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandshakeState {
    Start,
    Redirected,
    CallbackReceived,
    Validated,
    Exchanged,
    Committed,
    Failed(FailureReason),
}

impl HandshakeState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, HandshakeState::Committed | HandshakeState::Failed(_))
    }

    /// Whether `next` is a legal successor of this state.
    pub fn can_advance_to(&self, next: &HandshakeState) -> bool {
        use HandshakeState::*;
        match (self, next) {
            (current, Failed(_)) => !current.is_terminal(),
            (Start, Redirected)
            | (Redirected, CallbackReceived)
            | (CallbackReceived, Validated)
            | (Validated, Exchanged)
            | (Exchanged, Committed) => true,
            _ => false,
        }
    }
}

/// Machine-readable reason carried back to the application as `error=<code>`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FailureReason {
    #[error("state parameter missing, malformed or not issued by us")]
    InvalidState,
    #[error("callback carried no authorization code")]
    MissingCode,
    #[error("identity provider reported {0}")]
    Provider(String),
    #[error("token exchange failed")]
    TokenExchangeFailed,
    #[error("signed in with a different account than requested")]
    AccountMismatch,
    #[error("pending credentials expired before commit")]
    SessionExpired,
    #[error("payload failed validation")]
    ValidationError,
}

impl FailureReason {
    pub fn code(&self) -> String {
        match self {
            FailureReason::InvalidState => "invalid_state".to_string(),
            FailureReason::MissingCode => "missing_code".to_string(),
            FailureReason::Provider(code) => code.clone(),
            FailureReason::TokenExchangeFailed => "token_exchange_failed".to_string(),
            FailureReason::AccountMismatch => "account_mismatch".to_string(),
            FailureReason::SessionExpired => "session_expired".to_string(),
            FailureReason::ValidationError => "validation_error".to_string(),
        }
    }

    /// Provider error codes are echoed into a URL, so keep only `[a-z_]`.
    fn provider(code: &str) -> Self {
        let cleaned: String = code
            .chars()
            .filter(|c| c.is_ascii_lowercase() || *c == '_')
            .take(64)
            .collect();
        if cleaned.is_empty() {
            FailureReason::Provider("provider_error".to_string())
        } else {
            FailureReason::Provider(cleaned)
        }
    }
}

/// Result of a committed handshake, one variant per account role.
#[derive(Debug, Clone, PartialEq)]
pub enum CommitOutcome {
    /// Replaces the session's primary account.
    Primary(Account),
    /// Held for explicit confirmation; the primary session is untouched.
    SecondaryStaged(PendingTokenEnvelope),
}

/// Output of `Start → Redirected`.
#[derive(Debug, Clone)]
pub struct HandshakeStart {
    /// Identity provider URL the browsing context is sent to
    pub redirect_url: String,
    /// Value for the CSRF-state artifact
    pub nonce: Uuid,
}

/// Query parameters the provider sends back.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CallbackParams {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
}

struct Flow {
    state: HandshakeState,
}

impl Flow {
    fn at(state: HandshakeState) -> Self {
        Self { state }
    }

    fn advance(&mut self, next: HandshakeState) {
        debug_assert!(
            self.state.can_advance_to(&next),
            "illegal handshake transition {:?} -> {:?}",
            self.state,
            next
        );
        tracing::debug!(from = ?self.state, to = ?next, "Handshake transition");
        self.state = next;
    }

    fn fail(&mut self, reason: FailureReason) -> FailureReason {
        tracing::warn!(state = ?self.state, reason = %reason.code(), "Handshake failed");
        self.advance(HandshakeState::Failed(reason.clone()));
        reason
    }
}

/// Provider authorize endpoint settings.
#[derive(Debug, Clone)]
struct AuthorizeEndpoint {
    url: String,
    client_id: String,
    redirect_uri: String,
    scopes: String,
}

/// Drives handshakes for every flow in the process.
#[derive(Clone)]
pub struct AuthorizationStateMachine {
    endpoint: AuthorizeEndpoint,
    provider: Arc<dyn IdentityProvider>,
    nonces: TransientStore<PendingAuthorization>,
    envelopes: TransientStore<PendingTokenEnvelope>,
}

impl AuthorizationStateMachine {
    pub fn new(config: &Config, provider: Arc<dyn IdentityProvider>) -> Self {
        Self {
            endpoint: AuthorizeEndpoint {
                url: config.idp_authorize_url.clone(),
                client_id: config.idp_client_id.clone(),
                redirect_uri: config.callback_url(),
                scopes: config.idp_scopes.clone(),
            },
            provider,
            nonces: TransientStore::new(NONCE_TTL),
            envelopes: TransientStore::new(ENVELOPE_TTL),
        }
    }

    /// `Start → Redirected`: issue a nonce and build the provider URL.
    pub fn begin(
        &self,
        role: AccountRole,
        email: Option<String>,
    ) -> Result<HandshakeStart, FailureReason> {
        let mut flow = Flow::at(HandshakeState::Start);

        if let Some(hint) = &email {
            if !hint.validate_email() {
                return Err(flow.fail(FailureReason::ValidationError));
            }
        }

        let pending = PendingAuthorization {
            nonce: Uuid::new_v4(),
            role,
            email,
        };
        let state = OAuthStateParam::from_pending(&pending)
            .encode()
            .map_err(|_| flow.fail(FailureReason::ValidationError))?;

        let mut redirect_url = format!(
            "{}?client_id={}&redirect_uri={}&response_type=code&scope={}&access_type=offline&state={}",
            self.endpoint.url,
            urlencoding::encode(&self.endpoint.client_id),
            urlencoding::encode(&self.endpoint.redirect_uri),
            urlencoding::encode(&self.endpoint.scopes),
            urlencoding::encode(&state),
        );
        match (&pending.email, role) {
            (Some(hint), _) => {
                redirect_url.push_str("&prompt=consent&login_hint=");
                redirect_url.push_str(&urlencoding::encode(hint));
            }
            // Let the user pick a different account than the signed-in one.
            (None, AccountRole::Secondary) => {
                redirect_url.push_str("&prompt=select_account%20consent")
            }
            (None, AccountRole::Primary) => redirect_url.push_str("&prompt=consent"),
        }

        let nonce = pending.nonce;
        self.nonces.put(nonce.to_string(), pending);
        flow.advance(HandshakeState::Redirected);

        tracing::info!(role = role.as_str(), "Starting handshake, redirecting to provider");
        Ok(HandshakeStart {
            redirect_url,
            nonce,
        })
    }

    /// `Redirected → … → Exchanged`: validate the callback and exchange the
    /// code. Returns the flow id under which the credentials wait for commit.
    pub async fn handle_callback(
        &self,
        params: CallbackParams,
        csrf_nonce: Option<&str>,
    ) -> Result<String, FailureReason> {
        let mut flow = Flow::at(HandshakeState::Redirected);
        flow.advance(HandshakeState::CallbackReceived);

        let pending = self
            .validate_state(params.state.as_deref(), csrf_nonce)
            .map_err(|reason| flow.fail(reason))?;
        flow.advance(HandshakeState::Validated);

        if let Some(error) = params.error.as_deref() {
            return Err(flow.fail(FailureReason::provider(error)));
        }
        let code = params
            .code
            .as_deref()
            .filter(|c| !c.is_empty())
            .ok_or_else(|| flow.fail(FailureReason::MissingCode))?;

        let envelope = self
            .exchange(&pending, code)
            .await
            .map_err(|reason| flow.fail(reason))?;

        let flow_id = Uuid::new_v4().to_string();
        self.envelopes.put(flow_id.clone(), envelope);
        flow.advance(HandshakeState::Exchanged);

        Ok(flow_id)
    }

    /// `CallbackReceived → Validated`.
    ///
    /// The stored nonce is consumed here whatever the outcome, so a state
    /// parameter can never be validated twice.
    pub fn validate_state(
        &self,
        state: Option<&str>,
        csrf_nonce: Option<&str>,
    ) -> Result<PendingAuthorization, FailureReason> {
        let stored = csrf_nonce.and_then(|nonce| self.nonces.take(nonce));

        let param = state
            .ok_or(FailureReason::InvalidState)
            .and_then(|raw| OAuthStateParam::decode(raw).map_err(|_| FailureReason::InvalidState))?;

        // Burn the nonce named in the state too, in case it differs from the cookie.
        let _ = self.nonces.take(&param.nonce.to_string());

        let pending = stored.ok_or(FailureReason::InvalidState)?;
        let nonce_matches: bool = pending
            .nonce
            .as_bytes()
            .ct_eq(param.nonce.as_bytes())
            .into();
        if !nonce_matches {
            tracing::error!("Handshake nonce mismatch, possible CSRF");
            return Err(FailureReason::InvalidState);
        }
        if pending.role != param.mode || pending.email != param.email {
            return Err(FailureReason::InvalidState);
        }

        Ok(pending)
    }

    /// `Validated → Exchanged`.
    async fn exchange(
        &self,
        pending: &PendingAuthorization,
        code: &str,
    ) -> Result<PendingTokenEnvelope, FailureReason> {
        let tokens = self.provider.exchange_code(code).await.map_err(|e| {
            tracing::error!(error = %e, "Authorization code exchange failed");
            FailureReason::TokenExchangeFailed
        })?;

        let claims = tokens
            .id_token
            .as_deref()
            .and_then(decode_id_token_claims)
            .unwrap_or_default();

        let email = claims
            .email
            .clone()
            .or_else(|| pending.email.clone())
            .ok_or_else(|| {
                tracing::error!("Provider returned no email claim");
                FailureReason::TokenExchangeFailed
            })?;

        if let Some(hint) = &pending.email {
            if !hint.eq_ignore_ascii_case(&email) {
                return Err(FailureReason::AccountMismatch);
            }
        }

        Ok(PendingTokenEnvelope {
            access_token: tokens.access_token,
            refresh_token: tokens.refresh_token,
            id_token: tokens.id_token,
            expires_at: tokens.expires_at,
            email,
            subject: claims.sub,
            display_name: claims.name,
            photo_url: claims.picture,
            scopes: tokens.scopes,
            role: pending.role,
        })
    }

    /// `Exchanged → Committed`: read back the envelope and branch on role.
    pub fn commit(&self, flow_id: Option<&str>) -> Result<CommitOutcome, FailureReason> {
        let mut flow = Flow::at(HandshakeState::Exchanged);

        let envelope = flow_id
            .and_then(|id| self.envelopes.take(id))
            .ok_or_else(|| flow.fail(FailureReason::SessionExpired))?;

        if let Err(e) = envelope.check() {
            tracing::error!(error = %e, "Pending token envelope rejected");
            return Err(flow.fail(FailureReason::ValidationError));
        }

        let outcome = match envelope.role {
            AccountRole::Primary => CommitOutcome::Primary(Account::from_envelope(envelope)),
            AccountRole::Secondary => CommitOutcome::SecondaryStaged(envelope),
        };
        flow.advance(HandshakeState::Committed);
        Ok(outcome)
    }

    /// Drop expired nonces and envelopes.
    pub fn purge_expired(&self) -> usize {
        self.nonces.purge_expired() + self.envelopes.purge_expired()
    }
}
