// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Single-flight credential renewal.
//!
//! A [`RefreshCoordinator`] owns the renewal state for one session. Callers
//! that hit a `needs_reauth` failure while a renewal is already running join
//! that renewal instead of starting another one, then retry their operation
//! exactly once with whatever credential the renewal produced.

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use futures_util::future::{BoxFuture, FutureExt, Shared};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};

use super::store::SharedSessionStore;
use crate::config::Config;
use crate::error::AppError;
use crate::models::{Account, AccountRef};

/// Margin before expiry at which [`RefreshCoordinator::fresh_account`] renews (5 minutes).
pub const TOKEN_REFRESH_MARGIN_SECS: i64 = 5 * 60;

/// Default bound on the focus wait.
pub const DEFAULT_FOCUS_WAIT: Duration = Duration::from_secs(30);

/// Input to a renewal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenewalRequest {
    pub account: AccountRef,
    pub refresh_token: Option<String>,
}

/// Credentials returned by a successful renewal.
#[derive(Clone, PartialEq, Eq)]
pub struct RenewedCredential {
    pub access_token: String,
    /// Present only when the provider rotated the refresh token
    pub refresh_token: Option<String>,
    pub expires_at: DateTime<Utc>,
}

impl std::fmt::Debug for RenewedCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenewedCredential")
            .field("rotated_refresh_token", &self.refresh_token.is_some())
            .field("expires_at", &self.expires_at)
            .finish_non_exhaustive()
    }
}

/// Why a renewal failed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{error}")]
pub struct RenewalFailure {
    pub error: String,
    /// True when the provider revoked or rejected the credential
    pub needs_reauth: bool,
}

impl RenewalFailure {
    pub fn revoked(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            needs_reauth: true,
        }
    }

    pub fn transient(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            needs_reauth: false,
        }
    }
}

impl From<RenewalFailure> for AppError {
    fn from(failure: RenewalFailure) -> Self {
        if failure.needs_reauth {
            AppError::RevokedCredential(failure.error)
        } else {
            AppError::Network(failure.error)
        }
    }
}

/// The externally supplied renewal function.
#[async_trait]
pub trait CredentialRenewer: Send + Sync {
    async fn renew(&self, request: RenewalRequest) -> Result<RenewedCredential, RenewalFailure>;

    /// Whether renewal hands off to a foreground browsing context.
    fn requires_focus(&self) -> bool {
        false
    }
}

/// Foreground state of the browsing context that hosts interactive renewal.
#[async_trait]
pub trait FocusSignal: Send + Sync {
    fn is_focused(&self) -> bool;

    /// Resolves once the context has focus.
    async fn focused(&self);
}

/// Focus signal for contexts with no foreground concept (servers, tests).
#[derive(Debug, Default, Clone, Copy)]
pub struct AlwaysFocused;

#[async_trait]
impl FocusSignal for AlwaysFocused {
    fn is_focused(&self) -> bool {
        true
    }

    async fn focused(&self) {}
}

/// Focus signal driven by the UI layer's focus/blur events.
#[derive(Debug)]
pub struct FocusTracker {
    tx: watch::Sender<bool>,
}

impl FocusTracker {
    pub fn new(focused: bool) -> Self {
        let (tx, _) = watch::channel(focused);
        Self { tx }
    }

    pub fn set_focused(&self, focused: bool) {
        self.tx.send_replace(focused);
    }
}

#[async_trait]
impl FocusSignal for FocusTracker {
    fn is_focused(&self) -> bool {
        *self.tx.borrow()
    }

    async fn focused(&self) {
        let mut rx = self.tx.subscribe();
        // The sender lives in self, so the channel cannot close under us.
        let _ = rx.wait_for(|focused| *focused).await;
    }
}

/// Result of one renewal, shared by every caller that joined it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RenewalOutcome {
    Renewed(RenewedCredential),
    Failed(RenewalFailure),
    /// Focus did not return within the configured bound
    Deferred,
}

type SharedRenewal = Shared<BoxFuture<'static, RenewalOutcome>>;

enum RefreshState {
    Idle,
    Refreshing {
        account: AccountRef,
        renewal: SharedRenewal,
    },
}

/// Coordinates credential renewal for one session.
pub struct RefreshCoordinator {
    store: SharedSessionStore,
    renewer: Arc<dyn CredentialRenewer>,
    focus: Arc<dyn FocusSignal>,
    /// `None` waits for focus indefinitely
    focus_timeout: Option<Duration>,
    state: Mutex<RefreshState>,
}

impl RefreshCoordinator {
    pub fn new(store: SharedSessionStore, renewer: Arc<dyn CredentialRenewer>) -> Self {
        Self {
            store,
            renewer,
            focus: Arc::new(AlwaysFocused),
            focus_timeout: Some(DEFAULT_FOCUS_WAIT),
            state: Mutex::new(RefreshState::Idle),
        }
    }

    /// Coordinator whose focus wait is bounded by `FOCUS_WAIT_TIMEOUT_SECS`.
    pub fn from_config(
        store: SharedSessionStore,
        renewer: Arc<dyn CredentialRenewer>,
        focus: Arc<dyn FocusSignal>,
        config: &Config,
    ) -> Self {
        Self::new(store, renewer).with_focus(focus, config.focus_wait_bound())
    }

    /// Use `focus` to gate interactive renewals, waiting at most `timeout`.
    pub fn with_focus(mut self, focus: Arc<dyn FocusSignal>, timeout: Option<Duration>) -> Self {
        self.focus = focus;
        self.focus_timeout = timeout;
        self
    }

    pub fn store(&self) -> &SharedSessionStore {
        &self.store
    }

    /// Bound on the focus wait; `None` waits indefinitely.
    pub fn focus_timeout(&self) -> Option<Duration> {
        self.focus_timeout
    }

    pub async fn is_refreshing(&self) -> bool {
        matches!(*self.state.lock().await, RefreshState::Refreshing { .. })
    }

    /// Run `operation` with the account's credentials, renewing and retrying
    /// once if it fails with a credential error.
    ///
    /// If renewal fails or is deferred, the operation's original error is
    /// returned so the caller can prompt for re-authentication.
    pub async fn with_auto_refresh<T, F, Fut>(
        &self,
        account: &AccountRef,
        mut operation: F,
    ) -> Result<T, AppError>
    where
        F: FnMut(Account) -> Fut,
        Fut: Future<Output = Result<T, AppError>>,
    {
        let current = self.snapshot(account).await?;
        let used_token = current.access_token.clone();

        let err = match operation(current).await {
            Err(err) if err.needs_reauth() => err,
            other => return other,
        };

        match self.refresh_unless_rotated(account, Some(&used_token)).await {
            RenewalOutcome::Renewed(_) => {
                let fresh = self.snapshot(account).await?;
                operation(fresh).await
            }
            RenewalOutcome::Failed(failure) => {
                tracing::warn!(
                    error = %failure.error,
                    needs_reauth = failure.needs_reauth,
                    "Credential renewal failed"
                );
                Err(err)
            }
            RenewalOutcome::Deferred => {
                tracing::info!("Credential renewal deferred until focus returns");
                Err(err)
            }
        }
    }

    /// Return the account, renewing first if it expires within the margin.
    pub async fn fresh_account(&self, account: &AccountRef) -> Result<Account, AppError> {
        let current = self.snapshot(account).await?;
        let margin = ChronoDuration::seconds(TOKEN_REFRESH_MARGIN_SECS);
        if !current.expires_within(Utc::now(), margin) {
            return Ok(current);
        }

        tracing::info!(email = %current.email, "Access token expiring, refreshing");
        match self.refresh(account).await {
            RenewalOutcome::Renewed(_) => self.snapshot(account).await,
            RenewalOutcome::Failed(failure) => Err(failure.into()),
            RenewalOutcome::Deferred => Err(AppError::RevokedCredential(
                "renewal deferred".to_string(),
            )),
        }
    }

    /// Renew the account's credentials, joining an in-flight renewal for the
    /// same account. A renewal for a different account is awaited first so at
    /// most one renewal runs at a time.
    pub async fn refresh(&self, account: &AccountRef) -> RenewalOutcome {
        self.refresh_unless_rotated(account, None).await
    }

    /// Shared body of [`refresh`](Self::refresh). With `failed_token`, a
    /// renewal is only started if the session still holds that token; if it
    /// was rotated while the caller's request was in flight, the current
    /// credential is returned instead.
    async fn refresh_unless_rotated(
        &self,
        account: &AccountRef,
        failed_token: Option<&str>,
    ) -> RenewalOutcome {
        loop {
            let (renewal, joined_other) = {
                let mut state = self.state.lock().await;
                match &*state {
                    RefreshState::Refreshing {
                        account: in_flight,
                        renewal,
                    } => (renewal.clone(), in_flight != account),
                    RefreshState::Idle => {
                        if let Some(token) = failed_token {
                            if let Some(current) = self.rotated_since(account, token).await {
                                tracing::debug!(?account, "Credential already renewed, retrying");
                                return RenewalOutcome::Renewed(current);
                            }
                        }
                        let renewal = self.start_renewal(account.clone());
                        *state = RefreshState::Refreshing {
                            account: account.clone(),
                            renewal: renewal.clone(),
                        };
                        (renewal, false)
                    }
                }
            };

            let outcome = renewal.clone().await;
            self.finish(&renewal).await;

            if !joined_other {
                return outcome;
            }
        }
    }

    /// The account's credential if it no longer matches `token`.
    async fn rotated_since(&self, account: &AccountRef, token: &str) -> Option<RenewedCredential> {
        let store = self.store.read().await;
        let current = store.get(account)?;
        (current.access_token != token).then(|| RenewedCredential {
            access_token: current.access_token.clone(),
            refresh_token: None,
            expires_at: current.expires_at,
        })
    }

    async fn finish(&self, renewal: &SharedRenewal) {
        let mut state = self.state.lock().await;
        if let RefreshState::Refreshing { renewal: current, .. } = &*state {
            if current.ptr_eq(renewal) {
                *state = RefreshState::Idle;
            }
        }
    }

    fn start_renewal(&self, account: AccountRef) -> SharedRenewal {
        let store = self.store.clone();
        let renewer = self.renewer.clone();
        let focus = self.focus.clone();
        let focus_timeout = self.focus_timeout;

        async move {
            let refresh_token = match store.read().await.get(&account) {
                Some(existing) => existing.refresh_token.clone(),
                None => {
                    return RenewalOutcome::Failed(RenewalFailure::revoked(
                        "account is not part of this session",
                    ))
                }
            };

            if renewer.requires_focus() && !focus.is_focused() {
                tracing::debug!("Waiting for focus before interactive renewal");
                match focus_timeout {
                    Some(limit) => {
                        if tokio::time::timeout(limit, focus.focused()).await.is_err() {
                            return RenewalOutcome::Deferred;
                        }
                    }
                    None => focus.focused().await,
                }
            }

            let request = RenewalRequest {
                account: account.clone(),
                refresh_token,
            };

            match renewer.renew(request).await {
                Ok(renewed) => {
                    if !store.write().await.apply_renewal(&account, &renewed) {
                        tracing::warn!(?account, "Renewed account left the session");
                    }
                    tracing::info!(?account, "Credentials renewed");
                    RenewalOutcome::Renewed(renewed)
                }
                Err(failure) => RenewalOutcome::Failed(failure),
            }
        }
        .boxed()
        .shared()
    }

    async fn snapshot(&self, account: &AccountRef) -> Result<Account, AppError> {
        self.store
            .read()
            .await
            .get(account)
            .cloned()
            .ok_or(AppError::Unauthorized)
    }
}
