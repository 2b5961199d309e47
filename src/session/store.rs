// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! In-memory credential set for one authenticated session.
//!
//! Holds exactly one primary account once signed in, any number of secondary
//! accounts, and at most one staged secondary awaiting confirmation. No I/O
//! happens here; writers are the handshake commit and the refresh coordinator.

use std::sync::Arc;
use tokio::sync::RwLock;

use super::refresh::RenewedCredential;
use crate::error::AppError;
use crate::models::{Account, AccountRef, AccountRole, PendingTokenEnvelope};
use crate::services::handshake::CommitOutcome;

/// Store shared between the coordinator and the session owner.
pub type SharedSessionStore = Arc<RwLock<SessionStore>>;

#[derive(Debug, Default, Clone)]
pub struct SessionStore {
    primary: Option<Account>,
    secondaries: Vec<Account>,
    staged: Option<PendingTokenEnvelope>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared(self) -> SharedSessionStore {
        Arc::new(RwLock::new(self))
    }

    pub fn is_authenticated(&self) -> bool {
        self.primary.is_some()
    }

    pub fn primary(&self) -> Option<&Account> {
        self.primary.as_ref()
    }

    pub fn secondaries(&self) -> &[Account] {
        &self.secondaries
    }

    /// Primary first, then secondaries in link order.
    pub fn accounts(&self) -> impl Iterator<Item = &Account> {
        self.primary.iter().chain(self.secondaries.iter())
    }

    pub fn get(&self, account: &AccountRef) -> Option<&Account> {
        match account {
            AccountRef::Primary => self.primary.as_ref(),
            AccountRef::Secondary(email) => self
                .secondaries
                .iter()
                .find(|a| a.email.eq_ignore_ascii_case(email)),
        }
    }

    fn get_mut(&mut self, account: &AccountRef) -> Option<&mut Account> {
        match account {
            AccountRef::Primary => self.primary.as_mut(),
            AccountRef::Secondary(email) => self
                .secondaries
                .iter_mut()
                .find(|a| a.email.eq_ignore_ascii_case(email)),
        }
    }

    /// Install the primary account, replacing any previous one.
    ///
    /// A secondary with the same email is dropped so an account is never
    /// linked twice.
    pub fn set_primary(&mut self, mut account: Account) {
        account.role = AccountRole::Primary;
        self.secondaries
            .retain(|a| !a.email.eq_ignore_ascii_case(&account.email));
        tracing::info!(email = %account.email, "Primary account committed");
        self.primary = Some(account);
    }

    /// Link (or re-link) a secondary account.
    pub fn add_secondary(&mut self, mut account: Account) -> Result<(), AppError> {
        if !self.is_authenticated() {
            return Err(AppError::Unauthorized);
        }
        if self
            .primary
            .as_ref()
            .is_some_and(|p| p.email.eq_ignore_ascii_case(&account.email))
        {
            return Err(AppError::Validation(
                "account is already the primary account".to_string(),
            ));
        }

        account.role = AccountRole::Secondary;
        match self
            .secondaries
            .iter_mut()
            .find(|a| a.email.eq_ignore_ascii_case(&account.email))
        {
            Some(existing) => *existing = account,
            None => self.secondaries.push(account),
        }
        Ok(())
    }

    /// Disconnect a secondary account.
    pub fn remove_secondary(&mut self, email: &str) -> Option<Account> {
        let index = self
            .secondaries
            .iter()
            .position(|a| a.email.eq_ignore_ascii_case(email))?;
        Some(self.secondaries.remove(index))
    }

    /// Hold secondary credentials until the user confirms the link.
    pub fn stage_secondary(&mut self, envelope: PendingTokenEnvelope) {
        self.staged = Some(envelope);
    }

    pub fn staged(&self) -> Option<&PendingTokenEnvelope> {
        self.staged.as_ref()
    }

    /// Promote the staged credentials to a linked secondary account.
    pub fn confirm_secondary(&mut self) -> Result<&Account, AppError> {
        let envelope = self
            .staged
            .take()
            .ok_or_else(|| AppError::BadRequest("no staged account".to_string()))?;
        let email = envelope.email.clone();
        self.add_secondary(Account::from_envelope(envelope))?;
        self.get(&AccountRef::Secondary(email))
            .ok_or_else(|| AppError::Internal(anyhow::anyhow!("staged account vanished")))
    }

    pub fn discard_staged(&mut self) -> Option<PendingTokenEnvelope> {
        self.staged.take()
    }

    /// Apply the result of a completed handshake.
    pub fn commit(&mut self, outcome: CommitOutcome) {
        match outcome {
            CommitOutcome::Primary(account) => self.set_primary(account),
            CommitOutcome::SecondaryStaged(envelope) => self.stage_secondary(envelope),
        }
    }

    /// Rotate credentials after a successful renewal.
    ///
    /// The refresh token only changes when the provider issued a new one.
    /// Returns false if the account is no longer in the session.
    pub fn apply_renewal(&mut self, account: &AccountRef, renewed: &RenewedCredential) -> bool {
        let Some(existing) = self.get_mut(account) else {
            return false;
        };
        existing.access_token = renewed.access_token.clone();
        existing.expires_at = renewed.expires_at;
        if let Some(refresh_token) = &renewed.refresh_token {
            existing.refresh_token = Some(refresh_token.clone());
        }
        true
    }

    /// Logout.
    pub fn clear(&mut self) {
        self.primary = None;
        self.secondaries.clear();
        self.staged = None;
    }
}
