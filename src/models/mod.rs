// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@kernel.org>

//! Data models for the application.

pub mod account;
pub mod pending;
pub mod settings;

pub use account::{Account, AccountRef, AccountRole};
pub use pending::{OAuthStateParam, PendingAuthorization, PendingTokenEnvelope};
pub use settings::{Preferences, SettingChange, SettingsRecord, SyncStatus, Theme};
