// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Services module - business logic layer.

pub mod handshake;
pub mod identity;
pub mod settings_cache;
pub mod settings_sync;
pub mod transient;

pub use handshake::{AuthorizationStateMachine, CommitOutcome, FailureReason, HandshakeState};
pub use identity::{IdentityProvider, OAuthClient, ProviderRenewer};
pub use settings_cache::{FileSettingsCache, LocalCache, MemorySettingsCache};
pub use settings_sync::{MemoryRemoteStore, ReconcileOutcome, RemoteStore, SettingsSyncEngine};
pub use transient::TransientStore;
