// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Per-session credential state and its refresh coordination.

pub mod refresh;
pub mod store;

pub use refresh::{
    AlwaysFocused, CredentialRenewer, FocusSignal, FocusTracker, RefreshCoordinator,
    RenewalFailure, RenewalOutcome, RenewalRequest, RenewedCredential, DEFAULT_FOCUS_WAIT,
};
pub use store::{SessionStore, SharedSessionStore};
