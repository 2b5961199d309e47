// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@kernel.org>

//! Account-Sync: linked identity-provider accounts and synchronized settings
//!
//! This crate provides the session and renewal machinery for a user with a
//! primary and any number of secondary accounts, the HTTP handshake that links
//! them, and a local-first settings store reconciled with Firestore.

pub mod config;
pub mod db;
pub mod error;
pub mod middleware;
pub mod models;
pub mod routes;
pub mod services;
pub mod session;

use config::Config;
use routes::cookies::CookieFactory;
use services::{AuthorizationStateMachine, IdentityProvider, ProviderRenewer};
use session::CredentialRenewer;
use std::sync::Arc;

/// Shared application state.
pub struct AppState {
    pub config: Config,
    pub handshake: AuthorizationStateMachine,
    pub renewer: Arc<dyn CredentialRenewer>,
    pub cookies: CookieFactory,
}

impl AppState {
    pub fn new(config: Config, provider: Arc<dyn IdentityProvider>) -> Self {
        Self {
            handshake: AuthorizationStateMachine::new(&config, provider.clone()),
            renewer: Arc::new(ProviderRenewer::new(provider)),
            cookies: CookieFactory::new(config.secure_cookies()),
            config,
        }
    }
}
