// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! API routes for signed-in users.

use axum::{routing::get, Extension, Json, Router};
use chrono::{Duration, Utc};
use serde::Serialize;
use std::sync::Arc;
#[cfg(feature = "binding-generation")]
use ts_rs::TS;

use crate::middleware::auth::SessionUser;
use crate::routes::cookies::UserMetadata;
use crate::session::refresh::TOKEN_REFRESH_MARGIN_SECS;
use crate::AppState;

/// API routes (require a session cookie).
/// The session middleware is applied in routes/mod.rs for these routes.
pub fn routes() -> Router<Arc<AppState>> {
    Router::new().route("/api/session", get(get_session))
}

/// Session summary for the UI.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
pub struct SessionResponse {
    pub authenticated: bool,
    #[cfg_attr(feature = "binding-generation", ts(skip))]
    pub user: UserMetadata,
    /// Milliseconds since the Unix epoch
    #[cfg_attr(feature = "binding-generation", ts(type = "number | null"))]
    pub expires_at: Option<i64>,
    /// The access token is close enough to expiry that the client should renew
    pub needs_refresh: bool,
}

async fn get_session(Extension(session): Extension<SessionUser>) -> Json<SessionResponse> {
    let margin = Duration::seconds(TOKEN_REFRESH_MARGIN_SECS);
    let needs_refresh = session
        .expires_at
        .is_some_and(|expires_at| Utc::now() + margin >= expires_at);

    Json(SessionResponse {
        authenticated: true,
        expires_at: session.expires_at.map(|t| t.timestamp_millis()),
        user: session.user,
        needs_refresh,
    })
}
