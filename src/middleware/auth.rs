// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Cookie-session authentication middleware.

use axum::{
    extract::Request,
    http::header,
    middleware::Next,
    response::Response,
};
use axum_extra::extract::cookie::CookieJar;
use chrono::{DateTime, Utc};

use crate::error::AppError;
use crate::routes::cookies::{self, UserMetadata};

/// Signed-in primary account, as seen by protected handlers.
#[derive(Debug, Clone)]
pub struct SessionUser {
    pub user: UserMetadata,
    /// Access token expiry, when the browser still has it
    pub expires_at: Option<DateTime<Utc>>,
}

impl SessionUser {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|expires_at| expires_at <= now)
    }
}

/// Require a primary-account session.
///
/// The access token comes from its HttpOnly cookie or a bearer header; the
/// display metadata cookie identifies the user. A known-expired token is
/// rejected so the client renews before retrying.
pub async fn require_session(
    jar: CookieJar,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let has_token = jar.get(cookies::ACCESS_TOKEN).is_some()
        || request
            .headers()
            .get(header::AUTHORIZATION)
            .and_then(|h| h.to_str().ok())
            .is_some_and(|h| h.starts_with("Bearer ") && h.len() > 7);
    if !has_token {
        return Err(AppError::Unauthorized);
    }

    let user = jar
        .get(cookies::USER)
        .and_then(|c| UserMetadata::decode(c.value()))
        .ok_or(AppError::Unauthorized)?;

    let expires_at = jar
        .get(cookies::TOKEN_EXPIRY)
        .and_then(|c| c.value().parse::<i64>().ok())
        .and_then(DateTime::from_timestamp_millis);

    let session = SessionUser { user, expires_at };
    if session.is_expired(Utc::now()) {
        tracing::debug!(email = %session.user.email, "Access token expired");
        return Err(AppError::Unauthorized);
    }

    request.extensions_mut().insert(session);
    Ok(next.run(request).await)
}
