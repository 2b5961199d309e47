// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Application error types with consistent API responses.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

/// Application error type that converts to HTTP responses.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Authentication required")]
    Unauthorized,

    #[error("Invalid or expired authorization state")]
    InvalidState,

    #[error("Missing authorization code")]
    MissingAuthorizationCode,

    #[error("Token exchange failed: {0}")]
    TokenExchangeFailed(String),

    #[error("Credential revoked or invalid: {0}")]
    RevokedCredential(String),

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Local storage error: {0}")]
    LocalStorage(String),

    #[error("Remote sync error: {0}")]
    RemoteSync(String),

    #[error("Internal server error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl AppError {
    /// Whether the caller should renew credentials (or re-authenticate).
    pub fn needs_reauth(&self) -> bool {
        matches!(self, AppError::RevokedCredential(_) | AppError::Unauthorized)
    }

    /// Machine-readable reason code used in API bodies and redirect URLs.
    pub fn code(&self) -> &'static str {
        match self {
            AppError::Unauthorized => "unauthorized",
            AppError::InvalidState => "invalid_state",
            AppError::MissingAuthorizationCode => "missing_code",
            AppError::TokenExchangeFailed(_) => "token_exchange_failed",
            AppError::RevokedCredential(_) => "revoked_credential",
            AppError::Validation(_) => "validation_error",
            AppError::BadRequest(_) => "bad_request",
            AppError::Network(_) => "network_error",
            AppError::LocalStorage(_) => "local_storage_error",
            AppError::RemoteSync(_) => "remote_sync_error",
            AppError::Internal(_) => "internal_error",
        }
    }
}

/// JSON error response body
#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<String>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, details) = match &self {
            AppError::Unauthorized | AppError::InvalidState => (StatusCode::UNAUTHORIZED, None),
            AppError::RevokedCredential(_) => (StatusCode::UNAUTHORIZED, None),
            AppError::MissingAuthorizationCode => (StatusCode::BAD_REQUEST, None),
            AppError::Validation(msg) | AppError::BadRequest(msg) => {
                (StatusCode::BAD_REQUEST, Some(msg.clone()))
            }
            AppError::TokenExchangeFailed(msg) | AppError::Network(msg) => {
                tracing::warn!(error = %msg, "Identity provider call failed");
                (StatusCode::BAD_GATEWAY, None)
            }
            AppError::LocalStorage(msg) | AppError::RemoteSync(msg) => {
                tracing::error!(error = %msg, "Storage error");
                (StatusCode::INTERNAL_SERVER_ERROR, None)
            }
            AppError::Internal(err) => {
                tracing::error!(error = %err, "Internal server error");
                (StatusCode::INTERNAL_SERVER_ERROR, None)
            }
        };

        let body = ErrorResponse {
            error: self.code().to_string(),
            details,
        };

        (status, Json(body)).into_response()
    }
}

/// Result type alias for handlers
pub type Result<T> = std::result::Result<T, AppError>;
