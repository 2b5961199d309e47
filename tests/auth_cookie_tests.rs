// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Auth cookie attribute tests.
//!
//! These tests verify cookie removal attributes on logout match the creation
//! attributes for localhost and production-style frontends.

use account_sync::routes::cookies;
use axum::{
    body::Body,
    http::{header, Request, StatusCode},
};
use tower::ServiceExt;

mod common;
use common::{find_cookie, set_cookie_headers};

const ALL_ARTIFACTS: &str = "as_access_token=tok; as_refresh_token=rt; as_id_token=id; \
     as_user=dXNlcg; as_token_expiry=1; as_oauth_state=nonce; as_pending_token=flow; \
     as_pending_account=staged";

async fn logout(frontend_url: &str) -> Vec<String> {
    let (app, _, _) = common::create_test_app_with_frontend_url(frontend_url);

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/auth/logout")
                .header(header::COOKIE, ALL_ARTIFACTS)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    set_cookie_headers(&response)
}

#[tokio::test]
async fn test_logout_clears_every_artifact() {
    let set_cookies = logout("http://localhost:5173").await;

    for name in [
        cookies::ACCESS_TOKEN,
        cookies::REFRESH_TOKEN,
        cookies::ID_TOKEN,
        cookies::USER,
        cookies::TOKEN_EXPIRY,
        cookies::OAUTH_STATE,
        cookies::PENDING_TOKEN,
        cookies::PENDING_ACCOUNT,
    ] {
        let cookie = find_cookie(&set_cookies, name)
            .unwrap_or_else(|| panic!("missing Set-Cookie header for {name}: {set_cookies:?}"));
        assert!(cookie.contains("Max-Age=0"), "{cookie}");
        assert!(cookie.contains("Path=/"), "{cookie}");
        assert!(cookie.contains("SameSite=Lax"), "{cookie}");
    }
}

#[tokio::test]
async fn test_logout_cookie_removal_localhost_attributes() {
    let set_cookies = logout("http://localhost:5173").await;

    let token_cookie = find_cookie(&set_cookies, cookies::ACCESS_TOKEN).unwrap();
    assert!(token_cookie.contains("HttpOnly"));
    assert!(!token_cookie.contains("Secure"));
    assert!(!token_cookie.contains("Domain="));

    let user_cookie = find_cookie(&set_cookies, cookies::USER).unwrap();
    assert!(!user_cookie.contains("HttpOnly"));
    assert!(!user_cookie.contains("Secure"));
}

#[tokio::test]
async fn test_logout_cookie_removal_production_attributes() {
    let set_cookies = logout("https://app.example.com").await;

    let token_cookie = find_cookie(&set_cookies, cookies::REFRESH_TOKEN).unwrap();
    assert!(token_cookie.contains("HttpOnly"));
    assert!(token_cookie.contains("Secure"));
    assert!(!token_cookie.contains("Domain="));

    let staged_cookie = find_cookie(&set_cookies, cookies::PENDING_ACCOUNT).unwrap();
    assert!(!staged_cookie.contains("HttpOnly"));
    assert!(staged_cookie.contains("Secure"));
}
