// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! End-to-end handshake tests over the HTTP routes.
//!
//! Each test walks login → callback → complete with the fake provider and
//! checks the redirects and cookies the browser would see.

use account_sync::models::AccountRole;
use account_sync::routes::cookies;
use axum::{
    body::Body,
    http::{header, Request, StatusCode},
    response::Response,
};
use std::sync::atomic::Ordering;
use tower::ServiceExt;

mod common;
use common::{cookie_value, find_cookie, location, set_cookie_headers, state_param};

async fn get(app: &axum::Router, uri: &str, cookie: Option<&str>) -> Response {
    let mut request = Request::builder().uri(uri);
    if let Some(cookie) = cookie {
        request = request.header(header::COOKIE, cookie);
    }
    app.clone()
        .oneshot(request.body(Body::empty()).unwrap())
        .await
        .unwrap()
}

/// Start a handshake; returns (nonce cookie value, state parameter).
async fn start(app: &axum::Router, query: &str) -> (String, String) {
    let response = get(app, &format!("/auth/login{}", query), None).await;
    assert_eq!(response.status(), StatusCode::TEMPORARY_REDIRECT);

    let nonce = cookie_value(&set_cookie_headers(&response), cookies::OAUTH_STATE)
        .expect("login sets the CSRF cookie");
    (nonce, state_param(&location(&response)))
}

fn callback_uri(code: &str, state: &str) -> String {
    format!(
        "/auth/callback?code={}&state={}",
        code,
        urlencoding::encode(state)
    )
}

/// Complete a callback and return the pending-token cookie value.
async fn exchange(app: &axum::Router, nonce: &str, code: &str, state: &str) -> String {
    let response = get(
        app,
        &callback_uri(code, state),
        Some(&format!("{}={}", cookies::OAUTH_STATE, nonce)),
    )
    .await;
    assert_eq!(location(&response), "http://localhost:8080/auth/complete");
    cookie_value(&set_cookie_headers(&response), cookies::PENDING_TOKEN)
        .expect("callback sets the pending token cookie")
}

#[tokio::test]
async fn test_login_redirects_to_provider() {
    let (app, _, _) = common::create_test_app();

    let response = get(&app, "/auth/login?email=ada%40example.com", None).await;
    assert_eq!(response.status(), StatusCode::TEMPORARY_REDIRECT);

    let url = location(&response);
    assert!(url.starts_with("https://idp.example.com/authorize?client_id=test_client_id"));
    assert!(url.contains("response_type=code"));
    assert!(url.contains("access_type=offline"));
    assert!(url.contains("prompt=consent&login_hint=ada%40example.com"));

    let state: serde_json::Value = serde_json::from_str(&state_param(&url)).unwrap();
    assert_eq!(state["mode"], "primary");
    assert_eq!(state["email"], "ada@example.com");

    let headers = set_cookie_headers(&response);
    let nonce_cookie = find_cookie(&headers, cookies::OAUTH_STATE).unwrap();
    assert!(nonce_cookie.contains("HttpOnly"));
    assert!(nonce_cookie.contains("Max-Age=600"));
    assert_eq!(
        cookie_value(&headers, cookies::OAUTH_STATE).unwrap(),
        state["nonce"].as_str().unwrap()
    );
}

#[tokio::test]
async fn test_login_rejects_unknown_mode_and_bad_email() {
    let (app, _, _) = common::create_test_app();

    let response = get(&app, "/auth/login?mode=tertiary", None).await;
    assert_eq!(location(&response), "http://localhost:5173/?error=validation_error");
    assert!(set_cookie_headers(&response).is_empty());

    let response = get(&app, "/auth/login?email=not-an-email", None).await;
    assert_eq!(location(&response), "http://localhost:5173/?error=validation_error");
}

#[tokio::test]
async fn test_primary_handshake_sets_session() {
    let (app, _, provider) = common::create_test_app();
    provider.accept_code("good-code", "ada@example.com");

    let (nonce, state) = start(&app, "").await;
    let flow_id = exchange(&app, &nonce, "good-code", &state).await;

    let response = get(
        &app,
        "/auth/complete",
        Some(&format!("{}={}", cookies::PENDING_TOKEN, flow_id)),
    )
    .await;
    assert_eq!(location(&response), "http://localhost:5173/");

    let headers = set_cookie_headers(&response);
    assert_eq!(
        cookie_value(&headers, cookies::ACCESS_TOKEN).as_deref(),
        Some("access-ada")
    );
    assert_eq!(
        cookie_value(&headers, cookies::REFRESH_TOKEN).as_deref(),
        Some("refresh-ada")
    );
    let access = find_cookie(&headers, cookies::ACCESS_TOKEN).unwrap();
    assert!(access.contains("HttpOnly"));
    assert!(access.contains("Max-Age=3600"));
    let user = find_cookie(&headers, cookies::USER).unwrap();
    assert!(!user.contains("HttpOnly"));
    assert!(user.contains("Max-Age=604800"));
    assert!(find_cookie(&headers, cookies::ID_TOKEN).is_some());
    assert!(find_cookie(&headers, cookies::TOKEN_EXPIRY).is_some());

    let metadata =
        cookies::UserMetadata::decode(&cookie_value(&headers, cookies::USER).unwrap()).unwrap();
    assert_eq!(metadata.email, "ada@example.com");
    assert_eq!(metadata.id, "sub-ada");
    assert_eq!(metadata.display_name.as_deref(), Some("Test User"));
}

#[tokio::test]
async fn test_replayed_state_is_rejected() {
    let (app, _, provider) = common::create_test_app();
    provider.accept_code("good-code", "ada@example.com");

    let (nonce, state) = start(&app, "").await;
    exchange(&app, &nonce, "good-code", &state).await;

    let replay = get(
        &app,
        &callback_uri("good-code", &state),
        Some(&format!("{}={}", cookies::OAUTH_STATE, nonce)),
    )
    .await;
    assert_eq!(location(&replay), "http://localhost:5173/?error=invalid_state");
    assert!(find_cookie(&set_cookie_headers(&replay), cookies::PENDING_TOKEN).is_none());
    assert_eq!(provider.exchange_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_unknown_nonce_commits_nothing() {
    let (app, _, provider) = common::create_test_app();
    provider.accept_code("good-code", "ada@example.com");

    let forged_nonce = uuid::Uuid::new_v4().to_string();
    let forged_state = format!(r#"{{"mode":"primary","nonce":"{}"}}"#, forged_nonce);

    let response = get(
        &app,
        &callback_uri("good-code", &forged_state),
        Some(&format!("{}={}", cookies::OAUTH_STATE, forged_nonce)),
    )
    .await;
    assert_eq!(location(&response), "http://localhost:5173/?error=invalid_state");

    let headers = set_cookie_headers(&response);
    assert!(find_cookie(&headers, cookies::PENDING_TOKEN).is_none());
    assert!(find_cookie(&headers, cookies::ACCESS_TOKEN).is_none());
    assert_eq!(provider.exchange_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_state_without_csrf_cookie_is_rejected() {
    let (app, _, provider) = common::create_test_app();
    provider.accept_code("good-code", "ada@example.com");

    let (_, state) = start(&app, "").await;
    let response = get(&app, &callback_uri("good-code", &state), None).await;
    assert_eq!(location(&response), "http://localhost:5173/?error=invalid_state");
}

#[tokio::test]
async fn test_malformed_state_is_rejected() {
    let (app, _, _) = common::create_test_app();
    let (nonce, _) = start(&app, "").await;

    let response = get(
        &app,
        "/auth/callback?code=x&state=%7Bnot-json",
        Some(&format!("{}={}", cookies::OAUTH_STATE, nonce)),
    )
    .await;
    assert_eq!(location(&response), "http://localhost:5173/?error=invalid_state");
}

#[tokio::test]
async fn test_provider_error_and_missing_code() {
    let (app, _, _) = common::create_test_app();

    let (nonce, state) = start(&app, "").await;
    let response = get(
        &app,
        &format!(
            "/auth/callback?error=access_denied&state={}",
            urlencoding::encode(&state)
        ),
        Some(&format!("{}={}", cookies::OAUTH_STATE, nonce)),
    )
    .await;
    assert_eq!(location(&response), "http://localhost:5173/?error=access_denied");

    let (nonce, state) = start(&app, "").await;
    let response = get(
        &app,
        &format!("/auth/callback?state={}", urlencoding::encode(&state)),
        Some(&format!("{}={}", cookies::OAUTH_STATE, nonce)),
    )
    .await;
    assert_eq!(location(&response), "http://localhost:5173/?error=missing_code");
}

#[tokio::test]
async fn test_exchange_failure() {
    let (app, _, _) = common::create_test_app();

    let (nonce, state) = start(&app, "").await;
    let response = get(
        &app,
        &callback_uri("unknown-code", &state),
        Some(&format!("{}={}", cookies::OAUTH_STATE, nonce)),
    )
    .await;
    assert_eq!(
        location(&response),
        "http://localhost:5173/?error=token_exchange_failed"
    );
}

#[tokio::test]
async fn test_email_hint_mismatch() {
    let (app, _, provider) = common::create_test_app();
    provider.accept_code("other-code", "mallory@example.com");

    let (nonce, state) = start(&app, "?email=ada%40example.com").await;
    let response = get(
        &app,
        &callback_uri("other-code", &state),
        Some(&format!("{}={}", cookies::OAUTH_STATE, nonce)),
    )
    .await;
    assert_eq!(location(&response), "http://localhost:5173/?error=account_mismatch");
}

#[tokio::test]
async fn test_complete_without_pending_token_is_expired() {
    let (app, _, _) = common::create_test_app();

    let response = get(&app, "/auth/complete", None).await;
    assert_eq!(location(&response), "http://localhost:5173/?error=session_expired");

    let response = get(
        &app,
        "/auth/complete",
        Some(&format!("{}=not-a-flow", cookies::PENDING_TOKEN)),
    )
    .await;
    assert_eq!(location(&response), "http://localhost:5173/?error=session_expired");
}

#[tokio::test]
async fn test_secondary_handshake_leaves_primary_untouched() {
    let (app, state, provider) = common::create_test_app();
    provider.accept_code("work-code", "work@example.com");

    let primary = common::test_account("ada@example.com", AccountRole::Primary);
    let jar_primary = state
        .cookies
        .primary_session(axum_extra::extract::cookie::CookieJar::new(), &primary)
        .unwrap();
    let session_cookie = jar_primary
        .iter()
        .map(|c| format!("{}={}", c.name(), c.value()))
        .collect::<Vec<_>>()
        .join("; ");

    let (nonce, oauth_state) = start(&app, "?mode=secondary").await;
    let flow_id = exchange(&app, &nonce, "work-code", &oauth_state).await;

    let response = get(
        &app,
        "/auth/complete",
        Some(&format!(
            "{}; {}={}",
            session_cookie,
            cookies::PENDING_TOKEN,
            flow_id
        )),
    )
    .await;
    assert_eq!(
        location(&response),
        "http://localhost:5173/settings?newAccount=pending"
    );

    let headers = set_cookie_headers(&response);
    assert!(find_cookie(&headers, cookies::ACCESS_TOKEN).is_none());
    assert!(find_cookie(&headers, cookies::USER).is_none());
    let staged = cookie_value(&headers, cookies::PENDING_ACCOUNT).expect("staged cookie");
    let staged_cookie = find_cookie(&headers, cookies::PENDING_ACCOUNT).unwrap();
    assert!(!staged_cookie.contains("HttpOnly"));
    assert!(staged_cookie.contains("Max-Age=60"));

    // Confirm links the account and consumes the staged cookie.
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/auth/accounts/confirm")
                .header(
                    header::COOKIE,
                    format!("{}; {}={}", session_cookie, cookies::PENDING_ACCOUNT, staged),
                )
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let removed = find_cookie(&set_cookie_headers(&response), cookies::PENDING_ACCOUNT).unwrap();
    assert!(removed.contains("Max-Age=0"));

    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let account: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(account["email"], "work@example.com");
    assert_eq!(account["role"], "secondary");
    assert_eq!(account["accessToken"], "access-work");
}

#[tokio::test]
async fn test_confirm_rejects_tampered_or_unauthenticated() {
    let (app, _, _) = common::create_test_app();
    let primary = common::test_account("ada@example.com", AccountRole::Primary);
    let user = cookies::UserMetadata::from_account(&primary).encode().unwrap();

    let post = |cookie: String| {
        app.clone().oneshot(
            Request::builder()
                .method("POST")
                .uri("/auth/accounts/confirm")
                .header(header::COOKIE, cookie)
                .body(Body::empty())
                .unwrap(),
        )
    };

    let response = post(format!("{}=forged.0.00", cookies::PENDING_ACCOUNT))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = post(format!(
        "{}=tok; {}={}; {}=forged.0.00",
        cookies::ACCESS_TOKEN,
        cookies::USER,
        user,
        cookies::PENDING_ACCOUNT
    ))
    .await
    .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let error: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(error["error"], "invalid_state");

    let response = post(format!(
        "{}=tok; {}={}",
        cookies::ACCESS_TOKEN,
        cookies::USER,
        user
    ))
    .await
    .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}
