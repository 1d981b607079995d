//! OAuth2 Flow Integration Tests
//!
//! Covers token issuance and refresh, revocation, bearer token rejection
//! and OAuth2 client registration.

// This test module requires the test-utils feature
#![cfg(feature = "test-utils")]

use axum::http::StatusCode;
use prism_catalog_api::test_utils::{TestApp, TestUser, TEST_PASSWORD};
use serde_json::{json, Value};
use serial_test::serial;

const UNAUTHENTICATED: &str =
    "The server could not verify that you are authorized to access the URL requested.";

fn password_grant(client_id: &str, client_secret: &str, username: &str, scope: &str) -> Value {
    json!({
        "grant_type": "password",
        "client_id": client_id,
        "client_secret": client_secret,
        "username": username,
        "password": TEST_PASSWORD,
        "scope": scope,
    })
}

// ============================================================================
// Token endpoint
// ============================================================================

#[tokio::test]
#[serial]
async fn test_password_grant_issues_usable_token() {
    let app = TestApp::new().await.unwrap();
    let alice = TestUser::new("alice").create(&app).await.unwrap();

    let (status, body) = app
        .post(
            "/auth/oauth2/token",
            password_grant(&alice.client_id, &alice.client_secret, "alice", "users:read"),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["token_type"], "Bearer");
    assert_eq!(body["scope"], "users:read");
    assert_eq!(body["expires_in"], 3600);

    let token = body["access_token"].as_str().unwrap();
    let (status, me) = app.get("/api/v1/users/me", Some(token)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(me["username"], "alice");

    // The grant only carried users:read
    let (status, _) = app.get("/api/v1/datasets", Some(token)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
#[serial]
async fn test_password_grant_accepts_form_body() {
    let app = TestApp::new().await.unwrap();
    let alice = TestUser::new("alice").create(&app).await.unwrap();

    let form = format!(
        "grant_type=password&client_id={}&client_secret={}&username=alice&password={}&scope=users%3Aread%20datasets%3Aread",
        alice.client_id, alice.client_secret, TEST_PASSWORD
    );
    let (status, body) = app.post_form("/auth/oauth2/token", &form).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["scope"], "datasets:read users:read");
}

#[tokio::test]
#[serial]
async fn test_password_grant_failures_are_generic() {
    let app = TestApp::new().await.unwrap();
    let alice = TestUser::new("alice").create(&app).await.unwrap();
    TestUser::new("dormant").inactive().create(&app).await.unwrap();

    let mut wrong_password =
        password_grant(&alice.client_id, &alice.client_secret, "alice", "users:read");
    wrong_password["password"] = json!("not-the-password");

    let cases = [
        wrong_password,
        password_grant(&alice.client_id, "wrong-secret", "alice", "users:read"),
        password_grant(&alice.client_id, &alice.client_secret, "nobody", "users:read"),
        password_grant(&alice.client_id, &alice.client_secret, "dormant", "users:read"),
        password_grant(&alice.client_id, &alice.client_secret, "alice", "planets:read"),
    ];
    for request in cases {
        let (status, body) = app.post("/auth/oauth2/token", request, None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["message"], UNAUTHENTICATED);
    }
}

#[tokio::test]
#[serial]
async fn test_scope_outside_client_defaults_is_refused() {
    let app = TestApp::new().await.unwrap();
    let alice = TestUser::new("alice")
        .scopes(&["users:read"])
        .create(&app)
        .await
        .unwrap();

    let (status, _) = app
        .post(
            "/auth/oauth2/token",
            password_grant(&alice.client_id, &alice.client_secret, "alice", "users:write"),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
#[serial]
async fn test_unsupported_grant_type() {
    let app = TestApp::new().await.unwrap();
    let (status, body) = app
        .post(
            "/auth/oauth2/token",
            json!({"grant_type": "client_credentials"}),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["message"].as_str().unwrap().contains("client_credentials"));
}

fn refresh_grant(refresh_token: &str, client_id: &str, client_secret: &str) -> Value {
    json!({
        "grant_type": "refresh_token",
        "refresh_token": refresh_token,
        "client_id": client_id,
        "client_secret": client_secret,
    })
}

#[tokio::test]
#[serial]
async fn test_refresh_replaces_old_token() {
    let app = TestApp::new().await.unwrap();
    let alice = TestUser::new("alice").create(&app).await.unwrap();

    let (status, before) = app.get("/api/v1/users/me", Some(&alice.token)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(before["username"], "alice");

    let grant = refresh_grant(&alice.refresh_token, &alice.client_id, &alice.client_secret);
    let (status, body) = app.post("/auth/oauth2/token", grant.clone(), None).await;
    assert_eq!(status, StatusCode::OK);
    let fresh = body["access_token"].as_str().unwrap();
    assert_ne!(fresh, alice.token);

    let (status, _) = app.get("/api/v1/users/me", Some(&alice.token)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    let (status, _) = app.get("/api/v1/users/me", Some(fresh)).await;
    assert_eq!(status, StatusCode::OK);

    // A refresh token works once
    let (status, _) = app.post("/auth/oauth2/token", grant, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
#[serial]
async fn test_refresh_requires_client_authentication() {
    let app = TestApp::new().await.unwrap();
    let alice = TestUser::new("alice").create(&app).await.unwrap();
    let bob = TestUser::new("bob").create(&app).await.unwrap();

    let cases = [
        json!({"grant_type": "refresh_token", "refresh_token": alice.refresh_token}),
        json!({
            "grant_type": "refresh_token",
            "refresh_token": alice.refresh_token,
            "client_id": alice.client_id,
        }),
        refresh_grant(&alice.refresh_token, &alice.client_id, "wrong-secret"),
        // Valid credentials, but for another client
        refresh_grant(&alice.refresh_token, &bob.client_id, &bob.client_secret),
    ];
    for request in cases {
        let (status, body) = app.post("/auth/oauth2/token", request, None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["message"], UNAUTHENTICATED);
    }

    // None of the attempts consumed the refresh token
    let (status, _) = app.get("/api/v1/users/me", Some(&alice.token)).await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = app
        .post(
            "/auth/oauth2/token",
            refresh_grant(&alice.refresh_token, &alice.client_id, &alice.client_secret),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
#[serial]
async fn test_concurrent_refreshes_rotate_once() {
    let app = TestApp::new().await.unwrap();
    let alice = TestUser::new("alice").create(&app).await.unwrap();

    let grant = refresh_grant(&alice.refresh_token, &alice.client_id, &alice.client_secret);
    let (first, second) = tokio::join!(
        app.post("/auth/oauth2/token", grant.clone(), None),
        app.post("/auth/oauth2/token", grant, None),
    );

    let mut statuses = vec![first.0.as_u16(), second.0.as_u16()];
    statuses.sort();
    assert_eq!(statuses, vec![200, 401]);

    let issued = if first.0 == StatusCode::OK { first.1 } else { second.1 };
    let (status, _) = app
        .get("/api/v1/users/me", Some(issued["access_token"].as_str().unwrap()))
        .await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
#[serial]
async fn test_revoke_is_idempotent() {
    let app = TestApp::new().await.unwrap();
    let alice = TestUser::new("alice").create(&app).await.unwrap();

    let (status, _) = app.get("/api/v1/users/me", Some(&alice.token)).await;
    assert_eq!(status, StatusCode::OK);

    for _ in 0..2 {
        let (status, body) = app
            .post("/auth/oauth2/revoke", json!({"token": alice.token}), None)
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({}));
    }

    let (status, _) = app.get("/api/v1/users/me", Some(&alice.token)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

// ============================================================================
// Bearer token validation
// ============================================================================

#[tokio::test]
#[serial]
async fn test_missing_and_unknown_tokens() {
    let app = TestApp::new().await.unwrap();

    let (status, body) = app.get("/api/v1/users/me", None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["message"], UNAUTHENTICATED);

    let (status, _) = app.get("/api/v1/users/me", Some("made-up-token")).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
#[serial]
async fn test_bad_token_outranks_bad_input() {
    let app = TestApp::new().await.unwrap();
    let alice = TestUser::new("alice").create(&app).await.unwrap();
    let bad_body = json!({"default_scopes": 7});

    let (status, body) = app
        .post("/api/v1/auth/oauth2_clients", bad_body.clone(), Some("made-up-token"))
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["message"], UNAUTHENTICATED);
    let (status, _) = app
        .get("/api/v1/datasets?limit=ten", Some("made-up-token"))
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    // With a valid token the same input is a validation failure
    let (status, _) = app
        .post("/api/v1/auth/oauth2_clients", bad_body, Some(&alice.token))
        .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    let (status, _) = app
        .get("/api/v1/datasets?limit=ten", Some(&alice.token))
        .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
#[serial]
async fn test_expired_token_is_rejected() {
    let app = TestApp::new().await.unwrap();
    let late = TestUser::new("late").expired().create(&app).await.unwrap();

    let (status, body) = app.get("/api/v1/users/me", Some(&late.token)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["message"], UNAUTHENTICATED);
}

#[tokio::test]
#[serial]
async fn test_missing_scope_is_unauthenticated_not_forbidden() {
    let app = TestApp::new().await.unwrap();
    let reader = TestUser::new("reader")
        .scopes(&["datasets:read"])
        .create(&app)
        .await
        .unwrap();

    let (status, _) = app.get("/api/v1/datasets", Some(&reader.token)).await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = app
        .post(
            "/api/v1/datasets",
            json!({"name": "air", "title": "Air", "license_name": "MIT"}),
            Some(&reader.token),
        )
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["message"], UNAUTHENTICATED);
}

// ============================================================================
// OAuth2 clients
// ============================================================================

#[tokio::test]
#[serial]
async fn test_client_registration_and_listing() {
    let app = TestApp::new().await.unwrap();
    let alice = TestUser::new("alice").create(&app).await.unwrap();

    let (status, client) = app
        .post(
            "/api/v1/auth/oauth2_clients",
            json!({"default_scopes": ["datasets:read", "stories:read"]}),
            Some(&alice.token),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(client["user_id"], alice.user.id);
    assert!(client["client_secret"].as_str().is_some());

    let (status, listed) = app
        .get("/api/v1/auth/oauth2_clients", Some(&alice.token))
        .await;
    assert_eq!(status, StatusCode::OK);
    // The fixture's own client plus the new one
    assert_eq!(listed.as_array().unwrap().len(), 2);
    assert!(listed
        .as_array()
        .unwrap()
        .iter()
        .all(|c| c.get("client_secret").is_none()));

    // The new client can be used for a password grant
    let (status, body) = app
        .post(
            "/auth/oauth2/token",
            password_grant(
                client["client_id"].as_str().unwrap(),
                client["client_secret"].as_str().unwrap(),
                "alice",
                "",
            ),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["scope"], "datasets:read stories:read");
}

#[tokio::test]
#[serial]
async fn test_client_registration_rejects_unknown_scopes() {
    let app = TestApp::new().await.unwrap();
    let alice = TestUser::new("alice").create(&app).await.unwrap();

    let (status, body) = app
        .post(
            "/api/v1/auth/oauth2_clients",
            json!({"default_scopes": ["datasets:read", "planets:read"]}),
            Some(&alice.token),
        )
        .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert!(body["message"]["default_scopes"][0]
        .as_str()
        .unwrap()
        .contains("planets:read"));
}

#[tokio::test]
#[serial]
async fn test_listing_someone_elses_clients_fails() {
    let app = TestApp::new().await.unwrap();
    let alice = TestUser::new("alice").create(&app).await.unwrap();
    let bob = TestUser::new("bob").create(&app).await.unwrap();

    let uri = format!("/api/v1/auth/oauth2_clients?user_id={}", bob.user.id);
    let (status, body) = app.get(&uri, Some(&alice.token)).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(
        body["message"]["user_id"][0],
        "You can only see your own OAuth2 clients."
    );
}
