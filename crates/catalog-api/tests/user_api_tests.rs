//! User API Integration Tests
//!
//! Registration, profile access rules, role changes and follows.

// This test module requires the test-utils feature
#![cfg(feature = "test-utils")]

use axum::http::StatusCode;
use prism_catalog_api::test_utils::{TestApp, TestUser};
use serde_json::{json, Value};
use serial_test::serial;

fn replace(path: &str, value: Value) -> Value {
    json!([{ "op": "replace", "path": path, "value": value }])
}

// ============================================================================
// Registration
// ============================================================================

#[tokio::test]
#[serial]
async fn test_registration_creates_active_regular_user() {
    let app = TestApp::new().await.unwrap();

    let (status, user) = app
        .post(
            "/api/v1/users/",
            json!({
                "username": "carol",
                "password": "long-enough-secret",
                "email": "carol@example.com",
                "first_name": "Carol",
            }),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(user["username"], "carol");
    assert_eq!(user["is_active"], true);
    assert_eq!(user["is_regular_user"], true);
    assert_eq!(user["is_admin"], false);
    assert_eq!(user["followers"], 0);
    assert!(user.get("password").is_none());
    assert!(user.get("static_roles").is_none());
}

#[tokio::test]
#[serial]
async fn test_registration_validation_and_duplicates() {
    let app = TestApp::new().await.unwrap();

    let (status, body) = app
        .post(
            "/api/v1/users",
            json!({"username": "bad name", "password": "short", "email": "nope"}),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    for field in ["username", "password", "email"] {
        assert!(body["message"].get(field).is_some(), "no error for {}", field);
    }

    let registration = json!({
        "username": "carol",
        "password": "long-enough-secret",
        "email": "carol@example.com",
    });
    let (status, _) = app.post("/api/v1/users", registration.clone(), None).await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = app.post("/api/v1/users", registration, None).await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
#[serial]
async fn test_signup_form() {
    let app = TestApp::new().await.unwrap();
    let (status, body) = app.get("/api/v1/users/signup_form", None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.get("recaptcha_server_key").is_some());
}

// ============================================================================
// Profiles
// ============================================================================

#[tokio::test]
#[serial]
async fn test_missing_user_is_not_found_with_id() {
    let app = TestApp::new().await.unwrap();
    let alice = TestUser::new("alice").create(&app).await.unwrap();

    let (status, body) = app.get("/api/v1/users/424242", Some(&alice.token)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body["message"].as_str().unwrap().contains("424242"));

    // Numeric spellings of a real id are not aliases for it
    for id in [format!("{}.0", alice.user.id), format!("0{}", alice.user.id)] {
        let (status, _) = app
            .get(&format!("/api/v1/users/{}", id), Some(&alice.token))
            .await;
        assert_eq!(status, StatusCode::NOT_FOUND, "{} resolved a user", id);
    }
}

#[tokio::test]
#[serial]
async fn test_profiles_are_private_to_owner_and_admins() {
    let app = TestApp::new().await.unwrap();
    let alice = TestUser::new("alice").create(&app).await.unwrap();
    let bob = TestUser::new("bob").create(&app).await.unwrap();
    let admin = TestUser::new("root").admin().create(&app).await.unwrap();
    let uri = format!("/api/v1/users/{}", alice.user.id);

    let (status, _) = app.get(&uri, Some(&alice.token)).await;
    assert_eq!(status, StatusCode::OK);
    let (status, body) = app.get(&uri, Some(&bob.token)).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["message"], "Owner or Admin user is required.");
    let (status, _) = app.get(&uri, Some(&admin.token)).await;
    assert_eq!(status, StatusCode::OK);

    // Listing every user is for administrators
    let (status, body) = app.get("/api/v1/users", Some(&bob.token)).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["message"], "Admin user is required.");
    let (status, users) = app.get("/api/v1/users", Some(&admin.token)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(users.as_array().unwrap().len(), 3);
}

#[tokio::test]
#[serial]
async fn test_role_changes_need_admin() {
    let app = TestApp::new().await.unwrap();
    let alice = TestUser::new("alice").create(&app).await.unwrap();
    let admin = TestUser::new("root").admin().create(&app).await.unwrap();
    let uri = format!("/api/v1/users/{}", alice.user.id);

    let (status, body) = app
        .patch(&uri, replace("/is_admin", json!(true)), Some(&alice.token))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["message"], "Admin user is required.");

    let (status, body) = app
        .patch(&uri, replace("/is_admin", json!(true)), Some(&admin.token))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["is_admin"], true);
    assert_eq!(body["is_active"], true);
}

#[tokio::test]
#[serial]
async fn test_profile_patch_and_password_change() {
    let app = TestApp::new().await.unwrap();
    let alice = TestUser::new("alice").create(&app).await.unwrap();
    let uri = format!("/api/v1/users/{}", alice.user.id);

    let (status, body) = app
        .patch(
            &uri,
            json!([
                {"op": "replace", "path": "/bio", "value": "Data wrangler"},
                {"op": "replace", "path": "/password", "value": "a-brand-new-secret"},
            ]),
            Some(&alice.token),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["bio"], "Data wrangler");

    let (status, _) = app
        .post(
            "/auth/oauth2/token",
            json!({
                "grant_type": "password",
                "client_id": alice.client_id,
                "client_secret": alice.client_secret,
                "username": "alice",
                "password": "a-brand-new-secret",
            }),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = app
        .patch(&uri, replace("/username", json!("mallory")), Some(&alice.token))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = app
        .patch(&uri, replace("/email", json!("not-an-email")), Some(&alice.token))
        .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert!(body["message"].get("email").is_some());
}

// ============================================================================
// Follows
// ============================================================================

#[tokio::test]
#[serial]
async fn test_follow_rules_and_counters() {
    let app = TestApp::new().await.unwrap();
    let alice = TestUser::new("alice").create(&app).await.unwrap();
    let bob = TestUser::new("bob").create(&app).await.unwrap();
    let follow_bob = format!("/api/v1/users/following/{}", bob.user.id);

    let (status, body) = app
        .patch(
            &format!("/api/v1/users/following/{}", alice.user.id),
            json!(null),
            Some(&alice.token),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], "You cannot follow yourself");

    let (status, me) = app.patch(&follow_bob, json!(null), Some(&alice.token)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(me["following"], 1);

    let (status, _) = app.patch(&follow_bob, json!(null), Some(&alice.token)).await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (_, followers) = app.get("/api/v1/users/followers", Some(&bob.token)).await;
    assert_eq!(followers[0]["username"], "alice");
    let (_, following) = app.get("/api/v1/users/following", Some(&alice.token)).await;
    assert_eq!(following[0]["username"], "bob");

    let (status, me) = app.delete(&follow_bob, Some(&alice.token)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(me["following"], 0);

    let (status, body) = app.delete(&follow_bob, Some(&alice.token)).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["message"], "You are not following this user");

    let (_, bob_now) = app.get("/api/v1/users/me", Some(&bob.token)).await;
    assert_eq!(bob_now["followers"], 0);
}
