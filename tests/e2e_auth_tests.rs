//! End-to-end tests for registration, login and session handling.

mod common;

use common::{TestClient, TestServer, TEST_PASS};
use reqwest::StatusCode;

#[tokio::test]
async fn test_register_and_login() {
    let server = TestServer::spawn().await;
    let client = TestClient::new(server.base_url.clone());

    let response = client.register("alice", TEST_PASS).await;
    assert_eq!(response.status(), StatusCode::CREATED);

    let response = client.login("alice", TEST_PASS).await;
    assert_eq!(response.status(), StatusCode::CREATED);
    let body: serde_json::Value = response.json().await.unwrap();
    assert!(body["token"].as_str().unwrap().len() >= 32);
}

#[tokio::test]
async fn test_register_duplicate_username_is_rejected() {
    let server = TestServer::spawn().await;
    let client = TestClient::new(server.base_url.clone());

    assert_eq!(
        client.register("alice", TEST_PASS).await.status(),
        StatusCode::CREATED
    );
    assert_eq!(
        client.register("alice", "other-password").await.status(),
        StatusCode::CONFLICT
    );
}

#[tokio::test]
async fn test_login_with_invalid_password() {
    let server = TestServer::spawn().await;
    let client = TestClient::new(server.base_url.clone());

    client.register("alice", TEST_PASS).await;
    let response = client.login("alice", "wrong_password").await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_login_with_nonexistent_user() {
    let server = TestServer::spawn().await;
    let client = TestClient::new(server.base_url.clone());

    let response = client.login("nobody", TEST_PASS).await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_protected_endpoint_requires_authentication() {
    let server = TestServer::spawn().await;
    let client = TestClient::new(server.base_url.clone());

    let response = client.me().await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_session_cookie_authenticates_requests() {
    let server = TestServer::spawn().await;
    let client = TestClient::signed_up(server.base_url.clone(), "alice").await;

    let response = client.me().await;
    assert_eq!(response.status(), StatusCode::OK);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["username"], "alice");
    // Password hashes must never leak through the API
    assert!(body.get("password_hash").is_none());
}

#[tokio::test]
async fn test_token_in_authorization_header_authenticates() {
    let server = TestServer::spawn().await;
    let client = TestClient::new(server.base_url.clone());
    client.register("alice", TEST_PASS).await;
    let login: serde_json::Value = client
        .login("alice", TEST_PASS)
        .await
        .json()
        .await
        .unwrap();
    let token = login["token"].as_str().unwrap().to_string();

    // Plain client with no cookie jar, token goes in the header
    let bare = reqwest::Client::new();
    let response = bare
        .get(format!("{}/api/me", server.base_url))
        .header("Authorization", token)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_logout_clears_session() {
    let server = TestServer::spawn().await;
    let client = TestClient::signed_up(server.base_url.clone(), "alice").await;

    assert_eq!(client.me().await.status(), StatusCode::OK);
    assert_eq!(client.logout().await.status(), StatusCode::OK);
    assert_eq!(client.me().await.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_update_about_me() {
    let server = TestServer::spawn().await;
    let client = TestClient::signed_up(server.base_url.clone(), "alice").await;

    let response = client.update_me("I write tests").await;
    assert_eq!(response.status(), StatusCode::OK);

    let body: serde_json::Value = client.me().await.json().await.unwrap();
    assert_eq!(body["about_me"], "I write tests");
}
