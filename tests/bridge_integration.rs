//! Integration tests against a real Firebase project
//!
//! These tests require:
//! 1. A Firebase project with Authentication and Realtime Database enabled
//! 2. Environment variables set in a .env file:
//!    FIREBASE_API_KEY, FIREBASE_DATABASE_URL,
//!    TEST_USER_EMAIL, TEST_USER_PASSWORD
//! 3. Run with: cargo test --features integration-tests -- --test-threads=1

#![cfg(feature = "integration-tests")]

use firebase_bridge::bridge::{response_channel, BridgeRequest, BridgeStatus};
use firebase_bridge::{Auth, Bridge, Database};
use serde_json::json;
use std::env;
use std::time::Duration;

fn init() {
    dotenvy::dotenv().ok();
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

fn get_test_config() -> (String, String, String, String) {
    init();

    let api_key = env::var("FIREBASE_API_KEY").expect("FIREBASE_API_KEY must be set in .env file");
    let database_url =
        env::var("FIREBASE_DATABASE_URL").expect("FIREBASE_DATABASE_URL must be set in .env file");
    let email = env::var("TEST_USER_EMAIL").expect("TEST_USER_EMAIL must be set in .env file");
    let password =
        env::var("TEST_USER_PASSWORD").expect("TEST_USER_PASSWORD must be set in .env file");

    (api_key, database_url, email, password)
}

#[tokio::test]
async fn test_sign_in_and_current_user_round_trip() {
    let (api_key, _, email, password) = get_test_config();

    let auth = Auth::get_auth(&api_key).await.expect("auth instance");
    let (tx, mut rx) = response_channel();
    let bridge = Bridge::new(auth, tx);

    bridge.auth().dispatch(BridgeRequest::new(
        "it-signin",
        "signInWithEmailAndPassword",
        vec![json!(email), json!(password)],
    ));
    let response = tokio::time::timeout(Duration::from_secs(30), rx.recv())
        .await
        .expect("timely delivery")
        .expect("channel open");
    assert_eq!(response.status, BridgeStatus::Ok);
    assert!(!response.payload["uid"].as_str().unwrap().is_empty());

    bridge
        .auth()
        .dispatch(BridgeRequest::new("it-current", "currentUser", vec![]));
    let current = tokio::time::timeout(Duration::from_secs(30), rx.recv())
        .await
        .expect("timely delivery")
        .expect("channel open");
    assert_eq!(current.payload["uid"], response.payload["uid"]);

    bridge
        .auth()
        .dispatch(BridgeRequest::new("it-signout", "signOut", vec![]));
    let _ = rx.recv().await;
}

#[tokio::test]
async fn test_set_then_single_shot_read() {
    let (api_key, database_url, _, _) = get_test_config();

    let auth = Auth::get_auth(&api_key).await.expect("auth instance");
    Database::configure_default(&database_url)
        .await
        .expect("default database");
    let (tx, mut rx) = response_channel();
    let bridge = Bridge::new(auth, tx);

    bridge.database().dispatch(BridgeRequest::new(
        "it-set",
        "set",
        vec![
            json!(""),
            json!("bridge-tests/probe"),
            json!({ "ok": true }),
            json!(null),
        ],
    ));
    let set = tokio::time::timeout(Duration::from_secs(30), rx.recv())
        .await
        .expect("timely delivery")
        .expect("channel open");
    assert_eq!(set.status, BridgeStatus::Ok);

    bridge.database().dispatch(BridgeRequest::new(
        "it-read",
        "on",
        vec![
            json!(""),
            json!("bridge-tests/probe"),
            json!("value"),
            json!(null),
            json!([]),
            json!(null),
            json!(""),
        ],
    ));
    let read = tokio::time::timeout(Duration::from_secs(30), rx.recv())
        .await
        .expect("timely delivery")
        .expect("channel open");
    assert_eq!(read.status, BridgeStatus::Ok);
    assert_eq!(read.payload["value"]["ok"], true);
}
