use super::*;
use crate::test_support::{self, Hits};
use crate::token_store::MemoryTokenStore;
use axum::Router;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Json};
use axum::routing::{get, post};
use serde_json::{Value, json};

async fn echo_auth(headers: HeaderMap) -> Json<Value> {
    let auth = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned);
    Json(json!({ "authorization": auth }))
}

async fn reject(State(hits): State<Hits>) -> impl IntoResponse {
    hits.bump();
    (axum::http::StatusCode::UNAUTHORIZED, Json(json!({ "detail": "Could not validate credentials" })))
}

async fn boom() -> impl IntoResponse {
    (axum::http::StatusCode::INTERNAL_SERVER_ERROR, Json(json!({ "detail": "database down" })))
}

async fn form_echo(axum::Form(form): axum::Form<std::collections::HashMap<String, String>>) -> Json<Value> {
    Json(json!(form))
}

fn router(hits: Hits) -> Router {
    Router::new()
        .route("/echo", get(echo_auth))
        .route("/reject", get(reject))
        .route("/boom", get(boom))
        .route("/form", post(form_echo))
        .with_state(hits)
}

// =============================================================================
// request stage
// =============================================================================

#[tokio::test]
async fn attaches_bearer_when_token_present() {
    let base = test_support::serve(router(Hits::default())).await;
    let client = test_support::client(&base, Arc::new(MemoryTokenStore::with_token("tok-9")));

    let body: Value = client.get("/echo").await.unwrap();
    assert_eq!(body["authorization"], "Bearer tok-9");
}

#[tokio::test]
async fn omits_header_without_token() {
    let base = test_support::serve(router(Hits::default())).await;
    let client = test_support::client(&base, test_support::memory_store());

    let body: Value = client.get("echo").await.unwrap();
    assert!(body["authorization"].is_null());
}

#[tokio::test]
async fn post_form_is_url_encoded() {
    let base = test_support::serve(router(Hits::default())).await;
    let client = test_support::client(&base, test_support::memory_store());

    let body: Value = client
        .post_form("/form", &[("username", "ada@example.com"), ("password", "p w")])
        .await
        .unwrap();
    assert_eq!(body["username"], "ada@example.com");
    assert_eq!(body["password"], "p w");
}

// =============================================================================
// response-error stage
// =============================================================================

#[tokio::test]
async fn unauthorized_clears_token_and_broadcasts() {
    let hits = Hits::default();
    let base = test_support::serve(router(hits.clone())).await;
    let store = Arc::new(MemoryTokenStore::with_token("stale"));
    let client = test_support::client(&base, store.clone());
    let mut expired = client.session_expired();

    let err = client.get::<Value>("/reject").await.unwrap_err();
    assert!(err.is_unauthorized());
    assert!(err.to_string().contains("Could not validate credentials"));
    assert_eq!(store.get(), None);
    assert_eq!(expired.recv().await.unwrap(), SessionExpired { path: "/reject".into(), token: Some("stale".into()) });
    assert_eq!(hits.count(), 1);
}

#[tokio::test]
async fn unauthorized_keeps_token_stored_during_the_request() {
    let store = Arc::new(MemoryTokenStore::with_token("old"));
    let swap = {
        let store = store.clone();
        move || async move {
            store.store("new");
            (axum::http::StatusCode::UNAUTHORIZED, Json(json!({ "detail": "Could not validate credentials" })))
        }
    };
    let base = test_support::serve(Router::new().route("/swap", get(swap))).await;
    let client = test_support::client(&base, store.clone());
    let mut expired = client.session_expired();

    let err = client.get::<Value>("/swap").await.unwrap_err();
    assert!(err.is_unauthorized());
    assert_eq!(store.get().as_deref(), Some("new"));
    assert_eq!(expired.recv().await.unwrap().token.as_deref(), Some("old"));
}

#[tokio::test]
async fn not_found_passes_through_untouched() {
    let base = test_support::serve(router(Hits::default())).await;
    let store = Arc::new(MemoryTokenStore::with_token("keep"));
    let client = test_support::client(&base, store.clone());
    let mut expired = client.session_expired();

    let err = client.get::<Value>("/missing").await.unwrap_err();
    assert!(matches!(err, TransportError::NotFound { ref path } if path == "/missing"));
    assert_eq!(store.get().as_deref(), Some("keep"));
    assert!(expired.try_recv().is_err());
}

#[tokio::test]
async fn other_status_carries_detail() {
    let base = test_support::serve(router(Hits::default())).await;
    let store = Arc::new(MemoryTokenStore::with_token("keep"));
    let client = test_support::client(&base, store.clone());

    let err = client.get::<Value>("/boom").await.unwrap_err();
    assert!(matches!(err, TransportError::Status { status: 500, ref message } if message == "database down"));
    assert_eq!(store.get().as_deref(), Some("keep"));
}

#[tokio::test]
async fn connect_failure_marks_offline() {
    let base = test_support::dead_url().await;
    let client = test_support::client(&base, test_support::memory_store());
    assert!(client.connectivity().is_online());

    let err = client.get::<Value>("/echo").await.unwrap_err();
    assert!(matches!(err, TransportError::Network(_)));
    assert!(!client.connectivity().is_online());
}

#[tokio::test]
async fn response_marks_online_again() {
    let base = test_support::serve(router(Hits::default())).await;
    let client = test_support::client(&base, test_support::memory_store());
    client.connectivity().set_online(false);

    let _: Value = client.get("/echo").await.unwrap();
    assert!(client.connectivity().is_online());
}

// =============================================================================
// helpers
// =============================================================================

#[test]
fn url_joins_slashes() {
    let client = test_support::client("http://api.test/", test_support::memory_store());
    assert_eq!(client.url("/auth/me"), "http://api.test/auth/me");
    assert_eq!(client.url("auth/me"), "http://api.test/auth/me");
}

#[test]
fn error_message_prefers_detail() {
    assert_eq!(error_message(r#"{"detail":"Incorrect username or password"}"#), "Incorrect username or password");
    assert_eq!(error_message(r#"{"message":"nope"}"#), "nope");
    assert_eq!(error_message("  plain text  "), "plain text");
    assert_eq!(error_message(r#"{"detail":[{"loc":["body"]}]}"#), r#"{"detail":[{"loc":["body"]}]}"#);
}
