//! Shared helpers for unit tests: in-process mock backend and identity provider.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use axum::Router;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, patch, post};
use serde_json::{Value, json};
use tokio::sync::Notify;

use crate::config::HttpTimeouts;
use crate::error::{CredentialCode, CredentialError};
use crate::http::HttpClient;
use crate::identity::{IdentityProvider, ProviderUser, Subscription, TransitionHub};
use crate::token_store::{MemoryTokenStore, TokenStore};

/// Serve `router` on an ephemeral localhost port and return its base URL.
pub async fn serve(router: axum::Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind mock backend");
    let addr = listener.local_addr().expect("mock backend addr");
    tokio::spawn(async move {
        axum::serve(listener, router)
            .await
            .expect("mock backend serve");
    });
    format!("http://{addr}")
}

/// Base URL of a port that refuses connections.
pub async fn dead_url() -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind probe");
    let addr = listener.local_addr().expect("probe addr");
    drop(listener);
    format!("http://{addr}")
}

pub fn client(base_url: &str, tokens: Arc<dyn TokenStore>) -> HttpClient {
    HttpClient::new(base_url, tokens, HttpTimeouts { request_secs: 5, connect_secs: 2 }).expect("http client")
}

pub fn memory_store() -> Arc<MemoryTokenStore> {
    Arc::new(MemoryTokenStore::new())
}

/// Request counter shared with mock handlers.
#[derive(Clone, Default)]
pub struct Hits(Arc<AtomicUsize>);

impl Hits {
    pub fn bump(&self) -> usize {
        self.0.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn count(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }
}

// =============================================================================
// MOCK IDENTITY PROVIDER
// =============================================================================

pub const GOOD_PASSWORD: &str = "correct-pw";

/// In-memory provider: `correct-pw` is the only valid password,
/// `taken@example.com` is already registered, `disabled@example.com` is disabled.
#[derive(Default)]
pub struct MockProvider {
    hub: TransitionHub,
    current: Mutex<Option<ProviderUser>>,
    pub google_enabled: AtomicBool,
    pub fail_sign_out: AtomicBool,
    pub id_token_calls: Hits,
}

impl MockProvider {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn user(email: &str) -> ProviderUser {
        ProviderUser { uid: format!("uid-{email}"), email: Some(email.to_owned()), display_name: None }
    }

    /// Provider-side sign-in that did not go through any operation (e.g. restored session).
    pub fn sign_in_externally(&self, email: &str) {
        let user = Self::user(email);
        *self.current.lock().unwrap() = Some(user.clone());
        self.hub.signed_in(user);
    }

    pub fn sign_out_externally(&self) {
        *self.current.lock().unwrap() = None;
        self.hub.signed_out();
    }

    fn sign_in(&self, email: &str) -> ProviderUser {
        let user = Self::user(email);
        *self.current.lock().unwrap() = Some(user.clone());
        self.hub.signed_in(user.clone());
        user
    }
}

#[async_trait::async_trait]
impl IdentityProvider for MockProvider {
    async fn register_with_password(&self, email: &str, password: &str) -> Result<ProviderUser, CredentialError> {
        if email == "taken@example.com" {
            return Err(CredentialError::new(CredentialCode::EmailInUse));
        }
        if password.len() < 6 {
            return Err(CredentialError::new(CredentialCode::WeakPassword));
        }
        Ok(self.sign_in(email))
    }

    async fn login_with_password(&self, email: &str, password: &str) -> Result<ProviderUser, CredentialError> {
        if email == "disabled@example.com" {
            return Err(CredentialError::new(CredentialCode::UserDisabled));
        }
        if password != GOOD_PASSWORD {
            return Err(CredentialError::new(CredentialCode::WrongPassword));
        }
        Ok(self.sign_in(email))
    }

    async fn sign_in_with_google(&self) -> Result<ProviderUser, CredentialError> {
        if !self.google_enabled.load(Ordering::SeqCst) {
            return Err(CredentialError::new(CredentialCode::PopupClosed));
        }
        Ok(self.sign_in("google-user@example.com"))
    }

    async fn sign_out(&self) -> Result<(), CredentialError> {
        if self.fail_sign_out.load(Ordering::SeqCst) {
            return Err(CredentialError::new(CredentialCode::NetworkFailure));
        }
        self.sign_out_externally();
        Ok(())
    }

    async fn get_id_token(&self, _force_refresh: bool) -> Result<Option<String>, CredentialError> {
        self.id_token_calls.bump();
        Ok(self
            .current
            .lock()
            .unwrap()
            .as_ref()
            .map(|u| format!("id-{}", u.uid)))
    }

    fn subscribe(&self) -> Subscription {
        self.hub.subscribe()
    }
}

// =============================================================================
// MOCK BACKEND
// =============================================================================

/// A pause point inside a mock handler.
#[derive(Clone, Default)]
pub struct Gate {
    held: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl Gate {
    pub fn hold(&self) {
        self.held.store(true, Ordering::SeqCst);
    }

    pub fn release(&self) {
        self.held.store(false, Ordering::SeqCst);
        self.notify.notify_waiters();
        self.notify.notify_one();
    }

    async fn pass(&self) {
        if self.held.load(Ordering::SeqCst) {
            self.notify.notified().await;
        }
    }
}

/// Mock of the backend's auth endpoints with switches and hit counters.
#[derive(Clone, Default)]
pub struct Backend {
    pub exchange_hits: Hits,
    pub me_hits: Hits,
    pub register_hits: Hits,
    pub reject_exchange: Arc<AtomicBool>,
    pub revoked: Arc<AtomicBool>,
    pub exchange_gate: Gate,
    pub me_gate: Gate,
}

impl Backend {
    pub async fn start(&self) -> String {
        serve(self.router()).await
    }

    fn router(&self) -> Router {
        Router::new()
            .route(crate::api::FIREBASE_LOGIN_PATH, post(firebase_login))
            .route(crate::api::LOGIN_PATH, post(direct_login))
            .route(crate::api::FIREBASE_REGISTER_PATH, post(firebase_register))
            .route(crate::api::ME_PATH, get(me))
            .route(crate::api::USERS_ME_PATH, patch(update_me))
            .with_state(self.clone())
    }
}

fn unauthorized() -> Response {
    (StatusCode::UNAUTHORIZED, Json(json!({ "detail": "Could not validate credentials" }))).into_response()
}

fn bearer(headers: &HeaderMap) -> Option<String> {
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::to_owned)
}

fn user_json(full_name: &Value) -> Value {
    json!({ "id": 1, "username": "ada", "email": "user@example.com", "full_name": full_name })
}

async fn firebase_login(State(b): State<Backend>, Json(body): Json<Value>) -> Response {
    b.exchange_hits.bump();
    b.exchange_gate.pass().await;
    if b.reject_exchange.load(Ordering::SeqCst) {
        return (StatusCode::BAD_REQUEST, Json(json!({ "detail": "Invalid Firebase token" }))).into_response();
    }
    let id_token = body["id_token"].as_str().unwrap_or_default();
    Json(json!({ "access_token": format!("backend-{id_token}"), "token_type": "bearer" })).into_response()
}

async fn direct_login(axum::Form(form): axum::Form<std::collections::HashMap<String, String>>) -> Response {
    if form.get("password").map(String::as_str) != Some(GOOD_PASSWORD) {
        return (StatusCode::UNAUTHORIZED, Json(json!({ "detail": "Incorrect username or password" }))).into_response();
    }
    let username = form.get("username").cloned().unwrap_or_default();
    Json(json!({ "access_token": format!("direct-{username}"), "token_type": "bearer" })).into_response()
}

async fn firebase_register(State(b): State<Backend>, headers: HeaderMap, Json(body): Json<Value>) -> Response {
    if bearer(&headers).is_none() {
        return unauthorized();
    }
    b.register_hits.bump();
    Json(json!({ "message": "registered", "username": body["username"] })).into_response()
}

async fn me(State(b): State<Backend>, headers: HeaderMap) -> Response {
    b.me_hits.bump();
    b.me_gate.pass().await;
    match bearer(&headers) {
        Some(token) if !b.revoked.load(Ordering::SeqCst) && (token.starts_with("backend-") || token.starts_with("direct-")) => {
            Json(user_json(&json!("Ada Lovelace"))).into_response()
        }
        _ => unauthorized(),
    }
}

async fn update_me(State(b): State<Backend>, headers: HeaderMap, Json(body): Json<Value>) -> Response {
    if bearer(&headers).is_none() || b.revoked.load(Ordering::SeqCst) {
        return unauthorized();
    }
    Json(user_json(&body["full_name"])).into_response()
}
