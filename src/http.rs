//! Shared request pipeline for every backend call.
//!
//! ARCHITECTURE
//! ============
//! Request stage: attach `Authorization: Bearer <token>` from the token store
//! when one is present.
//!
//! Response-error stage: a 401 removes the stored token and broadcasts a
//! [`SessionExpired`] event naming the rejected token before the error is
//! returned. A token stored while the request was in flight is left alone. The host decides what
//! that means (redirect, modal, exit); this layer never navigates. A 404 and
//! every other status pass through as typed errors for the caller.
//!
//! Connectivity is updated as a side effect: any response means online, a
//! connect failure or timeout means offline.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use reqwest::{Method, RequestBuilder, StatusCode};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::sync::broadcast;

use crate::config::HttpTimeouts;
use crate::connectivity::Connectivity;
use crate::error::TransportError;
use crate::token_store::TokenStore;

const EXPIRED_CHANNEL_CAPACITY: usize = 16;

/// Broadcast when the backend rejects the stored bearer token.
#[derive(Clone, PartialEq, Eq)]
pub struct SessionExpired {
    /// Path of the call that was rejected.
    pub path: String,
    /// Bearer token the rejected call carried, if any. Listeners compare it
    /// with the token they hold so an old rejection cannot end a newer session.
    pub token: Option<String>,
}

impl fmt::Debug for SessionExpired {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionExpired")
            .field("path", &self.path)
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Cheap to clone; clones share the connection pool, token store and event channel.
#[derive(Clone)]
pub struct HttpClient {
    http: reqwest::Client,
    base_url: String,
    tokens: Arc<dyn TokenStore>,
    connectivity: Connectivity,
    expired_tx: broadcast::Sender<SessionExpired>,
}

impl HttpClient {
    /// # Errors
    ///
    /// Returns an error if the underlying HTTP client cannot be built.
    pub fn new(
        base_url: impl Into<String>,
        tokens: Arc<dyn TokenStore>,
        timeouts: HttpTimeouts,
    ) -> Result<Self, TransportError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeouts.request_secs))
            .connect_timeout(Duration::from_secs(timeouts.connect_secs))
            .build()
            .map_err(|e| TransportError::HttpClientBuild(e.to_string()))?;
        let (expired_tx, _rx) = broadcast::channel(EXPIRED_CHANNEL_CAPACITY);
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_owned(),
            tokens,
            connectivity: Connectivity::new(),
            expired_tx,
        })
    }

    /// Share an externally owned connectivity flag.
    #[must_use]
    pub fn with_connectivity(mut self, connectivity: Connectivity) -> Self {
        self.connectivity = connectivity;
        self
    }

    #[must_use]
    pub fn connectivity(&self) -> &Connectivity {
        &self.connectivity
    }

    #[must_use]
    pub fn token_store(&self) -> &Arc<dyn TokenStore> {
        &self.tokens
    }

    /// Subscribe to session-expired events. Dropping the receiver unsubscribes.
    #[must_use]
    pub fn session_expired(&self) -> broadcast::Receiver<SessionExpired> {
        self.expired_tx.subscribe()
    }

    #[must_use]
    pub fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    /// # Errors
    ///
    /// Returns a [`TransportError`] for network failures, non-success statuses
    /// or an undecodable body.
    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, TransportError> {
        let resp = self.send(Method::GET, path, |rb| rb).await?;
        decode(resp).await
    }

    /// # Errors
    ///
    /// See [`HttpClient::get`].
    pub async fn post_json<B, T>(&self, path: &str, body: &B) -> Result<T, TransportError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let resp = self.send(Method::POST, path, |rb| rb.json(body)).await?;
        decode(resp).await
    }

    /// POST an `application/x-www-form-urlencoded` body.
    ///
    /// # Errors
    ///
    /// See [`HttpClient::get`].
    pub async fn post_form<B, T>(&self, path: &str, form: &B) -> Result<T, TransportError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let resp = self.send(Method::POST, path, |rb| rb.form(form)).await?;
        decode(resp).await
    }

    /// # Errors
    ///
    /// See [`HttpClient::get`].
    pub async fn patch_json<B, T>(&self, path: &str, body: &B) -> Result<T, TransportError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let resp = self.send(Method::PATCH, path, |rb| rb.json(body)).await?;
        decode(resp).await
    }

    async fn send<F>(&self, method: Method, path: &str, build: F) -> Result<reqwest::Response, TransportError>
    where
        F: FnOnce(RequestBuilder) -> RequestBuilder,
    {
        let mut rb = self.http.request(method.clone(), self.url(path));
        let bearer = self.tokens.get();
        if let Some(token) = &bearer {
            rb = rb.bearer_auth(token);
        }

        let resp = match build(rb).send().await {
            Ok(resp) => resp,
            Err(e) => {
                if e.is_connect() || e.is_timeout() {
                    self.connectivity.set_online(false);
                }
                tracing::warn!(%method, path, error = %e, "backend request failed");
                return Err(TransportError::Network(e.to_string()));
            }
        };
        self.connectivity.set_online(true);

        let status = resp.status();
        tracing::debug!(%method, path, status = status.as_u16(), "backend response");
        if status.is_success() {
            return Ok(resp);
        }

        let body = resp.text().await.unwrap_or_default();
        let message = error_message(&body);
        match status {
            StatusCode::UNAUTHORIZED => {
                self.expire_session(path, bearer);
                Err(TransportError::Unauthorized { message })
            }
            StatusCode::NOT_FOUND => Err(TransportError::NotFound { path: path.to_owned() }),
            _ => Err(TransportError::Status { status: status.as_u16(), message }),
        }
    }

    fn expire_session(&self, path: &str, rejected: Option<String>) {
        if self.tokens.get() == rejected {
            self.tokens.remove();
        } else {
            tracing::debug!(path, "token replaced while request was in flight; keeping it");
        }
        tracing::info!(path, "backend rejected bearer token; session expired");
        if self
            .expired_tx
            .send(SessionExpired { path: path.to_owned(), token: rejected })
            .is_err()
        {
            tracing::debug!("no session-expired listeners");
        }
    }
}

async fn decode<T: DeserializeOwned>(resp: reqwest::Response) -> Result<T, TransportError> {
    let text = resp
        .text()
        .await
        .map_err(|e| TransportError::Network(e.to_string()))?;
    let text = if text.trim().is_empty() { "null" } else { text.as_str() };
    serde_json::from_str(text).map_err(|e| TransportError::Decode(e.to_string()))
}

/// Prefer the backend's `detail`/`message` field over the raw body.
pub(crate) fn error_message(body: &str) -> String {
    if let Ok(value) = serde_json::from_str::<serde_json::Value>(body) {
        for key in ["detail", "message", "error"] {
            if let Some(msg) = value.get(key).and_then(serde_json::Value::as_str) {
                return msg.to_owned();
            }
        }
    }
    body.trim().to_owned()
}

#[cfg(test)]
#[path = "http_test.rs"]
mod tests;
