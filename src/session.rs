//! Session manager: current user, backend token, and their lifecycle.
//!
//! SYSTEM CONTEXT
//! ==============
//! Sits between the identity provider (which owns the provider session), the
//! token exchange, and the backend API. Hosts construct one per application
//! session, call [`SessionManager::start`], and read [`SessionState`] through
//! [`SessionManager::subscribe`].
//!
//! DESIGN
//! ======
//! - `is_authenticated` is derived from the user record; there is no separate
//!   flag to drift out of sync.
//! - Sign-out epoch: every sign-out-like transition (provider sign-out,
//!   explicit sign-out, a 401 anywhere, a failed operation) bumps a counter.
//!   Sign-in work captures the counter when it starts and commits a token or
//!   user only while the counter is unchanged. An older sign-in can never
//!   overwrite a newer sign-out.
//! - Sign-in establishment is serialized. An explicit `login` and the
//!   provider's resulting sign-in notification queue on the same lock, so only
//!   the first one exchanges tokens; the second finds the stored token and
//!   only fetches the user. Explicit operations read the epoch after taking
//!   the lock, so a failing handler that held it cannot supersede them.
//! - Session-expired events name the rejected token. The listener clears only
//!   when that is the token the session is running on; a rejection that was
//!   already handled (e.g. a stale stored token at startup) is ignored.
//!
//! ERROR HANDLING
//! ==============
//! Fail-closed: any failure while establishing or validating a session clears
//! both the token and the user before the error reaches the caller.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError};

use tokio::sync::{Mutex, broadcast, watch};
use tokio::task::{JoinHandle, JoinSet};

use crate::api::BackendApi;
use crate::error::SessionError;
use crate::exchange::TokenExchanger;
use crate::http::SessionExpired;
use crate::identity::{IdentityProvider, ProviderTransition, Subscription};
use crate::token_store::TokenStore;
use crate::types::{CurrentUser, FirebaseRegisterRequest, RegistrationData, UserUpdate};

/// Observable session state.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SessionState {
    /// Not yet resolved (before [`SessionManager::start`] finishes).
    #[default]
    Loading,
    Anonymous,
    Authenticated(CurrentUser),
}

impl SessionState {
    #[must_use]
    pub fn user(&self) -> Option<&CurrentUser> {
        match self {
            Self::Authenticated(user) => Some(user),
            Self::Loading | Self::Anonymous => None,
        }
    }

    /// True iff there is a current user.
    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        self.user().is_some()
    }

    #[must_use]
    pub fn is_loading(&self) -> bool {
        matches!(self, Self::Loading)
    }

    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Loading => "loading",
            Self::Anonymous => "anonymous",
            Self::Authenticated(_) => "authenticated",
        }
    }
}

// =============================================================================
// MANAGER
// =============================================================================

/// Cheap to clone; clones drive the same session.
#[derive(Clone)]
pub struct SessionManager {
    inner: Arc<Inner>,
}

struct Inner {
    provider: Arc<dyn IdentityProvider>,
    api: BackendApi,
    exchanger: TokenExchanger,
    state: watch::Sender<SessionState>,
    epoch: AtomicU64,
    establish: Mutex<()>,
    /// Bearer token the current session runs on.
    active: std::sync::Mutex<Option<String>>,
}

impl SessionManager {
    #[must_use]
    pub fn new(provider: Arc<dyn IdentityProvider>, api: BackendApi, exchanger: TokenExchanger) -> Self {
        let (state, _rx) = watch::channel(SessionState::Loading);
        Self {
            inner: Arc::new(Inner {
                provider,
                api,
                exchanger,
                state,
                epoch: AtomicU64::new(0),
                establish: Mutex::new(()),
                active: std::sync::Mutex::new(None),
            }),
        }
    }

    /// Resolve the initial state and start following provider transitions and
    /// session-expired events until the handle is stopped.
    ///
    /// With a stored token the current user is fetched; if that fails the
    /// token is discarded and the session starts anonymous.
    pub async fn start(&self) -> SessionHandle {
        // Subscribe before initializing so no transition slips between the two.
        let transitions = self.inner.provider.subscribe();
        let expired = self.inner.api.http().session_expired();

        self.initialize().await;

        let this = self.clone();
        let task = tokio::spawn(async move { this.run(transitions, expired).await });
        SessionHandle { task }
    }

    #[must_use]
    pub fn state(&self) -> SessionState {
        self.inner.state.borrow().clone()
    }

    #[must_use]
    pub fn current_user(&self) -> Option<CurrentUser> {
        self.inner.state.borrow().user().cloned()
    }

    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        self.inner.state.borrow().is_authenticated()
    }

    #[must_use]
    pub fn is_online(&self) -> bool {
        self.inner.api.http().connectivity().is_online()
    }

    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.inner.state.subscribe()
    }

    #[must_use]
    pub fn api(&self) -> &BackendApi {
        &self.inner.api
    }

    // =========================================================================
    // OPERATIONS
    // =========================================================================

    /// Email/password sign-in at the provider, then token exchange and user fetch.
    ///
    /// # Errors
    ///
    /// Returns the provider's credential error, the exchange error, or the
    /// user-fetch error. The session is cleared first in every case except
    /// [`SessionError::Superseded`].
    pub async fn login(&self, email: &str, password: &str) -> Result<CurrentUser, SessionError> {
        let _serial = self.inner.establish.lock().await;
        let epoch = self.epoch();
        let result = async {
            self.inner.provider.login_with_password(email, password).await?;
            self.exchange_and_store(epoch).await?;
            self.load_user(epoch).await
        }
        .await;
        self.settle("login", epoch, result)
    }

    /// Provider sign-up, token exchange, backend registration, then user fetch.
    ///
    /// # Errors
    ///
    /// See [`SessionManager::login`].
    pub async fn register(&self, data: &RegistrationData) -> Result<CurrentUser, SessionError> {
        let _serial = self.inner.establish.lock().await;
        let epoch = self.epoch();
        let result = async {
            self.inner
                .provider
                .register_with_password(&data.email, &data.password)
                .await?;
            self.exchange_and_store(epoch).await?;
            let req = FirebaseRegisterRequest {
                username: data.username.clone(),
                email: data.email.clone(),
                full_name: data.full_name.clone(),
            };
            self.inner.api.firebase_register(&req).await?;
            self.load_user(epoch).await
        }
        .await;
        self.settle("register", epoch, result)
    }

    /// # Errors
    ///
    /// See [`SessionManager::login`].
    pub async fn sign_in_with_google(&self) -> Result<CurrentUser, SessionError> {
        let _serial = self.inner.establish.lock().await;
        let epoch = self.epoch();
        let result = async {
            self.inner.provider.sign_in_with_google().await?;
            self.exchange_and_store(epoch).await?;
            self.load_user(epoch).await
        }
        .await;
        self.settle("google sign-in", epoch, result)
    }

    /// Backend-native username/password login (`POST /auth/login`), no provider.
    ///
    /// # Errors
    ///
    /// See [`SessionManager::login`].
    pub async fn login_direct(&self, username: &str, password: &str) -> Result<CurrentUser, SessionError> {
        let _serial = self.inner.establish.lock().await;
        let epoch = self.epoch();
        let result = async {
            let token = self.inner.api.login(username, password).await?;
            self.commit_token(epoch, &token.access_token)?;
            self.load_user(epoch).await
        }
        .await;
        self.settle("direct login", epoch, result)
    }

    /// Clear the local session, then sign out at the provider.
    ///
    /// # Errors
    ///
    /// A provider sign-out failure is returned after the local session is
    /// already cleared.
    pub async fn sign_out(&self) -> Result<(), SessionError> {
        self.clear("sign-out requested");
        self.inner.provider.sign_out().await.map_err(|e| {
            tracing::warn!(error = %e, "provider sign-out failed");
            SessionError::from(e)
        })
    }

    /// Re-fetch the current user with the stored token.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Fetch`] after clearing the session.
    pub async fn refresh_user(&self) -> Result<CurrentUser, SessionError> {
        let epoch = self.epoch();
        let result = self.load_user(epoch).await;
        self.settle("user refresh", epoch, result)
    }

    /// `PATCH /users/me` and replace the current user with the result.
    ///
    /// # Errors
    ///
    /// Returns the transport error. Only a 401 ends the session.
    pub async fn update_profile(&self, update: &UserUpdate) -> Result<CurrentUser, SessionError> {
        if update.is_empty() {
            return self.refresh_user().await;
        }
        let epoch = self.epoch();
        let user = self.inner.api.update_me(update).await?;
        self.check_epoch(epoch)?;
        self.set_state(SessionState::Authenticated(user.clone()));
        Ok(user)
    }

    // =========================================================================
    // LIFECYCLE
    // =========================================================================

    async fn initialize(&self) {
        let _serial = self.inner.establish.lock().await;
        let epoch = self.epoch();
        let Some(stored) = self.tokens().get() else {
            tracing::debug!("no stored token");
            self.set_state(SessionState::Anonymous);
            return;
        };
        self.set_active(Some(stored));
        match self.load_user(epoch).await {
            Ok(user) => tracing::info!(user = %user.id, "restored session from stored token"),
            Err(SessionError::Superseded) => {}
            Err(e) => {
                tracing::warn!(error = %e, "stored token did not validate");
                self.fail(epoch);
            }
        }
    }

    async fn run(self, mut transitions: Subscription, mut expired: broadcast::Receiver<SessionExpired>) {
        let mut tails = JoinSet::new();
        loop {
            tokio::select! {
                transition = transitions.next() => match transition {
                    Some(ProviderTransition::SignedIn(user)) => {
                        // Capture the epoch now, in arrival order.
                        let epoch = self.epoch();
                        let this = self.clone();
                        tracing::debug!(uid = %user.uid, "provider sign-in observed");
                        tails.spawn(async move { this.on_signed_in(epoch).await });
                    }
                    Some(ProviderTransition::SignedOut) => self.clear("provider signed out"),
                    None => {
                        tracing::info!("provider subscription closed; session listener stopping");
                        break;
                    }
                },
                event = expired.recv() => match event {
                    Ok(SessionExpired { path, token }) => {
                        if token.is_some() && token == self.active_token() {
                            tracing::info!(path, "session expired");
                            self.clear("backend rejected token");
                        } else {
                            tracing::debug!(path, "rejection does not concern the current session");
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "session-expired events dropped");
                        // The HTTP layer removes a rejected token, so a session
                        // whose token is gone was one of the dropped events.
                        if self.active_token().is_some() && self.tokens().get() != self.active_token() {
                            self.clear("backend rejected token");
                        }
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
                Some(joined) = tails.join_next(), if !tails.is_empty() => {
                    if let Err(e) = joined {
                        tracing::warn!(error = %e, "sign-in handler aborted");
                    }
                }
            }
        }
    }

    async fn on_signed_in(&self, epoch: u64) {
        // Held through `fail` so a queued operation reads the epoch after it.
        let _serial = self.inner.establish.lock().await;
        let result = async {
            self.check_epoch(epoch)?;
            match self.tokens().get() {
                Some(stored) => self.set_active(Some(stored)),
                None => self.exchange_and_store(epoch).await?,
            }
            self.load_user(epoch).await
        }
        .await;
        match result {
            Ok(user) => tracing::debug!(user = %user.id, "provider sign-in settled"),
            Err(SessionError::Superseded) => tracing::debug!("provider sign-in superseded by sign-out"),
            Err(e) => {
                tracing::warn!(error = %e, "provider sign-in could not establish a session");
                self.fail(epoch);
            }
        }
    }

    // =========================================================================
    // INTERNALS
    // =========================================================================

    async fn exchange_and_store(&self, epoch: u64) -> Result<(), SessionError> {
        let token = self
            .inner
            .exchanger
            .exchange()
            .await?
            .ok_or(SessionError::NoProviderSession)?;
        self.commit_token(epoch, &token.access_token)
    }

    fn commit_token(&self, epoch: u64, token: &str) -> Result<(), SessionError> {
        self.check_epoch(epoch)?;
        self.tokens().store(token);
        self.set_active(Some(token.to_owned()));
        Ok(())
    }

    async fn load_user(&self, epoch: u64) -> Result<CurrentUser, SessionError> {
        let user = self.inner.api.me().await.map_err(SessionError::Fetch)?;
        self.check_epoch(epoch)?;
        self.set_state(SessionState::Authenticated(user.clone()));
        Ok(user)
    }

    fn settle(&self, op: &'static str, epoch: u64, result: Result<CurrentUser, SessionError>) -> Result<CurrentUser, SessionError> {
        match &result {
            Ok(user) => tracing::info!(op, user = %user.id, "signed in"),
            Err(SessionError::Superseded) => tracing::debug!(op, "result discarded after sign-out"),
            Err(e) => {
                tracing::warn!(op, error = %e, "session operation failed");
                self.fail(epoch);
            }
        }
        result
    }

    /// Clear after a failure, unless a sign-out already did since `epoch`.
    fn fail(&self, epoch: u64) {
        if self.epoch_is(epoch) {
            self.clear("operation failed");
        }
    }

    fn clear(&self, reason: &'static str) {
        self.inner.epoch.fetch_add(1, Ordering::SeqCst);
        self.set_active(None);
        self.tokens().remove();
        tracing::debug!(reason, "session cleared");
        self.set_state(SessionState::Anonymous);
    }

    fn set_state(&self, next: SessionState) {
        let mut from = "";
        let changed = self.inner.state.send_if_modified(|current| {
            if *current == next {
                return false;
            }
            from = current.name();
            *current = next.clone();
            true
        });
        if changed {
            tracing::info!(from, to = next.name(), "session state changed");
        }
    }

    fn active_token(&self) -> Option<String> {
        self.inner.active.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    fn set_active(&self, token: Option<String>) {
        *self.inner.active.lock().unwrap_or_else(PoisonError::into_inner) = token;
    }

    fn tokens(&self) -> &Arc<dyn TokenStore> {
        self.inner.api.http().token_store()
    }

    fn epoch(&self) -> u64 {
        self.inner.epoch.load(Ordering::SeqCst)
    }

    fn epoch_is(&self, epoch: u64) -> bool {
        self.epoch() == epoch
    }

    fn check_epoch(&self, epoch: u64) -> Result<(), SessionError> {
        if self.epoch_is(epoch) { Ok(()) } else { Err(SessionError::Superseded) }
    }
}

// =============================================================================
// HANDLE
// =============================================================================

/// Running listener task. Dropping the handle leaves the listener running;
/// call [`SessionHandle::stop`] to end it.
pub struct SessionHandle {
    task: JoinHandle<()>,
}

impl SessionHandle {
    #[must_use]
    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }

    /// Stop following transitions. In-flight sign-in handlers are aborted.
    pub async fn stop(self) {
        self.task.abort();
        match self.task.await {
            Err(e) if !e.is_cancelled() => tracing::warn!(error = %e, "session listener ended abnormally"),
            _ => {}
        }
    }
}

#[cfg(test)]
#[path = "session_test.rs"]
mod tests;
