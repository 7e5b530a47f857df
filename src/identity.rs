//! Identity-provider seam.
//!
//! SYSTEM CONTEXT
//! ==============
//! The provider owns its own session (signed-in user, refresh token). This
//! crate only asks it to sign users in or out, asks it for short-lived ID
//! tokens, and observes its sign-in/sign-out transitions through a push-based
//! [`Subscription`].

use tokio::sync::broadcast;

use crate::error::CredentialError;

const TRANSITION_CHANNEL_CAPACITY: usize = 64;

/// The user as the identity provider sees it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderUser {
    pub uid: String,
    pub email: Option<String>,
    pub display_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderTransition {
    SignedIn(ProviderUser),
    SignedOut,
}

#[async_trait::async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Fails on duplicate email, weak password or malformed email.
    async fn register_with_password(&self, email: &str, password: &str) -> Result<ProviderUser, CredentialError>;

    /// Fails on wrong password, unknown user, disabled account or rate limiting.
    async fn login_with_password(&self, email: &str, password: &str) -> Result<ProviderUser, CredentialError>;

    /// Fails when the popup is closed, blocked or cancelled.
    async fn sign_in_with_google(&self) -> Result<ProviderUser, CredentialError>;

    /// Failures propagate; a sign-out is never silently dropped.
    async fn sign_out(&self) -> Result<(), CredentialError>;

    /// `Ok(None)` when nobody is signed in at the provider.
    async fn get_id_token(&self, force_refresh: bool) -> Result<Option<String>, CredentialError>;

    /// Observe every sign-in/sign-out transition from now on.
    fn subscribe(&self) -> Subscription;
}

// =============================================================================
// TRANSITION HUB
// =============================================================================

/// Fan-out for provider transitions, embedded by provider implementations.
#[derive(Debug, Clone)]
pub struct TransitionHub {
    tx: broadcast::Sender<ProviderTransition>,
}

impl TransitionHub {
    #[must_use]
    pub fn new() -> Self {
        let (tx, _rx) = broadcast::channel(TRANSITION_CHANNEL_CAPACITY);
        Self { tx }
    }

    #[must_use]
    pub fn subscribe(&self) -> Subscription {
        Subscription { rx: self.tx.subscribe() }
    }

    pub fn signed_in(&self, user: ProviderUser) {
        tracing::debug!(uid = %user.uid, "provider signed in");
        self.publish(ProviderTransition::SignedIn(user));
    }

    pub fn signed_out(&self) {
        tracing::debug!("provider signed out");
        self.publish(ProviderTransition::SignedOut);
    }

    fn publish(&self, transition: ProviderTransition) {
        if self.tx.send(transition).is_err() {
            tracing::debug!("no provider transition subscribers");
        }
    }
}

impl Default for TransitionHub {
    fn default() -> Self {
        Self::new()
    }
}

/// Live subscription to provider transitions. Dropping it unsubscribes.
#[derive(Debug)]
pub struct Subscription {
    rx: broadcast::Receiver<ProviderTransition>,
}

impl Subscription {
    /// Next transition in the order they occurred, or `None` once the provider is gone.
    pub async fn next(&mut self) -> Option<ProviderTransition> {
        loop {
            match self.rx.recv().await {
                Ok(transition) => return Some(transition),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "provider transitions dropped; subscriber lagging");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    pub fn unsubscribe(self) {}
}

#[cfg(test)]
#[path = "identity_test.rs"]
mod tests;
