//! Identity-token → backend-token exchange.
//!
//! DESIGN
//! ======
//! Explicit state machine guarded by a mutex:
//!
//! ```text
//! Idle ──exchange()──▶ InFlight ──ok / no id token──▶ Idle
//!                         │
//!                         └──error──▶ Cooldown { until, error } ──until passes──▶ (Idle)
//! ```
//!
//! - A call while `InFlight` makes no network request and returns `Ok(None)`.
//!   `InFlight` is only entered from `Idle` or a lapsed cool-down, so there is
//!   never a recent failure to re-raise at that point.
//! - A call during `Cooldown` re-raises the cached error without a request.
//!   The window is fixed (no backoff growth) and measured on an injectable
//!   [`Clock`].
//! - A dropped (cancelled) exchange future returns the machine to `Idle`.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use crate::api::BackendApi;
use crate::clock::{Clock, SystemClock};
use crate::error::TokenExchangeError;
use crate::identity::IdentityProvider;
use crate::types::BackendToken;

pub const EXCHANGE_COOLDOWN: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExchangeState {
    Idle,
    InFlight,
    Cooldown { until: Instant, error: TokenExchangeError },
}

pub struct TokenExchanger {
    provider: Arc<dyn IdentityProvider>,
    api: BackendApi,
    clock: Arc<dyn Clock>,
    cooldown: Duration,
    state: Mutex<ExchangeState>,
}

impl TokenExchanger {
    #[must_use]
    pub fn new(provider: Arc<dyn IdentityProvider>, api: BackendApi) -> Self {
        Self {
            provider,
            api,
            clock: Arc::new(SystemClock),
            cooldown: EXCHANGE_COOLDOWN,
            state: Mutex::new(ExchangeState::Idle),
        }
    }

    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    #[must_use]
    pub fn with_cooldown(mut self, cooldown: Duration) -> Self {
        self.cooldown = cooldown;
        self
    }

    #[must_use]
    pub fn state(&self) -> ExchangeState {
        self.lock().clone()
    }

    #[must_use]
    pub fn is_in_flight(&self) -> bool {
        matches!(*self.lock(), ExchangeState::InFlight)
    }

    /// Exchange the provider's current ID token for a backend token.
    ///
    /// Returns `Ok(None)` when nobody is signed in at the provider or another
    /// exchange is already running; callers should not retry immediately.
    ///
    /// # Errors
    ///
    /// Returns the classified failure, or the cached one during the cool-down.
    pub async fn exchange(&self) -> Result<Option<BackendToken>, TokenExchangeError> {
        {
            let mut state = self.lock();
            match &*state {
                ExchangeState::InFlight => {
                    tracing::debug!("token exchange already in flight; skipping");
                    return Ok(None);
                }
                ExchangeState::Cooldown { until, error } if self.clock.now() < *until => {
                    tracing::debug!(error = %error, "token exchange cooling down; re-raising cached error");
                    return Err(error.clone());
                }
                ExchangeState::Idle | ExchangeState::Cooldown { .. } => {}
            }
            *state = ExchangeState::InFlight;
        }

        let flight = Flight { exchanger: self, settled: false };
        let result = self.run().await;
        let next = match &result {
            Ok(_) => ExchangeState::Idle,
            Err(error) => {
                tracing::warn!(error = %error, cooldown_secs = self.cooldown.as_secs(), "token exchange failed");
                ExchangeState::Cooldown { until: self.clock.now() + self.cooldown, error: error.clone() }
            }
        };
        flight.settle(next);
        result
    }

    async fn run(&self) -> Result<Option<BackendToken>, TokenExchangeError> {
        let id_token = match self.provider.get_id_token(false).await {
            Ok(Some(token)) => token,
            Ok(None) => {
                tracing::debug!("no provider session; nothing to exchange");
                return Ok(None);
            }
            Err(e) => return Err(TokenExchangeError::IdToken(e)),
        };

        let token = self.api.firebase_login(&id_token).await?;
        tracing::info!(token_type = %token.token_type, "exchanged identity token for backend token");
        Ok(Some(token))
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ExchangeState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Returns the machine to `Idle` if the exchange future is dropped mid-flight.
struct Flight<'a> {
    exchanger: &'a TokenExchanger,
    settled: bool,
}

impl Flight<'_> {
    fn settle(mut self, next: ExchangeState) {
        *self.exchanger.lock() = next;
        self.settled = true;
    }
}

impl Drop for Flight<'_> {
    fn drop(&mut self) {
        if !self.settled {
            *self.exchanger.lock() = ExchangeState::Idle;
        }
    }
}

#[cfg(test)]
#[path = "exchange_test.rs"]
mod tests;
