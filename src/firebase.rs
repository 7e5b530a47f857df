//! Identity provider backed by the Firebase identity-toolkit REST API.
//!
//! ARCHITECTURE
//! ============
//! Password sign-up/sign-in and Google IdP sign-in go to `accounts:*`
//! endpoints; ID-token refresh goes to the secure-token endpoint. The provider
//! session (ID token, refresh token, expiry) lives only in memory here, the
//! same as the browser SDK's in-memory persistence mode.
//!
//! Google sign-in needs a Google ID token from somewhere interactive (the
//! browser popup in a web host). That step is injected as a
//! [`GoogleCredentialSource`]; without one the sign-in fails the way a blocked
//! popup does.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Deserialize;
use tokio::sync::Mutex;

use crate::clock::{Clock, SystemClock};
use crate::config::FirebaseConfig;
use crate::error::{CredentialCode, CredentialError};
use crate::identity::{IdentityProvider, ProviderUser, Subscription, TransitionHub};

const DEFAULT_EXPIRES_IN_SECS: u64 = 3600;
/// Refresh ID tokens this long before they actually expire.
const REFRESH_MARGIN: Duration = Duration::from_secs(5 * 60);
const REQUEST_TIMEOUT_SECS: u64 = 30;
const CONNECT_TIMEOUT_SECS: u64 = 10;

/// Supplies a Google ID token, e.g. by running an OAuth popup or device flow.
#[async_trait::async_trait]
pub trait GoogleCredentialSource: Send + Sync {
    async fn google_id_token(&self) -> Result<String, CredentialError>;
}

/// A Google ID token obtained out of band.
pub struct StaticGoogleCredential(pub String);

#[async_trait::async_trait]
impl GoogleCredentialSource for StaticGoogleCredential {
    async fn google_id_token(&self) -> Result<String, CredentialError> {
        if self.0.trim().is_empty() {
            return Err(CredentialError::new(CredentialCode::CancelledPopup));
        }
        Ok(self.0.clone())
    }
}

// =============================================================================
// CLIENT
// =============================================================================

struct ProviderSession {
    user: ProviderUser,
    id_token: String,
    refresh_token: String,
    expires_at: Instant,
}

pub struct FirebaseIdentityClient {
    http: reqwest::Client,
    config: FirebaseConfig,
    hub: TransitionHub,
    session: Mutex<Option<ProviderSession>>,
    google: Option<Arc<dyn GoogleCredentialSource>>,
    clock: Arc<dyn Clock>,
}

impl FirebaseIdentityClient {
    /// # Errors
    ///
    /// Returns an error if the underlying HTTP client cannot be built.
    pub fn new(config: FirebaseConfig) -> Result<Self, CredentialError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
            .build()
            .map_err(|e| CredentialError::with_detail(CredentialCode::Unknown, e.to_string()))?;
        Ok(Self {
            http,
            config,
            hub: TransitionHub::new(),
            session: Mutex::new(None),
            google: None,
            clock: Arc::new(SystemClock),
        })
    }

    #[must_use]
    pub fn with_google(mut self, source: Arc<dyn GoogleCredentialSource>) -> Self {
        self.google = Some(source);
        self
    }

    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// The provider-side user, if signed in.
    pub async fn current_user(&self) -> Option<ProviderUser> {
        self.session.lock().await.as_ref().map(|s| s.user.clone())
    }

    fn accounts_url(&self, method: &str) -> String {
        format!("{}/accounts:{method}?key={}", self.config.identity_url, self.config.api_key)
    }

    fn refresh_url(&self) -> String {
        format!("{}/token?key={}", self.config.secure_token_url, self.config.api_key)
    }

    async fn post_accounts(&self, method: &str, body: &serde_json::Value) -> Result<AccountResponse, CredentialError> {
        let resp = self
            .http
            .post(self.accounts_url(method))
            .json(body)
            .send()
            .await
            .map_err(network_error)?;
        read_json(resp).await
    }

    /// Replace the provider session and announce the sign-in.
    async fn establish(&self, account: AccountResponse) -> ProviderUser {
        let user = ProviderUser {
            uid: account.local_id,
            email: account.email,
            display_name: account.display_name.filter(|n| !n.is_empty()),
        };
        let session = ProviderSession {
            user: user.clone(),
            id_token: account.id_token,
            refresh_token: account.refresh_token,
            expires_at: self.clock.now() + Duration::from_secs(parse_expires_in(account.expires_in.as_deref())),
        };
        *self.session.lock().await = Some(session);
        tracing::info!(uid = %user.uid, "provider sign-in");
        self.hub.signed_in(user.clone());
        user
    }

    async fn refresh(&self, session: &mut ProviderSession) -> Result<(), CredentialError> {
        let resp = self
            .http
            .post(self.refresh_url())
            .form(&[("grant_type", "refresh_token"), ("refresh_token", session.refresh_token.as_str())])
            .send()
            .await
            .map_err(network_error)?;
        let refreshed: RefreshResponse = read_json(resp).await?;
        session.id_token = refreshed.id_token;
        session.refresh_token = refreshed.refresh_token;
        session.expires_at = self.clock.now() + Duration::from_secs(parse_expires_in(refreshed.expires_in.as_deref()));
        tracing::debug!(uid = %session.user.uid, "provider ID token refreshed");
        Ok(())
    }
}

#[async_trait::async_trait]
impl IdentityProvider for FirebaseIdentityClient {
    async fn register_with_password(&self, email: &str, password: &str) -> Result<ProviderUser, CredentialError> {
        let body = serde_json::json!({ "email": email, "password": password, "returnSecureToken": true });
        let account = self.post_accounts("signUp", &body).await?;
        Ok(self.establish(account).await)
    }

    async fn login_with_password(&self, email: &str, password: &str) -> Result<ProviderUser, CredentialError> {
        let body = serde_json::json!({ "email": email, "password": password, "returnSecureToken": true });
        let account = self.post_accounts("signInWithPassword", &body).await?;
        Ok(self.establish(account).await)
    }

    async fn sign_in_with_google(&self) -> Result<ProviderUser, CredentialError> {
        let Some(source) = &self.google else {
            return Err(CredentialError::new(CredentialCode::PopupBlocked));
        };
        let google_token = source.google_id_token().await?;
        let post_body = url::form_urlencoded::Serializer::new(String::new())
            .append_pair("id_token", &google_token)
            .append_pair("providerId", "google.com")
            .finish();
        let body = serde_json::json!({
            "postBody": post_body,
            "requestUri": self.config.request_uri(),
            "returnIdpCredential": true,
            "returnSecureToken": true,
        });
        let account = self.post_accounts("signInWithIdp", &body).await?;
        Ok(self.establish(account).await)
    }

    async fn sign_out(&self) -> Result<(), CredentialError> {
        let previous = self.session.lock().await.take();
        if let Some(session) = previous {
            tracing::info!(uid = %session.user.uid, "provider sign-out");
            self.hub.signed_out();
        }
        Ok(())
    }

    async fn get_id_token(&self, force_refresh: bool) -> Result<Option<String>, CredentialError> {
        let mut guard = self.session.lock().await;
        let Some(session) = guard.as_mut() else {
            return Ok(None);
        };

        let fresh = self.clock.now() + REFRESH_MARGIN < session.expires_at;
        if force_refresh || !fresh {
            if let Err(e) = self.refresh(session).await {
                if e.code == CredentialCode::TokenExpired || e.code == CredentialCode::UserDisabled {
                    tracing::warn!(code = e.code.as_str(), "provider session revoked; signing out");
                    *guard = None;
                    drop(guard);
                    self.hub.signed_out();
                }
                return Err(e);
            }
        }
        Ok(Some(session.id_token.clone()))
    }

    fn subscribe(&self) -> Subscription {
        self.hub.subscribe()
    }
}

// =============================================================================
// WIRE TYPES
// =============================================================================

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AccountResponse {
    local_id: String,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    display_name: Option<String>,
    id_token: String,
    refresh_token: String,
    #[serde(default)]
    expires_in: Option<String>,
}

#[derive(Deserialize)]
struct RefreshResponse {
    id_token: String,
    refresh_token: String,
    #[serde(default)]
    expires_in: Option<String>,
}

#[derive(Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Deserialize)]
struct ErrorBody {
    message: String,
}

// =============================================================================
// PARSING
// =============================================================================

async fn read_json<T: serde::de::DeserializeOwned>(resp: reqwest::Response) -> Result<T, CredentialError> {
    let status = resp.status();
    let text = resp.text().await.map_err(network_error)?;
    if !status.is_success() {
        return Err(parse_error(&text));
    }
    serde_json::from_str(&text).map_err(|e| CredentialError::with_detail(CredentialCode::Unknown, e.to_string()))
}

fn network_error(e: reqwest::Error) -> CredentialError {
    CredentialError::with_detail(CredentialCode::NetworkFailure, e.to_string())
}

/// Map an identity-toolkit error body to a credential error.
fn parse_error(body: &str) -> CredentialError {
    let Ok(envelope) = serde_json::from_str::<ErrorEnvelope>(body) else {
        return CredentialError::with_detail(CredentialCode::Unknown, body.trim());
    };
    let raw = envelope.error.message;
    // e.g. "WEAK_PASSWORD : Password should be at least 6 characters"
    let key = raw.split(" : ").next().unwrap_or_default().trim();
    CredentialError::with_detail(code_for(key), raw.clone())
}

fn code_for(key: &str) -> CredentialCode {
    match key {
        "EMAIL_EXISTS" => CredentialCode::EmailInUse,
        "WEAK_PASSWORD" => CredentialCode::WeakPassword,
        "INVALID_EMAIL" | "MISSING_EMAIL" => CredentialCode::InvalidEmail,
        "INVALID_PASSWORD" | "MISSING_PASSWORD" => CredentialCode::WrongPassword,
        "EMAIL_NOT_FOUND" | "USER_NOT_FOUND" => CredentialCode::UserNotFound,
        "INVALID_LOGIN_CREDENTIALS" | "INVALID_IDP_RESPONSE" => CredentialCode::InvalidCredential,
        "USER_DISABLED" => CredentialCode::UserDisabled,
        "TOO_MANY_ATTEMPTS_TRY_LATER" => CredentialCode::TooManyRequests,
        "TOKEN_EXPIRED" | "INVALID_REFRESH_TOKEN" | "INVALID_ID_TOKEN" | "CREDENTIAL_TOO_OLD_LOGIN_AGAIN" => {
            CredentialCode::TokenExpired
        }
        _ => CredentialCode::Unknown,
    }
}

fn parse_expires_in(raw: Option<&str>) -> u64 {
    raw.and_then(|v| v.trim().parse::<u64>().ok())
        .unwrap_or(DEFAULT_EXPIRES_IN_SECS)
}

#[cfg(test)]
#[path = "firebase_test.rs"]
mod tests;
