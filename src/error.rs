//! Error taxonomy for the session slice.
//!
//! ERROR HANDLING
//! ==============
//! Credential and exchange errors propagate to whichever caller started the
//! action so a form can show them inline. Transport 401s are handled centrally
//! by the HTTP client and surface to call sites only as
//! [`TransportError::Unauthorized`] after the session has already been torn down.

// =============================================================================
// CREDENTIAL ERRORS
// =============================================================================

/// Provider-level failure reason.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CredentialCode {
    EmailInUse,
    WeakPassword,
    InvalidEmail,
    WrongPassword,
    UserNotFound,
    InvalidCredential,
    UserDisabled,
    TooManyRequests,
    PopupClosed,
    PopupBlocked,
    CancelledPopup,
    NetworkFailure,
    TokenExpired,
    Unknown,
}

impl CredentialCode {
    /// Human-readable message shown inline on the form.
    #[must_use]
    pub fn message(self) -> &'static str {
        match self {
            Self::EmailInUse => "An account with this email already exists.",
            Self::WeakPassword => "Password should be at least 6 characters.",
            Self::InvalidEmail => "Please enter a valid email address.",
            Self::WrongPassword => "Incorrect password. Please try again or reset your password.",
            Self::UserNotFound => "No account found with this email. Please sign up first.",
            Self::InvalidCredential => "Invalid email or password.",
            Self::UserDisabled => "This account has been disabled. Please contact support.",
            Self::TooManyRequests => "Too many failed attempts. Please try again later.",
            Self::PopupClosed => "Sign-in popup was closed before completing.",
            Self::PopupBlocked => "Sign-in popup was blocked by the browser. Please allow popups and try again.",
            Self::CancelledPopup => "Sign-in was cancelled.",
            Self::NetworkFailure => "Network error. Please check your connection and try again.",
            Self::TokenExpired => "Your sign-in has expired. Please sign in again.",
            Self::Unknown => "Authentication failed. Please try again.",
        }
    }

    /// Stable machine-readable identifier, in the provider's `auth/...` namespace.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::EmailInUse => "auth/email-already-in-use",
            Self::WeakPassword => "auth/weak-password",
            Self::InvalidEmail => "auth/invalid-email",
            Self::WrongPassword => "auth/wrong-password",
            Self::UserNotFound => "auth/user-not-found",
            Self::InvalidCredential => "auth/invalid-credential",
            Self::UserDisabled => "auth/user-disabled",
            Self::TooManyRequests => "auth/too-many-requests",
            Self::PopupClosed => "auth/popup-closed-by-user",
            Self::PopupBlocked => "auth/popup-blocked",
            Self::CancelledPopup => "auth/cancelled-popup-request",
            Self::NetworkFailure => "auth/network-request-failed",
            Self::TokenExpired => "auth/user-token-expired",
            Self::Unknown => "auth/unknown",
        }
    }
}

/// User-facing failure caused by bad input or provider policy.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{}", .code.message())]
pub struct CredentialError {
    pub code: CredentialCode,
    /// Raw provider detail, kept for logs. Never shown to the user.
    pub detail: Option<String>,
}

impl CredentialError {
    #[must_use]
    pub fn new(code: CredentialCode) -> Self {
        Self { code, detail: None }
    }

    #[must_use]
    pub fn with_detail(code: CredentialCode, detail: impl Into<String>) -> Self {
        Self { code, detail: Some(detail.into()) }
    }

    #[must_use]
    pub fn message(&self) -> &'static str {
        self.code.message()
    }
}

// =============================================================================
// TRANSPORT ERRORS
// =============================================================================

/// Failures from the shared backend request pipeline.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The backend could not be reached (connect failure or timeout).
    #[error("backend unreachable: {0}")]
    Network(String),

    /// The backend rejected the bearer token. The session is already cleared.
    #[error("unauthorized: {message}")]
    Unauthorized { message: String },

    #[error("not found: {path}")]
    NotFound { path: String },

    /// Any other non-success status.
    #[error("backend returned {status}: {message}")]
    Status { status: u16, message: String },

    /// A success response whose body did not match the expected shape.
    #[error("response decode failed: {0}")]
    Decode(String),

    #[error("HTTP client build failed: {0}")]
    HttpClientBuild(String),
}

impl TransportError {
    #[must_use]
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, Self::Unauthorized { .. })
    }
}

// =============================================================================
// TOKEN EXCHANGE ERRORS
// =============================================================================

/// Failure swapping an identity-provider token for a backend token.
///
/// `Clone` so the cool-down cache can re-raise the same value.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TokenExchangeError {
    #[error("cannot reach the backend to exchange tokens: {0}")]
    Unreachable(String),

    #[error("backend rejected the identity token ({status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("identity token unavailable: {0}")]
    IdToken(#[source] CredentialError),
}

impl From<TransportError> for TokenExchangeError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::Network(msg) | TransportError::HttpClientBuild(msg) => Self::Unreachable(msg),
            TransportError::Unauthorized { message } => Self::Rejected { status: 401, message },
            TransportError::NotFound { path } => Self::Rejected { status: 404, message: format!("{path} not found") },
            TransportError::Status { status, message } => Self::Rejected { status, message },
            TransportError::Decode(msg) => Self::Rejected { status: 200, message: msg },
        }
    }
}

// =============================================================================
// SESSION ERRORS
// =============================================================================

/// Errors surfaced by [`crate::session::SessionManager`] operations.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error(transparent)]
    Credential(#[from] CredentialError),

    #[error(transparent)]
    Exchange(#[from] TokenExchangeError),

    /// Fetching the current user failed; the session was cleared (fail-closed).
    #[error("could not load the current user: {0}")]
    Fetch(#[source] TransportError),

    /// A backend call other than the user fetch failed.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The provider had no signed-in user to exchange a token for, or an
    /// exchange was already running elsewhere.
    #[error("no identity-provider session to exchange")]
    NoProviderSession,

    /// A sign-out landed while this operation was in flight; its result was discarded.
    #[error("superseded by a newer sign-out")]
    Superseded,
}

impl SessionError {
    /// The credential error inside, if this failure is user-correctable input.
    #[must_use]
    pub fn credential(&self) -> Option<&CredentialError> {
        match self {
            Self::Credential(e) | Self::Exchange(TokenExchangeError::IdToken(e)) => Some(e),
            _ => None,
        }
    }
}

#[cfg(test)]
#[path = "error_test.rs"]
mod tests;
