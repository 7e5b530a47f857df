//! Authentication and session lifecycle for the YARBA client.
//!
//! An identity provider signs users in; its short-lived ID token is exchanged
//! for a backend bearer token; the bearer token rides on every backend call;
//! and a session manager keeps the current user in step with all of that.
//! Hosts (the `yarba` CLI, a web shell, tests) construct the pieces, start a
//! [`session::SessionManager`], and gate protected views through
//! [`guard::navigate`].
//!
//! ## Module layout
//!
//! | Module | Role |
//! |--------|------|
//! | [`config`] | Environment-driven settings |
//! | [`types`] | Backend wire records |
//! | [`error`] | Credential, transport, exchange and session errors |
//! | [`clock`] | Injectable monotonic clock |
//! | [`token_store`] | The single persisted bearer token |
//! | [`connectivity`] | Online/offline flag |
//! | [`http`] | Shared request pipeline with 401 handling |
//! | [`api`] | Typed backend endpoints |
//! | [`identity`] | Identity-provider trait and transition subscription |
//! | [`firebase`] | Identity provider over the identity-toolkit REST API |
//! | [`exchange`] | ID-token to backend-token exchange with cool-down |
//! | [`session`] | Session manager and its state |
//! | [`guard`] | Route table and protected-route gate |

pub mod api;
pub mod clock;
pub mod config;
pub mod connectivity;
pub mod error;
pub mod exchange;
pub mod firebase;
pub mod guard;
pub mod http;
pub mod identity;
pub mod session;
pub mod token_store;
pub mod types;

#[cfg(test)]
mod test_support;

pub use error::{CredentialCode, CredentialError, SessionError, TokenExchangeError, TransportError};
pub use session::{SessionHandle, SessionManager, SessionState};
