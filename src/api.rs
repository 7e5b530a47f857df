//! Typed backend endpoints.
//!
//! Paths are fixed by the backend and must match bit-for-bit.

use crate::error::TransportError;
use crate::http::HttpClient;
use crate::types::{
    BackendToken, CurrentUser, FirebaseRegisterRequest, IdTokenRequest, PasswordForm, RegisterRequest,
    RegisterResponse, UserUpdate,
};

pub const REGISTER_PATH: &str = "/auth/register";
pub const LOGIN_PATH: &str = "/auth/login";
pub const FIREBASE_LOGIN_PATH: &str = "/auth/firebase/login";
pub const FIREBASE_REGISTER_PATH: &str = "/auth/firebase/register";
pub const FIREBASE_VERIFY_PATH: &str = "/auth/firebase/verify-token";
pub const ME_PATH: &str = "/auth/me";
pub const USERS_ME_PATH: &str = "/users/me";

#[derive(Clone)]
pub struct BackendApi {
    http: HttpClient,
}

impl BackendApi {
    #[must_use]
    pub fn new(http: HttpClient) -> Self {
        Self { http }
    }

    #[must_use]
    pub fn http(&self) -> &HttpClient {
        &self.http
    }

    /// `POST /auth/register`
    ///
    /// # Errors
    ///
    /// Propagates the pipeline's [`TransportError`].
    pub async fn register(&self, req: &RegisterRequest) -> Result<RegisterResponse, TransportError> {
        self.http.post_json(REGISTER_PATH, req).await
    }

    /// `POST /auth/login`, form-encoded `username`/`password`.
    ///
    /// # Errors
    ///
    /// Propagates the pipeline's [`TransportError`].
    pub async fn login(&self, username: &str, password: &str) -> Result<BackendToken, TransportError> {
        self.http
            .post_form(LOGIN_PATH, &PasswordForm { username, password })
            .await
    }

    /// `POST /auth/firebase/login`: swap a provider ID token for a backend token.
    ///
    /// # Errors
    ///
    /// Propagates the pipeline's [`TransportError`].
    pub async fn firebase_login(&self, id_token: &str) -> Result<BackendToken, TransportError> {
        self.http
            .post_json(FIREBASE_LOGIN_PATH, &IdTokenRequest { id_token })
            .await
    }

    /// `POST /auth/firebase/register`. The response body is not part of the contract.
    ///
    /// # Errors
    ///
    /// Propagates the pipeline's [`TransportError`].
    pub async fn firebase_register(&self, req: &FirebaseRegisterRequest) -> Result<serde_json::Value, TransportError> {
        self.http.post_json(FIREBASE_REGISTER_PATH, req).await
    }

    /// `POST /auth/firebase/verify-token`: provider claims, for debugging only.
    ///
    /// # Errors
    ///
    /// Propagates the pipeline's [`TransportError`].
    pub async fn verify_firebase_token(&self, id_token: &str) -> Result<serde_json::Value, TransportError> {
        self.http
            .post_json(FIREBASE_VERIFY_PATH, &IdTokenRequest { id_token })
            .await
    }

    /// `GET /auth/me`
    ///
    /// # Errors
    ///
    /// Propagates the pipeline's [`TransportError`].
    pub async fn me(&self) -> Result<CurrentUser, TransportError> {
        self.http.get(ME_PATH).await
    }

    /// `PATCH /users/me`
    ///
    /// # Errors
    ///
    /// Propagates the pipeline's [`TransportError`].
    pub async fn update_me(&self, update: &UserUpdate) -> Result<CurrentUser, TransportError> {
        self.http.patch_json(USERS_ME_PATH, update).await
    }
}

#[cfg(test)]
#[path = "api_test.rs"]
mod tests;
