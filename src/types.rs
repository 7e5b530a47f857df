//! Backend wire records.
//!
//! Field names follow the backend's JSON exactly; these structs are the
//! contract with the REST API and nothing else.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Backend user identifier. The API has served both integer and string ids.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum UserId {
    Int(i64),
    Text(String),
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(id) => write!(f, "{id}"),
            Self::Text(id) => f.write_str(id),
        }
    }
}

/// The signed-in user as returned by `GET /auth/me`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CurrentUser {
    pub id: UserId,
    pub username: String,
    pub email: String,
    #[serde(default)]
    pub full_name: Option<String>,
}

/// Bearer token issued by the backend.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendToken {
    pub access_token: String,
    #[serde(default = "default_token_type")]
    pub token_type: String,
}

fn default_token_type() -> String {
    "bearer".to_owned()
}

impl fmt::Debug for BackendToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackendToken")
            .field("access_token", &"<redacted>")
            .field("token_type", &self.token_type)
            .finish()
    }
}

/// `POST /auth/register` body.
#[derive(Debug, Clone, Serialize)]
pub struct RegisterRequest {
    pub username: String,
    pub email: String,
    pub password: String,
    pub full_name: String,
}

/// `POST /auth/register` response.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RegisterResponse {
    pub message: String,
}

/// `POST /auth/firebase/register` body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FirebaseRegisterRequest {
    pub username: String,
    pub email: String,
    pub full_name: String,
}

/// Form fields for account creation through the identity provider.
#[derive(Debug, Clone)]
pub struct RegistrationData {
    pub email: String,
    pub password: String,
    pub username: String,
    pub full_name: String,
}

/// `PATCH /users/me` body. Unset fields are left unchanged.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct UserUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub full_name: Option<String>,
}

impl UserUpdate {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.username.is_none() && self.email.is_none() && self.full_name.is_none()
    }
}

#[derive(Debug, Clone, Serialize)]
pub(crate) struct IdTokenRequest<'a> {
    pub id_token: &'a str,
}

#[derive(Debug, Clone, Serialize)]
pub(crate) struct PasswordForm<'a> {
    pub username: &'a str,
    pub password: &'a str,
}

#[cfg(test)]
#[path = "types_test.rs"]
mod tests;
