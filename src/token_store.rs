//! Holder for the single backend bearer token.
//!
//! SYSTEM CONTEXT
//! ==============
//! Read by the HTTP client on every request; written only by the session
//! manager (and the HTTP client's 401 handling, which removes). There is no
//! validation or expiry tracking here: expiry is discovered when the backend
//! answers 401.
//!
//! ERROR HANDLING
//! ==============
//! Storage failures are logged and swallowed. A token that cannot be read is
//! the same as no token, which fails closed.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

/// Key-value wrapper holding at most one bearer token.
pub trait TokenStore: Send + Sync {
    fn store(&self, token: &str);
    fn get(&self) -> Option<String>;
    fn remove(&self);
}

// =============================================================================
// MEMORY
// =============================================================================

#[derive(Debug, Default)]
pub struct MemoryTokenStore {
    token: Mutex<Option<String>>,
}

impl MemoryTokenStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_token(token: impl Into<String>) -> Self {
        Self { token: Mutex::new(Some(token.into())) }
    }
}

impl TokenStore for MemoryTokenStore {
    fn store(&self, token: &str) {
        *self.token.lock().unwrap_or_else(PoisonError::into_inner) = Some(token.to_owned());
    }

    fn get(&self) -> Option<String> {
        self.token
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn remove(&self) {
        *self.token.lock().unwrap_or_else(PoisonError::into_inner) = None;
    }
}

// =============================================================================
// FILE
// =============================================================================

/// Persists the token in a single file, the per-user equivalent of origin-scoped storage.
#[derive(Debug, Clone)]
pub struct FileTokenStore {
    path: PathBuf,
}

impl FileTokenStore {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl TokenStore for FileTokenStore {
    fn store(&self, token: &str) {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            if let Err(e) = fs::create_dir_all(parent) {
                tracing::warn!(error = %e, path = %parent.display(), "token directory create failed");
                return;
            }
        }
        if let Err(e) = fs::write(&self.path, token) {
            tracing::warn!(error = %e, path = %self.path.display(), "token write failed");
        }
    }

    fn get(&self) -> Option<String> {
        match fs::read_to_string(&self.path) {
            Ok(raw) => {
                let token = raw.trim();
                (!token.is_empty()).then(|| token.to_owned())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => None,
            Err(e) => {
                tracing::warn!(error = %e, path = %self.path.display(), "token read failed");
                None
            }
        }
    }

    fn remove(&self) {
        match fs::remove_file(&self.path) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => tracing::warn!(error = %e, path = %self.path.display(), "token remove failed"),
        }
    }
}

#[cfg(test)]
#[path = "token_store_test.rs"]
mod tests;
