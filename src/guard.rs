//! Route table and the protected-route gate.
//!
//! SYSTEM CONTEXT
//! ==============
//! Hosts resolve a requested path with [`navigate`] and act on the returned
//! [`GuardDecision`]. The decision is a pure function of the session state and
//! the connectivity flag, so every host (CLI, web shell, tests) applies the same
//! redirect rules.
//!
//! DESIGN
//! ======
//! - `Loading` renders only a placeholder and never redirects.
//! - Offline visitors without a session go to login with an offline flag, so the
//!   login view can say "you appear to be offline" instead of "please log in".
//! - Offline visitors with a session keep rendering.
//! - Online visitors without a session go to login with the requested location
//!   attached for the return trip.

use url::form_urlencoded;

use crate::session::SessionState;

pub const LOGIN_PATH: &str = "/login";
/// Where a login with no usable return location lands.
pub const DEFAULT_RETURN_PATH: &str = "/dashboard";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Route {
    Home,
    Login,
    Register,
    Faq,
    Blog,
    Careers,
    Contact,
    Privacy,
    Terms,
    Dashboard,
    Profile,
    Portfolio,
    Templates,
    Setup,
    NotFound,
}

const ROUTES: &[(&str, Route)] = &[
    ("/", Route::Home),
    ("/login", Route::Login),
    ("/register", Route::Register),
    ("/faq", Route::Faq),
    ("/blog", Route::Blog),
    ("/careers", Route::Careers),
    ("/contact", Route::Contact),
    ("/privacy", Route::Privacy),
    ("/terms", Route::Terms),
    ("/dashboard", Route::Dashboard),
    ("/profile", Route::Profile),
    ("/portfolio", Route::Portfolio),
    ("/templates", Route::Templates),
    ("/setup", Route::Setup),
];

impl Route {
    /// Resolve a location (query and fragment ignored). Protected routes and
    /// the blog also own their sub-paths.
    #[must_use]
    pub fn from_path(path: &str) -> Self {
        let path = strip_query(path);
        let trimmed = path.trim_end_matches('/');
        let path = if trimmed.is_empty() { "/" } else { trimmed };

        for &(prefix, route) in ROUTES {
            if path == prefix {
                return route;
            }
            let owns_children = route.is_protected() || route == Self::Blog;
            if owns_children && path.strip_prefix(prefix).is_some_and(|rest| rest.starts_with('/')) {
                return route;
            }
        }
        Self::NotFound
    }

    #[must_use]
    pub fn is_protected(self) -> bool {
        matches!(self, Self::Dashboard | Self::Profile | Self::Portfolio | Self::Templates | Self::Setup)
    }

    /// Canonical path, or `None` for [`Route::NotFound`].
    #[must_use]
    pub fn path(self) -> Option<&'static str> {
        ROUTES.iter().find(|(_, r)| *r == self).map(|(p, _)| *p)
    }
}

// =============================================================================
// DECISIONS
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuardDecision {
    /// Session still resolving: show a spinner and nothing else.
    Placeholder,
    Render,
    Redirect(LoginRedirect),
}

/// A redirect to the login view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginRedirect {
    /// Originally requested location, for returning after login.
    pub from: Option<String>,
    /// Redirected because the host is offline, not because of a missing session.
    pub offline: bool,
}

impl LoginRedirect {
    /// `/login?from=<encoded>` or `/login?offline=true`.
    #[must_use]
    pub fn to_path(&self) -> String {
        let mut query = form_urlencoded::Serializer::new(String::new());
        if self.offline {
            query.append_pair("offline", "true");
        }
        if let Some(from) = &self.from {
            query.append_pair("from", from);
        }
        let query = query.finish();
        if query.is_empty() { LOGIN_PATH.to_owned() } else { format!("{LOGIN_PATH}?{query}") }
    }

    /// Parse a login location produced by [`LoginRedirect::to_path`].
    #[must_use]
    pub fn parse(location: &str) -> Option<Self> {
        let (path, query) = location.split_once('?').unwrap_or((location, ""));
        if path.trim_end_matches('/') != LOGIN_PATH {
            return None;
        }
        let mut redirect = Self { from: None, offline: false };
        for (key, value) in form_urlencoded::parse(query.as_bytes()) {
            match key.as_ref() {
                "from" => redirect.from = Some(value.into_owned()),
                "offline" => redirect.offline = value == "true",
                _ => {}
            }
        }
        Some(redirect)
    }

    /// Where to go after a successful login. Only same-origin absolute paths
    /// are honored; anything else falls back to [`DEFAULT_RETURN_PATH`].
    #[must_use]
    pub fn return_path(&self) -> &str {
        match self.from.as_deref() {
            Some(from) if is_local_path(from) && Route::from_path(from) != Route::Login => from,
            _ => DEFAULT_RETURN_PATH,
        }
    }
}

/// Gate a protected view.
#[must_use]
pub fn guard(state: &SessionState, online: bool, requested_path: &str) -> GuardDecision {
    match state {
        SessionState::Loading => GuardDecision::Placeholder,
        SessionState::Authenticated(_) => GuardDecision::Render,
        SessionState::Anonymous if !online => GuardDecision::Redirect(LoginRedirect { from: None, offline: true }),
        SessionState::Anonymous => GuardDecision::Redirect(LoginRedirect {
            from: Some(requested_path.to_owned()),
            offline: false,
        }),
    }
}

/// Resolve `path` and apply [`guard`] if it is protected.
#[must_use]
pub fn navigate(path: &str, state: &SessionState, online: bool) -> (Route, GuardDecision) {
    let route = Route::from_path(path);
    if route.is_protected() {
        (route, guard(state, online, path))
    } else {
        (route, GuardDecision::Render)
    }
}

fn strip_query(path: &str) -> &str {
    let end = path.find(['?', '#']).unwrap_or(path.len());
    &path[..end]
}

fn is_local_path(path: &str) -> bool {
    path.starts_with('/') && !path.starts_with("//") && !path.contains('\\') && !path.contains("://")
}

#[cfg(test)]
#[path = "guard_test.rs"]
mod tests;
