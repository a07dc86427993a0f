//! Authentication module for the bazaar server.
//!
//! This module provides:
//! - OIDC authentication with the external identity provider
//! - Server-held sessions keyed by an opaque browser cookie
//! - Authentication extractors and guard middleware for Axum routes
//!
//! # Authorization Model
//!
//! The identity provider's groups decide the user's role on every login.
//! The role is embedded in the session, so guards evaluate it without
//! touching the database; a group change takes effect on the next login.

pub mod db;
pub mod middleware;
pub mod oidc;
pub mod routes;

use axum_extra::extract::cookie::{Cookie, SameSite};
use bazaar_identity::{CartStore, IdentitySync, SessionId, SessionStore};
use std::sync::Arc;
use time::Duration as TimeDuration;

use crate::config::{RoutesConfig, SessionConfig};

pub use middleware::{GuardState, OptionalAuth, RequireAdmin, RequireAuth, enforce_guards};
pub use oidc::{IdentityProvider, OidcClient, OidcError, TokenSet};
pub use routes::{callback, login, logout, session_info};

/// Session cookie name.
pub const SESSION_COOKIE: &str = "bazaar_session";

/// Shared application state.
pub struct AppState {
    /// The identity provider, discovered at boot.
    pub provider: Arc<dyn IdentityProvider>,
    /// Handshake and session storage.
    pub sessions: Arc<dyn SessionStore>,
    /// Cart storage.
    pub carts: Arc<dyn CartStore>,
    /// Account reconciliation.
    pub sync: IdentitySync,
    /// Session configuration.
    pub session_config: SessionConfig,
    /// Browser destinations.
    pub routes: RoutesConfig,
}

impl AppState {
    /// Creates a new application state.
    pub fn new(
        provider: Arc<dyn IdentityProvider>,
        sessions: Arc<dyn SessionStore>,
        carts: Arc<dyn CartStore>,
        sync: IdentitySync,
        session_config: SessionConfig,
        routes: RoutesConfig,
    ) -> Self {
        Self {
            provider,
            sessions,
            carts,
            sync,
            session_config,
            routes,
        }
    }

    /// Builds the session cookie for `id`, living as long as `max_age`.
    pub fn session_cookie(&self, id: &SessionId, max_age: chrono::Duration) -> Cookie<'static> {
        Cookie::build((SESSION_COOKIE, id.as_str().to_string()))
            .path("/")
            .http_only(true)
            .secure(self.session_config.secure_cookies)
            .same_site(SameSite::Lax)
            .max_age(TimeDuration::seconds(max_age.num_seconds()))
            .build()
    }
}

/// Builds a cookie that clears the session cookie.
pub fn removal_cookie() -> Cookie<'static> {
    Cookie::build((SESSION_COOKIE, ""))
        .path("/")
        .max_age(TimeDuration::ZERO)
        .build()
}
