//! Centralized server configuration.
//!
//! This module provides strongly-typed configuration for the server,
//! loaded via the `config` crate from environment variables.
//!
//! See [`OidcConfig`](bazaar_identity::OidcConfig) for identity provider
//! configuration.

use bazaar_core::UserId;
use bazaar_identity::OidcConfig;
use serde::Deserialize;

/// Server configuration composed from library configs.
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    /// PostgreSQL database connection URL.
    pub database_url: String,

    /// Socket address to listen on.
    #[serde(default = "default_bind_address")]
    pub bind_address: String,

    /// Session configuration.
    #[serde(default)]
    pub session: SessionConfig,

    /// Post-login and sign-in destinations.
    #[serde(default)]
    pub routes: RoutesConfig,

    /// OIDC authentication configuration.
    pub oidc: OidcConfig,
}

fn default_bind_address() -> String {
    "127.0.0.1:3000".to_string()
}

/// Session-related configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
    /// Authenticated session lifetime in minutes.
    #[serde(default = "default_session_duration_minutes")]
    pub duration_minutes: i64,

    /// How long a pending login handshake stays valid, in minutes.
    #[serde(default = "default_handshake_ttl_minutes")]
    pub handshake_ttl_minutes: i64,

    /// Interval between session cleanup runs, in seconds.
    #[serde(default = "default_cleanup_interval_seconds")]
    pub cleanup_interval_seconds: u64,

    /// Whether to set the Secure flag on cookies (requires HTTPS).
    /// Defaults to true for production safety; set to false for local HTTP development.
    #[serde(default = "default_secure_cookies")]
    pub secure_cookies: bool,
}

fn default_session_duration_minutes() -> i64 {
    24 * 60
}

fn default_handshake_ttl_minutes() -> i64 {
    10
}

fn default_cleanup_interval_seconds() -> u64 {
    300
}

fn default_secure_cookies() -> bool {
    true
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            duration_minutes: default_session_duration_minutes(),
            handshake_ttl_minutes: default_handshake_ttl_minutes(),
            cleanup_interval_seconds: default_cleanup_interval_seconds(),
            secure_cookies: default_secure_cookies(),
        }
    }
}

impl SessionConfig {
    /// Returns the authenticated session lifetime.
    #[must_use]
    pub fn duration(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.duration_minutes)
    }

    /// Returns the handshake lifetime.
    #[must_use]
    pub fn handshake_ttl(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.handshake_ttl_minutes)
    }
}

/// Browser destinations used by the sign-in flow and guards.
#[derive(Debug, Clone, Deserialize)]
pub struct RoutesConfig {
    /// Home page.
    #[serde(default = "default_home")]
    pub home: String,

    /// Store owners land here after signing in.
    #[serde(default = "default_business")]
    pub business: String,

    /// The route that starts a sign-in.
    #[serde(default = "default_signin")]
    pub signin: String,
}

fn default_home() -> String {
    "/".to_string()
}

fn default_business() -> String {
    "/account/business".to_string()
}

fn default_signin() -> String {
    "/signin".to_string()
}

impl Default for RoutesConfig {
    fn default() -> Self {
        Self {
            home: default_home(),
            business: default_business(),
            signin: default_signin(),
        }
    }
}

impl RoutesConfig {
    /// Returns the profile completion page for a first-time user.
    #[must_use]
    pub fn profile_completion(&self, user_id: UserId) -> String {
        format!("/users/{user_id}/update?first_time=true")
    }

    /// Returns the sign-in route carrying an error reason.
    #[must_use]
    pub fn signin_error(&self, reason: &str) -> String {
        format!("{}?error={reason}", self.signin)
    }
}

impl ServerConfig {
    /// Loads configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if required configuration is missing or invalid.
    pub fn from_env() -> Result<Self, config::ConfigError> {
        config::Config::builder()
            .add_source(
                config::Environment::default()
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()
    }
}
