//! HTTP-facing error types.
//!
//! Internal details (claims, tokens, store errors) are logged where the
//! error is created and never rendered; the browser only ever sees a
//! redirect carrying a reason code or a generic status body.

use axum::{
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};
use bazaar_identity::{AuthenticationError, AuthorizationError};
use std::fmt;

use crate::config::RoutesConfig;

/// Sign-in failure reason for a missing, expired or replayed handshake.
pub const SESSION_EXPIRED: &str = "session_expired";

/// Sign-in failure reason for an expired or already redeemed authorization code.
pub const INVALID_GRANT: &str = "invalid_grant";

/// Fallback reason when the provider's error code is unusable.
pub const IDP_ERROR: &str = "idp_error";

/// Redirects with `302 Found`.
pub fn found(location: &str) -> Response {
    (StatusCode::FOUND, [(header::LOCATION, location.to_string())]).into_response()
}

/// Errors from the sign-in flow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    /// The login must be restarted; the browser is sent to sign-in with a reason.
    Restart { location: String },
    /// The provider did not answer in time; retrying later may succeed.
    Unavailable { details: String },
    /// Anything else.
    Internal { details: String },
}

impl AuthError {
    /// Sends the browser back to sign-in with `reason`.
    #[must_use]
    pub fn restart(routes: &RoutesConfig, reason: &str) -> Self {
        Self::Restart {
            location: routes.signin_error(reason),
        }
    }

    /// Sends the browser back to sign-in with a provider-reported error code.
    ///
    /// The code is echoed into a URL, so anything outside `[A-Za-z0-9_.-]`
    /// replaces it with a generic reason.
    #[must_use]
    pub fn provider(routes: &RoutesConfig, code: &str) -> Self {
        let valid = !code.is_empty()
            && code
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'));
        Self::restart(routes, if valid { code } else { IDP_ERROR })
    }

    pub fn internal(details: impl fmt::Display) -> Self {
        Self::Internal {
            details: details.to_string(),
        }
    }

    /// Maps a failed callback onto its HTTP treatment.
    #[must_use]
    pub fn from_authentication(err: &AuthenticationError, routes: &RoutesConfig) -> Self {
        match err {
            AuthenticationError::HandshakeExpired | AuthenticationError::StateMismatch => {
                Self::restart(routes, SESSION_EXPIRED)
            }
            AuthenticationError::ProviderError { code } => Self::provider(routes, code),
            AuthenticationError::MissingClaim { .. } => Self::internal(err),
        }
    }
}

impl fmt::Display for AuthError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Restart { location } => write!(f, "sign-in must restart: {location}"),
            Self::Unavailable { details } => write!(f, "identity provider unavailable: {details}"),
            Self::Internal { details } => write!(f, "sign-in failed: {details}"),
        }
    }
}

impl std::error::Error for AuthError {}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        match self {
            Self::Restart { location } => found(&location),
            Self::Unavailable { details } => {
                tracing::warn!(error = %details, "identity provider unavailable");
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    "Sign-in is temporarily unavailable, please try again",
                )
                    .into_response()
            }
            Self::Internal { details } => {
                tracing::error!(error = %details, "sign-in failed");
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error").into_response()
            }
        }
    }
}

/// Rejection produced by access guards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuardRejection {
    /// Not signed in, or profile completion pending.
    Redirect { location: String },
    /// Signed in but lacking the required role or group.
    Forbidden,
    /// The session could not be read.
    Internal,
}

impl GuardRejection {
    /// Maps a guard failure onto its HTTP treatment.
    #[must_use]
    pub fn from_authorization(err: &AuthorizationError, routes: &RoutesConfig) -> Self {
        match err {
            AuthorizationError::NotAuthenticated
            | AuthorizationError::ProfileIncomplete { user_id: None } => Self::Redirect {
                location: routes.signin.clone(),
            },
            AuthorizationError::ProfileIncomplete {
                user_id: Some(user_id),
            } => Self::Redirect {
                location: routes.profile_completion(*user_id),
            },
            AuthorizationError::RoleRequired { .. } | AuthorizationError::GroupRequired { .. } => {
                Self::Forbidden
            }
        }
    }
}

impl IntoResponse for GuardRejection {
    fn into_response(self) -> Response {
        match self {
            Self::Redirect { location } => found(&location),
            Self::Forbidden => (StatusCode::FORBIDDEN, "Forbidden").into_response(),
            Self::Internal => {
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error").into_response()
            }
        }
    }
}
