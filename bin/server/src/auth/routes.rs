//! Authentication routes for sign-in, callback, and logout.

use axum::{
    Json,
    extract::{Query, State},
    response::{IntoResponse, Response},
};
use axum_extra::extract::CookieJar;
use bazaar_identity::{
    AuthenticationError, HandshakeState, IdentityClaims, Role, Session, SessionId,
    SessionTokens, SessionUser,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

use super::{
    AppState, OidcError,
    middleware::{OptionalAuth, load_session, session_id},
    removal_cookie,
};
use crate::config::RoutesConfig;
use crate::error::{AuthError, INVALID_GRANT, found};

/// Query parameters for the OIDC callback.
#[derive(Debug, Default, Deserialize)]
pub struct CallbackQuery {
    code: Option<String>,
    state: Option<String>,
    error: Option<String>,
    error_description: Option<String>,
}

/// Where a freshly signed-in user is sent.
///
/// Incomplete profiles go to profile completion, store owners to their
/// business page, everyone else home.
#[must_use]
pub fn post_login_destination(user: &SessionUser, routes: &RoutesConfig) -> String {
    if !user.profile_completed {
        routes.profile_completion(user.id)
    } else if user.role == Role::StoreOwner {
        routes.business.clone()
    } else {
        routes.home.clone()
    }
}

/// Checks a callback against the handshake it consumed.
///
/// Returns the handshake and the authorization code to redeem.
///
/// # Errors
///
/// `HandshakeExpired` if no usable handshake was pending, `ProviderError`
/// if the provider reported one or sent no code, `StateMismatch` if the
/// returned `state` is not the one issued.
pub fn verify_callback(
    query: &CallbackQuery,
    handshake: Option<HandshakeState>,
    ttl: chrono::Duration,
) -> Result<(HandshakeState, &str), AuthenticationError> {
    let Some(handshake) = handshake.filter(|h| h.is_complete() && !h.is_expired(ttl)) else {
        warn!("no pending handshake for callback");
        return Err(AuthenticationError::HandshakeExpired);
    };

    if let Some(code) = query.error.as_deref() {
        warn!(
            error = code,
            description = query.error_description.as_deref().unwrap_or_default(),
            "identity provider reported an error"
        );
        return Err(AuthenticationError::ProviderError {
            code: code.to_string(),
        });
    }

    if query.state.as_deref() != Some(handshake.state.as_str()) {
        warn!("callback state does not match the pending handshake");
        return Err(AuthenticationError::StateMismatch);
    }

    let Some(code) = query.code.as_deref().filter(|c| !c.is_empty()) else {
        warn!("callback without an authorization code");
        return Err(AuthenticationError::ProviderError {
            code: "invalid_request".to_string(),
        });
    };
    Ok((handshake, code))
}

/// Initiates the OIDC login flow by redirecting to the identity provider.
#[instrument(skip_all)]
pub async fn login(State(state): State<Arc<AppState>>, jar: CookieJar) -> Response {
    match load_session(&state, &jar).await {
        Ok(Some(_)) => return found(&state.routes.home),
        Ok(None) => {}
        Err(e) => return AuthError::internal(e).into_response(),
    }

    let browser_session = session_id(&jar).unwrap_or_else(SessionId::generate);
    let (auth_url, handshake) = state.provider.authorization_url();

    if let Err(e) = state
        .sessions
        .put_handshake(&browser_session, &handshake)
        .await
    {
        return AuthError::internal(e).into_response();
    }

    debug!("redirecting to identity provider");
    let cookie = state.session_cookie(&browser_session, state.session_config.handshake_ttl());
    (jar.add(cookie), found(&auth_url)).into_response()
}

/// Handles the OIDC callback after the user authenticates with the identity provider.
#[instrument(skip_all)]
pub async fn callback(
    State(state): State<Arc<AppState>>,
    Query(query): Query<CallbackQuery>,
    jar: CookieJar,
) -> Result<Response, AuthError> {
    let routes = &state.routes;

    let Some(browser_session) = session_id(&jar) else {
        warn!("callback without a session cookie");
        return Err(AuthError::from_authentication(
            &AuthenticationError::HandshakeExpired,
            routes,
        ));
    };

    // Consumed before anything else so a replayed callback never finds it
    let pending = state
        .sessions
        .take_handshake(&browser_session)
        .await
        .map_err(AuthError::internal)?;

    // A replay after sign-in carries the rotated, authenticated cookie
    if state
        .sessions
        .load(&browser_session)
        .await
        .map_err(AuthError::internal)?
        .is_some()
    {
        debug!("callback for an already authenticated session");
        return Ok(found(&routes.home));
    }

    let (handshake, code) =
        verify_callback(&query, pending, state.session_config.handshake_ttl())
            .map_err(|e| AuthError::from_authentication(&e, routes))?;

    let tokens = state
        .provider
        .exchange_code(code, &handshake)
        .await
        .map_err(|e| match e {
            OidcError::InvalidGrant => {
                info!("authorization code expired or already used");
                AuthError::restart(routes, INVALID_GRANT)
            }
            e if e.is_retryable() => AuthError::Unavailable {
                details: e.to_string(),
            },
            e => AuthError::internal(e),
        })?;

    let claims = IdentityClaims::from_payload(&tokens.claims, state.provider.config())
        .map_err(|e| AuthError::from_authentication(&e, routes))?;
    let synced = state
        .sync
        .find_or_create_user(&claims)
        .await
        .map_err(AuthError::internal)?;

    let user = SessionUser::materialize(&claims, &synced.user);
    let destination = post_login_destination(&user, routes);

    // The pre-login id is discarded so a planted cookie never becomes authenticated
    state
        .sessions
        .destroy(&browser_session)
        .await
        .map_err(AuthError::internal)?;
    let session = Session::with_tokens(
        SessionId::generate(),
        user,
        state.session_config.duration(),
        SessionTokens {
            id_token: tokens.id_token,
            access_token: tokens.access_token,
            refresh_token: tokens.refresh_token,
        },
    );
    state
        .sessions
        .save(&session)
        .await
        .map_err(AuthError::internal)?;

    info!(user_id = %session.user().id, path = ?synced.path, "user signed in");

    let cookie = state.session_cookie(session.id(), state.session_config.duration());
    Ok((jar.add(cookie), found(&destination)).into_response())
}

/// Logs out the user by deleting their session, then signs out at the provider.
#[instrument(skip_all)]
pub async fn logout(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
) -> Result<Response, AuthError> {
    if let Some(id) = session_id(&jar) {
        // Awaited before responding so the next request cannot see the session
        state
            .sessions
            .destroy(&id)
            .await
            .map_err(AuthError::internal)?;
        info!("session destroyed");
    }

    Ok((jar.add(removal_cookie()), found(state.provider.logout_url())).into_response())
}

/// What page renderers may know about the current visitor.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionView {
    pub authenticated: bool,
    pub is_admin: bool,
    pub display_name: Option<String>,
    pub role: Option<Role>,
}

impl SessionView {
    fn from_session(session: Option<&Session>) -> Self {
        session.map_or_else(Self::default, |session| {
            let user = session.user();
            Self {
                authenticated: true,
                is_admin: user.is_admin(),
                display_name: Some(user.display_name.clone()),
                role: Some(user.role),
            }
        })
    }
}

/// Returns the redacted view of the current session.
pub async fn session_info(OptionalAuth(session): OptionalAuth) -> Json<SessionView> {
    Json(SessionView::from_session(session.as_ref()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use bazaar_identity::User;

    fn session_user(groups: &[&str]) -> SessionUser {
        let claims =
            IdentityClaims::new("sub-1", "a@x.com").with_groups(groups.iter().copied());
        SessionUser::materialize(&claims, &User::from_claims(&claims))
    }

    #[test]
    fn incomplete_profile_goes_to_completion() {
        let mut user = session_user(&["store_owner"]);
        user.profile_completed = false;

        assert_eq!(
            post_login_destination(&user, &RoutesConfig::default()),
            format!("/users/{}/update?first_time=true", user.id)
        );
    }

    #[test]
    fn store_owner_goes_to_business() {
        let user = session_user(&["store_owner"]);
        assert_eq!(
            post_login_destination(&user, &RoutesConfig::default()),
            "/account/business"
        );
    }

    #[test]
    fn shoppers_and_admins_go_home() {
        let routes = RoutesConfig::default();
        assert_eq!(post_login_destination(&session_user(&[]), &routes), "/");
        assert_eq!(
            post_login_destination(&session_user(&["admin", "store_owner"]), &routes),
            "/"
        );
    }

    #[test]
    fn session_view_for_anonymous() {
        assert_eq!(SessionView::from_session(None), SessionView::default());
    }

    #[test]
    fn session_view_is_redacted() {
        let session = Session::with_tokens(
            SessionId::generate(),
            session_user(&["admin"]),
            chrono::Duration::hours(1),
            SessionTokens {
                id_token: "id-token".into(),
                access_token: "access-token".into(),
                refresh_token: None,
            },
        );

        let view = SessionView::from_session(Some(&session));
        assert!(view.authenticated);
        assert!(view.is_admin);
        assert_eq!(view.role, Some(Role::Admin));

        let json = serde_json::to_string(&view).expect("serialize");
        assert!(!json.contains("access-token"));
        assert!(!json.contains("a@x.com"));
    }

    fn handshake() -> HandshakeState {
        HandshakeState::new("st-1".into(), "nonce-1".into(), "verifier-1".into())
    }

    fn query(code: Option<&str>, state: Option<&str>, error: Option<&str>) -> CallbackQuery {
        CallbackQuery {
            code: code.map(str::to_string),
            state: state.map(str::to_string),
            error: error.map(str::to_string),
            error_description: None,
        }
    }

    fn ttl() -> chrono::Duration {
        chrono::Duration::minutes(10)
    }

    #[test]
    fn matching_callback_yields_code() {
        let q = query(Some("code-1"), Some("st-1"), None);
        let (pending, code) = verify_callback(&q, Some(handshake()), ttl()).expect("valid");
        assert_eq!(code, "code-1");
        assert_eq!(pending.nonce, "nonce-1");
    }

    #[test]
    fn missing_or_stale_handshake_is_expired() {
        let q = query(Some("code-1"), Some("st-1"), None);
        assert_eq!(
            verify_callback(&q, None, ttl()).expect_err("no handshake"),
            AuthenticationError::HandshakeExpired
        );

        let mut stale = handshake();
        stale.created_at -= chrono::Duration::minutes(11);
        assert_eq!(
            verify_callback(&q, Some(stale), ttl()).expect_err("stale"),
            AuthenticationError::HandshakeExpired
        );

        let mut partial = handshake();
        partial.code_verifier.clear();
        assert_eq!(
            verify_callback(&q, Some(partial), ttl()).expect_err("partial"),
            AuthenticationError::HandshakeExpired
        );
    }

    #[test]
    fn provider_error_wins_over_state() {
        let q = query(None, Some("other"), Some("access_denied"));
        assert_eq!(
            verify_callback(&q, Some(handshake()), ttl()).expect_err("provider error"),
            AuthenticationError::ProviderError {
                code: "access_denied".to_string()
            }
        );
    }

    #[test]
    fn foreign_state_is_rejected() {
        for state in [None, Some("st-2")] {
            let q = query(Some("code-1"), state, None);
            assert_eq!(
                verify_callback(&q, Some(handshake()), ttl()).expect_err("mismatch"),
                AuthenticationError::StateMismatch
            );
        }
    }

    #[test]
    fn missing_code_is_invalid_request() {
        for code in [None, Some("")] {
            let q = query(code, Some("st-1"), None);
            assert_eq!(
                verify_callback(&q, Some(handshake()), ttl()).expect_err("no code"),
                AuthenticationError::ProviderError {
                    code: "invalid_request".to_string()
                }
            );
        }
    }
}
