//! Authentication middleware and extractors for Axum.

use axum::{
    extract::{FromRef, FromRequestParts, Query, Request, State},
    http::request::Parts,
    middleware::Next,
    response::{IntoResponse, Response},
};
use axum_extra::extract::CookieJar;
use bazaar_identity::{
    AuthorizationError, GuardChain, GuardContext, Role, Session, SessionId, StoreError, guard,
};
use rootcause::prelude::Report;
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, error};

use super::{AppState, SESSION_COOKIE};
use crate::error::GuardRejection;

/// Returns the browser's session id, if it sent one.
pub fn session_id(jar: &CookieJar) -> Option<SessionId> {
    jar.get(SESSION_COOKIE)
        .map(|cookie| cookie.value())
        .filter(|value| !value.is_empty())
        .map(SessionId::from)
}

/// Loads the authenticated session for the browser, if any.
///
/// # Errors
///
/// Returns an error if the session store fails.
pub async fn load_session(
    state: &AppState,
    jar: &CookieJar,
) -> Result<Option<Session>, Report<StoreError>> {
    match session_id(jar) {
        Some(id) => state.sessions.load(&id).await,
        None => Ok(None),
    }
}

/// Extractor for requiring an authenticated user.
///
/// If the user is not authenticated, they will be redirected to sign-in.
pub struct RequireAuth(pub Session);

impl<S> FromRequestParts<S> for RequireAuth
where
    Arc<AppState>: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = GuardRejection;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let app_state = Arc::<AppState>::from_ref(state);
        let jar = CookieJar::from_headers(&parts.headers);

        let session = load_session(&app_state, &jar).await.map_err(|e| {
            error!(error = %e, "failed to load session");
            GuardRejection::Internal
        })?;

        session.map(RequireAuth).ok_or_else(|| {
            GuardRejection::from_authorization(
                &AuthorizationError::NotAuthenticated,
                &app_state.routes,
            )
        })
    }
}

/// Extractor for optionally getting the authenticated session.
///
/// Returns None if the user is not authenticated or the session cannot be read.
pub struct OptionalAuth(pub Option<Session>);

impl<S> FromRequestParts<S> for OptionalAuth
where
    Arc<AppState>: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        match RequireAuth::from_request_parts(parts, state).await {
            Ok(RequireAuth(session)) => Ok(OptionalAuth(Some(session))),
            Err(_) => Ok(OptionalAuth(None)),
        }
    }
}

/// Extractor for requiring an authenticated admin user.
pub struct RequireAdmin(pub Session);

impl<S> FromRequestParts<S> for RequireAdmin
where
    Arc<AppState>: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = GuardRejection;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let RequireAuth(session) = RequireAuth::from_request_parts(parts, state).await?;

        if let Err(e) = guard::require_role(Some(session.user()), Role::Admin) {
            let app_state = Arc::<AppState>::from_ref(state);
            return Err(GuardRejection::from_authorization(&e, &app_state.routes));
        }

        Ok(RequireAdmin(session))
    }
}

/// State for [`enforce_guards`]: the application plus the chain to evaluate.
#[derive(Clone)]
pub struct GuardState {
    app: Arc<AppState>,
    chain: Arc<GuardChain>,
}

impl GuardState {
    /// Creates guard state evaluating `chain`.
    pub fn new(app: Arc<AppState>, chain: GuardChain) -> Self {
        Self {
            app,
            chain: Arc::new(chain),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct FirstTimeParam {
    first_time: Option<String>,
}

/// Middleware running a [`GuardChain`] before the wrapped routes.
///
/// Install with `axum::middleware::from_fn_with_state(GuardState::new(..), enforce_guards)`.
pub async fn enforce_guards(
    State(guards): State<GuardState>,
    jar: CookieJar,
    request: Request,
    next: Next,
) -> Response {
    let session = match load_session(&guards.app, &jar).await {
        Ok(session) => session,
        Err(e) => {
            error!(error = %e, "failed to load session");
            return GuardRejection::Internal.into_response();
        }
    };

    let first_time = Query::<FirstTimeParam>::try_from_uri(request.uri())
        .map(|Query(param)| param.first_time.as_deref() == Some("true"))
        .unwrap_or(false);

    let ctx = GuardContext::new(session.as_ref().map(Session::user)).first_time(first_time);
    if let Err(e) = guards.chain.check(&ctx) {
        debug!(path = %request.uri().path(), error = %e, "guard rejected request");
        return GuardRejection::from_authorization(&e, &guards.app.routes).into_response();
    }

    next.run(request).await
}
