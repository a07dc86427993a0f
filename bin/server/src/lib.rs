//! bazaar web server.
//!
//! Signs marketplace users in through the external OpenID Connect provider,
//! keeps their sessions, and guards the routes that need an account.

pub mod auth;
pub mod cart;
pub mod config;
pub mod error;

use axum::{Router, routing::get};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use auth::AppState;

/// Path the identity provider redirects back to; must match the configured redirect URI.
pub const CALLBACK_PATH: &str = "/auth/callback";

/// Builds the application router.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route(&state.routes.signin, get(auth::login))
        .route(CALLBACK_PATH, get(auth::callback))
        .route("/logout", get(auth::logout))
        .route("/signout", get(auth::logout))
        .route("/api/session", get(auth::session_info))
        .route("/api/cart/count", get(cart::cart_count))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{
        GuardState, IdentityProvider, OidcError, RequireAdmin, TokenSet, enforce_guards,
        routes::SessionView,
    };
    use crate::cart::CartCount;
    use crate::config::{RoutesConfig, SessionConfig};
    use async_trait::async_trait;
    use axum::{
        body::Body,
        http::{Request, StatusCode, header},
        middleware::from_fn_with_state,
        response::Response,
    };
    use bazaar_core::ProductId;
    use bazaar_identity::{
        GuardChain, HandshakeState, IdentityClaims, IdentitySync, MemoryStore, OidcConfig, Role,
        Session, SessionId, SessionStore, SessionUser, User, UserStore,
    };
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tower::ServiceExt;

    const STATE: &str = "state-1";
    const LOGOUT_URL: &str = "https://idp.test/logout?client_id=client-id";

    struct FakeProvider {
        config: OidcConfig,
        outcome: Result<TokenSet, OidcError>,
        exchanges: AtomicUsize,
    }

    impl FakeProvider {
        fn returning(claims: serde_json::Value) -> Self {
            Self::with_outcome(Ok(TokenSet {
                claims,
                id_token: "id-token".to_string(),
                access_token: "access-token".to_string(),
                refresh_token: Some("refresh-token".to_string()),
            }))
        }

        fn failing(error: OidcError) -> Self {
            Self::with_outcome(Err(error))
        }

        fn with_outcome(outcome: Result<TokenSet, OidcError>) -> Self {
            Self {
                config: OidcConfig::builder(
                    "https://idp.test",
                    "client-id",
                    "client-secret",
                    "https://shop.test/auth/callback",
                )
                .build(),
                outcome,
                exchanges: AtomicUsize::new(0),
            }
        }

        fn exchanges(&self) -> usize {
            self.exchanges.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl IdentityProvider for FakeProvider {
        fn authorization_url(&self) -> (String, HandshakeState) {
            (
                format!("https://idp.test/authorize?state={STATE}"),
                HandshakeState::new(STATE.to_string(), "nonce".into(), "verifier".into()),
            )
        }

        async fn exchange_code(
            &self,
            _code: &str,
            _handshake: &HandshakeState,
        ) -> Result<TokenSet, OidcError> {
            self.exchanges.fetch_add(1, Ordering::SeqCst);
            self.outcome.clone()
        }

        fn logout_url(&self) -> &str {
            LOGOUT_URL
        }

        fn config(&self) -> &OidcConfig {
            &self.config
        }
    }

    struct Harness {
        store: Arc<MemoryStore>,
        provider: Arc<FakeProvider>,
        state: Arc<AppState>,
    }

    impl Harness {
        fn new(provider: FakeProvider) -> Self {
            let store = Arc::new(MemoryStore::new());
            let provider = Arc::new(provider);
            let session_config = SessionConfig {
                secure_cookies: false,
                ..SessionConfig::default()
            };
            let state = Arc::new(AppState::new(
                provider.clone(),
                store.clone(),
                store.clone(),
                IdentitySync::new(store.clone(), store.clone()),
                session_config,
                RoutesConfig::default(),
            ));
            Self {
                store,
                provider,
                state,
            }
        }

        async fn get(&self, uri: &str, cookie: Option<&str>) -> Response {
            send(router(self.state.clone()), uri, cookie).await
        }

        /// Runs initiate and callback, returning the authenticated cookie value.
        async fn sign_in(&self) -> String {
            let pre_login = session_cookie(&self.get("/signin", None).await).expect("cookie");
            let response = self
                .get(
                    &format!("/auth/callback?code=abc&state={STATE}"),
                    Some(&pre_login),
                )
                .await;
            assert_eq!(response.status(), StatusCode::FOUND);
            session_cookie(&response).expect("rotated cookie")
        }

        async fn session(&self, cookie: &str) -> Option<Session> {
            self.store
                .load(&SessionId::from(cookie))
                .await
                .expect("load")
        }
    }

    async fn send(app: Router, uri: &str, cookie: Option<&str>) -> Response {
        let mut request = Request::builder().uri(uri);
        if let Some(value) = cookie {
            request = request.header(header::COOKIE, format!("bazaar_session={value}"));
        }
        app.oneshot(request.body(Body::empty()).expect("request"))
            .await
            .expect("response")
    }

    fn location(response: &Response) -> &str {
        response.headers()[header::LOCATION]
            .to_str()
            .expect("location")
    }

    fn session_cookie(response: &Response) -> Option<String> {
        response
            .headers()
            .get_all(header::SET_COOKIE)
            .iter()
            .filter_map(|value| value.to_str().ok())
            .find_map(|value| value.strip_prefix("bazaar_session="))
            .map(|value| value.split(';').next().unwrap_or_default().to_string())
    }

    async fn json_body<T: serde::de::DeserializeOwned>(response: Response) -> T {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body");
        serde_json::from_slice(&bytes).expect("json")
    }

    fn shopper_claims() -> serde_json::Value {
        json!({"sub": "sub-1", "email": "Ada@Example.com", "name": "Ada"})
    }

    #[tokio::test]
    async fn signin_redirects_to_provider() {
        let h = Harness::new(FakeProvider::returning(shopper_claims()));

        let response = h.get("/signin", None).await;

        assert_eq!(response.status(), StatusCode::FOUND);
        assert!(location(&response).starts_with("https://idp.test/authorize"));
        let cookie = session_cookie(&response).expect("cookie");
        let handshake = h
            .store
            .take_handshake(&SessionId::from(cookie.as_str()))
            .await
            .expect("take");
        assert_eq!(handshake.map(|h| h.state), Some(STATE.to_string()));
    }

    #[tokio::test]
    async fn signin_reuses_browser_session_id() {
        let h = Harness::new(FakeProvider::returning(shopper_claims()));

        let response = h.get("/signin", Some("browser-1")).await;

        assert_eq!(session_cookie(&response).as_deref(), Some("browser-1"));
    }

    #[tokio::test]
    async fn callback_signs_in_and_rotates_session() {
        let h = Harness::new(FakeProvider::returning(shopper_claims()));
        let pre_login = session_cookie(&h.get("/signin", None).await).expect("cookie");

        let response = h
            .get(
                &format!("/auth/callback?code=abc&state={STATE}"),
                Some(&pre_login),
            )
            .await;

        assert_eq!(response.status(), StatusCode::FOUND);
        assert_eq!(location(&response), "/");
        let cookie = session_cookie(&response).expect("cookie");
        assert_ne!(cookie, pre_login);
        assert!(h.session(&pre_login).await.is_none());

        let session = h.session(&cookie).await.expect("session");
        assert_eq!(session.user().email, "ada@example.com");
        assert_eq!(session.user().role, Role::Shopper);
        assert!(session.user().cart.is_some());
        assert_eq!(h.store.user_count().expect("count"), 1);
        assert_eq!(h.store.cart_count().expect("count"), 1);
    }

    #[tokio::test]
    async fn store_owner_lands_on_business_page() {
        let h = Harness::new(FakeProvider::returning(json!({
            "sub": "sub-2",
            "email": "owner@example.com",
            "cognito:groups": ["store_owner"],
        })));
        let pre_login = session_cookie(&h.get("/signin", None).await).expect("cookie");

        let response = h
            .get(
                &format!("/auth/callback?code=abc&state={STATE}"),
                Some(&pre_login),
            )
            .await;

        assert_eq!(location(&response), "/account/business");
    }

    #[tokio::test]
    async fn incomplete_profile_lands_on_completion() {
        let h = Harness::new(FakeProvider::returning(shopper_claims()));
        let mut existing = User::new("ada@example.com", "Ada");
        existing.profile_completed = false;
        let user_id = existing.id;
        h.store.insert_if_absent(&existing).await.expect("insert");
        let pre_login = session_cookie(&h.get("/signin", None).await).expect("cookie");

        let response = h
            .get(
                &format!("/auth/callback?code=abc&state={STATE}"),
                Some(&pre_login),
            )
            .await;

        assert_eq!(
            location(&response),
            format!("/users/{user_id}/update?first_time=true")
        );
        assert_eq!(h.store.user_count().expect("count"), 1);
    }

    #[tokio::test]
    async fn mismatched_state_restarts_without_exchange() {
        let h = Harness::new(FakeProvider::returning(shopper_claims()));
        let pre_login = session_cookie(&h.get("/signin", None).await).expect("cookie");

        let response = h
            .get("/auth/callback?code=abc&state=forged", Some(&pre_login))
            .await;

        assert_eq!(location(&response), "/signin?error=session_expired");
        assert_eq!(h.provider.exchanges(), 0);
    }

    #[tokio::test]
    async fn callback_without_cookie_restarts() {
        let h = Harness::new(FakeProvider::returning(shopper_claims()));

        let response = h
            .get(&format!("/auth/callback?code=abc&state={STATE}"), None)
            .await;

        assert_eq!(location(&response), "/signin?error=session_expired");
        assert_eq!(h.provider.exchanges(), 0);
    }

    #[tokio::test]
    async fn replayed_callback_is_rejected() {
        let h = Harness::new(FakeProvider::returning(shopper_claims()));
        let pre_login = session_cookie(&h.get("/signin", None).await).expect("cookie");
        let uri = format!("/auth/callback?code=abc&state={STATE}");

        let first = h.get(&uri, Some(&pre_login)).await;
        let replay = h.get(&uri, Some(&pre_login)).await;

        assert_eq!(location(&first), "/");
        assert_eq!(location(&replay), "/signin?error=session_expired");
        assert_eq!(h.provider.exchanges(), 1);
    }

    #[tokio::test]
    async fn provider_error_is_surfaced() {
        let h = Harness::new(FakeProvider::returning(shopper_claims()));
        let pre_login = session_cookie(&h.get("/signin", None).await).expect("cookie");

        let response = h
            .get(
                &format!("/auth/callback?error=access_denied&state={STATE}"),
                Some(&pre_login),
            )
            .await;

        assert_eq!(location(&response), "/signin?error=access_denied");
        assert_eq!(h.provider.exchanges(), 0);
    }

    #[tokio::test]
    async fn invalid_grant_restarts() {
        let h = Harness::new(FakeProvider::failing(OidcError::InvalidGrant));
        let pre_login = session_cookie(&h.get("/signin", None).await).expect("cookie");

        let response = h
            .get(
                &format!("/auth/callback?code=stale&state={STATE}"),
                Some(&pre_login),
            )
            .await;

        assert_eq!(location(&response), "/signin?error=invalid_grant");
        assert!(h.session(&pre_login).await.is_none());
    }

    #[tokio::test]
    async fn provider_timeout_is_service_unavailable() {
        let h = Harness::new(FakeProvider::failing(OidcError::Timeout));
        let pre_login = session_cookie(&h.get("/signin", None).await).expect("cookie");

        let response = h
            .get(
                &format!("/auth/callback?code=abc&state={STATE}"),
                Some(&pre_login),
            )
            .await;

        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(h.store.user_count().expect("count"), 0);
    }

    #[tokio::test]
    async fn nonce_mismatch_creates_no_session() {
        let h = Harness::new(FakeProvider::failing(OidcError::TokenValidation(
            "ID token validation failed: nonce mismatch".to_string(),
        )));
        let pre_login = session_cookie(&h.get("/signin", None).await).expect("cookie");

        let response = h
            .get(
                &format!("/auth/callback?code=abc&state={STATE}"),
                Some(&pre_login),
            )
            .await;

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(session_cookie(&response).is_none());
        assert!(h.session(&pre_login).await.is_none());
        assert_eq!(h.store.user_count().expect("count"), 0);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body");
        assert!(!String::from_utf8_lossy(&body).contains("nonce"));
    }

    #[tokio::test]
    async fn missing_email_claim_is_internal_error() {
        let h = Harness::new(FakeProvider::returning(json!({"sub": "sub-1"})));
        let pre_login = session_cookie(&h.get("/signin", None).await).expect("cookie");

        let response = h
            .get(
                &format!("/auth/callback?code=abc&state={STATE}"),
                Some(&pre_login),
            )
            .await;

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(h.store.user_count().expect("count"), 0);
    }

    #[tokio::test]
    async fn signed_in_users_skip_the_provider() {
        let h = Harness::new(FakeProvider::returning(shopper_claims()));
        let cookie = h.sign_in().await;

        let signin = h.get("/signin", Some(&cookie)).await;
        assert_eq!(location(&signin), "/");

        // Back button replays the callback with the rotated cookie
        let callback = h
            .get(
                &format!("/auth/callback?code=abc&state={STATE}"),
                Some(&cookie),
            )
            .await;
        assert_eq!(location(&callback), "/");
        assert_eq!(h.provider.exchanges(), 1);
    }

    #[tokio::test]
    async fn logout_destroys_session() {
        let h = Harness::new(FakeProvider::returning(shopper_claims()));
        let cookie = h.sign_in().await;

        let response = h.get("/logout", Some(&cookie)).await;

        assert_eq!(response.status(), StatusCode::FOUND);
        assert_eq!(location(&response), LOGOUT_URL);
        assert_eq!(session_cookie(&response).as_deref(), Some(""));
        assert!(h.session(&cookie).await.is_none());
    }

    #[tokio::test]
    async fn signout_without_session_still_redirects() {
        let h = Harness::new(FakeProvider::returning(shopper_claims()));

        let response = h.get("/signout", None).await;

        assert_eq!(location(&response), LOGOUT_URL);
    }

    #[tokio::test]
    async fn session_info_reflects_sign_in() {
        let h = Harness::new(FakeProvider::returning(shopper_claims()));

        let anonymous: SessionView = json_body(h.get("/api/session", None).await).await;
        assert!(!anonymous.authenticated);

        let cookie = h.sign_in().await;
        let view: SessionView = json_body(h.get("/api/session", Some(&cookie)).await).await;
        assert!(view.authenticated);
        assert!(!view.is_admin);
        assert_eq!(view.display_name.as_deref(), Some("Ada"));
        assert_eq!(view.role, Some(Role::Shopper));
    }

    #[tokio::test]
    async fn cart_count_sums_items() {
        let h = Harness::new(FakeProvider::returning(shopper_claims()));

        let anonymous: CartCount = json_body(h.get("/api/cart/count", None).await).await;
        assert_eq!(anonymous.count, 0);

        let cookie = h.sign_in().await;
        let user_id = h.session(&cookie).await.expect("session").user().id;
        h.store
            .add_item(user_id, ProductId::new(), 2)
            .expect("add");
        h.store
            .add_item(user_id, ProductId::new(), 3)
            .expect("add");

        let count: CartCount = json_body(h.get("/api/cart/count", Some(&cookie)).await).await;
        assert_eq!(count.count, 5);
    }

    fn guarded(h: &Harness, chain: GuardChain) -> Router {
        Router::new()
            .route("/guarded", get(|| async { "ok" }))
            .layer(from_fn_with_state(
                GuardState::new(h.state.clone(), chain),
                enforce_guards,
            ))
    }

    async fn save_session(h: &Harness, user: SessionUser) -> String {
        let id = SessionId::generate();
        h.store
            .save(&Session::new(id.clone(), user, chrono::Duration::hours(1)))
            .await
            .expect("save");
        id.as_str().to_string()
    }

    fn session_user(groups: &[&str]) -> SessionUser {
        let claims =
            IdentityClaims::new("sub-9", "g@example.com").with_groups(groups.iter().copied());
        SessionUser::materialize(&claims, &User::from_claims(&claims))
    }

    #[tokio::test]
    async fn guards_redirect_anonymous_users_to_signin() {
        let h = Harness::new(FakeProvider::returning(shopper_claims()));

        let response = send(guarded(&h, GuardChain::new().require_auth()), "/guarded", None).await;

        assert_eq!(location(&response), "/signin");
    }

    #[tokio::test]
    async fn guards_forbid_missing_role() {
        let h = Harness::new(FakeProvider::returning(shopper_claims()));
        let shopper = save_session(&h, session_user(&[])).await;
        let admin = save_session(&h, session_user(&["admin"])).await;
        let chain = GuardChain::new().require_auth().require_role(Role::Admin);

        let denied = send(guarded(&h, chain.clone()), "/guarded", Some(&shopper)).await;
        let allowed = send(guarded(&h, chain), "/guarded", Some(&admin)).await;

        assert_eq!(denied.status(), StatusCode::FORBIDDEN);
        assert_eq!(allowed.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn guards_send_incomplete_profiles_to_completion() {
        let h = Harness::new(FakeProvider::returning(shopper_claims()));
        let mut user = session_user(&[]);
        user.profile_completed = false;
        let user_id = user.id;
        let cookie = save_session(&h, user).await;
        let chain = GuardChain::new().require_auth().require_complete_profile();

        let redirected = send(guarded(&h, chain.clone()), "/guarded", Some(&cookie)).await;
        let bypassed = send(
            guarded(&h, chain),
            "/guarded?first_time=true",
            Some(&cookie),
        )
        .await;

        assert_eq!(
            location(&redirected),
            format!("/users/{user_id}/update?first_time=true")
        );
        assert_eq!(bypassed.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn require_admin_extractor() {
        let h = Harness::new(FakeProvider::returning(shopper_claims()));
        let app = Router::new()
            .route(
                "/admin",
                get(|RequireAdmin(session): RequireAdmin| async move {
                    session.user().display_name.clone()
                }),
            )
            .with_state(h.state.clone());
        let shopper = save_session(&h, session_user(&[])).await;
        let admin = save_session(&h, session_user(&["admin"])).await;

        assert_eq!(
            location(&send(app.clone(), "/admin", None).await),
            "/signin"
        );
        assert_eq!(
            send(app.clone(), "/admin", Some(&shopper)).await.status(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            send(app, "/admin", Some(&admin)).await.status(),
            StatusCode::OK
        );
    }
}
