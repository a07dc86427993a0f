//! OIDC client implementation using the openidconnect crate.
//!
//! Discovery runs once at boot; the resulting [`OidcClient`] is immutable
//! and shared by every request. Routes talk to it through the
//! [`IdentityProvider`] trait so tests can substitute a fake provider.

use async_trait::async_trait;
use bazaar_identity::{HandshakeState, OidcConfig};
use openidconnect::core::{
    CoreAuthenticationFlow, CoreClient, CoreErrorResponseType, CoreProviderMetadata,
};
use openidconnect::{
    AuthorizationCode, ClientId, ClientSecret, CsrfToken, IssuerUrl, Nonce, OAuth2TokenResponse,
    PkceCodeChallenge, PkceCodeVerifier, RedirectUrl, RequestTokenError, Scope,
    StandardErrorResponse, TokenResponse,
};
use std::fmt;
use std::time::Duration;
use tracing::{debug, info};

/// Tokens and the verified ID token payload from a successful exchange.
#[derive(Clone)]
pub struct TokenSet {
    /// The verified ID token payload, for claim mapping.
    pub claims: serde_json::Value,
    pub id_token: String,
    pub access_token: String,
    pub refresh_token: Option<String>,
}

impl fmt::Debug for TokenSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("TokenSet { .. }")
    }
}

/// The external identity provider as seen by the sign-in routes.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Starts a login: returns the authorization URL and the handshake to store.
    fn authorization_url(&self) -> (String, HandshakeState);

    /// Exchanges an authorization code, verifying the ID token against the handshake nonce.
    async fn exchange_code(
        &self,
        code: &str,
        handshake: &HandshakeState,
    ) -> Result<TokenSet, OidcError>;

    /// Returns the provider logout URL the browser is sent to after sign-out.
    fn logout_url(&self) -> &str;

    /// Returns the configuration.
    fn config(&self) -> &OidcConfig;
}

/// OIDC client for authenticating users.
pub struct OidcClient {
    provider_metadata: CoreProviderMetadata,
    client_id: ClientId,
    client_secret: ClientSecret,
    redirect_url: RedirectUrl,
    http_client: reqwest::Client,
    logout_url: String,
    config: OidcConfig,
}

impl OidcClient {
    /// Creates a new OIDC client by discovering the provider metadata.
    ///
    /// # Errors
    ///
    /// Returns `Timeout` if discovery exceeds the configured bound, and
    /// `Configuration` or `Discovery` for invalid settings or provider failures.
    pub async fn discover(config: OidcConfig) -> Result<Self, OidcError> {
        let issuer_url = IssuerUrl::new(config.issuer_url().to_string())
            .map_err(|e| OidcError::Configuration(format!("invalid issuer URL: {e}")))?;

        let http_client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .timeout(config.http_timeout())
            .build()
            .map_err(|e| OidcError::Configuration(format!("failed to create HTTP client: {e}")))?;

        let provider_metadata = bounded(
            config.http_timeout(),
            CoreProviderMetadata::discover_async(issuer_url, &http_client),
        )
        .await?
        .map_err(|e| OidcError::Discovery(format!("failed to discover provider: {e}")))?;

        let redirect_url = RedirectUrl::new(config.redirect_uri().to_string())
            .map_err(|e| OidcError::Configuration(format!("invalid redirect URI: {e}")))?;

        let logout_url = build_logout_url(&config)?;

        info!(
            issuer = config.issuer_url(),
            "identity provider metadata discovered"
        );

        Ok(Self {
            provider_metadata,
            client_id: ClientId::new(config.client_id().to_string()),
            client_secret: ClientSecret::new(config.client_secret().to_string()),
            redirect_url,
            http_client,
            logout_url,
            config,
        })
    }
}

#[async_trait]
impl IdentityProvider for OidcClient {
    fn authorization_url(&self) -> (String, HandshakeState) {
        let client = CoreClient::from_provider_metadata(
            self.provider_metadata.clone(),
            self.client_id.clone(),
            Some(self.client_secret.clone()),
        )
        .set_redirect_uri(self.redirect_url.clone());

        let (pkce_challenge, pkce_verifier) = PkceCodeChallenge::new_random_sha256();

        let mut auth_request = client
            .authorize_url(
                CoreAuthenticationFlow::AuthorizationCode,
                CsrfToken::new_random,
                Nonce::new_random,
            )
            .set_pkce_challenge(pkce_challenge);

        // "openid" is always sent by the flow itself
        for scope in self.config.scopes().into_iter().filter(|s| *s != "openid") {
            auth_request = auth_request.add_scope(Scope::new(scope.to_string()));
        }

        let (auth_url, csrf_token, nonce) = auth_request.url();

        let handshake = HandshakeState::new(
            csrf_token.secret().clone(),
            nonce.secret().clone(),
            pkce_verifier.secret().clone(),
        );

        (auth_url.to_string(), handshake)
    }

    async fn exchange_code(
        &self,
        code: &str,
        handshake: &HandshakeState,
    ) -> Result<TokenSet, OidcError> {
        let client = CoreClient::from_provider_metadata(
            self.provider_metadata.clone(),
            self.client_id.clone(),
            Some(self.client_secret.clone()),
        )
        .set_redirect_uri(self.redirect_url.clone());

        let token_request = client
            .exchange_code(AuthorizationCode::new(code.to_string()))
            .map_err(|e| OidcError::Configuration(format!("token endpoint error: {e}")))?;

        let token_response = bounded(
            self.config.http_timeout(),
            token_request
                .set_pkce_verifier(PkceCodeVerifier::new(handshake.code_verifier.clone()))
                .request_async(&self.http_client),
        )
        .await?
        .map_err(classify_token_error)?;

        let id_token = token_response
            .id_token()
            .ok_or_else(|| OidcError::TokenValidation("no ID token in response".to_string()))?;

        // Rejects a token whose nonce differs from the handshake
        let nonce = Nonce::new(handshake.nonce.clone());
        id_token
            .claims(&client.id_token_verifier(), &nonce)
            .map_err(|e| OidcError::TokenValidation(format!("ID token validation failed: {e}")))?;

        let raw_id_token = raw_id_token(&token_response)?;
        let claims = decode_payload(&raw_id_token)?;
        debug!("token exchange completed");

        Ok(TokenSet {
            claims,
            id_token: raw_id_token,
            access_token: token_response.access_token().secret().clone(),
            refresh_token: token_response.refresh_token().map(|t| t.secret().clone()),
        })
    }

    fn logout_url(&self) -> &str {
        &self.logout_url
    }

    fn config(&self) -> &OidcConfig {
        &self.config
    }
}

async fn bounded<F: Future>(limit: Duration, future: F) -> Result<F::Output, OidcError> {
    tokio::time::timeout(limit, future)
        .await
        .map_err(|_| OidcError::Timeout)
}

fn classify_token_error<RE>(
    err: RequestTokenError<RE, StandardErrorResponse<CoreErrorResponseType>>,
) -> OidcError
where
    RE: std::error::Error + 'static,
{
    match &err {
        RequestTokenError::ServerResponse(response)
            if *response.error() == CoreErrorResponseType::InvalidGrant =>
        {
            OidcError::InvalidGrant
        }
        _ => OidcError::TokenExchange(format!("token exchange failed: {err}")),
    }
}

/// Builds `{logout_endpoint}?client_id=...&logout_uri=...`.
///
/// # Errors
///
/// Returns `Configuration` if the logout endpoint is not a valid URL.
pub fn build_logout_url(config: &OidcConfig) -> Result<String, OidcError> {
    reqwest::Url::parse_with_params(
        config.logout_endpoint(),
        &[
            ("client_id", config.client_id()),
            ("logout_uri", config.post_logout_redirect_uri()),
        ],
    )
    .map(String::from)
    .map_err(|e| OidcError::Configuration(format!("invalid logout endpoint: {e}")))
}

// The token response carries the raw JWT; openidconnect only exposes it through serialization.
fn raw_id_token<TR: serde::Serialize>(token_response: &TR) -> Result<String, OidcError> {
    let response_json = serde_json::to_value(token_response).map_err(|e| {
        OidcError::TokenValidation(format!("failed to serialize token response: {e}"))
    })?;

    response_json
        .get("id_token")
        .and_then(|v| v.as_str())
        .map(str::to_string)
        .ok_or_else(|| OidcError::TokenValidation("no id_token in response".to_string()))
}

/// Decodes the payload segment of an already verified JWT.
///
/// Provider-specific claims such as `cognito:groups` are not part of the
/// standard claim set, so claim mapping works on the raw payload.
fn decode_payload(jwt: &str) -> Result<serde_json::Value, OidcError> {
    use base64::Engine;

    let mut parts = jwt.split('.');
    let (Some(_header), Some(payload), Some(_signature), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return Err(OidcError::TokenValidation("invalid JWT format".to_string()));
    };

    let payload_bytes = base64::engine::general_purpose::URL_SAFE_NO_PAD
        .decode(payload)
        .map_err(|e| OidcError::TokenValidation(format!("failed to decode JWT payload: {e}")))?;

    serde_json::from_slice(&payload_bytes)
        .map_err(|e| OidcError::TokenValidation(format!("failed to parse JWT payload: {e}")))
}

/// OIDC-related errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OidcError {
    /// Configuration error (invalid URLs, etc.)
    Configuration(String),
    /// Failed to discover provider metadata.
    Discovery(String),
    /// The provider did not answer within the configured bound.
    Timeout,
    /// The authorization code was expired or already redeemed.
    InvalidGrant,
    /// Token exchange failed.
    TokenExchange(String),
    /// Token validation failed.
    TokenValidation(String),
}

impl OidcError {
    /// Returns true if retrying the same operation later may succeed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Timeout)
    }
}

impl fmt::Display for OidcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Configuration(msg) => write!(f, "OIDC configuration error: {msg}"),
            Self::Discovery(msg) => write!(f, "OIDC discovery error: {msg}"),
            Self::Timeout => write!(f, "OIDC provider timed out"),
            Self::InvalidGrant => write!(f, "authorization code expired or already used"),
            Self::TokenExchange(msg) => write!(f, "OIDC token exchange error: {msg}"),
            Self::TokenValidation(msg) => write!(f, "OIDC token validation error: {msg}"),
        }
    }
}

impl std::error::Error for OidcError {}
