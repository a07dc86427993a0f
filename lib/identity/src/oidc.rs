//! OIDC (OpenID Connect) configuration.
//!
//! Describes how to reach the external identity provider and how its
//! claims map onto marketplace roles. Discovery itself happens in the
//! server at boot; this type is the immutable input to it.

use serde::{Deserialize, Serialize};

/// Configuration for the OIDC identity provider.
///
/// Fields with defaults can be omitted when loading from environment variables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OidcConfig {
    /// The OIDC issuer URL, used for discovery
    /// (e.g. "https://cognito-idp.eu-west-1.amazonaws.com/eu-west-1_abc").
    issuer_url: String,
    /// The OAuth2 client ID registered with the provider.
    client_id: String,
    /// The OAuth2 client secret.
    client_secret: String,
    /// The redirect URI for the callback (e.g. "https://shop.example.com/auth/callback").
    redirect_uri: String,
    /// The provider's logout endpoint (e.g. "https://auth.example.com/logout").
    logout_endpoint: String,
    /// Where the provider sends the browser after logging out.
    post_logout_redirect_uri: String,
    /// OAuth2 scopes to request as a comma-separated string.
    /// Default: "openid,email,profile"
    #[serde(default = "default_scopes")]
    scopes: String,
    /// The claim name in the ID token that contains user groups.
    /// Default: "cognito:groups"
    #[serde(default = "default_groups_claim")]
    groups_claim: String,
    /// The group name that grants the admin role.
    /// Default: "admin"
    #[serde(default = "default_admin_group")]
    admin_group: String,
    /// The group name that grants the store owner role.
    /// Default: "store_owner"
    #[serde(default = "default_store_owner_group")]
    store_owner_group: String,
    /// Upper bound for discovery and token endpoint calls, in seconds.
    /// Default: 10
    #[serde(default = "default_http_timeout_seconds")]
    http_timeout_seconds: u64,
}

fn default_scopes() -> String {
    "openid,email,profile".to_string()
}

fn default_groups_claim() -> String {
    "cognito:groups".to_string()
}

fn default_admin_group() -> String {
    "admin".to_string()
}

fn default_store_owner_group() -> String {
    "store_owner".to_string()
}

fn default_http_timeout_seconds() -> u64 {
    10
}

impl OidcConfig {
    /// Creates a configuration builder.
    ///
    /// Optional settings start at their defaults.
    #[must_use]
    pub fn builder(
        issuer_url: impl Into<String>,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        redirect_uri: impl Into<String>,
    ) -> OidcConfigBuilder {
        OidcConfigBuilder::new(
            issuer_url.into(),
            client_id.into(),
            client_secret.into(),
            redirect_uri.into(),
        )
    }

    /// Returns the OIDC issuer URL.
    #[must_use]
    pub fn issuer_url(&self) -> &str {
        &self.issuer_url
    }

    /// Returns the OAuth2 client ID.
    #[must_use]
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// Returns the OAuth2 client secret.
    #[must_use]
    pub fn client_secret(&self) -> &str {
        &self.client_secret
    }

    /// Returns the OAuth2 redirect URI.
    #[must_use]
    pub fn redirect_uri(&self) -> &str {
        &self.redirect_uri
    }

    /// Returns the provider's logout endpoint.
    #[must_use]
    pub fn logout_endpoint(&self) -> &str {
        &self.logout_endpoint
    }

    /// Returns the post-logout redirect target.
    #[must_use]
    pub fn post_logout_redirect_uri(&self) -> &str {
        &self.post_logout_redirect_uri
    }

    /// Returns the OAuth2 scopes to request, parsed from comma-separated string.
    #[must_use]
    pub fn scopes(&self) -> Vec<&str> {
        self.scopes
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect()
    }

    /// Returns the name of the claim containing user groups.
    #[must_use]
    pub fn groups_claim(&self) -> &str {
        &self.groups_claim
    }

    /// Returns the group name granting the admin role.
    #[must_use]
    pub fn admin_group(&self) -> &str {
        &self.admin_group
    }

    /// Returns the group name granting the store owner role.
    #[must_use]
    pub fn store_owner_group(&self) -> &str {
        &self.store_owner_group
    }

    /// Returns the timeout applied to every call made to the provider.
    #[must_use]
    pub fn http_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.http_timeout_seconds)
    }
}

/// Builder for `OidcConfig`.
#[derive(Debug)]
pub struct OidcConfigBuilder {
    issuer_url: String,
    client_id: String,
    client_secret: String,
    redirect_uri: String,
    logout_endpoint: String,
    post_logout_redirect_uri: String,
    scopes: Vec<String>,
    groups_claim: String,
    admin_group: String,
    store_owner_group: String,
    http_timeout_seconds: u64,
}

impl OidcConfigBuilder {
    /// Creates a new builder with required fields.
    #[must_use]
    pub fn new(
        issuer_url: String,
        client_id: String,
        client_secret: String,
        redirect_uri: String,
    ) -> Self {
        let logout_endpoint = format!("{}/logout", issuer_url.trim_end_matches('/'));
        Self {
            issuer_url,
            client_id,
            client_secret,
            redirect_uri,
            logout_endpoint,
            post_logout_redirect_uri: "/".to_string(),
            scopes: vec![
                "openid".to_string(),
                "email".to_string(),
                "profile".to_string(),
            ],
            groups_claim: default_groups_claim(),
            admin_group: default_admin_group(),
            store_owner_group: default_store_owner_group(),
            http_timeout_seconds: default_http_timeout_seconds(),
        }
    }

    /// Sets the provider logout endpoint and the post-logout redirect target.
    #[must_use]
    pub fn logout(mut self, endpoint: impl Into<String>, redirect_uri: impl Into<String>) -> Self {
        self.logout_endpoint = endpoint.into();
        self.post_logout_redirect_uri = redirect_uri.into();
        self
    }

    /// Adds a scope to the list of scopes to request.
    #[must_use]
    pub fn add_scope(mut self, scope: impl Into<String>) -> Self {
        let scope = scope.into();
        if !self.scopes.contains(&scope) {
            self.scopes.push(scope);
        }
        self
    }

    /// Sets the claim name for user groups.
    #[must_use]
    pub fn groups_claim(mut self, claim: impl Into<String>) -> Self {
        self.groups_claim = claim.into();
        self
    }

    /// Sets the group names that map to the admin and store owner roles.
    #[must_use]
    pub fn role_groups(
        mut self,
        admin_group: impl Into<String>,
        store_owner_group: impl Into<String>,
    ) -> Self {
        self.admin_group = admin_group.into();
        self.store_owner_group = store_owner_group.into();
        self
    }

    /// Sets the provider call timeout in seconds.
    #[must_use]
    pub fn http_timeout_seconds(mut self, seconds: u64) -> Self {
        self.http_timeout_seconds = seconds;
        self
    }

    /// Builds the `OidcConfig`.
    #[must_use]
    pub fn build(self) -> OidcConfig {
        OidcConfig {
            issuer_url: self.issuer_url,
            client_id: self.client_id,
            client_secret: self.client_secret,
            redirect_uri: self.redirect_uri,
            logout_endpoint: self.logout_endpoint,
            post_logout_redirect_uri: self.post_logout_redirect_uri,
            scopes: self.scopes.join(","),
            groups_claim: self.groups_claim,
            admin_group: self.admin_group,
            store_owner_group: self.store_owner_group,
            http_timeout_seconds: self.http_timeout_seconds,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn builder() -> OidcConfigBuilder {
        OidcConfig::builder(
            "https://auth.example.com",
            "client-id",
            "client-secret",
            "https://shop.example.com/auth/callback",
        )
    }

    #[test]
    fn builder_has_defaults() {
        let config = builder().build();

        assert_eq!(config.issuer_url(), "https://auth.example.com");
        assert_eq!(config.client_id(), "client-id");
        assert_eq!(config.client_secret(), "client-secret");
        assert_eq!(
            config.redirect_uri(),
            "https://shop.example.com/auth/callback"
        );
        assert_eq!(config.logout_endpoint(), "https://auth.example.com/logout");
        assert_eq!(config.scopes(), vec!["openid", "email", "profile"]);
        assert_eq!(config.groups_claim(), "cognito:groups");
        assert_eq!(config.admin_group(), "admin");
        assert_eq!(config.store_owner_group(), "store_owner");
        assert_eq!(config.http_timeout(), std::time::Duration::from_secs(10));
    }

    #[test]
    fn builder_allows_customization() {
        let config = builder()
            .groups_claim("groups")
            .role_groups("Marketplace-Admins", "Marketplace-Sellers")
            .logout("https://auth.example.com/signout", "https://shop.example.com")
            .add_scope("phone")
            .http_timeout_seconds(3)
            .build();

        assert_eq!(config.groups_claim(), "groups");
        assert_eq!(config.admin_group(), "Marketplace-Admins");
        assert_eq!(config.store_owner_group(), "Marketplace-Sellers");
        assert_eq!(config.logout_endpoint(), "https://auth.example.com/signout");
        assert_eq!(config.post_logout_redirect_uri(), "https://shop.example.com");
        assert!(config.scopes().contains(&"phone"));
        assert_eq!(config.http_timeout(), std::time::Duration::from_secs(3));
    }

    #[test]
    fn builder_add_scope_does_not_duplicate() {
        let config = builder().add_scope("openid").build();

        let openid_count = config.scopes().iter().filter(|s| **s == "openid").count();
        assert_eq!(openid_count, 1);
    }

    #[test]
    fn config_deserializes_with_defaults() {
        let json = r#"{
            "issuer_url": "https://auth.example.com",
            "client_id": "my-client",
            "client_secret": "secret",
            "redirect_uri": "https://shop.example.com/auth/callback",
            "logout_endpoint": "https://auth.example.com/logout",
            "post_logout_redirect_uri": "https://shop.example.com/"
        }"#;

        let config: OidcConfig = serde_json::from_str(json).expect("deserialize");

        assert_eq!(config.scopes(), vec!["openid", "email", "profile"]);
        assert_eq!(config.groups_claim(), "cognito:groups");
        assert_eq!(config.admin_group(), "admin");
        assert_eq!(config.http_timeout(), std::time::Duration::from_secs(10));
    }

    #[test]
    fn scopes_parses_comma_separated() {
        let json = r#"{
            "issuer_url": "https://auth.example.com",
            "client_id": "my-client",
            "client_secret": "secret",
            "redirect_uri": "https://shop.example.com/auth/callback",
            "logout_endpoint": "https://auth.example.com/logout",
            "post_logout_redirect_uri": "https://shop.example.com/",
            "scopes": "openid, email, profile,"
        }"#;

        let config: OidcConfig = serde_json::from_str(json).expect("deserialize");

        assert_eq!(config.scopes(), vec!["openid", "email", "profile"]);
    }
}
