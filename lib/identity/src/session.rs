//! Browser sessions, login handshakes and the materialized session user.
//!
//! A browser carries only an opaque [`SessionId`]. While a login is in
//! flight the server holds a [`HandshakeState`] under that id; once the
//! callback succeeds it holds an authenticated [`Session`] whose
//! [`SessionUser`] is what every downstream handler reads.

use bazaar_core::{CartId, ProductId, StoreId, UserId};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

use crate::claims::IdentityClaims;
use crate::role::Role;
use crate::user::User;

/// Opaque identifier held in the browser's session cookie.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    /// Creates a session ID from a string.
    #[must_use]
    pub fn new(id: String) -> Self {
        Self(id)
    }

    /// Generates a fresh, unguessable session ID.
    #[must_use]
    pub fn generate() -> Self {
        Self(ulid::Ulid::new().to_string())
    }

    /// Returns the session ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for SessionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// The `{state, nonce, code_verifier}` triple protecting one login attempt.
///
/// Created at initiate, consumed exactly once at callback.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandshakeState {
    pub state: String,
    pub nonce: String,
    pub code_verifier: String,
    pub created_at: DateTime<Utc>,
}

impl HandshakeState {
    /// Creates a handshake stamped with the current time.
    #[must_use]
    pub fn new(state: String, nonce: String, code_verifier: String) -> Self {
        Self {
            state,
            nonce,
            code_verifier,
            created_at: Utc::now(),
        }
    }

    /// Returns true if the handshake is older than `ttl`.
    #[must_use]
    pub fn is_expired(&self, ttl: Duration) -> bool {
        Utc::now() >= self.created_at + ttl
    }

    /// Returns true if every part of the triple is present.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        !self.state.is_empty() && !self.nonce.is_empty() && !self.code_verifier.is_empty()
    }
}

impl fmt::Debug for HandshakeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandshakeState")
            .field("state", &self.state)
            .field("created_at", &self.created_at)
            .finish_non_exhaustive()
    }
}

/// Provider tokens kept server-side for later API calls.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionTokens {
    pub id_token: String,
    pub access_token: String,
    pub refresh_token: Option<String>,
}

impl fmt::Debug for SessionTokens {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SessionTokens { .. }")
    }
}

/// The user as seen by every request after login.
///
/// Built only by [`SessionUser::materialize`]. Provider fields win for
/// identity and contact data; the local record wins for application state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionUser {
    /// Internal account id.
    pub id: UserId,
    /// Provider subject.
    pub external_subject: String,
    pub email: String,
    pub display_name: String,
    /// Phone number as the provider sent it.
    pub phone_number: Option<String>,
    pub address: Option<String>,
    pub role: Role,
    pub groups: BTreeSet<String>,
    pub email_verified: bool,
    pub phone_verified: bool,
    /// Locally stored phone number without country code.
    pub phone: Option<String>,
    pub country: Option<String>,
    pub city: Option<String>,
    pub zip: Option<String>,
    pub profile_image: Option<String>,
    pub profile_completed: bool,
    pub cart: Option<CartId>,
    pub store_wishlist: Vec<StoreId>,
    pub product_wishlist: Vec<ProductId>,
}

impl SessionUser {
    /// Merges fresh claims with the synced local record.
    #[must_use]
    pub fn materialize(claims: &IdentityClaims, user: &User) -> Self {
        Self {
            id: user.id,
            external_subject: claims.external_subject.clone(),
            email: claims.email.clone(),
            display_name: claims
                .display_name
                .clone()
                .unwrap_or_else(|| user.display_name.clone()),
            phone_number: claims.phone_number.clone(),
            address: claims.address.clone().or_else(|| user.address.clone()),
            role: claims.role,
            groups: claims.groups.clone(),
            email_verified: claims.email_verified,
            phone_verified: claims.phone_verified,
            phone: user.phone.clone(),
            country: user.country.clone(),
            city: user.city.clone(),
            zip: user.zip.clone(),
            profile_image: user.profile_image.clone(),
            profile_completed: user.profile_completed,
            cart: user.cart,
            store_wishlist: user.store_wishlist.clone(),
            product_wishlist: user.product_wishlist.clone(),
        }
    }

    /// Returns true if the user holds the admin role.
    #[must_use]
    pub fn is_admin(&self) -> bool {
        self.role.is_admin()
    }
}

/// An authenticated browser session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    id: SessionId,
    user: SessionUser,
    tokens: Option<SessionTokens>,
    created_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
}

impl Session {
    /// Creates a session valid for `duration`.
    #[must_use]
    pub fn new(id: SessionId, user: SessionUser, duration: Duration) -> Self {
        let now = Utc::now();
        Self {
            id,
            user,
            tokens: None,
            created_at: now,
            expires_at: now + duration,
        }
    }

    /// Creates a session holding provider tokens.
    #[must_use]
    pub fn with_tokens(
        id: SessionId,
        user: SessionUser,
        duration: Duration,
        tokens: SessionTokens,
    ) -> Self {
        let mut session = Self::new(id, user, duration);
        session.tokens = Some(tokens);
        session
    }

    /// Reconstitutes a session from storage.
    #[must_use]
    pub fn from_parts(
        id: SessionId,
        user: SessionUser,
        tokens: Option<SessionTokens>,
        created_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            user,
            tokens,
            created_at,
            expires_at,
        }
    }

    /// Returns the session ID.
    #[must_use]
    pub fn id(&self) -> &SessionId {
        &self.id
    }

    /// Returns the materialized user.
    #[must_use]
    pub fn user(&self) -> &SessionUser {
        &self.user
    }

    /// Returns the provider tokens, if stored.
    #[must_use]
    pub fn tokens(&self) -> Option<&SessionTokens> {
        self.tokens.as_ref()
    }

    /// Returns when the session was created.
    #[must_use]
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Returns when the session expires.
    #[must_use]
    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    /// Returns true if the session has expired.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        Utc::now() >= self.expires_at
    }
}
