//! Storage seams for users, carts and sessions.
//!
//! The server backs these with Postgres; [`crate::memory`] provides
//! in-process implementations with the same atomicity guarantees.

use async_trait::async_trait;
use bazaar_core::{CartId, UserId};
use chrono::Duration;
use rootcause::prelude::Report;

use crate::error::StoreError;
use crate::session::{HandshakeState, Session, SessionId};
use crate::user::User;

/// Result of an insert guarded by the email and subject uniqueness constraints.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InsertOutcome {
    /// The record was written.
    Inserted,
    /// Another record already holds the email or subject.
    Conflict,
}

/// Persistence for user records.
///
/// Implementations must enforce uniqueness of `email` and of
/// `external_subject` atomically.
#[async_trait]
pub trait UserStore: Send + Sync {
    /// Finds the account federated with `subject`.
    async fn find_by_subject(&self, subject: &str) -> Result<Option<User>, Report<StoreError>>;

    /// Finds the account registered under `email` (already normalized).
    async fn find_by_email(&self, email: &str) -> Result<Option<User>, Report<StoreError>>;

    /// Finds an account by internal id.
    async fn find_by_id(&self, id: UserId) -> Result<Option<User>, Report<StoreError>>;

    /// Inserts `user` unless its email or subject is already taken.
    async fn insert_if_absent(&self, user: &User) -> Result<InsertOutcome, Report<StoreError>>;

    /// Persists profile and application fields of an existing account.
    ///
    /// Never changes `external_subject`; use [`UserStore::link_subject`].
    /// Fails with [`StoreError::Conflict`] if another account holds the email.
    async fn update(&self, user: &User) -> Result<(), Report<StoreError>>;

    /// Federates an account with `user.external_subject`, clearing any local password.
    ///
    /// Returns false when the stored account is already linked to a
    /// different subject, in which case nothing is written.
    async fn link_subject(&self, user: &User) -> Result<bool, Report<StoreError>>;
}

/// Persistence for shopping carts.
#[async_trait]
pub trait CartStore: Send + Sync {
    /// Returns the user's cart, creating it if the user has none.
    ///
    /// At most one cart is ever created per user, even under concurrent calls.
    async fn ensure_cart(&self, user_id: UserId) -> Result<CartId, Report<StoreError>>;

    /// Returns the total quantity of items in the user's cart, 0 if none exists.
    async fn item_count(&self, user_id: UserId) -> Result<u64, Report<StoreError>>;
}

/// Server-side session state keyed by the browser's session id.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Records the handshake for a login in flight, replacing any earlier one.
    async fn put_handshake(
        &self,
        id: &SessionId,
        handshake: &HandshakeState,
    ) -> Result<(), Report<StoreError>>;

    /// Removes and returns the pending handshake.
    ///
    /// Concurrent callers for the same id observe it at most once.
    async fn take_handshake(
        &self,
        id: &SessionId,
    ) -> Result<Option<HandshakeState>, Report<StoreError>>;

    /// Loads an authenticated session, ignoring expired ones.
    async fn load(&self, id: &SessionId) -> Result<Option<Session>, Report<StoreError>>;

    /// Writes an authenticated session.
    async fn save(&self, session: &Session) -> Result<(), Report<StoreError>>;

    /// Removes the session and any handshake held under its id.
    async fn destroy(&self, id: &SessionId) -> Result<(), Report<StoreError>>;

    /// Deletes expired sessions and handshakes older than `handshake_ttl`.
    ///
    /// Returns the number of rows removed.
    async fn delete_expired(&self, handshake_ttl: Duration) -> Result<u64, Report<StoreError>>;
}
