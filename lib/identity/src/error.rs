//! Error types for the identity crate.
//!
//! Errors are designed for layered context using rootcause:
//! - `AuthenticationError`: the login protocol could not establish an identity
//! - `AuthorizationError`: a guard refused an established identity
//! - `StoreError`: a user, cart or session store failed
//! - `SyncError`: reconciling claims against the user store failed

use bazaar_core::UserId;
use std::fmt;

/// Errors from authentication operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthenticationError {
    /// No handshake was pending for the browser session, or it had expired.
    HandshakeExpired,
    /// The `state` returned by the provider did not match the pending handshake.
    StateMismatch,
    /// The provider reported an error on the callback.
    ProviderError { code: String },
    /// Missing required claim in the ID token.
    MissingClaim { claim: String },
}

impl fmt::Display for AuthenticationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::HandshakeExpired => write!(f, "login handshake expired or already used"),
            Self::StateMismatch => write!(f, "login state does not match the pending handshake"),
            Self::ProviderError { code } => write!(f, "identity provider error: {code}"),
            Self::MissingClaim { claim } => write!(f, "missing required claim: {claim}"),
        }
    }
}

impl std::error::Error for AuthenticationError {}

/// Errors from authorization checks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthorizationError {
    /// User is not authenticated.
    NotAuthenticated,
    /// User does not hold the required role.
    RoleRequired { required: String },
    /// User is not a member of the required group.
    GroupRequired { group: String },
    /// User must finish their profile first.
    ProfileIncomplete { user_id: Option<UserId> },
}

impl fmt::Display for AuthorizationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotAuthenticated => write!(f, "user is not authenticated"),
            Self::RoleRequired { required } => write!(f, "role '{required}' required"),
            Self::GroupRequired { group } => write!(f, "membership of group '{group}' required"),
            Self::ProfileIncomplete { .. } => write!(f, "profile is incomplete"),
        }
    }
}

impl std::error::Error for AuthorizationError {}

/// Errors from user, cart and session stores.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The backing database failed.
    Database { details: String },
    /// A stored row could not be decoded.
    Corrupt { details: String },
    /// The referenced record does not exist.
    NotFound { entity: &'static str, id: String },
    /// A write collided with a uniqueness constraint.
    Conflict { entity: &'static str, field: &'static str },
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Database { details } => write!(f, "database error: {details}"),
            Self::Corrupt { details } => write!(f, "corrupt record: {details}"),
            Self::NotFound { entity, id } => write!(f, "{entity} '{id}' not found"),
            Self::Conflict { entity, field } => {
                write!(f, "{entity} {field} is already taken by another record")
            }
        }
    }
}

impl std::error::Error for StoreError {}

/// Errors from identity synchronisation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncError {
    /// A store operation failed.
    Store { details: String },
    /// An insert conflicted but no record could be re-read afterwards.
    ConflictUnresolved { subject: String },
    /// The email belongs to an account federated with another subject.
    SubjectMismatch { email: String, existing: String },
}

impl fmt::Display for SyncError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Store { details } => write!(f, "identity sync store failure: {details}"),
            Self::SubjectMismatch { email, existing } => write!(
                f,
                "account for '{email}' is already linked to subject '{existing}'"
            ),
            Self::ConflictUnresolved { subject } => {
                write!(f, "user creation for subject '{subject}' conflicted and could not be re-read")
            }
        }
    }
}

impl std::error::Error for SyncError {}
