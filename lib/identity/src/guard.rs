//! Access guards evaluated against the current session user.
//!
//! Guards are pure predicates: they read a [`SessionUser`] snapshot and
//! either pass or return the [`AuthorizationError`] describing why not.
//! They never touch the session. A [`GuardChain`] runs several in order
//! and stops at the first failure.

use crate::error::AuthorizationError;
use crate::role::Role;
use crate::session::SessionUser;

/// Per-request facts guards may consult besides the session.
#[derive(Debug, Clone, Copy, Default)]
pub struct GuardContext<'a> {
    /// The session user, if the browser is signed in.
    pub user: Option<&'a SessionUser>,
    /// Whether the request carries the `first_time=true` bypass parameter.
    pub first_time: bool,
}

impl<'a> GuardContext<'a> {
    /// Creates a context for the given session user.
    #[must_use]
    pub fn new(user: Option<&'a SessionUser>) -> Self {
        Self {
            user,
            first_time: false,
        }
    }

    /// Sets the first-time bypass flag.
    #[must_use]
    pub fn first_time(mut self, first_time: bool) -> Self {
        self.first_time = first_time;
        self
    }
}

/// Passes when a user is signed in.
///
/// # Errors
///
/// Returns `NotAuthenticated` when no user is present.
pub fn require_auth(user: Option<&SessionUser>) -> Result<&SessionUser, AuthorizationError> {
    user.ok_or(AuthorizationError::NotAuthenticated)
}

/// Passes when a user is signed in through the identity provider.
///
/// # Errors
///
/// Returns `NotAuthenticated` when no user is present or it has no provider subject.
pub fn require_federated_auth(
    user: Option<&SessionUser>,
) -> Result<&SessionUser, AuthorizationError> {
    require_auth(user)?;
    user.filter(|u| !u.external_subject.is_empty())
        .ok_or(AuthorizationError::NotAuthenticated)
}

/// Passes when the user holds exactly `role`.
///
/// # Errors
///
/// Returns `RoleRequired`, including when nobody is signed in.
pub fn require_role(user: Option<&SessionUser>, role: Role) -> Result<(), AuthorizationError> {
    match user {
        Some(u) if u.role == role => Ok(()),
        _ => Err(AuthorizationError::RoleRequired {
            required: role.to_string(),
        }),
    }
}

/// Passes when the user is a member of `group`.
///
/// # Errors
///
/// Returns `GroupRequired`, including when nobody is signed in.
pub fn require_group(user: Option<&SessionUser>, group: &str) -> Result<(), AuthorizationError> {
    match user {
        Some(u) if u.groups.contains(group) => Ok(()),
        _ => Err(AuthorizationError::GroupRequired {
            group: group.to_string(),
        }),
    }
}

/// Passes when the profile is complete or the first-time bypass is present.
///
/// # Errors
///
/// Returns `ProfileIncomplete` carrying the user id to redirect to.
pub fn require_complete_profile(ctx: &GuardContext<'_>) -> Result<(), AuthorizationError> {
    if ctx.first_time || ctx.user.is_some_and(|u| u.profile_completed) {
        return Ok(());
    }
    Err(AuthorizationError::ProfileIncomplete {
        user_id: ctx.user.map(|u| u.id),
    })
}

/// A single guard in a chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Guard {
    Auth,
    FederatedAuth,
    Role(Role),
    Group(String),
    CompleteProfile,
}

impl Guard {
    /// Evaluates this guard.
    ///
    /// # Errors
    ///
    /// Returns the guard's authorization error on failure.
    pub fn check(&self, ctx: &GuardContext<'_>) -> Result<(), AuthorizationError> {
        match self {
            Self::Auth => require_auth(ctx.user).map(|_| ()),
            Self::FederatedAuth => require_federated_auth(ctx.user).map(|_| ()),
            Self::Role(role) => require_role(ctx.user, *role),
            Self::Group(group) => require_group(ctx.user, group),
            Self::CompleteProfile => require_complete_profile(ctx),
        }
    }
}

/// An ordered list of guards.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GuardChain {
    guards: Vec<Guard>,
}

impl GuardChain {
    /// Creates an empty chain, which admits everyone.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an arbitrary guard.
    #[must_use]
    pub fn then(mut self, guard: Guard) -> Self {
        self.guards.push(guard);
        self
    }

    #[must_use]
    pub fn require_auth(self) -> Self {
        self.then(Guard::Auth)
    }

    #[must_use]
    pub fn require_federated_auth(self) -> Self {
        self.then(Guard::FederatedAuth)
    }

    #[must_use]
    pub fn require_role(self, role: Role) -> Self {
        self.then(Guard::Role(role))
    }

    #[must_use]
    pub fn require_group(self, group: impl Into<String>) -> Self {
        self.then(Guard::Group(group.into()))
    }

    #[must_use]
    pub fn require_complete_profile(self) -> Self {
        self.then(Guard::CompleteProfile)
    }

    /// Returns the guards in evaluation order.
    #[must_use]
    pub fn guards(&self) -> &[Guard] {
        &self.guards
    }

    /// Runs every guard in order, stopping at the first failure.
    ///
    /// # Errors
    ///
    /// Returns the first failing guard's error.
    pub fn check(&self, ctx: &GuardContext<'_>) -> Result<(), AuthorizationError> {
        self.guards.iter().try_for_each(|guard| guard.check(ctx))
    }
}
