//! Marketplace roles derived from identity provider group membership.
//!
//! Every account holds exactly one role. The role is recomputed from the
//! provider's groups on each login, so removing a user from a group
//! downgrades them the next time they sign in.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Account role within the marketplace.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Regular customer browsing and buying.
    #[default]
    Shopper,
    /// Seller managing one or more stores.
    StoreOwner,
    /// Marketplace operator.
    Admin,
}

impl Role {
    /// Derives the role from group names.
    ///
    /// Admin wins over store owner; with neither group the account is a shopper.
    #[must_use]
    pub fn from_groups<I, S>(groups: I, admin_group: &str, store_owner_group: &str) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut role = Self::Shopper;
        for group in groups {
            match group.as_ref() {
                g if g == admin_group => return Self::Admin,
                g if g == store_owner_group => role = Self::StoreOwner,
                _ => {}
            }
        }
        role
    }

    /// Returns the stable storage name of the role.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Shopper => "shopper",
            Self::StoreOwner => "store_owner",
            Self::Admin => "admin",
        }
    }

    /// Returns true if this role has admin privileges.
    #[must_use]
    pub fn is_admin(&self) -> bool {
        matches!(self, Self::Admin)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when a stored role name is not recognised.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseRoleError(String);

impl fmt::Display for ParseRoleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown role: {}", self.0)
    }
}

impl std::error::Error for ParseRoleError {}

impl FromStr for Role {
    type Err = ParseRoleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "shopper" => Ok(Self::Shopper),
            // Accounts created before federation used a space.
            "store_owner" | "store owner" => Ok(Self::StoreOwner),
            "admin" => Ok(Self::Admin),
            other => Err(ParseRoleError(other.to_string())),
        }
    }
}
