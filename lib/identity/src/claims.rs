//! Identity claims and the mapping from raw ID token payloads.
//!
//! The ID token payload is a free-form JSON object whose shape varies by
//! provider. [`IdentityClaims::from_payload`] is the only place that looks
//! at it; everything downstream works with the typed record.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;

use crate::error::AuthenticationError;
use crate::oidc::OidcConfig;
use crate::role::Role;

/// Identity asserted by the provider for one login.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityClaims {
    /// The `sub` claim, unique per provider account.
    pub external_subject: String,
    /// Email address.
    pub email: String,
    /// Display name, from `name`, then given/family name, then `preferred_username`.
    pub display_name: Option<String>,
    /// Phone number exactly as the provider sent it (E.164).
    pub phone_number: Option<String>,
    /// Postal address, flattened to a single line.
    pub address: Option<String>,
    /// Group memberships from the configured groups claim.
    pub groups: BTreeSet<String>,
    /// Role derived from `groups`.
    pub role: Role,
    /// Whether the provider verified the email address.
    pub email_verified: bool,
    /// Whether the provider verified the phone number.
    pub phone_verified: bool,
}

impl IdentityClaims {
    /// Creates claims with only the identifying fields set.
    #[must_use]
    pub fn new(external_subject: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            external_subject: external_subject.into(),
            email: email.into(),
            display_name: None,
            phone_number: None,
            address: None,
            groups: BTreeSet::new(),
            role: Role::Shopper,
            email_verified: false,
            phone_verified: false,
        }
    }

    /// Maps a verified ID token payload onto typed claims.
    ///
    /// # Errors
    ///
    /// Returns `MissingClaim` if `sub` or `email` is absent or empty.
    pub fn from_payload(payload: &Value, config: &OidcConfig) -> Result<Self, AuthenticationError> {
        let external_subject = non_empty_str(payload, "sub")
            .ok_or_else(|| AuthenticationError::MissingClaim {
                claim: "sub".to_string(),
            })?
            .to_string();
        let email = non_empty_str(payload, "email")
            .ok_or_else(|| AuthenticationError::MissingClaim {
                claim: "email".to_string(),
            })?
            .trim()
            .to_lowercase();

        let groups: BTreeSet<String> = payload
            .get(config.groups_claim())
            .and_then(Value::as_array)
            .map(|arr| {
                arr.iter()
                    .filter_map(|v| v.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default();
        let role = Role::from_groups(&groups, config.admin_group(), config.store_owner_group());

        Ok(Self {
            external_subject,
            email,
            display_name: display_name(payload),
            phone_number: non_empty_str(payload, "phone_number").map(str::to_string),
            address: address(payload),
            groups,
            role,
            email_verified: truthy(payload.get("email_verified")),
            phone_verified: truthy(payload.get("phone_number_verified")),
        })
    }

    /// Sets the display name.
    #[must_use]
    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = Some(name.into());
        self
    }

    /// Sets the phone number.
    #[must_use]
    pub fn with_phone_number(mut self, phone: impl Into<String>) -> Self {
        self.phone_number = Some(phone.into());
        self
    }

    /// Sets the address.
    #[must_use]
    pub fn with_address(mut self, address: impl Into<String>) -> Self {
        self.address = Some(address.into());
        self
    }

    /// Sets the groups and re-derives the role with the default group names.
    #[must_use]
    pub fn with_groups<I, S>(mut self, groups: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.groups = groups.into_iter().map(Into::into).collect();
        self.role = Role::from_groups(&self.groups, "admin", "store_owner");
        self
    }

    /// Marks the email as verified.
    #[must_use]
    pub fn with_email_verified(mut self, verified: bool) -> Self {
        self.email_verified = verified;
        self
    }
}

fn non_empty_str<'a>(payload: &'a Value, key: &str) -> Option<&'a str> {
    payload
        .get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.trim().is_empty())
}

fn display_name(payload: &Value) -> Option<String> {
    if let Some(name) = non_empty_str(payload, "name") {
        return Some(name.to_string());
    }
    let given = non_empty_str(payload, "given_name");
    let family = non_empty_str(payload, "family_name");
    match (given, family) {
        (Some(g), Some(f)) => return Some(format!("{g} {f}")),
        (Some(n), None) | (None, Some(n)) => return Some(n.to_string()),
        (None, None) => {}
    }
    non_empty_str(payload, "preferred_username").map(str::to_string)
}

// The standard `address` claim is an object; some providers send a plain string.
fn address(payload: &Value) -> Option<String> {
    match payload.get("address")? {
        Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
        Value::Object(obj) => obj
            .get("formatted")
            .and_then(Value::as_str)
            .filter(|s| !s.trim().is_empty())
            .map(str::to_string),
        _ => None,
    }
}

// Cognito sends verification flags as the strings "true"/"false".
fn truthy(value: Option<&Value>) -> bool {
    match value {
        Some(Value::Bool(b)) => *b,
        Some(Value::String(s)) => s.eq_ignore_ascii_case("true"),
        _ => false,
    }
}
