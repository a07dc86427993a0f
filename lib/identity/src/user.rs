//! Local user records.
//!
//! A [`User`] is the marketplace's durable view of a person. Federated
//! accounts are keyed by the provider's subject; accounts created before
//! federation are matched by email and linked on their first federated login.

use bazaar_core::{CartId, ProductId, StoreId, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::claims::IdentityClaims;
use crate::role::Role;

/// Avatar assigned to accounts created through federation.
pub const DEFAULT_AVATAR: &str = "/images/users/default-avatar-1.jpeg";

/// A persisted marketplace account.
///
/// `external_subject` is written only through [`User::link_external_subject`],
/// which refuses to replace an existing link.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    /// Provider subject this account is federated with.
    pub external_subject: Option<String>,
    pub email: String,
    pub display_name: String,
    /// National number without the `+1` country code.
    pub phone: Option<String>,
    pub country: Option<String>,
    pub city: Option<String>,
    pub address: Option<String>,
    pub zip: Option<String>,
    pub role: Role,
    pub email_verified: bool,
    pub profile_completed: bool,
    pub profile_image: Option<String>,
    pub store_wishlist: Vec<StoreId>,
    pub product_wishlist: Vec<ProductId>,
    pub cart: Option<CartId>,
    /// Whether a pre-federation password credential is still on file.
    pub has_local_password: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Returned when linking would replace an established provider subject.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubjectAlreadyLinked {
    pub existing: String,
}

impl User {
    /// Creates a local-only account, as registered before federation.
    #[must_use]
    pub fn new(email: impl Into<String>, display_name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: UserId::new(),
            external_subject: None,
            email: email.into(),
            display_name: display_name.into(),
            phone: None,
            country: None,
            city: None,
            address: None,
            zip: None,
            role: Role::Shopper,
            email_verified: false,
            profile_completed: false,
            profile_image: None,
            store_wishlist: Vec::new(),
            product_wishlist: Vec::new(),
            cart: None,
            has_local_password: false,
            created_at: now,
            updated_at: now,
        }
    }

    /// Creates a federated account from first-login claims.
    ///
    /// The profile is considered complete: the provider's data is enough to shop.
    #[must_use]
    pub fn from_claims(claims: &IdentityClaims) -> Self {
        let mut user = Self::new(claims.email.clone(), fallback_display_name(claims));
        user.external_subject = Some(claims.external_subject.clone());
        user.phone = claims.phone_number.as_deref().map(normalize_phone);
        user.address = claims.address.clone();
        user.email_verified = claims.email_verified;
        user.role = claims.role;
        user.profile_completed = true;
        user.profile_image = Some(DEFAULT_AVATAR.to_string());
        user
    }

    /// Overwrites provider-owned profile fields with fresh claims.
    ///
    /// Identity (id, subject) and application-owned state (cart, wishlists,
    /// location fields, completion flag) are left untouched.
    pub fn refresh_from_claims(&mut self, claims: &IdentityClaims) {
        if let Some(name) = claims.display_name.as_deref() {
            self.display_name = name.to_string();
        }
        self.email = claims.email.clone();
        if let Some(phone) = claims.phone_number.as_deref() {
            self.phone = Some(normalize_phone(phone));
        }
        if let Some(address) = claims.address.as_deref() {
            self.address = Some(address.to_string());
        }
        self.email_verified = claims.email_verified;
        self.role = claims.role;
        self.updated_at = Utc::now();
    }

    /// Federates a pre-existing account with the provider subject in `claims`.
    ///
    /// Federation supersedes local authentication, so any local password is dropped.
    ///
    /// # Errors
    ///
    /// Returns [`SubjectAlreadyLinked`] if the account is already federated
    /// with a different subject.
    pub fn link_external_subject(
        &mut self,
        claims: &IdentityClaims,
    ) -> Result<(), SubjectAlreadyLinked> {
        match self.external_subject.as_deref() {
            Some(existing) if existing != claims.external_subject => {
                return Err(SubjectAlreadyLinked {
                    existing: existing.to_string(),
                });
            }
            Some(_) => {}
            None => self.external_subject = Some(claims.external_subject.clone()),
        }
        self.email_verified = claims.email_verified;
        self.role = claims.role;
        self.has_local_password = false;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Returns true when every shipping/contact field is filled in.
    #[must_use]
    pub fn is_profile_complete(&self) -> bool {
        [&self.phone, &self.country, &self.city, &self.address, &self.zip]
            .into_iter()
            .all(|field| field.as_deref().is_some_and(|v| !v.trim().is_empty()))
    }
}

/// Strips the North American `+1` country code, which the storefront stores implicitly.
#[must_use]
pub fn normalize_phone(raw: &str) -> String {
    let trimmed = raw.trim();
    trimmed.strip_prefix("+1").unwrap_or(trimmed).to_string()
}

fn fallback_display_name(claims: &IdentityClaims) -> String {
    claims.display_name.clone().unwrap_or_else(|| {
        claims
            .email
            .split('@')
            .next()
            .unwrap_or_default()
            .to_string()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn claims() -> IdentityClaims {
        IdentityClaims::new("sub-1", "a@x.com")
            .with_display_name("Alice")
            .with_phone_number("+15551234567")
            .with_address("1 Main St")
            .with_email_verified(true)
    }

    #[test]
    fn from_claims_builds_complete_federated_account() {
        let user = User::from_claims(&claims());

        assert!(user.id.to_string().starts_with("usr_"));
        assert_eq!(user.external_subject.as_deref(), Some("sub-1"));
        assert_eq!(user.email, "a@x.com");
        assert_eq!(user.display_name, "Alice");
        assert_eq!(user.phone.as_deref(), Some("5551234567"));
        assert_eq!(user.role, Role::Shopper);
        assert!(user.profile_completed);
        assert!(user.email_verified);
        assert_eq!(user.profile_image.as_deref(), Some(DEFAULT_AVATAR));
        assert!(user.cart.is_none());
        assert!(!user.has_local_password);
    }

    #[test]
    fn from_claims_without_name_uses_email_local_part() {
        let user = User::from_claims(&IdentityClaims::new("sub-1", "bob@x.com"));
        assert_eq!(user.display_name, "bob");
    }

    #[test]
    fn refresh_updates_provider_fields_only() {
        let mut user = User::from_claims(&claims());
        let cart = CartId::new();
        user.cart = Some(cart);
        user.city = Some("Springfield".to_string());
        let id = user.id;

        let fresh = IdentityClaims::new("sub-1", "new@x.com")
            .with_display_name("Alice B")
            .with_groups(["store_owner"]);
        user.refresh_from_claims(&fresh);

        assert_eq!(user.id, id);
        assert_eq!(user.email, "new@x.com");
        assert_eq!(user.display_name, "Alice B");
        assert_eq!(user.role, Role::StoreOwner);
        assert!(!user.email_verified);
        assert_eq!(user.cart, Some(cart));
        assert_eq!(user.city.as_deref(), Some("Springfield"));
        // Absent claims keep the stored value.
        assert_eq!(user.phone.as_deref(), Some("5551234567"));
    }

    #[test]
    fn refresh_downgrades_role() {
        let mut user = User::from_claims(&claims().with_groups(["admin"]));
        assert_eq!(user.role, Role::Admin);

        user.refresh_from_claims(&claims());
        assert_eq!(user.role, Role::Shopper);
    }

    #[test]
    fn link_sets_subject_and_drops_password() {
        let mut user = User::new("a@x.com", "Alice");
        user.has_local_password = true;

        user.link_external_subject(&IdentityClaims::new("sub-2", "a@x.com").with_email_verified(true))
            .expect("link");

        assert_eq!(user.external_subject.as_deref(), Some("sub-2"));
        assert!(user.email_verified);
        assert!(!user.has_local_password);
    }

    #[test]
    fn link_never_replaces_existing_subject() {
        let mut user = User::from_claims(&claims());

        let err = user
            .link_external_subject(&IdentityClaims::new("sub-9", "a@x.com"))
            .expect_err("must not relink");

        assert_eq!(err.existing, "sub-1");
        assert_eq!(user.external_subject.as_deref(), Some("sub-1"));
    }

    #[test]
    fn link_is_idempotent_for_same_subject() {
        let mut user = User::from_claims(&claims());
        user.link_external_subject(&claims()).expect("same subject");
        assert_eq!(user.external_subject.as_deref(), Some("sub-1"));
    }

    #[test]
    fn profile_completeness_requires_all_fields() {
        let mut user = User::new("a@x.com", "Alice");
        assert!(!user.is_profile_complete());

        user.phone = Some("5551234567".to_string());
        user.country = Some("USA".to_string());
        user.city = Some("Springfield".to_string());
        user.address = Some("1 Main St".to_string());
        user.zip = Some("   ".to_string());
        assert!(!user.is_profile_complete());

        user.zip = Some("12345".to_string());
        assert!(user.is_profile_complete());
    }

    #[test]
    fn normalize_phone_strips_us_country_code() {
        assert_eq!(normalize_phone("+15551234567"), "5551234567");
        assert_eq!(normalize_phone("+447700900123"), "+447700900123");
        assert_eq!(normalize_phone(" 5551234567 "), "5551234567");
    }
}
