//! Reconciling provider identities with local accounts.
//!
//! On every successful login [`IdentitySync::find_or_create_user`] maps the
//! provider's subject onto exactly one local account:
//!
//! 1. an account already federated with the subject is refreshed;
//! 2. otherwise an account with the same email is linked to the subject;
//! 3. otherwise a new account is created.
//!
//! Concurrent first logins race on the store's uniqueness constraints.
//! The loser observes a conflict and re-reads the winner's record, so the
//! caller always gets the one surviving account.

use bazaar_core::UserId;
use rootcause::prelude::Report;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

use crate::claims::IdentityClaims;
use crate::error::{StoreError, SyncError};
use crate::store::{CartStore, InsertOutcome, UserStore};
use crate::user::User;

/// How a login was matched to its account.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncPath {
    /// The account was already federated with the subject.
    Existing,
    /// A pre-federation account was linked by email.
    Linked,
    /// A new account was created.
    Created,
}

/// The account a login resolved to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncOutcome {
    pub user: User,
    pub path: SyncPath,
}

/// Reconciles identity claims against the user and cart stores.
#[derive(Clone)]
pub struct IdentitySync {
    users: Arc<dyn UserStore>,
    carts: Arc<dyn CartStore>,
}

fn store_failure(report: Report<StoreError>) -> Report<SyncError> {
    let details = report.current_context().to_string();
    report.context(SyncError::Store { details })
}

impl IdentitySync {
    /// Creates a sync service over the given stores.
    #[must_use]
    pub fn new(users: Arc<dyn UserStore>, carts: Arc<dyn CartStore>) -> Self {
        Self { users, carts }
    }

    /// Returns the account for `claims`, creating or linking it as needed.
    ///
    /// The returned account always has a cart.
    ///
    /// # Errors
    ///
    /// Returns `SubjectMismatch` if the email belongs to an account federated
    /// with another subject, `ConflictUnresolved` if a lost creation race
    /// left nothing to re-read, and `Store` for storage failures.
    #[instrument(skip_all, fields(subject = %claims.external_subject))]
    pub async fn find_or_create_user(
        &self,
        claims: &IdentityClaims,
    ) -> Result<SyncOutcome, Report<SyncError>> {
        if let Some(outcome) = self.resolve_existing(claims).await? {
            return Ok(outcome);
        }

        let mut user = User::from_claims(claims);
        match self
            .users
            .insert_if_absent(&user)
            .await
            .map_err(store_failure)?
        {
            InsertOutcome::Inserted => {
                self.attach_cart(&mut user).await?;
                self.users.update(&user).await.map_err(store_failure)?;
                info!(user_id = %user.id, "created federated account");
                Ok(SyncOutcome {
                    user,
                    path: SyncPath::Created,
                })
            }
            InsertOutcome::Conflict => {
                debug!("account creation conflicted, re-reading");
                self.resolve_existing(claims).await?.ok_or_else(|| {
                    SyncError::ConflictUnresolved {
                        subject: claims.external_subject.clone(),
                    }
                    .into()
                })
            }
        }
    }

    /// Recomputes and stores whether the user's profile is complete.
    ///
    /// Returns the new flag, or `None` if the user does not exist.
    ///
    /// # Errors
    ///
    /// Returns `Store` if the user cannot be read or written.
    #[instrument(skip(self))]
    pub async fn refresh_profile_completion(
        &self,
        user_id: UserId,
    ) -> Result<Option<bool>, Report<SyncError>> {
        let Some(mut user) = self
            .users
            .find_by_id(user_id)
            .await
            .map_err(store_failure)?
        else {
            return Ok(None);
        };
        let complete = user.is_profile_complete();
        if user.profile_completed != complete {
            user.profile_completed = complete;
            self.users.update(&user).await.map_err(store_failure)?;
        }
        Ok(Some(complete))
    }

    async fn resolve_existing(
        &self,
        claims: &IdentityClaims,
    ) -> Result<Option<SyncOutcome>, Report<SyncError>> {
        if let Some(mut user) = self
            .users
            .find_by_subject(&claims.external_subject)
            .await
            .map_err(store_failure)?
        {
            let previous_email = user.email.clone();
            user.refresh_from_claims(claims);
            if user.email != previous_email && self.email_taken(&user).await? {
                warn!(user_id = %user.id, "provider email belongs to another account, keeping stored email");
                user.email = previous_email.clone();
            }
            self.attach_cart(&mut user).await?;
            if let Err(report) = self.users.update(&user).await {
                // Lost a race for the new address.
                if !matches!(report.current_context(), StoreError::Conflict { .. })
                    || user.email == previous_email
                {
                    return Err(store_failure(report));
                }
                warn!(user_id = %user.id, "provider email claimed concurrently, keeping stored email");
                user.email = previous_email;
                self.users.update(&user).await.map_err(store_failure)?;
            }
            return Ok(Some(SyncOutcome {
                user,
                path: SyncPath::Existing,
            }));
        }

        let Some(user) = self
            .users
            .find_by_email(&claims.email)
            .await
            .map_err(store_failure)?
        else {
            return Ok(None);
        };
        self.link(user, claims).await.map(Some)
    }

    async fn email_taken(&self, user: &User) -> Result<bool, Report<SyncError>> {
        let owner = self
            .users
            .find_by_email(&user.email)
            .await
            .map_err(store_failure)?;
        Ok(owner.is_some_and(|other| other.id != user.id))
    }

    async fn link(
        &self,
        mut user: User,
        claims: &IdentityClaims,
    ) -> Result<SyncOutcome, Report<SyncError>> {
        if let Err(e) = user.link_external_subject(claims) {
            warn!(user_id = %user.id, "email matches an account linked to another subject");
            return Err(SyncError::SubjectMismatch {
                email: claims.email.clone(),
                existing: e.existing,
            }
            .into());
        }
        let linked = self.users.link_subject(&user).await.map_err(store_failure)?;

        let mut user = self.reload(user.id).await?;
        if !linked {
            warn!(user_id = %user.id, "account was linked to another subject concurrently");
            return Err(SyncError::SubjectMismatch {
                email: claims.email.clone(),
                existing: user.external_subject.unwrap_or_default(),
            }
            .into());
        }

        if user.cart.is_none() {
            self.attach_cart(&mut user).await?;
            self.users.update(&user).await.map_err(store_failure)?;
        }
        info!(user_id = %user.id, "linked existing account to identity provider");
        Ok(SyncOutcome {
            user,
            path: SyncPath::Linked,
        })
    }

    async fn reload(&self, id: UserId) -> Result<User, Report<SyncError>> {
        self.users
            .find_by_id(id)
            .await
            .map_err(store_failure)?
            .ok_or_else(|| {
                store_failure(
                    StoreError::NotFound {
                        entity: "user",
                        id: id.to_string(),
                    }
                    .into(),
                )
            })
    }

    // Sets `user.cart`; the caller persists the record.
    async fn attach_cart(&self, user: &mut User) -> Result<(), Report<SyncError>> {
        let cart = self
            .carts
            .ensure_cart(user.id)
            .await
            .map_err(store_failure)?;
        user.cart = Some(cart);
        Ok(())
    }
}
