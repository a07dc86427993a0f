//! In-process stores.
//!
//! Used by tests and local development. Every operation holds a single
//! lock for its whole read-modify-write, which gives the same atomicity
//! the Postgres stores get from unique constraints.

use async_trait::async_trait;
use bazaar_core::{CartId, ProductId, UserId};
use chrono::{Duration, Utc};
use rootcause::prelude::Report;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use crate::error::StoreError;
use crate::session::{HandshakeState, Session, SessionId};
use crate::store::{CartStore, InsertOutcome, SessionStore, UserStore};
use crate::user::User;

#[derive(Debug)]
struct Cart {
    id: CartId,
    items: Vec<(ProductId, u64)>,
}

/// Users, carts and sessions held in memory.
#[derive(Debug, Default)]
pub struct MemoryStore {
    users: Mutex<HashMap<UserId, User>>,
    carts: Mutex<HashMap<UserId, Cart>>,
    handshakes: Mutex<HashMap<SessionId, HandshakeState>>,
    sessions: Mutex<HashMap<SessionId, Session>>,
}

fn lock<T>(mutex: &Mutex<T>) -> Result<MutexGuard<'_, T>, Report<StoreError>> {
    mutex.lock().map_err(|e| {
        StoreError::Database {
            details: e.to_string(),
        }
        .into()
    })
}

impl MemoryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of user records.
    ///
    /// # Errors
    ///
    /// Returns an error if the store lock is poisoned.
    pub fn user_count(&self) -> Result<usize, Report<StoreError>> {
        Ok(lock(&self.users)?.len())
    }

    /// Returns the number of carts.
    ///
    /// # Errors
    ///
    /// Returns an error if the store lock is poisoned.
    pub fn cart_count(&self) -> Result<usize, Report<StoreError>> {
        Ok(lock(&self.carts)?.len())
    }

    /// Adds `quantity` of a product to the user's cart, creating the cart if needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the store lock is poisoned.
    pub fn add_item(
        &self,
        user_id: UserId,
        product: ProductId,
        quantity: u64,
    ) -> Result<(), Report<StoreError>> {
        let mut carts = lock(&self.carts)?;
        carts
            .entry(user_id)
            .or_insert_with(|| Cart {
                id: CartId::new(),
                items: Vec::new(),
            })
            .items
            .push((product, quantity));
        Ok(())
    }
}

#[async_trait]
impl UserStore for MemoryStore {
    async fn find_by_subject(&self, subject: &str) -> Result<Option<User>, Report<StoreError>> {
        let users = lock(&self.users)?;
        Ok(users
            .values()
            .find(|u| u.external_subject.as_deref() == Some(subject))
            .cloned())
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<User>, Report<StoreError>> {
        let users = lock(&self.users)?;
        Ok(users.values().find(|u| u.email == email).cloned())
    }

    async fn find_by_id(&self, id: UserId) -> Result<Option<User>, Report<StoreError>> {
        Ok(lock(&self.users)?.get(&id).cloned())
    }

    async fn insert_if_absent(&self, user: &User) -> Result<InsertOutcome, Report<StoreError>> {
        let mut users = lock(&self.users)?;
        let taken = users.values().any(|existing| {
            existing.id == user.id
                || existing.email == user.email
                || (user.external_subject.is_some()
                    && existing.external_subject == user.external_subject)
        });
        if taken {
            return Ok(InsertOutcome::Conflict);
        }
        users.insert(user.id, user.clone());
        Ok(InsertOutcome::Inserted)
    }

    async fn update(&self, user: &User) -> Result<(), Report<StoreError>> {
        let mut users = lock(&self.users)?;
        if users
            .values()
            .any(|other| other.id != user.id && other.email == user.email)
        {
            return Err(StoreError::Conflict {
                entity: "user",
                field: "email",
            }
            .into());
        }
        let Some(stored) = users.get_mut(&user.id) else {
            return Err(StoreError::NotFound {
                entity: "user",
                id: user.id.to_string(),
            }
            .into());
        };
        let subject = stored.external_subject.clone();
        let has_local_password = stored.has_local_password;
        *stored = user.clone();
        stored.external_subject = subject;
        stored.has_local_password = has_local_password;
        Ok(())
    }

    async fn link_subject(&self, user: &User) -> Result<bool, Report<StoreError>> {
        let mut users = lock(&self.users)?;
        let subject_owner = users
            .values()
            .find(|u| u.id != user.id && u.external_subject == user.external_subject)
            .map(|u| u.id);
        if subject_owner.is_some() {
            return Ok(false);
        }
        let Some(stored) = users.get_mut(&user.id) else {
            return Err(StoreError::NotFound {
                entity: "user",
                id: user.id.to_string(),
            }
            .into());
        };
        match (&stored.external_subject, &user.external_subject) {
            (Some(existing), Some(new)) if existing != new => return Ok(false),
            _ => {}
        }
        stored.external_subject.clone_from(&user.external_subject);
        stored.email_verified = user.email_verified;
        stored.role = user.role;
        stored.has_local_password = false;
        stored.updated_at = user.updated_at;
        Ok(true)
    }
}

#[async_trait]
impl CartStore for MemoryStore {
    async fn ensure_cart(&self, user_id: UserId) -> Result<CartId, Report<StoreError>> {
        let mut carts = lock(&self.carts)?;
        let cart = carts.entry(user_id).or_insert_with(|| Cart {
            id: CartId::new(),
            items: Vec::new(),
        });
        Ok(cart.id)
    }

    async fn item_count(&self, user_id: UserId) -> Result<u64, Report<StoreError>> {
        let carts = lock(&self.carts)?;
        Ok(carts
            .get(&user_id)
            .map(|cart| cart.items.iter().map(|(_, qty)| qty).sum())
            .unwrap_or(0))
    }
}

#[async_trait]
impl SessionStore for MemoryStore {
    async fn put_handshake(
        &self,
        id: &SessionId,
        handshake: &HandshakeState,
    ) -> Result<(), Report<StoreError>> {
        lock(&self.handshakes)?.insert(id.clone(), handshake.clone());
        Ok(())
    }

    async fn take_handshake(
        &self,
        id: &SessionId,
    ) -> Result<Option<HandshakeState>, Report<StoreError>> {
        Ok(lock(&self.handshakes)?.remove(id))
    }

    async fn load(&self, id: &SessionId) -> Result<Option<Session>, Report<StoreError>> {
        let sessions = lock(&self.sessions)?;
        Ok(sessions.get(id).filter(|s| !s.is_expired()).cloned())
    }

    async fn save(&self, session: &Session) -> Result<(), Report<StoreError>> {
        lock(&self.sessions)?.insert(session.id().clone(), session.clone());
        Ok(())
    }

    async fn destroy(&self, id: &SessionId) -> Result<(), Report<StoreError>> {
        lock(&self.sessions)?.remove(id);
        lock(&self.handshakes)?.remove(id);
        Ok(())
    }

    async fn delete_expired(&self, handshake_ttl: Duration) -> Result<u64, Report<StoreError>> {
        let now = Utc::now();
        let mut removed = 0;

        let mut sessions = lock(&self.sessions)?;
        let before = sessions.len();
        sessions.retain(|_, s| s.expires_at() > now);
        removed += before - sessions.len();
        drop(sessions);

        let mut handshakes = lock(&self.handshakes)?;
        let before = handshakes.len();
        handshakes.retain(|_, h| !h.is_expired(handshake_ttl));
        removed += before - handshakes.len();

        Ok(removed as u64)
    }
}
