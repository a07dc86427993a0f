//! Postgres-backed user, cart and session stores.

use async_trait::async_trait;
use bazaar_core::{CartId, UserId};
use bazaar_identity::{
    CartStore, HandshakeState, InsertOutcome, Role, Session, SessionId, SessionStore,
    SessionTokens, SessionUser, StoreError, User, UserStore,
};
use chrono::{DateTime, Duration, Utc};
use rootcause::prelude::Report;
use sqlx::{FromRow, PgPool};
use std::str::FromStr;

const USER_COLUMNS: &str = r#"
    u.id, u.external_subject, u.email, u.display_name, u.phone, u.country, u.city,
    u.address, u.zip, u.role, u.email_verified, u.profile_completed, u.profile_image,
    u.store_wishlist, u.product_wishlist, u.password_hash IS NOT NULL AS has_local_password,
    c.id AS cart_id, u.created_at, u.updated_at
"#;

fn database(e: sqlx::Error) -> Report<StoreError> {
    StoreError::Database {
        details: e.to_string(),
    }
    .into()
}

fn corrupt(details: impl Into<String>) -> Report<StoreError> {
    StoreError::Corrupt {
        details: details.into(),
    }
    .into()
}

fn parse<T>(field: &str, value: &str) -> Result<T, Report<StoreError>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    value
        .parse()
        .map_err(|e| corrupt(format!("invalid {field} '{value}': {e}")))
}

fn is_unique_violation(e: &sqlx::Error) -> bool {
    matches!(e, sqlx::Error::Database(db) if db.is_unique_violation())
}

/// Row type for user queries.
#[derive(FromRow)]
struct UserRow {
    id: String,
    external_subject: Option<String>,
    email: String,
    display_name: String,
    phone: Option<String>,
    country: Option<String>,
    city: Option<String>,
    address: Option<String>,
    zip: Option<String>,
    role: String,
    email_verified: bool,
    profile_completed: bool,
    profile_image: Option<String>,
    store_wishlist: serde_json::Value,
    product_wishlist: serde_json::Value,
    has_local_password: bool,
    cart_id: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl UserRow {
    fn try_into_user(self) -> Result<User, Report<StoreError>> {
        let store_wishlist = serde_json::from_value(self.store_wishlist)
            .map_err(|e| corrupt(format!("invalid store wishlist for '{}': {e}", self.id)))?;
        let product_wishlist = serde_json::from_value(self.product_wishlist)
            .map_err(|e| corrupt(format!("invalid product wishlist for '{}': {e}", self.id)))?;
        let cart = self
            .cart_id
            .as_deref()
            .map(|cart| parse::<CartId>("cart id", cart))
            .transpose()?;

        Ok(User {
            id: parse("user id", &self.id)?,
            external_subject: self.external_subject,
            email: self.email,
            display_name: self.display_name,
            phone: self.phone,
            country: self.country,
            city: self.city,
            address: self.address,
            zip: self.zip,
            role: parse::<Role>("role", &self.role)?,
            email_verified: self.email_verified,
            profile_completed: self.profile_completed,
            profile_image: self.profile_image,
            store_wishlist,
            product_wishlist,
            cart,
            has_local_password: self.has_local_password,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

/// Row type for session queries.
#[derive(FromRow)]
struct SessionRow {
    id: String,
    user_snapshot: serde_json::Value,
    id_token: Option<String>,
    access_token: Option<String>,
    refresh_token: Option<String>,
    created_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
}

impl SessionRow {
    fn try_into_session(self) -> Result<Session, Report<StoreError>> {
        let user: SessionUser = serde_json::from_value(self.user_snapshot)
            .map_err(|e| corrupt(format!("invalid user snapshot for session: {e}")))?;
        let tokens = self.access_token.map(|access_token| SessionTokens {
            id_token: self.id_token.unwrap_or_default(),
            access_token,
            refresh_token: self.refresh_token,
        });

        Ok(Session::from_parts(
            SessionId::new(self.id),
            user,
            tokens,
            self.created_at,
            self.expires_at,
        ))
    }
}

#[derive(FromRow)]
struct HandshakeRow {
    state: String,
    nonce: String,
    code_verifier: String,
    created_at: DateTime<Utc>,
}

impl From<HandshakeRow> for HandshakeState {
    fn from(row: HandshakeRow) -> Self {
        Self {
            state: row.state,
            nonce: row.nonce,
            code_verifier: row.code_verifier,
            created_at: row.created_at,
        }
    }
}

/// Stores backed by a Postgres pool.
///
/// Email and subject uniqueness come from the `users` constraints, and the
/// one-cart-per-user rule from the unique `carts.user_id`.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Creates a new store.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn find_user(
        &self,
        predicate: &str,
        value: &str,
    ) -> Result<Option<User>, Report<StoreError>> {
        let sql = format!(
            "SELECT {USER_COLUMNS} FROM users u LEFT JOIN carts c ON c.user_id = u.id WHERE {predicate} = $1"
        );
        let row: Option<UserRow> = sqlx::query_as(&sql)
            .bind(value)
            .fetch_optional(&self.pool)
            .await
            .map_err(database)?;

        row.map(UserRow::try_into_user).transpose()
    }

    async fn user_exists(&self, id: UserId) -> Result<bool, Report<StoreError>> {
        sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM users WHERE id = $1)")
            .bind(id.to_string())
            .fetch_one(&self.pool)
            .await
            .map_err(database)
    }
}

fn wishlist_json<T: serde::Serialize>(items: &[T]) -> Result<serde_json::Value, Report<StoreError>> {
    serde_json::to_value(items).map_err(|e| corrupt(format!("unserializable wishlist: {e}")))
}

#[async_trait]
impl UserStore for PgStore {
    async fn find_by_subject(&self, subject: &str) -> Result<Option<User>, Report<StoreError>> {
        self.find_user("u.external_subject", subject).await
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<User>, Report<StoreError>> {
        self.find_user("u.email", email).await
    }

    async fn find_by_id(&self, id: UserId) -> Result<Option<User>, Report<StoreError>> {
        self.find_user("u.id", &id.to_string()).await
    }

    async fn insert_if_absent(&self, user: &User) -> Result<InsertOutcome, Report<StoreError>> {
        let inserted: Option<String> = sqlx::query_scalar(
            r#"
            INSERT INTO users (
                id, external_subject, email, display_name, phone, country, city, address, zip,
                role, email_verified, profile_completed, profile_image,
                store_wishlist, product_wishlist, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17)
            ON CONFLICT DO NOTHING
            RETURNING id
            "#,
        )
        .bind(user.id.to_string())
        .bind(&user.external_subject)
        .bind(&user.email)
        .bind(&user.display_name)
        .bind(&user.phone)
        .bind(&user.country)
        .bind(&user.city)
        .bind(&user.address)
        .bind(&user.zip)
        .bind(user.role.as_str())
        .bind(user.email_verified)
        .bind(user.profile_completed)
        .bind(&user.profile_image)
        .bind(wishlist_json(&user.store_wishlist)?)
        .bind(wishlist_json(&user.product_wishlist)?)
        .bind(user.created_at)
        .bind(user.updated_at)
        .fetch_optional(&self.pool)
        .await
        .map_err(database)?;

        Ok(match inserted {
            Some(_) => InsertOutcome::Inserted,
            None => InsertOutcome::Conflict,
        })
    }

    async fn update(&self, user: &User) -> Result<(), Report<StoreError>> {
        let result = sqlx::query(
            r#"
            UPDATE users
            SET email = $2, display_name = $3, phone = $4, country = $5, city = $6,
                address = $7, zip = $8, role = $9, email_verified = $10,
                profile_completed = $11, profile_image = $12,
                store_wishlist = $13, product_wishlist = $14, updated_at = $15
            WHERE id = $1
            "#,
        )
        .bind(user.id.to_string())
        .bind(&user.email)
        .bind(&user.display_name)
        .bind(&user.phone)
        .bind(&user.country)
        .bind(&user.city)
        .bind(&user.address)
        .bind(&user.zip)
        .bind(user.role.as_str())
        .bind(user.email_verified)
        .bind(user.profile_completed)
        .bind(&user.profile_image)
        .bind(wishlist_json(&user.store_wishlist)?)
        .bind(wishlist_json(&user.product_wishlist)?)
        .bind(user.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                StoreError::Conflict {
                    entity: "user",
                    field: "email",
                }
                .into()
            } else {
                database(e)
            }
        })?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound {
                entity: "user",
                id: user.id.to_string(),
            }
            .into());
        }
        Ok(())
    }

    async fn link_subject(&self, user: &User) -> Result<bool, Report<StoreError>> {
        let result = sqlx::query(
            r#"
            UPDATE users
            SET external_subject = $2, email_verified = $3, role = $4,
                password_hash = NULL, updated_at = $5
            WHERE id = $1 AND (external_subject IS NULL OR external_subject = $2)
            "#,
        )
        .bind(user.id.to_string())
        .bind(&user.external_subject)
        .bind(user.email_verified)
        .bind(user.role.as_str())
        .bind(user.updated_at)
        .execute(&self.pool)
        .await;

        match result {
            Ok(done) if done.rows_affected() > 0 => Ok(true),
            Ok(_) if self.user_exists(user.id).await? => Ok(false),
            Ok(_) => Err(StoreError::NotFound {
                entity: "user",
                id: user.id.to_string(),
            }
            .into()),
            // The subject already belongs to another account
            Err(e) if is_unique_violation(&e) => Ok(false),
            Err(e) => Err(database(e)),
        }
    }
}

#[async_trait]
impl CartStore for PgStore {
    async fn ensure_cart(&self, user_id: UserId) -> Result<CartId, Report<StoreError>> {
        sqlx::query(
            r#"
            INSERT INTO carts (id, user_id, created_at)
            VALUES ($1, $2, NOW())
            ON CONFLICT (user_id) DO NOTHING
            "#,
        )
        .bind(CartId::new().to_string())
        .bind(user_id.to_string())
        .execute(&self.pool)
        .await
        .map_err(database)?;

        let id: String = sqlx::query_scalar("SELECT id FROM carts WHERE user_id = $1")
            .bind(user_id.to_string())
            .fetch_one(&self.pool)
            .await
            .map_err(database)?;

        parse("cart id", &id)
    }

    async fn item_count(&self, user_id: UserId) -> Result<u64, Report<StoreError>> {
        let count: i64 = sqlx::query_scalar(
            r#"
            SELECT COALESCE(SUM(ci.quantity), 0)::BIGINT
            FROM cart_items ci
            JOIN carts c ON c.id = ci.cart_id
            WHERE c.user_id = $1
            "#,
        )
        .bind(user_id.to_string())
        .fetch_one(&self.pool)
        .await
        .map_err(database)?;

        u64::try_from(count).map_err(|_| corrupt(format!("negative cart quantity {count}")))
    }
}

#[async_trait]
impl SessionStore for PgStore {
    async fn put_handshake(
        &self,
        id: &SessionId,
        handshake: &HandshakeState,
    ) -> Result<(), Report<StoreError>> {
        sqlx::query(
            r#"
            INSERT INTO auth_handshakes (session_id, state, nonce, code_verifier, created_at)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (session_id) DO UPDATE
            SET state = EXCLUDED.state, nonce = EXCLUDED.nonce,
                code_verifier = EXCLUDED.code_verifier, created_at = EXCLUDED.created_at
            "#,
        )
        .bind(id.as_str())
        .bind(&handshake.state)
        .bind(&handshake.nonce)
        .bind(&handshake.code_verifier)
        .bind(handshake.created_at)
        .execute(&self.pool)
        .await
        .map_err(database)?;

        Ok(())
    }

    async fn take_handshake(
        &self,
        id: &SessionId,
    ) -> Result<Option<HandshakeState>, Report<StoreError>> {
        let row: Option<HandshakeRow> = sqlx::query_as(
            r#"
            DELETE FROM auth_handshakes
            WHERE session_id = $1
            RETURNING state, nonce, code_verifier, created_at
            "#,
        )
        .bind(id.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(database)?;

        Ok(row.map(HandshakeState::from))
    }

    async fn load(&self, id: &SessionId) -> Result<Option<Session>, Report<StoreError>> {
        let row: Option<SessionRow> = sqlx::query_as(
            r#"
            SELECT id, user_snapshot, id_token, access_token, refresh_token, created_at, expires_at
            FROM sessions
            WHERE id = $1 AND expires_at > NOW()
            "#,
        )
        .bind(id.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(database)?;

        row.map(SessionRow::try_into_session).transpose()
    }

    async fn save(&self, session: &Session) -> Result<(), Report<StoreError>> {
        let snapshot = serde_json::to_value(session.user())
            .map_err(|e| corrupt(format!("unserializable session user: {e}")))?;
        let tokens = session.tokens();

        sqlx::query(
            r#"
            INSERT INTO sessions (
                id, user_id, user_snapshot, id_token, access_token, refresh_token,
                created_at, expires_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (id) DO UPDATE
            SET user_snapshot = EXCLUDED.user_snapshot, id_token = EXCLUDED.id_token,
                access_token = EXCLUDED.access_token, refresh_token = EXCLUDED.refresh_token,
                expires_at = EXCLUDED.expires_at
            "#,
        )
        .bind(session.id().as_str())
        .bind(session.user().id.to_string())
        .bind(snapshot)
        .bind(tokens.map(|t| t.id_token.as_str()))
        .bind(tokens.map(|t| t.access_token.as_str()))
        .bind(tokens.and_then(|t| t.refresh_token.as_deref()))
        .bind(session.created_at())
        .bind(session.expires_at())
        .execute(&self.pool)
        .await
        .map_err(database)?;

        Ok(())
    }

    async fn destroy(&self, id: &SessionId) -> Result<(), Report<StoreError>> {
        let mut tx = self.pool.begin().await.map_err(database)?;

        sqlx::query("DELETE FROM sessions WHERE id = $1")
            .bind(id.as_str())
            .execute(&mut *tx)
            .await
            .map_err(database)?;
        sqlx::query("DELETE FROM auth_handshakes WHERE session_id = $1")
            .bind(id.as_str())
            .execute(&mut *tx)
            .await
            .map_err(database)?;

        tx.commit().await.map_err(database)
    }

    async fn delete_expired(&self, handshake_ttl: Duration) -> Result<u64, Report<StoreError>> {
        let sessions = sqlx::query("DELETE FROM sessions WHERE expires_at < NOW()")
            .execute(&self.pool)
            .await
            .map_err(database)?;
        let handshakes = sqlx::query("DELETE FROM auth_handshakes WHERE created_at < $1")
            .bind(Utc::now() - handshake_ttl)
            .execute(&self.pool)
            .await
            .map_err(database)?;

        Ok(sessions.rows_affected() + handshakes.rows_affected())
    }
}
