//! Identity federation, sessions and access guards for bazaar.
//!
//! This crate provides:
//! - Provider configuration and claim mapping (`OidcConfig`, `IdentityClaims`)
//! - Local accounts and their reconciliation with provider identities
//!   (`User`, `IdentitySync`)
//! - Login handshakes and authenticated sessions (`HandshakeState`, `Session`)
//! - Composable access guards (`GuardChain`)
//! - Storage traits with in-memory implementations
//!
//! # Access Control Model
//!
//! The identity provider is the source of truth for who a user is and which
//! groups they belong to. Groups map onto a single [`Role`] on every login,
//! so a removed group takes effect the next time the user signs in.
//!
//! # Example
//!
//! ```
//! use bazaar_identity::{GuardChain, GuardContext, IdentityClaims, Role, SessionUser, User};
//!
//! let claims = IdentityClaims::new("sub-123", "alice@example.com")
//!     .with_display_name("Alice")
//!     .with_groups(["store_owner"]);
//! let user = User::from_claims(&claims);
//! let session_user = SessionUser::materialize(&claims, &user);
//!
//! let owners_only = GuardChain::new()
//!     .require_auth()
//!     .require_role(Role::StoreOwner);
//! assert!(owners_only.check(&GuardContext::new(Some(&session_user))).is_ok());
//! assert!(owners_only.check(&GuardContext::new(None)).is_err());
//! ```

pub mod claims;
pub mod error;
pub mod guard;
pub mod memory;
pub mod oidc;
pub mod role;
pub mod session;
pub mod store;
pub mod sync;
pub mod user;

// Re-export main types at crate root
pub use claims::IdentityClaims;
pub use error::{AuthenticationError, AuthorizationError, StoreError, SyncError};
pub use guard::{Guard, GuardChain, GuardContext};
pub use memory::MemoryStore;
pub use oidc::{OidcConfig, OidcConfigBuilder};
pub use role::Role;
pub use session::{HandshakeState, Session, SessionId, SessionTokens, SessionUser};
pub use store::{CartStore, InsertOutcome, SessionStore, UserStore};
pub use sync::{IdentitySync, SyncOutcome, SyncPath};
pub use user::User;
