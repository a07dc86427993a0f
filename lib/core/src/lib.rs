//! Core domain types shared across the bazaar marketplace.
//!
//! Identity records, carts, stores and products are referenced by
//! strongly-typed ULID identifiers defined here, so that a cart id can never
//! be passed where a user id is expected.

pub mod error;
pub mod id;

pub use error::Result;
pub use id::{CartId, ParseIdError, ProductId, StoreId, UserId};
