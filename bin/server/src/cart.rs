//! Cart badge endpoint.
//!
//! Cart contents belong to the checkout service; this only reports how many
//! items the signed-in user has, for the header badge.

use axum::{Json, extract::State};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::warn;

use crate::auth::{AppState, OptionalAuth};

/// Response body of `GET /api/cart/count`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartCount {
    pub count: u64,
}

/// Returns the total item quantity in the user's cart; 0 when signed out or on failure.
pub async fn cart_count(
    State(state): State<Arc<AppState>>,
    OptionalAuth(session): OptionalAuth,
) -> Json<CartCount> {
    let Some(session) = session else {
        return Json(CartCount { count: 0 });
    };

    let count = state
        .carts
        .item_count(session.user().id)
        .await
        .unwrap_or_else(|e| {
            warn!(user_id = %session.user().id, error = %e, "failed to count cart items");
            0
        });

    Json(CartCount { count })
}
