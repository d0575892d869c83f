//! Product snapshots stored in cart lines.

use serde::{Deserialize, Serialize};

use crate::{Price, ProductId};

/// The product data a cart line carries around.
///
/// A snapshot is taken when the product is added to the cart and is never
/// refreshed from the catalog; price changes only show up once the backend
/// cart is adopted again. Fields this client does not know about are kept in
/// `extra` so records written by other clients survive a load/save cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductSnapshot {
    /// Backend product ID.
    pub id: ProductId,
    /// Display name.
    pub name: String,
    /// Unit price.
    pub price: Price,
    /// Image URL, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    /// URL slug, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub slug: Option<String>,
    /// Unrecognized fields, passed through untouched.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl ProductSnapshot {
    /// Create a snapshot with only the required fields.
    #[must_use]
    pub fn new(id: ProductId, name: impl Into<String>, price: Price) -> Self {
        Self {
            id,
            name: name.into(),
            price,
            image: None,
            slug: None,
            extra: serde_json::Map::new(),
        }
    }
}
