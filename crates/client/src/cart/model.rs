//! Cart lines and totals.

use std::collections::BTreeMap;

use cartwheel_core::{Price, ProductId, ProductSnapshot};
use serde::{Deserialize, Serialize};

use crate::gateway::RemoteCartLine;

/// A product and how many of it are in the cart.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CartLine {
    pub product: ProductSnapshot,
    pub quantity: u32,
}

impl CartLine {
    /// `quantity` x unit price.
    #[must_use]
    pub fn subtotal(&self) -> Price {
        self.product.price.times(self.quantity)
    }
}

/// Result of [`Cart::add`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddOutcome {
    /// A new line was appended.
    Added,
    /// An existing line's quantity was increased.
    Incremented,
}

/// A local edit, kept so it can be applied again on top of an adopted cart.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum CartEdit {
    Add(ProductSnapshot, u32),
    Remove(ProductId),
    SetQuantity(ProductId, u32),
    Clear,
}

impl CartEdit {
    /// Apply the edit to `cart`. Edits naming a missing product do nothing.
    pub(crate) fn apply_to(&self, cart: &mut Cart) {
        match self {
            Self::Add(product, quantity) => {
                cart.add(product.clone(), *quantity);
            }
            Self::Remove(id) => {
                cart.remove(*id);
            }
            Self::SetQuantity(id, quantity) => {
                cart.set_quantity(*id, *quantity);
            }
            Self::Clear => cart.clear(),
        }
    }
}

/// Ordered cart lines, at most one per product, every quantity at least 1.
///
/// Persisted as a JSON list of lines. Lists written by other clients are
/// normalized on load: zero quantities are dropped and duplicate products
/// merged into the first occurrence.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "Vec<CartLine>", into = "Vec<CartLine>")]
pub struct Cart {
    lines: Vec<CartLine>,
}

impl Cart {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a cart from backend lines.
    #[must_use]
    pub fn from_remote(lines: Vec<RemoteCartLine>) -> Self {
        lines
            .into_iter()
            .map(|line| CartLine {
                product: line.product,
                quantity: line.quantity,
            })
            .collect::<Vec<_>>()
            .into()
    }

    #[must_use]
    pub fn lines(&self) -> &[CartLine] {
        &self.lines
    }

    #[must_use]
    pub fn get(&self, id: ProductId) -> Option<&CartLine> {
        self.lines.iter().find(|line| line.product.id == id)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Sum of quantities.
    #[must_use]
    pub fn total_items(&self) -> u32 {
        self.lines
            .iter()
            .fold(0_u32, |total, line| total.saturating_add(line.quantity))
    }

    /// Sum of line subtotals.
    #[must_use]
    pub fn total_price(&self) -> Price {
        self.lines.iter().map(CartLine::subtotal).sum()
    }

    /// Product to quantity, as the backend should hold it.
    #[must_use]
    pub fn quantities(&self) -> BTreeMap<ProductId, u32> {
        self.lines
            .iter()
            .map(|line| (line.product.id, line.quantity))
            .collect()
    }

    /// Add `quantity` units of `product`. A zero quantity adds one unit.
    pub fn add(&mut self, product: ProductSnapshot, quantity: u32) -> AddOutcome {
        let quantity = quantity.max(1);
        if let Some(line) = self.line_mut(product.id) {
            line.quantity = line.quantity.saturating_add(quantity);
            return AddOutcome::Incremented;
        }
        self.lines.push(CartLine { product, quantity });
        AddOutcome::Added
    }

    /// Remove a product's line, returning it.
    pub fn remove(&mut self, id: ProductId) -> Option<CartLine> {
        let index = self.lines.iter().position(|line| line.product.id == id)?;
        Some(self.lines.remove(index))
    }

    /// Set the quantity of an existing line. Zero removes the line.
    ///
    /// Returns `false` if the product is not in the cart.
    pub fn set_quantity(&mut self, id: ProductId, quantity: u32) -> bool {
        if quantity == 0 {
            return self.remove(id).is_some();
        }
        match self.line_mut(id) {
            Some(line) => {
                line.quantity = quantity;
                true
            }
            None => false,
        }
    }

    pub fn clear(&mut self) {
        self.lines.clear();
    }

    fn line_mut(&mut self, id: ProductId) -> Option<&mut CartLine> {
        self.lines.iter_mut().find(|line| line.product.id == id)
    }
}

impl From<Vec<CartLine>> for Cart {
    fn from(lines: Vec<CartLine>) -> Self {
        let mut cart = Self::new();
        for line in lines.into_iter().filter(|line| line.quantity > 0) {
            if let Some(existing) = cart.line_mut(line.product.id) {
                existing.quantity = existing.quantity.saturating_add(line.quantity);
            } else {
                cart.lines.push(line);
            }
        }
        cart
    }
}

impl From<Cart> for Vec<CartLine> {
    fn from(cart: Cart) -> Self {
        cart.lines
    }
}
