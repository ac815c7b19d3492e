//! Cart domain types shared by both stores

use std::collections::HashSet;
use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use linkdb_core::{Error, Result, Value};
use linkdb_engine::{FromRow, RowView};

/// Cart identifier
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CartId(String);

impl CartId {
    /// Wrap an existing identifier
    pub fn new(id: impl Into<String>) -> Self {
        CartId(id.into())
    }

    /// Fresh random identifier
    pub fn generate() -> Self {
        CartId(Uuid::new_v4().to_string())
    }

    /// The identifier text
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CartId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CartId {
    fn from(id: &str) -> Self {
        CartId::new(id)
    }
}

impl From<&CartId> for Value {
    fn from(id: &CartId) -> Self {
        Value::from(id.as_str())
    }
}

/// Product identifier
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProductId(String);

impl ProductId {
    /// Wrap an existing identifier
    pub fn new(id: impl Into<String>) -> Self {
        ProductId(id.into())
    }

    /// The identifier text
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ProductId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ProductId {
    fn from(id: &str) -> Self {
        ProductId::new(id)
    }
}

impl From<&ProductId> for Value {
    fn from(id: &ProductId) -> Self {
        Value::from(id.as_str())
    }
}

/// Something a cart can hold
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    /// Identifier
    pub id: ProductId,
    /// Display name
    pub name: String,
    /// Price in cents
    pub price: i64,
}

impl Product {
    /// Create a product
    pub fn new(id: impl Into<String>, name: impl Into<String>, price: i64) -> Self {
        Product {
            id: ProductId::new(id),
            name: name.into(),
            price,
        }
    }
}

impl FromRow for Product {
    fn from_row(row: &RowView<'_>) -> Result<Self> {
        Ok(Product {
            id: ProductId::new(row.get_str("products.id")?),
            name: row.get_str("products.name")?.to_string(),
            price: row.get_int("products.price")?,
        })
    }
}

/// A product reference with a quantity
///
/// Serialized as `{"product_id": ..., "quantity": ...}` inside the JSON
/// variant's item array.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartItem {
    /// Referenced product
    pub product_id: ProductId,
    /// How many
    pub quantity: i64,
}

impl CartItem {
    /// Create an item
    pub fn new(product_id: impl Into<String>, quantity: i64) -> Self {
        CartItem {
            product_id: ProductId::new(product_id),
            quantity,
        }
    }
}

/// Reject items a cart cannot hold
pub(crate) fn check_items(items: &[CartItem]) -> Result<()> {
    let mut seen = HashSet::with_capacity(items.len());
    for item in items {
        if item.quantity < 1 {
            return Err(Error::InvalidOperation(format!(
                "quantity of {} must be at least 1, got {}",
                item.product_id, item.quantity
            )));
        }
        // One line per product in either layout
        if !seen.insert(&item.product_id) {
            return Err(Error::InvalidOperation(format!(
                "product {} appears more than once",
                item.product_id
            )));
        }
    }
    Ok(())
}

/// A cart and everything in it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartWithItems {
    /// Cart identifier
    pub id: CartId,
    /// Items; insertion order in the JSON store, product order in the
    /// relational store
    pub items: Vec<CartItem>,
}

impl CartWithItems {
    /// A cart with no items
    pub fn empty(id: CartId) -> Self {
        CartWithItems {
            id,
            items: Vec::new(),
        }
    }
}

/// One row of the join form: an item with its product resolved
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CartLine {
    /// Product details
    pub product: Product,
    /// How many
    pub quantity: i64,
}

impl CartLine {
    /// `price * quantity`
    pub fn total(&self) -> i64 {
        self.product.price.saturating_mul(self.quantity)
    }
}

impl FromRow for CartLine {
    fn from_row(row: &RowView<'_>) -> Result<Self> {
        Ok(CartLine {
            product: Product::from_row(row)?,
            quantity: row.get_int("cart_items.quantity")?,
        })
    }
}
