//! The operations both cart stores provide

use linkdb_core::Result;
use linkdb_engine::LiveView;

use crate::model::{CartId, CartItem, CartWithItems};

/// Cart storage, independent of how items are laid out
///
/// Implemented by [`RelationalCartStore`](crate::RelationalCartStore)
/// (join table) and [`JsonCartStore`](crate::JsonCartStore) (JSON-array
/// column).
pub trait CartStore: Send + Sync {
    /// Create an empty cart; a fresh id is generated when `id` is `None`
    ///
    /// # Errors
    /// `ConstraintViolation` if a cart with that id exists.
    fn create_cart(&self, id: Option<CartId>) -> Result<CartId>;

    /// Insert a cart, or replace it together with its items
    fn put_cart(&self, cart: &CartWithItems) -> Result<()>;

    /// Replace the items of an existing cart
    ///
    /// Readers see either the old or the new item set, never a mix.
    ///
    /// # Errors
    /// - `InvalidOperation` if the cart does not exist or a quantity is below 1
    /// - `ConstraintViolation` if a product does not exist
    fn replace_items(&self, id: &CartId, items: &[CartItem]) -> Result<()>;

    /// Remove a cart and its items; returns whether it existed
    fn delete_cart(&self, id: &CartId) -> Result<bool>;

    /// One cart with its items
    fn get_cart(&self, id: &CartId) -> Result<Option<CartWithItems>>;

    /// Every cart by id, including carts without items
    fn all_carts(&self) -> Result<Vec<CartWithItems>>;

    /// One cart, kept current; `None` while it does not exist
    fn watch_cart(&self, id: &CartId) -> Result<LiveView<Option<CartWithItems>>>;

    /// Every cart, kept current
    fn watch_all_carts(&self) -> Result<LiveView<Vec<CartWithItems>>>;
}
