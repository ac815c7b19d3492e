//! Cart primitives for LinkDB
//!
//! Two ways to model the many-to-many link between carts and products,
//! behind one [`CartStore`] trait:
//! - **RelationalCartStore**: `carts` plus a `cart_items` join table with
//!   foreign keys; replacing items is a transaction
//! - **JsonCartStore**: `json_carts` with an ordered item array in one
//!   column; replacing items is a single-row write
//! - **ProductCatalog**: the shared `products` table both stores reference
//!
//! ## Design Principle: Stateless Facades
//!
//! Every store holds only an `Arc<Database>` and prepared statements. Any
//! number of instances over one database are interchangeable, and all state
//! lives in the engine, so live views built from one instance observe
//! writes made through another.
//!
//! ```rust,ignore
//! use linkdb_primitives::*;
//!
//! let store = JsonCartStore::new(db.clone())?;
//! let id = store.create_cart(None)?;
//! store.replace_items(&id, &[CartItem::new("p1", 2), CartItem::new("p2", 1)])?;
//!
//! let all = store.watch_all_carts()?;
//! for snapshot in all.subscribe() { /* ... */ }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod catalog;
pub mod json;
pub mod model;
pub mod relational;
pub mod store;

pub use catalog::{products_table, ProductCatalog, PRODUCTS_TABLE};
pub use json::{json_carts_table, JsonCartStore, JSON_CARTS_TABLE};
pub use model::{CartId, CartItem, CartLine, CartWithItems, Product, ProductId};
pub use relational::{relational_tables, RelationalCartStore, CARTS_TABLE, CART_ITEMS_TABLE};
pub use store::CartStore;
