//! LinkDB - Embedded relational store for many-to-many associations
//!
//! LinkDB keeps carts and products with two interchangeable layouts for the
//! link between them, and keeps query results current through live views.
//!
//! # Quick Start
//!
//! ```ignore
//! use linkdb::{CartItem, CartStore, Database, JsonCartStore, Product, ProductCatalog};
//!
//! let db = Database::ephemeral()?;
//! ProductCatalog::new(db.clone())?.upsert(&Product::new("p1", "Tea", 250))?;
//!
//! let carts = JsonCartStore::new(db.clone())?;
//! let id = carts.create_cart(None)?;
//! carts.replace_items(&id, &[CartItem::new("p1", 2)])?;
//!
//! let live = carts.watch_all_carts()?;
//! ```
//!
//! # Architecture
//!
//! - `linkdb-core`: values, table definitions, errors
//! - `linkdb-engine`: schema registry, statements, transactions, live queries
//! - `linkdb-primitives`: product catalog and the two cart stores
//!
//! Storage and concurrency internals are not re-exported.

pub use linkdb_core::{
    Column, ConstraintKind, DataType, Error, ForeignKey, OnDelete, Result, Row, Table,
    TableBuilder, Value,
};
pub use linkdb_engine::{
    col, combine_latest, combine_latest2, group_rows, lit, param, switch_keyed, BoundStatement,
    BuildStatement, Database, DatabaseConfig, Delete, FromRow, Grouped, Insert, LiveView,
    QueryResult, RetryConfig, RowView, Select, Statement, Subscription, Transaction, Update,
};
pub use linkdb_primitives::{
    CartId, CartItem, CartLine, CartStore, CartWithItems, JsonCartStore, Product, ProductCatalog,
    ProductId, RelationalCartStore,
};
