//! ProductCatalog: the shared `products` table
//!
//! Both cart stores reference products but never own them. The catalog
//! declares the table and wraps the handful of statements that touch it.

use std::collections::HashSet;
use std::sync::Arc;

use linkdb_core::{DataType, Result, Table, Value};
use linkdb_engine::{col, param, Database, Delete, Insert, LiveView, Select, Statement};
use tracing::debug;

use crate::model::{Product, ProductId};

/// Name of the products table
pub const PRODUCTS_TABLE: &str = "products";

/// Definition of the products table
pub fn products_table() -> Result<Table> {
    Table::builder(PRODUCTS_TABLE)
        .column("id", DataType::String)
        .column("name", DataType::String)
        .column("price", DataType::Int)
        .primary_key(&["id"])
        .build()
}

/// Product storage
///
/// Holds only the database handle and prepared statements, so any number
/// of catalogs over one database are interchangeable.
#[derive(Clone)]
pub struct ProductCatalog {
    db: Arc<Database>,
    upsert: Statement,
    by_id: Statement,
    all: Statement,
    delete: Statement,
}

impl ProductCatalog {
    /// Declare the products table (if needed) and prepare statements
    pub fn new(db: Arc<Database>) -> Result<Self> {
        db.ensure_table(products_table()?)?;
        Ok(ProductCatalog {
            upsert: db.prepare(
                &Insert::into(PRODUCTS_TABLE)
                    .values(vec![param(1), param(2), param(3)])
                    .or_replace(),
            )?,
            by_id: db.prepare(&Select::from(PRODUCTS_TABLE).filter(col("id").eq(param(1))))?,
            all: db.prepare(&Select::from(PRODUCTS_TABLE).order_by("id"))?,
            delete: db.prepare(&Delete::from(PRODUCTS_TABLE).filter(col("id").eq(param(1))))?,
            db,
        })
    }

    /// Insert or replace a product
    pub fn upsert(&self, product: &Product) -> Result<()> {
        self.db.execute(&self.upsert.bind([
            Value::from(&product.id),
            Value::from(product.name.as_str()),
            Value::Int(product.price),
        ])?)?;
        debug!(product = %product.id, "Product stored");
        Ok(())
    }

    /// Look up one product
    pub fn get(&self, id: &ProductId) -> Result<Option<Product>> {
        let result = self.db.query(&self.by_id.bind([Value::from(id)])?)?;
        Ok(result.decode::<Product>()?.into_iter().next())
    }

    /// Every product, by id
    pub fn list(&self) -> Result<Vec<Product>> {
        self.db.query(&self.all.bind([])?)?.decode()
    }

    /// Whether every id names an existing product
    ///
    /// Returns the first id that does not.
    pub fn find_missing<'a>(&self, ids: impl IntoIterator<Item = &'a ProductId>) -> Result<Option<ProductId>> {
        let known: HashSet<ProductId> = self.list()?.into_iter().map(|p| p.id).collect();
        Ok(ids.into_iter().find(|id| !known.contains(*id)).cloned())
    }

    /// Delete a product; returns whether it existed
    ///
    /// # Errors
    /// `ConstraintViolation` while a relational cart item references it.
    pub fn delete(&self, id: &ProductId) -> Result<bool> {
        let deleted = self.db.execute(&self.delete.bind([Value::from(id)])?)?;
        Ok(deleted > 0)
    }

    /// All products, kept current
    pub fn watch(&self) -> Result<LiveView<Vec<Product>>> {
        Ok(self
            .db
            .live_query(&self.all.bind([])?)?
            .try_map(|result| result.decode::<Product>()))
    }
}

impl std::fmt::Debug for ProductCatalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProductCatalog").finish_non_exhaustive()
    }
}
