//! Shared fixtures for cart store tests
#![allow(dead_code)]

use std::sync::Arc;

use linkdb_engine::Database;
use linkdb_primitives::{JsonCartStore, Product, ProductCatalog, RelationalCartStore};
use once_cell::sync::Lazy;
use tracing::Level;

static TRACING_INIT: Lazy<()> = Lazy::new(|| {
    tracing_subscriber::fmt()
        .with_max_level(Level::DEBUG)
        .with_test_writer()
        .try_init()
        .ok();
});

pub fn setup_tracing() {
    Lazy::force(&TRACING_INIT);
}

/// Ephemeral database with products p1..p5 in the catalog
pub fn stocked_db() -> Arc<Database> {
    setup_tracing();
    let db = Database::ephemeral().unwrap();
    let catalog = ProductCatalog::new(db.clone()).unwrap();
    for i in 1..=5 {
        catalog
            .upsert(&Product::new(format!("p{}", i), format!("Product {}", i), i * 100))
            .unwrap();
    }
    db
}

pub fn relational() -> (Arc<Database>, RelationalCartStore) {
    let db = stocked_db();
    let store = RelationalCartStore::new(db.clone()).unwrap();
    (db, store)
}

pub fn json() -> (Arc<Database>, JsonCartStore) {
    let db = stocked_db();
    let store = JsonCartStore::new(db.clone()).unwrap();
    (db, store)
}
