//! Shared fixtures for engine integration tests
#![allow(dead_code)]

use std::sync::Arc;

use linkdb_core::{DataType, OnDelete, Table, Value};
use linkdb_engine::{col, param, Database, Insert, Select, Statement};
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

/// Ephemeral database with products, carts and cart_items
pub fn cart_db() -> Arc<Database> {
    setup_tracing();
    let db = Database::ephemeral().unwrap();
    db.register_table(
        Table::builder("products")
            .column("id", DataType::String)
            .column("name", DataType::String)
            .column("price", DataType::Int)
            .primary_key(&["id"])
            .build()
            .unwrap(),
    )
    .unwrap();
    db.register_table(
        Table::builder("carts")
            .column("id", DataType::String)
            .primary_key(&["id"])
            .build()
            .unwrap(),
    )
    .unwrap();
    db.register_table(
        Table::builder("cart_items")
            .column("cart_id", DataType::String)
            .column("product_id", DataType::String)
            .column("quantity", DataType::Int)
            .primary_key(&["cart_id", "product_id"])
            .foreign_key(&["cart_id"], "carts", &["id"], OnDelete::Cascade)
            .foreign_key(&["product_id"], "products", &["id"], OnDelete::Restrict)
            .build()
            .unwrap(),
    )
    .unwrap();
    db
}

pub fn add_product(db: &Database, id: &str, price: i64) {
    let stmt = db
        .prepare(&Insert::into("products").values(vec![param(1), param(2), param(3)]))
        .unwrap();
    db.execute(&stmt.bind([Value::from(id), Value::from(id.to_uppercase()), Value::Int(price)]).unwrap())
        .unwrap();
}

pub fn add_cart(db: &Database, id: &str) {
    let stmt = db.prepare(&Insert::into("carts").values(vec![param(1)])).unwrap();
    db.execute(&stmt.bind([Value::from(id)]).unwrap()).unwrap();
}

pub fn insert_item_stmt(db: &Database) -> Statement {
    db.prepare(&Insert::into("cart_items").values(vec![param(1), param(2), param(3)]))
        .unwrap()
}

pub fn items_of_stmt(db: &Database) -> Statement {
    db.prepare(
        &Select::from("cart_items")
            .join("products", col("cart_items.product_id").eq(col("products.id")))
            .filter(col("cart_items.cart_id").eq(param(1)))
            .order_by("cart_items.product_id"),
    )
    .unwrap()
}
