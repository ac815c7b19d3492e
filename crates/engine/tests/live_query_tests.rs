//! Live query integration tests
//!
//! Validates:
//! - Re-execution after commits to dependent tables only
//! - combine_latest / switch_keyed over database-backed views
//! - Cancellation and listener release

mod common;

use std::time::Duration;

use common::*;
use linkdb_core::{DataType, Error, Table, Value};
use linkdb_engine::{
    col, combine_latest2, group_rows, param, switch_keyed, Delete, FromRow, Insert, QueryResult,
    RowView, Select,
};

fn cart_ids(result: &QueryResult) -> Vec<String> {
    result
        .iter()
        .map(|row| row.get_str("id").unwrap().to_string())
        .collect()
}

#[test]
fn test_live_query_ignores_unrelated_tables() {
    let db = cart_db();
    let carts = db.prepare(&Select::from("carts").order_by("id")).unwrap();
    let view = db.live_query(&carts.bind([]).unwrap()).unwrap();
    let sub = view.subscribe();
    assert!(sub.recv().unwrap().unwrap().is_empty());

    add_product(&db, "p1", 100);
    db.flush_notifications();
    assert!(sub.try_recv().is_none());

    add_cart(&db, "c1");
    db.flush_notifications();
    assert_eq!(cart_ids(&sub.latest().unwrap().unwrap()), ["c1"]);
}

#[test]
fn test_combined_cart_view_tracks_both_queries() {
    let db = cart_db();
    add_product(&db, "p1", 100);
    add_cart(&db, "c1");

    let cart = db
        .prepare(&Select::from("carts").filter(col("id").eq(param(1))))
        .unwrap();
    let items = items_of_stmt(&db);
    let cart_view = db.live_query(&cart.bind([Value::from("c1")]).unwrap()).unwrap();
    let items_view = db.live_query(&items.bind([Value::from("c1")]).unwrap()).unwrap();

    let combined = combine_latest2(&cart_view, &items_view, |cart, items| {
        (cart.len(), items.len())
    });
    let sub = combined.subscribe();
    assert_eq!(sub.recv().unwrap().unwrap(), (1, 0));

    let insert = insert_item_stmt(&db);
    db.execute(&insert.bind([Value::from("c1"), Value::from("p1"), Value::Int(2)]).unwrap())
        .unwrap();
    db.flush_notifications();
    assert_eq!(sub.latest().unwrap().unwrap(), (1, 1));

    // Deleting the cart cascades, both inputs change
    let delete = db.prepare(&Delete::from("carts")).unwrap();
    db.execute(&delete.bind([]).unwrap()).unwrap();
    db.flush_notifications();
    assert_eq!(sub.latest().unwrap().unwrap(), (0, 0));
}

#[test]
fn test_switch_keyed_follows_cart_set() {
    let db = cart_db();
    add_product(&db, "p1", 100);
    add_cart(&db, "c1");

    let carts = db.prepare(&Select::from("carts").order_by("id")).unwrap();
    let items = items_of_stmt(&db);
    let outer = db.live_query(&carts.bind([]).unwrap()).unwrap();

    let inner_db = db.clone();
    let all = switch_keyed(
        &outer,
        cart_ids,
        move |id: &String| inner_db.live_query(&items.bind([Value::from(id.as_str())])?),
        |per_cart: &[(String, QueryResult)]| {
            per_cart
                .iter()
                .map(|(id, rows)| (id.clone(), rows.len()))
                .collect::<Vec<_>>()
        },
    );
    let sub = all.subscribe();
    assert_eq!(sub.recv().unwrap().unwrap(), vec![("c1".to_string(), 0)]);
    // outer carts + one inner items query
    assert_eq!(db.live_query_count(), 2);

    add_cart(&db, "c2");
    db.flush_notifications();
    assert_eq!(
        sub.latest().unwrap().unwrap(),
        vec![("c1".to_string(), 0), ("c2".to_string(), 0)]
    );
    // previous generation's inner query was released
    assert_eq!(db.live_query_count(), 3);

    drop(sub);
    drop(all);
    drop(outer);
    assert_eq!(db.live_query_count(), 0);
}

#[test]
fn test_cancel_stops_delivery() {
    let db = cart_db();
    let carts = db.prepare(&Select::from("carts")).unwrap();
    let view = db.live_query(&carts.bind([]).unwrap()).unwrap();
    let sub = view.subscribe();
    sub.recv().unwrap().unwrap();

    sub.cancel();
    add_cart(&db, "c1");
    db.flush_notifications();
    assert!(sub.is_closed());
    assert!(sub.recv_timeout(Duration::from_millis(50)).is_none());
}

#[test]
fn test_cancel_releases_query_held_only_by_subscription() {
    let db = cart_db();
    let carts = db.prepare(&Select::from("carts")).unwrap();
    let sub = db.live_query(&carts.bind([]).unwrap()).unwrap().subscribe();
    sub.recv().unwrap().unwrap();
    assert_eq!(db.live_query_count(), 1);

    sub.cancel();
    assert_eq!(db.live_query_count(), 0);
    add_cart(&db, "c1");
    db.flush_notifications();
    assert_eq!(db.live_query_count(), 0);
    assert!(sub.try_recv().is_none());
}

#[test]
fn test_failed_rerun_terminates_subscribers() {
    let db = cart_db();
    db.register_table(
        Table::builder("bags")
            .column("id", DataType::String)
            .nullable_column("items", DataType::Json)
            .primary_key(&["id"])
            .build()
            .unwrap(),
    )
    .unwrap();
    let select = db
        .prepare(&Select::from("bags").unnest("bags.items", "item", &["sku"]))
        .unwrap();
    let view = db.live_query(&select.bind([]).unwrap()).unwrap();
    let sub = view.subscribe();
    assert!(sub.recv().unwrap().unwrap().is_empty());

    // An object is not an array and cannot be unnested
    let insert = db
        .prepare(&Insert::into("bags").values(vec![param(1), param(2)]))
        .unwrap();
    let not_an_array = Value::object([("sku", Value::from("p1"))]);
    db.execute(&insert.bind([Value::from("b1"), not_an_array]).unwrap())
        .unwrap();
    db.flush_notifications();
    match sub.recv_timeout(Duration::from_secs(1)) {
        Some(Err(Error::InvalidOperation(_))) => {}
        other => panic!("expected a terminal error, got {:?}", other),
    }
    assert!(sub.recv_timeout(Duration::from_millis(50)).is_none());
    assert_eq!(db.live_query_count(), 0);
}

#[test]
fn test_grouped_snapshot_includes_empty_carts() {
    let db = cart_db();
    add_product(&db, "p1", 100);
    add_cart(&db, "c1");
    add_cart(&db, "c2");
    let insert = insert_item_stmt(&db);
    db.execute(&insert.bind([Value::from("c2"), Value::from("p1"), Value::Int(1)]).unwrap())
        .unwrap();

    let all = db
        .prepare(
            &Select::from("carts")
                .left_join("cart_items", col("cart_items.cart_id").eq(col("carts.id")))
                .order_by("carts.id"),
        )
        .unwrap();
    let view = db
        .live_query(&all.bind([]).unwrap())
        .unwrap()
        .try_map(|result| group_rows::<CartId, ProductRef>(result, "carts.id", &["cart_items.product_id"]));
    let grouped = view.current().unwrap().unwrap();
    assert_eq!(grouped.len(), 2);
    assert_eq!(grouped[0].parent, CartId("c1".into()));
    assert!(grouped[0].children.is_empty());
    assert_eq!(grouped[1].children, vec![ProductRef("p1".into())]);
}

#[derive(Debug, Clone, PartialEq)]
struct CartId(String);

impl FromRow for CartId {
    fn from_row(row: &RowView<'_>) -> linkdb_core::Result<Self> {
        Ok(CartId(row.get_str("carts.id")?.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq)]
struct ProductRef(String);

impl FromRow for ProductRef {
    fn from_row(row: &RowView<'_>) -> linkdb_core::Result<Self> {
        Ok(ProductRef(row.get_str("cart_items.product_id")?.to_string()))
    }
}
