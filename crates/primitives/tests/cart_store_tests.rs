//! Behavior both cart stores share
//!
//! Each check is written once against `CartStore` and run for the
//! relational and the JSON layout.

mod common;

use std::sync::Arc;
use std::time::Duration;

use linkdb_core::{ConstraintKind, Error};
use linkdb_engine::Database;
use linkdb_primitives::{
    CartId, CartItem, CartStore, CartWithItems, ProductCatalog, ProductId, RelationalCartStore,
};

macro_rules! for_both_stores {
    ($($check:ident),* $(,)?) => {
        mod relational {
            $(
                #[test]
                fn $check() {
                    let (db, store) = crate::common::relational();
                    super::$check(&db, &store);
                }
            )*
        }
        mod json {
            $(
                #[test]
                fn $check() {
                    let (db, store) = crate::common::json();
                    super::$check(&db, &store);
                }
            )*
        }
    };
}

for_both_stores!(
    replace_then_read_returns_written_set,
    all_carts_includes_empty_carts,
    duplicate_cart_is_rejected,
    zero_quantity_is_rejected,
    duplicate_product_is_rejected,
    delete_removes_items,
    watch_all_sees_new_empty_cart,
    watch_cart_follows_replacements,
    cancelled_watch_stops_its_queries,
    stores_share_one_database,
);

fn sorted(mut items: Vec<CartItem>) -> Vec<CartItem> {
    items.sort_by(|a, b| a.product_id.cmp(&b.product_id));
    items
}

fn replace_then_read_returns_written_set(_db: &Arc<Database>, store: &dyn CartStore) {
    let id = store.create_cart(Some(CartId::new("c1"))).unwrap();
    let items = vec![CartItem::new("p1", 2), CartItem::new("p2", 1)];
    store.replace_items(&id, &items).unwrap();
    let cart = store.get_cart(&id).unwrap().unwrap();
    assert_eq!(sorted(cart.items), items);

    store.replace_items(&id, &[CartItem::new("p3", 7)]).unwrap();
    let cart = store.get_cart(&id).unwrap().unwrap();
    assert_eq!(cart.items, vec![CartItem::new("p3", 7)]);

    store.replace_items(&id, &[]).unwrap();
    assert_eq!(store.get_cart(&id).unwrap(), Some(CartWithItems::empty(id)));
}

fn all_carts_includes_empty_carts(_db: &Arc<Database>, store: &dyn CartStore) {
    let full = store.create_cart(Some(CartId::new("a"))).unwrap();
    store.create_cart(Some(CartId::new("b"))).unwrap();
    store.replace_items(&full, &[CartItem::new("p1", 1), CartItem::new("p4", 2)]).unwrap();

    let all = store.all_carts().unwrap();
    assert_eq!(all.len(), 2);
    assert_eq!(all[0].id, full);
    assert_eq!(all[0].items.len(), 2);
    assert_eq!(all[1], CartWithItems::empty(CartId::new("b")));
}

fn duplicate_cart_is_rejected(_db: &Arc<Database>, store: &dyn CartStore) {
    store.create_cart(Some(CartId::new("c1"))).unwrap();
    let err = store.create_cart(Some(CartId::new("c1"))).unwrap_err();
    assert_eq!(err.constraint_kind(), Some(ConstraintKind::PrimaryKey));
}

fn zero_quantity_is_rejected(_db: &Arc<Database>, store: &dyn CartStore) {
    let id = store.create_cart(None).unwrap();
    let err = store.replace_items(&id, &[CartItem::new("p1", 0)]).unwrap_err();
    assert!(matches!(err, Error::InvalidOperation(_)));
    assert!(store.get_cart(&id).unwrap().unwrap().items.is_empty());
}

fn duplicate_product_is_rejected(_db: &Arc<Database>, store: &dyn CartStore) {
    let id = store.create_cart(None).unwrap();
    store.replace_items(&id, &[CartItem::new("p2", 1)]).unwrap();
    let err = store
        .replace_items(&id, &[CartItem::new("p1", 1), CartItem::new("p1", 2)])
        .unwrap_err();
    assert!(matches!(err, Error::InvalidOperation(_)));
    // Previous items are untouched
    assert_eq!(store.get_cart(&id).unwrap().unwrap().items, vec![CartItem::new("p2", 1)]);
}

fn delete_removes_items(_db: &Arc<Database>, store: &dyn CartStore) {
    let id = store.create_cart(None).unwrap();
    store.replace_items(&id, &[CartItem::new("p1", 1)]).unwrap();
    assert!(store.delete_cart(&id).unwrap());
    assert_eq!(store.get_cart(&id).unwrap(), None);

    // Same id again starts empty
    store.create_cart(Some(id.clone())).unwrap();
    assert!(store.get_cart(&id).unwrap().unwrap().items.is_empty());
}

fn watch_all_sees_new_empty_cart(db: &Arc<Database>, store: &dyn CartStore) {
    let view = store.watch_all_carts().unwrap();
    let sub = view.subscribe();
    assert!(sub.recv().unwrap().unwrap().is_empty());

    let id = store.create_cart(None).unwrap();
    db.flush_notifications();
    let seen = sub.latest().unwrap().unwrap();
    assert_eq!(seen, vec![CartWithItems::empty(id)]);
}

fn watch_cart_follows_replacements(db: &Arc<Database>, store: &dyn CartStore) {
    let id = store.create_cart(None).unwrap();
    let view = store.watch_cart(&id).unwrap();
    let sub = view.subscribe();
    assert_eq!(sub.recv().unwrap().unwrap(), Some(CartWithItems::empty(id.clone())));

    store.replace_items(&id, &[CartItem::new("p2", 3)]).unwrap();
    db.flush_notifications();
    let cart = sub.latest().unwrap().unwrap().unwrap();
    assert_eq!(cart.items, vec![CartItem::new("p2", 3)]);

    store.delete_cart(&id).unwrap();
    db.flush_notifications();
    assert_eq!(sub.latest().unwrap().unwrap(), None);

    sub.cancel();
    store.create_cart(Some(id)).unwrap();
    db.flush_notifications();
    assert!(sub.recv_timeout(Duration::from_millis(50)).is_none());
}

fn cancelled_watch_stops_its_queries(db: &Arc<Database>, store: &dyn CartStore) {
    store.create_cart(None).unwrap();
    let all = store.watch_all_carts().unwrap().subscribe();
    let one = store.watch_cart(&CartId::new("c9")).unwrap().subscribe();
    all.recv().unwrap().unwrap();
    one.recv().unwrap().unwrap();
    assert!(db.live_query_count() > 0);

    all.cancel();
    one.cancel();
    assert_eq!(db.live_query_count(), 0);
    store.create_cart(None).unwrap();
    db.flush_notifications();
    assert_eq!(db.live_query_count(), 0);
}

fn stores_share_one_database(db: &Arc<Database>, store: &dyn CartStore) {
    let catalog = ProductCatalog::new(db.clone()).unwrap();
    let id = store.create_cart(None).unwrap();
    store.replace_items(&id, &[CartItem::new("p5", 1)]).unwrap();
    assert_eq!(catalog.get(&ProductId::new("p5")).unwrap().unwrap().price, 500);
}

#[test]
fn deleting_referenced_product_fails_for_relational_store() {
    let (db, store) = common::relational();
    let catalog = ProductCatalog::new(db).unwrap();
    let id = store.create_cart(None).unwrap();
    store.replace_items(&id, &[CartItem::new("p1", 1)]).unwrap();

    let err = catalog.delete(&ProductId::new("p1")).unwrap_err();
    assert!(err.is_constraint_violation());
    assert_eq!(err.constraint_kind(), Some(ConstraintKind::ForeignKey));
    assert!(catalog.get(&ProductId::new("p1")).unwrap().is_some());

    // Unreferenced products can go
    assert!(catalog.delete(&ProductId::new("p2")).unwrap());
}

#[test]
fn json_store_keeps_insertion_order() {
    let (_db, store) = common::json();
    let id = store.create_cart(Some(CartId::new("c1"))).unwrap();
    store
        .replace_items(&id, &[CartItem::new("p1", 2), CartItem::new("p2", 1)])
        .unwrap();
    let cart = store.get_cart(&id).unwrap().unwrap();
    assert_eq!(cart.id, CartId::new("c1"));
    assert_eq!(cart.items, vec![CartItem::new("p1", 2), CartItem::new("p2", 1)]);

    store
        .replace_items(&id, &[CartItem::new("p5", 1), CartItem::new("p1", 1)])
        .unwrap();
    let cart = store.get_cart(&id).unwrap().unwrap();
    assert_eq!(cart.items[0].product_id, ProductId::new("p5"));
}

#[test]
fn relational_and_json_stores_coexist() {
    let db = common::stocked_db();
    let relational = RelationalCartStore::new(db.clone()).unwrap();
    let json = linkdb_primitives::JsonCartStore::new(db.clone()).unwrap();

    let a = relational.create_cart(Some(CartId::new("a"))).unwrap();
    let b = json.create_cart(Some(CartId::new("a"))).unwrap();
    relational.replace_items(&a, &[CartItem::new("p1", 1)]).unwrap();
    json.replace_items(&b, &[CartItem::new("p2", 1)]).unwrap();

    assert_eq!(relational.get_cart(&a).unwrap().unwrap().items, vec![CartItem::new("p1", 1)]);
    assert_eq!(json.get_cart(&b).unwrap().unwrap().items, vec![CartItem::new("p2", 1)]);
}
