//! RelationalCartStore: carts with a join table
//!
//! ## Layout
//!
//! ```text
//! carts(id PK)
//! cart_items(cart_id -> carts.id ON DELETE CASCADE,
//!            product_id -> products.id ON DELETE RESTRICT,
//!            quantity, PK(cart_id, product_id))
//! ```
//!
//! Replacing a cart's items is a delete plus a batch of inserts, so it runs
//! in one transaction. Item order is by product id; the join table has no
//! order of its own.

use std::sync::Arc;

use linkdb_core::{DataType, Error, OnDelete, Result, Table, Value};
use linkdb_engine::{
    col, combine_latest2, group_rows, param, switch_keyed, Database, Delete, FromRow, Grouped,
    Insert, LiveView, QueryResult, RowView, Select, Statement,
};
use tracing::debug;

use crate::catalog::{ProductCatalog, PRODUCTS_TABLE};
use crate::model::{check_items, CartId, CartItem, CartLine, CartWithItems, ProductId};
use crate::store::CartStore;

/// Name of the carts table
pub const CARTS_TABLE: &str = "carts";
/// Name of the join table
pub const CART_ITEMS_TABLE: &str = "cart_items";

/// Definitions of `carts` and `cart_items`
pub fn relational_tables() -> Result<Vec<Table>> {
    Ok(vec![
        Table::builder(CARTS_TABLE)
            .column("id", DataType::String)
            .primary_key(&["id"])
            .build()?,
        Table::builder(CART_ITEMS_TABLE)
            .column("cart_id", DataType::String)
            .column("product_id", DataType::String)
            .column("quantity", DataType::Int)
            .primary_key(&["cart_id", "product_id"])
            .foreign_key(&["cart_id"], CARTS_TABLE, &["id"], OnDelete::Cascade)
            .foreign_key(&["product_id"], PRODUCTS_TABLE, &["id"], OnDelete::Restrict)
            .build()?,
    ])
}

struct CartRow(CartId);

impl FromRow for CartRow {
    fn from_row(row: &RowView<'_>) -> Result<Self> {
        Ok(CartRow(CartId::new(row.get_str("carts.id")?)))
    }
}

struct ItemRow(CartItem);

impl FromRow for ItemRow {
    fn from_row(row: &RowView<'_>) -> Result<Self> {
        Ok(ItemRow(CartItem {
            product_id: ProductId::new(row.get_str("cart_items.product_id")?),
            quantity: row.get_int("cart_items.quantity")?,
        }))
    }
}

fn assemble(groups: Vec<Grouped<CartRow, ItemRow>>) -> Vec<CartWithItems> {
    groups
        .into_iter()
        .map(|g| CartWithItems {
            id: g.parent.0,
            items: g.children.into_iter().map(|i| i.0).collect(),
        })
        .collect()
}

fn group_carts(result: &QueryResult) -> Result<Vec<CartWithItems>> {
    group_rows(result, "carts.id", &["cart_items.product_id"]).map(assemble)
}

fn decode_items(result: &QueryResult) -> Result<Vec<CartItem>> {
    Ok(result.decode::<ItemRow>()?.into_iter().map(|i| i.0).collect())
}

fn decode_ids(result: &QueryResult) -> Result<Vec<CartId>> {
    Ok(result.decode::<CartRow>()?.into_iter().map(|c| c.0).collect())
}

/// Prepared statements
struct Statements {
    insert_cart: Statement,
    cart_by_id: Statement,
    all_cart_ids: Statement,
    delete_cart: Statement,
    clear_items: Statement,
    insert_item: Statement,
    items_of: Statement,
    lines_of: Statement,
    cart_with_items: Statement,
    all_with_items: Statement,
}

impl Statements {
    fn prepare(db: &Database) -> Result<Self> {
        let carts_with_items = || {
            Select::from(CARTS_TABLE).left_join(
                CART_ITEMS_TABLE,
                col("cart_items.cart_id").eq(col("carts.id")),
            )
        };
        Ok(Statements {
            insert_cart: db.prepare(&Insert::into(CARTS_TABLE).values(vec![param(1)]))?,
            cart_by_id: db.prepare(&Select::from(CARTS_TABLE).filter(col("id").eq(param(1))))?,
            all_cart_ids: db.prepare(&Select::from(CARTS_TABLE).order_by("id"))?,
            delete_cart: db.prepare(&Delete::from(CARTS_TABLE).filter(col("id").eq(param(1))))?,
            clear_items: db.prepare(
                &Delete::from(CART_ITEMS_TABLE).filter(col("cart_id").eq(param(1))),
            )?,
            insert_item: db.prepare(
                &Insert::into(CART_ITEMS_TABLE).values(vec![param(1), param(2), param(3)]),
            )?,
            items_of: db.prepare(
                &Select::from(CART_ITEMS_TABLE)
                    .filter(col("cart_id").eq(param(1)))
                    .order_by("product_id"),
            )?,
            lines_of: db.prepare(
                &Select::from(CART_ITEMS_TABLE)
                    .join(PRODUCTS_TABLE, col("cart_items.product_id").eq(col("products.id")))
                    .filter(col("cart_items.cart_id").eq(param(1)))
                    .order_by("products.id"),
            )?,
            cart_with_items: db.prepare(
                &carts_with_items()
                    .filter(col("carts.id").eq(param(1)))
                    .order_by("cart_items.product_id"),
            )?,
            all_with_items: db.prepare(
                &carts_with_items()
                    .order_by("carts.id")
                    .order_by("cart_items.product_id"),
            )?,
        })
    }
}

/// Cart store over `carts` and the `cart_items` join table
///
/// # Example
///
/// ```ignore
/// let store = RelationalCartStore::new(db.clone())?;
/// let id = store.create_cart(None)?;
/// store.replace_items(&id, &[CartItem::new("p1", 2), CartItem::new("p2", 1)])?;
/// let cart = store.get_cart(&id)?.unwrap();
/// ```
#[derive(Clone)]
pub struct RelationalCartStore {
    db: Arc<Database>,
    stmts: Arc<Statements>,
}

impl RelationalCartStore {
    /// Declare `products`, `carts` and `cart_items` (if needed) and prepare
    /// statements
    pub fn new(db: Arc<Database>) -> Result<Self> {
        ProductCatalog::new(Arc::clone(&db))?;
        for table in relational_tables()? {
            db.ensure_table(table)?;
        }
        let stmts = Arc::new(Statements::prepare(&db)?);
        Ok(RelationalCartStore { db, stmts })
    }

    /// Items of a cart joined with their products
    pub fn cart_lines(&self, id: &CartId) -> Result<Vec<CartLine>> {
        self.db
            .query(&self.stmts.lines_of.bind([Value::from(id)])?)?
            .decode()
    }

    fn watch_items(&self, id: &CartId) -> Result<LiveView<Vec<CartItem>>> {
        Ok(self
            .db
            .live_query(&self.stmts.items_of.bind([Value::from(id)])?)?
            .try_map(decode_items))
    }
}

impl CartStore for RelationalCartStore {
    fn create_cart(&self, id: Option<CartId>) -> Result<CartId> {
        let id = id.unwrap_or_else(CartId::generate);
        self.db
            .execute(&self.stmts.insert_cart.bind([Value::from(&id)])?)?;
        debug!(cart = %id, "Cart created");
        Ok(id)
    }

    fn put_cart(&self, cart: &CartWithItems) -> Result<()> {
        check_items(&cart.items)?;
        let stmts = &self.stmts;
        self.db.transaction_with_retry(&self.db.config().retry, |txn| {
            let id = Value::from(&cart.id);
            if txn.query_with(&stmts.cart_by_id, [id.clone()])?.is_empty() {
                txn.execute_with(&stmts.insert_cart, [id.clone()])?;
            }
            txn.execute_with(&stmts.clear_items, [id.clone()])?;
            for item in &cart.items {
                txn.execute_with(
                    &stmts.insert_item,
                    [id.clone(), Value::from(&item.product_id), Value::Int(item.quantity)],
                )?;
            }
            Ok(())
        })
    }

    fn replace_items(&self, id: &CartId, items: &[CartItem]) -> Result<()> {
        check_items(items)?;
        let stmts = &self.stmts;
        self.db.transaction_with_retry(&self.db.config().retry, |txn| {
            let cart = Value::from(id);
            if txn.query_with(&stmts.cart_by_id, [cart.clone()])?.is_empty() {
                return Err(Error::InvalidOperation(format!("cart {} does not exist", id)));
            }
            let removed = txn.execute_with(&stmts.clear_items, [cart.clone()])?;
            for item in items {
                txn.execute_with(
                    &stmts.insert_item,
                    [cart.clone(), Value::from(&item.product_id), Value::Int(item.quantity)],
                )?;
            }
            debug!(cart = %id, removed, inserted = items.len(), "Cart items replaced");
            Ok(())
        })
    }

    fn delete_cart(&self, id: &CartId) -> Result<bool> {
        let deleted = self
            .db
            .execute(&self.stmts.delete_cart.bind([Value::from(id)])?)?;
        Ok(deleted > 0)
    }

    fn get_cart(&self, id: &CartId) -> Result<Option<CartWithItems>> {
        let result = self
            .db
            .query(&self.stmts.cart_with_items.bind([Value::from(id)])?)?;
        Ok(group_carts(&result)?.into_iter().next())
    }

    fn all_carts(&self) -> Result<Vec<CartWithItems>> {
        let result = self.db.query(&self.stmts.all_with_items.bind([])?)?;
        group_carts(&result)
    }

    fn watch_cart(&self, id: &CartId) -> Result<LiveView<Option<CartWithItems>>> {
        let exists = self
            .db
            .live_query(&self.stmts.cart_by_id.bind([Value::from(id)])?)?
            .map(|result| !result.is_empty());
        let items = self.watch_items(id)?;
        let id = id.clone();
        Ok(combine_latest2(&exists, &items, move |exists, items| {
            exists.then(|| CartWithItems {
                id: id.clone(),
                items: items.clone(),
            })
        }))
    }

    fn watch_all_carts(&self) -> Result<LiveView<Vec<CartWithItems>>> {
        let ids = self
            .db
            .live_query(&self.stmts.all_cart_ids.bind([])?)?
            .try_map(decode_ids);
        let store = self.clone();
        Ok(switch_keyed(
            &ids,
            |ids: &Vec<CartId>| ids.clone(),
            move |id: &CartId| store.watch_items(id),
            |carts: &[(CartId, Vec<CartItem>)]| {
                carts
                    .iter()
                    .map(|(id, items)| CartWithItems {
                        id: id.clone(),
                        items: items.clone(),
                    })
                    .collect()
            },
        ))
    }
}

impl std::fmt::Debug for RelationalCartStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelationalCartStore").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Product;
    use linkdb_core::ConstraintKind;

    fn setup() -> (Arc<Database>, RelationalCartStore) {
        let db = Database::ephemeral().unwrap();
        let catalog = ProductCatalog::new(db.clone()).unwrap();
        catalog.upsert(&Product::new("p1", "Tea", 250)).unwrap();
        catalog.upsert(&Product::new("p2", "Cup", 900)).unwrap();
        let store = RelationalCartStore::new(db.clone()).unwrap();
        (db, store)
    }

    #[test]
    fn test_replace_then_read() {
        let (_db, store) = setup();
        let id = store.create_cart(Some("c1".into())).unwrap();
        store
            .replace_items(&id, &[CartItem::new("p2", 1), CartItem::new("p1", 2)])
            .unwrap();

        let cart = store.get_cart(&id).unwrap().unwrap();
        assert_eq!(cart.items, vec![CartItem::new("p1", 2), CartItem::new("p2", 1)]);

        store.replace_items(&id, &[CartItem::new("p2", 5)]).unwrap();
        assert_eq!(store.get_cart(&id).unwrap().unwrap().items, vec![CartItem::new("p2", 5)]);
    }

    #[test]
    fn test_replace_with_unknown_product_keeps_old_items() {
        let (_db, store) = setup();
        let id = store.create_cart(None).unwrap();
        store.replace_items(&id, &[CartItem::new("p1", 1)]).unwrap();

        let err = store
            .replace_items(&id, &[CartItem::new("p2", 1), CartItem::new("nope", 1)])
            .unwrap_err();
        assert_eq!(err.constraint_kind(), Some(ConstraintKind::ForeignKey));
        assert_eq!(store.get_cart(&id).unwrap().unwrap().items, vec![CartItem::new("p1", 1)]);
    }

    #[test]
    fn test_replace_on_missing_cart() {
        let (_db, store) = setup();
        let err = store.replace_items(&CartId::new("ghost"), &[]).unwrap_err();
        assert!(matches!(err, Error::InvalidOperation(_)));
    }

    #[test]
    fn test_cart_lines_join_products() {
        let (_db, store) = setup();
        let id = store.create_cart(None).unwrap();
        store
            .replace_items(&id, &[CartItem::new("p1", 2), CartItem::new("p2", 1)])
            .unwrap();
        let lines = store.cart_lines(&id).unwrap();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].product.name, "Tea");
        assert_eq!(lines.iter().map(CartLine::total).sum::<i64>(), 1400);
    }

    #[test]
    fn test_delete_cascades() {
        let (db, store) = setup();
        let id = store.create_cart(None).unwrap();
        store.replace_items(&id, &[CartItem::new("p1", 1)]).unwrap();
        assert!(store.delete_cart(&id).unwrap());
        assert!(!store.delete_cart(&id).unwrap());

        let items = db.prepare(&Select::from(CART_ITEMS_TABLE)).unwrap();
        assert!(db.query(&items.bind([]).unwrap()).unwrap().is_empty());
    }

    #[test]
    fn test_put_cart_replaces_items() {
        let (_db, store) = setup();
        let mut cart = CartWithItems::empty(CartId::new("c1"));
        cart.items.push(CartItem::new("p1", 1));
        store.put_cart(&cart).unwrap();
        cart.items = vec![CartItem::new("p2", 3)];
        store.put_cart(&cart).unwrap();
        assert_eq!(store.get_cart(&cart.id).unwrap(), Some(cart));
    }

    #[test]
    fn test_watch_cart_appears_and_disappears() {
        let (db, store) = setup();
        let id = CartId::new("c1");
        let view = store.watch_cart(&id).unwrap();
        assert_eq!(view.current().unwrap().unwrap(), None);

        store.create_cart(Some(id.clone())).unwrap();
        store.replace_items(&id, &[CartItem::new("p1", 4)]).unwrap();
        db.flush_notifications();
        let cart = view.current().unwrap().unwrap().unwrap();
        assert_eq!(cart.items, vec![CartItem::new("p1", 4)]);

        store.delete_cart(&id).unwrap();
        db.flush_notifications();
        assert_eq!(view.current().unwrap().unwrap(), None);
    }
}
