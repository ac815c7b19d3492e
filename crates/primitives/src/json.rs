//! JsonCartStore: carts with an embedded item array
//!
//! Each cart is one row of `json_carts(id, items)`; `items` holds an array
//! of `{"product_id", "quantity"}` objects in insertion order. Reads expand
//! the array with an outer unnest, so a cart with no items still produces a
//! row.
//!
//! Replacing items rewrites one row, so no explicit transaction is needed.
//! Nothing enforces that an item's product exists once it is written:
//! deleting a product leaves orphans, which [`JsonCartStore::find_orphaned_items`]
//! reports.

use std::sync::Arc;

use linkdb_core::{ConstraintKind, DataType, Error, Result, Table, Value};
use linkdb_engine::{
    col, group_rows, param, Database, Delete, FromRow, Grouped, Insert, LiveView, QueryResult,
    RowView, Select, Statement, Update,
};
use tracing::{debug, warn};

use crate::catalog::{ProductCatalog, PRODUCTS_TABLE};
use crate::model::{check_items, CartId, CartItem, CartWithItems, ProductId};
use crate::store::CartStore;

/// Name of the carts table
pub const JSON_CARTS_TABLE: &str = "json_carts";

const ITEM_FIELDS: &[&str] = &["product_id", "quantity"];

/// Definition of `json_carts`
pub fn json_carts_table() -> Result<Table> {
    Table::builder(JSON_CARTS_TABLE)
        .column("id", DataType::String)
        .column("items", DataType::Json)
        .default_value(Value::Array(Vec::new()))
        .primary_key(&["id"])
        .build()
}

fn encode_items(items: &[CartItem]) -> Result<Value> {
    Ok(Value::from(serde_json::to_value(items)?))
}

struct CartRow(CartId);

impl FromRow for CartRow {
    fn from_row(row: &RowView<'_>) -> Result<Self> {
        Ok(CartRow(CartId::new(row.get_str("json_carts.id")?)))
    }
}

struct ItemRow(CartItem);

impl FromRow for ItemRow {
    fn from_row(row: &RowView<'_>) -> Result<Self> {
        Ok(ItemRow(CartItem {
            product_id: ProductId::new(row.get_str("item.product_id")?),
            quantity: row.get_int("item.quantity")?,
        }))
    }
}

fn group_carts(result: &QueryResult) -> Result<Vec<CartWithItems>> {
    let groups: Vec<Grouped<CartRow, ItemRow>> =
        group_rows(result, "json_carts.id", &["item.ordinal"])?;
    Ok(groups
        .into_iter()
        .map(|g| CartWithItems {
            id: g.parent.0,
            items: g.children.into_iter().map(|i| i.0).collect(),
        })
        .collect())
}

/// Cart store over the single `json_carts` table
///
/// Shares the `products` table with [`RelationalCartStore`](crate::RelationalCartStore).
#[derive(Clone)]
pub struct JsonCartStore {
    db: Arc<Database>,
    catalog: ProductCatalog,
    insert: Statement,
    put: Statement,
    set_items: Statement,
    delete: Statement,
    cart_with_items: Statement,
    all_with_items: Statement,
    orphans: Statement,
}

impl JsonCartStore {
    /// Declare `products` and `json_carts` (if needed) and prepare statements
    pub fn new(db: Arc<Database>) -> Result<Self> {
        let catalog = ProductCatalog::new(Arc::clone(&db))?;
        db.ensure_table(json_carts_table()?)?;

        let expanded = || {
            Select::from(JSON_CARTS_TABLE).outer_unnest("json_carts.items", "item", ITEM_FIELDS)
        };
        Ok(JsonCartStore {
            insert: db.prepare(&Insert::into(JSON_CARTS_TABLE).columns(&["id"]).values(vec![param(1)]))?,
            put: db.prepare(
                &Insert::into(JSON_CARTS_TABLE)
                    .values(vec![param(1), param(2)])
                    .or_replace(),
            )?,
            set_items: db.prepare(
                &Update::table(JSON_CARTS_TABLE)
                    .set("items", param(2))
                    .filter(col("id").eq(param(1))),
            )?,
            delete: db.prepare(&Delete::from(JSON_CARTS_TABLE).filter(col("id").eq(param(1))))?,
            cart_with_items: db.prepare(&expanded().filter(col("json_carts.id").eq(param(1))))?,
            // Sorting is stable, so items keep their array order within a cart
            all_with_items: db.prepare(&expanded().order_by("json_carts.id"))?,
            orphans: db.prepare(
                &Select::from(JSON_CARTS_TABLE)
                    .unnest("json_carts.items", "item", ITEM_FIELDS)
                    .left_join(PRODUCTS_TABLE, col("products.id").eq(col("item.product_id")))
                    .filter(col("products.id").is_null())
                    .order_by("json_carts.id")
                    .order_by("item.ordinal"),
            )?,
            catalog,
            db,
        })
    }

    /// Items whose product no longer exists, with the cart holding them
    pub fn find_orphaned_items(&self) -> Result<Vec<(CartId, CartItem)>> {
        let result = self.db.query(&self.orphans.bind([])?)?;
        let cart_ids = result.decode::<CartRow>()?;
        let items = result.decode::<ItemRow>()?;
        Ok(cart_ids
            .into_iter()
            .zip(items)
            .map(|(cart, item)| (cart.0, item.0))
            .collect())
    }

    fn check_products(&self, items: &[CartItem]) -> Result<()> {
        check_items(items)?;
        match self.catalog.find_missing(items.iter().map(|i| &i.product_id))? {
            Some(missing) => Err(Error::constraint(
                JSON_CARTS_TABLE,
                ConstraintKind::ForeignKey,
                format!("product {} does not exist", missing),
            )),
            None => Ok(()),
        }
    }
}

impl CartStore for JsonCartStore {
    fn create_cart(&self, id: Option<CartId>) -> Result<CartId> {
        let id = id.unwrap_or_else(CartId::generate);
        self.db.execute(&self.insert.bind([Value::from(&id)])?)?;
        debug!(cart = %id, "Cart created");
        Ok(id)
    }

    fn put_cart(&self, cart: &CartWithItems) -> Result<()> {
        self.check_products(&cart.items)?;
        self.db
            .execute(&self.put.bind([Value::from(&cart.id), encode_items(&cart.items)?])?)?;
        Ok(())
    }

    fn replace_items(&self, id: &CartId, items: &[CartItem]) -> Result<()> {
        self.check_products(items)?;
        let updated = self
            .db
            .execute(&self.set_items.bind([Value::from(id), encode_items(items)?])?)?;
        if updated == 0 {
            warn!(cart = %id, "Replace on missing cart");
            return Err(Error::InvalidOperation(format!("cart {} does not exist", id)));
        }
        debug!(cart = %id, items = items.len(), "Cart items replaced");
        Ok(())
    }

    fn delete_cart(&self, id: &CartId) -> Result<bool> {
        Ok(self.db.execute(&self.delete.bind([Value::from(id)])?)? > 0)
    }

    fn get_cart(&self, id: &CartId) -> Result<Option<CartWithItems>> {
        let result = self
            .db
            .query(&self.cart_with_items.bind([Value::from(id)])?)?;
        Ok(group_carts(&result)?.into_iter().next())
    }

    fn all_carts(&self) -> Result<Vec<CartWithItems>> {
        group_carts(&self.db.query(&self.all_with_items.bind([])?)?)
    }

    fn watch_cart(&self, id: &CartId) -> Result<LiveView<Option<CartWithItems>>> {
        Ok(self
            .db
            .live_query(&self.cart_with_items.bind([Value::from(id)])?)?
            .try_map(|result| Ok(group_carts(result)?.into_iter().next())))
    }

    fn watch_all_carts(&self) -> Result<LiveView<Vec<CartWithItems>>> {
        Ok(self
            .db
            .live_query(&self.all_with_items.bind([])?)?
            .try_map(group_carts))
    }
}

impl std::fmt::Debug for JsonCartStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JsonCartStore").finish_non_exhaustive()
    }
}
