//! SELECT execution
//!
//! Sources are applied left to right. Joins with an equality between a left
//! column and a right column build a hash index over the right table;
//! anything else falls back to a nested loop. Unnest keeps array order, so
//! the expansion form yields elements exactly as stored.

use rustc_hash::FxHashMap;
use tracing::trace;

use linkdb_core::{Error, Result, Row, Value};

use super::{cell, compare_values, passes, HashKey, RowSource};
use crate::mapper::QueryResult;
use crate::statement::{JoinKind, JoinPlan, SelectPlan, SortOrder, SourcePlan, UnnestPlan};

pub(crate) fn execute_select(
    plan: &SelectPlan,
    params: &[Value],
    source: &mut dyn RowSource,
) -> Result<QueryResult> {
    let mut rows: Vec<Row> = source
        .scan_rows(&plan.base.name)?
        .into_iter()
        .map(|(_, row)| row)
        .collect();

    for src in &plan.sources {
        rows = match src {
            SourcePlan::Join(join) => join_rows(rows, join, params, source)?,
            SourcePlan::Unnest(unnest) => unnest_rows(rows, unnest)?,
        };
    }

    if let Some(filter) = &plan.filter {
        rows.retain(|row| passes(filter, row, params));
    }

    if !plan.order.is_empty() {
        // Stable, so ties keep join/array order
        rows.sort_by(|a, b| {
            plan.order
                .iter()
                .map(|(idx, dir)| {
                    let ord = compare_values(cell(a, *idx), cell(b, *idx));
                    match dir {
                        SortOrder::Asc => ord,
                        SortOrder::Desc => ord.reverse(),
                    }
                })
                .find(|o| o.is_ne())
                .unwrap_or(std::cmp::Ordering::Equal)
        });
    }

    let identity = plan.projection.iter().enumerate().all(|(i, p)| i == *p)
        && rows.first().map_or(true, |r| r.len() == plan.projection.len());
    if !identity {
        rows = rows
            .into_iter()
            .map(|row| plan.projection.iter().map(|i| cell(&row, *i).clone()).collect())
            .collect();
    }

    trace!(table = %plan.base.name, rows = rows.len(), "select");
    Ok(QueryResult::new(plan.columns.clone(), rows))
}

fn join_rows(
    left: Vec<Row>,
    join: &JoinPlan,
    params: &[Value],
    source: &mut dyn RowSource,
) -> Result<Vec<Row>> {
    let right: Vec<Row> = source
        .scan_rows(&join.table.name)?
        .into_iter()
        .map(|(_, row)| row)
        .collect();
    let right_width = join.table.columns.len();
    let mut out = Vec::with_capacity(left.len());

    let index: Option<(usize, FxHashMap<HashKey, Vec<usize>>)> = join.equi.map(|(l, r)| {
        let mut index: FxHashMap<HashKey, Vec<usize>> = FxHashMap::default();
        for (i, row) in right.iter().enumerate() {
            if let Some(key) = HashKey::of(cell(row, r)) {
                index.entry(key).or_default().push(i);
            }
        }
        (l, index)
    });

    for left_row in left {
        let candidates: Vec<&Row> = match &index {
            Some((l, index)) => HashKey::of(cell(&left_row, *l))
                .and_then(|k| index.get(&k))
                .map(|hits| hits.iter().map(|i| &right[*i]).collect())
                .unwrap_or_default(),
            None => right.iter().collect(),
        };

        let mut matched = false;
        for right_row in candidates {
            let mut combined = Vec::with_capacity(left_row.len() + right_width);
            combined.extend(left_row.iter().cloned());
            combined.extend(right_row.iter().cloned());
            if passes(&join.on, &combined, params) {
                out.push(combined);
                matched = true;
            }
        }

        if !matched && join.kind == JoinKind::Left {
            let mut padded = left_row;
            padded.resize(padded.len() + right_width, Value::Null);
            out.push(padded);
        }
    }
    Ok(out)
}

fn unnest_rows(rows: Vec<Row>, unnest: &UnnestPlan) -> Result<Vec<Row>> {
    let mut out = Vec::with_capacity(rows.len());
    let extra = unnest.fields.len() + 1;

    for row in rows {
        let items = match cell(&row, unnest.source) {
            Value::Array(items) => items.clone(),
            Value::Null => Vec::new(),
            other => {
                return Err(Error::InvalidOperation(format!(
                    "cannot unnest a {} value, expected an array",
                    other.type_name()
                )))
            }
        };

        if items.is_empty() {
            if unnest.outer {
                let mut padded = row;
                padded.resize(padded.len() + extra, Value::Null);
                out.push(padded);
            }
            continue;
        }

        for (ordinal, item) in items.iter().enumerate() {
            let mut expanded = Vec::with_capacity(row.len() + extra);
            expanded.extend(row.iter().cloned());
            // Non-object elements have no fields; they expand to NULLs
            expanded.extend(unnest.fields.iter().map(|f| item.field(f).clone()));
            expanded.push(Value::Int(ordinal as i64));
            out.push(expanded);
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::SnapshotSource;
    use crate::schema::SchemaRegistry;
    use crate::statement::{col, param, BuildStatement, Plan, Select, Statement};
    use linkdb_core::{DataType, OnDelete, RowKey, Table};
    use linkdb_storage::{TableStore, WriteBatch};

    struct Fixture {
        registry: SchemaRegistry,
        store: TableStore,
    }

    fn fixture() -> Fixture {
        let mut registry = SchemaRegistry::new();
        let store = TableStore::new();
        for table in [
            Table::builder("products")
                .column("id", DataType::String)
                .column("price", DataType::Int)
                .primary_key(&["id"])
                .build(),
            Table::builder("carts")
                .column("id", DataType::String)
                .primary_key(&["id"])
                .build(),
            Table::builder("cart_items")
                .column("cart_id", DataType::String)
                .column("product_id", DataType::String)
                .column("quantity", DataType::Int)
                .primary_key(&["cart_id", "product_id"])
                .foreign_key(&["cart_id"], "carts", &["id"], OnDelete::Cascade)
                .foreign_key(&["product_id"], "products", &["id"], OnDelete::Restrict)
                .build(),
            Table::builder("json_carts")
                .column("id", DataType::String)
                .column("items", DataType::Json)
                .primary_key(&["id"])
                .build(),
        ] {
            let table = table.unwrap();
            store.create_table(&table.name).unwrap();
            registry.register(table).unwrap();
        }

        let mut batch = WriteBatch::new();
        let mut put = |registry: &SchemaRegistry, table: &str, row: Vec<Value>| {
            let key = registry.table(table).unwrap().row_key(&row).unwrap();
            batch.put(table, key, row);
        };
        put(&registry, "products", vec!["p1".into(), 250i64.into()]);
        put(&registry, "products", vec!["p2".into(), 100i64.into()]);
        put(&registry, "carts", vec!["c1".into()]);
        put(&registry, "carts", vec!["c2".into()]);
        put(&registry, "cart_items", vec!["c1".into(), "p2".into(), 1i64.into()]);
        put(&registry, "cart_items", vec!["c1".into(), "p1".into(), 2i64.into()]);
        let item = |p: &str, q: i64| Value::object([("product_id", Value::from(p)), ("quantity", Value::from(q))]);
        put(
            &registry,
            "json_carts",
            vec!["c1".into(), Value::Array(vec![item("p2", 1), item("p1", 2)])],
        );
        put(&registry, "json_carts", vec!["c2".into(), Value::Array(vec![])]);
        store.apply_batch(&batch, 1).unwrap();

        Fixture { registry, store }
    }

    fn run(f: &Fixture, stmt: &Statement, params: Vec<Value>) -> Result<QueryResult> {
        let snapshot = f.store.snapshot();
        let plan = match stmt.plan() {
            Plan::Select(p) => p,
            _ => panic!("not a select"),
        };
        execute_select(plan, &params, &mut SnapshotSource(&snapshot))
    }

    #[test]
    fn test_join_filtered_by_cart() {
        let f = fixture();
        let stmt = Select::from("cart_items")
            .join("products", col("cart_items.product_id").eq(col("products.id")))
            .filter(col("cart_items.cart_id").eq(param(1)))
            .columns(&["products.id", "cart_items.quantity", "products.price"])
            .order_by("products.id")
            .build(&f.registry)
            .unwrap();

        let result = run(&f, &stmt, vec!["c1".into()]).unwrap();
        assert_eq!(
            result.rows(),
            &[
                vec![Value::from("p1"), Value::from(2i64), Value::from(250i64)],
                vec![Value::from("p2"), Value::from(1i64), Value::from(100i64)],
            ]
        );

        let empty = run(&f, &stmt, vec!["c2".into()]).unwrap();
        assert!(empty.is_empty());
    }

    #[test]
    fn test_left_join_keeps_empty_parent() {
        let f = fixture();
        let stmt = Select::from("carts")
            .left_join("cart_items", col("cart_items.cart_id").eq(col("carts.id")))
            .order_by("carts.id")
            .build(&f.registry)
            .unwrap();
        let result = run(&f, &stmt, vec![]).unwrap();
        assert_eq!(result.len(), 3);
        let last = &result.rows()[2];
        assert_eq!(last[0], Value::from("c2"));
        assert!(last[1..].iter().all(Value::is_null));
    }

    #[test]
    fn test_nested_loop_join() {
        let f = fixture();
        // No column = column equality, so no hash index
        let stmt = Select::from("carts")
            .join("products", col("products.price").eq(param(1)))
            .build(&f.registry)
            .unwrap();
        let result = run(&f, &stmt, vec![100i64.into()]).unwrap();
        assert_eq!(result.len(), 2);
    }

    #[test]
    fn test_unnest_preserves_array_order() {
        let f = fixture();
        let stmt = Select::from("json_carts")
            .unnest("json_carts.items", "item", &["product_id", "quantity"])
            .filter(col("json_carts.id").eq(param(1)))
            .columns(&["item.product_id", "item.quantity", "item.ordinal"])
            .build(&f.registry)
            .unwrap();
        let result = run(&f, &stmt, vec!["c1".into()]).unwrap();
        assert_eq!(
            result.rows(),
            &[
                vec![Value::from("p2"), Value::from(1i64), Value::from(0i64)],
                vec![Value::from("p1"), Value::from(2i64), Value::from(1i64)],
            ]
        );
    }

    #[test]
    fn test_outer_unnest_keeps_empty_array() {
        let f = fixture();
        let inner = Select::from("json_carts")
            .unnest("json_carts.items", "item", &["product_id"])
            .build(&f.registry)
            .unwrap();
        assert_eq!(run(&f, &inner, vec![]).unwrap().len(), 2);

        let outer = Select::from("json_carts")
            .outer_unnest("json_carts.items", "item", &["product_id"])
            .build(&f.registry)
            .unwrap();
        let result = run(&f, &outer, vec![]).unwrap();
        assert_eq!(result.len(), 3);
        assert_eq!(result.rows()[2][0], Value::from("c2"));
        assert!(result.rows()[2][2].is_null());
    }

    #[test]
    fn test_unnest_non_array_errors() {
        let f = fixture();
        let mut batch = WriteBatch::new();
        batch.put(
            "json_carts",
            RowKey::from("c3"),
            vec!["c3".into(), Value::object([("a", 1i64)])],
        );
        f.store.apply_batch(&batch, 2).unwrap();

        let stmt = Select::from("json_carts")
            .unnest("json_carts.items", "item", &["product_id"])
            .build(&f.registry)
            .unwrap();
        assert!(matches!(run(&f, &stmt, vec![]), Err(Error::InvalidOperation(_))));
    }

    #[test]
    fn test_order_by_desc() {
        let f = fixture();
        let stmt = Select::from("products")
            .order_by_desc("price")
            .columns(&["id"])
            .build(&f.registry)
            .unwrap();
        let ids: Vec<Value> = run(&f, &stmt, vec![])
            .unwrap()
            .rows()
            .iter()
            .map(|r| r[0].clone())
            .collect();
        assert_eq!(ids, vec![Value::from("p1"), Value::from("p2")]);
    }

    #[test]
    fn test_dropped_table_is_schema_error() {
        let f = fixture();
        let stmt = Select::from("carts").build(&f.registry).unwrap();
        f.store.drop_table("carts").unwrap();
        assert!(matches!(run(&f, &stmt, vec![]), Err(Error::Schema(_))));
    }
}
