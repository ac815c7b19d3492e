//! SELECT builder: joins, JSON-array expansion, filter, order, projection
//!
//! Row layout: the base table's columns, then each join or unnest source's
//! columns in the order the clauses were added. An unnest source named
//! `alias` contributes one column per requested field plus `alias.ordinal`,
//! the 0-based position of the element in its array.

use std::sync::Arc;

use linkdb_core::{DataType, Error, Result, Table};

use super::expr::{resolve_expr, ColumnRef, Expr, Params, Predicate, Scope, Slot};
use super::{and_filter, lookup_table, where_clause, BuildStatement, Plan, Statement};
use crate::schema::SchemaRegistry;

/// Name of the position column every unnest source carries
pub const ORDINAL_COLUMN: &str = "ordinal";

/// Join flavour
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinKind {
    /// Only rows with a match on both sides
    Inner,
    /// Every left row; NULL right columns when nothing matches
    Left,
}

/// Sort direction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    /// Smallest first, NULLs first
    Asc,
    /// Largest first, NULLs last
    Desc,
}

#[derive(Debug, Clone)]
enum SourceClause {
    Join {
        kind: JoinKind,
        table: String,
        on: Expr,
    },
    Unnest {
        column: ColumnRef,
        alias: String,
        fields: Vec<String>,
        outer: bool,
    },
}

/// `SELECT ... FROM table [JOIN ...] [UNNEST ...] [WHERE ...] [ORDER BY ...]`
///
/// # Example
///
/// ```ignore
/// // Join form
/// Select::from("cart_items")
///     .join("products", col("cart_items.product_id").eq(col("products.id")))
///     .filter(col("cart_items.cart_id").eq(param(1)));
///
/// // Expansion form, array order preserved
/// Select::from("json_carts")
///     .outer_unnest("json_carts.items", "item", &["product_id", "quantity"])
///     .order_by("json_carts.id")
///     .order_by("item.ordinal");
/// ```
#[derive(Debug, Clone)]
pub struct Select {
    from: String,
    sources: Vec<SourceClause>,
    filter: Option<Expr>,
    order: Vec<(ColumnRef, SortOrder)>,
    projection: Vec<ColumnRef>,
}

#[derive(Debug)]
pub(crate) struct JoinPlan {
    pub(crate) table: Arc<Table>,
    pub(crate) kind: JoinKind,
    pub(crate) on: Predicate,
    /// `(left row position, right table column)` of an equality usable for a hash join
    pub(crate) equi: Option<(usize, usize)>,
}

#[derive(Debug)]
pub(crate) struct UnnestPlan {
    /// Row position of the JSON column
    pub(crate) source: usize,
    pub(crate) fields: Vec<String>,
    pub(crate) outer: bool,
}

#[derive(Debug)]
pub(crate) enum SourcePlan {
    Join(JoinPlan),
    Unnest(UnnestPlan),
}

#[derive(Debug)]
pub(crate) struct SelectPlan {
    pub(crate) base: Arc<Table>,
    pub(crate) sources: Vec<SourcePlan>,
    pub(crate) filter: Option<Predicate>,
    pub(crate) order: Vec<(usize, SortOrder)>,
    pub(crate) projection: Vec<usize>,
    pub(crate) columns: Vec<String>,
}

impl Select {
    /// Select from `table`
    pub fn from(table: &str) -> Self {
        Select {
            from: table.to_string(),
            sources: Vec::new(),
            filter: None,
            order: Vec::new(),
            projection: Vec::new(),
        }
    }

    /// Inner join
    pub fn join(mut self, table: &str, on: Expr) -> Self {
        self.sources.push(SourceClause::Join {
            kind: JoinKind::Inner,
            table: table.to_string(),
            on,
        });
        self
    }

    /// Left outer join
    pub fn left_join(mut self, table: &str, on: Expr) -> Self {
        self.sources.push(SourceClause::Join {
            kind: JoinKind::Left,
            table: table.to_string(),
            on,
        });
        self
    }

    /// Expand a JSON array column into one row per element
    ///
    /// Rows whose array is empty or NULL are dropped.
    pub fn unnest(self, column: &str, alias: &str, fields: &[&str]) -> Self {
        self.push_unnest(column, alias, fields, false)
    }

    /// Like `unnest`, but rows with an empty or NULL array are kept once with
    /// NULL element columns
    pub fn outer_unnest(self, column: &str, alias: &str, fields: &[&str]) -> Self {
        self.push_unnest(column, alias, fields, true)
    }

    fn push_unnest(mut self, column: &str, alias: &str, fields: &[&str], outer: bool) -> Self {
        self.sources.push(SourceClause::Unnest {
            column: ColumnRef::parse(column),
            alias: alias.to_string(),
            fields: fields.iter().map(|f| f.to_string()).collect(),
            outer,
        });
        self
    }

    /// Restrict the rows returned; repeated calls are ANDed
    pub fn filter(mut self, expr: Expr) -> Self {
        self.filter = and_filter(self.filter.take(), expr);
        self
    }

    /// Sort ascending by a column; later calls break ties
    pub fn order_by(mut self, column: &str) -> Self {
        self.order.push((ColumnRef::parse(column), SortOrder::Asc));
        self
    }

    /// Sort descending by a column
    pub fn order_by_desc(mut self, column: &str) -> Self {
        self.order.push((ColumnRef::parse(column), SortOrder::Desc));
        self
    }

    /// Output only these columns, in this order
    pub fn columns(mut self, columns: &[&str]) -> Self {
        self.projection = columns.iter().map(|c| ColumnRef::parse(c)).collect();
        self
    }

    fn render(&self) -> String {
        let projection = if self.projection.is_empty() {
            "*".to_string()
        } else {
            self.projection
                .iter()
                .map(|c| c.to_string())
                .collect::<Vec<_>>()
                .join(", ")
        };
        let mut text = format!("SELECT {} FROM {}", projection, self.from);
        for source in &self.sources {
            match source {
                SourceClause::Join { kind, table, on } => {
                    let kw = match kind {
                        JoinKind::Inner => "JOIN",
                        JoinKind::Left => "LEFT JOIN",
                    };
                    text.push_str(&format!(" {} {} ON {}", kw, table, on));
                }
                SourceClause::Unnest {
                    column,
                    alias,
                    fields,
                    outer,
                } => {
                    let kw = if *outer { "LEFT UNNEST" } else { "UNNEST" };
                    text.push_str(&format!(
                        " {} {} AS {} ({})",
                        kw,
                        column,
                        alias,
                        fields.join(", ")
                    ));
                }
            }
        }
        text.push_str(&where_clause(&self.filter));
        if !self.order.is_empty() {
            let order: Vec<String> = self
                .order
                .iter()
                .map(|(c, dir)| match dir {
                    SortOrder::Asc => c.to_string(),
                    SortOrder::Desc => format!("{} DESC", c),
                })
                .collect();
            text.push_str(&format!(" ORDER BY {}", order.join(", ")));
        }
        text
    }
}

/// Find `left_col = right_col` among the top-level conjuncts of a join condition
fn find_equi_join(on: &Predicate, right_offset: usize) -> Option<(usize, usize)> {
    on.conjuncts().into_iter().find_map(|p| match p {
        Predicate::Eq(Slot::Column(a), Slot::Column(b)) => {
            let (a, b) = (*a, *b);
            if a < right_offset && b >= right_offset {
                Some((a, b - right_offset))
            } else if b < right_offset && a >= right_offset {
                Some((b, a - right_offset))
            } else {
                None
            }
        }
        _ => None,
    })
}

impl BuildStatement for Select {
    fn build(&self, registry: &SchemaRegistry) -> Result<Statement> {
        let base = lookup_table(registry, &self.from)?;
        let mut scope = Scope::new();
        let mut params = Params::default();
        let mut tables = vec![base.name.clone()];
        scope.push(
            &base.name,
            base.columns.iter().map(|c| c.name.clone()).collect(),
        )?;

        let mut sources = Vec::with_capacity(self.sources.len());
        for clause in &self.sources {
            match clause {
                SourceClause::Join { kind, table, on } => {
                    let table = lookup_table(registry, table)?;
                    let offset = scope.push(
                        &table.name,
                        table.columns.iter().map(|c| c.name.clone()).collect(),
                    )?;
                    let on = resolve_expr(on, &scope, &mut params)?;
                    let equi = find_equi_join(&on, offset);
                    if !tables.contains(&table.name) {
                        tables.push(table.name.clone());
                    }
                    sources.push(SourcePlan::Join(JoinPlan {
                        table,
                        kind: *kind,
                        on,
                        equi,
                    }));
                }
                SourceClause::Unnest {
                    column,
                    alias,
                    fields,
                    outer,
                } => {
                    let source = scope.resolve(column).map_err(|_| {
                        Error::query_build(format!("unknown unnest source {}", column))
                    })?;
                    check_json_column(registry, &tables, column)?;
                    if fields.iter().any(|f| f == ORDINAL_COLUMN) {
                        return Err(Error::query_build(format!(
                            "unnest field name {} is reserved",
                            ORDINAL_COLUMN
                        )));
                    }
                    let mut columns = fields.clone();
                    columns.push(ORDINAL_COLUMN.to_string());
                    scope.push(alias, columns)?;
                    sources.push(SourcePlan::Unnest(UnnestPlan {
                        source,
                        fields: fields.clone(),
                        outer: *outer,
                    }));
                }
            }
        }

        let filter = self
            .filter
            .as_ref()
            .map(|f| resolve_expr(f, &scope, &mut params))
            .transpose()?;

        let order = self
            .order
            .iter()
            .map(|(c, dir)| scope.resolve(c).map(|idx| (idx, *dir)))
            .collect::<Result<Vec<_>>>()?;

        let all_names = scope.qualified_names();
        let (projection, columns) = if self.projection.is_empty() {
            ((0..scope.width()).collect(), all_names)
        } else {
            let projection = self
                .projection
                .iter()
                .map(|c| scope.resolve(c))
                .collect::<Result<Vec<usize>>>()?;
            let columns = projection.iter().map(|i| all_names[*i].clone()).collect();
            (projection, columns)
        };

        let plan = SelectPlan {
            base,
            sources,
            filter,
            order,
            projection,
            columns,
        };
        Ok(Statement::new(
            Plan::Select(plan),
            params.count(),
            tables,
            self.render(),
        ))
    }
}

/// The unnest source must be a JSON column of a table in the statement
fn check_json_column(registry: &SchemaRegistry, tables: &[String], column: &ColumnRef) -> Result<()> {
    let found = tables
        .iter()
        .filter(|t| column.qualifier.as_deref().map_or(true, |q| q == t.as_str()))
        .filter_map(|t| registry.get(t))
        .find_map(|t| t.column(&column.column));
    match found {
        Some(col) if col.data_type == DataType::Json => Ok(()),
        Some(col) => Err(Error::query_build(format!(
            "cannot unnest {}: column is {}, not JSON",
            column, col.data_type
        ))),
        None => Err(Error::query_build(format!(
            "cannot unnest {}: not a table column",
            column
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::statement::{col, param};
    use linkdb_core::{OnDelete, Value};

    fn registry() -> SchemaRegistry {
        let mut registry = SchemaRegistry::new();
        for table in [
            Table::builder("products")
                .column("id", DataType::String)
                .column("name", DataType::String)
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
            registry.register(table.unwrap()).unwrap();
        }
        registry
    }

    fn plan(stmt: &Statement) -> &SelectPlan {
        match stmt.plan() {
            Plan::Select(p) => p,
            _ => panic!("not a select"),
        }
    }

    #[test]
    fn test_join_form() {
        let stmt = Select::from("cart_items")
            .join("products", col("cart_items.product_id").eq(col("products.id")))
            .filter(col("cart_items.cart_id").eq(param(1)))
            .build(&registry())
            .unwrap();

        assert_eq!(
            stmt.to_string(),
            "SELECT * FROM cart_items JOIN products ON cart_items.product_id = products.id \
             WHERE cart_items.cart_id = $1"
        );
        assert_eq!(stmt.param_count(), 1);
        assert_eq!(stmt.tables(), &["cart_items".to_string(), "products".to_string()]);
        assert_eq!(stmt.columns().len(), 6);
        assert_eq!(stmt.columns()[3], "products.id");

        match &plan(&stmt).sources[0] {
            SourcePlan::Join(j) => assert_eq!(j.equi, Some((1, 0))),
            _ => panic!("expected join"),
        }
        assert!(stmt.bind([Value::from("c1")]).is_ok());
    }

    #[test]
    fn test_expansion_form() {
        let stmt = Select::from("json_carts")
            .outer_unnest("json_carts.items", "item", &["product_id", "quantity"])
            .columns(&["json_carts.id", "item.product_id", "item.quantity", "item.ordinal"])
            .order_by("json_carts.id")
            .build(&registry())
            .unwrap();

        assert_eq!(
            stmt.columns(),
            &[
                "json_carts.id".to_string(),
                "item.product_id".to_string(),
                "item.quantity".to_string(),
                "item.ordinal".to_string()
            ]
        );
        assert_eq!(stmt.tables(), &["json_carts".to_string()]);
        assert!(stmt.to_string().contains("LEFT UNNEST json_carts.items AS item (product_id, quantity)"));
        assert_eq!(plan(&stmt).projection, vec![0, 2, 3, 4]);
    }

    #[test]
    fn test_unnest_errors() {
        let registry = registry();
        assert!(matches!(
            Select::from("json_carts")
                .unnest("json_carts.things", "item", &["x"])
                .build(&registry),
            Err(Error::QueryBuild(ref m)) if m.contains("unknown unnest source")
        ));
        assert!(matches!(
            Select::from("json_carts")
                .unnest("json_carts.id", "item", &["x"])
                .build(&registry),
            Err(Error::QueryBuild(ref m)) if m.contains("not JSON")
        ));
        assert!(Select::from("json_carts")
            .unnest("json_carts.items", "item", &["ordinal"])
            .build(&registry)
            .is_err());
    }

    #[test]
    fn test_unknown_references() {
        let registry = registry();
        assert!(matches!(
            Select::from("orders").build(&registry),
            Err(Error::QueryBuild(_))
        ));
        assert!(matches!(
            Select::from("carts").filter(col("carts.owner").eq(param(1))).build(&registry),
            Err(Error::QueryBuild(_))
        ));
        assert!(matches!(
            Select::from("carts").order_by("name").build(&registry),
            Err(Error::QueryBuild(_))
        ));
        assert!(matches!(
            Select::from("carts").join("carts", col("id").eq(col("id"))).build(&registry),
            Err(Error::QueryBuild(_))
        ));
    }

    #[test]
    fn test_left_join_all_carts() {
        let stmt = Select::from("carts")
            .left_join("cart_items", col("cart_items.cart_id").eq(col("carts.id")))
            .order_by("carts.id")
            .order_by_desc("cart_items.quantity")
            .build(&registry())
            .unwrap();
        assert!(stmt
            .to_string()
            .ends_with("ORDER BY carts.id, cart_items.quantity DESC"));
        assert_eq!(stmt.param_count(), 0);
    }
}
