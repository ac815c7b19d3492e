//! Statement builder
//!
//! Statements are assembled with fluent builders (`Insert`, `Update`,
//! `Delete`, `Select`) and turned into an executable `Statement` by
//! `build(&registry)`. Building resolves every table and column reference
//! against the schema registry and fails with `QueryBuildError` before
//! anything reaches storage.
//!
//! Values are literals or positional parameters (`$1`, `$2`, ...).
//! `Statement::bind` checks the parameter count and yields a
//! `BoundStatement` ready to run.
//!
//! # Example
//!
//! ```ignore
//! let stmt = Select::from("cart_items")
//!     .join("products", col("cart_items.product_id").eq(col("products.id")))
//!     .filter(col("cart_items.cart_id").eq(param(1)))
//!     .build(&registry)?;
//! let rows = db.query(&stmt.bind([Value::from("c1")])?)?;
//! ```

mod delete;
mod expr;
mod insert;
mod select;
mod update;

pub use delete::Delete;
pub use expr::{col, lit, param, ColumnRef, Expr, Operand};
pub use insert::Insert;
pub use select::{JoinKind, Select, SortOrder};
pub use update::Update;

pub(crate) use delete::DeletePlan;
pub(crate) use expr::{Predicate, Slot};
pub(crate) use insert::InsertPlan;
pub(crate) use select::{JoinPlan, SelectPlan, SourcePlan, UnnestPlan};
pub(crate) use update::UpdatePlan;

use std::fmt;
use std::sync::Arc;

use linkdb_core::{Error, Result, Value};

use crate::schema::SchemaRegistry;

/// Anything that can be built into a `Statement`
pub trait BuildStatement {
    /// Resolve against `registry` and produce an executable statement
    fn build(&self, registry: &SchemaRegistry) -> Result<Statement>;
}

/// What a statement does
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatementKind {
    /// INSERT / INSERT OR REPLACE
    Insert,
    /// UPDATE
    Update,
    /// DELETE
    Delete,
    /// SELECT
    Select,
}

#[derive(Debug)]
pub(crate) enum Plan {
    Insert(InsertPlan),
    Update(UpdatePlan),
    Delete(DeletePlan),
    Select(SelectPlan),
}

#[derive(Debug)]
struct StatementInner {
    plan: Plan,
    param_count: usize,
    tables: Vec<String>,
    text: String,
}

/// A validated, parameterized statement
///
/// Cheap to clone. Renders as SQL-like text via `Display`.
#[derive(Debug, Clone)]
pub struct Statement {
    inner: Arc<StatementInner>,
}

impl Statement {
    pub(crate) fn new(plan: Plan, param_count: usize, tables: Vec<String>, text: String) -> Self {
        Statement {
            inner: Arc::new(StatementInner {
                plan,
                param_count,
                tables,
                text,
            }),
        }
    }

    pub(crate) fn plan(&self) -> &Plan {
        &self.inner.plan
    }

    /// What the statement does
    pub fn kind(&self) -> StatementKind {
        match self.inner.plan {
            Plan::Insert(_) => StatementKind::Insert,
            Plan::Update(_) => StatementKind::Update,
            Plan::Delete(_) => StatementKind::Delete,
            Plan::Select(_) => StatementKind::Select,
        }
    }

    /// True for SELECT
    pub fn is_select(&self) -> bool {
        self.kind() == StatementKind::Select
    }

    /// Number of parameters `bind` expects
    pub fn param_count(&self) -> usize {
        self.inner.param_count
    }

    /// Tables the statement reads from (select) or writes to
    pub fn tables(&self) -> &[String] {
        &self.inner.tables
    }

    /// Output column names of a select, qualified as `source.column`
    pub fn columns(&self) -> &[String] {
        match &self.inner.plan {
            Plan::Select(plan) => &plan.columns,
            _ => &[],
        }
    }

    /// Attach parameter values
    ///
    /// # Errors
    ///
    /// `QueryBuildError` if the number of values differs from `param_count()`.
    pub fn bind(&self, params: impl IntoIterator<Item = Value>) -> Result<BoundStatement> {
        let params: Vec<Value> = params.into_iter().collect();
        if params.len() != self.param_count() {
            return Err(Error::query_build(format!(
                "statement takes {} parameters, {} given",
                self.param_count(),
                params.len()
            )));
        }
        Ok(BoundStatement {
            statement: self.clone(),
            params,
        })
    }
}

impl fmt::Display for Statement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.inner.text)
    }
}

/// A statement together with its parameter values
#[derive(Debug, Clone)]
pub struct BoundStatement {
    statement: Statement,
    params: Vec<Value>,
}

impl BoundStatement {
    /// The statement
    pub fn statement(&self) -> &Statement {
        &self.statement
    }

    /// Parameter values, `$1` first
    pub fn params(&self) -> &[Value] {
        &self.params
    }
}

impl fmt::Display for BoundStatement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.statement)?;
        if !self.params.is_empty() {
            let params: Vec<String> = self.params.iter().map(|p| p.to_string()).collect();
            write!(f, " -- [{}]", params.join(", "))?;
        }
        Ok(())
    }
}

/// Look up a table for a statement; unknown tables are a build error
pub(crate) fn lookup_table(
    registry: &SchemaRegistry,
    name: &str,
) -> Result<Arc<linkdb_core::Table>> {
    registry
        .get(name)
        .cloned()
        .ok_or_else(|| Error::query_build(format!("unknown table {}", name)))
}

/// Render an optional WHERE clause
pub(crate) fn where_clause(filter: &Option<Expr>) -> String {
    match filter {
        Some(expr) => format!(" WHERE {}", expr),
        None => String::new(),
    }
}

/// AND a new condition onto an optional one
pub(crate) fn and_filter(existing: Option<Expr>, expr: Expr) -> Option<Expr> {
    Some(match existing {
        Some(prev) => prev.and(expr),
        None => expr,
    })
}
