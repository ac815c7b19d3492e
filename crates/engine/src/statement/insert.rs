//! INSERT builder

use std::sync::Arc;

use linkdb_core::{Error, Result, Table};

use super::expr::{resolve_value, Operand, Params, Slot};
use super::{lookup_table, BuildStatement, Plan, Statement};
use crate::schema::SchemaRegistry;

/// `INSERT [OR REPLACE] INTO table (columns) VALUES (...), (...)`
///
/// Columns left out of the list take their default.
#[derive(Debug, Clone)]
pub struct Insert {
    table: String,
    columns: Option<Vec<String>>,
    rows: Vec<Vec<Operand>>,
    or_replace: bool,
}

#[derive(Debug)]
pub(crate) struct InsertPlan {
    pub(crate) table: Arc<Table>,
    /// Target column position for each value in a row
    pub(crate) columns: Vec<usize>,
    pub(crate) rows: Vec<Vec<Slot>>,
    pub(crate) or_replace: bool,
}

impl Insert {
    /// Insert into `table`
    pub fn into(table: &str) -> Self {
        Insert {
            table: table.to_string(),
            columns: None,
            rows: Vec::new(),
            or_replace: false,
        }
    }

    /// Name the target columns; defaults to every column in table order
    pub fn columns(mut self, columns: &[&str]) -> Self {
        self.columns = Some(columns.iter().map(|c| c.to_string()).collect());
        self
    }

    /// Add a row of values
    pub fn values(mut self, values: Vec<Operand>) -> Self {
        self.rows.push(values);
        self
    }

    /// Replace an existing row with the same primary key instead of failing
    pub fn or_replace(mut self) -> Self {
        self.or_replace = true;
        self
    }

    fn render(&self, columns: &[String]) -> String {
        let rows: Vec<String> = self
            .rows
            .iter()
            .map(|r| {
                let values: Vec<String> = r.iter().map(|v| v.to_string()).collect();
                format!("({})", values.join(", "))
            })
            .collect();
        format!(
            "INSERT {}INTO {} ({}) VALUES {}",
            if self.or_replace { "OR REPLACE " } else { "" },
            self.table,
            columns.join(", "),
            rows.join(", ")
        )
    }
}

impl BuildStatement for Insert {
    fn build(&self, registry: &SchemaRegistry) -> Result<Statement> {
        let table = lookup_table(registry, &self.table)?;

        let names: Vec<String> = match &self.columns {
            Some(cols) => cols.clone(),
            None => table.columns.iter().map(|c| c.name.clone()).collect(),
        };
        let mut columns = Vec::with_capacity(names.len());
        for name in &names {
            let idx = table.column_index(name).ok_or_else(|| {
                Error::query_build(format!("unknown column {}.{}", self.table, name))
            })?;
            if columns.contains(&idx) {
                return Err(Error::query_build(format!(
                    "column {} listed more than once",
                    name
                )));
            }
            columns.push(idx);
        }

        if self.rows.is_empty() {
            return Err(Error::query_build("insert has no rows"));
        }

        let mut params = Params::default();
        let mut rows = Vec::with_capacity(self.rows.len());
        for (n, row) in self.rows.iter().enumerate() {
            if row.len() != columns.len() {
                return Err(Error::query_build(format!(
                    "row {} has {} values for {} columns",
                    n + 1,
                    row.len(),
                    columns.len()
                )));
            }
            rows.push(
                row.iter()
                    .map(|op| resolve_value(op, &mut params))
                    .collect::<Result<Vec<_>>>()?,
            );
        }

        let text = self.render(&names);
        let plan = InsertPlan {
            table: Arc::clone(&table),
            columns,
            rows,
            or_replace: self.or_replace,
        };
        Ok(Statement::new(
            Plan::Insert(plan),
            params.count(),
            vec![table.name.clone()],
            text,
        ))
    }
}
