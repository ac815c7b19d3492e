//! UPDATE builder

use std::sync::Arc;

use linkdb_core::{Error, Result, Table};

use super::expr::{resolve_expr, resolve_value, Expr, Operand, Params, Predicate, Scope, Slot};
use super::{and_filter, lookup_table, where_clause, BuildStatement, Plan, Statement};
use crate::schema::SchemaRegistry;

/// `UPDATE table SET column = value, ... WHERE filter`
///
/// Primary-key columns cannot be assigned; delete and re-insert instead.
#[derive(Debug, Clone)]
pub struct Update {
    table: String,
    assignments: Vec<(String, Operand)>,
    filter: Option<Expr>,
}

#[derive(Debug)]
pub(crate) struct UpdatePlan {
    pub(crate) table: Arc<Table>,
    pub(crate) assignments: Vec<(usize, Slot)>,
    pub(crate) filter: Option<Predicate>,
}

impl Update {
    /// Update rows of `table`
    pub fn table(table: &str) -> Self {
        Update {
            table: table.to_string(),
            assignments: Vec::new(),
            filter: None,
        }
    }

    /// Assign a column
    pub fn set(mut self, column: &str, value: Operand) -> Self {
        self.assignments.push((column.to_string(), value));
        self
    }

    /// Restrict the rows updated; repeated calls are ANDed
    pub fn filter(mut self, expr: Expr) -> Self {
        self.filter = and_filter(self.filter.take(), expr);
        self
    }
}

impl BuildStatement for Update {
    fn build(&self, registry: &SchemaRegistry) -> Result<Statement> {
        let table = lookup_table(registry, &self.table)?;
        if self.assignments.is_empty() {
            return Err(Error::query_build("update assigns no columns"));
        }

        let mut scope = Scope::new();
        scope.push(
            &table.name,
            table.columns.iter().map(|c| c.name.clone()).collect(),
        )?;
        let mut params = Params::default();

        let mut assignments = Vec::with_capacity(self.assignments.len());
        for (name, value) in &self.assignments {
            let idx = table.column_index(name).ok_or_else(|| {
                Error::query_build(format!("unknown column {}.{}", self.table, name))
            })?;
            if table.primary_key.contains(name) {
                return Err(Error::query_build(format!(
                    "cannot update primary key column {}",
                    name
                )));
            }
            if assignments.iter().any(|(i, _)| *i == idx) {
                return Err(Error::query_build(format!("column {} assigned twice", name)));
            }
            assignments.push((idx, resolve_value(value, &mut params)?));
        }

        let filter = self
            .filter
            .as_ref()
            .map(|f| resolve_expr(f, &scope, &mut params))
            .transpose()?;

        let sets: Vec<String> = self
            .assignments
            .iter()
            .map(|(c, v)| format!("{} = {}", c, v))
            .collect();
        let text = format!(
            "UPDATE {} SET {}{}",
            self.table,
            sets.join(", "),
            where_clause(&self.filter)
        );

        let plan = UpdatePlan {
            table: Arc::clone(&table),
            assignments,
            filter,
        };
        Ok(Statement::new(
            Plan::Update(plan),
            params.count(),
            vec![table.name.clone()],
            text,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::statement::{col, param};
    use linkdb_core::DataType;

    fn registry() -> SchemaRegistry {
        let mut registry = SchemaRegistry::new();
        registry
            .register(
                Table::builder("json_carts")
                    .column("id", DataType::String)
                    .column("items", DataType::Json)
                    .primary_key(&["id"])
                    .build()
                    .unwrap(),
            )
            .unwrap();
        registry
    }

    #[test]
    fn test_build_and_render() {
        let stmt = Update::table("json_carts")
            .set("items", param(2))
            .filter(col("id").eq(param(1)))
            .build(&registry())
            .unwrap();
        assert_eq!(stmt.param_count(), 2);
        assert_eq!(stmt.to_string(), "UPDATE json_carts SET items = $2 WHERE id = $1");
    }

    #[test]
    fn test_primary_key_not_assignable() {
        let err = Update::table("json_carts")
            .set("id", param(1))
            .build(&registry())
            .unwrap_err();
        assert!(matches!(err, Error::QueryBuild(_)));
    }

    #[test]
    fn test_unknown_filter_column() {
        let err = Update::table("json_carts")
            .set("items", param(1))
            .filter(col("owner").eq(param(2)))
            .build(&registry())
            .unwrap_err();
        assert!(matches!(err, Error::QueryBuild(_)));
    }
}
