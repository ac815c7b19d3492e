//! DELETE builder

use std::sync::Arc;

use linkdb_core::{Result, Table};

use super::expr::{resolve_expr, Expr, Params, Predicate, Scope};
use super::{and_filter, lookup_table, where_clause, BuildStatement, Plan, Statement};
use crate::schema::SchemaRegistry;

/// `DELETE FROM table WHERE filter`
///
/// Deleting a row that other rows reference follows the foreign key's
/// on-delete action (restrict or cascade).
#[derive(Debug, Clone)]
pub struct Delete {
    table: String,
    filter: Option<Expr>,
}

#[derive(Debug)]
pub(crate) struct DeletePlan {
    pub(crate) table: Arc<Table>,
    pub(crate) filter: Option<Predicate>,
}

impl Delete {
    /// Delete rows from `table`
    pub fn from(table: &str) -> Self {
        Delete {
            table: table.to_string(),
            filter: None,
        }
    }

    /// Restrict the rows deleted; repeated calls are ANDed
    pub fn filter(mut self, expr: Expr) -> Self {
        self.filter = and_filter(self.filter.take(), expr);
        self
    }
}

impl BuildStatement for Delete {
    fn build(&self, registry: &SchemaRegistry) -> Result<Statement> {
        let table = lookup_table(registry, &self.table)?;
        let mut scope = Scope::new();
        scope.push(
            &table.name,
            table.columns.iter().map(|c| c.name.clone()).collect(),
        )?;
        let mut params = Params::default();
        let filter = self
            .filter
            .as_ref()
            .map(|f| resolve_expr(f, &scope, &mut params))
            .transpose()?;

        let text = format!("DELETE FROM {}{}", self.table, where_clause(&self.filter));
        let plan = DeletePlan {
            table: Arc::clone(&table),
            filter,
        };
        Ok(Statement::new(
            Plan::Delete(plan),
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
    use linkdb_core::{DataType, Error};

    #[test]
    fn test_build() {
        let mut registry = SchemaRegistry::new();
        registry
            .register(
                Table::builder("carts")
                    .column("id", DataType::String)
                    .primary_key(&["id"])
                    .build()
                    .unwrap(),
            )
            .unwrap();

        let stmt = Delete::from("carts")
            .filter(col("carts.id").eq(param(1)))
            .build(&registry)
            .unwrap();
        assert_eq!(stmt.to_string(), "DELETE FROM carts WHERE carts.id = $1");
        assert_eq!(stmt.tables(), &["carts".to_string()]);

        assert!(matches!(
            Delete::from("nope").build(&registry),
            Err(Error::QueryBuild(_))
        ));
    }
}
