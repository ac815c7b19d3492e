//! Table schema types
//!
//! A `Table` is a name, an ordered list of typed columns, a primary key and
//! optional foreign keys and unique constraints. Tables are assembled with
//! `TableBuilder`, which checks everything that can be checked without
//! looking at other tables. Cross-table checks (foreign key targets) belong
//! to the schema registry in the engine.

use crate::error::{Error, Result};
use crate::key::RowKey;
use crate::value::Value;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

/// A row: one value per column, in column order
pub type Row = Vec<Value>;

/// Column data type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DataType {
    /// Boolean
    Bool,
    /// 64-bit signed integer
    Int,
    /// 64-bit float
    Float,
    /// UTF-8 string
    String,
    /// Structured JSON value (arrays and objects)
    Json,
}

impl DataType {
    /// Whether a non-null value is acceptable for this type
    pub fn accepts(&self, value: &Value) -> bool {
        match (self, value) {
            (_, Value::Null) => true,
            (DataType::Bool, Value::Bool(_)) => true,
            (DataType::Int, Value::Int(_)) => true,
            (DataType::Float, Value::Float(_)) => true,
            (DataType::String, Value::String(_)) => true,
            (DataType::Json, _) => true,
            _ => false,
        }
    }

    /// Whether columns of this type may be part of a key
    pub fn is_keyable(&self) -> bool {
        matches!(self, DataType::Int | DataType::String)
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DataType::Bool => "BOOLEAN",
            DataType::Int => "INTEGER",
            DataType::Float => "FLOAT",
            DataType::String => "TEXT",
            DataType::Json => "JSON",
        };
        f.write_str(name)
    }
}

/// A table column
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Column {
    /// Column name
    pub name: String,
    /// Column type
    pub data_type: DataType,
    /// Whether NULL is allowed
    pub nullable: bool,
    /// Value used when an insert omits the column
    pub default: Option<Value>,
}

/// What happens to referencing rows when a referenced row is deleted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OnDelete {
    /// Refuse the delete with a constraint violation
    Restrict,
    /// Delete the referencing rows too
    Cascade,
}

/// Foreign key from `columns` to `ref_columns` of `ref_table`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForeignKey {
    /// Referencing columns in this table
    pub columns: Vec<String>,
    /// Referenced table
    pub ref_table: String,
    /// Referenced columns (the target's primary key or a unique constraint)
    pub ref_columns: Vec<String>,
    /// Delete behavior
    pub on_delete: OnDelete,
}

/// Table schema
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Table {
    /// Table name
    pub name: String,
    /// Columns in row order
    pub columns: Vec<Column>,
    /// Primary-key column names
    pub primary_key: Vec<String>,
    /// Foreign keys
    pub foreign_keys: Vec<ForeignKey>,
    /// Unique constraints (each a set of column names)
    pub unique: Vec<Vec<String>>,
}

impl Table {
    /// Start building a table
    pub fn builder(name: impl Into<String>) -> TableBuilder {
        TableBuilder::new(name)
    }

    /// Fetch a column by name
    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Position of a column in a row
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    /// Positions of several columns, failing on the first unknown one
    pub fn column_indices(&self, names: &[String]) -> Result<Vec<usize>> {
        names
            .iter()
            .map(|n| {
                self.column_index(n).ok_or_else(|| {
                    Error::schema(format!("column {} not found in table {}", n, self.name))
                })
            })
            .collect()
    }

    /// Positions of the primary-key columns
    pub fn primary_key_indices(&self) -> Vec<usize> {
        self.primary_key
            .iter()
            .filter_map(|n| self.column_index(n))
            .collect()
    }

    /// Extract the primary key of a row
    pub fn row_key(&self, row: &[Value]) -> Result<RowKey> {
        RowKey::from_values(
            self.primary_key_indices()
                .into_iter()
                .map(|i| row.get(i).unwrap_or(Value::null_ref())),
        )
    }

    /// Whether `columns` is exactly the primary key or a unique constraint
    pub fn is_unique_set(&self, columns: &[String]) -> bool {
        let wanted: HashSet<&String> = columns.iter().collect();
        let same = |set: &Vec<String>| {
            set.len() == columns.len() && set.iter().all(|c| wanted.contains(c))
        };
        same(&self.primary_key) || self.unique.iter().any(same)
    }

    /// Render the table as a CREATE TABLE statement
    pub fn as_sql(&self) -> String {
        let mut parts: Vec<String> = self
            .columns
            .iter()
            .map(|c| {
                let mut s = format!("  {} {}", c.name, c.data_type);
                if !c.nullable {
                    s.push_str(" NOT NULL");
                }
                if let Some(default) = &c.default {
                    s.push_str(&format!(" DEFAULT {}", default));
                }
                s
            })
            .collect();
        parts.push(format!("  PRIMARY KEY ({})", self.primary_key.join(", ")));
        for unique in &self.unique {
            parts.push(format!("  UNIQUE ({})", unique.join(", ")));
        }
        for fk in &self.foreign_keys {
            let action = match fk.on_delete {
                OnDelete::Restrict => "",
                OnDelete::Cascade => " ON DELETE CASCADE",
            };
            parts.push(format!(
                "  FOREIGN KEY ({}) REFERENCES {} ({}){}",
                fk.columns.join(", "),
                fk.ref_table,
                fk.ref_columns.join(", "),
                action
            ));
        }
        format!("CREATE TABLE {} (\n{}\n)", self.name, parts.join(",\n"))
    }

    /// Validates the table on its own (no cross-table checks)
    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(Error::schema("table name is empty"));
        }
        if self.columns.is_empty() {
            return Err(Error::schema(format!("table {} has no columns", self.name)));
        }
        let mut seen = HashSet::new();
        for column in &self.columns {
            if !seen.insert(column.name.as_str()) {
                return Err(Error::schema(format!(
                    "column {} given multiple times in table {}",
                    column.name, self.name
                )));
            }
            if let Some(default) = &column.default {
                if !column.data_type.accepts(default) {
                    return Err(Error::schema(format!(
                        "default for column {} is not a {}",
                        column.name, column.data_type
                    )));
                }
            }
        }
        if self.primary_key.is_empty() {
            return Err(Error::schema(format!("no primary key in table {}", self.name)));
        }
        for idx in self.column_indices(&self.primary_key)? {
            let column = &self.columns[idx];
            if !column.data_type.is_keyable() {
                return Err(Error::schema(format!(
                    "primary key column {} has non-key type {}",
                    column.name, column.data_type
                )));
            }
        }
        for unique in &self.unique {
            if unique.is_empty() {
                return Err(Error::schema(format!("empty unique constraint in table {}", self.name)));
            }
            self.column_indices(unique)?;
        }
        for fk in &self.foreign_keys {
            if fk.columns.is_empty() || fk.columns.len() != fk.ref_columns.len() {
                return Err(Error::schema(format!(
                    "foreign key in table {} to {} has mismatched column counts",
                    self.name, fk.ref_table
                )));
            }
            self.column_indices(&fk.columns)?;
        }
        Ok(())
    }
}

/// Fluent builder for `Table`
#[derive(Debug, Clone)]
pub struct TableBuilder {
    table: Table,
}

impl TableBuilder {
    /// Create a builder for a table named `name`
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            table: Table {
                name: name.into(),
                columns: Vec::new(),
                primary_key: Vec::new(),
                foreign_keys: Vec::new(),
                unique: Vec::new(),
            },
        }
    }

    /// Add a NOT NULL column
    pub fn column(mut self, name: impl Into<String>, data_type: DataType) -> Self {
        self.table.columns.push(Column {
            name: name.into(),
            data_type,
            nullable: false,
            default: None,
        });
        self
    }

    /// Add a nullable column (defaults to NULL)
    pub fn nullable_column(mut self, name: impl Into<String>, data_type: DataType) -> Self {
        self.table.columns.push(Column {
            name: name.into(),
            data_type,
            nullable: true,
            default: Some(Value::Null),
        });
        self
    }

    /// Set a default value on the most recently added column
    pub fn default_value(mut self, value: impl Into<Value>) -> Self {
        if let Some(column) = self.table.columns.last_mut() {
            column.default = Some(value.into());
        }
        self
    }

    /// Set the primary key
    pub fn primary_key(mut self, columns: &[&str]) -> Self {
        self.table.primary_key = columns.iter().map(|c| c.to_string()).collect();
        self
    }

    /// Add a unique constraint
    pub fn unique(mut self, columns: &[&str]) -> Self {
        self.table
            .unique
            .push(columns.iter().map(|c| c.to_string()).collect());
        self
    }

    /// Add a foreign key
    pub fn foreign_key(
        mut self,
        columns: &[&str],
        ref_table: impl Into<String>,
        ref_columns: &[&str],
        on_delete: OnDelete,
    ) -> Self {
        self.table.foreign_keys.push(ForeignKey {
            columns: columns.iter().map(|c| c.to_string()).collect(),
            ref_table: ref_table.into(),
            ref_columns: ref_columns.iter().map(|c| c.to_string()).collect(),
            on_delete,
        });
        self
    }

    /// Validate and return the table
    pub fn build(self) -> Result<Table> {
        self.table.validate()?;
        Ok(self.table)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cart_items() -> Table {
        Table::builder("cart_items")
            .column("cart_id", DataType::String)
            .column("product_id", DataType::String)
            .column("quantity", DataType::Int)
            .default_value(1i64)
            .primary_key(&["cart_id", "product_id"])
            .foreign_key(&["cart_id"], "carts", &["id"], OnDelete::Cascade)
            .foreign_key(&["product_id"], "products", &["id"], OnDelete::Restrict)
            .build()
            .unwrap()
    }

    #[test]
    fn test_build_and_lookup() {
        let table = cart_items();
        assert_eq!(table.column_index("quantity"), Some(2));
        assert_eq!(table.primary_key_indices(), vec![0, 1]);
        assert!(table.is_unique_set(&["product_id".to_string(), "cart_id".to_string()]));
        assert!(!table.is_unique_set(&["cart_id".to_string()]));
    }

    #[test]
    fn test_row_key() {
        let table = cart_items();
        let key = table
            .row_key(&[Value::from("c1"), Value::from("p1"), Value::Int(2)])
            .unwrap();
        assert_eq!(key.to_values(), vec![Value::from("c1"), Value::from("p1")]);
    }

    #[test]
    fn test_missing_primary_key_rejected() {
        let err = Table::builder("t")
            .column("id", DataType::Int)
            .build()
            .unwrap_err();
        assert!(matches!(err, Error::Schema(_)));
    }

    #[test]
    fn test_json_primary_key_rejected() {
        let err = Table::builder("t")
            .column("doc", DataType::Json)
            .primary_key(&["doc"])
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("non-key type"));
    }

    #[test]
    fn test_duplicate_column_rejected() {
        let err = Table::builder("t")
            .column("id", DataType::Int)
            .column("id", DataType::String)
            .primary_key(&["id"])
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("multiple times"));
    }

    #[test]
    fn test_fk_on_unknown_local_column_rejected() {
        let err = Table::builder("t")
            .column("id", DataType::Int)
            .primary_key(&["id"])
            .foreign_key(&["other"], "x", &["id"], OnDelete::Restrict)
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("other"));
    }

    #[test]
    fn test_as_sql() {
        let sql = cart_items().as_sql();
        assert!(sql.starts_with("CREATE TABLE cart_items"));
        assert!(sql.contains("PRIMARY KEY (cart_id, product_id)"));
        assert!(sql.contains("REFERENCES carts (id) ON DELETE CASCADE"));
        assert!(sql.contains("quantity INTEGER NOT NULL DEFAULT 1"));
    }

    #[test]
    fn test_type_acceptance() {
        assert!(DataType::Int.accepts(&Value::Int(1)));
        assert!(!DataType::Int.accepts(&Value::Float(1.0)));
        assert!(DataType::Json.accepts(&Value::Array(vec![])));
        assert!(DataType::String.accepts(&Value::Null));
    }
}
