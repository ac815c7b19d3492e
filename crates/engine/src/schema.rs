//! Schema registry
//!
//! Holds every registered table definition and enforces cross-table rules
//! that a single `Table` cannot check on its own: foreign keys must point at
//! a registered table, at existing columns, and at that table's primary key
//! or one of its unique constraints.
//!
//! The registry is a plain value. The database keeps it behind
//! `RwLock<Arc<SchemaRegistry>>` and swaps in a modified copy on every
//! registration, so statements and transactions can hold a consistent
//! version without locking.

use std::collections::BTreeMap;
use std::sync::Arc;

use linkdb_core::{Error, ForeignKey, Result, Table};

/// Registered table definitions, keyed by name
#[derive(Debug, Clone, Default)]
pub struct SchemaRegistry {
    tables: BTreeMap<String, Arc<Table>>,
}

impl SchemaRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a registry from previously registered tables
    ///
    /// Tables may reference each other in any order; references are checked
    /// once every table is present.
    pub fn from_tables(tables: impl IntoIterator<Item = Table>) -> Result<Self> {
        let mut registry = Self::new();
        for table in tables {
            table.validate()?;
            if registry.tables.contains_key(&table.name) {
                return Err(Error::schema(format!("table {} already exists", table.name)));
            }
            registry.tables.insert(table.name.clone(), Arc::new(table));
        }
        for table in registry.tables.values() {
            registry.check_references(table)?;
        }
        Ok(registry)
    }

    /// Register a table
    ///
    /// # Errors
    ///
    /// `SchemaError` if the name is taken, the table is invalid on its own,
    /// or a foreign key references an unknown table, an unknown column, or
    /// columns that are neither the target's primary key nor unique.
    pub fn register(&mut self, table: Table) -> Result<Arc<Table>> {
        if self.tables.contains_key(&table.name) {
            return Err(Error::schema(format!("table {} already exists", table.name)));
        }
        table.validate()?;
        self.check_references(&table)?;

        let table = Arc::new(table);
        self.tables.insert(table.name.clone(), Arc::clone(&table));
        Ok(table)
    }

    fn check_references(&self, table: &Table) -> Result<()> {
        for fk in &table.foreign_keys {
            // Self-references resolve against the table being registered
            let target = if fk.ref_table == table.name {
                table
            } else {
                self.tables.get(&fk.ref_table).map(Arc::as_ref).ok_or_else(|| {
                    Error::schema(format!(
                        "foreign key on {} references unknown table {}",
                        table.name, fk.ref_table
                    ))
                })?
            };

            for (local, remote) in fk.columns.iter().zip(&fk.ref_columns) {
                let remote_col = target.column(remote).ok_or_else(|| {
                    Error::schema(format!(
                        "foreign key on {} references unknown column {}.{}",
                        table.name, fk.ref_table, remote
                    ))
                })?;
                let local_col = table.column(local).ok_or_else(|| {
                    Error::schema(format!("column {} not found in table {}", local, table.name))
                })?;
                if local_col.data_type != remote_col.data_type {
                    return Err(Error::schema(format!(
                        "foreign key column {}.{} is {} but {}.{} is {}",
                        table.name,
                        local,
                        local_col.data_type,
                        fk.ref_table,
                        remote,
                        remote_col.data_type
                    )));
                }
            }

            if !target.is_unique_set(&fk.ref_columns) {
                return Err(Error::schema(format!(
                    "foreign key on {} must reference the primary key or a unique constraint of {}",
                    table.name, fk.ref_table
                )));
            }
        }
        Ok(())
    }

    /// Fetch a table definition
    pub fn get(&self, name: &str) -> Option<&Arc<Table>> {
        self.tables.get(name)
    }

    /// Fetch a table definition, failing with `SchemaError` if it is unknown
    pub fn table(&self, name: &str) -> Result<&Arc<Table>> {
        self.tables
            .get(name)
            .ok_or_else(|| Error::schema(format!("no table named {}", name)))
    }

    /// Whether a table is registered
    pub fn contains(&self, name: &str) -> bool {
        self.tables.contains_key(name)
    }

    /// All tables, ordered by name
    pub fn tables(&self) -> impl Iterator<Item = &Arc<Table>> {
        self.tables.values()
    }

    /// Number of registered tables
    pub fn len(&self) -> usize {
        self.tables.len()
    }

    /// True if nothing is registered
    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    /// Every foreign key that points at `name`, with its owning table
    pub fn referencing(&self, name: &str) -> Vec<(&Table, &ForeignKey)> {
        self.tables
            .values()
            .flat_map(|t| {
                t.foreign_keys
                    .iter()
                    .filter(move |fk| fk.ref_table == name)
                    .map(move |fk| (t.as_ref(), fk))
            })
            .collect()
    }

    /// Remove a table definition
    ///
    /// Fails while another table still holds a foreign key to it.
    pub fn drop(&mut self, name: &str) -> Result<Arc<Table>> {
        if !self.tables.contains_key(name) {
            return Err(Error::schema(format!("no table named {}", name)));
        }
        if let Some((other, _)) = self.referencing(name).into_iter().find(|(t, _)| t.name != name) {
            return Err(Error::schema(format!(
                "cannot drop {}: referenced by {}",
                name, other.name
            )));
        }
        self.tables
            .remove(name)
            .ok_or_else(|| Error::schema(format!("no table named {}", name)))
    }
}
