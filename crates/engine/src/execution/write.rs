//! INSERT / UPDATE / DELETE execution
//!
//! Every row is checked against its table's constraints before it is
//! buffered in the transaction. Foreign keys are checked against the
//! transaction's own view, so a parent inserted earlier in the same
//! transaction satisfies a child inserted later.

use std::collections::HashSet;

use tracing::trace;

use linkdb_concurrency::TransactionContext;
use linkdb_core::{ConstraintKind, Error, ForeignKey, OnDelete, Result, Row, RowKey, Table, Value};

use super::{cell, eval_slot, passes};
use crate::schema::SchemaRegistry;
use crate::statement::{DeletePlan, InsertPlan, UpdatePlan};

pub(crate) fn execute_insert(
    plan: &InsertPlan,
    params: &[Value],
    txn: &mut TransactionContext,
    registry: &SchemaRegistry,
) -> Result<u64> {
    let table = &plan.table;
    let mut count = 0;
    for slots in &plan.rows {
        let mut row: Row = table
            .columns
            .iter()
            .map(|c| c.default.clone().unwrap_or(Value::Null))
            .collect();
        for (pos, slot) in plan.columns.iter().zip(slots) {
            row[*pos] = eval_slot(slot, &[], params).clone();
        }

        check_row(table, &row)?;
        let key = table.row_key(&row)?;
        let existing = txn.get(&table.name, &key)?;
        if existing.is_some() && !plan.or_replace {
            return Err(Error::constraint(
                &table.name,
                ConstraintKind::PrimaryKey,
                format!("duplicate key {}", key),
            ));
        }
        check_unique(txn, table, &key, &row)?;
        check_foreign_keys(txn, registry, table, &row)?;
        if let Some(old) = &existing {
            check_referenced_unchanged(txn, registry, table, old, &row)?;
        }

        txn.put(&table.name, key, row)?;
        count += 1;
    }
    trace!(table = %table.name, rows = count, "insert");
    Ok(count)
}

pub(crate) fn execute_update(
    plan: &UpdatePlan,
    params: &[Value],
    txn: &mut TransactionContext,
    registry: &SchemaRegistry,
) -> Result<u64> {
    let table = &plan.table;
    let targets: Vec<(RowKey, Row)> = txn
        .scan(&table.name)?
        .into_iter()
        .filter(|(_, row)| plan.filter.as_ref().map_or(true, |f| passes(f, row, params)))
        .collect();

    let mut count = 0;
    for (key, old) in targets {
        let mut row = old.clone();
        for (pos, slot) in &plan.assignments {
            row[*pos] = eval_slot(slot, &old, params).clone();
        }
        check_row(table, &row)?;
        check_unique(txn, table, &key, &row)?;
        check_foreign_keys(txn, registry, table, &row)?;
        check_referenced_unchanged(txn, registry, table, &old, &row)?;

        txn.put(&table.name, key, row)?;
        count += 1;
    }
    trace!(table = %table.name, rows = count, "update");
    Ok(count)
}

pub(crate) fn execute_delete(
    plan: &DeletePlan,
    params: &[Value],
    txn: &mut TransactionContext,
    registry: &SchemaRegistry,
) -> Result<u64> {
    let table = &plan.table;
    let targets: Vec<(RowKey, Row)> = txn
        .scan(&table.name)?
        .into_iter()
        .filter(|(_, row)| plan.filter.as_ref().map_or(true, |f| passes(f, row, params)))
        .collect();

    let mut visited = HashSet::new();
    let mut count = 0;
    for (key, row) in targets {
        if visited.contains(&(table.name.clone(), key.clone())) {
            // Already removed by a cascade from an earlier target
            continue;
        }
        delete_row(txn, registry, table, key, &row, &mut visited)?;
        count += 1;
    }
    trace!(table = %table.name, rows = count, cascaded = visited.len() as u64 - count, "delete");
    Ok(count)
}

// ============================================================================
// Constraint checks
// ============================================================================

/// Column types, NOT NULL, and non-null primary key
fn check_row(table: &Table, row: &[Value]) -> Result<()> {
    for (column, value) in table.columns.iter().zip(row) {
        if value.is_null() {
            if !column.nullable || table.primary_key.contains(&column.name) {
                return Err(Error::constraint(
                    &table.name,
                    ConstraintKind::NotNull,
                    format!("column {} cannot be null", column.name),
                ));
            }
            continue;
        }
        if !column.data_type.accepts(value) {
            return Err(Error::constraint(
                &table.name,
                ConstraintKind::Type,
                format!(
                    "column {} expects {}, got {}",
                    column.name,
                    column.data_type,
                    value.type_name()
                ),
            ));
        }
    }
    Ok(())
}

fn values_at(row: &[Value], indices: &[usize]) -> Vec<Value> {
    indices.iter().map(|i| cell(row, *i).clone()).collect()
}

/// No other row may share a non-null unique tuple
fn check_unique(txn: &mut TransactionContext, table: &Table, key: &RowKey, row: &[Value]) -> Result<()> {
    if table.unique.is_empty() {
        return Ok(());
    }
    let existing = txn.scan(&table.name)?;
    for unique in &table.unique {
        let indices = table.column_indices(unique)?;
        let wanted = values_at(row, &indices);
        if wanted.iter().any(Value::is_null) {
            continue;
        }
        let clash = existing
            .iter()
            .any(|(k, other)| k != key && values_at(other, &indices) == wanted);
        if clash {
            return Err(Error::constraint(
                &table.name,
                ConstraintKind::Unique,
                format!("duplicate value for ({})", unique.join(", ")),
            ));
        }
    }
    Ok(())
}

/// Every non-null foreign key must point at an existing row
fn check_foreign_keys(
    txn: &mut TransactionContext,
    registry: &SchemaRegistry,
    table: &Table,
    row: &[Value],
) -> Result<()> {
    for fk in &table.foreign_keys {
        let values = values_at(row, &table.column_indices(&fk.columns)?);
        if values.iter().any(Value::is_null) {
            continue;
        }
        let target = registry.table(&fk.ref_table)?;
        let target_indices = target.column_indices(&fk.ref_columns)?;
        if fk.ref_table == table.name && values_at(row, &target_indices) == values {
            // Row references itself
            continue;
        }
        if !referenced_row_exists(txn, target, &target_indices, &values)? {
            return Err(Error::constraint(
                &table.name,
                ConstraintKind::ForeignKey,
                format!(
                    "no row in {} with ({}) = ({})",
                    fk.ref_table,
                    fk.ref_columns.join(", "),
                    display_values(&values)
                ),
            ));
        }
    }
    Ok(())
}

fn referenced_row_exists(
    txn: &mut TransactionContext,
    target: &Table,
    indices: &[usize],
    values: &[Value],
) -> Result<bool> {
    let pk = target.primary_key_indices();
    let by_key = pk.len() == indices.len() && pk.iter().all(|i| indices.contains(i));
    if by_key {
        let mut key_row = vec![Value::Null; target.columns.len()];
        for (idx, value) in indices.iter().zip(values) {
            key_row[*idx] = value.clone();
        }
        // Wrong-typed values cannot form a key, so nothing matches
        let Ok(key) = target.row_key(&key_row) else {
            return Ok(false);
        };
        return Ok(txn.get(&target.name, &key)?.is_some());
    }
    Ok(txn
        .scan(&target.name)?
        .iter()
        .any(|(_, row)| values_at(row, indices) == values))
}

/// Rows referencing `old` by columns that changed would be left dangling
fn check_referenced_unchanged(
    txn: &mut TransactionContext,
    registry: &SchemaRegistry,
    table: &Table,
    old: &[Value],
    new: &[Value],
) -> Result<()> {
    let referencing: Vec<(Table, ForeignKey)> = registry
        .referencing(&table.name)
        .into_iter()
        .map(|(t, fk)| (t.clone(), fk.clone()))
        .collect();
    for (child, fk) in referencing {
        let indices = table.column_indices(&fk.ref_columns)?;
        let before = values_at(old, &indices);
        if before == values_at(new, &indices) || before.iter().any(Value::is_null) {
            continue;
        }
        if !referencing_rows(txn, &child, &fk, &before)?.is_empty() {
            return Err(Error::constraint(
                &table.name,
                ConstraintKind::ForeignKey,
                format!(
                    "({}) = ({}) is still referenced by {}",
                    fk.ref_columns.join(", "),
                    display_values(&before),
                    child.name
                ),
            ));
        }
    }
    Ok(())
}

fn referencing_rows(
    txn: &mut TransactionContext,
    child: &Table,
    fk: &ForeignKey,
    values: &[Value],
) -> Result<Vec<(RowKey, Row)>> {
    let indices = child.column_indices(&fk.columns)?;
    Ok(txn
        .scan(&child.name)?
        .into_iter()
        .filter(|(_, row)| values_at(row, &indices) == values)
        .collect())
}

// ============================================================================
// Delete with on-delete actions
// ============================================================================

fn delete_row(
    txn: &mut TransactionContext,
    registry: &SchemaRegistry,
    table: &Table,
    key: RowKey,
    row: &[Value],
    visited: &mut HashSet<(String, RowKey)>,
) -> Result<()> {
    visited.insert((table.name.clone(), key.clone()));

    let referencing: Vec<(Table, ForeignKey)> = registry
        .referencing(&table.name)
        .into_iter()
        .map(|(t, fk)| (t.clone(), fk.clone()))
        .collect();

    for (child, fk) in referencing {
        let values = values_at(row, &table.column_indices(&fk.ref_columns)?);
        if values.iter().any(Value::is_null) {
            continue;
        }
        let dependents: Vec<(RowKey, Row)> = referencing_rows(txn, &child, &fk, &values)?
            .into_iter()
            .filter(|(k, _)| !visited.contains(&(child.name.clone(), k.clone())))
            .collect();
        if dependents.is_empty() {
            continue;
        }
        match fk.on_delete {
            OnDelete::Restrict => {
                return Err(Error::constraint(
                    &table.name,
                    ConstraintKind::ForeignKey,
                    format!(
                        "row {} is referenced by {} row(s) in {}",
                        key,
                        dependents.len(),
                        child.name
                    ),
                ));
            }
            OnDelete::Cascade => {
                for (child_key, child_row) in dependents {
                    if visited.contains(&(child.name.clone(), child_key.clone())) {
                        continue;
                    }
                    delete_row(txn, registry, &child, child_key, &child_row, visited)?;
                }
            }
        }
    }

    txn.delete(&table.name, key)
}

fn display_values(values: &[Value]) -> String {
    values
        .iter()
        .map(|v| v.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}
