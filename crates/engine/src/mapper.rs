//! Query result mapping
//!
//! A `QueryResult` is a flat table: qualified column names plus rows.
//! `RowView` gives typed, by-name access to one row; `FromRow` decodes a row
//! into a domain type; `group_rows` folds the flat rows of a join or unnest
//! into one parent-plus-children value per distinct parent.

use std::collections::HashMap;
use std::sync::Arc;

use linkdb_core::{Error, Result, Row, Value};

use crate::execution::HashKey;

/// Rows produced by a SELECT
#[derive(Debug, Clone, PartialEq)]
pub struct QueryResult {
    columns: Arc<[String]>,
    rows: Vec<Row>,
}

impl QueryResult {
    /// Build a result; every row should have one value per column
    pub fn new(columns: Vec<String>, rows: Vec<Row>) -> Self {
        QueryResult {
            columns: columns.into(),
            rows,
        }
    }

    /// Output column names, qualified as `source.column`
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Raw rows
    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    /// Take the raw rows
    pub fn into_rows(self) -> Vec<Row> {
        self.rows
    }

    /// Number of rows
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// True when no rows matched
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Position of a column, see [`RowView::get`] for name matching
    pub fn column_index(&self, name: &str) -> Option<usize> {
        column_index(&self.columns, name)
    }

    /// One row by position
    pub fn row(&self, idx: usize) -> Option<RowView<'_>> {
        self.rows.get(idx).map(|values| RowView {
            columns: &self.columns,
            values,
        })
    }

    /// Iterate rows as views
    pub fn iter(&self) -> impl Iterator<Item = RowView<'_>> {
        self.rows.iter().map(|values| RowView {
            columns: &self.columns,
            values,
        })
    }

    /// Decode every row
    pub fn decode<T: FromRow>(&self) -> Result<Vec<T>> {
        self.iter().map(|row| T::from_row(&row)).collect()
    }
}

fn column_index(columns: &[String], name: &str) -> Option<usize> {
    if let Some(idx) = columns.iter().position(|c| c == name) {
        return Some(idx);
    }
    if name.contains('.') {
        return None;
    }
    let mut hits = columns
        .iter()
        .enumerate()
        .filter(|(_, c)| c.rsplit_once('.').map_or(false, |(_, col)| col == name));
    match (hits.next(), hits.next()) {
        (Some((idx, _)), None) => Some(idx),
        _ => None,
    }
}

/// Borrowed view of one result row
#[derive(Debug, Clone, Copy)]
pub struct RowView<'a> {
    columns: &'a [String],
    values: &'a [Value],
}

impl<'a> RowView<'a> {
    /// Value of a column
    ///
    /// `name` is matched exactly first (`products.id`); a bare column name
    /// (`id`) also matches when exactly one output column ends with it.
    pub fn get(&self, name: &str) -> Result<&'a Value> {
        column_index(self.columns, name)
            .and_then(|idx| self.values.get(idx))
            .ok_or_else(|| {
                Error::InvalidOperation(format!("no column {} (or ambiguous) in result", name))
            })
    }

    /// All values in column order
    pub fn values(&self) -> &'a [Value] {
        self.values
    }

    /// Required string column
    pub fn get_str(&self, name: &str) -> Result<&'a str> {
        let value = self.get(name)?;
        value.as_str().ok_or_else(|| mismatch(name, "String", value))
    }

    /// Required integer column
    pub fn get_int(&self, name: &str) -> Result<i64> {
        let value = self.get(name)?;
        value.as_int().ok_or_else(|| mismatch(name, "Int", value))
    }

    /// Required boolean column
    pub fn get_bool(&self, name: &str) -> Result<bool> {
        let value = self.get(name)?;
        value.as_bool().ok_or_else(|| mismatch(name, "Bool", value))
    }

    /// Nullable string column
    pub fn get_opt_str(&self, name: &str) -> Result<Option<&'a str>> {
        match self.get(name)? {
            Value::Null => Ok(None),
            other => other.as_str().map(Some).ok_or_else(|| mismatch(name, "String", other)),
        }
    }

    /// Nullable integer column
    pub fn get_opt_int(&self, name: &str) -> Result<Option<i64>> {
        match self.get(name)? {
            Value::Null => Ok(None),
            other => other.as_int().map(Some).ok_or_else(|| mismatch(name, "Int", other)),
        }
    }
}

fn mismatch(name: &str, expected: &str, got: &Value) -> Error {
    Error::Serialization(format!(
        "column {} is {}, expected {}",
        name,
        got.type_name(),
        expected
    ))
}

/// Decode a domain value from a result row
pub trait FromRow: Sized {
    /// Build `Self` from the row
    fn from_row(row: &RowView<'_>) -> Result<Self>;
}

/// One parent with the children that joined or unnested onto it
#[derive(Debug, Clone, PartialEq)]
pub struct Grouped<P, C> {
    /// Decoded parent columns
    pub parent: P,
    /// Decoded child rows, in result order
    pub children: Vec<C>,
}

/// Fold flat rows into parents with children
///
/// Rows are grouped by the value of `parent_key`; parents appear in the
/// order they are first seen. A row whose `child_columns` are all NULL (a
/// left join or outer unnest with nothing to attach) contributes its parent
/// but no child, so parents without children come back with an empty list.
///
/// # Errors
///
/// `InvalidOperation` for an unknown or ambiguous column, a NULL parent key,
/// or whatever the decoders return.
pub fn group_rows<P, C>(
    result: &QueryResult,
    parent_key: &str,
    child_columns: &[&str],
) -> Result<Vec<Grouped<P, C>>>
where
    P: FromRow,
    C: FromRow,
{
    let key_idx = result.column_index(parent_key).ok_or_else(|| {
        Error::InvalidOperation(format!("no column {} (or ambiguous) in result", parent_key))
    })?;
    let child_idx = child_columns
        .iter()
        .map(|name| {
            result.column_index(name).ok_or_else(|| {
                Error::InvalidOperation(format!("no column {} (or ambiguous) in result", name))
            })
        })
        .collect::<Result<Vec<_>>>()?;

    let mut groups: Vec<Grouped<P, C>> = Vec::new();
    let mut positions: HashMap<HashKey, usize> = HashMap::new();

    for row in result.iter() {
        let key = HashKey::of(&row.values()[key_idx]).ok_or_else(|| {
            Error::InvalidOperation(format!("parent key {} is NULL", parent_key))
        })?;
        let pos = match positions.get(&key) {
            Some(pos) => *pos,
            None => {
                groups.push(Grouped {
                    parent: P::from_row(&row)?,
                    children: Vec::new(),
                });
                positions.insert(key, groups.len() - 1);
                groups.len() - 1
            }
        };
        if child_idx.iter().all(|i| row.values()[*i].is_null()) {
            continue;
        }
        groups[pos].children.push(C::from_row(&row)?);
    }
    Ok(groups)
}
