//! Statement execution
//!
//! Selects run against any `RowSource`: a transaction (read-your-writes,
//! reads recorded for validation) or a bare store snapshot (plain reads and
//! live-query re-execution). Writes only run inside a transaction, where
//! every constraint is checked before a row is buffered.

mod select;
mod write;

use std::cmp::Ordering;

use linkdb_concurrency::TransactionContext;
use linkdb_core::{Error, Result, Row, RowKey, Value};
use linkdb_storage::StoreSnapshot;

use crate::mapper::QueryResult;
use crate::schema::SchemaRegistry;
use crate::statement::{BoundStatement, Plan, Predicate, Slot};

/// Table access used by statement execution
pub trait RowSource {
    /// Every row of `table` in primary-key order
    fn scan_rows(&mut self, table: &str) -> Result<Vec<(RowKey, Row)>>;

    /// One row by primary key
    fn get_row(&mut self, table: &str, key: &RowKey) -> Result<Option<Row>>;
}

fn missing_table(table: &str) -> Error {
    Error::schema(format!("table {} does not exist", table))
}

impl RowSource for TransactionContext {
    fn scan_rows(&mut self, table: &str) -> Result<Vec<(RowKey, Row)>> {
        if !self.table_exists(table) {
            return Err(missing_table(table));
        }
        self.scan(table)
    }

    fn get_row(&mut self, table: &str, key: &RowKey) -> Result<Option<Row>> {
        if !self.table_exists(table) {
            return Err(missing_table(table));
        }
        self.get(table, key)
    }
}

/// Read-only source over a store snapshot
pub struct SnapshotSource<'a>(pub &'a StoreSnapshot);

impl RowSource for SnapshotSource<'_> {
    fn scan_rows(&mut self, table: &str) -> Result<Vec<(RowKey, Row)>> {
        if !self.0.contains_table(table) {
            return Err(missing_table(table));
        }
        Ok(self
            .0
            .scan(table)
            .map(|(k, r)| (k.clone(), r.clone()))
            .collect())
    }

    fn get_row(&mut self, table: &str, key: &RowKey) -> Result<Option<Row>> {
        if !self.0.contains_table(table) {
            return Err(missing_table(table));
        }
        Ok(self.0.get(table, key).cloned())
    }
}

/// Run a SELECT
pub(crate) fn execute_query(stmt: &BoundStatement, source: &mut dyn RowSource) -> Result<QueryResult> {
    match stmt.statement().plan() {
        Plan::Select(plan) => select::execute_select(plan, stmt.params(), source),
        _ => Err(Error::InvalidOperation(format!(
            "not a query: {}",
            stmt.statement()
        ))),
    }
}

/// Run an INSERT/UPDATE/DELETE; returns the number of rows affected
pub(crate) fn execute_write(
    stmt: &BoundStatement,
    txn: &mut TransactionContext,
    registry: &SchemaRegistry,
) -> Result<u64> {
    let params = stmt.params();
    match stmt.statement().plan() {
        Plan::Insert(plan) => write::execute_insert(plan, params, txn, registry),
        Plan::Update(plan) => write::execute_update(plan, params, txn, registry),
        Plan::Delete(plan) => write::execute_delete(plan, params, txn, registry),
        Plan::Select(_) => Err(Error::InvalidOperation(format!(
            "SELECT cannot be executed as a write: {}",
            stmt.statement()
        ))),
    }
}

// ============================================================================
// Evaluation helpers
// ============================================================================

/// Value at `idx`, NULL past the end
pub(crate) fn cell(row: &[Value], idx: usize) -> &Value {
    row.get(idx).unwrap_or(Value::null_ref())
}

pub(crate) fn eval_slot<'a>(slot: &'a Slot, row: &'a [Value], params: &'a [Value]) -> &'a Value {
    match slot {
        Slot::Column(i) => cell(row, *i),
        Slot::Literal(v) => v,
        Slot::Param(i) => cell(params, *i),
    }
}

/// Three-valued evaluation; `None` is SQL UNKNOWN
fn eval(pred: &Predicate, row: &[Value], params: &[Value]) -> Option<bool> {
    match pred {
        Predicate::Eq(a, b) | Predicate::NotEq(a, b) => {
            let (a, b) = (eval_slot(a, row, params), eval_slot(b, row, params));
            if a.is_null() || b.is_null() {
                return None;
            }
            let equal = a == b;
            Some(if matches!(pred, Predicate::Eq(..)) {
                equal
            } else {
                !equal
            })
        }
        Predicate::IsNull(a) => Some(eval_slot(a, row, params).is_null()),
        Predicate::IsNotNull(a) => Some(!eval_slot(a, row, params).is_null()),
        Predicate::And(a, b) => match (eval(a, row, params), eval(b, row, params)) {
            (Some(false), _) | (_, Some(false)) => Some(false),
            (Some(true), Some(true)) => Some(true),
            _ => None,
        },
        Predicate::Or(a, b) => match (eval(a, row, params), eval(b, row, params)) {
            (Some(true), _) | (_, Some(true)) => Some(true),
            (Some(false), Some(false)) => Some(false),
            _ => None,
        },
    }
}

/// True only when the predicate is definitely true
pub(crate) fn passes(pred: &Predicate, row: &[Value], params: &[Value]) -> bool {
    eval(pred, row, params) == Some(true)
}

fn type_rank(v: &Value) -> u8 {
    match v {
        Value::Null => 0,
        Value::Bool(_) => 1,
        Value::Int(_) | Value::Float(_) => 2,
        Value::String(_) => 3,
        Value::Array(_) => 4,
        Value::Object(_) => 5,
    }
}

/// Total order for ORDER BY: NULL first, then by type, then by value
pub(crate) fn compare_values(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (Value::Int(x), Value::Int(y)) => x.cmp(y),
        (Value::Float(x), Value::Float(y)) => x.total_cmp(y),
        (Value::Int(x), Value::Float(y)) => (*x as f64).total_cmp(y),
        (Value::Float(x), Value::Int(y)) => x.total_cmp(&(*y as f64)),
        (Value::String(x), Value::String(y)) => x.cmp(y),
        (Value::Array(x), Value::Array(y)) => x
            .iter()
            .zip(y)
            .map(|(a, b)| compare_values(a, b))
            .find(|o| o.is_ne())
            .unwrap_or_else(|| x.len().cmp(&y.len())),
        (Value::Object(x), Value::Object(y)) => x
            .iter()
            .zip(y)
            .map(|((ka, va), (kb, vb))| ka.cmp(kb).then_with(|| compare_values(va, vb)))
            .find(|o| o.is_ne())
            .unwrap_or_else(|| x.len().cmp(&y.len())),
        _ => type_rank(a).cmp(&type_rank(b)),
    }
}

/// Hashable stand-in for a non-null value; equal keys iff equal values
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) enum HashKey {
    Bool(bool),
    Int(i64),
    Float(u64),
    Str(String),
    Json(String),
}

impl HashKey {
    /// `None` for NULL and NaN, which equal nothing
    pub(crate) fn of(value: &Value) -> Option<HashKey> {
        Some(match value {
            Value::Null => return None,
            Value::Bool(b) => HashKey::Bool(*b),
            Value::Int(i) => HashKey::Int(*i),
            Value::Float(f) if f.is_nan() => return None,
            // -0.0 == 0.0
            Value::Float(f) => HashKey::Float(if *f == 0.0 { 0 } else { f.to_bits() }),
            Value::String(s) => HashKey::Str(s.clone()),
            Value::Array(_) | Value::Object(_) => HashKey::Json(value.to_string()),
        })
    }
}
