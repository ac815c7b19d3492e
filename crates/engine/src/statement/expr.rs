//! Operands, filter expressions and column resolution
//!
//! Builders hold unresolved `Operand`/`Expr` trees that name columns by
//! string. `build()` resolves every column reference against a `Scope` (the
//! row layout of the statement) into positional `Slot`s, so execution never
//! looks a column up by name.

use std::collections::BTreeSet;
use std::fmt;

use linkdb_core::{Error, Result, Value};

/// Reference to a column, optionally qualified by table name or unnest alias
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnRef {
    /// Table name or alias, if given
    pub qualifier: Option<String>,
    /// Column name
    pub column: String,
}

impl ColumnRef {
    /// Parse `column` or `qualifier.column`
    pub fn parse(name: &str) -> Self {
        match name.split_once('.') {
            Some((q, c)) => ColumnRef {
                qualifier: Some(q.to_string()),
                column: c.to_string(),
            },
            None => ColumnRef {
                qualifier: None,
                column: name.to_string(),
            },
        }
    }
}

impl fmt::Display for ColumnRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.qualifier {
            Some(q) => write!(f, "{}.{}", q, self.column),
            None => f.write_str(&self.column),
        }
    }
}

/// One side of a comparison
#[derive(Debug, Clone)]
pub enum Operand {
    /// Column value of the current row
    Column(ColumnRef),
    /// Constant
    Literal(Value),
    /// Positional parameter, 1-based (`$1`)
    Param(usize),
}

/// Column operand: `col("cart_items.cart_id")`
pub fn col(name: &str) -> Operand {
    Operand::Column(ColumnRef::parse(name))
}

/// Literal operand
pub fn lit(value: impl Into<Value>) -> Operand {
    Operand::Literal(value.into())
}

/// Positional parameter operand, 1-based
pub fn param(index: usize) -> Operand {
    Operand::Param(index)
}

impl Operand {
    /// `self = rhs`
    pub fn eq(self, rhs: Operand) -> Expr {
        Expr::Eq(self, rhs)
    }

    /// `self != rhs`
    pub fn ne(self, rhs: Operand) -> Expr {
        Expr::NotEq(self, rhs)
    }

    /// `self IS NULL`
    pub fn is_null(self) -> Expr {
        Expr::IsNull(self)
    }

    /// `self IS NOT NULL`
    pub fn is_not_null(self) -> Expr {
        Expr::IsNotNull(self)
    }
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operand::Column(c) => write!(f, "{}", c),
            Operand::Literal(v) => write!(f, "{}", v),
            Operand::Param(i) => write!(f, "${}", i),
        }
    }
}

/// Boolean filter expression
#[derive(Debug, Clone)]
pub enum Expr {
    /// Equality; NULL on either side is never equal
    Eq(Operand, Operand),
    /// Inequality; NULL on either side is never unequal
    NotEq(Operand, Operand),
    /// Operand is NULL
    IsNull(Operand),
    /// Operand is not NULL
    IsNotNull(Operand),
    /// Both hold
    And(Box<Expr>, Box<Expr>),
    /// Either holds
    Or(Box<Expr>, Box<Expr>),
}

impl Expr {
    /// `self AND other`
    pub fn and(self, other: Expr) -> Expr {
        Expr::And(Box::new(self), Box::new(other))
    }

    /// `self OR other`
    pub fn or(self, other: Expr) -> Expr {
        Expr::Or(Box::new(self), Box::new(other))
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Eq(a, b) => write!(f, "{} = {}", a, b),
            Expr::NotEq(a, b) => write!(f, "{} != {}", a, b),
            Expr::IsNull(a) => write!(f, "{} IS NULL", a),
            Expr::IsNotNull(a) => write!(f, "{} IS NOT NULL", a),
            Expr::And(a, b) => write!(f, "({} AND {})", a, b),
            Expr::Or(a, b) => write!(f, "({} OR {})", a, b),
        }
    }
}

// ============================================================================
// Resolution
// ============================================================================

/// Resolved operand: a position in the row, a constant, or a parameter
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Slot {
    Column(usize),
    Literal(Value),
    /// 0-based parameter position
    Param(usize),
}

/// Resolved filter
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Predicate {
    Eq(Slot, Slot),
    NotEq(Slot, Slot),
    IsNull(Slot),
    IsNotNull(Slot),
    And(Box<Predicate>, Box<Predicate>),
    Or(Box<Predicate>, Box<Predicate>),
}

impl Predicate {
    /// Conjunction of the top-level equalities; used to spot equi-joins
    pub(crate) fn conjuncts(&self) -> Vec<&Predicate> {
        match self {
            Predicate::And(a, b) => {
                let mut out = a.conjuncts();
                out.extend(b.conjuncts());
                out
            }
            other => vec![other],
        }
    }
}

#[derive(Debug, Clone)]
struct ScopeSource {
    name: String,
    columns: Vec<String>,
    offset: usize,
}

/// Row layout of a statement: named sources laid out left to right
#[derive(Debug, Clone, Default)]
pub(crate) struct Scope {
    sources: Vec<ScopeSource>,
    width: usize,
}

impl Scope {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Append a source; returns its offset in the row
    pub(crate) fn push(&mut self, name: &str, columns: Vec<String>) -> Result<usize> {
        if self.sources.iter().any(|s| s.name == name) {
            return Err(Error::query_build(format!(
                "{} appears more than once in the statement",
                name
            )));
        }
        let offset = self.width;
        self.width += columns.len();
        self.sources.push(ScopeSource {
            name: name.to_string(),
            columns,
            offset,
        });
        Ok(offset)
    }

    /// Total number of values in a row
    pub(crate) fn width(&self) -> usize {
        self.width
    }

    /// Position of a column in the row
    pub(crate) fn resolve(&self, column: &ColumnRef) -> Result<usize> {
        let matches: Vec<usize> = self
            .sources
            .iter()
            .filter(|s| column.qualifier.as_deref().map_or(true, |q| q == s.name))
            .filter_map(|s| {
                s.columns
                    .iter()
                    .position(|c| *c == column.column)
                    .map(|i| s.offset + i)
            })
            .collect();

        match matches.as_slice() {
            [idx] => Ok(*idx),
            [] => match &column.qualifier {
                Some(q) if !self.sources.iter().any(|s| s.name == *q) => {
                    Err(Error::query_build(format!("unknown table or alias {}", q)))
                }
                _ => Err(Error::query_build(format!("unknown column {}", column))),
            },
            _ => Err(Error::query_build(format!("column {} is ambiguous", column))),
        }
    }

    /// Qualified names of every column, in row order
    pub(crate) fn qualified_names(&self) -> Vec<String> {
        self.sources
            .iter()
            .flat_map(|s| s.columns.iter().map(move |c| format!("{}.{}", s.name, c)))
            .collect()
    }
}

/// Collects the parameters a statement uses
#[derive(Debug, Default)]
pub(crate) struct Params {
    used: BTreeSet<usize>,
}

impl Params {
    /// Number of values `bind` must receive
    pub(crate) fn count(&self) -> usize {
        self.used.iter().next_back().copied().unwrap_or(0)
    }
}

pub(crate) fn resolve_operand(op: &Operand, scope: &Scope, params: &mut Params) -> Result<Slot> {
    match op {
        Operand::Column(c) => scope.resolve(c).map(Slot::Column),
        Operand::Literal(v) => Ok(Slot::Literal(v.clone())),
        Operand::Param(0) => Err(Error::query_build("parameters are numbered from $1")),
        Operand::Param(i) => {
            params.used.insert(*i);
            Ok(Slot::Param(i - 1))
        }
    }
}

/// Resolve an operand that must not reference a column (insert values)
pub(crate) fn resolve_value(op: &Operand, params: &mut Params) -> Result<Slot> {
    match op {
        Operand::Column(c) => Err(Error::query_build(format!(
            "column {} cannot be used as a value here",
            c
        ))),
        other => resolve_operand(other, &Scope::new(), params),
    }
}

pub(crate) fn resolve_expr(expr: &Expr, scope: &Scope, params: &mut Params) -> Result<Predicate> {
    Ok(match expr {
        Expr::Eq(a, b) => Predicate::Eq(
            resolve_operand(a, scope, params)?,
            resolve_operand(b, scope, params)?,
        ),
        Expr::NotEq(a, b) => Predicate::NotEq(
            resolve_operand(a, scope, params)?,
            resolve_operand(b, scope, params)?,
        ),
        Expr::IsNull(a) => Predicate::IsNull(resolve_operand(a, scope, params)?),
        Expr::IsNotNull(a) => Predicate::IsNotNull(resolve_operand(a, scope, params)?),
        Expr::And(a, b) => Predicate::And(
            Box::new(resolve_expr(a, scope, params)?),
            Box::new(resolve_expr(b, scope, params)?),
        ),
        Expr::Or(a, b) => Predicate::Or(
            Box::new(resolve_expr(a, scope, params)?),
            Box::new(resolve_expr(b, scope, params)?),
        ),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scope() -> Scope {
        let mut scope = Scope::new();
        scope
            .push("cart_items", vec!["cart_id".into(), "product_id".into()])
            .unwrap();
        scope
            .push("products", vec!["id".into(), "name".into()])
            .unwrap();
        scope
    }

    #[test]
    fn test_resolve_qualified_and_bare() {
        let scope = scope();
        assert_eq!(scope.resolve(&ColumnRef::parse("products.id")).unwrap(), 2);
        assert_eq!(scope.resolve(&ColumnRef::parse("name")).unwrap(), 3);
        assert_eq!(scope.width(), 4);
    }

    #[test]
    fn test_unknown_and_ambiguous() {
        let mut scope = scope();
        assert!(matches!(
            scope.resolve(&ColumnRef::parse("products.price")),
            Err(Error::QueryBuild(_))
        ));
        assert!(matches!(
            scope.resolve(&ColumnRef::parse("carts.id")),
            Err(Error::QueryBuild(ref m)) if m.contains("unknown table")
        ));
        scope.push("item", vec!["product_id".into()]).unwrap();
        assert!(matches!(
            scope.resolve(&ColumnRef::parse("product_id")),
            Err(Error::QueryBuild(ref m)) if m.contains("ambiguous")
        ));
    }

    #[test]
    fn test_duplicate_source() {
        let mut scope = scope();
        assert!(scope.push("products", vec![]).is_err());
    }

    #[test]
    fn test_param_count_is_highest_index() {
        let scope = scope();
        let mut params = Params::default();
        let expr = col("cart_id").eq(param(2)).and(col("name").eq(param(1)));
        resolve_expr(&expr, &scope, &mut params).unwrap();
        assert_eq!(params.count(), 2);
        assert!(resolve_operand(&param(0), &scope, &mut params).is_err());
    }

    #[test]
    fn test_display() {
        let expr = col("cart_items.cart_id")
            .eq(param(1))
            .or(col("name").is_null())
            .and(col("id").ne(lit("p1")));
        assert_eq!(
            expr.to_string(),
            "((cart_items.cart_id = $1 OR name IS NULL) AND id != 'p1')"
        );
    }

    #[test]
    fn test_conjuncts() {
        let scope = scope();
        let mut params = Params::default();
        let expr = col("product_id")
            .eq(col("products.id"))
            .and(col("cart_id").eq(param(1)));
        let pred = resolve_expr(&expr, &scope, &mut params).unwrap();
        assert_eq!(pred.conjuncts().len(), 2);
    }
}
