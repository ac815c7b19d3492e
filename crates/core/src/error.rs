//! Error types for LinkDB
//!
//! This module defines all error types used throughout the system.
//! We use `thiserror` for automatic `Display` and `Error` trait implementations.
//!
//! `Error` is `Clone`: a failed live-query recomputation fans the same
//! terminal error out to every subscriber of that view.

use std::io;
use thiserror::Error;

/// Result type alias for LinkDB operations
pub type Result<T> = std::result::Result<T, Error>;

/// Kind of constraint that rejected a write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConstraintKind {
    /// Duplicate primary key
    PrimaryKey,
    /// Duplicate value in a unique constraint
    Unique,
    /// Foreign key target missing, or row still referenced
    ForeignKey,
    /// Null written to a non-nullable column
    NotNull,
    /// Value does not match the column type
    Type,
}

impl std::fmt::Display for ConstraintKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ConstraintKind::PrimaryKey => "primary key",
            ConstraintKind::Unique => "unique",
            ConstraintKind::ForeignKey => "foreign key",
            ConstraintKind::NotNull => "not null",
            ConstraintKind::Type => "type",
        };
        f.write_str(name)
    }
}

/// Error types for LinkDB
#[derive(Debug, Clone, PartialEq, Error)]
pub enum Error {
    /// Invalid or missing table/column/constraint reference in a schema
    #[error("Schema error: {0}")]
    Schema(String),

    /// A write would break a constraint; the write is not applied
    #[error("Constraint violation ({kind}) on table {table}: {message}")]
    ConstraintViolation {
        /// Table the write targeted
        table: String,
        /// Which constraint failed
        kind: ConstraintKind,
        /// Human-readable detail
        message: String,
    },

    /// Malformed statement (unknown column, mismatched arity, ...)
    #[error("Query build error: {0}")]
    QueryBuild(String),

    /// Transaction lost commit validation or was already aborted
    #[error("Transaction aborted: {reason}")]
    TransactionAborted {
        /// Why the transaction was aborted
        reason: String,
    },

    /// Invalid operation or state
    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Data corruption detected
    #[error("Data corruption: {0}")]
    Corruption(String),

    /// Configuration file could not be read or parsed
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O error (file operations)
    #[error("I/O error: {0}")]
    Io(String),
}

impl Error {
    /// Create a schema error
    pub fn schema(message: impl Into<String>) -> Self {
        Error::Schema(message.into())
    }

    /// Create a query build error
    pub fn query_build(message: impl Into<String>) -> Self {
        Error::QueryBuild(message.into())
    }

    /// Create a constraint violation
    pub fn constraint(
        table: impl Into<String>,
        kind: ConstraintKind,
        message: impl Into<String>,
    ) -> Self {
        Error::ConstraintViolation {
            table: table.into(),
            kind,
            message: message.into(),
        }
    }

    /// Create a transaction-aborted error
    pub fn aborted(reason: impl Into<String>) -> Self {
        Error::TransactionAborted {
            reason: reason.into(),
        }
    }

    /// True for commit conflicts, the only errors worth retrying
    pub fn is_conflict(&self) -> bool {
        matches!(self, Error::TransactionAborted { .. })
    }

    /// True if this is a constraint violation of any kind
    pub fn is_constraint_violation(&self) -> bool {
        matches!(self, Error::ConstraintViolation { .. })
    }

    /// Constraint kind, if this is a constraint violation
    pub fn constraint_kind(&self) -> Option<ConstraintKind> {
        match self {
            Error::ConstraintViolation { kind, .. } => Some(*kind),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Error::Io(e.to_string())
    }
}

impl From<rmp_serde::encode::Error> for Error {
    fn from(e: rmp_serde::encode::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<rmp_serde::decode::Error> for Error {
    fn from(e: rmp_serde::decode::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_schema() {
        let err = Error::schema("table carts already registered");
        let msg = err.to_string();
        assert!(msg.contains("Schema error"));
        assert!(msg.contains("carts"));
    }

    #[test]
    fn test_error_display_constraint() {
        let err = Error::constraint("cart_items", ConstraintKind::ForeignKey, "product p9 missing");
        let msg = err.to_string();
        assert!(msg.contains("foreign key"));
        assert!(msg.contains("cart_items"));
        assert!(msg.contains("p9"));
    }

    #[test]
    fn test_error_predicates() {
        assert!(Error::aborted("conflict on products").is_conflict());
        assert!(!Error::query_build("x").is_conflict());

        let err = Error::constraint("t", ConstraintKind::Unique, "dup");
        assert!(err.is_constraint_violation());
        assert_eq!(err.constraint_kind(), Some(ConstraintKind::Unique));
        assert_eq!(Error::schema("x").constraint_kind(), None);
    }

    #[test]
    fn test_error_from_io() {
        let io_err = io::Error::new(io::ErrorKind::PermissionDenied, "access denied");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Io(ref m) if m.contains("access denied")));
    }

    #[test]
    fn test_error_from_rmp_decode() {
        let invalid = [0xc1u8];
        let result: Result<String> = rmp_serde::from_slice(&invalid).map_err(Error::from);
        assert!(matches!(result, Err(Error::Serialization(_))));
    }

    #[test]
    fn test_error_is_clone() {
        let err = Error::aborted("validation failed");
        assert_eq!(err.clone(), err);
    }
}
