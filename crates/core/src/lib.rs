//! Core types for LinkDB
//!
//! This crate defines the foundational types used throughout the system:
//! - Value: Unified column value (JSON columns are Array/Object values)
//! - RowKey: Ordered primary-key value used to address rows
//! - Table / TableBuilder: Table schema with primary, foreign and unique keys
//! - Error: Error type hierarchy

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod key;
pub mod schema;
pub mod value;

pub use error::{ConstraintKind, Error, Result};
pub use key::{KeyPart, RowKey};
pub use schema::{Column, DataType, ForeignKey, OnDelete, Row, Table, TableBuilder};
pub use value::Value;
