//! Concurrency layer for LinkDB
//!
//! This crate implements optimistic concurrency control (OCC) with:
//! - TransactionContext: snapshot reads, read-set tracking, buffered writes
//! - Snapshot isolation with read-your-writes
//! - Table-granular conflict detection at commit time
//! - TransactionManager: version allocation and atomic apply

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod manager;
pub mod transaction;
pub mod validation;

pub use manager::TransactionManager;
pub use transaction::{PendingOperations, TransactionContext, TransactionStatus};
pub use validation::{validate_transaction, ConflictType, ValidationResult};
