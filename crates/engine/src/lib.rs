//! Database engine for LinkDB
//!
//! This crate orchestrates all lower layers:
//! - Database: open/close, schema changes, checkpointing
//! - Statement building and execution (joins, JSON-array unnest)
//! - Transaction coordination on top of the concurrency layer
//! - Result mapping into nested domain values
//! - Live queries: notifier thread, combine-latest and keyed switch views
//!
//! The engine is the only component that knows about:
//! - The schema registry and how statements resolve against it
//! - Constraint enforcement at write time
//! - Which commits must re-run which live queries

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod coordinator;
pub mod database;
pub mod execution;
pub mod live;
pub mod mapper;
pub mod schema;
pub mod statement;
pub mod transaction;

pub use coordinator::{TransactionCoordinator, TransactionMetrics};
pub use database::{Database, DatabaseConfig, RetryConfig};
pub use live::{combine_latest, combine_latest2, switch_keyed, ListenerGuard, LiveView, Subscription};
pub use mapper::{group_rows, FromRow, Grouped, QueryResult, RowView};
pub use schema::SchemaRegistry;
pub use statement::{
    col, lit, param, BoundStatement, BuildStatement, Delete, Expr, Insert, JoinKind, Select,
    SortOrder, Statement, StatementKind, Update,
};
pub use transaction::Transaction;
