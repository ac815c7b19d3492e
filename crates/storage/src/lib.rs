//! Storage layer for LinkDB
//!
//! This crate implements the table storage backend with:
//! - TableStore: table map behind a RwLock with atomic version tracking
//! - TableData: rows of one table ordered by primary key
//! - StoreSnapshot: cheap copy-on-write point-in-time view
//! - WriteBatch / ChangeSet: atomic commit input and its table-level outcome
//! - checkpoint: CRC-protected on-disk checkpoint format

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod batch;
pub mod checkpoint;
pub mod snapshot;
pub mod store;
pub mod table;

pub use batch::{ChangeSet, WriteBatch};
pub use snapshot::StoreSnapshot;
pub use store::{TableDump, TableStore};
pub use table::{StoredRow, TableData};
