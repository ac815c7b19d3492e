//! Transaction wrapper handed to `Database::transaction` closures

pub mod context;

pub use context::Transaction;
