//! Transaction wrapper
//!
//! `Transaction` runs bound statements against a `TransactionContext`.
//! Reads see the transaction's own writes; writes are buffered until
//! commit. The first statement that fails aborts the transaction: every
//! later call returns that same error and commit refuses to publish.

use std::sync::Arc;

use linkdb_concurrency::TransactionContext;
use linkdb_core::{Result, Value};
use tracing::warn;

use crate::execution::{execute_query, execute_write};
use crate::mapper::QueryResult;
use crate::schema::SchemaRegistry;
use crate::statement::{BoundStatement, BuildStatement, Statement};

/// Statement access inside a transaction
///
/// # Usage
///
/// ```ignore
/// db.transaction(|txn| {
///     txn.execute(&delete_items.bind([cart_id.clone()])?)?;
///     for item in &items {
///         txn.execute(&insert_item.bind([cart_id.clone(), item.product_id.clone(), item.quantity])?)?;
///     }
///     Ok(())
/// })?;
/// ```
pub struct Transaction<'a> {
    ctx: &'a mut TransactionContext,
    registry: Arc<SchemaRegistry>,
}

impl<'a> Transaction<'a> {
    /// Wrap a context; `registry` is the schema the transaction started with
    pub fn new(ctx: &'a mut TransactionContext, registry: Arc<SchemaRegistry>) -> Self {
        Self { ctx, registry }
    }

    /// Transaction id
    pub fn txn_id(&self) -> u64 {
        self.ctx.txn_id
    }

    /// Schema the transaction started with
    pub fn registry(&self) -> &SchemaRegistry {
        &self.registry
    }

    /// True once a statement failed or the transaction was rolled back
    pub fn is_aborted(&self) -> bool {
        self.ctx.is_aborted()
    }

    /// Underlying context
    pub fn context(&self) -> &TransactionContext {
        &*self.ctx
    }

    /// Build a statement against the transaction's schema
    pub fn prepare(&self, builder: &impl BuildStatement) -> Result<Statement> {
        builder.build(&self.registry)
    }

    /// Run an INSERT, UPDATE or DELETE; returns the rows affected
    pub fn execute(&mut self, stmt: &BoundStatement) -> Result<u64> {
        self.ctx.ensure_active()?;
        let result = execute_write(stmt, &mut *self.ctx, &self.registry);
        self.guard(stmt, result)
    }

    /// Run a SELECT against the transaction's view
    pub fn query(&mut self, stmt: &BoundStatement) -> Result<QueryResult> {
        self.ctx.ensure_active()?;
        let result = execute_query(stmt, &mut *self.ctx);
        self.guard(stmt, result)
    }

    /// Bind and execute in one step
    pub fn execute_with(&mut self, stmt: &Statement, params: impl IntoIterator<Item = Value>) -> Result<u64> {
        self.ctx.ensure_active()?;
        match stmt.bind(params) {
            Ok(bound) => self.execute(&bound),
            Err(e) => Err(self.ctx.fail(e)),
        }
    }

    /// Bind and query in one step
    pub fn query_with(
        &mut self,
        stmt: &Statement,
        params: impl IntoIterator<Item = Value>,
    ) -> Result<QueryResult> {
        self.ctx.ensure_active()?;
        match stmt.bind(params) {
            Ok(bound) => self.query(&bound),
            Err(e) => Err(self.ctx.fail(e)),
        }
    }

    fn guard<T>(&mut self, stmt: &BoundStatement, result: Result<T>) -> Result<T> {
        result.map_err(|e| {
            warn!(
                target: "linkdb::txn",
                txn_id = self.ctx.txn_id,
                statement = %stmt,
                error = %e,
                "Statement failed, aborting transaction"
            );
            self.ctx.fail(e)
        })
    }
}
