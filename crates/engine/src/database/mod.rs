//! Database: the entry point of the engine
//!
//! A `Database` owns the table store, the schema registry, the transaction
//! coordinator and the change notifier that drives live queries.
//!
//! # Opening
//!
//! ```ignore
//! let db = Database::open("./carts")?;    // on disk, checkpointed on close
//! let db = Database::ephemeral()?;        // in memory only
//! ```
//!
//! Opening the same directory twice in one process returns the same
//! instance. A second process is kept out by an exclusive lock on
//! `<dir>/.lock`.
//!
//! # Writes
//!
//! Writes go through `transaction` (or the manual `begin_transaction` /
//! `commit_transaction` pair). A transaction sees its own writes, buffers
//! them, and publishes all of them at commit or none. Commits are handed to
//! the notifier thread and never re-enter live queries synchronously.

mod config;
mod registry;
mod transactions;

pub use config::{DatabaseConfig, CONFIG_FILE_NAME};
pub use transactions::RetryConfig;

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use fs2::FileExt;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use linkdb_concurrency::TransactionContext;
use linkdb_core::{Error, Result, Table};
use linkdb_storage::{checkpoint, ChangeSet, TableDump, TableStore};

use crate::coordinator::{TransactionCoordinator, TransactionMetrics};
use crate::execution::{execute_query, SnapshotSource};
use crate::live::{ChangeNotifier, LiveView, Subject};
use crate::mapper::QueryResult;
use crate::schema::SchemaRegistry;
use crate::statement::{BoundStatement, BuildStatement, Statement};
use crate::transaction::Transaction;

use registry::OPEN_DATABASES;

/// Checkpoint file name placed in the database data directory.
pub const CHECKPOINT_FILE_NAME: &str = "linkdb.ckpt";

const LOCK_FILE_NAME: &str = ".lock";

/// How long `shutdown` waits for in-flight transactions
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Everything a checkpoint persists
#[derive(Debug, Serialize, Deserialize)]
struct CheckpointBody {
    version: u64,
    schema: Vec<Table>,
    tables: Vec<TableDump>,
}

/// Main database struct
///
/// Always handed out as `Arc<Database>`; all methods take `&self` and are
/// safe to call from any thread.
pub struct Database {
    /// Canonical data directory; `None` for ephemeral databases
    data_dir: Option<PathBuf>,

    /// Committed rows
    store: Arc<TableStore>,

    /// Current schema; replaced wholesale on every DDL change
    registry: RwLock<Arc<SchemaRegistry>>,

    /// Transaction lifecycle and metrics
    coordinator: TransactionCoordinator,

    /// Re-runs live queries after commits
    notifier: ChangeNotifier,

    config: DatabaseConfig,

    /// Cleared by `shutdown`
    accepting_transactions: AtomicBool,

    /// Set once the closing checkpoint has been taken
    closed: AtomicBool,

    /// Held for the lifetime of the instance; the OS lock drops with it
    _lock_file: Option<File>,
}

impl Database {
    /// Open (or create) a database in `path`
    ///
    /// Writes a default `linkdb.toml` when none exists, then loads it and
    /// the latest checkpoint.
    ///
    /// # Errors
    /// - `Config` if `linkdb.toml` is unreadable
    /// - `InvalidOperation` if another process holds the directory
    /// - `Corruption` if the checkpoint is damaged
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Arc<Self>> {
        let data_dir = path.as_ref().to_path_buf();
        std::fs::create_dir_all(&data_dir)?;
        let config_path = data_dir.join(CONFIG_FILE_NAME);
        DatabaseConfig::write_default_if_missing(&config_path)?;
        let config = DatabaseConfig::from_file(&config_path)?;
        Self::open_with_config(data_dir, config)
    }

    /// Open with an explicit configuration, ignoring `linkdb.toml`
    pub fn open_with_config<P: AsRef<Path>>(path: P, config: DatabaseConfig) -> Result<Arc<Self>> {
        std::fs::create_dir_all(path.as_ref())?;
        let data_dir = path.as_ref().canonicalize()?;

        let mut registry = OPEN_DATABASES.lock();
        if let Some(db) = registry.get(&data_dir).and_then(|weak| weak.upgrade()) {
            debug!(path = %data_dir.display(), "Returning already open database");
            return Ok(db);
        }

        let lock_file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(data_dir.join(LOCK_FILE_NAME))?;
        lock_file.try_lock_exclusive().map_err(|_| {
            Error::InvalidOperation(format!(
                "database at '{}' is already in use by another process",
                data_dir.display()
            ))
        })?;

        let (store, schema) = match checkpoint::read_file::<CheckpointBody>(&data_dir.join(CHECKPOINT_FILE_NAME))? {
            Some(body) => restore(body)?,
            None => (TableStore::new(), SchemaRegistry::new()),
        };

        let db = Arc::new(Self::assemble(
            Some(data_dir.clone()),
            store,
            schema,
            config,
            Some(lock_file),
        )?);
        registry.insert(data_dir.clone(), Arc::downgrade(&db));

        info!(
            path = %data_dir.display(),
            tables = db.registry().len(),
            version = db.current_version(),
            "Database opened"
        );
        Ok(db)
    }

    /// In-memory database with the default configuration and no files
    pub fn ephemeral() -> Result<Arc<Self>> {
        let db = Self::assemble(
            None,
            TableStore::new(),
            SchemaRegistry::new(),
            DatabaseConfig::default(),
            None,
        )?;
        debug!("Ephemeral database created");
        Ok(Arc::new(db))
    }

    fn assemble(
        data_dir: Option<PathBuf>,
        store: TableStore,
        schema: SchemaRegistry,
        config: DatabaseConfig,
        lock_file: Option<File>,
    ) -> Result<Self> {
        let notifier = ChangeNotifier::start(config.notify_coalesce_limit)?;
        Ok(Database {
            data_dir,
            coordinator: TransactionCoordinator::new(store.current_version()),
            store: Arc::new(store),
            registry: RwLock::new(Arc::new(schema)),
            notifier,
            config,
            accepting_transactions: AtomicBool::new(true),
            closed: AtomicBool::new(false),
            _lock_file: lock_file,
        })
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    /// Data directory, `None` when ephemeral
    pub fn data_dir(&self) -> Option<&Path> {
        self.data_dir.as_deref()
    }

    /// Active configuration
    pub fn config(&self) -> &DatabaseConfig {
        &self.config
    }

    /// Version of the latest commit
    pub fn current_version(&self) -> u64 {
        self.store.current_version()
    }

    /// Transaction counters
    pub fn metrics(&self) -> TransactionMetrics {
        self.coordinator.metrics()
    }

    /// Number of live queries still registered with the notifier
    pub fn live_query_count(&self) -> usize {
        self.notifier.registration_count()
    }

    /// Current schema
    pub fn registry(&self) -> Arc<SchemaRegistry> {
        Arc::clone(&self.registry.read())
    }

    // ========================================================================
    // Schema
    // ========================================================================

    /// Register a table and create its (empty) storage
    ///
    /// # Errors
    /// `Schema` if the name is taken or a reference does not resolve.
    pub fn register_table(&self, table: Table) -> Result<Arc<Table>> {
        let mut current = self.registry.write();
        let mut next = SchemaRegistry::clone(&current);
        let registered = next.register(table)?;
        self.store.create_table(&registered.name)?;
        *current = Arc::new(next);
        info!(table = %registered.name, columns = registered.columns.len(), "Table registered");
        Ok(registered)
    }

    /// Register `table` unless an identical definition already exists
    ///
    /// Lets stores declare their tables on every open, including reopens
    /// from a checkpoint.
    ///
    /// # Errors
    /// `Schema` if a table of that name exists with a different definition.
    pub fn ensure_table(&self, table: Table) -> Result<Arc<Table>> {
        if let Some(existing) = self.registry().get(&table.name) {
            if **existing == table {
                return Ok(Arc::clone(existing));
            }
            return Err(Error::schema(format!(
                "table {} already exists with a different definition",
                table.name
            )));
        }
        self.register_table(table)
    }

    /// Remove a table and its rows
    ///
    /// Live queries over the table are not notified; their next re-run
    /// fails and terminates them.
    pub fn drop_table(&self, name: &str) -> Result<()> {
        let mut current = self.registry.write();
        let mut next = SchemaRegistry::clone(&current);
        next.drop(name)?;
        self.store.drop_table(name)?;
        *current = Arc::new(next);
        info!(table = name, "Table dropped");
        Ok(())
    }

    /// Build a statement against the current schema
    pub fn prepare(&self, builder: &impl BuildStatement) -> Result<Statement> {
        builder.build(&self.registry())
    }

    // ========================================================================
    // Transactions
    // ========================================================================

    fn check_accepting(&self) -> Result<()> {
        if !self.accepting_transactions.load(Ordering::SeqCst) {
            return Err(Error::InvalidOperation(
                "Database is shutting down".to_string(),
            ));
        }
        Ok(())
    }

    /// Commit on success, abort on error
    fn run_single_attempt<T>(&self, ctx: &mut TransactionContext, result: Result<T>) -> Result<T> {
        match result {
            Ok(value) => {
                self.commit_transaction(ctx)?;
                Ok(value)
            }
            Err(e) => {
                let _ = self.coordinator.abort(ctx, &format!("closure error: {}", e));
                Err(e)
            }
        }
    }

    fn attempt<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Transaction<'_>) -> Result<T>,
    {
        let mut ctx = self.coordinator.start_transaction(&self.store);
        let result = {
            let mut txn = Transaction::new(&mut ctx, self.registry());
            f(&mut txn)
        };
        self.run_single_attempt(&mut ctx, result)
    }

    /// Run `f` in a transaction
    ///
    /// All writes in `f` commit together when it returns `Ok`; nothing is
    /// published when it returns `Err`. If a statement inside `f` failed,
    /// the transaction is aborted even when `f` swallowed the error, and
    /// that original error is returned.
    ///
    /// # Example
    /// ```ignore
    /// db.transaction(|txn| {
    ///     txn.execute(&delete_items.bind([cart_id.clone()])?)?;
    ///     txn.execute(&insert_item.bind([cart_id, product_id, Value::Int(2)])?)?;
    ///     Ok(())
    /// })?;
    /// ```
    pub fn transaction<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Transaction<'_>) -> Result<T>,
    {
        self.check_accepting()?;
        self.attempt(f)
    }

    /// Run `f` in a transaction, retrying commit conflicts
    ///
    /// `f` runs again from scratch on a fresh snapshot after each conflict,
    /// so it must be `Fn`. Other errors are returned immediately.
    pub fn transaction_with_retry<F, T>(&self, config: &RetryConfig, f: F) -> Result<T>
    where
        F: Fn(&mut Transaction<'_>) -> Result<T>,
    {
        self.check_accepting()?;

        let mut last_error = None;
        for attempt in 0..=config.max_retries {
            match self.attempt(&f) {
                Ok(value) => return Ok(value),
                Err(e) if e.is_conflict() && attempt < config.max_retries => {
                    debug!(target: "linkdb::txn", attempt, error = %e, "Retrying after conflict");
                    last_error = Some(e);
                    std::thread::sleep(config.calculate_delay(attempt));
                }
                Err(e) => return Err(e),
            }
        }
        Err(last_error.unwrap_or_else(|| Error::aborted("retry attempts exhausted")))
    }

    /// Start a manual transaction
    ///
    /// Pair with `bind_transaction` to run statements, then
    /// `commit_transaction` or `abort_transaction`.
    pub fn begin_transaction(&self) -> Result<TransactionContext> {
        self.check_accepting()?;
        Ok(self.coordinator.start_transaction(&self.store))
    }

    /// Statement access for a manual transaction
    pub fn bind_transaction<'a>(&self, ctx: &'a mut TransactionContext) -> Transaction<'a> {
        Transaction::new(ctx, self.registry())
    }

    /// Commit a manual transaction and queue its changes for live queries
    pub fn commit_transaction(&self, ctx: &mut TransactionContext) -> Result<()> {
        if let Some(changes) = self.coordinator.commit(ctx, &self.store)? {
            self.publish(changes);
        }
        Ok(())
    }

    /// Abort a manual transaction, discarding its writes
    pub fn abort_transaction(&self, ctx: &mut TransactionContext, reason: &str) -> Result<()> {
        self.coordinator.abort(ctx, reason)
    }

    fn publish(&self, changes: ChangeSet) {
        self.notifier.notify(changes);
    }

    // ========================================================================
    // Statements
    // ========================================================================

    /// Run one write in its own transaction, retrying conflicts per
    /// `config.retry`; returns the rows affected
    pub fn execute(&self, stmt: &BoundStatement) -> Result<u64> {
        self.transaction_with_retry(&self.config.retry, |txn| txn.execute(stmt))
    }

    /// Run a SELECT against the latest committed snapshot
    pub fn query(&self, stmt: &BoundStatement) -> Result<QueryResult> {
        let snapshot = self.store.snapshot();
        execute_query(stmt, &mut SnapshotSource(&snapshot))
    }

    // ========================================================================
    // Live queries
    // ========================================================================

    /// Wrap a SELECT as a live view
    ///
    /// The first snapshot is computed before this returns. Every later
    /// commit to one of the statement's tables re-runs it on the notifier
    /// thread. A failed re-run terminates the view with that error.
    ///
    /// # Errors
    /// `InvalidOperation` for a non-SELECT; any error of the first run.
    pub fn live_query(&self, stmt: &BoundStatement) -> Result<LiveView<QueryResult>> {
        self.check_accepting()?;
        if !stmt.statement().is_select() {
            return Err(Error::InvalidOperation(format!(
                "live queries need a SELECT: {}",
                stmt.statement()
            )));
        }

        let subject = Arc::new(Subject::new());
        let runner = Arc::new(LiveRunner {
            stmt: stmt.clone(),
            store: Arc::clone(&self.store),
            last_version: Mutex::new(None),
        });

        // Register before the first run so no commit in between is missed
        let weak = Arc::downgrade(&subject);
        let rerun = Arc::clone(&runner);
        let registration = self
            .notifier
            .register(stmt.statement().tables().to_vec(), move || match weak.upgrade() {
                Some(subject) => rerun.refresh(&subject),
                None => Ok(()),
            });

        runner.refresh(&subject)?;
        debug!(statement = %stmt, "Live query registered");
        Ok(LiveView::new(subject, vec![Box::new(registration)]))
    }

    /// Block until every commit so far has reached its live queries
    pub fn flush_notifications(&self) {
        self.notifier.flush();
    }

    // ========================================================================
    // Persistence and lifecycle
    // ========================================================================

    /// Write schema, rows and version to `linkdb.ckpt`
    ///
    /// # Errors
    /// `InvalidOperation` for an ephemeral database.
    pub fn checkpoint(&self) -> Result<()> {
        let Some(dir) = &self.data_dir else {
            return Err(Error::InvalidOperation(
                "ephemeral database cannot be checkpointed".to_string(),
            ));
        };
        // Holding the schema lock keeps DDL out while rows are copied
        let schema = self.registry.read();
        let (version, tables) = self.store.dump();
        let body = CheckpointBody {
            version,
            schema: schema.tables().map(|t| Table::clone(t)).collect(),
            tables,
        };
        checkpoint::write_file(&dir.join(CHECKPOINT_FILE_NAME), &body)
    }

    /// Stop accepting transactions, wait for in-flight ones, deliver queued
    /// notifications and write the closing checkpoint
    pub fn shutdown(&self) -> Result<()> {
        self.accepting_transactions.store(false, Ordering::SeqCst);

        let start = Instant::now();
        while self.coordinator.active_count() > 0 && start.elapsed() < SHUTDOWN_TIMEOUT {
            std::thread::sleep(Duration::from_millis(10));
        }
        if self.coordinator.active_count() > 0 {
            warn!(
                active = self.coordinator.active_count(),
                "Shutting down with transactions still open"
            );
        }

        self.notifier.shutdown();
        self.close()
    }

    fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        if self.config.checkpoint_on_close && self.data_dir.is_some() {
            self.checkpoint()?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("data_dir", &self.data_dir)
            .field("version", &self.current_version())
            .finish()
    }
}

impl Drop for Database {
    fn drop(&mut self) {
        self.accepting_transactions.store(false, Ordering::SeqCst);
        self.notifier.shutdown();
        if let Err(e) = self.close() {
            warn!(error = %e, "Closing checkpoint failed");
        }

        if let Some(dir) = &self.data_dir {
            let mut registry = OPEN_DATABASES.lock();
            if registry.get(dir).map_or(false, |weak| weak.strong_count() == 0) {
                registry.remove(dir);
            }
        }
    }
}

/// Rebuild store and schema from a checkpoint
fn restore(body: CheckpointBody) -> Result<(TableStore, SchemaRegistry)> {
    let schema = SchemaRegistry::from_tables(body.schema)?;
    let store = TableStore::from_dump(body.version, body.tables);
    if let Some(missing) = schema.tables().find(|t| !store.contains_table(&t.name)) {
        return Err(Error::Corruption(format!(
            "checkpoint has no rows section for table {}",
            missing.name
        )));
    }
    Ok((store, schema))
}

/// Re-executes one live query and feeds its subject
struct LiveRunner {
    stmt: BoundStatement,
    store: Arc<TableStore>,
    /// Snapshot version of the last emitted result
    last_version: Mutex<Option<u64>>,
}

impl LiveRunner {
    fn refresh(&self, subject: &Subject<QueryResult>) -> Result<()> {
        // Serialized so an older snapshot never overwrites a newer one
        let mut last = self.last_version.lock();
        let snapshot = self.store.snapshot();
        if last.map_or(false, |v| snapshot.version() <= v) {
            return Ok(());
        }
        match execute_query(&self.stmt, &mut SnapshotSource(&snapshot)) {
            Ok(result) => {
                *last = Some(snapshot.version());
                debug!(version = snapshot.version(), rows = result.len(), "Live query refreshed");
                subject.emit(result);
                Ok(())
            }
            Err(e) => {
                subject.fail(e.clone());
                Err(e)
            }
        }
    }
}
