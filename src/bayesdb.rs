//! The `BayesDb` handle: one SQLite connection plus BQL state.
//!
//! A handle owns the connection, the per-connection catalog cache,
//! the transaction bookkeeping, and the operator context shared with
//! the SQL user-defined functions.  Handles are single-threaded;
//! multiple handles may share a database file through SQLite's
//! locking.

use std::cell::{Cell, RefCell};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use rusqlite::types::Value;
use rusqlite::Connection;

use crate::backend::{Backend, OpContext};
use crate::bql;
use crate::bqlfn;
use crate::compile::Bindings;
use crate::error::{BqlError, Result};
use crate::schema;

pub struct BayesDb {
    pub(crate) conn: Connection,
    pub(crate) ops: Arc<OpContext>,
    txn_depth: Cell<u32>,
    user_txn: Cell<bool>,
    savepoint_seq: Cell<u64>,
    cache: RefCell<Option<HashMap<String, i64>>>,
    loaded_generators: RefCell<HashSet<i64>>,
}

impl std::fmt::Debug for BayesDb {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BayesDb")
            .field("txn_depth", &self.txn_depth)
            .field("user_txn", &self.user_txn)
            .field("savepoint_seq", &self.savepoint_seq)
            .finish_non_exhaustive()
    }
}

impl BayesDb {
    /// Open (creating if necessary) a database file.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<BayesDb> {
        Self::from_connection(Connection::open(path)?)
    }

    pub fn open_in_memory() -> Result<BayesDb> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<BayesDb> {
        conn.execute_batch("PRAGMA foreign_keys = ON")?;
        schema::install_schema(&conn)?;
        let ops = Arc::new(OpContext::new());
        bqlfn::register_functions(&conn, &ops)?;
        let bdb = BayesDb {
            conn,
            ops,
            txn_depth: Cell::new(0),
            user_txn: Cell::new(false),
            savepoint_seq: Cell::new(0),
            cache: RefCell::new(None),
            loaded_generators: RefCell::new(HashSet::new()),
        };
        for backend in crate::backends::builtins() {
            bdb.register_backend(backend)?;
        }
        Ok(bdb)
    }

    /// Register a statistical backend under its own name.  Backends
    /// are looked up by `CREATE GENERATOR … USING <name>`.
    pub fn register_backend(&self, backend: Arc<dyn Backend>) -> Result<()> {
        self.savepoint(|| {
            let name = crate::catalog::casefold(backend.name());
            let existing: Option<i64> = {
                use rusqlite::OptionalExtension;
                self.conn
                    .query_row(
                        "SELECT version FROM bayesdb_backend WHERE name = ?",
                        [&name],
                        |r| r.get(0),
                    )
                    .optional()?
            };
            match existing {
                Some(v) if v != backend.version() => {
                    return Err(BqlError::Schema(format!(
                        "backend {} installed with version {}, binary supports {}",
                        name,
                        v,
                        backend.version()
                    )));
                }
                Some(_) => {}
                None => {
                    self.conn.execute(
                        "INSERT INTO bayesdb_backend (name, version) VALUES (?, ?)",
                        rusqlite::params![name, backend.version()],
                    )?;
                }
            }
            backend.register(self)?;
            self.ops.add_backend(backend.clone())
        })
    }

    /// Execute one BQL phrase with positional parameters.
    pub fn execute(&self, bql_text: &str, params: &[Value]) -> Result<Cursor> {
        let phrase = bayesql_ast::parse_phrase(bql_text)?;
        self.ops.clear_interrupt();
        bql::execute_phrase(self, &phrase, Bindings::Positional(params))
    }

    /// Execute one BQL phrase with named parameters.
    pub fn execute_named(&self, bql_text: &str, params: &[(&str, Value)]) -> Result<Cursor> {
        let phrase = bayesql_ast::parse_phrase(bql_text)?;
        self.ops.clear_interrupt();
        bql::execute_phrase(self, &phrase, Bindings::Named(params))
    }

    /// Execute a script of semicolon-separated phrases, discarding
    /// any results.
    pub fn execute_script(&self, bql_text: &str) -> Result<()> {
        for phrase in bayesql_ast::parse(bql_text)? {
            self.ops.clear_interrupt();
            bql::execute_phrase(self, &phrase, Bindings::Positional(&[]))?;
        }
        Ok(())
    }

    /// Compile a BQL query and return the generated SQL, without
    /// executing it.
    pub fn compile_to_sql(&self, bql_text: &str) -> Result<String> {
        let phrase = bayesql_ast::parse_phrase(bql_text)?;
        match &phrase.phrase {
            bayesql_ast::Phrase::Query(q) => self.savepoint(|| {
                let mut out = crate::compile::Output::new(
                    phrase.n_numpar,
                    phrase.nampar_map.clone(),
                    Bindings::Positional(&[]),
                );
                crate::compile::compile_query(self, q, &mut out)?;
                Ok(out.into_sql())
            }),
            _ => Err(BqlError::Unsupported("only queries compile to SQL".into())),
        }
    }

    /// Run plain SQL against the underlying store.
    pub fn sql_execute(&self, sql: &str, params: &[Value]) -> Result<Cursor> {
        self.run_sql(sql, params)
    }

    pub(crate) fn run_sql(&self, sql: &str, bindings: &[Value]) -> Result<Cursor> {
        tracing::trace!(sql, "running SQL");
        let mut stmt = self.conn.prepare(sql)?;
        let columns: Vec<String> =
            stmt.column_names().iter().map(|s| s.to_string()).collect();
        let ncols = columns.len();
        let mut rows = stmt.query(rusqlite::params_from_iter(bindings.iter().cloned()))?;
        let mut data = Vec::new();
        loop {
            self.ops.check_interrupt()?;
            match rows.next()? {
                Some(row) => {
                    let mut vals = Vec::with_capacity(ncols);
                    for i in 0..ncols {
                        vals.push(row.get::<_, Value>(i)?);
                    }
                    data.push(vals);
                }
                None => break,
            }
        }
        Ok(Cursor::new(columns, data))
    }

    /// Set or clear the default generator of a table.
    pub fn set_default_generator(&self, table: &str, generator: Option<&str>) -> Result<()> {
        self.savepoint(|| crate::catalog::set_default_generator(self, table, generator))
    }

    /// A cloneable handle that cancels the phrase in flight.
    pub fn interrupt_handle(&self) -> InterruptHandle {
        InterruptHandle { ops: Arc::clone(&self.ops) }
    }

    /// Close the handle.  Fails if a transaction is still open.
    pub fn close(self) -> Result<()> {
        if self.user_txn.get() {
            return Err(BqlError::Transaction("close inside a transaction".into()));
        }
        self.conn.close().map_err(|(_, e)| BqlError::Sqlite(e))
    }

    // ------------------------------------------------- transactions

    pub(crate) fn txn_active(&self) -> bool {
        self.user_txn.get()
    }

    pub(crate) fn begin_txn(&self) -> Result<()> {
        if self.user_txn.get() {
            return Err(BqlError::Transaction("already in a transaction".into()));
        }
        self.conn.execute_batch("BEGIN")?;
        self.user_txn.set(true);
        self.txn_push();
        Ok(())
    }

    pub(crate) fn commit_txn(&self) -> Result<()> {
        if !self.user_txn.get() {
            return Err(BqlError::Transaction("not in a transaction".into()));
        }
        self.conn.execute_batch("COMMIT")?;
        self.user_txn.set(false);
        self.txn_pop();
        Ok(())
    }

    pub(crate) fn rollback_txn(&self) -> Result<()> {
        if !self.user_txn.get() {
            return Err(BqlError::Transaction("not in a transaction".into()));
        }
        self.conn.execute_batch("ROLLBACK")?;
        self.user_txn.set(false);
        self.txn_pop();
        self.drop_loaded_generators();
        Ok(())
    }

    /// Run `f` inside a savepoint: released on success, rolled back
    /// on error.  Savepoints nest, inside or outside a user
    /// transaction.
    pub(crate) fn savepoint<T>(&self, f: impl FnOnce() -> Result<T>) -> Result<T> {
        let n = self.savepoint_seq.get();
        self.savepoint_seq.set(n + 1);
        let name = format!("bayesql_sp_{}", n);
        self.conn.execute_batch(&format!("SAVEPOINT {}", name))?;
        self.txn_push();
        let result = f();
        self.txn_pop();
        match result {
            Ok(v) => {
                self.conn.execute_batch(&format!("RELEASE {}", name))?;
                Ok(v)
            }
            Err(e) => {
                let _ = self
                    .conn
                    .execute_batch(&format!("ROLLBACK TO {0}; RELEASE {0}", name));
                self.bust_cache();
                self.drop_loaded_generators();
                Err(e)
            }
        }
    }

    fn txn_push(&self) {
        if self.txn_depth.get() == 0 {
            *self.cache.borrow_mut() = Some(HashMap::new());
        }
        self.txn_depth.set(self.txn_depth.get() + 1);
    }

    fn txn_pop(&self) {
        let d = self.txn_depth.get();
        debug_assert!(d > 0);
        self.txn_depth.set(d - 1);
        if d == 1 {
            *self.cache.borrow_mut() = None;
        }
    }

    // ------------------------------------------------------- caches

    pub(crate) fn cache_get(&self, key: &str) -> Option<i64> {
        self.cache.borrow().as_ref().and_then(|m| m.get(key).copied())
    }

    pub(crate) fn cache_put(&self, key: &str, value: i64) {
        if let Some(m) = self.cache.borrow_mut().as_mut() {
            m.insert(key.to_string(), value);
        }
    }

    pub(crate) fn bust_cache(&self) {
        if let Some(m) = self.cache.borrow_mut().as_mut() {
            m.clear();
        }
    }

    pub(crate) fn generator_loaded(&self, generator_id: i64) -> bool {
        self.loaded_generators.borrow().contains(&generator_id)
    }

    pub(crate) fn mark_generator_loaded(&self, generator_id: i64) {
        self.loaded_generators.borrow_mut().insert(generator_id);
    }

    pub(crate) fn unmark_generator_loaded(&self, generator_id: i64) {
        self.loaded_generators.borrow_mut().remove(&generator_id);
    }

    /// After a rollback the backends' in-memory model state may be
    /// ahead of the catalog; force reload on next touch.
    fn drop_loaded_generators(&self) {
        self.loaded_generators.borrow_mut().clear();
    }
}

/// Cancels the phrase currently executing on the originating handle.
/// The flag is checked between streamed rows, between ANALYZE
/// checkpoints, and by cooperating backends.
#[derive(Clone)]
pub struct InterruptHandle {
    ops: Arc<OpContext>,
}

impl InterruptHandle {
    pub fn interrupt(&self) {
        self.ops.interrupted.store(true, Ordering::SeqCst);
    }
}

/// Result rows of one phrase, materialized within the phrase's
/// transaction.
#[derive(Debug)]
pub struct Cursor {
    columns: Vec<String>,
    rows: std::vec::IntoIter<Vec<Value>>,
}

impl Cursor {
    pub(crate) fn new(columns: Vec<String>, rows: Vec<Vec<Value>>) -> Cursor {
        Cursor { columns, rows: rows.into_iter() }
    }

    pub(crate) fn empty() -> Cursor {
        Cursor::new(Vec::new(), Vec::new())
    }

    pub fn column_names(&self) -> &[String] {
        &self.columns
    }

    pub fn next_row(&mut self) -> Option<Vec<Value>> {
        self.rows.next()
    }
}

impl Iterator for Cursor {
    type Item = Vec<Value>;

    fn next(&mut self) -> Option<Vec<Value>> {
        self.rows.next()
    }
}
