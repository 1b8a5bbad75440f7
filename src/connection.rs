//! Safe wrapper around a SQLite database connection.
//!
//! This file contains no `unsafe` code. All FFI interaction is delegated to
//! [`RawDb`] which encapsulates the raw pointers and C type conversions.

use std::path::{Path, PathBuf};

use crate::error::{EngineError, Error, Result};
use crate::ffi::{self, RawDb};
use crate::statement::Statement;
use crate::value::Value;

/// Transaction isolation / locking behaviour.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionBehavior {
    /// `BEGIN DEFERRED` (the default).
    Deferred,
    /// `BEGIN IMMEDIATE` – acquires a RESERVED lock immediately.
    Immediate,
}

impl TransactionBehavior {
    const fn sql(self) -> &'static str {
        match self {
            Self::Deferred => "BEGIN DEFERRED",
            Self::Immediate => "BEGIN IMMEDIATE",
        }
    }
}

/// A SQLite database connection.
///
/// Created closed; [`open`](Connection::open) and
/// [`close`](Connection::close) bracket usage. The connection is **not**
/// `Sync` – all access must happen from a single thread at a time, which
/// the [`Queue`](crate::Queue)'s mutex enforces.
///
/// An open transaction is tracked so that out-of-order transaction control
/// fails loudly instead of leaking engine state.
#[derive(Debug)]
pub struct Connection {
    path: PathBuf,
    read_only: bool,
    db: Option<RawDb>,
    in_transaction: bool,
}

impl Connection {
    /// Creates a closed connection for the database at `path`.
    ///
    /// Pass `read_only = true` for read-only access; otherwise the database
    /// file is created if missing.
    pub fn new(path: impl Into<PathBuf>, read_only: bool) -> Self {
        Self {
            path: path.into(),
            read_only,
            db: None,
            in_transaction: false,
        }
    }

    /// Returns the database path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns `true` while the native handle is held.
    #[must_use]
    pub const fn is_open(&self) -> bool {
        self.db.is_some()
    }

    fn handle(&self) -> Result<&RawDb> {
        self.db
            .as_ref()
            .ok_or(Error::InvalidHandle("connection is closed"))
    }

    // ── Lifecycle ───────────────────────────────────────────────────────

    /// Acquires the native handle.
    ///
    /// Opening an already-open connection is a no-op: the existing handle
    /// is kept and no second handle is acquired.
    ///
    /// # Errors
    ///
    /// [`Error::Connection`] if the engine cannot open the path.
    pub fn open(&mut self) -> Result<()> {
        if self.db.is_some() {
            return Ok(());
        }
        let db = RawDb::open(&self.path, self.read_only).map_err(Error::Connection)?;
        self.db = Some(db);
        Ok(())
    }

    /// Releases the native handle. Closing a closed connection is a no-op.
    ///
    /// A transaction still open at this point is rolled back by the engine.
    ///
    /// # Errors
    ///
    /// [`Error::Connection`] if the engine reports a close failure.
    pub fn close(&mut self) -> Result<()> {
        if self.in_transaction {
            log::warn!(
                "closing {} with an open transaction; the engine rolls it back",
                self.path.display()
            );
            self.in_transaction = false;
        }
        match self.db.take() {
            Some(db) => db.close().map_err(Error::Connection),
            None => Ok(()),
        }
    }

    // ── Statements ──────────────────────────────────────────────────────

    /// Prepares a single SQL statement.
    ///
    /// The statement's column-name table is computed here, once, and stays
    /// fixed for the statement's lifetime.
    ///
    /// # Errors
    ///
    /// [`Error::Prepare`] on invalid SQL, [`Error::InvalidHandle`] when
    /// closed.
    pub fn prepare(&self, sql: &str) -> Result<Statement<'_>> {
        let raw = self.handle()?.prepare(sql).map_err(Error::Prepare)?;
        Ok(Statement::new(raw, sql))
    }

    /// Prepares and executes a single SQL statement with the given
    /// parameters. Returns the number of rows changed.
    ///
    /// # Errors
    ///
    /// As for [`prepare`](Self::prepare), [`Statement::bind`] and
    /// [`Statement::step`].
    pub fn execute(&self, sql: &str, params: &[Value]) -> Result<usize> {
        let mut stmt = self.prepare(sql)?;
        stmt.bind(params)?;
        stmt.step()?;
        self.changes()
    }

    /// Executes one or more SQL statements separated by semicolons.
    ///
    /// No result rows are returned. Suitable for DDL, PRAGMAs, and
    /// multi-statement scripts.
    ///
    /// # Errors
    ///
    /// [`Error::Step`] on any engine failure, [`Error::InvalidHandle`] when
    /// closed.
    pub fn execute_batch(&self, sql: &str) -> Result<()> {
        self.handle()?.exec(sql).map_err(Error::Step)
    }

    /// Prepares and executes a statement, mapping exactly one result row.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::Step`] if no row is returned; otherwise as for
    /// [`query_row_optional`](Self::query_row_optional).
    pub fn query_row<T>(
        &self,
        sql: &str,
        params: &[Value],
        mapper: impl FnOnce(&Statement<'_>) -> Result<T>,
    ) -> Result<T> {
        self.query_row_optional(sql, params, mapper)?
            .ok_or_else(|| {
                Error::Step(EngineError::new(ffi::SQLITE_DONE, "query returned no rows"))
            })
    }

    /// Like [`query_row`](Self::query_row) but returns `Ok(None)` when no
    /// row is returned.
    ///
    /// # Errors
    ///
    /// As for [`prepare`](Self::prepare), [`Statement::bind`] and
    /// [`Statement::step`].
    pub fn query_row_optional<T>(
        &self,
        sql: &str,
        params: &[Value],
        mapper: impl FnOnce(&Statement<'_>) -> Result<T>,
    ) -> Result<Option<T>> {
        let mut stmt = self.prepare(sql)?;
        stmt.bind(params)?;
        if stmt.step()? {
            mapper(&stmt).map(Some)
        } else {
            Ok(None)
        }
    }

    /// Prepares a statement and collects all matching rows.
    ///
    /// # Errors
    ///
    /// As for [`prepare`](Self::prepare), [`Statement::bind`] and
    /// [`Statement::step`].
    pub fn query_map<T>(
        &self,
        sql: &str,
        params: &[Value],
        mapper: impl Fn(&Statement<'_>) -> Result<T>,
    ) -> Result<Vec<T>> {
        let mut stmt = self.prepare(sql)?;
        stmt.bind(params)?;
        let mut results = Vec::new();
        while stmt.step()? {
            results.push(mapper(&stmt)?);
        }
        Ok(results)
    }

    // ── Transactions ────────────────────────────────────────────────────

    /// Opens a transaction, issued through the regular prepare/step path.
    ///
    /// # Errors
    ///
    /// [`Error::Transaction`] if a transaction is already open or the engine
    /// rejects the BEGIN.
    pub fn begin_transaction(&mut self, behavior: TransactionBehavior) -> Result<()> {
        if self.in_transaction {
            return Err(Error::Transaction(
                "a transaction is already open".to_owned(),
            ));
        }
        self.transaction_command(behavior.sql())?;
        self.in_transaction = true;
        Ok(())
    }

    /// Commits the open transaction.
    ///
    /// # Errors
    ///
    /// [`Error::Transaction`] if no transaction is open or the engine
    /// rejects the COMMIT (in which case the transaction stays open).
    pub fn commit(&mut self) -> Result<()> {
        if !self.in_transaction {
            return Err(Error::Transaction("no open transaction to commit".to_owned()));
        }
        self.transaction_command("COMMIT")?;
        self.in_transaction = false;
        Ok(())
    }

    /// Rolls back the open transaction.
    ///
    /// # Errors
    ///
    /// [`Error::Transaction`] if no transaction is open or the engine
    /// rejects the ROLLBACK.
    pub fn rollback(&mut self) -> Result<()> {
        if !self.in_transaction {
            return Err(Error::Transaction(
                "no open transaction to roll back".to_owned(),
            ));
        }
        self.transaction_command("ROLLBACK")?;
        self.in_transaction = false;
        Ok(())
    }

    /// Returns `true` while a transaction opened through
    /// [`begin_transaction`](Self::begin_transaction) is pending.
    #[must_use]
    pub const fn in_transaction(&self) -> bool {
        self.in_transaction
    }

    fn transaction_command(&self, sql: &str) -> Result<()> {
        let mut stmt = self
            .prepare(sql)
            .map_err(|err| Error::Transaction(err.to_string()))?;
        stmt.step()
            .map_err(|err| Error::Transaction(err.to_string()))?;
        Ok(())
    }

    // ── Bookkeeping ─────────────────────────────────────────────────────

    /// Returns the rowid of the most recent successful INSERT.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidHandle`] when closed.
    pub fn last_insert_rowid(&self) -> Result<i64> {
        Ok(self.handle()?.last_insert_rowid())
    }

    /// Returns the number of rows changed by the most recent statement.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidHandle`] when closed.
    pub fn changes(&self) -> Result<usize> {
        Ok(usize::try_from(self.handle()?.changes()).unwrap_or(0))
    }
}

#[cfg(test)]
impl Connection {
    /// Opens an in-memory database (state lives until `close`).
    pub(crate) fn open_in_memory() -> Result<Self> {
        let mut conn = Self::new(":memory:", false);
        conn.open()?;
        Ok(conn)
    }
}
