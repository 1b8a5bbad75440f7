//! Prepared statements: binding, stepping, and typed column access.
//!
//! A [`Statement`] is an explicit state machine. Operations that are invalid
//! in the current state are rejected with a typed error instead of being
//! forwarded to the engine:
//!
//! ```text
//! Ready --step:row--> Row --step:done--> Done --reset--> Ready
//!   \                  \                  |
//!    \--step:done------ \--bind---------- | --finalize--> Finalized
//! ```
//!
//! Column reads are legal only in `Row`; stepping an exhausted statement
//! requires an explicit [`reset`](Statement::reset) first; nothing but drop
//! is legal after [`finalize`](Statement::finalize).

use std::collections::HashMap;
use std::marker::PhantomData;

use crate::connection::Connection;
use crate::error::{Error, Result};
use crate::ffi::RawStmt;
use crate::value::{FromValue, Value};

/// Markers tried, in order, when resolving a named parameter given without
/// its marker character.
const PARAMETER_MARKERS: [char; 3] = [':', '@', '$'];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    /// Armed at row zero; stepping is legal.
    Ready,
    /// A result row is available for column reads.
    Row,
    /// Execution completed; reset re-arms.
    Done,
    /// Handle released; only drop is legal.
    Finalized,
}

/// A prepared SQL statement.
///
/// Created via [`Connection::prepare`]; tied to the lifetime of the
/// connection that created it. The column name table is computed once at
/// prepare time and never changes for the lifetime of the statement.
///
/// Statements should be explicitly [`finalize`](Statement::finalize)d;
/// dropping an unfinalized statement releases the handle as a safety net.
#[derive(Debug)]
pub struct Statement<'conn> {
    raw: Option<RawStmt>,
    sql: String,
    columns: Vec<String>,
    by_name: HashMap<String, usize>,
    state: State,
    _conn: PhantomData<&'conn Connection>,
}

impl<'conn> Statement<'conn> {
    pub(crate) fn new(raw: RawStmt, sql: &str) -> Self {
        let count = raw.column_count();
        let mut columns = Vec::with_capacity(count);
        let mut by_name = HashMap::with_capacity(count);
        for idx in 0..count {
            let name = raw.column_name(idx).unwrap_or_default();
            // For duplicate names (e.g. an unaliased join) the leftmost
            // column wins, matching the engine's own lookup.
            by_name.entry(name.clone()).or_insert(idx);
            columns.push(name);
        }
        Self {
            raw: Some(raw),
            sql: sql.to_owned(),
            columns,
            by_name,
            state: State::Ready,
            _conn: PhantomData,
        }
    }

    fn handle(&self) -> Result<&RawStmt> {
        self.raw
            .as_ref()
            .ok_or(Error::InvalidHandle("statement is finalized"))
    }

    /// Returns the SQL text this statement was prepared from.
    #[must_use]
    pub fn sql(&self) -> &str {
        &self.sql
    }

    // ── Binding ─────────────────────────────────────────────────────────

    /// Binds `values` positionally (1-based indices assigned by position).
    ///
    /// The statement is reset and all prior bindings are cleared first, so
    /// each call starts from a clean slate.
    ///
    /// # Errors
    ///
    /// [`Error::ParameterCount`] if `values.len()` differs from the
    /// statement's declared placeholder count; [`Error::Bind`] if the engine
    /// rejects a binding; [`Error::InvalidHandle`] after finalize.
    pub fn bind(&mut self, values: &[Value]) -> Result<()> {
        let raw = self.handle()?;
        let expected = raw.parameter_count();
        if values.len() != expected {
            return Err(Error::ParameterCount {
                expected,
                provided: values.len(),
            });
        }
        raw.reset().map_err(Error::Bind)?;
        raw.clear_bindings().map_err(Error::Bind)?;
        for (i, value) in values.iter().enumerate() {
            Self::bind_value(raw, i + 1, value)?;
        }
        self.state = State::Ready;
        Ok(())
    }

    /// Binds `values` by parameter name.
    ///
    /// Names are given without the marker character; each is resolved
    /// through the statement's declared name→index table (trying `:`, `@`,
    /// and `$` markers in turn) before delegating to positional binding.
    /// Since each name maps to a unique index, the iteration order of the
    /// caller's pairs is irrelevant.
    ///
    /// # Errors
    ///
    /// [`Error::ParameterCount`] on a count mismatch,
    /// [`Error::UnknownParameter`] for a name that resolves to no
    /// placeholder, [`Error::Bind`] if the engine rejects a binding, and
    /// [`Error::InvalidHandle`] after finalize.
    pub fn bind_named(&mut self, values: &[(&str, Value)]) -> Result<()> {
        let raw = self.handle()?;
        let expected = raw.parameter_count();
        if values.len() != expected {
            return Err(Error::ParameterCount {
                expected,
                provided: values.len(),
            });
        }
        let mut resolved = Vec::with_capacity(values.len());
        for (name, value) in values {
            resolved.push((Self::resolve_parameter(raw, name)?, value));
        }
        raw.reset().map_err(Error::Bind)?;
        raw.clear_bindings().map_err(Error::Bind)?;
        for (idx, value) in resolved {
            Self::bind_value(raw, idx, value)?;
        }
        self.state = State::Ready;
        Ok(())
    }

    fn resolve_parameter(raw: &RawStmt, name: &str) -> Result<usize> {
        for marker in PARAMETER_MARKERS {
            if let Some(idx) = raw.parameter_index(&format!("{marker}{name}")) {
                return Ok(idx);
            }
        }
        Err(Error::UnknownParameter(name.to_owned()))
    }

    /// The exhaustive bind switch: each canonical variant maps to exactly
    /// one native bind call.
    fn bind_value(raw: &RawStmt, idx: usize, value: &Value) -> Result<()> {
        match value {
            Value::Integer(v) => raw.bind_i64(idx, *v),
            Value::Real(v) => raw.bind_f64(idx, *v),
            Value::Text(v) => raw.bind_text(idx, v),
            Value::Blob(v) => raw.bind_blob(idx, v),
            Value::Null => raw.bind_null(idx),
        }
        .map_err(Error::Bind)
    }

    // ── Stepping ────────────────────────────────────────────────────────

    /// Advances to the next row. Returns `true` if a row is available,
    /// `false` once execution completed with no more rows.
    ///
    /// # Errors
    ///
    /// [`Error::Step`] for any engine failure (constraint violation, locked
    /// database, ...); [`Error::InvalidState`] when the statement is already
    /// exhausted (call [`reset`](Self::reset) to run it again);
    /// [`Error::InvalidHandle`] after finalize.
    pub fn step(&mut self) -> Result<bool> {
        match self.state {
            State::Finalized => Err(Error::InvalidHandle("statement is finalized")),
            State::Done => Err(Error::InvalidState(
                "statement is exhausted; call reset() to run it again",
            )),
            State::Ready | State::Row => {
                let stepped = self.handle()?.step();
                match stepped {
                    Ok(true) => {
                        self.state = State::Row;
                        Ok(true)
                    }
                    Ok(false) => {
                        self.state = State::Done;
                        Ok(false)
                    }
                    Err(err) => {
                        self.state = State::Done;
                        Err(Error::Step(err))
                    }
                }
            }
        }
    }

    /// Re-arms the statement at row zero without forgetting its bindings.
    ///
    /// # Errors
    ///
    /// [`Error::Step`] if the engine reports a deferred execution failure;
    /// [`Error::InvalidHandle`] after finalize.
    pub fn reset(&mut self) -> Result<()> {
        self.handle()?.reset().map_err(Error::Step)?;
        self.state = State::Ready;
        Ok(())
    }

    /// Binds `values` and steps once, discarding row data. Intended for
    /// INSERT/UPDATE/DELETE.
    ///
    /// # Errors
    ///
    /// As for [`bind`](Self::bind) and [`step`](Self::step).
    pub fn execute(&mut self, values: &[Value]) -> Result<()> {
        self.bind(values)?;
        self.step()?;
        Ok(())
    }

    // ── Column access ───────────────────────────────────────────────────

    /// Returns the number of columns in the result set.
    #[must_use]
    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    /// Returns the column names, in result-set order.
    #[must_use]
    pub fn column_names(&self) -> &[String] {
        &self.columns
    }

    /// Resolves a column name to its 0-based index.
    ///
    /// # Errors
    ///
    /// [`Error::UnknownColumn`] if no column has that name.
    pub fn column_index(&self, name: &str) -> Result<usize> {
        self.by_name
            .get(name)
            .copied()
            .ok_or_else(|| Error::UnknownColumn(name.to_owned()))
    }

    /// Reads column `idx` of the current row as a canonical [`Value`].
    ///
    /// Returns `None` for an out-of-range index.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidState`] if no row is ready;
    /// [`Error::InvalidHandle`] after finalize.
    pub fn value(&self, idx: usize) -> Result<Option<Value>> {
        match self.state {
            State::Finalized => Err(Error::InvalidHandle("statement is finalized")),
            State::Row => {
                if idx >= self.columns.len() {
                    return Ok(None);
                }
                Ok(Some(self.handle()?.column_value(idx)))
            }
            State::Ready | State::Done => Err(Error::InvalidState(
                "no row is available; call step() first",
            )),
        }
    }

    /// Reads column `idx` of the current row, projected to `T`.
    ///
    /// Absent (`None`) when the column is NULL, the index is out of range,
    /// or the stored value does not have the requested shape.
    ///
    /// # Errors
    ///
    /// As for [`value`](Self::value).
    pub fn get<T: FromValue>(&self, idx: usize) -> Result<Option<T>> {
        match self.value(idx)? {
            None | Some(Value::Null) => Ok(None),
            Some(v) => Ok(T::from_value(&v)),
        }
    }

    /// Reads the named column of the current row, projected to `T`.
    ///
    /// # Errors
    ///
    /// [`Error::UnknownColumn`] for an unknown name, otherwise as for
    /// [`get`](Self::get).
    pub fn get_by_name<T: FromValue>(&self, name: &str) -> Result<Option<T>> {
        let idx = self.column_index(name)?;
        self.get(idx)
    }

    /// Projects the current row to a column-name → [`Value`] map.
    ///
    /// NULL columns are absent from the map.
    ///
    /// # Errors
    ///
    /// As for [`value`](Self::value).
    pub fn row_map(&self) -> Result<HashMap<String, Value>> {
        let mut map = HashMap::with_capacity(self.columns.len());
        for idx in 0..self.columns.len() {
            if let Some(value) = self.value(idx)? {
                if !value.is_null() {
                    map.insert(self.columns[idx].clone(), value);
                }
            }
        }
        Ok(map)
    }

    // ── Row iteration ───────────────────────────────────────────────────

    /// Returns a cursor over the remaining rows.
    ///
    /// Each [`Rows::next`] call performs one [`step`](Self::step); the
    /// cursor ends cleanly once the statement is exhausted. Restarting
    /// iteration requires an explicit [`reset`](Self::reset), which re-arms
    /// the statement at row zero without forgetting its bindings.
    pub fn rows(&mut self) -> Rows<'_, 'conn> {
        Rows { stmt: self }
    }

    // ── Finalize ────────────────────────────────────────────────────────

    /// Releases the native handle. The statement is unusable afterwards.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidHandle`] on a second call; [`Error::Step`] if the
    /// engine reports a deferred evaluation failure while finalizing.
    pub fn finalize(&mut self) -> Result<()> {
        match self.raw.take() {
            Some(raw) => {
                self.state = State::Finalized;
                raw.finalize().map_err(Error::Step)
            }
            None => Err(Error::InvalidHandle("statement is already finalized")),
        }
    }
}

/// Streaming cursor over a statement's rows.
///
/// Borrows the statement mutably for the duration of the iteration; the
/// statement itself is yielded for column access while a row is ready.
#[derive(Debug)]
pub struct Rows<'stmt, 'conn> {
    stmt: &'stmt mut Statement<'conn>,
}

impl<'conn> Rows<'_, 'conn> {
    /// Steps to the next row. Yields the statement for column access, or
    /// `None` once the statement is exhausted.
    ///
    /// # Errors
    ///
    /// As for [`Statement::step`].
    pub fn next(&mut self) -> Result<Option<&Statement<'conn>>> {
        if self.stmt.state == State::Done {
            return Ok(None);
        }
        if self.stmt.step()? {
            Ok(Some(&*self.stmt))
        } else {
            Ok(None)
        }
    }
}

impl Drop for Statement<'_> {
    fn drop(&mut self) {
        // Safety net for statements that were never explicitly finalized:
        // RawStmt's own Drop releases the handle.
        self.raw.take();
    }
}
