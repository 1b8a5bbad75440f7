//! Raw FFI layer over the SQLite C API.
//!
//! The symbols come from `libsqlite3-sys` with the bundled amalgamation.
//! [`RawDb`] and [`RawStmt`] encapsulate the raw pointers and C type
//! conversions; every failing engine call captures `sqlite3_errmsg`
//! synchronously, before any other engine call can overwrite it.
//!
//! This is the **only** module that contains `unsafe` code or C types.
//! Consumer code uses the safe types built on top and never touches raw
//! pointers directly.

// Column and parameter indices are validated by the safe layer before they
// reach this module, so the usize -> c_int casts cannot truncate.
#![allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap, clippy::cast_sign_loss)]

use std::ffi::{CStr, CString};
use std::os::raw::{c_char, c_int};
use std::path::Path;
use std::ptr;

use libsqlite3_sys as sqlite;

use crate::error::EngineError;
use crate::value::Value;

pub(crate) use libsqlite3_sys::SQLITE_DONE;

// `libsqlite3-sys` deliberately blocklists `sqlite3_close_v2` in its bindgen
// config, so no binding is generated for it. The bundled SQLite amalgamation
// still exports the symbol, so declare it directly to preserve the intended
// deferred-close semantics (plain `sqlite3_close` has different behavior).
extern "C" {
    fn sqlite3_close_v2(db: *mut sqlite::sqlite3) -> c_int;
}

/// Reads the engine's detail string for `db`.
///
/// Must be called immediately after the failing operation: the buffer is
/// connection-global and the next engine call overwrites it.
fn errmsg(db: *mut sqlite::sqlite3) -> String {
    if db.is_null() {
        return "unknown error".to_owned();
    }
    unsafe {
        let ptr = sqlite::sqlite3_errmsg(db);
        if ptr.is_null() {
            "unknown error".to_owned()
        } else {
            CStr::from_ptr(ptr).to_string_lossy().into_owned()
        }
    }
}

fn nul_in_sql(err: &std::ffi::NulError) -> EngineError {
    EngineError::new(sqlite::SQLITE_MISUSE, format!("nul byte in SQL: {err}"))
}

// ── RawDb ───────────────────────────────────────────────────────────────

/// Owned `sqlite3*` handle.
pub(crate) struct RawDb {
    db: *mut sqlite::sqlite3,
}

// Safety: RawDb is not Sync but is Send. The handle is opened with
// SQLITE_OPEN_FULLMUTEX and may move to another thread as long as only one
// thread accesses it at a time, which the queue's mutex enforces.
unsafe impl Send for RawDb {}

impl RawDb {
    /// Opens (or creates) a database at `path`.
    pub fn open(path: &Path, read_only: bool) -> Result<Self, EngineError> {
        let path_str = path.to_string_lossy();
        let c_path = CString::new(path_str.as_bytes()).map_err(|e| {
            EngineError::new(sqlite::SQLITE_MISUSE, format!("invalid path: {e}"))
        })?;

        let flags = if read_only {
            sqlite::SQLITE_OPEN_READONLY | sqlite::SQLITE_OPEN_FULLMUTEX
        } else {
            sqlite::SQLITE_OPEN_READWRITE
                | sqlite::SQLITE_OPEN_CREATE
                | sqlite::SQLITE_OPEN_FULLMUTEX
        };

        let mut db: *mut sqlite::sqlite3 = ptr::null_mut();
        let rc =
            unsafe { sqlite::sqlite3_open_v2(c_path.as_ptr(), &mut db, flags, ptr::null()) };
        if rc != sqlite::SQLITE_OK {
            // If open failed but we got a handle, extract the error and close.
            let message = if db.is_null() {
                format!("sqlite3_open_v2 returned {rc}")
            } else {
                let m = errmsg(db);
                unsafe {
                    sqlite3_close_v2(db);
                }
                m
            };
            return Err(EngineError::new(rc, message));
        }
        Ok(Self { db })
    }

    /// Closes the handle, surfacing the engine's verdict.
    pub fn close(mut self) -> Result<(), EngineError> {
        let rc = unsafe { sqlite3_close_v2(self.db) };
        let result = if rc == sqlite::SQLITE_OK {
            Ok(())
        } else {
            Err(EngineError::new(rc, errmsg(self.db)))
        };
        self.db = ptr::null_mut();
        result
    }

    /// Executes one or more semicolon-separated SQL statements, returning no
    /// rows. Suitable for DDL, PRAGMAs, and scripts.
    pub fn exec(&self, sql: &str) -> Result<(), EngineError> {
        let c_sql = CString::new(sql).map_err(|e| nul_in_sql(&e))?;
        let mut errptr: *mut c_char = ptr::null_mut();
        let rc = unsafe {
            sqlite::sqlite3_exec(self.db, c_sql.as_ptr(), None, ptr::null_mut(), &mut errptr)
        };
        if rc != sqlite::SQLITE_OK {
            let message = if errptr.is_null() {
                errmsg(self.db)
            } else {
                let s = unsafe { CStr::from_ptr(errptr) }.to_string_lossy().into_owned();
                unsafe {
                    sqlite::sqlite3_free(errptr.cast());
                }
                s
            };
            return Err(EngineError::new(rc, message));
        }
        Ok(())
    }

    /// Compiles a single SQL statement.
    pub fn prepare(&self, sql: &str) -> Result<RawStmt, EngineError> {
        let c_sql = CString::new(sql).map_err(|e| nul_in_sql(&e))?;
        let mut stmt: *mut sqlite::sqlite3_stmt = ptr::null_mut();
        let rc = unsafe {
            sqlite::sqlite3_prepare_v2(self.db, c_sql.as_ptr(), -1, &mut stmt, ptr::null_mut())
        };
        if rc != sqlite::SQLITE_OK || stmt.is_null() {
            return Err(EngineError::new(rc, errmsg(self.db)));
        }
        Ok(RawStmt { stmt, db: self.db })
    }

    /// Returns the rowid of the most recent successful INSERT.
    pub fn last_insert_rowid(&self) -> i64 {
        unsafe { sqlite::sqlite3_last_insert_rowid(self.db) }
    }

    /// Returns the number of rows changed by the most recent statement.
    pub fn changes(&self) -> i32 {
        unsafe { sqlite::sqlite3_changes(self.db) }
    }
}

impl Drop for RawDb {
    fn drop(&mut self) {
        if !self.db.is_null() {
            unsafe {
                sqlite3_close_v2(self.db);
            }
            self.db = ptr::null_mut();
        }
    }
}

impl std::fmt::Debug for RawDb {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RawDb").finish_non_exhaustive()
    }
}

// ── RawStmt ─────────────────────────────────────────────────────────────

/// Owned `sqlite3_stmt*` handle, plus the owning `sqlite3*` for error
/// detail retrieval.
pub(crate) struct RawStmt {
    stmt: *mut sqlite::sqlite3_stmt,
    db: *mut sqlite::sqlite3,
}

impl RawStmt {
    fn error(&self, code: c_int) -> EngineError {
        EngineError::new(code, errmsg(self.db))
    }

    fn check(&self, rc: c_int) -> Result<(), EngineError> {
        if rc == sqlite::SQLITE_OK {
            Ok(())
        } else {
            Err(self.error(rc))
        }
    }

    // ── Binding (1-based indices) ───────────────────────────────────────

    pub fn bind_null(&self, idx: usize) -> Result<(), EngineError> {
        let rc = unsafe { sqlite::sqlite3_bind_null(self.stmt, idx as c_int) };
        self.check(rc)
    }

    pub fn bind_i64(&self, idx: usize, value: i64) -> Result<(), EngineError> {
        let rc = unsafe { sqlite::sqlite3_bind_int64(self.stmt, idx as c_int, value) };
        self.check(rc)
    }

    pub fn bind_f64(&self, idx: usize, value: f64) -> Result<(), EngineError> {
        let rc = unsafe { sqlite::sqlite3_bind_double(self.stmt, idx as c_int, value) };
        self.check(rc)
    }

    /// Binds UTF-8 text with transient copy semantics: the engine copies the
    /// bytes before returning, since the source buffer's lifetime is not
    /// guaranteed beyond the call.
    pub fn bind_text(&self, idx: usize, value: &str) -> Result<(), EngineError> {
        let len = c_int::try_from(value.len()).map_err(|_| {
            EngineError::new(sqlite::SQLITE_TOOBIG, "text too large to bind")
        })?;
        let rc = unsafe {
            sqlite::sqlite3_bind_text(
                self.stmt,
                idx as c_int,
                value.as_ptr().cast(),
                len,
                sqlite::SQLITE_TRANSIENT(),
            )
        };
        self.check(rc)
    }

    /// Binds a blob with transient copy semantics.
    ///
    /// A zero-length blob is bound with a null data pointer, which the engine
    /// stores as NULL: zero-length blobs and NULL are indistinguishable on
    /// round-trip at this boundary.
    pub fn bind_blob(&self, idx: usize, value: &[u8]) -> Result<(), EngineError> {
        let len = c_int::try_from(value.len()).map_err(|_| {
            EngineError::new(sqlite::SQLITE_TOOBIG, "blob too large to bind")
        })?;
        let data = if value.is_empty() {
            ptr::null()
        } else {
            value.as_ptr().cast()
        };
        let rc = unsafe {
            sqlite::sqlite3_bind_blob(
                self.stmt,
                idx as c_int,
                data,
                len,
                sqlite::SQLITE_TRANSIENT(),
            )
        };
        self.check(rc)
    }

    /// Returns the number of placeholders declared by the statement.
    pub fn parameter_count(&self) -> usize {
        let count = unsafe { sqlite::sqlite3_bind_parameter_count(self.stmt) };
        usize::try_from(count).unwrap_or(0)
    }

    /// Resolves a parameter name (including its marker character, e.g.
    /// `":id"`) to its 1-based index. Returns `None` for unknown names.
    pub fn parameter_index(&self, name: &str) -> Option<usize> {
        let c_name = CString::new(name).ok()?;
        let idx = unsafe { sqlite::sqlite3_bind_parameter_index(self.stmt, c_name.as_ptr()) };
        usize::try_from(idx).ok().filter(|&i| i > 0)
    }

    // ── Execution ───────────────────────────────────────────────────────

    /// Executes a single step. `Ok(true)` means a row is available,
    /// `Ok(false)` means execution completed.
    pub fn step(&self) -> Result<bool, EngineError> {
        let rc = unsafe { sqlite::sqlite3_step(self.stmt) };
        match rc {
            sqlite::SQLITE_ROW => Ok(true),
            sqlite::SQLITE_DONE => Ok(false),
            _ => Err(self.error(rc)),
        }
    }

    /// Re-arms the statement at row zero. Bindings are preserved.
    pub fn reset(&self) -> Result<(), EngineError> {
        let rc = unsafe { sqlite::sqlite3_reset(self.stmt) };
        self.check(rc)
    }

    /// Clears all bindings back to NULL.
    pub fn clear_bindings(&self) -> Result<(), EngineError> {
        let rc = unsafe { sqlite::sqlite3_clear_bindings(self.stmt) };
        self.check(rc)
    }

    /// Releases the handle, surfacing the engine's verdict (a non-OK code
    /// reports the most recent evaluation error of the statement).
    pub fn finalize(mut self) -> Result<(), EngineError> {
        let rc = unsafe { sqlite::sqlite3_finalize(self.stmt) };
        self.stmt = ptr::null_mut();
        if rc == sqlite::SQLITE_OK {
            Ok(())
        } else {
            Err(EngineError::new(rc, errmsg(self.db)))
        }
    }

    // ── Column reading (0-based indices) ────────────────────────────────

    /// Returns the number of columns in the result set.
    pub fn column_count(&self) -> usize {
        let count = unsafe { sqlite::sqlite3_column_count(self.stmt) };
        usize::try_from(count).unwrap_or(0)
    }

    /// Returns the name of column `idx`, if the engine reports one.
    pub fn column_name(&self, idx: usize) -> Option<String> {
        unsafe {
            let ptr = sqlite::sqlite3_column_name(self.stmt, idx as c_int);
            if ptr.is_null() {
                None
            } else {
                Some(CStr::from_ptr(ptr).to_string_lossy().into_owned())
            }
        }
    }

    /// Reads column `idx` of the current row as a canonical [`Value`].
    ///
    /// The engine's runtime type tag selects exactly one variant; narrower
    /// reads are derived from the canonical value by the safe layer, never
    /// by a separate engine call.
    pub fn column_value(&self, idx: usize) -> Value {
        let tag = unsafe { sqlite::sqlite3_column_type(self.stmt, idx as c_int) };
        match tag {
            sqlite::SQLITE_INTEGER => Value::Integer(self.column_i64(idx)),
            sqlite::SQLITE_FLOAT => Value::Real(self.column_f64(idx)),
            sqlite::SQLITE_TEXT => Value::Text(self.column_text(idx)),
            sqlite::SQLITE_BLOB => Value::Blob(self.column_blob(idx)),
            _ => Value::Null,
        }
    }

    fn column_i64(&self, idx: usize) -> i64 {
        unsafe { sqlite::sqlite3_column_int64(self.stmt, idx as c_int) }
    }

    fn column_f64(&self, idx: usize) -> f64 {
        unsafe { sqlite::sqlite3_column_double(self.stmt, idx as c_int) }
    }

    fn column_text(&self, idx: usize) -> String {
        unsafe {
            let ptr = sqlite::sqlite3_column_text(self.stmt, idx as c_int);
            if ptr.is_null() {
                return String::new();
            }
            let len = sqlite::sqlite3_column_bytes(self.stmt, idx as c_int);
            let bytes = std::slice::from_raw_parts(ptr.cast::<u8>(), len as usize);
            String::from_utf8_lossy(bytes).into_owned()
        }
    }

    fn column_blob(&self, idx: usize) -> Vec<u8> {
        unsafe {
            let ptr = sqlite::sqlite3_column_blob(self.stmt, idx as c_int);
            let len = sqlite::sqlite3_column_bytes(self.stmt, idx as c_int);
            if ptr.is_null() || len <= 0 {
                return Vec::new();
            }
            std::slice::from_raw_parts(ptr.cast::<u8>(), len as usize).to_vec()
        }
    }
}

impl Drop for RawStmt {
    fn drop(&mut self) {
        if !self.stmt.is_null() {
            unsafe {
                sqlite::sqlite3_finalize(self.stmt);
            }
            self.stmt = ptr::null_mut();
        }
    }
}

impl std::fmt::Debug for RawStmt {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RawStmt").finish_non_exhaustive()
    }
}
