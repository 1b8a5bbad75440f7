//! Error types for the SQLite wrapper.

use std::fmt;

use thiserror::Error;

/// Numeric result code returned by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ErrorCode(pub i32);

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A failed engine call: the numeric result code plus the detail string
/// captured from `sqlite3_errmsg` at the moment of failure.
///
/// The detail string is connection-global mutable state inside the engine,
/// so it is read immediately at the failing call site and never deferred.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("engine error {code}: {message}")]
pub struct EngineError {
    /// SQLite result code.
    pub code: ErrorCode,
    /// Human-readable detail from `sqlite3_errmsg` when available.
    pub message: String,
}

impl EngineError {
    /// Creates a new engine error.
    pub(crate) fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code: ErrorCode(code),
            message: message.into(),
        }
    }
}

/// Error returned by database operations.
#[derive(Debug, Error, PartialEq)]
pub enum Error {
    /// The SQL text failed to compile.
    #[error("failed to prepare statement: {0}")]
    Prepare(EngineError),

    /// The engine rejected a parameter binding.
    #[error("failed to bind parameter: {0}")]
    Bind(EngineError),

    /// The number of supplied parameters does not match the statement's
    /// declared placeholder count.
    #[error("statement declares {expected} parameter(s) but {provided} were supplied")]
    ParameterCount {
        /// Placeholder count declared by the prepared statement.
        expected: usize,
        /// Number of values supplied by the caller.
        provided: usize,
    },

    /// A named parameter does not resolve to any declared placeholder.
    #[error("no such parameter: {0}")]
    UnknownParameter(String),

    /// Statement execution failed (constraint violation, locked database, ...).
    #[error("failed to step statement: {0}")]
    Step(EngineError),

    /// The database could not be opened or closed.
    #[error("connection error: {0}")]
    Connection(EngineError),

    /// Operation on a finalized statement or a closed connection.
    #[error("invalid handle: {0}")]
    InvalidHandle(&'static str),

    /// Operation rejected by the statement state machine (e.g. reading a
    /// column with no row ready, or stepping an exhausted statement).
    #[error("invalid operation: {0}")]
    InvalidState(&'static str),

    /// A column name lookup missed.
    #[error("no such column: {0}")]
    UnknownColumn(String),

    /// Transaction control issued out of sequence, or rejected by the engine.
    #[error("transaction error: {0}")]
    Transaction(String),

    /// A transaction task failed and the automatic rollback failed too.
    ///
    /// Both failures are surfaced; `original` is the task's own error.
    #[error("transaction failed: {original}; rollback also failed: {rollback}")]
    RollbackFailed {
        /// The error raised by the transaction task.
        original: Box<Error>,
        /// The error raised by the rollback attempt.
        rollback: Box<Error>,
    },
}

/// Result type for database operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn engine_error_display_includes_code_and_message() {
        let err = EngineError::new(1, "near \"SELEC\": syntax error");
        assert_eq!(err.to_string(), "engine error 1: near \"SELEC\": syntax error");
    }

    #[test]
    fn rollback_failed_display_carries_both_errors() {
        let err = Error::RollbackFailed {
            original: Box::new(Error::Step(EngineError::new(19, "constraint failed"))),
            rollback: Box::new(Error::Transaction("no open transaction".to_string())),
        };
        let text = err.to_string();
        assert!(text.contains("constraint failed"));
        assert!(text.contains("no open transaction"));
    }
}
