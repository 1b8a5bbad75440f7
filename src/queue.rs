//! Serialized access to one database.
//!
//! A [`Queue`] owns exactly one [`Connection`] behind a mutex-guarded
//! critical section: at most one task has access to the connection at any
//! instant, for the lifetime of the queue, no matter how many threads call
//! in concurrently. Tasks are never interleaved; callers block until their
//! task has run and its result is available.
//!
//! Each queue is an owned instance, so independent queues over distinct
//! database files coexist in one process.

use std::path::PathBuf;
use std::sync::Mutex;

use crate::connection::{Connection, TransactionBehavior};
use crate::error::{Error, Result};

/// The serialization boundary ensuring exactly one in-flight database
/// operation at a time.
///
/// The connection is opened at the start of each task's execution window
/// and closed at the end, on every exit path. Note that this makes
/// `:memory:` databases unsuitable for queue use – their contents vanish
/// when the task window closes.
///
/// There is no timeout and no cancellation: a long-running task blocks the
/// whole queue.
#[derive(Debug)]
pub struct Queue {
    conn: Mutex<Connection>,
}

impl Queue {
    /// Creates a queue over the database at `path`, created if missing.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            conn: Mutex::new(Connection::new(path, false)),
        }
    }

    /// Creates a read-only queue over the database at `path`.
    pub fn new_read_only(path: impl Into<PathBuf>) -> Self {
        Self {
            conn: Mutex::new(Connection::new(path, true)),
        }
    }

    /// Runs `task` with exclusive access to the open connection,
    /// serialized against all other `execute`/`transaction` calls on this
    /// queue. Blocks until the task completes.
    ///
    /// The connection is opened before the task runs and closed afterwards
    /// on every exit path. Statements created by the task cannot outlive it
    /// (they borrow the connection) and should be finalized before it
    /// returns.
    ///
    /// A failing task does **not** roll anything back; partial mutations
    /// stay. Use [`transaction`](Self::transaction) for all-or-nothing
    /// execution.
    ///
    /// # Errors
    ///
    /// The task's own error; [`Error::Connection`] if the open or close
    /// fails (a close failure after a failed task is logged and the task's
    /// error wins); [`Error::InvalidState`] if a previous task panicked and
    /// poisoned the queue.
    pub fn execute<T>(&self, task: impl FnOnce(&mut Connection) -> Result<T>) -> Result<T> {
        let mut conn = self
            .conn
            .lock()
            .map_err(|_| Error::InvalidState("queue poisoned by a panicked task"))?;
        conn.open()?;
        let result = task(&mut *conn);
        let closed = conn.close();
        match (result, closed) {
            (Ok(value), Ok(())) => Ok(value),
            (Ok(_), Err(close_err)) => Err(close_err),
            (Err(err), Ok(())) => Err(err),
            (Err(err), Err(close_err)) => {
                log::warn!("failed to close connection after task error: {close_err}");
                Err(err)
            }
        }
    }

    /// Runs `task` inside a deferred transaction: BEGIN before, COMMIT
    /// after. On any failure from the task the transaction is rolled back
    /// and the original error re-raised; if the rollback itself also fails,
    /// both failures are surfaced as [`Error::RollbackFailed`].
    ///
    /// # Errors
    ///
    /// As for [`execute`](Self::execute), plus [`Error::Transaction`] for
    /// BEGIN/COMMIT failures and [`Error::RollbackFailed`] for a failed
    /// rollback after a failed task.
    pub fn transaction<T>(&self, task: impl FnOnce(&mut Connection) -> Result<T>) -> Result<T> {
        self.transaction_with(TransactionBehavior::Deferred, task)
    }

    /// Like [`transaction`](Self::transaction) but opens with
    /// BEGIN IMMEDIATE, acquiring the write lock up front.
    ///
    /// # Errors
    ///
    /// As for [`transaction`](Self::transaction).
    pub fn transaction_immediate<T>(
        &self,
        task: impl FnOnce(&mut Connection) -> Result<T>,
    ) -> Result<T> {
        self.transaction_with(TransactionBehavior::Immediate, task)
    }

    fn transaction_with<T>(
        &self,
        behavior: TransactionBehavior,
        task: impl FnOnce(&mut Connection) -> Result<T>,
    ) -> Result<T> {
        self.execute(|conn| {
            conn.begin_transaction(behavior)?;
            match task(&mut *conn) {
                Ok(value) => {
                    conn.commit()?;
                    Ok(value)
                }
                Err(err) => match conn.rollback() {
                    Ok(()) => Err(err),
                    Err(rollback_err) => {
                        log::warn!("rollback failed after task error: {rollback_err}");
                        Err(Error::RollbackFailed {
                            original: Box::new(err),
                            rollback: Box::new(rollback_err),
                        })
                    }
                },
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params;

    fn temp_queue() -> (tempfile::TempDir, Queue) {
        let dir = tempfile::tempdir().expect("create temp dir");
        let queue = Queue::new(dir.path().join("queue.sqlite"));
        (dir, queue)
    }

    #[test]
    fn test_execute_round_trip() {
        let (_dir, queue) = temp_queue();
        queue
            .execute(|conn| {
                conn.execute_batch("CREATE TABLE t (id INTEGER PRIMARY KEY, val TEXT);")?;
                conn.execute("INSERT INTO t (id, val) VALUES (?, ?)", params![1_i64, "hello"])?;
                Ok(())
            })
            .expect("first task");

        let val: String = queue
            .execute(|conn| {
                conn.query_row("SELECT val FROM t WHERE id = ?", params![1_i64], |stmt| {
                    Ok(stmt.get(0)?.unwrap_or_default())
                })
            })
            .expect("second task");
        assert_eq!(val, "hello");
    }

    #[test]
    fn test_transaction_commits_on_success() {
        let (_dir, queue) = temp_queue();
        queue
            .execute(|conn| conn.execute_batch("CREATE TABLE t (id INTEGER PRIMARY KEY);"))
            .expect("create table");

        queue
            .transaction(|conn| {
                conn.execute("INSERT INTO t (id) VALUES (?)", params![42_i64])?;
                Ok(())
            })
            .expect("transaction");

        let count: i64 = queue
            .execute(|conn| {
                conn.query_row("SELECT COUNT(*) FROM t", &[], |stmt| {
                    Ok(stmt.get(0)?.unwrap_or(0))
                })
            })
            .expect("count");
        assert_eq!(count, 1);
    }

    #[test]
    fn test_transaction_rolls_back_on_failure() {
        let (_dir, queue) = temp_queue();
        queue
            .execute(|conn| conn.execute_batch("CREATE TABLE t (id INTEGER PRIMARY KEY);"))
            .expect("create table");

        let result: Result<()> = queue.transaction(|conn| {
            conn.execute("INSERT INTO t (id) VALUES (?)", params![1_i64])?;
            // Duplicate primary key fails the task midway.
            conn.execute("INSERT INTO t (id) VALUES (?)", params![1_i64])?;
            Ok(())
        });
        assert!(matches!(result, Err(Error::Step(_))));

        // The first insert must be gone too.
        let count: i64 = queue
            .transaction(|conn| {
                conn.query_row("SELECT COUNT(*) FROM t", &[], |stmt| {
                    Ok(stmt.get(0)?.unwrap_or(0))
                })
            })
            .expect("count");
        assert_eq!(count, 0);
    }

    #[test]
    fn test_bare_execute_does_not_roll_back() {
        let (_dir, queue) = temp_queue();
        queue
            .execute(|conn| conn.execute_batch("CREATE TABLE t (id INTEGER PRIMARY KEY);"))
            .expect("create table");

        let result: Result<()> = queue.execute(|conn| {
            conn.execute("INSERT INTO t (id) VALUES (?)", params![1_i64])?;
            conn.execute("INSERT INTO t (id) VALUES (?)", params![1_i64])?;
            Ok(())
        });
        assert!(result.is_err());

        // Without a transaction the first insert survives.
        let count: i64 = queue
            .execute(|conn| {
                conn.query_row("SELECT COUNT(*) FROM t", &[], |stmt| {
                    Ok(stmt.get(0)?.unwrap_or(0))
                })
            })
            .expect("count");
        assert_eq!(count, 1);
    }

    #[test]
    fn test_last_insert_rowid_within_task() {
        let (_dir, queue) = temp_queue();
        let rowid = queue
            .execute(|conn| {
                conn.execute_batch("CREATE TABLE t (id INTEGER PRIMARY KEY, val TEXT);")?;
                conn.execute("INSERT INTO t (val) VALUES (?)", params!["a"])?;
                conn.last_insert_rowid()
            })
            .expect("task");
        assert_eq!(rowid, 1);
    }

    #[test]
    fn test_tasks_are_serialized_across_threads() {
        use std::sync::mpsc;
        use std::sync::Arc;

        let dir = tempfile::tempdir().expect("create temp dir");
        let queue = Arc::new(Queue::new(dir.path().join("queue.sqlite")));
        queue
            .execute(|conn| conn.execute_batch("CREATE TABLE t (id INTEGER PRIMARY KEY);"))
            .expect("create table");

        let (entered_tx, entered_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel();

        let queue_a = Arc::clone(&queue);
        let writer = std::thread::spawn(move || {
            queue_a
                .execute(|conn| {
                    entered_tx.send(()).expect("signal entered");
                    // Write half the rows, wait, then write the rest. A
                    // concurrent reader must never observe the halfway state.
                    for id in 0..50_i64 {
                        conn.execute("INSERT INTO t (id) VALUES (?)", params![id])?;
                    }
                    release_rx.recv().expect("wait release");
                    for id in 50..100_i64 {
                        conn.execute("INSERT INTO t (id) VALUES (?)", params![id])?;
                    }
                    Ok(())
                })
                .expect("writer task");
        });

        entered_rx.recv().expect("wait entered");
        release_tx.send(()).expect("release writer");

        // Submitted while the writer holds the queue: must observe all 100
        // rows or none, never a partial write.
        let count: i64 = queue
            .execute(|conn| {
                conn.query_row("SELECT COUNT(*) FROM t", &[], |stmt| {
                    Ok(stmt.get(0)?.unwrap_or(0))
                })
            })
            .expect("reader task");
        assert!(count == 0 || count == 100, "observed partial write: {count}");

        writer.join().expect("join writer");

        let count: i64 = queue
            .execute(|conn| {
                conn.query_row("SELECT COUNT(*) FROM t", &[], |stmt| {
                    Ok(stmt.get(0)?.unwrap_or(0))
                })
            })
            .expect("final count");
        assert_eq!(count, 100);
    }

    #[test]
    fn test_transaction_rollback_error_reports_both_failures() {
        let (_dir, queue) = temp_queue();
        let result: Result<()> = queue.transaction(|conn| {
            // Committing the queue's own transaction from inside the task
            // leaves nothing for the wrapper to roll back.
            conn.commit()?;
            Err(Error::Transaction("task failed on purpose".to_owned()))
        });
        match result {
            Err(Error::RollbackFailed { original, rollback }) => {
                assert!(matches!(*original, Error::Transaction(_)));
                assert!(matches!(*rollback, Error::Transaction(_)));
            }
            other => panic!("expected RollbackFailed, got {other:?}"),
        }
    }

    #[test]
    fn test_read_only_queue_rejects_writes() {
        let dir = tempfile::tempdir().expect("create temp dir");
        let path = dir.path().join("queue.sqlite");

        let writer = Queue::new(&path);
        writer
            .execute(|conn| conn.execute_batch("CREATE TABLE t (id INTEGER PRIMARY KEY);"))
            .expect("create table");

        let reader = Queue::new_read_only(&path);
        let result = reader.execute(|conn| conn.execute("INSERT INTO t (id) VALUES (1)", &[]));
        assert!(result.is_err());
    }
}
