//! Thin, safe layer over the SQLite C API.
//!
//! Three concerns, and nothing else:
//!
//! * **Typed binding and extraction** – every bindable or extractable value
//!   is one of five canonical [`Value`] variants; native primitives convert
//!   at the API edge ([`From`] in, [`FromValue`] out).
//! * **Prepared statements as a state machine** – [`Statement`] rejects
//!   operations that are invalid in its current state instead of forwarding
//!   them to the engine.
//! * **Serialized access** – a [`Queue`] owns one [`Connection`] and runs
//!   submitted tasks strictly one at a time, with rollback-and-rethrow
//!   around [`Queue::transaction`].
//!
//! The raw symbols come from `libsqlite3-sys` (bundled amalgamation). The
//! `ffi` module is the **only** file that contains `unsafe` code or C
//! types; everything else goes through the safe types defined here.
//!
//! ```no_run
//! use litequeue::{params, Queue};
//!
//! # fn main() -> litequeue::Result<()> {
//! let queue = Queue::new("app.sqlite");
//! queue.transaction(|conn| {
//!     conn.execute_batch("CREATE TABLE IF NOT EXISTS t (a INTEGER, b TEXT)")?;
//!     conn.execute("INSERT INTO t VALUES (?, ?)", params![1_i64, "x"])?;
//!     Ok(())
//! })?;
//! # Ok(())
//! # }
//! ```

mod ffi;

mod connection;
pub mod error;
mod queue;
mod statement;
pub mod value;

pub use connection::{Connection, TransactionBehavior};
pub use error::{EngineError, Error, ErrorCode, Result};
pub use queue::Queue;
pub use statement::{Rows, Statement};
pub use value::{FromValue, Value};
