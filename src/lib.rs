//! Async HTTP client for rqlite-style distributed SQLite clusters.
//!
//! The cluster is a fixed list of node base URLs; only the current
//! leader accepts writes, and any node may answer a misdirected request
//! with a redirect, refuse the connection, hang, or serve stale data.
//! This crate turns each statement into a fault-tolerant round trip:
//!
//! - [`Connection::execute`] / [`Cursor::execute`] for single statements
//! - [`Cursor::execute_many`] for batches in one consensus entry
//! - [`Cursor::explain`] for query plans
//! - [`Connection::backup`] for streamed database snapshots
//!
//! Reads run at one of three consistency levels (`strong`, `weak`, or
//! `none` with a freshness bound); node rotation, redirect following,
//! per-host attempt budgets, and backoff are handled internally.
//!
//! # Quick Start
//!
//! ```no_run
//! use rqlite_http::{Connection, ExecuteOptions, Value};
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let db = Connection::new(["http://localhost:4001", "http://localhost:4003"])?;
//!
//! db.execute(
//!     "CREATE TABLE IF NOT EXISTS users (id INTEGER PRIMARY KEY, name TEXT NOT NULL)",
//!     (),
//!     ExecuteOptions::default(),
//! )
//! .await?;
//!
//! db.execute(
//!     "INSERT INTO users (name) VALUES (?)",
//!     [Value::text("Kit")],
//!     ExecuteOptions::default(),
//! )
//! .await?;
//!
//! let result = db
//!     .execute("SELECT id, name FROM users", (), ExecuteOptions::default())
//!     .await?;
//! println!("rows={}", result.results().map_or(0, <[_]>::len));
//! # Ok(())
//! # }
//! ```
//!
//! # Retries and idempotency
//!
//! Transport failures are retried across nodes until every host spends
//! its attempt budget, but a write that times out may still have been
//! applied server-side; the client performs no deduplication. Callers
//! that need idempotent writes should encode it in the statement itself,
//! for example with content-addressed unique ids.

mod backoff;
mod backup;
mod client;
mod driver;
mod error;
mod events;
mod explain;
mod options;
mod params;
mod random;
mod selector;
mod sql;
mod types;
mod value;
mod wire;

pub use backup::BackupFormat;
pub use client::{
    BackupOptions, Connection, Cursor, ExecuteManyOptions, ExecuteOptions, ExplainOptions,
};
pub use error::RqliteError;
pub use events::{Event, EventSettings, LogSettings};
pub use explain::{ExplainNode, ExplainPlan};
pub use options::{ConnectionOptions, Consistency};
pub use params::{Operation, Params};
pub use selector::{Failure, NodeSelector, QuerySpec, RedirectDecision, SelectorFactory};
pub use sql::{classify, SqlCommand};
pub use types::{BulkResult, ResultItem};
pub use value::Value;
pub use wire::RawResultItem;

/// Crate-wide result type.
pub type Result<T> = std::result::Result<T, RqliteError>;
