//! `SQLite` backend.
//!
//! # Concurrency Model
//!
//! Uses a `Mutex<Connection>` for thread-safe access. Each backend call moves
//! onto Tokio's blocking pool and holds the lock for the duration of one
//! query or one write transaction. WAL mode lets other processes read while
//! a write is in flight.

mod backend;
mod connection;
mod sql;

pub use backend::SqliteBackend;
