//! SQLite driver for Relational.
//!
// FFI bindings require unsafe code - this is expected for database drivers
#![allow(unsafe_code)]
//!
//! Implements the synchronous `Connection` and `Statement` traits from
//! relational-core over libsqlite3. Result columns report the table they
//! were read from, which lets the hydrator check joined rows.
//!
//! # Example
//!
//! ```rust,ignore
//! use relational_sqlite::SqliteConnection;
//! use relational_core::{Connection, Value};
//!
//! let conn = SqliteConnection::open_memory()?;
//! conn.execute_raw("CREATE TABLE post (id INTEGER PRIMARY KEY, title TEXT)")?;
//! conn.execute("INSERT INTO post (title) VALUES (?)", &[Value::from("hello")])?;
//! let rows = conn.query("SELECT * FROM post", &[])?;
//! ```
//!
//! # Type Mapping
//!
//! | Value | SQLite |
//! |-------|--------|
//! | `Bool`, `TinyInt`, `SmallInt`, `Int`, `BigInt` | INTEGER |
//! | `Float`, `Double` | REAL |
//! | `Text`, `Decimal`, `Json`, `Array` | TEXT |
//! | `Bytes` | BLOB |
//! | `Null` | NULL |
//!
//! Integers read back as `Int` when they fit in 32 bits, `BigInt` otherwise.

pub mod config;
pub mod connection;
pub mod ffi;
pub mod types;

pub use config::{OpenFlags, SqliteConfig};
pub use connection::{SqliteConnection, SqliteStatement};

pub fn sqlite_version() -> &'static str {
    ffi::version()
}

pub fn sqlite_version_number() -> i32 {
    ffi::version_number()
}
