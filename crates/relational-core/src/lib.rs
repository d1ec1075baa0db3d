//! Core types and traits for Relational.
//!
//! This crate provides the foundations shared by the query, session and
//! driver crates:
//!
//! - `Value` and `Row` for parameters and fetched data
//! - `Connection`/`Statement`, the synchronous driver contract
//! - `Style`, the pluggable naming conventions
//! - `Entity`, `EntityRef` and `EntityRegistry`, the entity model

pub mod connection;
pub mod entity;
pub mod error;
pub mod row;
pub mod style;
pub mod value;

pub use connection::{Connection, Statement};
pub use entity::{Entity, EntityHandle, EntityRef, EntityRegistry, FieldValue, Record};
pub use error::{
    CollectionError, CollectionErrorKind, CompileError, ConfigError, ConnectionError,
    ConnectionErrorKind, Error, HydrationError, HydrationErrorKind, QueryError, QueryErrorKind,
    Result, TrackingError, TrackingErrorKind, TransactionError, TransactionErrorKind, TypeError,
};
pub use row::{ColumnInfo, ColumnMeta, Row};
pub use style::{CakePhp, NorthWind, Sakila, Standard, Style, StyleKind};
pub use value::Value;
