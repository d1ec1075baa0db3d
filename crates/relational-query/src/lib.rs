//! Query construction for Relational.
//!
//! `relational-query` turns descriptions of related tables into SQL:
//!
//! - [`Sql`] is a small builder that accumulates keywords, fragments and
//!   positional parameters, with grouping and sub-selects.
//! - [`Collection`] describes which tables a fetch joins and how they are
//!   filtered.
//! - [`AliasTable`] flattens a collection into join order with unique
//!   aliases.
//! - [`QueryCompiler`] combines both with a naming
//!   [`Style`](relational_core::Style) into one SELECT.

pub mod collection;
pub mod compiler;
pub mod flatten;
pub mod sql;

pub use collection::{Collection, Condition, ConditionEntry};
pub use compiler::{CompiledQuery, QueryCompiler};
pub use flatten::{AliasEntry, AliasTable};
pub use sql::{IntoParts, Operand, Part, Sql};
