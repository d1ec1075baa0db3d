//! Relational - fetch, link and persist entities across joined tables.
//!
//! A [`Mapper`] turns a chain of table names into one SELECT with joins
//! inferred from naming conventions, splits every result row into one
//! entity per table, links foreign keys to the entities they point at, and
//! tracks the results so changes can be written back in one transaction.
//!
//! # Quick Start
//!
//! ```ignore
//! use relational::prelude::*;
//!
//! let conn = SqliteConnection::open_memory()?;
//! conn.execute_raw(
//!     "CREATE TABLE post (id INTEGER PRIMARY KEY, title TEXT);
//!      CREATE TABLE comment (id INTEGER PRIMARY KEY, post_id INTEGER, text TEXT);",
//! )?;
//!
//! let mut mapper = Mapper::new(conn);
//!
//! // Persist a post and a comment pointing at it
//! let post = EntityRef::new(Record::new("Post").with("id", Value::Null).with("title", "Hello"));
//! let comment = EntityRef::new(Record::new("Comment").with("id", Value::Null).with("post_id", &post));
//! mapper.persist(&comment, Some("comment"))?;
//! mapper.flush()?;
//!
//! // SELECT comment.*, post.* FROM comment INNER JOIN post ON comment.post_id = post.id
//! let fetched = mapper.collection("comment")?.then("post")?.fetch(None)?;
//! let post = fetched.and_then(|c| c.related("post_id"));
//!
//! // Plain rows, no mapping
//! let titles = mapper
//!     .sql(Sql::new().select("title").from("post"))
//!     .fetch_with(|row| row.get_named::<String>("title"))?;
//! ```
//!
//! # Naming conventions
//!
//! | Style | table | entity | key | foreign key |
//! |-------|-------|--------|-----|-------------|
//! | [`Standard`] | `post_category` | `PostCategory` | `id` | `post_id` |
//! | [`CakePhp`] | `posts` | `Post` | `id` | `post_id` |
//! | [`NorthWind`] | `Posts` | `Posts` | `PostID` | `PostID` |
//! | [`Sakila`] | `film` | `Film` | `film_id` | `film_id` |

pub use relational_core::{
    CakePhp, ColumnInfo, ColumnMeta, Connection, Entity, EntityHandle, EntityRef, EntityRegistry,
    Error, FieldValue, NorthWind, Record, Result, Row, Sakila, Standard, Statement, Style,
    StyleKind, Value,
};

pub use relational_query::{
    AliasEntry, AliasTable, Collection, CompiledQuery, Condition, ConditionEntry, IntoParts,
    Operand, Part, QueryCompiler, Sql,
};

pub use relational_session::{
    Db, Finder, FlushPlan, FlushResult, Hydrated, HydratedEntry, Hydrator, IdentityLookup, Mapper,
    MapperConfig, PendingOp, Query, Tracker,
};

/// Error payloads, for matching on specific failures.
pub mod error {
    pub use relational_core::error::*;
}

#[cfg(feature = "sqlite")]
pub use relational_sqlite::{OpenFlags, SqliteConfig, SqliteConnection};

/// The commonly used types.
///
/// ```ignore
/// use relational::prelude::*;
/// ```
pub mod prelude {
    pub use crate::{
        Collection, Condition, Connection, Db, Entity, EntityRef, Error, FieldValue, Finder,
        Mapper, MapperConfig, Record, Result, Sql, Style, StyleKind, Value,
    };

    #[cfg(feature = "sqlite")]
    pub use crate::{SqliteConfig, SqliteConnection};
}
