//! Database connection traits.
//!
//! The mapper consumes a driver through two small synchronous traits:
//!
//! - [`Connection`] prepares statements and drives transactions
//! - [`Statement`] executes with positional parameters and yields rows
//!
//! Every call blocks the calling thread until the driver returns. A statement
//! owns its cursor and releases it when dropped, so early returns and `?`
//! never leak an open cursor.

use crate::error::Result;
use crate::row::{ColumnMeta, Row};
use crate::value::Value;

/// A prepared statement bound to the connection that created it.
pub trait Statement {
    /// SQL text this statement was prepared from.
    fn sql(&self) -> &str;

    /// Bind `params` positionally and run the statement.
    ///
    /// Re-executing resets the cursor first.
    fn execute(&mut self, params: &[Value]) -> Result<bool>;

    /// Fetch the next row, or `None` once the cursor is exhausted.
    fn fetch_row(&mut self) -> Result<Option<Row>>;

    /// Drain the cursor into a vector.
    fn fetch_all(&mut self) -> Result<Vec<Row>> {
        let mut rows = Vec::new();
        while let Some(row) = self.fetch_row()? {
            rows.push(row);
        }
        Ok(rows)
    }

    /// Number of result columns.
    fn column_count(&self) -> usize;

    /// Name and source table of the result column at `index`.
    fn column_meta(&self, index: usize) -> Option<ColumnMeta>;
}

/// A synchronous database connection.
pub trait Connection {
    /// Prepare a statement for execution.
    fn prepare(&self, sql: &str) -> Result<Box<dyn Statement + '_>>;

    /// Begin a transaction.
    fn begin(&self) -> Result<()>;

    /// Commit the open transaction.
    fn commit(&self) -> Result<()>;

    /// Roll back the open transaction.
    fn rollback(&self) -> Result<()>;

    /// Identifier generated by the most recent INSERT.
    ///
    /// Drivers without this capability return [`crate::Error::Unsupported`].
    fn last_insert_id(&self) -> Result<Value>;

    /// Prepare, execute and drain a query in one call.
    fn query(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
        let mut stmt = self.prepare(sql)?;
        stmt.execute(params)?;
        stmt.fetch_all()
    }

    /// Prepare and execute a statement that returns no rows.
    fn execute(&self, sql: &str, params: &[Value]) -> Result<bool> {
        let mut stmt = self.prepare(sql)?;
        stmt.execute(params)
    }
}

impl<C: Connection + ?Sized> Connection for &C {
    fn prepare(&self, sql: &str) -> Result<Box<dyn Statement + '_>> {
        (**self).prepare(sql)
    }

    fn begin(&self) -> Result<()> {
        (**self).begin()
    }

    fn commit(&self) -> Result<()> {
        (**self).commit()
    }

    fn rollback(&self) -> Result<()> {
        (**self).rollback()
    }

    fn last_insert_id(&self) -> Result<Value> {
        (**self).last_insert_id()
    }
}
