//! Hand-built statements run straight against a connection.
//!
//! [`Db`] skips collections, hydration and tracking: it runs an [`Sql`]
//! statement and hands back rows, rows shaped by a closure, or rows copied
//! into entities built by an [`EntityRegistry`].

use relational_core::{Connection, EntityRef, EntityRegistry, FieldValue, Result, Row, Value};
use relational_query::Sql;

/// A connection wrapper for statements that need no mapping.
///
/// ```ignore
/// let db = Db::new(conn);
/// let rows = db
///     .sql(Sql::new().select("*").from("post").r#where([("author_id", 1)]))
///     .fetch_all()?;
/// db.raw("DELETE FROM post WHERE id = ?", [Value::from(3)]).exec()?;
/// ```
pub struct Db<C: Connection> {
    conn: C,
}

impl<C: Connection> Db<C> {
    pub fn new(conn: C) -> Self {
        Self { conn }
    }

    pub fn connection(&self) -> &C {
        &self.conn
    }

    pub fn into_connection(self) -> C {
        self.conn
    }

    /// Prepare a built statement.
    pub fn sql(&self, sql: Sql) -> Query<'_, C> {
        Query::new(&self.conn, sql)
    }

    /// Prepare literal SQL with positional parameters.
    pub fn raw(&self, text: &str, params: impl IntoIterator<Item = Value>) -> Query<'_, C> {
        Query::new(&self.conn, Sql::new().append_raw(text, params))
    }
}

/// A statement waiting to be run; every terminal method consumes it.
#[must_use = "a query does nothing until fetched or executed"]
pub struct Query<'c, C: Connection + ?Sized> {
    conn: &'c C,
    sql: Sql,
}

impl<'c, C: Connection + ?Sized> Query<'c, C> {
    pub(crate) fn new(conn: &'c C, sql: Sql) -> Self {
        Self { conn, sql }
    }

    /// Keep building the statement.
    ///
    /// ```ignore
    /// let query = db.sql(Sql::new().select("*").from("post"));
    /// let query = if newest_first { query.then(|sql| sql.order_by("id").desc()) } else { query };
    /// ```
    pub fn then(mut self, build: impl FnOnce(Sql) -> Sql) -> Self {
        self.sql = build(self.sql);
        self
    }

    pub fn sql(&self) -> &Sql {
        &self.sql
    }

    /// First row, if any.
    pub fn fetch(self) -> Result<Option<Row>> {
        let (sql, params) = self.sql.build();
        tracing::trace!(sql = %sql, params = params.len(), "Executing statement");
        let mut stmt = self.conn.prepare(&sql)?;
        stmt.execute(&params)?;
        stmt.fetch_row()
    }

    pub fn fetch_all(self) -> Result<Vec<Row>> {
        let (sql, params) = self.sql.build();
        tracing::trace!(sql = %sql, params = params.len(), "Executing statement");
        self.conn.query(&sql, &params)
    }

    /// Every row passed through `shape`.
    pub fn fetch_with<T>(self, shape: impl FnMut(Row) -> T) -> Result<Vec<T>> {
        Ok(self.fetch_all()?.into_iter().map(shape).collect())
    }

    /// First row copied into an entity named `name`.
    pub fn fetch_as(self, registry: &EntityRegistry, name: &str) -> Result<Option<EntityRef>> {
        Ok(self.fetch()?.map(|row| shape_entity(registry, name, &row)))
    }

    /// Every row copied into an entity named `name`.
    ///
    /// Names without a registered factory produce [`Record`](relational_core::Record)s.
    pub fn fetch_all_as(self, registry: &EntityRegistry, name: &str) -> Result<Vec<EntityRef>> {
        self.fetch_with(|row| shape_entity(registry, name, &row))
    }

    /// Run a statement that returns no rows.
    pub fn exec(self) -> Result<bool> {
        let (sql, params) = self.sql.build();
        tracing::trace!(sql = %sql, params = params.len(), "Executing statement");
        self.conn.execute(&sql, &params)
    }
}

/// Columns become properties under their result names.
fn shape_entity(registry: &EntityRegistry, name: &str, row: &Row) -> EntityRef {
    let mut entity = registry.create(name);
    for (column, value) in row.iter() {
        entity.set(column, FieldValue::Scalar(value.clone()));
    }
    EntityRef::from_boxed(entity)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockConnection, row};
    use relational_core::Record;

    fn post_rows() -> Vec<Row> {
        vec![
            row(&[("post", "id"), ("post", "title")], vec![Value::BigInt(1), Value::from("a")]),
            row(&[("post", "id"), ("post", "title")], vec![Value::BigInt(2), Value::from("b")]),
        ]
    }

    #[test]
    fn built_statement_runs_with_params() {
        let conn = MockConnection::new();
        conn.push_result(post_rows());
        let db = Db::new(conn.clone());

        let rows = db
            .sql(Sql::new().select("*").from("post"))
            .then(|sql| sql.r#where([("author_id", 4)]))
            .fetch_all()
            .unwrap();
        assert_eq!(rows.len(), 2);

        let state = conn.state.borrow();
        assert_eq!(state.executed[0].0, "SELECT * FROM post WHERE author_id = ?");
        assert_eq!(state.executed[0].1, vec![Value::Int(4)]);
    }

    #[test]
    fn fetch_returns_first_row_only() {
        let conn = MockConnection::new();
        conn.push_result(post_rows());
        let db = Db::new(conn);
        let first = db.raw("SELECT id, title FROM post", []).fetch().unwrap().unwrap();
        assert_eq!(first.get_by_name("title"), Some(&Value::from("a")));

        assert!(db.raw("SELECT id FROM post", []).fetch().unwrap().is_none());
    }

    #[test]
    fn rows_are_shaped_by_closure() {
        let conn = MockConnection::new();
        conn.push_result(post_rows());
        let titles = Db::new(conn)
            .raw("SELECT id, title FROM post", [])
            .fetch_with(|row| row.get_named::<String>("title").unwrap_or_default())
            .unwrap();
        assert_eq!(titles, vec!["a", "b"]);
    }

    #[test]
    fn rows_become_records() {
        let conn = MockConnection::new();
        conn.push_result(post_rows());
        let posts = Db::new(conn)
            .raw("SELECT id, title FROM post", [])
            .fetch_all_as(&EntityRegistry::new(), "Post")
            .unwrap();
        assert_eq!(posts.len(), 2);
        assert_eq!(posts[1].value("title"), Some(Value::from("b")));
        assert_eq!(posts[0].downcast::<Record>().unwrap().type_name(), "Post");
    }

    #[test]
    fn exec_sends_params_in_order() {
        let conn = MockConnection::new();
        let db = Db::new(conn.clone());
        db.raw("UPDATE post SET title = ? WHERE id = ?", [Value::from("x"), Value::BigInt(9)])
            .exec()
            .unwrap();
        let state = conn.state.borrow();
        assert_eq!(state.executed[0].0, "UPDATE post SET title = ? WHERE id = ?");
        assert_eq!(state.executed[0].1, vec![Value::from("x"), Value::BigInt(9)]);
    }
}
