//! The mapper: compile, fetch, hydrate and track through one connection.

use crate::config::MapperConfig;
use crate::db::Query;
use crate::flush::FlushResult;
use crate::hydrator::{Hydrated, Hydrator};
use crate::tracker::Tracker;
use relational_core::{Connection, EntityRef, EntityRegistry, Result, Style, Value};
use relational_query::{Collection, CompiledQuery, Condition, QueryCompiler, Sql};

/// Entry point for fetching and persisting entities.
///
/// ```ignore
/// let mut mapper = Mapper::new(conn);
/// let comment = mapper
///     .collection("comment")?
///     .then("post")?
///     .filter(5)
///     .fetch(None)?;
/// ```
pub struct Mapper<C: Connection> {
    conn: C,
    style: Box<dyn Style>,
    registry: EntityRegistry,
    tracker: Tracker,
    config: MapperConfig,
}

impl<C: Connection> Mapper<C> {
    pub fn new(conn: C) -> Self {
        Self::with_config(conn, MapperConfig::default())
    }

    pub fn with_config(conn: C, config: MapperConfig) -> Self {
        Self {
            conn,
            style: config.style.build(),
            registry: EntityRegistry::new(),
            tracker: Tracker::new(),
            config,
        }
    }

    /// Replace the naming convention with a custom one.
    pub fn with_style(mut self, style: impl Style + 'static) -> Self {
        self.style = Box::new(style);
        self
    }

    pub fn config(&self) -> &MapperConfig {
        &self.config
    }

    pub fn style(&self) -> &dyn Style {
        self.style.as_ref()
    }

    pub fn registry(&self) -> &EntityRegistry {
        &self.registry
    }

    /// Register typed entities here before fetching.
    pub fn registry_mut(&mut self) -> &mut EntityRegistry {
        &mut self.registry
    }

    pub fn tracker(&self) -> &Tracker {
        &self.tracker
    }

    pub fn connection(&self) -> &C {
        &self.conn
    }

    pub fn into_connection(self) -> C {
        self.conn
    }

    /// Start a chain at table `name`.
    pub fn collection(&mut self, name: &str) -> Result<Finder<'_, C>> {
        Ok(Finder {
            collection: Collection::new(name)?,
            mapper: self,
        })
    }

    /// Run a hand-built statement on the mapper's connection.
    ///
    /// Results are neither hydrated nor tracked.
    pub fn sql(&self, sql: Sql) -> Query<'_, C> {
        Query::new(&self.conn, sql)
    }

    pub fn compile(&self, collection: &Collection) -> Result<CompiledQuery> {
        QueryCompiler::new(self.style.as_ref()).compile(collection)
    }

    /// First root entity matching `collection`.
    pub fn fetch(&mut self, collection: &Collection, extra: Option<&Sql>) -> Result<Option<EntityRef>> {
        let mut rows = self.run(collection, extra, Some(1))?;
        Ok(rows.pop().and_then(Hydrated::into_root))
    }

    /// Root entity of every row.
    pub fn fetch_all(&mut self, collection: &Collection, extra: Option<&Sql>) -> Result<Vec<EntityRef>> {
        let rows = self.run(collection, extra, None)?;
        Ok(rows.into_iter().filter_map(Hydrated::into_root).collect())
    }

    /// Every entity of every row, by alias.
    pub fn fetch_hydrated(&mut self, collection: &Collection, extra: Option<&Sql>) -> Result<Vec<Hydrated>> {
        self.run(collection, extra, None)
    }

    #[tracing::instrument(level = "debug", skip_all, fields(root = collection.name()))]
    fn run(
        &mut self,
        collection: &Collection,
        extra: Option<&Sql>,
        limit: Option<usize>,
    ) -> Result<Vec<Hydrated>> {
        let compiled = QueryCompiler::new(self.style.as_ref()).compile_with(collection, extra)?;
        let (sql, params) = compiled.sql.build();
        tracing::trace!(sql = %sql, params = params.len(), "Executing fetch");

        let mut results = Vec::new();
        {
            let mut stmt = self.conn.prepare(&sql)?;
            stmt.execute(&params)?;
            while limit.is_none_or(|n| results.len() < n) {
                let Some(row) = stmt.fetch_row()? else { break };
                let mut hydrator = Hydrator::new(self.style.as_ref(), &self.registry)
                    .verify_source_tables(self.config.verify_source_tables);
                if self.config.identity_map {
                    hydrator = hydrator.with_identity_map(&self.tracker);
                }
                let hydrated = hydrator.hydrate(&compiled.aliases, &row)?;

                // Later rows of the same result reuse what earlier rows produced
                if self.config.track_fetched {
                    for (table, entity) in hydrated.entities() {
                        self.tracker.mark_tracked(entity, table, self.style.as_ref());
                    }
                }
                results.push(hydrated);
            }
        }
        tracing::debug!(rows = results.len(), aliases = compiled.aliases.len(), "Fetch complete");

        Ok(results)
    }

    /// Schedule an insert or update; see [`Tracker::persist`].
    pub fn persist(&mut self, entity: &EntityRef, table: Option<&str>) -> Result<()> {
        self.tracker.persist(entity, table, self.style.as_ref())
    }

    /// Schedule a delete; see [`Tracker::remove`].
    pub fn remove(&mut self, entity: &EntityRef, table: Option<&str>) -> Result<()> {
        self.tracker.remove(entity, table, self.style.as_ref())
    }

    pub fn flush(&mut self) -> Result<FlushResult> {
        self.tracker.flush(&self.conn, self.style.as_ref())
    }

    pub fn is_tracked(&self, entity: &EntityRef) -> bool {
        self.tracker.is_tracked(entity)
    }

    pub fn get_tracked(&self, table: &str, id: impl Into<Value>) -> Option<EntityRef> {
        self.tracker.get_tracked(table, &id.into())
    }
}

/// A collection chain bound to its mapper.
pub struct Finder<'m, C: Connection> {
    mapper: &'m mut Mapper<C>,
    collection: Collection,
}

impl<C: Connection> Finder<'_, C> {
    /// Join `name` after the last node.
    pub fn then(mut self, name: &str) -> Result<Self> {
        self.collection = self.collection.then(name)?;
        Ok(self)
    }

    /// Attach an optional branch to the last node.
    pub fn child(mut self, child: &Collection) -> Self {
        self.collection = self.collection.child(child);
        self
    }

    /// Condition of the last node.
    pub fn filter(mut self, condition: impl Into<Condition>) -> Self {
        self.collection = self.collection.filter(condition);
        self
    }

    pub fn required(mut self, required: bool) -> Self {
        self.collection = self.collection.required(required);
        self
    }

    pub fn collection(&self) -> &Collection {
        &self.collection
    }

    pub fn into_collection(self) -> Collection {
        self.collection
    }

    pub fn fetch(&mut self, extra: Option<&Sql>) -> Result<Option<EntityRef>> {
        self.mapper.fetch(&self.collection, extra)
    }

    pub fn fetch_all(&mut self, extra: Option<&Sql>) -> Result<Vec<EntityRef>> {
        self.mapper.fetch_all(&self.collection, extra)
    }

    pub fn fetch_hydrated(&mut self, extra: Option<&Sql>) -> Result<Vec<Hydrated>> {
        self.mapper.fetch_hydrated(&self.collection, extra)
    }

    /// Persist into the table of the last node.
    pub fn persist(&mut self, entity: &EntityRef) -> Result<()> {
        let table = self.collection.last().name().to_string();
        self.mapper.persist(entity, Some(&table))
    }

    /// Remove from the table of the last node.
    pub fn remove(&mut self, entity: &EntityRef) -> Result<()> {
        let table = self.collection.last().name().to_string();
        self.mapper.remove(entity, Some(&table))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockConnection, row};
    use relational_core::{Error, Record, StyleKind};

    fn int(v: i64) -> Value {
        Value::BigInt(v)
    }

    fn text(v: &str) -> Value {
        Value::Text(v.to_string())
    }

    fn comment_row(id: i64, post: i64) -> relational_core::Row {
        row(
            &[
                ("comment", "id"),
                ("comment", "post_id"),
                ("comment", "text"),
                ("post", "id"),
                ("post", "title"),
            ],
            vec![int(id), int(post), text("c"), int(post), text("p")],
        )
    }

    #[test]
    fn finder_compiles_and_hydrates() {
        let conn = MockConnection::new();
        conn.push_result(vec![comment_row(1, 5)]);
        let mut mapper = Mapper::new(conn.clone());

        let comment = mapper
            .collection("comment")
            .unwrap()
            .then("post")
            .unwrap()
            .filter(5)
            .fetch(None)
            .unwrap()
            .unwrap();

        let state = conn.state.borrow();
        assert_eq!(
            state.executed[0].0,
            "SELECT comment.*, post.* FROM comment INNER JOIN post ON comment.post_id = post.id WHERE post.id = ?"
        );
        assert_eq!(state.executed[0].1, vec![Value::Int(5)]);
        drop(state);

        let post = comment.related("post_id").unwrap();
        assert_eq!(post.value("title"), Some(text("p")));
        assert!(mapper.is_tracked(&comment));
        assert!(mapper.get_tracked("post", 5).unwrap().ptr_eq(&post));
    }

    #[test]
    fn identity_map_reuses_instances_across_fetches() {
        let conn = MockConnection::new();
        conn.push_result(vec![comment_row(1, 5), comment_row(2, 5)]);
        let mut mapper = Mapper::new(conn.clone());
        let tree = Collection::new("comment").unwrap().then("post").unwrap();

        let comments = mapper.fetch_all(&tree, None).unwrap();
        assert_eq!(comments.len(), 2);
        let first = comments[0].related("post_id").unwrap();
        let second = comments[1].related("post_id").unwrap();
        assert!(first.ptr_eq(&second));
    }

    #[test]
    fn identity_map_can_be_disabled() {
        let conn = MockConnection::new();
        conn.push_result(vec![comment_row(1, 5), comment_row(2, 5)]);
        let config = MapperConfig::new().identity_map(false).track_fetched(false);
        let mut mapper = Mapper::with_config(conn, config);
        let tree = Collection::new("comment").unwrap().then("post").unwrap();

        let comments = mapper.fetch_all(&tree, None).unwrap();
        let first = comments[0].related("post_id").unwrap();
        let second = comments[1].related("post_id").unwrap();
        assert!(!first.ptr_eq(&second));
        assert!(mapper.tracker().is_empty());
    }

    #[test]
    fn fetch_stops_after_first_row() {
        let conn = MockConnection::new();
        conn.push_result(vec![
            row(&[("post", "id")], vec![int(1)]),
            row(&[("post", "id")], vec![int(2)]),
        ]);
        let mut mapper = Mapper::new(conn);
        let post = mapper
            .fetch(&Collection::new("post").unwrap(), None)
            .unwrap()
            .unwrap();
        assert_eq!(post.value("id"), Some(int(1)));
        assert!(mapper.get_tracked("post", 2).is_none());
    }

    #[test]
    fn empty_result_is_none() {
        let mut mapper = Mapper::new(MockConnection::new());
        let found = mapper.collection("post").unwrap().filter(9).fetch(None).unwrap();
        assert!(found.is_none());
    }

    #[test]
    fn extra_sql_is_appended() {
        let conn = MockConnection::new();
        let mut mapper = Mapper::new(conn.clone());
        let extra = Sql::new().order_by("post.id").limit(3);
        mapper
            .collection("post")
            .unwrap()
            .fetch_all(Some(&extra))
            .unwrap();
        assert_eq!(
            conn.state.borrow().executed[0].0,
            "SELECT post.* FROM post ORDER BY post.id LIMIT 3"
        );
    }

    #[test]
    fn finder_persists_into_last_node() {
        let conn = MockConnection::new();
        let mut mapper = Mapper::new(conn.clone());
        let post = EntityRef::new(Record::new("Post").with("id", Value::Null).with("title", "new"));
        mapper.collection("post").unwrap().persist(&post).unwrap();
        let result = mapper.flush().unwrap();
        assert_eq!(result.inserted, 1);
        assert_eq!(post.value("id"), Some(int(1)));
        assert!(mapper.get_tracked("post", 1).unwrap().ptr_eq(&post));

        mapper.collection("post").unwrap().remove(&post).unwrap();
        mapper.flush().unwrap();
        assert!(!mapper.is_tracked(&post));
        assert_eq!(
            conn.state.borrow().statements(),
            vec!["INSERT INTO post (title) VALUES (?)", "DELETE FROM post WHERE id = ?"]
        );
    }

    #[test]
    fn persist_without_table_requires_tracking() {
        let mut mapper = Mapper::new(MockConnection::new());
        let post = EntityRef::new(Record::new("Post").with("title", "x"));
        assert!(matches!(mapper.persist(&post, None), Err(Error::Tracking(_))));
    }

    #[test]
    fn hand_built_statements_bypass_tracking() {
        let conn = MockConnection::new();
        conn.push_result(vec![row(&[("post", "id")], vec![int(3)])]);
        let mapper = Mapper::new(conn.clone());
        let post = mapper
            .sql(Sql::new().select("*").from("post"))
            .fetch_as(mapper.registry(), "Post")
            .unwrap()
            .unwrap();
        assert_eq!(post.value("id"), Some(int(3)));
        assert!(!mapper.is_tracked(&post));
        assert_eq!(conn.state.borrow().executed[0].0, "SELECT * FROM post");
    }

    #[test]
    fn configured_style_is_used() {
        let config = MapperConfig::new().style(StyleKind::NorthWind);
        let mapper = Mapper::with_config(MockConnection::new(), config);
        let tree = Collection::new("Products").unwrap().then("Suppliers").unwrap();
        let compiled = mapper.compile(&tree).unwrap();
        assert_eq!(
            compiled.sql.to_string(),
            "SELECT Products.*, Suppliers.* FROM Products INNER JOIN Suppliers ON Products.SupplierID = Suppliers.SupplierID"
        );
    }
}
