//! Row hydration: splitting one joined row into linked entities.
//!
//! A compiled query projects `alias.*` for every table in flattened order,
//! so a row is a sequence of column blocks, one per alias, each starting
//! with that table's identifier column. Walking the row from the last
//! column back to the first, every column belongs to the current block
//! until the current table's identifier is reached, which closes the block
//! and moves to the previous alias. Walking backwards keeps a block's own
//! identifier from being confused with a same-named column of an earlier
//! block.
//!
//! Once every entity is filled in, foreign-key columns are replaced with
//! references to the entity they point at.

use relational_core::{
    EntityRef, EntityRegistry, Error, FieldValue, HydrationError, HydrationErrorKind, Result, Row,
    Style, Value,
};
use relational_query::AliasTable;

/// Lookup of already materialized entities by table and identifier.
pub trait IdentityLookup {
    fn lookup(&self, table: &str, id: &Value) -> Option<EntityRef>;
}

/// One alias of a hydrated row.
#[derive(Debug, Clone)]
pub struct HydratedEntry {
    pub alias: String,
    pub table: String,
    /// `None` when an optional join matched nothing
    pub entity: Option<EntityRef>,
}

/// Entities materialized from one row, in flattened alias order.
#[derive(Debug, Clone, Default)]
pub struct Hydrated {
    entries: Vec<HydratedEntry>,
}

impl Hydrated {
    /// Entity of the root alias.
    pub fn root(&self) -> Option<&EntityRef> {
        self.entries.first().and_then(|e| e.entity.as_ref())
    }

    pub fn into_root(self) -> Option<EntityRef> {
        self.entries.into_iter().next().and_then(|e| e.entity)
    }

    pub fn get(&self, alias: &str) -> Option<&EntityRef> {
        self.entries
            .iter()
            .find(|e| e.alias == alias)
            .and_then(|e| e.entity.as_ref())
    }

    pub fn entries(&self) -> &[HydratedEntry] {
        &self.entries
    }

    /// Present entities with their tables.
    pub fn entities(&self) -> impl Iterator<Item = (&str, &EntityRef)> {
        self.entries
            .iter()
            .filter_map(|e| e.entity.as_ref().map(|entity| (e.table.as_str(), entity)))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Builds entity graphs from rows of a compiled query.
pub struct Hydrator<'a> {
    style: &'a dyn Style,
    registry: &'a EntityRegistry,
    identities: Option<&'a dyn IdentityLookup>,
    verify_source_tables: bool,
}

impl<'a> Hydrator<'a> {
    pub fn new(style: &'a dyn Style, registry: &'a EntityRegistry) -> Self {
        Self {
            style,
            registry,
            identities: None,
            verify_source_tables: true,
        }
    }

    /// Reuse known instances instead of creating duplicates.
    pub fn with_identity_map(mut self, identities: &'a dyn IdentityLookup) -> Self {
        self.identities = Some(identities);
        self
    }

    pub fn verify_source_tables(mut self, verify: bool) -> Self {
        self.verify_source_tables = verify;
        self
    }

    /// Hydrate every row of a result set.
    pub fn hydrate_all(&self, aliases: &AliasTable, rows: &[Row]) -> Result<Vec<Hydrated>> {
        rows.iter().map(|row| self.hydrate(aliases, row)).collect()
    }

    #[tracing::instrument(level = "trace", skip_all, fields(aliases = aliases.len(), columns = row.len()))]
    pub fn hydrate(&self, aliases: &AliasTable, row: &Row) -> Result<Hydrated> {
        match aliases.len() {
            0 => Err(mismatch("no aliases to hydrate into".to_string())),
            1 => self.hydrate_single(aliases, row),
            _ => self.hydrate_joined(aliases, row),
        }
    }

    fn hydrate_single(&self, aliases: &AliasTable, row: &Row) -> Result<Hydrated> {
        let Some(entry) = aliases.get(0) else {
            return Err(mismatch("no aliases to hydrate into".to_string()));
        };
        let identifier = self.style.identifier(&entry.table);
        let mut entity = self.registry.create(&self.style.styled_name(&entry.table));
        let mut id = Value::Null;

        for (index, (name, value)) in row.iter().enumerate() {
            self.check_source(row, index, &entry.table)?;
            if name == identifier {
                id = value.clone();
            }
            entity.set(&self.style.styled_property(name), FieldValue::Scalar(value.clone()));
        }

        let entity = self
            .known(&entry.table, &id)
            .unwrap_or_else(|| EntityRef::from_boxed(entity));
        Ok(Hydrated {
            entries: vec![HydratedEntry {
                alias: entry.alias.clone(),
                table: entry.table.clone(),
                entity: Some(entity),
            }],
        })
    }

    fn hydrate_joined(&self, aliases: &AliasTable, row: &Row) -> Result<Hydrated> {
        let count = aliases.len();
        let mut placeholders: Vec<_> = aliases
            .iter()
            .map(|e| self.registry.create(&self.style.styled_name(&e.table)))
            .collect();
        let identifiers: Vec<String> = aliases
            .iter()
            .map(|e| self.style.identifier(&e.table))
            .collect();
        let mut ids = vec![Value::Null; count];

        let mut current = Some(count - 1);
        for (index, (name, value)) in row.iter().enumerate().rev() {
            let Some(block) = current else {
                return Err(mismatch(format!(
                    "column {index} ({name}) precedes the first table block; \
                     expected {count} identifier boundaries"
                )));
            };
            let table = &aliases.entries()[block].table;
            self.check_source(row, index, table)?;
            placeholders[block].set(&self.style.styled_property(name), FieldValue::Scalar(value.clone()));
            if name == identifiers[block] {
                ids[block] = value.clone();
                current = block.checked_sub(1);
            }
        }
        if let Some(block) = current {
            return Err(mismatch(format!(
                "found {} identifier boundaries for {count} aliases",
                count - 1 - block
            )));
        }

        // Materialize; absent rows stay None, known (table, id) pairs reuse
        // the existing instance.
        let mut seen: Vec<(usize, EntityRef)> = Vec::new();
        let mut entities: Vec<Option<EntityRef>> = Vec::with_capacity(count);
        for (index, (entry, placeholder)) in aliases.iter().zip(placeholders).enumerate() {
            let id = &ids[index];
            if id.is_null() {
                entities.push(None);
                continue;
            }
            let in_row = self.identities.and_then(|_| {
                seen.iter()
                    .find(|(i, _)| aliases.entries()[*i].table == entry.table && ids[*i].loosely_eq(id))
                    .map(|(_, e)| e.clone())
            });
            let entity = in_row
                .or_else(|| self.known(&entry.table, id))
                .unwrap_or_else(|| EntityRef::from_boxed(placeholder));
            seen.push((index, entity.clone()));
            entities.push(Some(entity));
        }

        self.substitute(aliases, &ids, &entities);

        tracing::trace!(
            present = entities.iter().filter(|e| e.is_some()).count(),
            "hydrated row"
        );
        Ok(Hydrated {
            entries: aliases
                .iter()
                .zip(entities)
                .map(|(entry, entity)| HydratedEntry {
                    alias: entry.alias.clone(),
                    table: entry.table.clone(),
                    entity,
                })
                .collect(),
        })
    }

    /// Replace foreign-key scalars with references to the entities they
    /// identify, preferring tree relatives when a table occurs more than once.
    fn substitute(&self, aliases: &AliasTable, ids: &[Value], entities: &[Option<EntityRef>]) {
        let entries = aliases.entries();
        for (index, entity) in entities.iter().enumerate() {
            let Some(entity) = entity else { continue };
            let own_identifier = &self.style.identifier(&entries[index].table);

            for property in entity.properties() {
                let column = self.style.real_property(&property);
                if &column == own_identifier || !self.style.is_remote_identifier(&column) {
                    continue;
                }
                let Some(target) = self.style.remote_from_identifier(&column) else {
                    continue;
                };
                let Some(value) = entity.value(&property).filter(|v| !v.is_null()) else {
                    continue;
                };

                let candidates: Vec<usize> = entities
                    .iter()
                    .enumerate()
                    .filter(|(j, other)| {
                        other.as_ref().is_some_and(|o| !o.ptr_eq(entity))
                            && entries[*j].table == target
                            && ids[*j].loosely_eq(&value)
                    })
                    .map(|(j, _)| j)
                    .collect();

                let chosen = candidates
                    .iter()
                    .find(|&&j| entries[j].parent == Some(index))
                    .or_else(|| candidates.iter().find(|&&j| entries[index].parent == Some(j)))
                    .or_else(|| candidates.first());

                if let Some(related) = chosen.and_then(|&j| entities[j].as_ref()) {
                    tracing::trace!(
                        alias = %entries[index].alias,
                        property = %property,
                        target = %related.handle(),
                        "resolved reference"
                    );
                    entity.set(&property, related);
                }
            }
        }
    }

    fn known(&self, table: &str, id: &Value) -> Option<EntityRef> {
        if id.is_null() {
            return None;
        }
        self.identities.and_then(|map| map.lookup(table, id))
    }

    fn check_source(&self, row: &Row, index: usize, expected: &str) -> Result<()> {
        if !self.verify_source_tables {
            return Ok(());
        }
        match row.column_meta(index).and_then(|m| m.table()) {
            Some(actual) if !actual.eq_ignore_ascii_case(expected) => Err(Error::Hydration(HydrationError {
                kind: HydrationErrorKind::SourceTableMismatch,
                message: format!(
                    "column {index} comes from '{actual}' but belongs to a '{expected}' block"
                ),
            })),
            _ => Ok(()),
        }
    }
}

fn mismatch(message: String) -> Error {
    Error::Hydration(HydrationError {
        kind: HydrationErrorKind::ColumnMismatch,
        message,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::row;
    use relational_core::{Entity, NorthWind, Record, Standard};
    use relational_query::Collection;
    use std::any::Any;
    use std::cell::RefCell;
    use std::collections::HashMap;

    fn node(name: &str) -> Collection {
        Collection::new(name).unwrap()
    }

    fn int(v: i64) -> Value {
        Value::BigInt(v)
    }

    fn text(v: &str) -> Value {
        Value::Text(v.to_string())
    }

    #[derive(Default)]
    struct Known(RefCell<HashMap<(String, i64), EntityRef>>);

    impl IdentityLookup for Known {
        fn lookup(&self, table: &str, id: &Value) -> Option<EntityRef> {
            let id = id.as_i64()?;
            self.0.borrow().get(&(table.to_string(), id)).cloned()
        }
    }

    #[derive(Debug, Default)]
    struct Post {
        id: Value,
        title: Value,
    }

    impl Entity for Post {
        fn get(&self, property: &str) -> Option<FieldValue> {
            match property {
                "id" => Some(self.id.clone().into()),
                "title" => Some(self.title.clone().into()),
                _ => None,
            }
        }

        fn set(&mut self, property: &str, value: FieldValue) {
            let Some(value) = value.as_scalar().cloned() else {
                return;
            };
            match property {
                "id" => self.id = value,
                "title" => self.title = value,
                _ => {}
            }
        }

        fn properties(&self) -> Vec<String> {
            vec!["id".into(), "title".into()]
        }

        fn as_any(&self) -> &dyn Any {
            self
        }

        fn as_any_mut(&mut self) -> &mut dyn Any {
            self
        }
    }

    #[test]
    fn single_table_row() {
        let registry = EntityRegistry::new();
        let aliases = AliasTable::flatten(&node("post"));
        let row = row(
            &[("post", "id"), ("post", "title")],
            vec![int(5), text("hello")],
        );
        let hydrated = Hydrator::new(&Standard, &registry)
            .hydrate(&aliases, &row)
            .unwrap();
        let post = hydrated.root().unwrap();
        assert_eq!(post.value("id"), Some(int(5)));
        assert_eq!(post.value("title"), Some(text("hello")));
        let record = post.downcast::<Record>().unwrap();
        assert_eq!(record.type_name(), "Post");
    }

    #[test]
    fn registered_types_are_instantiated() {
        let mut registry = EntityRegistry::new();
        registry.register_default::<Post>("Post");
        let aliases = AliasTable::flatten(&node("post"));
        let row = row(&[("post", "id"), ("post", "title")], vec![int(1), text("t")]);
        let hydrated = Hydrator::new(&Standard, &registry)
            .hydrate(&aliases, &row)
            .unwrap();
        let post = hydrated.root().unwrap();
        assert!(post.is::<Post>());
        assert_eq!(post.downcast::<Post>().unwrap().title, text("t"));
    }

    #[test]
    fn foreign_keys_become_references() {
        let registry = EntityRegistry::new();
        let aliases = AliasTable::flatten(&node("comment").then("post").unwrap());
        let row = row(
            &[
                ("comment", "id"),
                ("comment", "post_id"),
                ("comment", "text"),
                ("post", "id"),
                ("post", "title"),
                ("post", "text"),
            ],
            vec![int(1), int(5), text("x"), int(5), text("y"), text("z")],
        );
        let hydrated = Hydrator::new(&Standard, &registry)
            .hydrate(&aliases, &row)
            .unwrap();
        let comment = hydrated.get("comment").unwrap();
        let post = hydrated.get("post").unwrap();
        assert!(!comment.ptr_eq(post));
        let referenced = comment.related("post_id").unwrap();
        assert!(referenced.ptr_eq(post));
        assert_eq!(referenced.value("id"), Some(int(5)));
        assert_eq!(post.value("text"), Some(text("z")));
        assert_eq!(comment.value("text"), Some(text("x")));
    }

    fn self_join_row(comment_author: i64, post_author: i64) -> (AliasTable, Row) {
        // comment(child: post -> author) -> author
        let tree = node("comment")
            .child(&node("post").then("author").unwrap())
            .then("author")
            .unwrap();
        let aliases = AliasTable::flatten(&tree);
        assert_eq!(aliases.aliases(), vec!["comment", "post", "author", "author2"]);
        let row = row(
            &[
                ("comment", "id"),
                ("comment", "post_id"),
                ("comment", "author_id"),
                ("post", "id"),
                ("post", "author_id"),
                ("author", "id"),
                ("author", "name"),
                ("author", "id"),
                ("author", "name"),
            ],
            vec![
                int(1),
                int(10),
                int(comment_author),
                int(10),
                int(post_author),
                int(post_author),
                text("post author"),
                int(comment_author),
                text("comment author"),
            ],
        );
        (aliases, row)
    }

    #[test]
    fn self_join_with_different_ids() {
        let registry = EntityRegistry::new();
        let (aliases, row) = self_join_row(7, 8);
        let hydrated = Hydrator::new(&Standard, &registry)
            .hydrate(&aliases, &row)
            .unwrap();
        let comment = hydrated.get("comment").unwrap();
        let post = hydrated.get("post").unwrap();
        let comment_author = comment.related("author_id").unwrap();
        let post_author = post.related("author_id").unwrap();
        assert!(!comment_author.ptr_eq(&post_author));
        assert!(comment_author.ptr_eq(hydrated.get("author2").unwrap()));
        assert!(post_author.ptr_eq(hydrated.get("author").unwrap()));
        assert_eq!(comment_author.value("name"), Some(text("comment author")));
        assert_eq!(post_author.value("name"), Some(text("post author")));
        assert!(comment.related("post_id").unwrap().ptr_eq(post));
    }

    #[test]
    fn self_join_with_same_id_keeps_relatives_apart() {
        let registry = EntityRegistry::new();
        let (aliases, row) = self_join_row(7, 7);
        let hydrated = Hydrator::new(&Standard, &registry)
            .hydrate(&aliases, &row)
            .unwrap();
        let comment_author = hydrated.get("comment").unwrap().related("author_id").unwrap();
        let post_author = hydrated.get("post").unwrap().related("author_id").unwrap();
        assert!(comment_author.ptr_eq(hydrated.get("author2").unwrap()));
        assert!(post_author.ptr_eq(hydrated.get("author").unwrap()));
        assert!(!comment_author.ptr_eq(&post_author));
    }

    #[test]
    fn self_join_with_same_id_shares_instance_under_identity_map() {
        let registry = EntityRegistry::new();
        let known = Known::default();
        let (aliases, row) = self_join_row(7, 7);
        let hydrated = Hydrator::new(&Standard, &registry)
            .with_identity_map(&known)
            .hydrate(&aliases, &row)
            .unwrap();
        let comment_author = hydrated.get("comment").unwrap().related("author_id").unwrap();
        let post_author = hydrated.get("post").unwrap().related("author_id").unwrap();
        assert!(comment_author.ptr_eq(&post_author));
    }

    #[test]
    fn absent_optional_join_is_none() {
        let registry = EntityRegistry::new();
        let tree = node("post").child(&node("category"));
        let aliases = AliasTable::flatten(&tree);
        let row = row(
            &[
                ("post", "id"),
                ("post", "category_id"),
                ("category", "id"),
                ("category", "name"),
            ],
            vec![int(3), Value::Null, Value::Null, Value::Null],
        );
        let hydrated = Hydrator::new(&Standard, &registry)
            .hydrate(&aliases, &row)
            .unwrap();
        assert!(hydrated.get("category").is_none());
        assert!(hydrated.entries()[1].entity.is_none());
        let post = hydrated.root().unwrap();
        assert_eq!(post.value("category_id"), Some(Value::Null));
    }

    #[test]
    fn junction_rows_link_both_sides() {
        let registry = EntityRegistry::new();
        let tree = node("post").then("post_category").unwrap().then("category").unwrap();
        let aliases = AliasTable::flatten(&tree);
        let row = row(
            &[
                ("post", "id"),
                ("post", "title"),
                ("post_category", "id"),
                ("post_category", "post_id"),
                ("post_category", "category_id"),
                ("category", "id"),
                ("category", "name"),
            ],
            vec![int(1), text("p"), int(9), int(1), int(4), int(4), text("rust")],
        );
        let hydrated = Hydrator::new(&Standard, &registry)
            .hydrate(&aliases, &row)
            .unwrap();
        let link = hydrated.get("post_category").unwrap();
        assert!(link.related("post_id").unwrap().ptr_eq(hydrated.get("post").unwrap()));
        assert!(link
            .related("category_id")
            .unwrap()
            .ptr_eq(hydrated.get("category").unwrap()));
    }

    #[test]
    fn known_entities_are_reused() {
        let registry = EntityRegistry::new();
        let known = Known::default();
        let tracked = EntityRef::new(Record::new("Post").with("id", 5_i64).with("title", "mine"));
        known
            .0
            .borrow_mut()
            .insert(("post".to_string(), 5), tracked.clone());

        let aliases = AliasTable::flatten(&node("comment").then("post").unwrap());
        let row = row(
            &[("comment", "id"), ("comment", "post_id"), ("post", "id"), ("post", "title")],
            vec![int(1), int(5), int(5), text("from db")],
        );
        let hydrated = Hydrator::new(&Standard, &registry)
            .with_identity_map(&known)
            .hydrate(&aliases, &row)
            .unwrap();
        let post = hydrated.get("post").unwrap();
        assert!(post.ptr_eq(&tracked));
        assert_eq!(post.value("title"), Some(text("mine")));
        assert!(hydrated.root().unwrap().related("post_id").unwrap().ptr_eq(&tracked));
    }

    #[test]
    fn too_few_boundaries_is_an_error() {
        let registry = EntityRegistry::new();
        let aliases = AliasTable::flatten(&node("comment").then("post").unwrap());
        let row = row(&[("comment", "id"), ("comment", "text")], vec![int(1), text("x")]);
        // The only identifier closes the post block; comment never closes.
        let err = Hydrator::new(&Standard, &registry)
            .verify_source_tables(false)
            .hydrate(&aliases, &row)
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Hydration(HydrationError { kind: HydrationErrorKind::ColumnMismatch, .. })
        ));
    }

    #[test]
    fn too_many_boundaries_is_an_error() {
        let registry = EntityRegistry::new();
        let aliases = AliasTable::flatten(&node("comment").then("post").unwrap());
        let row = row(
            &[("x", "id"), ("comment", "id"), ("post", "id")],
            vec![int(1), int(2), int(3)],
        );
        let err = Hydrator::new(&Standard, &registry)
            .verify_source_tables(false)
            .hydrate(&aliases, &row)
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Hydration(HydrationError { kind: HydrationErrorKind::ColumnMismatch, .. })
        ));
    }

    #[test]
    fn source_table_mismatch_is_reported() {
        let registry = EntityRegistry::new();
        let aliases = AliasTable::flatten(&node("comment").then("post").unwrap());
        let row = row(
            &[("comment", "id"), ("comment", "post_id"), ("author", "id")],
            vec![int(1), int(2), int(2)],
        );
        let err = Hydrator::new(&Standard, &registry)
            .hydrate(&aliases, &row)
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Hydration(HydrationError { kind: HydrationErrorKind::SourceTableMismatch, .. })
        ));
        assert!(Hydrator::new(&Standard, &registry)
            .verify_source_tables(false)
            .hydrate(&aliases, &row)
            .is_ok());
    }

    #[test]
    fn source_table_case_is_ignored() {
        let registry = EntityRegistry::new();
        let aliases = AliasTable::flatten(&node("comment").then("post").unwrap());
        // Declared as `Post` in the schema, queried as `post`
        let row = row(
            &[("Comment", "id"), ("Comment", "post_id"), ("Post", "id")],
            vec![int(1), int(2), int(2)],
        );
        let hydrated = Hydrator::new(&Standard, &registry)
            .hydrate(&aliases, &row)
            .unwrap();
        assert!(hydrated.root().unwrap().related("post_id").is_some());
    }

    #[test]
    fn northwind_keys() {
        let registry = EntityRegistry::new();
        let aliases = AliasTable::flatten(&node("Products").then("Suppliers").unwrap());
        let row = row(
            &[
                ("Products", "ProductID"),
                ("Products", "SupplierID"),
                ("Suppliers", "SupplierID"),
                ("Suppliers", "CompanyName"),
            ],
            vec![int(1), int(3), int(3), text("Exotic Liquids")],
        );
        let hydrated = Hydrator::new(&NorthWind, &registry)
            .hydrate(&aliases, &row)
            .unwrap();
        let supplier = hydrated
            .root()
            .unwrap()
            .related("SupplierID")
            .unwrap();
        assert_eq!(supplier.value("CompanyName"), Some(text("Exotic Liquids")));
    }

    #[test]
    fn hydrate_all_rows() {
        let registry = EntityRegistry::new();
        let aliases = AliasTable::flatten(&node("post"));
        let rows = vec![
            row(&[("post", "id")], vec![int(1)]),
            row(&[("post", "id")], vec![int(2)]),
        ];
        let all = Hydrator::new(&Standard, &registry)
            .hydrate_all(&aliases, &rows)
            .unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[1].root().unwrap().value("id"), Some(int(2)));
    }
}
