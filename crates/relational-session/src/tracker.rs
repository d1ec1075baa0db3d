//! Identity map and unit of work.
//!
//! The tracker remembers which table every known entity belongs to, its
//! identifier and a snapshot of its columns. `persist` and `remove` only
//! record intent; nothing touches the database until
//! [`flush`](Tracker::flush) writes every pending change inside one
//! transaction.

use crate::hydrator::IdentityLookup;
use relational_core::{
    EntityHandle, EntityRef, Error, FieldValue, Result, Style, TrackingErrorKind, Value,
};
use std::collections::{HashMap, HashSet};

#[derive(Debug)]
pub(crate) struct TrackedEntry {
    pub entity: EntityRef,
    pub table: String,
    pub id: Value,
    /// Columns as last read from or written to the database.
    pub snapshot: Option<Vec<(String, Value)>>,
}

/// Hash key consistent with [`Value::loosely_eq`]: values that compare
/// loosely equal always share a key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum IdKey {
    Integer(i64),
    Float(u64),
    Exact(String),
}

impl IdKey {
    #[allow(clippy::float_cmp, clippy::cast_possible_truncation)]
    fn of(id: &Value) -> Option<Self> {
        if id.is_null() {
            return None;
        }
        if let Some(n) = id.integer_key() {
            return Some(IdKey::Integer(n));
        }
        Some(match id.as_f64() {
            Some(f) if f.trunc() == f && f.abs() < 9.2e18 => IdKey::Integer(f as i64),
            Some(f) => IdKey::Float(f.to_bits()),
            None => IdKey::Exact(format!("{id:?}")),
        })
    }
}

/// Tracked entities and their pending writes.
#[derive(Debug, Default)]
pub struct Tracker {
    pub(crate) entries: HashMap<EntityHandle, TrackedEntry>,
    /// (table, id) → handles, oldest first.
    index: HashMap<(String, IdKey), Vec<EntityHandle>>,
    /// Entities with pending writes, in persist order.
    pub(crate) dirty: Vec<EntityHandle>,
    queued: HashSet<EntityHandle>,
    pub(crate) new: HashSet<EntityHandle>,
    pub(crate) removed: HashSet<EntityHandle>,
}

impl Tracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an entity loaded from `table` as clean.
    ///
    /// Already tracked entities are left untouched.
    pub fn mark_tracked(&mut self, entity: &EntityRef, table: &str, style: &dyn Style) {
        if self.entries.contains_key(&entity.handle()) {
            return;
        }
        let id = identifier_value(entity, table, style);
        let snapshot = self.columns_of(entity, style);
        tracing::trace!(entity = %entity.handle(), table, id = %id, "tracking fetched entity");
        self.insert_entry(entity, table, id, Some(snapshot));
    }

    /// Schedule `entity` for an INSERT or UPDATE on the next flush.
    ///
    /// The table comes from `table` when given, otherwise from earlier
    /// tracking; an untracked entity without a table name is an error.
    /// Entities referenced through foreign-key fields are persisted first
    /// when they are untracked or changed.
    #[tracing::instrument(level = "trace", skip(self, entity, style), fields(entity = %entity.handle()))]
    pub fn persist(&mut self, entity: &EntityRef, table: Option<&str>, style: &dyn Style) -> Result<()> {
        let mut visiting = HashSet::new();
        self.persist_inner(entity, table, style, &mut visiting)
    }

    fn persist_inner(
        &mut self,
        entity: &EntityRef,
        table: Option<&str>,
        style: &dyn Style,
        visiting: &mut HashSet<EntityHandle>,
    ) -> Result<()> {
        if !visiting.insert(entity.handle()) {
            return Ok(());
        }
        let table = self.resolve_table(entity, table)?;

        for (column, related) in references(entity, style) {
            if self.is_new(&related) || self.is_dirty(&related) {
                continue;
            }
            if self.is_tracked(&related) && !self.snapshot_changed(&related, style) {
                continue;
            }
            let target = self
                .table_of(&related)
                .map(str::to_string)
                .or_else(|| style.remote_from_identifier(&column));
            tracing::trace!(column = %column, target = ?target, "cascading persist");
            self.persist_inner(&related, target.as_deref(), style, visiting)?;
        }

        let handle = entity.handle();
        let id = identifier_value(entity, &table, style);
        if self.entries.contains_key(&handle) {
            // The caller may have edited the identifier or the table since
            self.reindex(handle, Some(&table), id);
        } else {
            self.insert_entry(entity, &table, id, None);
            self.new.insert(handle);
        }
        self.removed.remove(&handle);
        self.enqueue(handle);
        Ok(())
    }

    /// Schedule `entity` for a DELETE on the next flush.
    ///
    /// Removing an entity that was persisted but never flushed just
    /// cancels its insert.
    #[tracing::instrument(level = "trace", skip(self, entity, style), fields(entity = %entity.handle()))]
    pub fn remove(&mut self, entity: &EntityRef, table: Option<&str>, style: &dyn Style) -> Result<()> {
        let table = self.resolve_table(entity, table)?;
        let handle = entity.handle();

        if self.new.contains(&handle) {
            tracing::debug!(table = %table, "removed before first flush; dropping pending insert");
            self.untrack(entity);
            return Ok(());
        }
        if !self.entries.contains_key(&handle) {
            let id = identifier_value(entity, &table, style);
            self.insert_entry(entity, &table, id, None);
        }
        self.removed.insert(handle);
        self.enqueue(handle);
        Ok(())
    }

    pub fn is_tracked(&self, entity: &EntityRef) -> bool {
        self.entries.contains_key(&entity.handle())
    }

    /// Table an entity is tracked under.
    pub fn table_of(&self, entity: &EntityRef) -> Option<&str> {
        self.entries
            .get(&entity.handle())
            .map(|entry| entry.table.as_str())
    }

    /// Find a tracked entity by table and identifier.
    pub fn get_tracked(&self, table: &str, id: &Value) -> Option<EntityRef> {
        let key = (table.to_string(), IdKey::of(id)?);
        self.index
            .get(&key)?
            .iter()
            .filter_map(|handle| self.entries.get(handle))
            .find(|entry| entry.id.loosely_eq(id))
            .map(|entry| entry.entity.clone())
    }

    pub fn is_new(&self, entity: &EntityRef) -> bool {
        self.new.contains(&entity.handle())
    }

    pub fn is_dirty(&self, entity: &EntityRef) -> bool {
        self.queued.contains(&entity.handle())
    }

    pub fn is_removed(&self, entity: &EntityRef) -> bool {
        self.removed.contains(&entity.handle())
    }

    /// Whether the entity's columns differ from its last snapshot.
    ///
    /// Untracked entities and entities never read back count as changed.
    pub fn snapshot_changed(&self, entity: &EntityRef, style: &dyn Style) -> bool {
        match self
            .entries
            .get(&entity.handle())
            .and_then(|entry| entry.snapshot.as_ref())
        {
            Some(snapshot) => *snapshot != self.columns_of(entity, style),
            None => true,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of entities with pending writes.
    pub fn pending(&self) -> usize {
        self.dirty.len()
    }

    /// Forget an entity and any pending write for it.
    pub fn untrack(&mut self, entity: &EntityRef) {
        let handle = entity.handle();
        self.forget(handle);
        if self.queued.remove(&handle) {
            self.dirty.retain(|h| *h != handle);
        }
        self.new.remove(&handle);
        self.removed.remove(&handle);
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.index.clear();
        self.dirty.clear();
        self.queued.clear();
        self.new.clear();
        self.removed.clear();
    }

    /// Column values of an entity as they would be written.
    ///
    /// Entity references are replaced by the referenced entity's
    /// identifier, NULL while it has none.
    pub fn columns_of(&self, entity: &EntityRef, style: &dyn Style) -> Vec<(String, Value)> {
        let properties = entity.properties();
        let mut columns = Vec::with_capacity(properties.len());
        for property in properties {
            let column = style.real_property(&property);
            let value = match entity.get(&property) {
                Some(FieldValue::Scalar(value)) => value,
                Some(FieldValue::Entity(related)) => self.reference_id(&related, &column, style),
                None => continue,
            };
            columns.push((column, value));
        }
        columns
    }

    pub(crate) fn reference_id(&self, related: &EntityRef, column: &str, style: &dyn Style) -> Value {
        let table = self
            .table_of(related)
            .map(str::to_string)
            .or_else(|| style.remote_from_identifier(column));
        table.map_or(Value::Null, |table| identifier_value(related, &table, style))
    }

    fn resolve_table(&self, entity: &EntityRef, table: Option<&str>) -> Result<String> {
        if let Some(table) = table {
            return Ok(table.to_string());
        }
        self.table_of(entity).map(str::to_string).ok_or_else(|| {
            Error::tracking(
                TrackingErrorKind::UnknownTable,
                None,
                format!("entity {} is not tracked and no table name was given", entity.handle()),
            )
        })
    }

    fn insert_entry(
        &mut self,
        entity: &EntityRef,
        table: &str,
        id: Value,
        snapshot: Option<Vec<(String, Value)>>,
    ) {
        let handle = entity.handle();
        self.index_id(handle, table, &id);
        self.entries.insert(
            handle,
            TrackedEntry {
                entity: entity.clone(),
                table: table.to_string(),
                id,
                snapshot,
            },
        );
    }

    fn enqueue(&mut self, handle: EntityHandle) {
        if self.queued.insert(handle) {
            self.dirty.push(handle);
        }
    }

    /// Drop pending-write bookkeeping after a flush.
    pub(crate) fn clear_pending(&mut self) {
        self.dirty.clear();
        self.queued.clear();
        self.new.clear();
        self.removed.clear();
    }

    /// Move a tracked entity to a new table and/or identifier.
    pub(crate) fn reindex(&mut self, handle: EntityHandle, table: Option<&str>, id: Value) {
        let Some(entry) = self.entries.get(&handle) else {
            return;
        };
        let table = table.map_or_else(|| entry.table.clone(), str::to_string);
        if entry.table == table && entry.id == id {
            return;
        }
        self.unindex(handle);
        self.index_id(handle, &table, &id);
        if let Some(entry) = self.entries.get_mut(&handle) {
            entry.table = table;
            entry.id = id;
        }
    }

    /// Remove an entity from the entry map and the identifier index.
    pub(crate) fn forget(&mut self, handle: EntityHandle) {
        self.unindex(handle);
        self.entries.remove(&handle);
    }

    fn index_id(&mut self, handle: EntityHandle, table: &str, id: &Value) {
        if let Some(key) = IdKey::of(id) {
            self.index.entry((table.to_string(), key)).or_default().push(handle);
        }
    }

    fn unindex(&mut self, handle: EntityHandle) {
        let Some(entry) = self.entries.get(&handle) else {
            return;
        };
        let Some(key) = IdKey::of(&entry.id) else {
            return;
        };
        let key = (entry.table.clone(), key);
        if let Some(handles) = self.index.get_mut(&key) {
            handles.retain(|h| *h != handle);
            if handles.is_empty() {
                self.index.remove(&key);
            }
        }
    }
}

impl IdentityLookup for Tracker {
    fn lookup(&self, table: &str, id: &Value) -> Option<EntityRef> {
        self.get_tracked(table, id)
    }
}

/// Identifier property of `entity` read as a scalar; NULL when unset.
pub(crate) fn identifier_value(entity: &EntityRef, table: &str, style: &dyn Style) -> Value {
    let property = style.styled_property(&style.identifier(table));
    entity.value(&property).unwrap_or(Value::Null)
}

/// Entities held by remote-identifier fields, with their column names.
pub(crate) fn references(entity: &EntityRef, style: &dyn Style) -> Vec<(String, EntityRef)> {
    entity
        .properties()
        .into_iter()
        .filter_map(|property| {
            let column = style.real_property(&property);
            if !style.is_remote_identifier(&column) {
                return None;
            }
            entity.related(&property).map(|related| (column, related))
        })
        .collect()
}
