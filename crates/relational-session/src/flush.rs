//! Writing pending changes inside one transaction.
//!
//! Write order follows entity references rather than table metadata:
//! - DELETE referrers before the entities they reference
//! - INSERT/UPDATE referenced entities before their referrers
//!
//! Statements are built right before they run, so an identifier generated
//! by one INSERT is already visible to the foreign-key columns of the next.
//! When new entities reference each other in a cycle, one of them has to go
//! in first with a NULL foreign key; that column is set by a follow-up
//! UPDATE once the other side has its identifier.

use crate::tracker::{Tracker, identifier_value, references};
use relational_core::{
    Connection, EntityHandle, EntityRef, Error, Result, Style, TrackingErrorKind, Value,
};
use relational_query::Sql;
use std::collections::HashSet;

/// A write about to be executed.
#[derive(Debug, Clone, PartialEq)]
pub enum PendingOp {
    /// Insert a new row; the identifier column is omitted while NULL.
    Insert {
        table: String,
        columns: Vec<(String, Value)>,
    },
    /// Update every non-identifier column by primary key.
    Update {
        table: String,
        identifier: String,
        id: Value,
        columns: Vec<(String, Value)>,
    },
    /// Delete by primary key.
    Delete {
        table: String,
        identifier: String,
        id: Value,
    },
}

impl PendingOp {
    pub fn table(&self) -> &str {
        match self {
            PendingOp::Insert { table, .. }
            | PendingOp::Update { table, .. }
            | PendingOp::Delete { table, .. } => table,
        }
    }

    pub fn is_insert(&self) -> bool {
        matches!(self, PendingOp::Insert { .. })
    }

    pub fn is_update(&self) -> bool {
        matches!(self, PendingOp::Update { .. })
    }

    pub fn is_delete(&self) -> bool {
        matches!(self, PendingOp::Delete { .. })
    }

    /// Render the operation as a parameterized statement.
    pub fn to_sql(&self) -> Sql {
        match self {
            PendingOp::Insert { table, columns } if columns.is_empty() => {
                Sql::raw(format!("INSERT INTO {table} DEFAULT VALUES"))
            }
            PendingOp::Insert { table, columns } => {
                let mut head = Vec::with_capacity(columns.len() + 1);
                head.push(table.clone());
                head.extend(columns.iter().map(|(name, _)| name.clone()));
                let values: Vec<Value> = columns.iter().map(|(_, v)| v.clone()).collect();
                Sql::new().insert_into(head).values(values)
            }
            PendingOp::Update {
                table,
                identifier,
                id,
                columns,
            } => Sql::new()
                .update(table.as_str())
                .set(columns.clone())
                .r#where(vec![(identifier.clone(), id.clone())]),
            PendingOp::Delete {
                table,
                identifier,
                id,
            } => Sql::new()
                .delete_from(table.as_str())
                .r#where(vec![(identifier.clone(), id.clone())]),
        }
    }
}

/// Execution order for the tracker's pending entities.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct FlushPlan {
    /// Removed entities, referrers first.
    pub deletes: Vec<EntityHandle>,
    /// Inserted or updated entities, referenced first.
    pub writes: Vec<EntityHandle>,
}

impl FlushPlan {
    /// Order the pending entities of `tracker`.
    pub fn build(tracker: &Tracker, style: &dyn Style) -> Self {
        let (removed, written): (Vec<EntityHandle>, Vec<EntityHandle>) = tracker
            .dirty
            .iter()
            .copied()
            .partition(|h| tracker.removed.contains(h));

        let mut deletes = dependency_order(tracker, &removed, style);
        deletes.reverse();
        let writes = dependency_order(tracker, &written, style);
        Self { deletes, writes }
    }

    pub fn is_empty(&self) -> bool {
        self.deletes.is_empty() && self.writes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.deletes.len() + self.writes.len()
    }
}

/// Depth-first post-order over entity references within `handles`: every
/// entity comes after the entities it references.
fn dependency_order(tracker: &Tracker, handles: &[EntityHandle], style: &dyn Style) -> Vec<EntityHandle> {
    fn visit(
        tracker: &Tracker,
        handle: EntityHandle,
        members: &HashSet<EntityHandle>,
        seen: &mut HashSet<EntityHandle>,
        out: &mut Vec<EntityHandle>,
        style: &dyn Style,
    ) {
        if !seen.insert(handle) {
            return;
        }
        if let Some(entry) = tracker.entries.get(&handle) {
            for (_, related) in references(&entry.entity, style) {
                if members.contains(&related.handle()) {
                    visit(tracker, related.handle(), members, seen, out, style);
                }
            }
        }
        out.push(handle);
    }

    let members: HashSet<EntityHandle> = handles.iter().copied().collect();
    let mut seen = HashSet::new();
    let mut out = Vec::with_capacity(handles.len());
    for &handle in handles {
        visit(tracker, handle, &members, &mut seen, &mut out, style);
    }
    out
}

/// Counts of rows written by a flush.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FlushResult {
    pub inserted: usize,
    pub updated: usize,
    pub deleted: usize,
}

impl FlushResult {
    pub fn total(&self) -> usize {
        self.inserted + self.updated + self.deleted
    }
}

impl Tracker {
    /// Write every pending change in a single transaction.
    ///
    /// On failure the transaction is rolled back, identifiers assigned
    /// during this flush are reset to NULL, the pending sets are kept and
    /// the original error is returned.
    #[tracing::instrument(level = "info", skip_all, fields(pending = self.dirty.len()))]
    pub fn flush<C: Connection + ?Sized>(&mut self, conn: &C, style: &dyn Style) -> Result<FlushResult> {
        let plan = FlushPlan::build(self, style);
        if plan.is_empty() {
            tracing::debug!("Nothing to flush");
            return Ok(FlushResult::default());
        }

        tracing::info!(
            deletes = plan.deletes.len(),
            writes = plan.writes.len(),
            "Executing flush plan"
        );
        let start = std::time::Instant::now();

        conn.begin()?;
        let mut assigned: Vec<(EntityRef, String)> = Vec::new();
        let outcome = self
            .execute_plan(&plan, conn, style, &mut assigned)
            .and_then(|result| conn.commit().map(|()| result));

        match outcome {
            Ok(result) => {
                self.finish(&plan, style);
                tracing::info!(
                    elapsed_ms = start.elapsed().as_millis(),
                    inserted = result.inserted,
                    updated = result.updated,
                    deleted = result.deleted,
                    "Flush complete"
                );
                Ok(result)
            }
            Err(error) => {
                if let Err(rollback) = conn.rollback() {
                    tracing::warn!(error = %rollback, "Rollback after failed flush also failed");
                }
                for (entity, property) in assigned {
                    entity.set(&property, Value::Null);
                }
                tracing::debug!(error = %error, "Flush rolled back");
                Err(error)
            }
        }
    }

    fn execute_plan<C: Connection + ?Sized>(
        &self,
        plan: &FlushPlan,
        conn: &C,
        style: &dyn Style,
        assigned: &mut Vec<(EntityRef, String)>,
    ) -> Result<FlushResult> {
        let mut result = FlushResult::default();
        let mut deferred: Vec<(EntityHandle, String, EntityRef)> = Vec::new();

        for handle in &plan.deletes {
            let op = self.delete_op(*handle, style)?;
            run(conn, &op)?;
            result.deleted += 1;
        }

        for handle in &plan.writes {
            let Some(entry) = self.entries.get(handle) else {
                continue;
            };
            let entity = &entry.entity;
            if self.new.contains(handle) {
                let op = self.insert_op(entity, &entry.table, style);
                for (column, related) in references(entity, style) {
                    if self.new.contains(&related.handle())
                        && self.reference_id(&related, &column, style).is_null()
                    {
                        deferred.push((*handle, column, related));
                    }
                }
                run(conn, &op)?;
                result.inserted += 1;
                if identifier_value(entity, &entry.table, style).is_null() {
                    self.assign_generated_id(conn, entity, &entry.table, style, assigned);
                }
            } else {
                let op = self.update_op(entity, &entry.table, style)?;
                if matches!(&op, PendingOp::Update { columns, .. } if columns.is_empty()) {
                    tracing::trace!(table = %entry.table, "No columns to update; skipping");
                    continue;
                }
                run(conn, &op)?;
                result.updated += 1;
            }
        }

        for (handle, column, related) in deferred {
            let Some(entry) = self.entries.get(&handle) else {
                continue;
            };
            let target = self.reference_id(&related, &column, style);
            let id = identifier_value(&entry.entity, &entry.table, style);
            if target.is_null() || id.is_null() {
                tracing::warn!(table = %entry.table, column = %column, "Reference has no identifier after insert; column left NULL");
                continue;
            }
            let op = PendingOp::Update {
                table: entry.table.clone(),
                identifier: style.identifier(&entry.table),
                id,
                columns: vec![(column, target)],
            };
            run(conn, &op)?;
            result.updated += 1;
        }
        Ok(result)
    }

    fn assign_generated_id<C: Connection + ?Sized>(
        &self,
        conn: &C,
        entity: &EntityRef,
        table: &str,
        style: &dyn Style,
        assigned: &mut Vec<(EntityRef, String)>,
    ) {
        match conn.last_insert_id() {
            Ok(id) if !id.is_null() => {
                let property = style.styled_property(&style.identifier(table));
                tracing::trace!(table, id = %id, "Assigned generated identifier");
                entity.set(&property, id);
                assigned.push((entity.clone(), property));
            }
            Ok(_) => {}
            Err(error) => {
                tracing::warn!(table, error = %error, "Last insert id unavailable; identifier left unset");
            }
        }
    }

    fn insert_op(&self, entity: &EntityRef, table: &str, style: &dyn Style) -> PendingOp {
        let identifier = style.identifier(table);
        let columns = self
            .columns_of(entity, style)
            .into_iter()
            .filter(|(name, value)| !(*name == identifier && value.is_null()))
            .collect();
        PendingOp::Insert {
            table: table.to_string(),
            columns,
        }
    }

    fn update_op(&self, entity: &EntityRef, table: &str, style: &dyn Style) -> Result<PendingOp> {
        let identifier = style.identifier(table);
        let id = require_id(entity, table, style, "update")?;
        let columns = self
            .columns_of(entity, style)
            .into_iter()
            .filter(|(name, _)| *name != identifier)
            .collect();
        Ok(PendingOp::Update {
            table: table.to_string(),
            identifier,
            id,
            columns,
        })
    }

    fn delete_op(&self, handle: EntityHandle, style: &dyn Style) -> Result<PendingOp> {
        let Some(entry) = self.entries.get(&handle) else {
            return Err(Error::tracking(
                TrackingErrorKind::UnknownTable,
                None,
                format!("entity {handle} scheduled for removal is no longer tracked"),
            ));
        };
        let id = require_id(&entry.entity, &entry.table, style, "delete")?;
        Ok(PendingOp::Delete {
            table: entry.table.clone(),
            identifier: style.identifier(&entry.table),
            id,
        })
    }

    /// Bring bookkeeping in line with what was just committed.
    fn finish(&mut self, plan: &FlushPlan, style: &dyn Style) {
        let refreshed: Vec<(EntityHandle, Value, Vec<(String, Value)>)> = plan
            .writes
            .iter()
            .filter_map(|handle| {
                let entry = self.entries.get(handle)?;
                Some((
                    *handle,
                    identifier_value(&entry.entity, &entry.table, style),
                    self.columns_of(&entry.entity, style),
                ))
            })
            .collect();
        for (handle, id, snapshot) in refreshed {
            self.reindex(handle, None, id);
            if let Some(entry) = self.entries.get_mut(&handle) {
                entry.snapshot = Some(snapshot);
            }
        }

        for handle in &plan.deletes {
            self.forget(*handle);
        }
        self.clear_pending();
    }
}

fn require_id(entity: &EntityRef, table: &str, style: &dyn Style, action: &str) -> Result<Value> {
    let id = identifier_value(entity, table, style);
    if id.is_null() {
        return Err(Error::tracking(
            TrackingErrorKind::MissingIdentifier,
            Some(table),
            format!("cannot {action} a {table} row without a value for {}", style.identifier(table)),
        ));
    }
    Ok(id)
}

fn run<C: Connection + ?Sized>(conn: &C, op: &PendingOp) -> Result<()> {
    let (sql, params) = op.to_sql().build();
    tracing::trace!(sql = %sql, params = params.len(), "Executing flush statement");
    conn.execute(&sql, &params)?;
    Ok(())
}
