//! Compilation of collection trees into a single joined SELECT.

use crate::collection::{Collection, Condition, ConditionEntry};
use crate::flatten::{AliasEntry, AliasTable};
use crate::sql::{Part, Sql};
use relational_core::{CompileError, Error, Result, Style};
use regex::Regex;

/// A compiled statement and the alias table the hydrator needs to split
/// its rows.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledQuery {
    pub sql: Sql,
    pub aliases: AliasTable,
}

impl CompiledQuery {
    /// Append caller SQL (ordering, limits, extra filters) and its params.
    pub fn with_extra(mut self, extra: Option<&Sql>) -> Self {
        if let Some(extra) = extra {
            self.sql = self.sql.append(extra);
        }
        self
    }
}

/// Turns a [`Collection`] tree into SQL using a naming [`Style`].
///
/// Every node contributes `alias.*` to the projection and a join from its
/// parent. Nodes that look like junction tables (their name is what the
/// style composes from their parent and continuation) point their foreign
/// key at the parent; every other node is pointed at by the parent's
/// foreign key.
#[derive(Debug, Clone, Copy)]
pub struct QueryCompiler<'s> {
    style: &'s dyn Style,
}

impl<'s> QueryCompiler<'s> {
    pub fn new(style: &'s dyn Style) -> Self {
        Self { style }
    }

    /// Compile `root` without touching it.
    #[tracing::instrument(level = "debug", skip(self, root), fields(root = root.name()))]
    pub fn compile(&self, root: &Collection) -> Result<CompiledQuery> {
        let aliases = AliasTable::flatten(root);

        let projection: Vec<String> = aliases.iter().map(|e| format!("{}.*", e.alias)).collect();
        let mut sql = Sql::new().select(projection);
        let mut conditions = Vec::new();

        for (index, entry) in aliases.iter().enumerate() {
            conditions.extend(self.conditions(entry)?);

            let Some(parent_index) = entry.parent else {
                if index != 0 {
                    return Err(compile_error(entry, "only the root may be joined without a parent"));
                }
                sql = sql.from(table_reference(entry));
                continue;
            };

            let parent = aliases
                .get(parent_index)
                .filter(|_| parent_index < index)
                .ok_or_else(|| compile_error(entry, "parent alias is not registered"))?;

            sql = if entry.required {
                sql.inner_join(entry.table.as_str())
            } else {
                sql.left_join(entry.table.as_str())
            };
            if entry.alias != entry.table {
                sql = sql.r#as(entry.alias.as_str());
            }
            let (left, right) = self.join_predicate(entry, parent);
            tracing::trace!(alias = %entry.alias, on = %format!("{left} = {right}"), "join");
            sql = sql.on([(left, right)]);
        }

        let sql = sql.r#where(conditions);
        tracing::debug!(
            aliases = aliases.len(),
            params = sql.params().len(),
            sql = %sql,
            "compiled collection"
        );
        Ok(CompiledQuery { sql, aliases })
    }

    /// Compile and append caller SQL.
    pub fn compile_with(&self, root: &Collection, extra: Option<&Sql>) -> Result<CompiledQuery> {
        Ok(self.compile(root)?.with_extra(extra))
    }

    fn join_predicate(&self, entry: &AliasEntry, parent: &AliasEntry) -> (String, String) {
        let style = self.style;
        if let Some(next) = entry.next.as_deref() {
            let junction = style.composed(&parent.table, next) == entry.table
                || style.composed(next, &parent.table) == entry.table;
            if junction {
                return (
                    format!("{}.{}", entry.alias, style.remote_identifier(&parent.table)),
                    format!("{}.{}", parent.alias, style.identifier(&parent.table)),
                );
            }
        }
        (
            format!("{}.{}", parent.alias, style.remote_identifier(&entry.table)),
            format!("{}.{}", entry.alias, style.identifier(&entry.table)),
        )
    }

    fn conditions(&self, entry: &AliasEntry) -> Result<Vec<Part>> {
        match &entry.condition {
            Condition::None => Ok(Vec::new()),
            Condition::Scalar(value) => Ok(vec![Part::pair(
                format!("{}.{}", entry.alias, self.style.identifier(&entry.table)),
                value.clone(),
            )]),
            Condition::Map(entries) => entries
                .iter()
                .map(|condition| match condition {
                    ConditionEntry::Column(column, value) => Ok(Part::pair(
                        format!("{}.{}", entry.alias, column),
                        value.clone(),
                    )),
                    ConditionEntry::Raw(fragment) => rewrite_references(entry, fragment).map(Part::Raw),
                })
                .collect(),
        }
    }
}

fn table_reference(entry: &AliasEntry) -> String {
    if entry.alias == entry.table {
        entry.table.clone()
    } else {
        format!("{} AS {}", entry.table, entry.alias)
    }
}

/// `author.name` -> `author2.name` inside a raw fragment.
fn rewrite_references(entry: &AliasEntry, fragment: &str) -> Result<String> {
    if entry.alias == entry.table {
        return Ok(fragment.to_string());
    }
    let pattern = format!(r"\b{}\.(\w+)", regex::escape(&entry.table));
    let re = Regex::new(&pattern).map_err(|e| compile_error(entry, &e.to_string()))?;
    let replacement = format!("{}.${{1}}", entry.alias);
    Ok(re.replace_all(fragment, replacement.as_str()).into_owned())
}

fn compile_error(entry: &AliasEntry, message: &str) -> Error {
    Error::Compile(CompileError {
        alias: Some(entry.alias.clone()),
        message: message.to_string(),
    })
}
