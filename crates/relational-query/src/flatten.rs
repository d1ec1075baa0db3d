//! Flattening of collection trees into an ordered alias table.

use crate::collection::{Collection, Condition};
use std::collections::HashMap;

/// One table occurrence in a flattened tree.
#[derive(Debug, Clone, PartialEq)]
pub struct AliasEntry {
    /// Query-unique label: the table name, or `name{n}` for the n-th repeat
    pub alias: String,
    /// Table name of the node
    pub table: String,
    /// INNER (true) or LEFT (false) join
    pub required: bool,
    pub condition: Condition,
    /// Index of the entry this one is joined from
    pub parent: Option<usize>,
    /// Table name of the node continuing this one's chain
    pub next: Option<String>,
}

/// Tree nodes in join order with unique aliases.
///
/// A node is visited before its children, and its children (each with its
/// whole chain) before its continuation, so every parent precedes the
/// entries joined from it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AliasTable {
    entries: Vec<AliasEntry>,
}

impl AliasTable {
    pub fn flatten(root: &Collection) -> Self {
        let mut table = Self::default();
        let mut seen = HashMap::new();
        table.visit(root, None, &mut seen);
        table
    }

    fn visit(&mut self, node: &Collection, parent: Option<usize>, seen: &mut HashMap<String, usize>) {
        let count = seen.entry(node.name().to_string()).or_insert(0);
        *count += 1;
        let alias = if *count == 1 {
            node.name().to_string()
        } else {
            format!("{}{}", node.name(), count)
        };

        let index = self.entries.len();
        self.entries.push(AliasEntry {
            alias,
            table: node.name().to_string(),
            required: node.is_required(),
            condition: node.condition().clone(),
            parent,
            next: node.next_name().map(str::to_string),
        });

        for child in node.children() {
            self.visit(child, Some(index), seen);
        }
        if let Some(next) = node.next() {
            self.visit(next, Some(index), seen);
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&AliasEntry> {
        self.entries.get(index)
    }

    pub fn entries(&self) -> &[AliasEntry] {
        &self.entries
    }

    pub fn iter(&self) -> impl Iterator<Item = &AliasEntry> {
        self.entries.iter()
    }

    /// Entry the given entry is joined from.
    pub fn parent_of(&self, index: usize) -> Option<&AliasEntry> {
        self.entries
            .get(index)
            .and_then(|e| e.parent)
            .and_then(|p| self.entries.get(p))
    }

    pub fn position(&self, alias: &str) -> Option<usize> {
        self.entries.iter().position(|e| e.alias == alias)
    }

    pub fn aliases(&self) -> Vec<&str> {
        self.entries.iter().map(|e| e.alias.as_str()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(name: &str) -> Collection {
        Collection::new(name).unwrap()
    }

    #[test]
    fn single_node() {
        let table = AliasTable::flatten(&node("post"));
        assert_eq!(table.aliases(), vec!["post"]);
        assert_eq!(table.get(0).unwrap().parent, None);
    }

    #[test]
    fn repeated_names_are_numbered_from_two() {
        let tree = node("comment")
            .child(&node("post").then("author").unwrap())
            .then("author")
            .unwrap()
            .then("company")
            .unwrap();
        let table = AliasTable::flatten(&tree);
        assert_eq!(
            table.aliases(),
            vec!["comment", "post", "author", "author2", "company"]
        );
        let parents: Vec<_> = table.iter().map(|e| e.parent).collect();
        assert_eq!(parents, vec![None, Some(0), Some(1), Some(0), Some(3)]);
        assert_eq!(table.parent_of(3).unwrap().alias, "comment");
        assert!(!table.get(1).unwrap().required);
        assert!(table.get(2).unwrap().required);
    }

    #[test]
    fn three_occurrences() {
        let tree = node("category")
            .then("category")
            .unwrap()
            .then("category")
            .unwrap();
        let table = AliasTable::flatten(&tree);
        assert_eq!(table.aliases(), vec!["category", "category2", "category3"]);
        assert_eq!(table.position("category3"), Some(2));
    }

    #[test]
    fn records_continuation_names() {
        let tree = node("post").then("post_category").unwrap().then("category").unwrap();
        let table = AliasTable::flatten(&tree);
        let nexts: Vec<_> = table.iter().map(|e| e.next.as_deref()).collect();
        assert_eq!(nexts, vec![Some("post_category"), Some("category"), None]);
    }

    #[test]
    fn flattening_does_not_touch_the_tree() {
        let tree = node("comment").then("post").unwrap().filter(3);
        let before = tree.clone();
        let _ = AliasTable::flatten(&tree);
        assert_eq!(tree, before);
    }
}
