//! Collection trees: which tables a query touches and how they relate.
//!
//! A [`Collection`] names one table. It may continue into another table
//! (`next`, an INNER JOIN by default) and carry any number of optional
//! `children` (LEFT JOINs). Each node owns what hangs off it; parent links
//! are derived when the tree is flattened.
//!
//! ```
//! use relational_query::Collection;
//!
//! // comment -> post -> author, keeping only comment 5
//! let tree = Collection::with_condition("comment", 5)?
//!     .then("post")?
//!     .then("author")?;
//! assert_eq!(tree.next_name(), Some("post"));
//! # Ok::<(), relational_core::Error>(())
//! ```

use relational_core::{CollectionError, CollectionErrorKind, Error, Result, Value};
use regex::Regex;
use std::sync::OnceLock;

/// One filter entry of a mapping condition.
#[derive(Debug, Clone, PartialEq)]
pub enum ConditionEntry {
    /// `alias.column = ?`; the column may end with a comparison operator.
    Column(String, Value),
    /// Raw SQL; `table.column` references are rewritten to the node's alias.
    Raw(String),
}

/// Filter attached to a node.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Condition {
    #[default]
    None,
    /// Equality on the node's identifier column
    Scalar(Value),
    /// Column filters and raw fragments, AND-joined
    Map(Vec<ConditionEntry>),
}

impl Condition {
    pub fn is_none(&self) -> bool {
        match self {
            Condition::None => true,
            Condition::Scalar(_) => false,
            Condition::Map(entries) => entries.is_empty(),
        }
    }

    /// Mapping condition from `(column, value)` pairs.
    pub fn columns<K, V>(pairs: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<Value>,
    {
        Condition::Map(
            pairs
                .into_iter()
                .map(|(k, v)| ConditionEntry::Column(k.into(), v.into()))
                .collect(),
        )
    }

    /// Mapping condition from raw SQL fragments.
    pub fn raw<S: Into<String>>(fragments: impl IntoIterator<Item = S>) -> Self {
        Condition::Map(
            fragments
                .into_iter()
                .map(|f| ConditionEntry::Raw(f.into()))
                .collect(),
        )
    }
}

macro_rules! scalar_condition {
    ($($ty:ty),* $(,)?) => {
        $(
            impl From<$ty> for Condition {
                fn from(v: $ty) -> Self {
                    Condition::Scalar(Value::from(v))
                }
            }
        )*
    };
}

scalar_condition!(i32, i64, &str, String);

impl From<Value> for Condition {
    fn from(value: Value) -> Self {
        if value.is_null() {
            Condition::None
        } else {
            Condition::Scalar(value)
        }
    }
}

impl From<Vec<ConditionEntry>> for Condition {
    fn from(entries: Vec<ConditionEntry>) -> Self {
        Condition::Map(entries)
    }
}

impl<K: Into<String>, V: Into<Value>, const N: usize> From<[(K, V); N]> for Condition {
    fn from(pairs: [(K, V); N]) -> Self {
        Condition::columns(pairs)
    }
}

fn json_scalar(value: serde_json::Value) -> Option<Value> {
    match value {
        serde_json::Value::Null => Some(Value::Null),
        serde_json::Value::Bool(b) => Some(Value::Bool(b)),
        serde_json::Value::Number(n) => n
            .as_i64()
            .map(Value::BigInt)
            .or_else(|| n.as_f64().map(Value::Double)),
        serde_json::Value::String(s) => Some(Value::Text(s)),
        serde_json::Value::Array(_) | serde_json::Value::Object(_) => None,
    }
}

/// Scalars become identifier filters, flat objects become column filters
/// and flat arrays of strings become raw fragments. Anything nested is
/// rejected.
impl TryFrom<serde_json::Value> for Condition {
    type Error = Error;

    fn try_from(value: serde_json::Value) -> Result<Self> {
        match value {
            serde_json::Value::Object(map) => {
                let mut entries = Vec::with_capacity(map.len());
                for (key, value) in map {
                    let Some(scalar) = json_scalar(value) else {
                        return Err(Error::invalid_condition(
                            key,
                            "condition values must be scalars",
                        ));
                    };
                    entries.push(ConditionEntry::Column(key, scalar));
                }
                Ok(Condition::Map(entries))
            }
            serde_json::Value::Array(items) => {
                let mut entries = Vec::with_capacity(items.len());
                for (i, item) in items.into_iter().enumerate() {
                    match item {
                        serde_json::Value::String(fragment) => {
                            entries.push(ConditionEntry::Raw(fragment));
                        }
                        _ => {
                            return Err(Error::invalid_condition(
                                i.to_string(),
                                "positional conditions must be SQL fragments",
                            ));
                        }
                    }
                }
                Ok(Condition::Map(entries))
            }
            scalar => Ok(json_scalar(scalar).map_or(Condition::None, Condition::from)),
        }
    }
}

fn validate_name(name: &str) -> Result<()> {
    static IDENTIFIER: OnceLock<Option<Regex>> = OnceLock::new();
    let valid = IDENTIFIER
        .get_or_init(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").ok())
        .as_ref()
        .is_some_and(|re| re.is_match(name));
    if valid {
        Ok(())
    } else {
        Err(Error::Collection(CollectionError {
            kind: CollectionErrorKind::InvalidName,
            name: name.to_string(),
            message: "collection names must be plain identifiers".to_string(),
        }))
    }
}

/// A node of a collection tree.
#[derive(Debug, Clone, PartialEq)]
pub struct Collection {
    name: String,
    condition: Condition,
    required: bool,
    next: Option<Box<Collection>>,
    children: Vec<Collection>,
}

impl Collection {
    /// A required node with no condition.
    pub fn new(name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        validate_name(&name)?;
        Ok(Self {
            name,
            condition: Condition::None,
            required: true,
            next: None,
            children: Vec::new(),
        })
    }

    pub fn with_condition(name: impl Into<String>, condition: impl Into<Condition>) -> Result<Self> {
        let mut node = Self::new(name)?;
        node.condition = condition.into();
        Ok(node)
    }

    fn last_mut(&mut self) -> &mut Collection {
        match self.next {
            Some(ref mut next) => next.last_mut(),
            None => self,
        }
    }

    /// Continue the chain with a required node named `name`.
    pub fn then(self, name: impl Into<String>) -> Result<Self> {
        let next = Collection::new(name)?;
        Ok(self.then_collection(next))
    }

    /// Continue the chain with a pre-built node (and whatever hangs off it).
    pub fn then_collection(mut self, next: Collection) -> Self {
        self.last_mut().next = Some(Box::new(next));
        self
    }

    /// Attach a copy of `child` as an optional branch of the last node.
    pub fn child(mut self, child: &Collection) -> Self {
        let mut copy = child.clone();
        copy.required = false;
        self.last_mut().children.push(copy);
        self
    }

    /// Set the condition of the last node in the chain.
    pub fn filter(mut self, condition: impl Into<Condition>) -> Self {
        self.last_mut().condition = condition.into();
        self
    }

    /// Override the join kind of the last node in the chain.
    pub fn required(mut self, required: bool) -> Self {
        self.last_mut().required = required;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn condition(&self) -> &Condition {
        &self.condition
    }

    pub fn is_required(&self) -> bool {
        self.required
    }

    pub fn next(&self) -> Option<&Collection> {
        self.next.as_deref()
    }

    pub fn children(&self) -> &[Collection] {
        &self.children
    }

    pub fn has_children(&self) -> bool {
        !self.children.is_empty()
    }

    pub fn has_next(&self) -> bool {
        self.next.is_some()
    }

    /// Whether anything is joined from this node.
    pub fn has_more(&self) -> bool {
        self.has_children() || self.has_next()
    }

    pub fn next_name(&self) -> Option<&str> {
        self.next.as_deref().map(Collection::name)
    }

    /// Last node of the chain starting here.
    pub fn last(&self) -> &Collection {
        match self.next.as_deref() {
            Some(next) => next.last(),
            None => self,
        }
    }
}
