//! Composable SQL statement builder.
//!
//! [`Sql`] accumulates keyword operations and positional `?` parameters.
//! Every operation consumes and returns the builder, so statements read top
//! to bottom:
//!
//! ```
//! use relational_query::Sql;
//!
//! let sql = Sql::new()
//!     .select("*")
//!     .from("post")
//!     .r#where([("author_id", 3)]);
//! assert_eq!(sql.to_string(), "SELECT * FROM post WHERE author_id = ?");
//! assert_eq!(sql.params().len(), 1);
//! ```
//!
//! Operation names are turned into keywords by splitting camelCase or
//! snake_case words (`insertInto` and `insert_into` both render
//! `INSERT INTO`). Underscores around a name control grouping:
//!
//! - `_select` opens a parenthesis before the keyword: `(SELECT ...`
//! - `and_` opens one after it: `AND (...`
//! - `_` closes the innermost open group
//!
//! Nested [`Sql`] values are parenthesized where they appear and their
//! parameters are spliced into the outer list in occurrence order.

use relational_core::Value;
use regex::Regex;
use std::fmt;
use std::sync::OnceLock;

/// Right-hand side of a parameterized part.
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    /// Bound as a `?` placeholder
    Value(Value),
    /// Rendered inline, parenthesized, with its params merged
    Sql(Sql),
}

impl From<Value> for Operand {
    fn from(value: Value) -> Self {
        Operand::Value(value)
    }
}

impl From<Sql> for Operand {
    fn from(sql: Sql) -> Self {
        Operand::Sql(sql)
    }
}

macro_rules! operand_from_value {
    ($($ty:ty),* $(,)?) => {
        $(
            impl From<$ty> for Operand {
                fn from(v: $ty) -> Self {
                    Operand::Value(Value::from(v))
                }
            }
        )*
    };
}

operand_from_value!(bool, i32, i64, f64, String, &str, Option<i64>, Option<String>);

/// One argument of an operation.
#[derive(Debug, Clone, PartialEq)]
pub enum Part {
    /// Literal SQL text (identifiers, expressions, keywords)
    Raw(String),
    /// A positional value or nested statement
    Param(Operand),
    /// `key` with a value; rendering depends on the operation
    Pair(String, Operand),
}

impl Part {
    pub fn raw(text: impl Into<String>) -> Self {
        Part::Raw(text.into())
    }

    pub fn param(value: impl Into<Operand>) -> Self {
        Part::Param(value.into())
    }

    pub fn pair(key: impl Into<String>, value: impl Into<Operand>) -> Self {
        Part::Pair(key.into(), value.into())
    }
}

/// Conversion of operation arguments into a flat list of [`Part`]s.
pub trait IntoParts {
    fn into_parts(self) -> Vec<Part>;
}

impl IntoParts for () {
    fn into_parts(self) -> Vec<Part> {
        Vec::new()
    }
}

impl IntoParts for &str {
    fn into_parts(self) -> Vec<Part> {
        vec![Part::raw(self)]
    }
}

impl IntoParts for String {
    fn into_parts(self) -> Vec<Part> {
        vec![Part::Raw(self)]
    }
}

impl IntoParts for Sql {
    fn into_parts(self) -> Vec<Part> {
        vec![Part::Param(Operand::Sql(self))]
    }
}

impl IntoParts for Part {
    fn into_parts(self) -> Vec<Part> {
        vec![self]
    }
}

impl IntoParts for Vec<Part> {
    fn into_parts(self) -> Vec<Part> {
        self
    }
}

impl<const N: usize> IntoParts for [&str; N] {
    fn into_parts(self) -> Vec<Part> {
        self.into_iter().map(Part::raw).collect()
    }
}

impl IntoParts for Vec<&str> {
    fn into_parts(self) -> Vec<Part> {
        self.into_iter().map(Part::raw).collect()
    }
}

impl IntoParts for Vec<String> {
    fn into_parts(self) -> Vec<Part> {
        self.into_iter().map(Part::Raw).collect()
    }
}

impl<const N: usize> IntoParts for [Value; N] {
    fn into_parts(self) -> Vec<Part> {
        self.into_iter().map(Part::param).collect()
    }
}

impl IntoParts for Vec<Value> {
    fn into_parts(self) -> Vec<Part> {
        self.into_iter().map(Part::param).collect()
    }
}

impl<K, V, const N: usize> IntoParts for [(K, V); N]
where
    K: Into<String>,
    V: Into<Operand>,
{
    fn into_parts(self) -> Vec<Part> {
        self.into_iter().map(|(k, v)| Part::pair(k, v)).collect()
    }
}

impl<K, V> IntoParts for Vec<(K, V)>
where
    K: Into<String>,
    V: Into<Operand>,
{
    fn into_parts(self) -> Vec<Part> {
        self.into_iter().map(|(k, v)| Part::pair(k, v)).collect()
    }
}

/// How an operation lays out its parts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Layout {
    /// `key = ?` pairs joined by the separator
    Conditions(&'static str),
    /// `key = ?` pairs joined by `, `
    Assignments,
    /// `key = value` with unparameterized values, joined by ` AND `
    On,
    /// `(?, ?, ...)`
    List,
    /// `table (a, b, ...)`
    TableColumns,
    /// `table a, b, ...`
    TableClauses,
    /// `expr` or `expr AS alias`
    Projection,
    /// Keyword alone is meaningful (`ASC`, `DESC`, `DEFAULT`)
    KeywordOnly,
    /// Comma-joined parts
    Plain,
}

impl Layout {
    fn of(operation: &str) -> Self {
        let key: String = operation
            .chars()
            .filter(|c| *c != '_')
            .map(|c| c.to_ascii_lowercase())
            .collect();
        match key.as_str() {
            "where" | "having" | "and" | "between" => Layout::Conditions(" AND "),
            "or" => Layout::Conditions(" OR "),
            "set" => Layout::Assignments,
            "on" => Layout::On,
            "in" | "values" => Layout::List,
            "insertinto" | "replaceinto" | "createtable" => Layout::TableColumns,
            "altertable" => Layout::TableClauses,
            "select" | "selectdistinct" => Layout::Projection,
            "asc" | "desc" | "default" => Layout::KeywordOnly,
            _ => Layout::Plain,
        }
    }
}

/// `updated_at >`, `name LIKE`: the key carries its own comparison.
fn has_operator(key: &str) -> bool {
    static OPERATOR: OnceLock<Option<Regex>> = OnceLock::new();
    OPERATOR
        .get_or_init(|| Regex::new(r"(?i)(?:[=<>]|\bLIKE)\s*$").ok())
        .as_ref()
        .is_some_and(|re| re.is_match(key))
}

/// Whether the whole of `text` sits inside one outer pair of parentheses.
///
/// Parentheses inside single-quoted literals are ignored.
fn is_parenthesized(text: &str) -> bool {
    if !(text.starts_with('(') && text.ends_with(')')) {
        return false;
    }
    let mut depth = 0_usize;
    let mut quoted = false;
    for (i, c) in text.char_indices() {
        match c {
            '\'' => quoted = !quoted,
            '(' if !quoted => depth += 1,
            ')' if !quoted => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    return i == text.len() - 1;
                }
            }
            _ => {}
        }
    }
    false
}

/// `insertInto` / `insert_into` -> `INSERT INTO`.
fn keyword(name: &str) -> String {
    let mut out = String::with_capacity(name.len() + 4);
    let mut prev_lower = false;
    for c in name.chars() {
        if c == '_' || c == ' ' {
            if !out.is_empty() && !out.ends_with(' ') {
                out.push(' ');
            }
            prev_lower = false;
            continue;
        }
        if (c.is_ascii_uppercase() || c.is_ascii_digit()) && prev_lower {
            out.push(' ');
        }
        prev_lower = c.is_ascii_lowercase();
        out.push(c.to_ascii_uppercase());
    }
    out.truncate(out.trim_end().len());
    out
}

/// An SQL statement under construction: text plus positional parameters.
///
/// Invariant: every `?` in the text has exactly one entry in `params()`, in
/// left-to-right order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Sql {
    query: String,
    params: Vec<Value>,
}

impl Sql {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from literal SQL text.
    pub fn raw(text: impl Into<String>) -> Self {
        let mut query = text.into();
        if !query.is_empty() {
            query.push(' ');
        }
        Self {
            query,
            params: Vec::new(),
        }
    }

    /// A grouped sub-select: `(SELECT parts ...`; finish it with [`Sql::close`].
    pub fn sub_select(parts: impl IntoParts) -> Self {
        Self::new().op("_select", parts)
    }

    /// Apply a named operation.
    ///
    /// Operations whose parts are empty are skipped, except for keyword-only
    /// operations and grouping markers, so optional clauses can be chained
    /// unconditionally.
    pub fn op(mut self, name: &str, parts: impl IntoParts) -> Self {
        if name == "_" {
            return self.close();
        }
        let open_before = name.starts_with('_');
        let open_after = name.len() > 1 && name.ends_with('_');
        let bare = name.trim_matches('_');
        let layout = Layout::of(bare);
        let parts = parts.into_parts();

        if parts.is_empty() && layout != Layout::KeywordOnly && !open_before && !open_after {
            return self;
        }

        if open_before {
            self.query.push('(');
        }
        self.query.push_str(&keyword(bare));
        self.query.push_str(if open_after { " (" } else { " " });

        let rendered = match layout {
            Layout::Conditions(glue) => self.render_conditions(parts, glue),
            Layout::Assignments => self.render_conditions(parts, ", "),
            Layout::On => self.render_on(parts),
            Layout::List => self.render_list(parts),
            Layout::TableColumns => self.render_table(parts, true),
            Layout::TableClauses => self.render_table(parts, false),
            Layout::Projection => self.render_projection(parts),
            Layout::KeywordOnly | Layout::Plain => self.render_plain(parts),
        };
        if !rendered.is_empty() {
            self.query.push_str(&rendered);
            self.query.push(' ');
        }
        self
    }

    /// Close the innermost open group.
    pub fn close(mut self) -> Self {
        self.query.truncate(self.query.trim_end().len());
        self.query.push_str(") ");
        self
    }

    /// `WHERE (parts ...`
    pub fn where_group(self, parts: impl IntoParts) -> Self {
        self.op("where_", parts)
    }

    /// `AND (parts ...`
    pub fn and_group(self, parts: impl IntoParts) -> Self {
        self.op("and_", parts)
    }

    /// `OR (parts ...`
    pub fn or_group(self, parts: impl IntoParts) -> Self {
        self.op("or_", parts)
    }

    pub fn asc(self) -> Self {
        self.op("asc", ())
    }

    pub fn desc(self) -> Self {
        self.op("desc", ())
    }

    pub fn limit(self, count: u64) -> Self {
        self.op("limit", count.to_string())
    }

    pub fn offset(self, count: u64) -> Self {
        self.op("offset", count.to_string())
    }

    /// Replace the accumulated text and parameters.
    pub fn set_query(&mut self, text: impl Into<String>, params: Vec<Value>) -> &mut Self {
        self.query = text.into();
        self.params = params;
        self
    }

    /// Append caller-supplied SQL text and its parameters.
    pub fn append_raw(mut self, text: &str, params: impl IntoIterator<Item = Value>) -> Self {
        let text = text.trim();
        if !text.is_empty() {
            if !self.query.is_empty() && !self.query.ends_with(' ') {
                self.query.push(' ');
            }
            self.query.push_str(text);
            self.query.push(' ');
        }
        self.params.extend(params);
        self
    }

    /// Append another statement, keeping its placeholders in order.
    pub fn append(self, other: &Sql) -> Self {
        let text = other.to_string();
        self.append_raw(&text, other.params.iter().cloned())
    }

    pub fn params(&self) -> &[Value] {
        &self.params
    }

    pub fn is_empty(&self) -> bool {
        self.query.trim().is_empty()
    }

    /// Rendered text and parameters.
    pub fn build(self) -> (String, Vec<Value>) {
        let text = self.to_string();
        (text, self.params)
    }

    fn render_operand(&mut self, operand: Operand) -> String {
        match operand {
            Operand::Value(value) => {
                self.params.push(value);
                "?".to_string()
            }
            Operand::Sql(sql) => self.render_nested(sql),
        }
    }

    fn render_nested(&mut self, sql: Sql) -> String {
        let text = sql.to_string();
        self.params.extend(sql.params);
        if is_parenthesized(&text) {
            text
        } else {
            format!("({text})")
        }
    }

    fn render_conditions(&mut self, parts: Vec<Part>, glue: &str) -> String {
        let rendered: Vec<String> = parts
            .into_iter()
            .map(|part| match part {
                Part::Raw(text) => text,
                Part::Param(operand) => self.render_operand(operand),
                Part::Pair(key, operand) => {
                    let rhs = self.render_operand(operand);
                    if has_operator(&key) {
                        format!("{key} {rhs}")
                    } else {
                        format!("{key} = {rhs}")
                    }
                }
            })
            .collect();
        rendered.join(glue)
    }

    fn render_on(&mut self, parts: Vec<Part>) -> String {
        let rendered: Vec<String> = parts
            .into_iter()
            .map(|part| match part {
                Part::Raw(text) => text,
                Part::Param(operand) => self.render_operand(operand),
                Part::Pair(key, Operand::Value(value)) => format!("{key} = {value}"),
                Part::Pair(key, Operand::Sql(sql)) => {
                    format!("{key} = {}", self.render_nested(sql))
                }
            })
            .collect();
        rendered.join(" AND ")
    }

    fn render_list(&mut self, parts: Vec<Part>) -> String {
        if let [Part::Param(Operand::Sql(_))] = parts.as_slice() {
            return self.render_plain(parts);
        }
        format!("({})", self.render_plain(parts))
    }

    fn render_table(&mut self, parts: Vec<Part>, parenthesize: bool) -> String {
        let mut parts = parts.into_iter();
        let Some(first) = parts.next() else {
            return String::new();
        };
        let table = self.render_plain(vec![first]);
        let rest = self.render_plain(parts.collect());
        match (rest.is_empty(), parenthesize) {
            (true, _) => table,
            (false, true) => format!("{table} ({rest})"),
            (false, false) => format!("{table} {rest}"),
        }
    }

    fn render_projection(&mut self, parts: Vec<Part>) -> String {
        let rendered: Vec<String> = parts
            .into_iter()
            .map(|part| match part {
                Part::Raw(text) => text,
                Part::Param(operand) => self.render_operand(operand),
                Part::Pair(alias, Operand::Value(expr)) => format!("{expr} AS {alias}"),
                Part::Pair(alias, Operand::Sql(sql)) => {
                    format!("{} AS {alias}", self.render_nested(sql))
                }
            })
            .collect();
        rendered.join(", ")
    }

    fn render_plain(&mut self, parts: Vec<Part>) -> String {
        let rendered: Vec<String> = parts
            .into_iter()
            .map(|part| match part {
                Part::Raw(text) => text,
                Part::Param(operand) => self.render_operand(operand),
                Part::Pair(key, _) => key,
            })
            .collect();
        rendered.join(", ")
    }
}

macro_rules! operations {
    ($($method:ident => $name:literal),* $(,)?) => {
        impl Sql {
            $(
                #[doc = concat!("`", $name, "` operation.")]
                pub fn $method(self, parts: impl IntoParts) -> Self {
                    self.op($name, parts)
                }
            )*
        }
    };
}

operations! {
    select => "select",
    select_distinct => "selectDistinct",
    from => "from",
    inner_join => "innerJoin",
    left_join => "leftJoin",
    on => "on",
    r#where => "where",
    and => "and",
    or => "or",
    between => "between",
    r#in => "in",
    values => "values",
    set => "set",
    update => "update",
    delete_from => "deleteFrom",
    insert_into => "insertInto",
    replace_into => "replaceInto",
    create_table => "createTable",
    alter_table => "alterTable",
    group_by => "groupBy",
    having => "having",
    order_by => "orderBy",
    r#as => "as",
    grant => "grant",
    revoke => "revoke",
    to => "to",
}

impl fmt::Display for Sql {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.query.trim_end())
    }
}
