//! Naming conventions that connect tables, columns and entity types.
//!
//! The compiler uses a [`Style`] to derive join predicates and to recognize
//! junction tables; the hydrator uses it to map columns to properties and to
//! find which foreign-key columns point at which table.

mod cakephp;
mod northwind;
mod sakila;
mod standard;

pub use cakephp::CakePhp;
pub use northwind::NorthWind;
pub use sakila::Sakila;
pub use standard::Standard;

use crate::error::{ConfigError, Error};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A naming convention.
pub trait Style: fmt::Debug {
    /// Entity type name for a table (`post_category` -> `PostCategory`).
    fn styled_name(&self, table: &str) -> String;

    /// Table name for an entity type name.
    fn real_name(&self, entity: &str) -> String;

    /// Property name for a column.
    fn styled_property(&self, column: &str) -> String;

    /// Column name for a property.
    fn real_property(&self, property: &str) -> String;

    /// Primary key column of a table.
    fn identifier(&self, table: &str) -> String;

    /// Foreign key column that conventionally points at `table`.
    fn remote_identifier(&self, table: &str) -> String;

    /// Whether a column looks like a foreign key.
    fn is_remote_identifier(&self, column: &str) -> bool;

    /// Table a foreign key column points at.
    fn remote_from_identifier(&self, column: &str) -> Option<String>;

    /// Junction table name for a many-to-many between `left` and `right`.
    fn composed(&self, left: &str, right: &str) -> String;
}

/// Built-in conventions, selectable from configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StyleKind {
    #[default]
    Standard,
    CakePhp,
    NorthWind,
    Sakila,
}

impl StyleKind {
    pub fn build(self) -> Box<dyn Style> {
        match self {
            StyleKind::Standard => Box::new(Standard),
            StyleKind::CakePhp => Box::new(CakePhp),
            StyleKind::NorthWind => Box::new(NorthWind),
            StyleKind::Sakila => Box::new(Sakila),
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            StyleKind::Standard => "standard",
            StyleKind::CakePhp => "cakephp",
            StyleKind::NorthWind => "northwind",
            StyleKind::Sakila => "sakila",
        }
    }
}

impl FromStr for StyleKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "standard" => Ok(StyleKind::Standard),
            "cakephp" | "cake_php" => Ok(StyleKind::CakePhp),
            "northwind" | "north_wind" => Ok(StyleKind::NorthWind),
            "sakila" => Ok(StyleKind::Sakila),
            other => Err(Error::Config(ConfigError {
                message: format!("unknown style '{}'", other),
                source: None,
            })),
        }
    }
}

impl fmt::Display for StyleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `AugustoPascutti` -> `Augusto_Pascutti` (separator before an uppercase
/// letter that follows a lowercase one).
pub fn camel_case_to_separator(name: &str, separator: &str) -> String {
    let mut out = String::with_capacity(name.len() + 4);
    let mut prev_lower = false;
    for c in name.chars() {
        if c.is_ascii_uppercase() && prev_lower {
            out.push_str(separator);
        }
        prev_lower = c.is_ascii_lowercase();
        out.push(c);
    }
    out
}

/// `Augusto_Pascutti` -> `AugustoPascutti`; a separator followed by a letter
/// is dropped and the letter uppercased.
pub fn separator_to_camel_case(name: &str, separator: &str) -> String {
    if separator.is_empty() {
        return name.to_string();
    }
    let mut out = String::with_capacity(name.len());
    let mut rest = name;
    while let Some(pos) = rest.find(separator) {
        out.push_str(&rest[..pos]);
        let after = &rest[pos + separator.len()..];
        match after.chars().next() {
            Some(c) if c.is_ascii_alphabetic() => {
                out.push(c.to_ascii_uppercase());
                rest = &after[c.len_utf8()..];
            }
            _ => {
                out.push_str(separator);
                rest = after;
            }
        }
    }
    out.push_str(rest);
    out
}

/// `categories` -> `category`, `posts` -> `post`.
pub fn plural_to_singular(name: &str) -> String {
    if let Some(stem) = name.strip_suffix("ies").filter(|s| !s.is_empty()) {
        return format!("{stem}y");
    }
    if let Some(stem) = name.strip_suffix('s').filter(|s| !s.is_empty()) {
        return stem.to_string();
    }
    name.to_string()
}

/// `category` -> `categories`, `post` -> `posts`; words ending in `s` stay.
pub fn singular_to_plural(name: &str) -> String {
    if let Some(stem) = name.strip_suffix('y').filter(|s| !s.is_empty()) {
        return format!("{stem}ies");
    }
    if name.chars().count() >= 2 && !name.ends_with('s') {
        return format!("{name}s");
    }
    name.to_string()
}

pub(crate) fn upper_first(name: &str) -> String {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Apply `f` to the last `_`-separated piece of `name`.
pub(crate) fn map_last_piece(name: &str, f: impl Fn(&str) -> String) -> String {
    match name.rsplit_once('_') {
        Some((head, last)) => format!("{head}_{}", f(last)),
        None => f(name),
    }
}
