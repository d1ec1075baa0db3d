use super::{Standard, Style};

/// Singular snake_case tables where the primary key is `{table}_id`, the
/// same name every referencing table uses for its foreign key.
#[derive(Debug, Clone, Copy, Default)]
pub struct Sakila;

impl Style for Sakila {
    fn styled_name(&self, table: &str) -> String {
        Standard.styled_name(table)
    }

    fn real_name(&self, entity: &str) -> String {
        Standard.real_name(entity)
    }

    fn styled_property(&self, column: &str) -> String {
        column.to_string()
    }

    fn real_property(&self, property: &str) -> String {
        property.to_string()
    }

    fn identifier(&self, table: &str) -> String {
        self.remote_identifier(table)
    }

    fn remote_identifier(&self, table: &str) -> String {
        format!("{table}_id")
    }

    fn is_remote_identifier(&self, column: &str) -> bool {
        Standard.is_remote_identifier(column)
    }

    fn remote_from_identifier(&self, column: &str) -> Option<String> {
        Standard.remote_from_identifier(column)
    }

    fn composed(&self, left: &str, right: &str) -> String {
        format!("{left}_{right}")
    }
}
