use super::{Style, camel_case_to_separator, separator_to_camel_case, upper_first};

/// Singular snake_case tables, `id` primary keys and `{table}_id` foreign keys.
#[derive(Debug, Clone, Copy, Default)]
pub struct Standard;

impl Style for Standard {
    fn styled_name(&self, table: &str) -> String {
        upper_first(&separator_to_camel_case(table, "_"))
    }

    fn real_name(&self, entity: &str) -> String {
        camel_case_to_separator(entity, "_").to_lowercase()
    }

    fn styled_property(&self, column: &str) -> String {
        column.to_string()
    }

    fn real_property(&self, property: &str) -> String {
        property.to_string()
    }

    fn identifier(&self, _table: &str) -> String {
        "id".to_string()
    }

    fn remote_identifier(&self, table: &str) -> String {
        format!("{table}_id")
    }

    fn is_remote_identifier(&self, column: &str) -> bool {
        column.len() > 3 && column.to_ascii_lowercase().ends_with("_id")
    }

    fn remote_from_identifier(&self, column: &str) -> Option<String> {
        if self.is_remote_identifier(column) {
            Some(column[..column.len() - 3].to_string())
        } else {
            None
        }
    }

    fn composed(&self, left: &str, right: &str) -> String {
        format!("{left}_{right}")
    }
}
