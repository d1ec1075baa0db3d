use super::{
    Standard, Style, camel_case_to_separator, map_last_piece, plural_to_singular,
    separator_to_camel_case, singular_to_plural, upper_first,
};

/// Plural tables (`post_categories`), singular foreign keys (`post_id`).
#[derive(Debug, Clone, Copy, Default)]
pub struct CakePhp;

impl Style for CakePhp {
    fn styled_name(&self, table: &str) -> String {
        let singular = map_last_piece(table, plural_to_singular);
        upper_first(&separator_to_camel_case(&singular, "_"))
    }

    fn real_name(&self, entity: &str) -> String {
        let table = camel_case_to_separator(entity, "_").to_lowercase();
        map_last_piece(&table, singular_to_plural)
    }

    fn styled_property(&self, column: &str) -> String {
        Standard.styled_property(column)
    }

    fn real_property(&self, property: &str) -> String {
        Standard.real_property(property)
    }

    fn identifier(&self, table: &str) -> String {
        Standard.identifier(table)
    }

    fn remote_identifier(&self, table: &str) -> String {
        format!("{}_id", plural_to_singular(table))
    }

    fn is_remote_identifier(&self, column: &str) -> bool {
        Standard.is_remote_identifier(column)
    }

    fn remote_from_identifier(&self, column: &str) -> Option<String> {
        Standard
            .remote_from_identifier(column)
            .map(|singular| singular_to_plural(&singular))
    }

    fn composed(&self, left: &str, right: &str) -> String {
        format!("{left}_{}", map_last_piece(right, singular_to_plural))
    }
}
