use super::{Style, plural_to_singular, singular_to_plural};

/// PascalCase plural tables (`Categories`) keyed by `CategoryID`.
#[derive(Debug, Clone, Copy, Default)]
pub struct NorthWind;

impl Style for NorthWind {
    fn styled_name(&self, table: &str) -> String {
        table.to_string()
    }

    fn real_name(&self, entity: &str) -> String {
        entity.to_string()
    }

    fn styled_property(&self, column: &str) -> String {
        column.to_string()
    }

    fn real_property(&self, property: &str) -> String {
        property.to_string()
    }

    fn identifier(&self, table: &str) -> String {
        format!("{}ID", plural_to_singular(table))
    }

    fn remote_identifier(&self, table: &str) -> String {
        self.identifier(table)
    }

    fn is_remote_identifier(&self, column: &str) -> bool {
        column.len() > 2 && column.ends_with("ID")
    }

    fn remote_from_identifier(&self, column: &str) -> Option<String> {
        if self.is_remote_identifier(column) {
            Some(singular_to_plural(&column[..column.len() - 2]))
        } else {
            None
        }
    }

    fn composed(&self, left: &str, right: &str) -> String {
        format!("{}{right}", plural_to_singular(left))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_are_untouched() {
        let style = NorthWind;
        for name in ["Posts", "Comments", "Categories", "PostCategories", "PostTags"] {
            assert_eq!(style.styled_name(name), name);
            assert_eq!(style.real_name(name), name);
        }
    }

    #[test]
    fn columns_map_to_themselves() {
        let style = NorthWind;
        for column in ["GroupID", "PostID", "CreatorID", "Text", "Created"] {
            assert_eq!(style.styled_property(column), column);
            assert_eq!(style.real_property(column), column);
        }
        assert!(!style.is_remote_identifier("Text"));
        assert!(!style.is_remote_identifier("ID"));
    }

    #[test]
    fn junction_names() {
        let style = NorthWind;
        assert_eq!(style.composed("Posts", "Categories"), "PostCategories");
        assert_eq!(style.composed("Users", "Groups"), "UserGroups");
        assert_eq!(style.composed("Groups", "Profiles"), "GroupProfiles");
    }

    #[test]
    fn keys() {
        let style = NorthWind;
        for (table, key) in [
            ("Posts", "PostID"),
            ("Authors", "AuthorID"),
            ("Tags", "TagID"),
            ("Users", "UserID"),
        ] {
            assert_eq!(style.identifier(table), key);
            assert_eq!(style.remote_identifier(table), key);
            assert_eq!(style.remote_from_identifier(key).as_deref(), Some(table));
        }
    }
}
