//! Mapper configuration.

use relational_core::{ConfigError, Error, Result, StyleKind};
use serde::{Deserialize, Serialize};

/// Behavior switches for a [`Mapper`](crate::Mapper).
///
/// Every field has a default, so a partial JSON document is enough:
///
/// ```
/// use relational_session::MapperConfig;
/// use relational_core::StyleKind;
///
/// let config = MapperConfig::from_json(r#"{"style": "sakila"}"#)?;
/// assert_eq!(config.style, StyleKind::Sakila);
/// assert!(config.identity_map);
/// # Ok::<(), relational_core::Error>(())
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MapperConfig {
    /// Naming convention
    pub style: StyleKind,
    /// Reuse tracked instances for rows whose `(table, id)` is already known
    pub identity_map: bool,
    /// Register fetched entities with the tracker
    pub track_fetched: bool,
    /// Check driver-reported source tables while hydrating
    pub verify_source_tables: bool,
}

impl Default for MapperConfig {
    fn default() -> Self {
        Self {
            style: StyleKind::Standard,
            identity_map: true,
            track_fetched: true,
            verify_source_tables: true,
        }
    }
}

impl MapperConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| {
            Error::Config(ConfigError {
                message: format!("invalid mapper configuration: {e}"),
                source: Some(Box::new(e)),
            })
        })
    }

    pub fn style(mut self, style: StyleKind) -> Self {
        self.style = style;
        self
    }

    pub fn identity_map(mut self, enabled: bool) -> Self {
        self.identity_map = enabled;
        self
    }

    pub fn track_fetched(mut self, enabled: bool) -> Self {
        self.track_fetched = enabled;
        self
    }

    pub fn verify_source_tables(mut self, enabled: bool) -> Self {
        self.verify_source_tables = enabled;
        self
    }
}
