//! Engine policy configuration
//!
//! Every field has a default, so a YAML file only needs to name the values
//! it overrides:
//!
//! ```yaml
//! max_tags_per_entity: 12
//! retention_days: 60
//! ```

use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use std::path::Path;
use thiserror::Error;

/// Longest accepted retention window, about a century
pub const MAX_RETENTION_DAYS: i64 = 36_500;

/// Errors that can occur while loading configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Tunable limits and windows for a `WeaveEngine`
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    /// Maximum number of tags on one content entity
    pub max_tags_per_entity: usize,
    /// Days a soft-deleted entity is kept before it may be purged
    pub retention_days: i64,
    pub tag_name_min_len: usize,
    pub tag_name_max_len: usize,
    /// Normalized names that may not be used as tags
    pub reserved_tag_names: Vec<String>,
    pub title_min_len: usize,
    pub title_max_len: usize,
    pub body_min_len: usize,
    pub body_max_len: usize,
    pub world_title_min_len: usize,
    pub world_title_max_len: usize,
    pub alt_text_max_len: usize,
    pub caption_max_len: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_tags_per_entity: 10,
            retention_days: 30,
            tag_name_min_len: 2,
            tag_name_max_len: 100,
            reserved_tag_names: ["admin", "system", "api", "null", "undefined", "delete", "edit"]
                .into_iter()
                .map(String::from)
                .collect(),
            title_min_len: 3,
            title_max_len: 300,
            body_min_len: 10,
            body_max_len: 50_000,
            world_title_min_len: 3,
            world_title_max_len: 200,
            alt_text_max_len: 200,
            caption_max_len: 500,
        }
    }
}

impl EngineConfig {
    /// Parse a YAML document, filling unspecified fields with defaults
    pub fn from_yaml_str(yaml: &str) -> Result<Self, ConfigError> {
        // An empty document deserializes to unit, not to a map
        if yaml.trim().is_empty() {
            return Ok(Self::default());
        }
        let config: EngineConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a YAML configuration file
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&text)
    }

    /// Override the retention window, subject to the same checks as a file
    pub fn with_retention_days(mut self, days: i64) -> Result<Self, ConfigError> {
        self.retention_days = days;
        self.validate()?;
        Ok(self)
    }

    /// Retention window as a duration
    ///
    /// Saturates for values built by hand past what a file would accept.
    pub fn retention(&self) -> Duration {
        Duration::try_days(self.retention_days.max(0)).unwrap_or(Duration::MAX)
    }

    /// First instant at which content soft-deleted at `deleted_at` may be purged
    pub fn purge_eligible_at(&self, deleted_at: DateTime<Utc>) -> DateTime<Utc> {
        deleted_at
            .checked_add_signed(self.retention())
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if !(0..=MAX_RETENTION_DAYS).contains(&self.retention_days) {
            return Err(ConfigError::Invalid(format!(
                "retention_days must be between 0 and {MAX_RETENTION_DAYS}"
            )));
        }
        if self.max_tags_per_entity == 0 {
            return Err(ConfigError::Invalid("max_tags_per_entity must be at least 1".into()));
        }
        let ranges = [
            ("tag_name", self.tag_name_min_len, self.tag_name_max_len),
            ("title", self.title_min_len, self.title_max_len),
            ("body", self.body_min_len, self.body_max_len),
            ("world_title", self.world_title_min_len, self.world_title_max_len),
        ];
        for (name, min, max) in ranges {
            if min > max {
                return Err(ConfigError::Invalid(format!("{name}_min_len exceeds {name}_max_len")));
            }
        }
        Ok(())
    }
}
