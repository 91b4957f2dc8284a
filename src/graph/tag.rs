//! World-scoped tags and tag name normalization

use super::ids::{TagId, WorldId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A tag in a world's vocabulary
///
/// `name` is the normalized key that uniqueness is enforced on;
/// `display_name` is the spelling first submitted for that key and is never
/// rewritten afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tag {
    pub id: TagId,
    pub world_id: WorldId,
    pub name: String,
    pub display_name: String,
    pub created_at: DateTime<Utc>,
}

impl Tag {
    /// Create a tag from an already-normalized name
    pub fn new(world_id: WorldId, name: &TagName) -> Self {
        Self {
            id: TagId::new(),
            world_id,
            name: name.key.clone(),
            display_name: name.display.clone(),
            created_at: super::now(),
        }
    }
}

/// A tag name after normalization
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TagName {
    /// Lowercase key with word separators collapsed to `-`
    pub key: String,
    /// Trimmed submission with internal whitespace collapsed
    pub display: String,
}

impl TagName {
    /// Normalize a raw tag name
    ///
    /// Returns `None` when nothing but whitespace and separators remain.
    /// `"Magic"`, `"magic"` and `" magic "` all share the key `magic`;
    /// `"Ancient  Ruins"`, `"ancient_ruins"` and `"ancient-ruins"` share
    /// `ancient-ruins`.
    pub fn normalize(raw: &str) -> Option<Self> {
        let key = raw
            .split(|c: char| c.is_whitespace() || c == '_' || c == '-')
            .filter(|word| !word.is_empty())
            .map(|word| word.to_lowercase())
            .collect::<Vec<_>>()
            .join("-");
        if key.is_empty() {
            return None;
        }
        let display = raw.split_whitespace().collect::<Vec<_>>().join(" ");
        Some(Self { key, display })
    }
}

impl std::fmt::Display for TagName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.key)
    }
}
