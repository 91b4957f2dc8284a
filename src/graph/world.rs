//! World: an isolated collaborative namespace, and the users who contribute to it

use super::ids::{UserId, WorldId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A registered contributor
///
/// Authentication lives outside this crate; a `User` is only the identity
/// that content is attributed to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub username: String,
    pub created_at: DateTime<Utc>,
}

impl User {
    /// Create a new user with the given username
    pub fn new(username: impl Into<String>) -> Self {
        Self {
            id: UserId::new(),
            username: username.into(),
            created_at: super::now(),
        }
    }
}

/// A collaborative worldbuilding space
///
/// Owns content entities and a tag vocabulary. Only `title`, `description`
/// and `is_public` may change after creation, and only by the creator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct World {
    /// Unique identifier
    pub id: WorldId,
    /// Display name
    pub title: String,
    /// Setting and theme description
    pub description: String,
    /// User who created the world
    pub creator: UserId,
    /// Whether the world is visible to everyone
    pub is_public: bool,
    /// When the world was created
    pub created_at: DateTime<Utc>,
    /// When title/description/visibility last changed
    pub updated_at: DateTime<Utc>,
}

impl World {
    /// Create a new public world
    pub fn new(title: impl Into<String>, description: impl Into<String>, creator: UserId) -> Self {
        let now = super::now();
        Self {
            id: WorldId::new(),
            title: title.into(),
            description: description.into(),
            creator,
            is_public: true,
            created_at: now,
            updated_at: now,
        }
    }

    /// Set the visibility flag
    pub fn with_visibility(mut self, is_public: bool) -> Self {
        self.is_public = is_public;
        self
    }

    /// Apply a metadata patch, returning whether anything changed
    pub fn apply(&mut self, patch: &WorldPatch) -> bool {
        let mut changed = false;
        if let Some(title) = &patch.title {
            if &self.title != title {
                self.title = title.clone();
                changed = true;
            }
        }
        if let Some(description) = &patch.description {
            if &self.description != description {
                self.description = description.clone();
                changed = true;
            }
        }
        if let Some(is_public) = patch.is_public {
            if self.is_public != is_public {
                self.is_public = is_public;
                changed = true;
            }
        }
        if changed {
            self.updated_at = super::now();
        }
        changed
    }
}

/// Editable world metadata
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorldPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_public: Option<bool>,
}

impl WorldPatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn visibility(mut self, is_public: bool) -> Self {
        self.is_public = Some(is_public);
        self
    }
}
