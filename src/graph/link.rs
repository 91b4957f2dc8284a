//! Directed links between content entities

use super::entity::ContentRef;
use super::ids::WorldId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A directed edge between two content entities of the same world
///
/// `cross_author` is fixed when the link is stored. Authors never change,
/// so the flag cannot drift from the entities it describes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkAssociation {
    pub world_id: WorldId,
    pub source: ContentRef,
    pub target: ContentRef,
    /// Source and target were written by different users
    pub cross_author: bool,
    pub created_at: DateTime<Utc>,
}

impl LinkAssociation {
    /// Create a new link stamped with the current time
    pub fn new(world_id: WorldId, source: ContentRef, target: ContentRef, cross_author: bool) -> Self {
        Self {
            world_id,
            source,
            target,
            cross_author,
            created_at: super::now(),
        }
    }

    /// The endpoint opposite `entity`, with the direction seen from `entity`
    pub fn other_end(&self, entity: &ContentRef) -> Option<(ContentRef, LinkDirection)> {
        if &self.source == entity {
            Some((self.target, LinkDirection::Outbound))
        } else if &self.target == entity {
            Some((self.source, LinkDirection::Inbound))
        } else {
            None
        }
    }
}

/// Direction of a link relative to the entity it was queried from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkDirection {
    /// The queried entity is the source
    Outbound,
    /// The queried entity is the target
    Inbound,
}
