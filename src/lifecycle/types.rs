//! Lifecycle states and purge reports.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::graph::{ContentEntity, ContentRef, PurgeBlockReason, UserId};
use crate::storage::PurgeCounts;

/// Where an entity is in the `Active -> SoftDeleted -> Purged` state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum LifecycleState {
    Active,
    SoftDeleted { deleted_at: DateTime<Utc> },
    /// Terminal: only a tombstone remains
    Purged { purged_at: DateTime<Utc> },
}

impl std::fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LifecycleState::Active => f.write_str("active"),
            LifecycleState::SoftDeleted { .. } => f.write_str("soft_deleted"),
            LifecycleState::Purged { .. } => f.write_str("purged"),
        }
    }
}

/// What a completed purge removed
#[derive(Debug, Clone, Serialize)]
pub struct PurgeReport {
    pub target: ContentRef,
    pub title: String,
    pub author: UserId,
    pub removed: PurgeCounts,
    pub purged_at: DateTime<Utc>,
}

/// Dry-run answer to "what would purging this entity do?"
#[derive(Debug, Clone, Serialize)]
pub struct PurgePlan {
    pub target: ContentRef,
    pub title: String,
    pub state: LifecycleState,
    /// When the retention window closes, for soft-deleted entities
    #[serde(skip_serializing_if = "Option::is_none")]
    pub eligible_at: Option<DateTime<Utc>>,
    /// Why a purge right now would be refused
    #[serde(skip_serializing_if = "Option::is_none")]
    pub blocked_by: Option<PurgeBlockReason>,
    /// Associations that would be removed with the entity
    pub would_remove: PurgeCounts,
}

impl PurgePlan {
    pub fn is_purgeable(&self) -> bool {
        self.blocked_by.is_none()
    }
}

/// A purge candidate that could not be purged
#[derive(Debug, Clone, Serialize)]
pub struct BlockedPurge {
    pub target: ContentRef,
    pub title: String,
    pub reason: PurgeBlockReason,
}

/// Outcome of purging everything past retention in a world
#[derive(Debug, Clone, Default, Serialize)]
pub struct ExpiryReport {
    pub purged: Vec<PurgeReport>,
    pub blocked: Vec<BlockedPurge>,
}

/// Outcome of a bulk soft delete
#[derive(Debug, Clone, Default, Serialize)]
pub struct BulkSoftDelete {
    pub soft_deleted: Vec<ContentRef>,
    /// Targets that were already soft-deleted (no-op)
    pub already_deleted: Vec<ContentRef>,
}

/// A soft-deleted entity awaiting restore or purge
#[derive(Debug, Clone, Serialize)]
pub struct DeletedContent {
    pub entity: ContentEntity,
    pub purge_eligible_at: DateTime<Utc>,
}
