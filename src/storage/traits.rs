//! Storage trait definitions

use crate::graph::{
    ContentEntity, ContentKind, ContentRef, Lifecycle, LinkAssociation, PurgeBlockReason, Tag,
    TagId, TagName, User, UserId, Visibility, World, WorldId,
};
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::path::Path;
use thiserror::Error;

/// Errors that can occur during storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Date parsing error: {0}")]
    DateParse(String),

    #[error("Invalid stored value: {0}")]
    Corrupt(String),

    #[error("Storage lock poisoned")]
    LockPoisoned,
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Filter criteria for listing content in a world
#[derive(Debug, Clone, Default)]
pub struct EntityFilter {
    /// Restrict to these kinds (empty = all kinds)
    pub kinds: Vec<ContentKind>,
    /// Restrict to one author
    pub author: Option<UserId>,
    /// Which lifecycle states to include
    pub visibility: Visibility,
    /// Created at or after
    pub since: Option<DateTime<Utc>>,
    /// Created at or before
    pub until: Option<DateTime<Utc>>,
    /// Case-insensitive substring of title or body
    pub search: Option<String>,
}

impl EntityFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_kind(mut self, kind: ContentKind) -> Self {
        self.kinds.push(kind);
        self
    }

    pub fn with_author(mut self, author: UserId) -> Self {
        self.author = Some(author);
        self
    }

    pub fn with_visibility(mut self, visibility: Visibility) -> Self {
        self.visibility = visibility;
        self
    }

    pub fn deleted_only() -> Self {
        Self {
            visibility: Visibility::IncludeDeleted,
            ..Self::default()
        }
    }
}

/// Result of writing one content row
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentWrite {
    Written,
    /// Nothing changed: the id is already taken on insert, or the row is gone on update
    Unchanged,
    /// Another active entity of the same kind in the world holds the title
    TitleTaken,
}

/// Result of applying a batch of tags to one entity
#[derive(Debug, Clone)]
pub enum TagWrite {
    /// The batch was applied in full
    Applied {
        added: Vec<Tag>,
        already_present: Vec<Tag>,
    },
    /// The batch would push the entity past the cap; nothing was written
    LimitExceeded { existing: usize, requested_new: usize },
    /// The target no longer exists or is not active
    TargetUnavailable,
}

/// Result of inserting one link
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkWrite {
    Inserted,
    /// The same directed edge was already stored
    Duplicate,
    /// An endpoint was purged or never existed
    EndpointMissing(ContentRef),
    /// An endpoint exists but is soft-deleted
    EndpointInactive(ContentRef),
}

/// What a completed purge removed
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PurgeCounts {
    pub tag_associations: usize,
    pub outbound_links: usize,
    pub inbound_links: usize,
}

/// Result of an atomic purge attempt
#[derive(Debug, Clone, PartialEq)]
pub enum PurgeWrite {
    Purged(PurgeCounts),
    Blocked(PurgeBlockReason),
    /// No live row; the entity was purged earlier or never existed
    Missing,
}

/// Permanent record left behind by a purge
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PurgedRecord {
    pub target: ContentRef,
    pub world_id: WorldId,
    pub author: UserId,
    pub title: String,
    pub purged_at: DateTime<Utc>,
    pub purged_by: UserId,
}

/// Trait for content storage backends
///
/// Implementations must be thread-safe (Send + Sync). Methods that combine
/// a check with a write (`apply_tags`, `insert_link`, `purge_entity`) must run
/// the check and the write in one transaction. Active titles are unique per
/// world and kind (case-insensitive); every content write that could make a
/// row active under a taken title reports `ContentWrite::TitleTaken` instead.
pub trait ContentStore: Send + Sync {
    // === Users ===

    /// Insert a user; returns false if the username is taken
    fn insert_user(&self, user: &User) -> StorageResult<bool>;

    fn load_user(&self, id: &UserId) -> StorageResult<Option<User>>;

    fn find_user_by_name(&self, username: &str) -> StorageResult<Option<User>>;

    // === Worlds ===

    /// Create or update a world's row
    fn save_world(&self, world: &World) -> StorageResult<()>;

    fn load_world(&self, id: &WorldId) -> StorageResult<Option<World>>;

    fn list_worlds(&self) -> StorageResult<Vec<World>>;

    // === Content ===

    /// Insert a new entity; `Unchanged` if the identity already exists
    fn insert_entity(&self, entity: &ContentEntity) -> StorageResult<ContentWrite>;

    fn load_entity(&self, target: &ContentRef) -> StorageResult<Option<ContentEntity>>;

    /// List a world's content, newest first
    fn find_entities(&self, world: &WorldId, filter: &EntityFilter) -> StorageResult<Vec<ContentEntity>>;

    /// Overwrite title, body and details; identity columns are never written
    fn replace_substance(&self, entity: &ContentEntity) -> StorageResult<ContentWrite>;

    /// Persist a lifecycle transition between active and soft-deleted
    fn set_lifecycle(&self, target: &ContentRef, lifecycle: &Lifecycle) -> StorageResult<ContentWrite>;

    // === Tags ===

    /// Get-or-create a tag by normalized name
    fn ensure_tag(&self, world: &WorldId, name: &TagName) -> StorageResult<Tag>;

    fn find_tag(&self, world: &WorldId, key: &str) -> StorageResult<Option<Tag>>;

    fn list_tags(&self, world: &WorldId) -> StorageResult<Vec<Tag>>;

    /// Apply a batch of distinct tag names to one active entity, all or nothing
    fn apply_tags(
        &self,
        world: &WorldId,
        target: &ContentRef,
        names: &[TagName],
        cap: usize,
    ) -> StorageResult<TagWrite>;

    fn tags_for(&self, target: &ContentRef) -> StorageResult<Vec<Tag>>;

    /// Entities carrying a tag, newest first
    fn entities_tagged(&self, tag: &TagId, visibility: Visibility) -> StorageResult<Vec<ContentEntity>>;

    /// Tags of a world with the number of active entities carrying each
    fn tag_usage(&self, world: &WorldId) -> StorageResult<Vec<(Tag, usize)>>;

    // === Links ===

    /// Insert a link if both endpoints are still active and the edge is new
    fn insert_link(&self, link: &LinkAssociation) -> StorageResult<LinkWrite>;

    fn links_from(&self, source: &ContentRef) -> StorageResult<Vec<LinkAssociation>>;

    fn links_to(&self, target: &ContentRef) -> StorageResult<Vec<LinkAssociation>>;

    fn links_in_world(&self, world: &WorldId) -> StorageResult<Vec<LinkAssociation>>;

    // === Purge ===

    /// Atomically verify purge eligibility and remove the entity with all of
    /// its tag and link associations, leaving a tombstone
    fn purge_entity(
        &self,
        target: &ContentRef,
        retention: Duration,
        now: DateTime<Utc>,
        purged_by: &UserId,
    ) -> StorageResult<PurgeWrite>;

    fn purged_record(&self, target: &ContentRef) -> StorageResult<Option<PurgedRecord>>;

    fn list_purged(&self, world: &WorldId) -> StorageResult<Vec<PurgedRecord>>;
}

/// Extension trait for opening stores from paths
pub trait OpenStore: ContentStore + Sized {
    /// Open or create a store at the given path
    fn open(path: impl AsRef<Path>) -> StorageResult<Self>;

    /// Create an in-memory store (useful for testing)
    fn open_in_memory() -> StorageResult<Self>;
}
