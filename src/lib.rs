//! Worldweave: immutable collaborative worldbuilding content
//!
//! Users create worlds and fill them with pages, essays, characters, stories
//! and images. Content is immutable once created: the only ways to change a
//! world after the fact are to tag content, link content to other content,
//! or take content through the administrative soft-delete, restore and purge
//! lifecycle.
//!
//! # Core Concepts
//!
//! - **Content references**: every entity is addressed by a `(kind, id)` pair,
//!   resolved only within the world it belongs to
//! - **Tags**: world-scoped, case-insensitive names, at most ten per entity
//! - **Links**: directed, deduplicated associations between two entities of
//!   the same world, flagged when they connect different authors
//! - **Attribution**: per-author contribution and collaboration metrics
//!   derived from content and links
//!
//! # Example
//!
//! ```
//! use worldweave::{Actor, ContentDraft, WeaveEngine};
//!
//! let engine = WeaveEngine::in_memory().unwrap();
//! let alice = Actor::user(engine.create_user("alice").unwrap().id);
//! let world = engine.create_world(&alice, "Eldoria", "Misty isles", true).unwrap();
//! let page = engine
//!     .create_content(&alice, &world.id, ContentDraft::page("Harbor", "The harbor is foggy."))
//!     .unwrap();
//! assert_eq!(page.author(), alice.user);
//! ```

pub mod api;
pub mod config;
mod graph;
pub mod lifecycle;
pub mod linking;
pub mod query;
pub mod storage;
pub mod tagging;

pub use api::{status_code, WeaveApi};
pub use config::{ConfigError, EngineConfig};
pub use graph::{
    Actor, CharacterDetails, ContentDetails, ContentDraft, ContentEntity, ContentKind, ContentPatch,
    ContentRef, EntityId, EssayDetails, ImageDetails, ImageType, ImmutabilityGuard, Lifecycle,
    LinkAssociation, LinkDirection, Operation, PageDetails, PurgeBlockReason, Role, StoryDetails,
    StoryType, Tag, TagId, TagName, User, UserId, Visibility, WeaveEngine, WeaveError,
    WeaveResult, World, WorldId, WorldPatch,
};
pub use lifecycle::{LifecycleManager, LifecycleState, PurgePlan, PurgeReport};
pub use linking::{LinkBatch, LinkGraph, RelatedContent};
pub use query::{AttributionReport, TagMatch, TimelinePage, TimelineQuery, WorldStatistics};
pub use storage::{ContentStore, OpenStore, SqliteStore, StorageError, StorageResult};
pub use tagging::{TagGraph, TagOutcome};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
