//! Core records and the engine that guards them

mod engine;
mod entity;
mod error;
mod guard;
mod ids;
mod link;
mod tag;
mod world;


use chrono::{DateTime, SubsecRound, Utc};

pub use engine::WeaveEngine;
pub use entity::{
    CharacterDetails, ContentDetails, ContentDraft, ContentEntity, ContentKind, ContentPatch,
    ContentRef, EssayDetails, ImageDetails, ImageType, Lifecycle, PageDetails, StoryDetails,
    StoryType, Visibility,
};
pub use error::{PurgeBlockReason, WeaveError, WeaveResult};
pub use guard::{Actor, ImmutabilityGuard, Operation, Role};
pub use ids::{EntityId, TagId, UserId, WorldId};
pub use link::{LinkAssociation, LinkDirection};
pub use tag::{Tag, TagName};
pub use world::{User, World, WorldPatch};

/// Current time at the precision storage keeps
pub(crate) fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}
