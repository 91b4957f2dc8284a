//! Content entities: the five immutable content variants and their polymorphic references

use super::ids::{EntityId, UserId, WorldId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Closed set of content variants
///
/// Used as the type tag of every polymorphic reference, so tags and links can
/// only ever point at content, never at worlds, users or tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentKind {
    Page,
    Essay,
    Character,
    Story,
    Image,
}

impl ContentKind {
    /// Every variant, in display order
    pub const ALL: [ContentKind; 5] = [
        ContentKind::Page,
        ContentKind::Essay,
        ContentKind::Character,
        ContentKind::Story,
        ContentKind::Image,
    ];

    /// Stable lowercase name used in storage and URLs
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentKind::Page => "page",
            ContentKind::Essay => "essay",
            ContentKind::Character => "character",
            ContentKind::Story => "story",
            ContentKind::Image => "image",
        }
    }

    /// Plural form used in route segments (`/worlds/{id}/stories/`)
    pub fn plural(&self) -> &'static str {
        match self {
            ContentKind::Page => "pages",
            ContentKind::Essay => "essays",
            ContentKind::Character => "characters",
            ContentKind::Story => "stories",
            ContentKind::Image => "images",
        }
    }
}

impl std::fmt::Display for ContentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ContentKind {
    type Err = String;

    /// Accepts singular or plural names, case-insensitively
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lowered = s.trim().to_lowercase();
        ContentKind::ALL
            .into_iter()
            .find(|k| k.as_str() == lowered || k.plural() == lowered)
            .ok_or_else(|| format!("unknown content kind: {}", s))
    }
}

/// A polymorphic `(kind, id)` reference to one content entity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ContentRef {
    pub kind: ContentKind,
    pub id: EntityId,
}

impl ContentRef {
    pub fn new(kind: ContentKind, id: EntityId) -> Self {
        Self { kind, id }
    }
}

impl std::fmt::Display for ContentRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.kind, self.id)
    }
}

/// Narrative form of a story
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoryType {
    #[default]
    ShortStory,
    Novella,
    Chapter,
    Vignette,
    Legend,
    Myth,
    HistoricalAccount,
}

/// What an image depicts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImageType {
    ConceptArt,
    Map,
    CharacterPortrait,
    LocationPhoto,
    ItemIllustration,
    SceneIllustration,
    Diagram,
    #[default]
    Other,
}

/// Wiki-style entry
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PageDetails {
    #[serde(default)]
    pub summary: String,
}

/// Long-form analytical piece
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EssayDetails {
    #[serde(default)]
    pub abstract_text: String,
    /// Derived from the body when the essay is created
    #[serde(default)]
    pub word_count: u32,
}

/// Structured character profile
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CharacterDetails {
    pub full_name: String,
    #[serde(default)]
    pub age: String,
    #[serde(default)]
    pub species: String,
    #[serde(default)]
    pub occupation: String,
    #[serde(default)]
    pub location: String,
    #[serde(default)]
    pub traits: Vec<String>,
    #[serde(default)]
    pub physical_description: String,
    #[serde(default)]
    pub background: String,
    /// Other character name -> description of the relationship
    #[serde(default)]
    pub relationships: BTreeMap<String, String>,
}

/// Narrative content
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoryDetails {
    #[serde(default)]
    pub genre: String,
    #[serde(default)]
    pub story_type: StoryType,
    #[serde(default)]
    pub timeline_period: String,
    #[serde(default)]
    pub setting_location: String,
    /// Names of the main characters
    #[serde(default)]
    pub characters: Vec<String>,
    /// Derived from the body when the story is created
    #[serde(default)]
    pub word_count: u32,
    #[serde(default = "default_true")]
    pub is_canonical: bool,
}

impl Default for StoryDetails {
    fn default() -> Self {
        Self {
            genre: String::new(),
            story_type: StoryType::default(),
            timeline_period: String::new(),
            setting_location: String::new(),
            characters: Vec::new(),
            word_count: 0,
            is_canonical: true,
        }
    }
}

fn default_true() -> bool {
    true
}

/// Visual content; the binary itself lives in an external file store
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ImageDetails {
    /// Opaque reference into the file store
    pub file_ref: String,
    #[serde(default)]
    pub caption: String,
    pub alt_text: String,
    #[serde(default)]
    pub image_type: ImageType,
    #[serde(default)]
    pub dimensions: String,
    #[serde(default)]
    pub file_size: u64,
}

/// Variant-specific fields, one arm per [`ContentKind`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ContentDetails {
    Page(PageDetails),
    Essay(EssayDetails),
    Character(CharacterDetails),
    Story(StoryDetails),
    Image(ImageDetails),
}

impl ContentDetails {
    /// The variant this payload belongs to
    pub fn kind(&self) -> ContentKind {
        match self {
            ContentDetails::Page(_) => ContentKind::Page,
            ContentDetails::Essay(_) => ContentKind::Essay,
            ContentDetails::Character(_) => ContentKind::Character,
            ContentDetails::Story(_) => ContentKind::Story,
            ContentDetails::Image(_) => ContentKind::Image,
        }
    }

    /// Fill in fields derived from the body (word counts)
    fn derive_from_body(&mut self, body: &str) {
        let words = body.split_whitespace().count() as u32;
        match self {
            ContentDetails::Essay(essay) => essay.word_count = words,
            ContentDetails::Story(story) => story.word_count = words,
            ContentDetails::Page(_) | ContentDetails::Character(_) | ContentDetails::Image(_) => {}
        }
    }
}

/// Soft-delete state carried by every stored entity
///
/// Purged entities no longer exist as records, so there is no arm for them
/// here; see `lifecycle::LifecycleState` for the full state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum Lifecycle {
    #[default]
    Active,
    SoftDeleted {
        at: DateTime<Utc>,
        by: Option<UserId>,
    },
}

/// Which lifecycle states a read path admits
///
/// Every list, tag, link and timeline read takes one of these instead of
/// checking deletion flags itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Visibility {
    /// Only active entities (the default view)
    #[default]
    Active,
    /// Active and soft-deleted entities
    IncludeDeleted,
}

impl Visibility {
    /// Build from an `include_deleted` flag
    pub fn including_deleted(include_deleted: bool) -> Self {
        if include_deleted {
            Visibility::IncludeDeleted
        } else {
            Visibility::Active
        }
    }

    /// Whether an entity in the given state is visible
    pub fn admits(&self, lifecycle: &Lifecycle) -> bool {
        match self {
            Visibility::Active => matches!(lifecycle, Lifecycle::Active),
            Visibility::IncludeDeleted => true,
        }
    }
}

/// Client-submitted content prior to persistence
///
/// Author, world and timestamp are never part of a draft; the engine assigns
/// them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentDraft {
    pub title: String,
    pub body: String,
    pub details: ContentDetails,
}

impl ContentDraft {
    pub fn new(title: impl Into<String>, body: impl Into<String>, details: ContentDetails) -> Self {
        Self {
            title: title.into(),
            body: body.into(),
            details,
        }
    }

    pub fn page(title: impl Into<String>, body: impl Into<String>) -> Self {
        Self::new(title, body, ContentDetails::Page(PageDetails::default()))
    }

    pub fn essay(title: impl Into<String>, body: impl Into<String>) -> Self {
        Self::new(title, body, ContentDetails::Essay(EssayDetails::default()))
    }

    pub fn character(
        title: impl Into<String>,
        body: impl Into<String>,
        full_name: impl Into<String>,
    ) -> Self {
        Self::new(
            title,
            body,
            ContentDetails::Character(CharacterDetails {
                full_name: full_name.into(),
                ..Default::default()
            }),
        )
    }

    pub fn story(title: impl Into<String>, body: impl Into<String>) -> Self {
        Self::new(title, body, ContentDetails::Story(StoryDetails::default()))
    }

    pub fn image(
        title: impl Into<String>,
        body: impl Into<String>,
        file_ref: impl Into<String>,
        alt_text: impl Into<String>,
    ) -> Self {
        Self::new(
            title,
            body,
            ContentDetails::Image(ImageDetails {
                file_ref: file_ref.into(),
                alt_text: alt_text.into(),
                ..Default::default()
            }),
        )
    }

    pub fn kind(&self) -> ContentKind {
        self.details.kind()
    }
}

/// Administrative rewrite of an entity's substance
///
/// Only reachable through `WeaveEngine::force_update`; author, world, kind
/// and creation time are not part of the patch and cannot change.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContentPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<ContentDetails>,
}

impl ContentPatch {
    pub fn is_empty(&self) -> bool {
        self.title.is_none() && self.body.is_none() && self.details.is_none()
    }
}

/// A persisted, immutable piece of content
///
/// Fields are private: once constructed there is no public way to change
/// the title, body, author or creation time of an entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentEntity {
    id: EntityId,
    world_id: WorldId,
    author: UserId,
    title: String,
    body: String,
    created_at: DateTime<Utc>,
    details: ContentDetails,
    lifecycle: Lifecycle,
}

impl ContentEntity {
    /// Construct a brand new entity from a draft, fixing author and timestamp
    pub(crate) fn create(world_id: WorldId, author: UserId, draft: ContentDraft) -> Self {
        let ContentDraft {
            title,
            body,
            mut details,
        } = draft;
        details.derive_from_body(&body);
        Self {
            id: EntityId::new(),
            world_id,
            author,
            title: title.trim().to_string(),
            body,
            created_at: super::now(),
            details,
            lifecycle: Lifecycle::Active,
        }
    }

    /// Rebuild an entity from its stored columns
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn from_parts(
        id: EntityId,
        world_id: WorldId,
        author: UserId,
        title: String,
        body: String,
        created_at: DateTime<Utc>,
        details: ContentDetails,
        lifecycle: Lifecycle,
    ) -> Self {
        Self {
            id,
            world_id,
            author,
            title,
            body,
            created_at,
            details,
            lifecycle,
        }
    }

    /// Apply an administrative patch; identity fields are untouched
    pub(crate) fn patched(&self, patch: &ContentPatch) -> Self {
        let mut next = self.clone();
        if let Some(title) = &patch.title {
            next.title = title.trim().to_string();
        }
        if let Some(body) = &patch.body {
            next.body = body.clone();
        }
        if let Some(details) = &patch.details {
            next.details = details.clone();
        }
        let body = next.body.clone();
        next.details.derive_from_body(&body);
        next
    }

    pub fn id(&self) -> EntityId {
        self.id
    }

    pub fn kind(&self) -> ContentKind {
        self.details.kind()
    }

    /// The polymorphic reference for this entity
    pub fn content_ref(&self) -> ContentRef {
        ContentRef::new(self.kind(), self.id)
    }

    pub fn world_id(&self) -> WorldId {
        self.world_id
    }

    pub fn author(&self) -> UserId {
        self.author
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn body(&self) -> &str {
        &self.body
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn details(&self) -> &ContentDetails {
        &self.details
    }

    pub fn lifecycle(&self) -> Lifecycle {
        self.lifecycle
    }

    /// Derived soft-delete flag
    pub fn is_deleted(&self) -> bool {
        matches!(self.lifecycle, Lifecycle::SoftDeleted { .. })
    }

    /// Derived soft-delete timestamp
    pub fn deleted_at(&self) -> Option<DateTime<Utc>> {
        match self.lifecycle {
            Lifecycle::Active => None,
            Lifecycle::SoftDeleted { at, .. } => Some(at),
        }
    }

    /// Short excerpt for listings: the page summary when present, else the body
    pub fn summary(&self, max_chars: usize) -> String {
        let source = match &self.details {
            ContentDetails::Page(page) if !page.summary.trim().is_empty() => page.summary.as_str(),
            ContentDetails::Essay(essay) if !essay.abstract_text.trim().is_empty() => {
                essay.abstract_text.as_str()
            }
            _ => self.body.as_str(),
        };
        source.chars().take(max_chars).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_parses_singular_and_plural() {
        assert_eq!("story".parse::<ContentKind>().unwrap(), ContentKind::Story);
        assert_eq!("Stories".parse::<ContentKind>().unwrap(), ContentKind::Story);
        assert_eq!(" images ".parse::<ContentKind>().unwrap(), ContentKind::Image);
        assert!("world".parse::<ContentKind>().is_err());
    }

    #[test]
    fn test_create_derives_word_count() {
        let draft = ContentDraft::essay("On Tides", "the moon pulls the sea twice a day");
        let entity = ContentEntity::create(WorldId::new(), UserId::new(), draft);

        match entity.details() {
            ContentDetails::Essay(essay) => assert_eq!(essay.word_count, 8),
            other => panic!("unexpected details: {:?}", other),
        }
        assert_eq!(entity.kind(), ContentKind::Essay);
        assert!(!entity.is_deleted());
        assert_eq!(entity.deleted_at(), None);
    }

    #[test]
    fn test_patched_preserves_identity() {
        let author = UserId::new();
        let entity = ContentEntity::create(
            WorldId::new(),
            author,
            ContentDraft::page("Harbor", "The harbor is always foggy."),
        );
        let patch = ContentPatch {
            title: Some("Harbour".into()),
            ..Default::default()
        };

        let next = entity.patched(&patch);
        assert_eq!(next.title(), "Harbour");
        assert_eq!(next.id(), entity.id());
        assert_eq!(next.author(), author);
        assert_eq!(next.created_at(), entity.created_at());
        assert_eq!(next.world_id(), entity.world_id());
    }

    #[test]
    fn test_visibility_filter() {
        let deleted = Lifecycle::SoftDeleted {
            at: Utc::now(),
            by: None,
        };
        assert!(Visibility::Active.admits(&Lifecycle::Active));
        assert!(!Visibility::Active.admits(&deleted));
        assert!(Visibility::IncludeDeleted.admits(&deleted));
    }

    #[test]
    fn test_details_serialize_with_kind_tag() {
        let details = ContentDetails::Story(StoryDetails::default());
        let json = serde_json::to_value(&details).unwrap();
        assert_eq!(json["kind"], "story");
        assert_eq!(json["story_type"], "short_story");
        assert_eq!(json["is_canonical"], true);
    }
}
