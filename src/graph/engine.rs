//! WeaveEngine: the main entry point for worlds and their content

use super::entity::{ContentDetails, ContentDraft, ContentEntity, ContentPatch, ContentRef, Visibility};
use super::error::{WeaveError, WeaveResult};
use super::guard::{Actor, ImmutabilityGuard, Operation};
use super::ids::{UserId, WorldId};
use super::world::{User, World, WorldPatch};
use crate::config::EngineConfig;
use crate::query::AttributionReport;
use crate::storage::{ContentStore, ContentWrite, EntityFilter, OpenStore, SqliteStore};
use dashmap::DashMap;
use std::sync::Arc;
use tracing::{debug, info};

const USERNAME_MAX_LEN: usize = 150;

/// The main worldweave engine
///
/// Owns the storage backend and policy configuration, resolves polymorphic
/// references, and routes every content mutation through the
/// [`ImmutabilityGuard`]. Tag, link and lifecycle operations are exposed
/// through world-scoped views (`TagGraph`, `LinkGraph`, `LifecycleManager`)
/// that borrow the engine.
pub struct WeaveEngine {
    store: Arc<dyn ContentStore>,
    config: EngineConfig,
    /// Attribution reports by world, dropped on every change to that world
    reports: DashMap<WorldId, AttributionReport>,
}

impl std::fmt::Debug for WeaveEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WeaveEngine")
            .field("config", &self.config)
            .field("cached_reports", &self.reports.len())
            .finish_non_exhaustive()
    }
}

impl WeaveEngine {
    /// Create an engine over the given store with default configuration
    pub fn with_store(store: Arc<dyn ContentStore>) -> Self {
        Self::with_config(store, EngineConfig::default())
    }

    /// Create an engine over the given store and configuration
    pub fn with_config(store: Arc<dyn ContentStore>, config: EngineConfig) -> Self {
        Self {
            store,
            config,
            reports: DashMap::new(),
        }
    }

    /// Create an engine backed by a fresh in-memory SQLite database
    pub fn in_memory() -> WeaveResult<Self> {
        Ok(Self::with_store(Arc::new(SqliteStore::open_in_memory()?)))
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub(crate) fn store(&self) -> &dyn ContentStore {
        self.store.as_ref()
    }

    // === Users ===

    /// Register a new user
    pub fn create_user(&self, username: &str) -> WeaveResult<User> {
        let username = username.trim();
        if username.is_empty() || username.chars().count() > USERNAME_MAX_LEN {
            return Err(WeaveError::validation(
                "username",
                format!("must be 1 to {} characters", USERNAME_MAX_LEN),
            ));
        }
        if !username
            .chars()
            .all(|c| c.is_alphanumeric() || matches!(c, '@' | '.' | '+' | '-' | '_'))
        {
            return Err(WeaveError::validation(
                "username",
                "may contain only letters, digits and @ . + - _",
            ));
        }

        let user = User::new(username);
        if !self.store.insert_user(&user)? {
            return Err(WeaveError::validation("username", format!("'{}' is already taken", username)));
        }
        info!(user = %user.id, username = %user.username, "user created");
        Ok(user)
    }

    pub fn user(&self, id: &UserId) -> WeaveResult<User> {
        self.store
            .load_user(id)?
            .ok_or_else(|| WeaveError::NotFound(format!("user {}", id)))
    }

    pub fn user_by_name(&self, username: &str) -> WeaveResult<User> {
        self.store
            .find_user_by_name(username.trim())?
            .ok_or_else(|| WeaveError::NotFound(format!("user '{}'", username.trim())))
    }

    // === Worlds ===

    /// Create a world owned by the acting user
    pub fn create_world(
        &self,
        actor: &Actor,
        title: &str,
        description: &str,
        is_public: bool,
    ) -> WeaveResult<World> {
        self.user(&actor.user)?;
        let title = self.validate_world_title(title)?;

        let world = World::new(title, description.trim(), actor.user).with_visibility(is_public);
        self.store.save_world(&world)?;
        info!(world = %world.id, creator = %actor.user, "world created");
        Ok(world)
    }

    pub fn world(&self, id: &WorldId) -> WeaveResult<World> {
        self.store
            .load_world(id)?
            .ok_or_else(|| WeaveError::NotFound(format!("world {}", id)))
    }

    /// Worlds visible to `viewer`: public ones, plus the viewer's own
    /// (administrators see everything)
    pub fn list_worlds(&self, viewer: Option<&Actor>) -> WeaveResult<Vec<World>> {
        let worlds = self.store.list_worlds()?;
        Ok(worlds
            .into_iter()
            .filter(|w| match viewer {
                Some(actor) => w.is_public || actor.is_admin() || w.creator == actor.user,
                None => w.is_public,
            })
            .collect())
    }

    /// Edit title, description or visibility; creator only
    pub fn update_world(&self, actor: &Actor, id: &WorldId, patch: &WorldPatch) -> WeaveResult<World> {
        let mut world = self.world(id)?;
        if world.creator != actor.user {
            return Err(WeaveError::PermissionDenied(format!(
                "only the creator may edit world {}",
                id
            )));
        }

        let mut patch = patch.clone();
        if let Some(title) = &patch.title {
            patch.title = Some(self.validate_world_title(title)?);
        }
        if let Some(description) = &patch.description {
            patch.description = Some(description.trim().to_string());
        }

        if world.apply(&patch) {
            self.store.save_world(&world)?;
            debug!(world = %id, "world metadata updated");
        }
        Ok(world)
    }

    // === Content ===

    /// Persist a new content entity
    ///
    /// The author is the acting user and the creation time is now; neither
    /// can be supplied by the caller.
    pub fn create_content(&self, actor: &Actor, world: &WorldId, draft: ContentDraft) -> WeaveResult<ContentEntity> {
        self.world(world)?;
        self.user(&actor.user)?;
        self.validate_draft(&draft)?;

        let kind = draft.kind();
        let entity = ContentEntity::create(*world, actor.user, draft);
        ImmutabilityGuard::check(actor, Operation::Create, entity.content_ref(), None)?;
        match self.store.insert_entity(&entity)? {
            ContentWrite::Written => {}
            ContentWrite::TitleTaken => return Err(WeaveError::title_taken(kind, entity.title())),
            ContentWrite::Unchanged => {
                let existing = self.store.load_entity(&entity.content_ref())?;
                ImmutabilityGuard::check(actor, Operation::Create, entity.content_ref(), existing.as_ref())?;
            }
        }

        self.invalidate(world);
        info!(
            world = %world,
            kind = %kind,
            id = %entity.id(),
            author = %actor.user,
            "content created"
        );
        Ok(entity)
    }

    /// Resolve a polymorphic reference within a known world
    ///
    /// Returns the entity whatever its lifecycle state. Fails with
    /// `CrossWorldReference` if the entity belongs to another world.
    pub fn resolve(&self, world: &WorldId, target: &ContentRef) -> WeaveResult<ContentEntity> {
        let entity = self
            .store
            .load_entity(target)?
            .ok_or_else(|| WeaveError::NotFound(target.to_string()))?;
        if entity.world_id() != *world {
            return Err(WeaveError::CrossWorldReference {
                expected: *world,
                actual: entity.world_id(),
            });
        }
        Ok(entity)
    }

    /// Resolve a reference, treating entities outside `visibility` as missing
    pub fn resolve_visible(
        &self,
        world: &WorldId,
        target: &ContentRef,
        visibility: Visibility,
    ) -> WeaveResult<ContentEntity> {
        let entity = self.resolve(world, target)?;
        if !visibility.admits(&entity.lifecycle()) {
            return Err(WeaveError::NotFound(target.to_string()));
        }
        Ok(entity)
    }

    /// Like [`resolve`](Self::resolve), but a reference to purged content
    /// fails with `AlreadyPurged` instead of `NotFound`
    pub(crate) fn resolve_or_tombstone(&self, world: &WorldId, target: &ContentRef) -> WeaveResult<ContentEntity> {
        match self.resolve(world, target) {
            Err(WeaveError::NotFound(msg)) => match self.store.purged_record(target)? {
                Some(record) if record.world_id == *world => Err(WeaveError::AlreadyPurged(*target)),
                Some(record) => Err(WeaveError::CrossWorldReference {
                    expected: *world,
                    actual: record.world_id,
                }),
                None => Err(WeaveError::NotFound(msg)),
            },
            other => other,
        }
    }

    /// List a world's content, newest first
    pub fn list_content(&self, world: &WorldId, filter: &EntityFilter) -> WeaveResult<Vec<ContentEntity>> {
        self.world(world)?;
        Ok(self.store.find_entities(world, filter)?)
    }

    /// Ordinary update of stored content; always refused
    pub fn update_content(&self, actor: &Actor, world: &WorldId, target: &ContentRef, _patch: &ContentPatch) -> WeaveResult<ContentEntity> {
        let existing = self.resolve(world, target)?;
        ImmutabilityGuard::check(actor, Operation::Update, *target, Some(&existing))?;
        Ok(existing)
    }

    /// Hard delete of stored content; always refused
    pub fn delete_content(&self, actor: &Actor, world: &WorldId, target: &ContentRef) -> WeaveResult<()> {
        let existing = self.resolve(world, target)?;
        ImmutabilityGuard::check(actor, Operation::Delete, *target, Some(&existing))
    }

    /// Administrative rewrite of title, body or variant details
    ///
    /// Author, world, kind and creation time are preserved.
    pub fn force_update(
        &self,
        actor: &Actor,
        world: &WorldId,
        target: &ContentRef,
        patch: &ContentPatch,
    ) -> WeaveResult<ContentEntity> {
        let existing = self.resolve(world, target)?;
        ImmutabilityGuard::check(actor, Operation::ForceUpdate, *target, Some(&existing))?;
        if patch.is_empty() {
            return Ok(existing);
        }

        if let Some(details) = &patch.details {
            if details.kind() != existing.kind() {
                return Err(WeaveError::validation(
                    "details",
                    format!("{} details cannot replace {} details", details.kind(), existing.kind()),
                ));
            }
        }

        let next = existing.patched(patch);
        self.validate_draft(&ContentDraft::new(next.title(), next.body(), next.details().clone()))?;
        match self.store.replace_substance(&next)? {
            ContentWrite::Written => {}
            ContentWrite::TitleTaken => return Err(WeaveError::title_taken(next.kind(), next.title())),
            ContentWrite::Unchanged => return Err(WeaveError::NotFound(target.to_string())),
        }
        self.invalidate(world);
        info!(world = %world, target = %target, admin = %actor.user, "content force-updated");
        Ok(next)
    }

    // === Derived-view cache ===

    pub(crate) fn cached_report(&self, world: &WorldId) -> Option<AttributionReport> {
        self.reports.get(world).map(|r| r.clone())
    }

    pub(crate) fn cache_report(&self, report: AttributionReport) {
        self.reports.insert(report.world_id, report);
    }

    /// Drop derived views for a world after any change to its graph
    pub(crate) fn invalidate(&self, world: &WorldId) {
        self.reports.remove(world);
    }

    // === Validation ===

    fn validate_world_title(&self, title: &str) -> WeaveResult<String> {
        let title = title.trim();
        let len = title.chars().count();
        if len < self.config.world_title_min_len || len > self.config.world_title_max_len {
            return Err(WeaveError::validation(
                "title",
                format!(
                    "world titles must be {} to {} characters",
                    self.config.world_title_min_len, self.config.world_title_max_len
                ),
            ));
        }
        Ok(title.to_string())
    }

    fn validate_draft(&self, draft: &ContentDraft) -> WeaveResult<()> {
        let c = &self.config;

        let title_len = draft.title.trim().chars().count();
        if title_len < c.title_min_len || title_len > c.title_max_len {
            return Err(WeaveError::validation(
                "title",
                format!("must be {} to {} characters", c.title_min_len, c.title_max_len),
            ));
        }

        let body_len = draft.body.trim().chars().count();
        if body_len < c.body_min_len || draft.body.chars().count() > c.body_max_len {
            return Err(WeaveError::validation(
                "content",
                format!("must be {} to {} characters", c.body_min_len, c.body_max_len),
            ));
        }

        match &draft.details {
            ContentDetails::Character(character) if character.full_name.trim().is_empty() => {
                Err(WeaveError::validation("full_name", "characters need a full name"))
            }
            ContentDetails::Image(image) => {
                if image.file_ref.trim().is_empty() {
                    return Err(WeaveError::validation("file_ref", "images need a stored file"));
                }
                let alt_len = image.alt_text.trim().chars().count();
                if alt_len == 0 || alt_len > c.alt_text_max_len {
                    return Err(WeaveError::validation(
                        "alt_text",
                        format!("must be 1 to {} characters", c.alt_text_max_len),
                    ));
                }
                if image.caption.chars().count() > c.caption_max_len {
                    return Err(WeaveError::validation(
                        "caption",
                        format!("must be at most {} characters", c.caption_max_len),
                    ));
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }
}
