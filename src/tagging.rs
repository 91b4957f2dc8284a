//! Tag graph: world-scoped vocabulary and polymorphic tag associations

use std::collections::{BTreeMap, HashSet};

use serde::Serialize;
use tracing::{debug, info};

use crate::graph::{
    ContentEntity, ContentRef, Tag, TagName, Visibility, WeaveEngine, WeaveError, WeaveResult, WorldId,
};
use crate::storage::TagWrite;

/// Result of a `tag_content` call
#[derive(Debug, Clone, Serialize)]
pub struct TagOutcome {
    /// Tags newly attached by this call
    pub added: Vec<Tag>,
    /// Tags the entity already carried
    pub already_present: Vec<Tag>,
}

/// A tag with the number of active entities carrying it
#[derive(Debug, Clone, Serialize)]
pub struct TagUsage {
    pub tag: Tag,
    pub usage: usize,
}

/// Tag operations scoped to a single world.
pub struct TagGraph<'a> {
    engine: &'a WeaveEngine,
    world: WorldId,
}

impl<'a> TagGraph<'a> {
    pub fn new(engine: &'a WeaveEngine, world: WorldId) -> Self {
        Self { engine, world }
    }

    // === Vocabulary ===

    /// Get-or-create a tag by name
    ///
    /// Names that normalize to an existing tag return it unchanged; the
    /// stored display name stays the first spelling ever submitted.
    pub fn create_tag(&self, name: &str) -> WeaveResult<Tag> {
        self.engine.world(&self.world)?;
        let name = self.normalize(name)?;
        let tag = self.engine.store().ensure_tag(&self.world, &name)?;
        debug!(world = %self.world, tag = %tag.name, "tag ensured");
        Ok(tag)
    }

    /// Look up a tag by any spelling of its name
    pub fn tag(&self, name: &str) -> WeaveResult<Tag> {
        let key = TagName::normalize(name)
            .map(|n| n.key)
            .ok_or_else(|| WeaveError::NotFound(format!("tag '{}'", name.trim())))?;
        self.engine
            .store()
            .find_tag(&self.world, &key)?
            .ok_or_else(|| WeaveError::NotFound(format!("tag '{}'", key)))
    }

    /// The world's whole vocabulary, alphabetical by key
    pub fn list_tags(&self) -> WeaveResult<Vec<Tag>> {
        self.engine.world(&self.world)?;
        Ok(self.engine.store().list_tags(&self.world)?)
    }

    /// Most used tags first; tags on soft-deleted content do not count
    pub fn popular_tags(&self, limit: usize) -> WeaveResult<Vec<TagUsage>> {
        self.engine.world(&self.world)?;
        Ok(self
            .engine
            .store()
            .tag_usage(&self.world)?
            .into_iter()
            .filter(|(_, usage)| *usage > 0)
            .take(limit)
            .map(|(tag, usage)| TagUsage { tag, usage })
            .collect())
    }

    // === Associations ===

    /// Attach a set of tag names to one active entity
    ///
    /// All or nothing: if the new tags would push the entity past the cap,
    /// nothing is attached and `TagLimitExceeded` reports the free slots.
    pub fn tag_content<S: AsRef<str>>(&self, target: &ContentRef, names: &[S]) -> WeaveResult<TagOutcome> {
        self.engine.resolve_visible(&self.world, target, Visibility::Active)?;

        // Spellings that share a key collapse to the first one submitted
        let mut distinct: BTreeMap<String, TagName> = BTreeMap::new();
        for raw in names {
            let name = self.normalize(raw.as_ref())?;
            distinct.entry(name.key.clone()).or_insert(name);
        }
        if distinct.is_empty() {
            return Ok(TagOutcome {
                added: Vec::new(),
                already_present: Vec::new(),
            });
        }
        let batch: Vec<TagName> = distinct.into_values().collect();

        let cap = self.engine.config().max_tags_per_entity;
        match self.engine.store().apply_tags(&self.world, target, &batch, cap)? {
            TagWrite::Applied { added, already_present } => {
                if !added.is_empty() {
                    self.engine.invalidate(&self.world);
                    info!(
                        world = %self.world,
                        target = %target,
                        added = added.len(),
                        "content tagged"
                    );
                }
                if !already_present.is_empty() {
                    debug!(target = %target, count = already_present.len(), "tags already present");
                }
                Ok(TagOutcome { added, already_present })
            }
            TagWrite::LimitExceeded { existing, requested_new } => Err(WeaveError::TagLimitExceeded {
                limit: cap,
                available: cap.saturating_sub(existing),
                requested: requested_new,
            }),
            TagWrite::TargetUnavailable => Err(WeaveError::NotFound(target.to_string())),
        }
    }

    /// Tags attached to an entity
    pub fn tags_for(&self, target: &ContentRef) -> WeaveResult<Vec<Tag>> {
        self.engine.resolve(&self.world, target)?;
        Ok(self.engine.store().tags_for(target)?)
    }

    /// Entities carrying a tag, newest first
    pub fn list_tagged(&self, name: &str, visibility: Visibility) -> WeaveResult<Vec<ContentEntity>> {
        let tag = self.tag(name)?;
        Ok(self.engine.store().entities_tagged(&tag.id, visibility)?)
    }

    /// Entities carrying at least one of the named tags
    ///
    /// Unknown names match nothing rather than failing.
    pub fn list_tagged_any<S: AsRef<str>>(&self, names: &[S], visibility: Visibility) -> WeaveResult<Vec<ContentEntity>> {
        let mut seen = HashSet::new();
        let mut entities = Vec::new();
        for tag in self.known_tags(names)?.into_iter().flatten() {
            for entity in self.engine.store().entities_tagged(&tag.id, visibility)? {
                if seen.insert(entity.content_ref()) {
                    entities.push(entity);
                }
            }
        }
        entities.sort_by(|a, b| b.created_at().cmp(&a.created_at()));
        Ok(entities)
    }

    /// Entities carrying every one of the named tags
    ///
    /// An unknown name makes the result empty.
    pub fn list_tagged_all<S: AsRef<str>>(&self, names: &[S], visibility: Visibility) -> WeaveResult<Vec<ContentEntity>> {
        let tags = self.known_tags(names)?;
        if tags.is_empty() || tags.iter().any(Option::is_none) {
            return Ok(Vec::new());
        }

        let mut tags = tags.into_iter().flatten();
        let Some(first) = tags.next() else {
            return Ok(Vec::new());
        };
        let mut entities = self.engine.store().entities_tagged(&first.id, visibility)?;
        for tag in tags {
            let carrying: HashSet<ContentRef> = self
                .engine
                .store()
                .entities_tagged(&tag.id, visibility)?
                .iter()
                .map(ContentEntity::content_ref)
                .collect();
            entities.retain(|e| carrying.contains(&e.content_ref()));
        }
        Ok(entities)
    }

    /// Resolve names to tags, `None` for names with no tag in this world
    fn known_tags<S: AsRef<str>>(&self, names: &[S]) -> WeaveResult<Vec<Option<Tag>>> {
        let mut keys: Vec<String> = names
            .iter()
            .filter_map(|n| TagName::normalize(n.as_ref()))
            .map(|n| n.key)
            .collect();
        keys.sort();
        keys.dedup();

        let store = self.engine.store();
        keys.iter()
            .map(|key| store.find_tag(&self.world, key).map_err(WeaveError::from))
            .collect()
    }

    /// Normalize and validate one submitted tag name
    fn normalize(&self, raw: &str) -> WeaveResult<TagName> {
        let config = self.engine.config();
        let name = TagName::normalize(raw)
            .ok_or_else(|| WeaveError::validation("tags", "tag names cannot be empty"))?;

        let len = name.key.chars().count();
        if len < config.tag_name_min_len || len > config.tag_name_max_len {
            return Err(WeaveError::validation(
                "tags",
                format!(
                    "tag '{}' must be {} to {} characters",
                    name.display, config.tag_name_min_len, config.tag_name_max_len
                ),
            ));
        }
        if config.reserved_tag_names.iter().any(|r| r == &name.key) {
            return Err(WeaveError::validation("tags", format!("'{}' is a reserved tag name", name.key)));
        }
        Ok(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{Actor, ContentDraft};

    fn setup() -> (WeaveEngine, Actor, WorldId) {
        let engine = WeaveEngine::in_memory().unwrap();
        let alice = Actor::user(engine.create_user("alice").unwrap().id);
        let world = engine.create_world(&alice, "Eldoria", "Misty isles", true).unwrap();
        (engine, alice, world.id)
    }

    fn page(engine: &WeaveEngine, actor: &Actor, world: &WorldId, title: &str) -> ContentRef {
        engine
            .create_content(actor, world, ContentDraft::page(title, "Some descriptive body text."))
            .unwrap()
            .content_ref()
    }

    #[test]
    fn test_normalized_names_collapse() {
        let (engine, alice, world) = setup();
        let target = page(&engine, &alice, &world, "Harbor");
        let tags = TagGraph::new(&engine, world);

        let outcome = tags.tag_content(&target, &["Magic", "magic", " magic "]).unwrap();
        assert_eq!(outcome.added.len(), 1);
        assert_eq!(outcome.added[0].display_name, "Magic");
        assert_eq!(tags.tags_for(&target).unwrap().len(), 1);
        assert_eq!(tags.list_tags().unwrap().len(), 1);
    }

    #[test]
    fn test_retag_reports_already_present() {
        let (engine, alice, world) = setup();
        let target = page(&engine, &alice, &world, "Harbor");
        let tags = TagGraph::new(&engine, world);

        tags.tag_content(&target, &["coast"]).unwrap();
        let outcome = tags.tag_content(&target, &["Coast", "fog"]).unwrap();
        assert_eq!(outcome.added.len(), 1);
        assert_eq!(outcome.already_present.len(), 1);
        assert_eq!(outcome.already_present[0].name, "coast");
    }

    #[test]
    fn test_cap_rejects_whole_batch() {
        let (engine, alice, world) = setup();
        let target = page(&engine, &alice, &world, "Harbor");
        let tags = TagGraph::new(&engine, world);

        let first: Vec<String> = (0..8).map(|i| format!("tag{i}")).collect();
        tags.tag_content(&target, first.as_slice()).unwrap();

        let err = tags.tag_content(&target, &["x1", "x2", "x3", "tag0"]).unwrap_err();
        match err {
            WeaveError::TagLimitExceeded {
                limit,
                available,
                requested,
            } => {
                assert_eq!(limit, 10);
                assert_eq!(available, 2);
                assert_eq!(requested, 3);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(tags.tags_for(&target).unwrap().len(), 8);
        assert!(tags.tag("x1").is_err());
    }

    #[test]
    fn test_invalid_names_rejected() {
        let (engine, alice, world) = setup();
        let target = page(&engine, &alice, &world, "Harbor");
        let tags = TagGraph::new(&engine, world);

        for bad in ["x", "admin", "   "] {
            let err = tags.tag_content(&target, &[bad]).unwrap_err();
            assert!(matches!(err, WeaveError::Validation { .. }), "{bad:?}");
        }
    }

    #[test]
    fn test_any_and_all_matching() {
        let (engine, alice, world) = setup();
        let a = page(&engine, &alice, &world, "Harbor");
        let b = page(&engine, &alice, &world, "Lighthouse");
        let tags = TagGraph::new(&engine, world);
        tags.tag_content(&a, &["coast", "fog"]).unwrap();
        tags.tag_content(&b, &["coast"]).unwrap();

        assert_eq!(tags.list_tagged_any(&["fog", "coast"], Visibility::Active).unwrap().len(), 2);
        let both = tags.list_tagged_all(&["fog", "coast"], Visibility::Active).unwrap();
        assert_eq!(both.len(), 1);
        assert_eq!(both[0].content_ref(), a);
        assert!(tags.list_tagged_all(&["coast", "nowhere"], Visibility::Active).unwrap().is_empty());

        let popular = tags.popular_tags(5).unwrap();
        assert_eq!(popular[0].tag.name, "coast");
        assert_eq!(popular[0].usage, 2);
    }
}
