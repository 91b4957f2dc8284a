//! Link graph: directed links between content, traversable from either end

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info};

use crate::graph::{
    ContentEntity, ContentRef, LinkAssociation, LinkDirection, Visibility, WeaveEngine, WeaveError,
    WeaveResult, WorldId,
};
use crate::storage::LinkWrite;

/// Result of linking one source to several targets
#[derive(Debug, Clone, Serialize)]
pub struct LinkBatch {
    pub added: Vec<LinkAssociation>,
    /// Targets that were already linked from the source
    pub already_linked: Vec<ContentRef>,
}

/// One entity linked to or from the queried entity
#[derive(Debug, Clone, Serialize)]
pub struct RelatedContent {
    pub entity: ContentEntity,
    pub direction: LinkDirection,
    pub cross_author: bool,
    pub linked_at: DateTime<Utc>,
}

/// Link operations scoped to a single world.
pub struct LinkGraph<'a> {
    engine: &'a WeaveEngine,
    world: WorldId,
}

impl<'a> LinkGraph<'a> {
    pub fn new(engine: &'a WeaveEngine, world: WorldId) -> Self {
        Self { engine, world }
    }

    /// Link `source` to `target`
    ///
    /// Fails with `SelfLink`, `CrossWorldReference`, `NotFound` for missing
    /// or soft-deleted endpoints, `AlreadyPurged` for purged ones, and
    /// `DuplicateLink` (benign) when the edge exists.
    pub fn link(&self, source: &ContentRef, target: &ContentRef) -> WeaveResult<LinkAssociation> {
        let link = self.prepare(source, target)?;
        self.insert(link)
    }

    /// Link one source to many targets, recovering duplicates
    ///
    /// Every target is checked before anything is written, so an invalid
    /// target leaves no partial batch behind.
    pub fn link_many(&self, source: &ContentRef, targets: &[ContentRef]) -> WeaveResult<LinkBatch> {
        let mut prepared = Vec::with_capacity(targets.len());
        for target in targets {
            if prepared.iter().any(|l: &LinkAssociation| &l.target == target) {
                continue;
            }
            prepared.push(self.prepare(source, target)?);
        }

        let mut batch = LinkBatch {
            added: Vec::new(),
            already_linked: Vec::new(),
        };
        for link in prepared {
            let target = link.target;
            match self.insert(link) {
                Ok(link) => batch.added.push(link),
                Err(WeaveError::DuplicateLink { .. }) => batch.already_linked.push(target),
                Err(e) => return Err(e),
            }
        }
        Ok(batch)
    }

    /// Outbound links of an entity
    ///
    /// With `Visibility::Active`, links whose target is soft-deleted are
    /// hidden; `IncludeDeleted` shows every stored edge.
    pub fn links_from(&self, entity: &ContentRef, visibility: Visibility) -> WeaveResult<Vec<LinkAssociation>> {
        self.engine.resolve(&self.world, entity)?;
        let links = self.engine.store().links_from(entity)?;
        self.visible(links, |l| l.target, visibility)
    }

    /// Inbound links of an entity
    pub fn links_to(&self, entity: &ContentRef, visibility: Visibility) -> WeaveResult<Vec<LinkAssociation>> {
        self.engine.resolve(&self.world, entity)?;
        let links = self.engine.store().links_to(entity)?;
        self.visible(links, |l| l.source, visibility)
    }

    /// Union of outbound and inbound links, annotated with direction
    pub fn related(&self, entity: &ContentRef, visibility: Visibility) -> WeaveResult<Vec<RelatedContent>> {
        self.engine.resolve(&self.world, entity)?;
        let store = self.engine.store();
        let mut links = store.links_from(entity)?;
        links.extend(store.links_to(entity)?);

        let mut related = Vec::with_capacity(links.len());
        for link in links {
            let Some((other, direction)) = link.other_end(entity) else {
                continue;
            };
            let Some(other) = store.load_entity(&other)? else {
                continue;
            };
            if visibility.admits(&other.lifecycle()) {
                related.push(RelatedContent {
                    entity: other,
                    direction,
                    cross_author: link.cross_author,
                    linked_at: link.created_at,
                });
            }
        }
        related.sort_by(|a, b| b.linked_at.cmp(&a.linked_at));
        Ok(related)
    }

    /// Validate both endpoints and build the link record
    fn prepare(&self, source: &ContentRef, target: &ContentRef) -> WeaveResult<LinkAssociation> {
        if source == target {
            return Err(WeaveError::SelfLink(*source));
        }
        let from = self.endpoint(source)?;
        let to = self.endpoint(target)?;
        Ok(LinkAssociation::new(
            self.world,
            *source,
            *target,
            from.author() != to.author(),
        ))
    }

    fn endpoint(&self, target: &ContentRef) -> WeaveResult<ContentEntity> {
        let entity = self.engine.resolve_or_tombstone(&self.world, target)?;
        if entity.is_deleted() {
            return Err(WeaveError::NotFound(target.to_string()));
        }
        Ok(entity)
    }

    fn insert(&self, link: LinkAssociation) -> WeaveResult<LinkAssociation> {
        match self.engine.store().insert_link(&link)? {
            LinkWrite::Inserted => {
                self.engine.invalidate(&self.world);
                info!(
                    world = %self.world,
                    source = %link.source,
                    target = %link.target,
                    cross_author = link.cross_author,
                    "content linked"
                );
                Ok(link)
            }
            LinkWrite::Duplicate => {
                debug!(source = %link.source, target = %link.target, "link already exists");
                Err(WeaveError::DuplicateLink {
                    from: link.source,
                    to: link.target,
                })
            }
            // A purge or soft delete committed between validation and insert
            LinkWrite::EndpointMissing(gone) => Err(WeaveError::AlreadyPurged(gone)),
            LinkWrite::EndpointInactive(hidden) => {
                debug!(endpoint = %hidden, "link endpoint soft-deleted before insert");
                Err(WeaveError::NotFound(hidden.to_string()))
            }
        }
    }

    fn visible(
        &self,
        links: Vec<LinkAssociation>,
        other: impl Fn(&LinkAssociation) -> ContentRef,
        visibility: Visibility,
    ) -> WeaveResult<Vec<LinkAssociation>> {
        if visibility == Visibility::IncludeDeleted {
            return Ok(links);
        }
        let store = self.engine.store();
        let mut kept = Vec::with_capacity(links.len());
        for link in links {
            let active = store
                .load_entity(&other(&link))?
                .is_some_and(|e| visibility.admits(&e.lifecycle()));
            if active {
                kept.push(link);
            }
        }
        Ok(kept)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{Actor, ContentDraft};

    struct Setup {
        engine: WeaveEngine,
        alice: Actor,
        bob: Actor,
        world: WorldId,
    }

    fn setup() -> Setup {
        let engine = WeaveEngine::in_memory().unwrap();
        let alice = Actor::user(engine.create_user("alice").unwrap().id);
        let bob = Actor::user(engine.create_user("bob").unwrap().id);
        let world = engine.create_world(&alice, "Eldoria", "Misty isles", true).unwrap().id;
        Setup {
            engine,
            alice,
            bob,
            world,
        }
    }

    impl Setup {
        fn page(&self, actor: &Actor, title: &str) -> ContentRef {
            self.engine
                .create_content(actor, &self.world, ContentDraft::page(title, "Some descriptive body text."))
                .unwrap()
                .content_ref()
        }
    }

    #[test]
    fn test_link_is_traversable_both_ways() {
        let s = setup();
        let a = s.page(&s.alice, "Harbor");
        let b = s.page(&s.bob, "Lighthouse");
        let links = LinkGraph::new(&s.engine, s.world);

        let link = links.link(&a, &b).unwrap();
        assert!(link.cross_author);

        let from_a = links.links_from(&a, Visibility::Active).unwrap();
        let to_b = links.links_to(&b, Visibility::Active).unwrap();
        assert_eq!(from_a[0].target, b);
        assert_eq!(to_b[0].source, a);

        let related = links.related(&b, Visibility::Active).unwrap();
        assert_eq!(related.len(), 1);
        assert_eq!(related[0].direction, LinkDirection::Inbound);
        assert_eq!(related[0].entity.content_ref(), a);
    }

    #[test]
    fn test_duplicate_link_is_benign() {
        let s = setup();
        let a = s.page(&s.alice, "Harbor");
        let b = s.page(&s.alice, "Lighthouse");
        let links = LinkGraph::new(&s.engine, s.world);

        let first = links.link(&a, &b).unwrap();
        assert!(!first.cross_author);
        let err = links.link(&a, &b).unwrap_err();
        assert!(err.is_benign());
        assert_eq!(links.links_from(&a, Visibility::Active).unwrap().len(), 1);
    }

    #[test]
    fn test_self_link_rejected() {
        let s = setup();
        let a = s.page(&s.alice, "Harbor");
        let err = LinkGraph::new(&s.engine, s.world).link(&a, &a).unwrap_err();
        assert!(matches!(err, WeaveError::SelfLink(r) if r == a));
    }

    #[test]
    fn test_cross_world_link_rejected() {
        let s = setup();
        let a = s.page(&s.alice, "Harbor");
        let other = s.engine.create_world(&s.bob, "Karth", "Desert kingdoms", true).unwrap();
        let dunes = s
            .engine
            .create_content(&s.bob, &other.id, ContentDraft::page("Dunes", "Endless shifting sand."))
            .unwrap()
            .content_ref();

        let err = LinkGraph::new(&s.engine, s.world).link(&a, &dunes).unwrap_err();
        assert!(matches!(err, WeaveError::CrossWorldReference { .. }));
    }

    #[test]
    fn test_link_many_recovers_duplicates() {
        let s = setup();
        let a = s.page(&s.alice, "Harbor");
        let b = s.page(&s.bob, "Lighthouse");
        let c = s.page(&s.bob, "Reef");
        let links = LinkGraph::new(&s.engine, s.world);
        links.link(&a, &b).unwrap();

        let batch = links.link_many(&a, &[b, c, c]).unwrap();
        assert_eq!(batch.added.len(), 1);
        assert_eq!(batch.added[0].target, c);
        assert_eq!(batch.already_linked, vec![b]);
    }

    #[test]
    fn test_link_many_validates_before_writing() {
        let s = setup();
        let a = s.page(&s.alice, "Harbor");
        let b = s.page(&s.bob, "Lighthouse");
        let links = LinkGraph::new(&s.engine, s.world);

        let err = links.link_many(&a, &[b, a]).unwrap_err();
        assert!(matches!(err, WeaveError::SelfLink(_)));
        assert!(links.links_from(&a, Visibility::IncludeDeleted).unwrap().is_empty());
    }
}
