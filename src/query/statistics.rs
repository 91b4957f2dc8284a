//! World statistics: a summary of what a world contains

use std::collections::{BTreeMap, HashSet};

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use crate::graph::{ContentKind, WeaveEngine, WeaveResult, WorldId};
use crate::storage::EntityFilter;
use crate::tagging::{TagGraph, TagUsage};

/// Window counted as "recent" activity
const RECENT_DAYS: i64 = 30;
const POPULAR_TAGS: usize = 10;

#[derive(Debug, Clone, Serialize)]
pub struct WorldStatistics {
    pub world_id: WorldId,
    /// Active entities
    pub total_content: usize,
    pub by_kind: BTreeMap<ContentKind, usize>,
    /// Distinct authors of active content
    pub contributors: usize,
    /// Soft-deleted entities awaiting restore or purge
    pub deleted_content: usize,
    /// Tags in the vocabulary, used or not
    pub total_tags: usize,
    /// Links between active entities
    pub total_links: usize,
    pub cross_author_links: usize,
    /// Active entities created in the last 30 days
    pub recent_content: usize,
    pub recent_contributors: usize,
    pub popular_tags: Vec<TagUsage>,
}

impl WorldStatistics {
    pub fn compute(engine: &WeaveEngine, world: &WorldId) -> WeaveResult<Self> {
        Self::compute_at(engine, world, Utc::now())
    }

    pub fn compute_at(engine: &WeaveEngine, world: &WorldId, now: DateTime<Utc>) -> WeaveResult<Self> {
        let all = engine.list_content(world, &EntityFilter::deleted_only())?;
        let (deleted, active): (Vec<_>, Vec<_>) = all.into_iter().partition(|e| e.is_deleted());

        let mut by_kind = BTreeMap::new();
        for entity in &active {
            *by_kind.entry(entity.kind()).or_insert(0) += 1;
        }
        let contributors: HashSet<_> = active.iter().map(|e| e.author()).collect();

        let recent_since = now - Duration::days(RECENT_DAYS);
        let recent: Vec<_> = active.iter().filter(|e| e.created_at() >= recent_since).collect();
        let recent_contributors: HashSet<_> = recent.iter().map(|e| e.author()).collect();

        let active_refs: HashSet<_> = active.iter().map(|e| e.content_ref()).collect();
        let links: Vec<_> = engine
            .store()
            .links_in_world(world)?
            .into_iter()
            .filter(|l| active_refs.contains(&l.source) && active_refs.contains(&l.target))
            .collect();

        let tags = TagGraph::new(engine, *world);

        Ok(Self {
            world_id: *world,
            total_content: active.len(),
            by_kind,
            contributors: contributors.len(),
            deleted_content: deleted.len(),
            total_tags: tags.list_tags()?.len(),
            total_links: links.len(),
            cross_author_links: links.iter().filter(|l| l.cross_author).count(),
            recent_content: recent.len(),
            recent_contributors: recent_contributors.len(),
            popular_tags: tags.popular_tags(POPULAR_TAGS)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{Actor, ContentDraft};
    use crate::lifecycle::LifecycleManager;

    #[test]
    fn test_counts_active_and_deleted() {
        let engine = WeaveEngine::in_memory().unwrap();
        let alice = Actor::user(engine.create_user("alice").unwrap().id);
        let bob = Actor::user(engine.create_user("bob").unwrap().id);
        let world = engine.create_world(&alice, "Eldoria", "Misty isles", true).unwrap().id;

        let harbor = engine
            .create_content(&alice, &world, ContentDraft::page("Harbor", "The harbor is foggy."))
            .unwrap()
            .content_ref();
        engine
            .create_content(&bob, &world, ContentDraft::story("The Drowned Bell", "The bell rings under the bay."))
            .unwrap();
        engine
            .create_content(&bob, &world, ContentDraft::page("Reef", "Sharp coral under the surface."))
            .unwrap();
        TagGraph::new(&engine, world).tag_content(&harbor, &["coast"]).unwrap();
        LifecycleManager::new(&engine, world).soft_delete(&alice, &harbor).unwrap();

        let stats = WorldStatistics::compute(&engine, &world).unwrap();
        assert_eq!(stats.total_content, 2);
        assert_eq!(stats.deleted_content, 1);
        assert_eq!(stats.contributors, 1);
        assert_eq!(stats.by_kind.get(&ContentKind::Story), Some(&1));
        assert_eq!(stats.by_kind.get(&ContentKind::Page), Some(&1));
        assert_eq!(stats.total_tags, 1);
        assert!(stats.popular_tags.is_empty());
        assert_eq!(stats.recent_content, 2);

        let later = WorldStatistics::compute_at(&engine, &world, Utc::now() + Duration::days(60)).unwrap();
        assert_eq!(later.recent_content, 0);
    }
}
