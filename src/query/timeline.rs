//! Timeline queries: chronological views of a world's content

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};

use super::types::{TagMatch, TimelineEntry, TimelinePage};
use crate::graph::{ContentEntity, ContentKind, ContentRef, UserId, Visibility, WeaveEngine, WeaveResult, WorldId};
use crate::storage::EntityFilter;
use crate::tagging::TagGraph;

/// Page size when none is requested
pub const DEFAULT_LIMIT: usize = 50;
/// Largest page a caller may request
pub const MAX_LIMIT: usize = 200;

const SUMMARY_CHARS: usize = 200;

/// Query for a world's content, newest first
///
/// Every filter is ANDed with the others. An empty result is a valid
/// answer, not an error.
#[derive(Debug, Clone, Default)]
pub struct TimelineQuery {
    /// Only content by this author
    pub author: Option<UserId>,
    /// Only these kinds (empty = all kinds)
    pub kinds: Vec<ContentKind>,
    /// Tag names to filter by (any spelling)
    pub tags: Vec<String>,
    /// Whether content needs any or all of `tags`
    pub tag_match: TagMatch,
    /// Created at or after
    pub since: Option<DateTime<Utc>>,
    /// Created at or before
    pub until: Option<DateTime<Utc>>,
    /// Case-insensitive text in title or body
    pub search: Option<String>,
    /// Maximum number of entries (clamped to `MAX_LIMIT`)
    pub limit: Option<usize>,
    /// Number of entries to skip
    pub offset: Option<usize>,
    /// Lifecycle states to include
    pub visibility: Visibility,
}

impl TimelineQuery {
    /// Create a new empty query (all active content)
    pub fn new() -> Self {
        Self::default()
    }

    pub fn by_author(mut self, author: UserId) -> Self {
        self.author = Some(author);
        self
    }

    pub fn with_kind(mut self, kind: ContentKind) -> Self {
        self.kinds.push(kind);
        self
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    pub fn tag_match(mut self, mode: TagMatch) -> Self {
        self.tag_match = mode;
        self
    }

    pub fn since(mut self, since: DateTime<Utc>) -> Self {
        self.since = Some(since);
        self
    }

    pub fn until(mut self, until: DateTime<Utc>) -> Self {
        self.until = Some(until);
        self
    }

    pub fn search(mut self, text: impl Into<String>) -> Self {
        self.search = Some(text.into());
        self
    }

    /// Limit results
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Skip results (for pagination)
    pub fn offset(mut self, offset: usize) -> Self {
        self.offset = Some(offset);
        self
    }

    pub fn include_deleted(mut self, include: bool) -> Self {
        self.visibility = Visibility::including_deleted(include);
        self
    }

    /// Effective page size
    pub fn effective_limit(&self) -> usize {
        self.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT)
    }

    /// Execute the query against a world
    pub fn execute(&self, engine: &WeaveEngine, world: &WorldId) -> WeaveResult<TimelinePage> {
        let limit = self.effective_limit();
        let offset = self.offset.unwrap_or(0);

        let filter = EntityFilter {
            kinds: self.kinds.clone(),
            author: self.author,
            visibility: self.visibility,
            since: self.since,
            until: self.until,
            search: self.search.clone(),
        };
        let mut entities = engine.list_content(world, &filter)?;

        if !self.tags.is_empty() {
            let tagged = self.tagged(engine, world)?;
            entities.retain(|e| tagged.contains(&e.content_ref()));
        }

        let total_count = entities.len();
        if offset >= total_count {
            let mut page = TimelinePage::empty(limit, offset);
            page.total_count = total_count;
            return Ok(page);
        }

        let mut names = HashMap::new();
        let entries = entities
            .into_iter()
            .skip(offset)
            .take(limit)
            .map(|entity| self.entry(engine, entity, &mut names))
            .collect::<WeaveResult<Vec<_>>>()?;

        Ok(TimelinePage {
            entries,
            total_count,
            limit,
            offset,
        })
    }

    /// Content references matching the tag filter
    fn tagged(&self, engine: &WeaveEngine, world: &WorldId) -> WeaveResult<HashSet<ContentRef>> {
        let tags = TagGraph::new(engine, *world);
        let entities = match self.tag_match {
            TagMatch::Any => tags.list_tagged_any(self.tags.as_slice(), self.visibility)?,
            TagMatch::All => tags.list_tagged_all(self.tags.as_slice(), self.visibility)?,
        };
        Ok(entities.iter().map(ContentEntity::content_ref).collect())
    }

    fn entry(
        &self,
        engine: &WeaveEngine,
        entity: ContentEntity,
        names: &mut HashMap<UserId, String>,
    ) -> WeaveResult<TimelineEntry> {
        let author = entity.author();
        let author_name = match names.get(&author) {
            Some(name) => name.clone(),
            None => {
                let name = engine.user(&author).map(|u| u.username)?;
                names.insert(author, name.clone());
                name
            }
        };
        let tags = engine
            .store()
            .tags_for(&entity.content_ref())?
            .into_iter()
            .map(|t| t.display_name)
            .collect();

        Ok(TimelineEntry {
            target: entity.content_ref(),
            title: entity.title().to_string(),
            author,
            author_name,
            created_at: entity.created_at(),
            summary: entity.summary(SUMMARY_CHARS),
            tags,
            deleted: entity.is_deleted(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{Actor, ContentDraft};
    use crate::lifecycle::LifecycleManager;

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
        fn create(&self, actor: &Actor, draft: ContentDraft, tags: &[&str]) -> ContentRef {
            let r = self.engine.create_content(actor, &self.world, draft).unwrap().content_ref();
            if !tags.is_empty() {
                TagGraph::new(&self.engine, self.world).tag_content(&r, tags).unwrap();
            }
            r
        }
    }

    #[test]
    fn test_newest_first_with_filters() {
        let s = setup();
        let harbor = s.create(&s.alice, ContentDraft::page("Harbor", "The harbor is foggy."), &["coast"]);
        let mira = s.create(
            &s.bob,
            ContentDraft::character("Captain Mira", "Commands the Gull.", "Mira Vance"),
            &["coast", "crew"],
        );
        let tides = s.create(&s.alice, ContentDraft::essay("On Tides", "The moon pulls the sea."), &[]);

        let all = TimelineQuery::new().execute(&s.engine, &s.world).unwrap();
        let order: Vec<ContentRef> = all.entries.iter().map(|e| e.target).collect();
        assert_eq!(order, vec![tides, mira, harbor]);
        assert_eq!(all.entries[1].author_name, "bob");

        let alice_pages = TimelineQuery::new()
            .by_author(s.alice.user)
            .with_kind(ContentKind::Page)
            .execute(&s.engine, &s.world)
            .unwrap();
        assert_eq!(alice_pages.total_count, 1);
        assert_eq!(alice_pages.entries[0].target, harbor);

        let crew = TimelineQuery::new()
            .with_tag("Crew")
            .with_tag("coast")
            .tag_match(TagMatch::All)
            .execute(&s.engine, &s.world)
            .unwrap();
        assert_eq!(crew.entries.len(), 1);
        assert_eq!(crew.entries[0].tags, vec!["coast".to_string(), "crew".to_string()]);

        let none = TimelineQuery::new()
            .by_author(s.bob.user)
            .with_kind(ContentKind::Essay)
            .execute(&s.engine, &s.world)
            .unwrap();
        assert_eq!(none.total_count, 0);
    }

    #[test]
    fn test_soft_deleted_hidden_by_default() {
        let s = setup();
        let harbor = s.create(&s.alice, ContentDraft::page("Harbor", "The harbor is foggy."), &[]);
        LifecycleManager::new(&s.engine, s.world).soft_delete(&s.alice, &harbor).unwrap();

        assert_eq!(TimelineQuery::new().execute(&s.engine, &s.world).unwrap().total_count, 0);
        let with_deleted = TimelineQuery::new()
            .include_deleted(true)
            .execute(&s.engine, &s.world)
            .unwrap();
        assert_eq!(with_deleted.total_count, 1);
        assert!(with_deleted.entries[0].deleted);
    }

    #[test]
    fn test_pagination_and_search() {
        let s = setup();
        for i in 0..5 {
            s.create(
                &s.alice,
                ContentDraft::page(format!("Island {i}"), format!("Island number {i} of the chain.")),
                &[],
            );
        }

        let page = TimelineQuery::new().limit(2).offset(1).execute(&s.engine, &s.world).unwrap();
        assert_eq!(page.total_count, 5);
        assert_eq!(page.entries.len(), 2);
        assert_eq!(page.entries[0].title, "Island 3");
        assert!(page.has_more());

        let beyond = TimelineQuery::new().offset(10).execute(&s.engine, &s.world).unwrap();
        assert!(beyond.entries.is_empty());
        assert_eq!(beyond.total_count, 5);

        let found = TimelineQuery::new().search("NUMBER 2").execute(&s.engine, &s.world).unwrap();
        assert_eq!(found.total_count, 1);

        assert_eq!(TimelineQuery::new().limit(1000).effective_limit(), MAX_LIMIT);
        assert_eq!(TimelineQuery::new().effective_limit(), DEFAULT_LIMIT);
    }
}
