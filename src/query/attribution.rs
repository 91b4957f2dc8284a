//! Attribution and collaboration metrics derived from content and links
//!
//! Reports are recomputed from the store. The engine may hold the last
//! report per world, but drops it on every create, tag, link or lifecycle
//! change in that world, so a cached report never outlives the graph it
//! was computed from.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::graph::{ContentKind, ContentRef, UserId, WeaveEngine, WeaveResult, WorldId};
use crate::storage::EntityFilter;

/// How many author pairs `top_collaborations` keeps
const TOP_COLLABORATIONS: usize = 10;

/// Qualitative strength of a collaboration between two authors
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CollaborationStrength {
    Low,
    Medium,
    High,
}

impl CollaborationStrength {
    /// High at five or more cross-author links, medium at two or more
    pub fn from_link_count(count: usize) -> Self {
        match count {
            n if n >= 5 => Self::High,
            n if n >= 2 => Self::Medium,
            _ => Self::Low,
        }
    }
}

/// One author's contribution to a world
#[derive(Debug, Clone, Serialize)]
pub struct AuthorAttribution {
    pub author: UserId,
    pub username: String,
    /// Active entities authored
    pub contribution_count: usize,
    pub by_kind: BTreeMap<ContentKind, usize>,
    /// Cross-author links whose source is this author's content
    pub outbound_cross_author: usize,
    /// Cross-author links whose target is this author's content
    pub inbound_cross_author: usize,
    /// Cross-author links touching this author's content per entity authored
    pub collaboration_score: f64,
    /// Other authors connected through cross-author links
    pub collaborates_with: Vec<UserId>,
    pub first_contribution: DateTime<Utc>,
    pub latest_contribution: DateTime<Utc>,
}

/// Two authors and the cross-author links between their content
#[derive(Debug, Clone, Serialize)]
pub struct Collaboration {
    pub authors: [UserId; 2],
    pub usernames: [String; 2],
    pub link_count: usize,
    pub strength: CollaborationStrength,
}

/// Per-world attribution and collaboration report
#[derive(Debug, Clone, Serialize)]
pub struct AttributionReport {
    pub world_id: WorldId,
    pub generated_at: DateTime<Utc>,
    /// Active entities in the world
    pub total_content: usize,
    /// Links whose endpoints are both active
    pub total_links: usize,
    pub cross_author_links: usize,
    /// `cross_author_links / total_links`, 0.0 when there are no links
    pub collaboration_density: f64,
    /// Authors by contribution count, most prolific first
    pub authors: Vec<AuthorAttribution>,
    pub top_collaborations: Vec<Collaboration>,
    /// Authors with at least one cross-author link
    pub collaborative_authors: usize,
}

impl AttributionReport {
    /// The current report for a world, reusing the engine's cached copy
    /// when nothing has changed since it was computed
    pub fn for_world(engine: &WeaveEngine, world: &WorldId) -> WeaveResult<Self> {
        if let Some(report) = engine.cached_report(world) {
            return Ok(report);
        }
        let report = Self::compute(engine, world)?;
        engine.cache_report(report.clone());
        Ok(report)
    }

    /// Recompute the report from the store
    pub fn compute(engine: &WeaveEngine, world: &WorldId) -> WeaveResult<Self> {
        let entities = engine.list_content(world, &EntityFilter::new())?;
        let authorship: HashMap<ContentRef, UserId> =
            entities.iter().map(|e| (e.content_ref(), e.author())).collect();

        let mut authors: HashMap<UserId, AuthorTally> = HashMap::new();
        for entity in &entities {
            let tally = authors.entry(entity.author()).or_insert_with(|| AuthorTally::new(entity.created_at()));
            tally.contributions += 1;
            *tally.by_kind.entry(entity.kind()).or_insert(0) += 1;
            tally.first = tally.first.min(entity.created_at());
            tally.latest = tally.latest.max(entity.created_at());
        }

        let mut total_links = 0;
        let mut cross_author_links = 0;
        let mut pairs: BTreeMap<(UserId, UserId), usize> = BTreeMap::new();
        for link in engine.store().links_in_world(world)? {
            let (Some(&from), Some(&to)) = (authorship.get(&link.source), authorship.get(&link.target)) else {
                continue;
            };
            total_links += 1;
            if !link.cross_author {
                continue;
            }
            cross_author_links += 1;
            if let Some(t) = authors.get_mut(&from) {
                t.outbound += 1;
                t.partners.insert(to);
            }
            if let Some(t) = authors.get_mut(&to) {
                t.inbound += 1;
                t.partners.insert(from);
            }
            *pairs.entry((from.min(to), from.max(to))).or_insert(0) += 1;
        }

        let mut usernames = HashMap::new();
        for id in authors.keys() {
            usernames.insert(*id, engine.user(id).map(|u| u.username)?);
        }
        let name = |id: &UserId| usernames.get(id).cloned().unwrap_or_else(|| id.to_string());

        let mut attributions: Vec<AuthorAttribution> = authors
            .into_iter()
            .map(|(author, t)| AuthorAttribution {
                author,
                username: name(&author),
                contribution_count: t.contributions,
                collaboration_score: (t.outbound + t.inbound) as f64 / t.contributions as f64,
                by_kind: t.by_kind,
                outbound_cross_author: t.outbound,
                inbound_cross_author: t.inbound,
                collaborates_with: t.partners.into_iter().collect(),
                first_contribution: t.first,
                latest_contribution: t.latest,
            })
            .collect();
        attributions.sort_by(|a, b| {
            b.contribution_count
                .cmp(&a.contribution_count)
                .then_with(|| a.username.cmp(&b.username))
        });

        let mut top_collaborations: Vec<Collaboration> = pairs
            .into_iter()
            .map(|((a, b), link_count)| Collaboration {
                authors: [a, b],
                usernames: [name(&a), name(&b)],
                link_count,
                strength: CollaborationStrength::from_link_count(link_count),
            })
            .collect();
        top_collaborations.sort_by(|a, b| b.link_count.cmp(&a.link_count));
        top_collaborations.truncate(TOP_COLLABORATIONS);

        let collaboration_density = if total_links == 0 {
            0.0
        } else {
            cross_author_links as f64 / total_links as f64
        };
        let collaborative_authors = attributions.iter().filter(|a| !a.collaborates_with.is_empty()).count();

        Ok(Self {
            world_id: *world,
            generated_at: Utc::now(),
            total_content: entities.len(),
            total_links,
            cross_author_links,
            collaboration_density,
            authors: attributions,
            top_collaborations,
            collaborative_authors,
        })
    }

    /// Attribution for one author, if they have active content in the world
    pub fn author(&self, author: &UserId) -> Option<&AuthorAttribution> {
        self.authors.iter().find(|a| &a.author == author)
    }
}

/// Running totals for one author while a report is built
struct AuthorTally {
    contributions: usize,
    by_kind: BTreeMap<ContentKind, usize>,
    outbound: usize,
    inbound: usize,
    partners: BTreeSet<UserId>,
    first: DateTime<Utc>,
    latest: DateTime<Utc>,
}

impl AuthorTally {
    fn new(at: DateTime<Utc>) -> Self {
        Self {
            contributions: 0,
            by_kind: BTreeMap::new(),
            outbound: 0,
            inbound: 0,
            partners: BTreeSet::new(),
            first: at,
            latest: at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{Actor, ContentDraft};
    use crate::lifecycle::LifecycleManager;
    use crate::linking::LinkGraph;

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
    fn test_empty_world() {
        let s = setup();
        let report = AttributionReport::compute(&s.engine, &s.world).unwrap();
        assert_eq!(report.total_content, 0);
        assert_eq!(report.collaboration_density, 0.0);
        assert!(report.authors.is_empty());
    }

    #[test]
    fn test_single_cross_author_link() {
        let s = setup();
        let p1 = s.page(&s.alice, "Harbor");
        let c1 = s
            .engine
            .create_content(&s.bob, &s.world, ContentDraft::character("Captain Mira", "Commands the Gull.", "Mira Vance"))
            .unwrap()
            .content_ref();
        LinkGraph::new(&s.engine, s.world).link(&p1, &c1).unwrap();

        let report = AttributionReport::compute(&s.engine, &s.world).unwrap();
        assert_eq!(report.total_links, 1);
        assert_eq!(report.collaboration_density, 1.0);

        let alice = report.author(&s.alice.user).unwrap();
        assert_eq!(alice.contribution_count, 1);
        assert_eq!(alice.outbound_cross_author, 1);
        assert_eq!(alice.inbound_cross_author, 0);
        assert_eq!(alice.collaboration_score, 1.0);
        assert_eq!(alice.collaborates_with, vec![s.bob.user]);

        assert_eq!(report.top_collaborations.len(), 1);
        assert_eq!(report.top_collaborations[0].strength, CollaborationStrength::Low);
        assert_eq!(report.collaborative_authors, 2);
    }

    #[test]
    fn test_same_author_links_dilute_density() {
        let s = setup();
        let a = s.page(&s.alice, "Harbor");
        let b = s.page(&s.alice, "Lighthouse");
        let c = s.page(&s.bob, "Reef");
        let links = LinkGraph::new(&s.engine, s.world);
        links.link(&a, &b).unwrap();
        links.link(&a, &c).unwrap();

        let report = AttributionReport::compute(&s.engine, &s.world).unwrap();
        assert_eq!(report.collaboration_density, 0.5);
        let alice = report.author(&s.alice.user).unwrap();
        assert_eq!(alice.contribution_count, 2);
        assert_eq!(alice.collaboration_score, 0.5);
        assert_eq!(report.authors[0].username, "alice");
    }

    #[test]
    fn test_cache_invalidated_by_lifecycle() {
        let s = setup();
        let a = s.page(&s.alice, "Harbor");
        let c = s.page(&s.bob, "Reef");
        LinkGraph::new(&s.engine, s.world).link(&a, &c).unwrap();

        let before = AttributionReport::for_world(&s.engine, &s.world).unwrap();
        assert_eq!(before.cross_author_links, 1);

        LifecycleManager::new(&s.engine, s.world).soft_delete(&s.alice, &a).unwrap();
        let after = AttributionReport::for_world(&s.engine, &s.world).unwrap();
        assert_eq!(after.total_content, 1);
        assert_eq!(after.cross_author_links, 0);
        assert!(s.engine.cached_report(&s.world).is_some());
    }

    #[test]
    fn test_strength_thresholds() {
        assert_eq!(CollaborationStrength::from_link_count(1), CollaborationStrength::Low);
        assert_eq!(CollaborationStrength::from_link_count(2), CollaborationStrength::Medium);
        assert_eq!(CollaborationStrength::from_link_count(5), CollaborationStrength::High);
    }
}
