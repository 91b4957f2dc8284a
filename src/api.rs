//! Transport-independent API layer.
//!
//! `WeaveApi` is the surface an HTTP layer calls. It takes path segments and
//! query parameters as the strings the transport received, parses them into
//! typed references, and delegates to the engine and its world-scoped views.
//! [`status_code`] and [`ErrorBody`] translate typed outcomes into HTTP
//! responses.

use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::graph::{
    Actor, ContentDraft, ContentEntity, ContentKind, ContentPatch, ContentRef, EntityId, UserId,
    Visibility, WeaveEngine, WeaveError, WeaveResult, WorldId,
};
use crate::lifecycle::{LifecycleManager, PurgePlan, PurgeReport};
use crate::linking::{LinkBatch, LinkGraph, RelatedContent};
use crate::query::{AttributionReport, TagMatch, TimelinePage, TimelineQuery, WorldStatistics};
use crate::tagging::{TagGraph, TagOutcome};

/// A link target as submitted in an `add-links` body
#[derive(Debug, Clone, Deserialize)]
pub struct LinkTarget {
    #[serde(alias = "content_type")]
    pub kind: String,
    #[serde(alias = "content_id")]
    pub id: String,
}

/// Raw timeline query parameters
///
/// List-valued parameters are comma-separated (`content_types=page,story`).
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct TimelineParams {
    pub content_types: Option<String>,
    /// Username or user id
    pub author: Option<String>,
    pub tags: Option<String>,
    pub tag_match: Option<String>,
    /// RFC 3339 timestamp or `YYYY-MM-DD`
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    pub search: Option<String>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
    pub include_deleted: bool,
}

/// JSON error payload
#[derive(Debug, Clone, Serialize)]
pub struct ErrorBody {
    pub status: u16,
    pub error: &'static str,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl From<&WeaveError> for ErrorBody {
    fn from(err: &WeaveError) -> Self {
        let details = match err {
            WeaveError::TagLimitExceeded {
                limit,
                available,
                requested,
            } => Some(serde_json::json!({
                "limit": limit,
                "available": available,
                "requested": requested,
            })),
            WeaveError::PurgeBlocked { reason, .. } => serde_json::to_value(reason).ok(),
            WeaveError::Validation { field, .. } => Some(serde_json::json!({ "field": field })),
            _ => None,
        };
        let message = match err {
            // Storage internals stay in the logs
            WeaveError::Storage(_) => "internal storage error".to_string(),
            other => other.to_string(),
        };
        Self {
            status: status_code(err),
            error: error_code(err),
            message,
            details,
        }
    }
}

/// HTTP status for an engine outcome
pub fn status_code(err: &WeaveError) -> u16 {
    match err {
        WeaveError::ImmutableContent { .. } => 405,
        WeaveError::DuplicateLink { .. } | WeaveError::TagLimitExceeded { .. } => 409,
        WeaveError::NotFound(_) => 404,
        WeaveError::PurgeBlocked { .. } => 423,
        WeaveError::AlreadyPurged(_) => 410,
        WeaveError::CrossWorldReference { .. } | WeaveError::SelfLink(_) | WeaveError::Validation { .. } => 400,
        WeaveError::PermissionDenied(_) => 403,
        WeaveError::Storage(_) => 500,
    }
}

/// Stable machine-readable error name
pub fn error_code(err: &WeaveError) -> &'static str {
    match err {
        WeaveError::ImmutableContent { .. } => "immutable_content",
        WeaveError::CrossWorldReference { .. } => "cross_world_reference",
        WeaveError::SelfLink(_) => "self_link",
        WeaveError::DuplicateLink { .. } => "duplicate_link",
        WeaveError::TagLimitExceeded { .. } => "tag_limit_exceeded",
        WeaveError::NotFound(_) => "not_found",
        WeaveError::PurgeBlocked { .. } => "purge_blocked",
        WeaveError::AlreadyPurged(_) => "already_purged",
        WeaveError::PermissionDenied(_) => "permission_denied",
        WeaveError::Validation { .. } => "validation_error",
        WeaveError::Storage(_) => "storage_error",
    }
}

/// Single entry point for all consumer-facing operations.
#[derive(Clone)]
pub struct WeaveApi {
    engine: Arc<WeaveEngine>,
}

impl WeaveApi {
    pub fn new(engine: Arc<WeaveEngine>) -> Self {
        Self { engine }
    }

    pub fn engine(&self) -> &WeaveEngine {
        &self.engine
    }

    // --- Content ---

    /// `POST /worlds/{id}/{variant}/`
    pub fn create_content(
        &self,
        actor: &Actor,
        world_id: &str,
        variant: &str,
        draft: ContentDraft,
    ) -> WeaveResult<ContentEntity> {
        let world = parse_world(world_id)?;
        let kind = parse_kind(variant)?;
        if draft.kind() != kind {
            return Err(WeaveError::validation(
                "details",
                format!("{} details submitted to the {} endpoint", draft.kind(), kind.plural()),
            ));
        }
        self.engine.create_content(actor, &world, draft)
    }

    /// `GET /worlds/{id}/{variant}/{entity_id}/`
    pub fn get_content(&self, world_id: &str, variant: &str, entity_id: &str) -> WeaveResult<ContentEntity> {
        let world = parse_world(world_id)?;
        let target = parse_ref(variant, entity_id)?;
        self.engine.resolve_visible(&world, &target, Visibility::Active)
    }

    /// `PUT`/`PATCH` on a content entity; surfaces the immutability denial
    pub fn update_content(
        &self,
        actor: &Actor,
        world_id: &str,
        variant: &str,
        entity_id: &str,
        patch: &ContentPatch,
    ) -> WeaveResult<ContentEntity> {
        let world = parse_world(world_id)?;
        let target = parse_ref(variant, entity_id)?;
        self.engine.update_content(actor, &world, &target, patch)
    }

    /// `DELETE` on a content entity; surfaces the immutability denial
    pub fn delete_content(&self, actor: &Actor, world_id: &str, variant: &str, entity_id: &str) -> WeaveResult<()> {
        let world = parse_world(world_id)?;
        let target = parse_ref(variant, entity_id)?;
        self.engine.delete_content(actor, &world, &target)
    }

    // --- Tags and links ---

    /// `POST /worlds/{id}/{variant}/{entity_id}/add-tags/`
    pub fn add_tags(&self, world_id: &str, variant: &str, entity_id: &str, names: &[String]) -> WeaveResult<TagOutcome> {
        let world = parse_world(world_id)?;
        let target = parse_ref(variant, entity_id)?;
        TagGraph::new(&self.engine, world).tag_content(&target, names)
    }

    /// `POST /worlds/{id}/{variant}/{entity_id}/add-links/`
    pub fn add_links(
        &self,
        world_id: &str,
        variant: &str,
        entity_id: &str,
        targets: &[LinkTarget],
    ) -> WeaveResult<LinkBatch> {
        let world = parse_world(world_id)?;
        let source = parse_ref(variant, entity_id)?;
        let targets = targets
            .iter()
            .map(|t| parse_ref(&t.kind, &t.id))
            .collect::<WeaveResult<Vec<_>>>()?;
        LinkGraph::new(&self.engine, world).link_many(&source, &targets)
    }

    /// `GET /worlds/{id}/{variant}/{entity_id}/links/`
    pub fn related(&self, world_id: &str, variant: &str, entity_id: &str) -> WeaveResult<Vec<RelatedContent>> {
        let world = parse_world(world_id)?;
        let target = parse_ref(variant, entity_id)?;
        LinkGraph::new(&self.engine, world).related(&target, Visibility::Active)
    }

    /// `GET /worlds/{id}/tags/{name}/`
    pub fn list_tagged(&self, world_id: &str, name: &str, include_deleted: bool) -> WeaveResult<Vec<ContentEntity>> {
        let world = parse_world(world_id)?;
        TagGraph::new(&self.engine, world).list_tagged(name, Visibility::including_deleted(include_deleted))
    }

    // --- Derived views ---

    /// `GET /worlds/{id}/timeline/`
    pub fn timeline(&self, world_id: &str, params: &TimelineParams) -> WeaveResult<TimelinePage> {
        let world = parse_world(world_id)?;
        let query = self.timeline_query(params)?;
        query.execute(&self.engine, &world)
    }

    /// `GET /worlds/{id}/attribution/`
    pub fn attribution(&self, world_id: &str) -> WeaveResult<AttributionReport> {
        let world = parse_world(world_id)?;
        self.engine.world(&world)?;
        AttributionReport::for_world(&self.engine, &world)
    }

    /// `GET /worlds/{id}/statistics/`
    pub fn statistics(&self, world_id: &str) -> WeaveResult<WorldStatistics> {
        let world = parse_world(world_id)?;
        self.engine.world(&world)?;
        WorldStatistics::compute(&self.engine, &world)
    }

    // --- Administrative lifecycle ---

    pub fn soft_delete(&self, actor: &Actor, world_id: &str, variant: &str, entity_id: &str) -> WeaveResult<ContentEntity> {
        let world = parse_world(world_id)?;
        let target = parse_ref(variant, entity_id)?;
        LifecycleManager::new(&self.engine, world).soft_delete(actor, &target)
    }

    pub fn restore(&self, actor: &Actor, world_id: &str, variant: &str, entity_id: &str) -> WeaveResult<ContentEntity> {
        let world = parse_world(world_id)?;
        let target = parse_ref(variant, entity_id)?;
        LifecycleManager::new(&self.engine, world).restore(actor, &target)
    }

    pub fn purge_plan(&self, world_id: &str, variant: &str, entity_id: &str) -> WeaveResult<PurgePlan> {
        let world = parse_world(world_id)?;
        let target = parse_ref(variant, entity_id)?;
        LifecycleManager::new(&self.engine, world).purge_plan(&target)
    }

    pub fn purge(&self, actor: &Actor, world_id: &str, variant: &str, entity_id: &str) -> WeaveResult<PurgeReport> {
        let world = parse_world(world_id)?;
        let target = parse_ref(variant, entity_id)?;
        LifecycleManager::new(&self.engine, world).purge(actor, &target)
    }

    fn timeline_query(&self, params: &TimelineParams) -> WeaveResult<TimelineQuery> {
        let mut query = TimelineQuery::new().include_deleted(params.include_deleted);

        for kind in split_list(params.content_types.as_deref()) {
            let kind: ContentKind = kind
                .parse()
                .map_err(|e: String| WeaveError::validation("content_types", e))?;
            query = query.with_kind(kind);
        }
        if let Some(author) = params.author.as_deref().map(str::trim).filter(|a| !a.is_empty()) {
            query = query.by_author(self.resolve_author(author)?);
        }
        for tag in split_list(params.tags.as_deref()) {
            query = query.with_tag(tag);
        }
        if let Some(mode) = params.tag_match.as_deref() {
            let mode: TagMatch = mode.parse().map_err(|e: String| WeaveError::validation("tag_match", e))?;
            query = query.tag_match(mode);
        }
        if let Some(start) = params.start_date.as_deref() {
            query = query.since(parse_date("start_date", start, false)?);
        }
        if let Some(end) = params.end_date.as_deref() {
            query = query.until(parse_date("end_date", end, true)?);
        }
        if let Some(search) = params.search.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
            query = query.search(search);
        }
        if let Some(limit) = params.limit {
            query = query.limit(limit);
        }
        if let Some(offset) = params.offset {
            query = query.offset(offset);
        }
        Ok(query)
    }

    fn resolve_author(&self, author: &str) -> WeaveResult<UserId> {
        if let Ok(id) = author.parse::<UserId>() {
            return Ok(id);
        }
        self.engine.user_by_name(author).map(|u| u.id)
    }
}

fn parse_world(raw: &str) -> WeaveResult<WorldId> {
    raw.trim()
        .parse()
        .map_err(|_| WeaveError::NotFound(format!("world {}", raw.trim())))
}

fn parse_kind(raw: &str) -> WeaveResult<ContentKind> {
    raw.parse().map_err(WeaveError::NotFound)
}

/// Parse a `(variant, id)` pair into a polymorphic reference
pub fn parse_ref(variant: &str, id: &str) -> WeaveResult<ContentRef> {
    let kind = parse_kind(variant)?;
    let id: EntityId = id
        .trim()
        .parse()
        .map_err(|_| WeaveError::NotFound(format!("{} {}", kind, id.trim())))?;
    Ok(ContentRef::new(kind, id))
}

fn split_list(raw: Option<&str>) -> impl Iterator<Item = &str> {
    raw.unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

/// Accept full timestamps or bare dates; a bare end date covers the whole day
fn parse_date(field: &str, raw: &str, end_of_day: bool) -> WeaveResult<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Ok(ts.with_timezone(&Utc));
    }
    let date = NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .map_err(|_| WeaveError::validation(field, format!("expected YYYY-MM-DD or RFC 3339, got '{}'", raw)))?;
    let time = if end_of_day {
        date.and_hms_micro_opt(23, 59, 59, 999_999)
    } else {
        date.and_hms_opt(0, 0, 0)
    };
    time.map(|t| t.and_utc())
        .ok_or_else(|| WeaveError::validation(field, format!("invalid date '{}'", raw)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{Operation, PurgeBlockReason};

    fn api() -> (WeaveApi, Actor, Actor, String) {
        let engine = WeaveEngine::in_memory().unwrap();
        let alice = Actor::user(engine.create_user("alice").unwrap().id);
        let bob = Actor::user(engine.create_user("bob").unwrap().id);
        let world = engine.create_world(&alice, "Eldoria", "Misty isles", true).unwrap();
        (WeaveApi::new(Arc::new(engine)), alice, bob, world.id.to_string())
    }

    #[test]
    fn test_status_codes() {
        let r = ContentRef::new(ContentKind::Page, EntityId::new());
        let cases = [
            (
                WeaveError::ImmutableContent {
                    target: r,
                    operation: Operation::Update,
                },
                405,
            ),
            (WeaveError::DuplicateLink { from: r, to: r }, 409),
            (
                WeaveError::TagLimitExceeded {
                    limit: 10,
                    available: 0,
                    requested: 1,
                },
                409,
            ),
            (WeaveError::NotFound("x".into()), 404),
            (
                WeaveError::PurgeBlocked {
                    target: r,
                    reason: PurgeBlockReason::NotSoftDeleted,
                },
                423,
            ),
            (WeaveError::AlreadyPurged(r), 410),
            (WeaveError::SelfLink(r), 400),
            (WeaveError::validation("title", "too short"), 400),
            (WeaveError::PermissionDenied("no".into()), 403),
        ];
        for (err, status) in cases {
            assert_eq!(status_code(&err), status, "{err}");
        }
    }

    #[test]
    fn test_put_is_405_not_400() {
        let (api, alice, _, world) = api();
        let page = api
            .create_content(&alice, &world, "pages", ContentDraft::page("Harbor", "The harbor is foggy."))
            .unwrap();

        let err = api
            .update_content(&alice, &world, "pages", &page.id().to_string(), &ContentPatch::default())
            .unwrap_err();
        assert_eq!(status_code(&err), 405);
        let err = api.delete_content(&alice, &world, "page", &page.id().to_string()).unwrap_err();
        assert_eq!(ErrorBody::from(&err).error, "immutable_content");
    }

    #[test]
    fn test_variant_must_match_details() {
        let (api, alice, _, world) = api();
        let err = api
            .create_content(&alice, &world, "stories", ContentDraft::page("Harbor", "The harbor is foggy."))
            .unwrap_err();
        assert_eq!(status_code(&err), 400);
        assert!(api.create_content(&alice, &world, "worlds", ContentDraft::page("Harbor", "The harbor is foggy.")).is_err());
    }

    #[test]
    fn test_add_tags_and_links_then_timeline() {
        let (api, alice, bob, world) = api();
        let page = api
            .create_content(&alice, &world, "pages", ContentDraft::page("Harbor", "The harbor is foggy."))
            .unwrap();
        let character = api
            .create_content(
                &bob,
                &world,
                "characters",
                ContentDraft::character("Captain Mira", "Commands the Gull.", "Mira Vance"),
            )
            .unwrap();
        let page_id = page.id().to_string();

        let outcome = api
            .add_tags(&world, "pages", &page_id, &["Coast".to_string(), "coast".to_string()])
            .unwrap();
        assert_eq!(outcome.added.len(), 1);

        let targets = vec![LinkTarget {
            kind: "character".into(),
            id: character.id().to_string(),
        }];
        let batch = api.add_links(&world, "pages", &page_id, &targets).unwrap();
        assert_eq!(batch.added.len(), 1);
        let batch = api.add_links(&world, "pages", &page_id, &targets).unwrap();
        assert_eq!(batch.already_linked.len(), 1);

        let params = TimelineParams {
            content_types: Some("page, character".into()),
            author: Some("alice".into()),
            tags: Some("COAST".into()),
            start_date: Some("2000-01-01".into()),
            ..Default::default()
        };
        let timeline = api.timeline(&world, &params).unwrap();
        assert_eq!(timeline.total_count, 1);
        assert_eq!(timeline.entries[0].target, page.content_ref());

        assert_eq!(api.list_tagged(&world, "coast", false).unwrap().len(), 1);
        assert_eq!(api.attribution(&world).unwrap().collaboration_density, 1.0);
    }

    #[test]
    fn test_bad_parameters() {
        let (api, _, _, world) = api();
        assert_eq!(status_code(&api.get_content("nope", "pages", "x").unwrap_err()), 404);
        assert_eq!(status_code(&api.get_content(&world, "pages", "x").unwrap_err()), 404);

        let params = TimelineParams {
            start_date: Some("last tuesday".into()),
            ..Default::default()
        };
        assert_eq!(status_code(&api.timeline(&world, &params).unwrap_err()), 400);
    }

    #[test]
    fn test_error_body_hides_storage_details() {
        let err = WeaveError::Storage(crate::storage::StorageError::LockPoisoned);
        let body = ErrorBody::from(&err);
        assert_eq!(body.status, 500);
        assert_eq!(body.message, "internal storage error");
    }
}
