//! Lifecycle manager wrapping the engine's soft-delete and purge primitives.
//!
//! Soft delete and restore are reversible and open to the author or an
//! administrator. Purge is terminal, administrator-only, and runs as one
//! storage transaction that re-checks retention and active references.

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::graph::{
    Actor, ContentEntity, ContentKind, ContentRef, ImmutabilityGuard, Lifecycle, Operation,
    PurgeBlockReason, WeaveEngine, WeaveError, WeaveResult, WorldId,
};
use crate::storage::{ContentWrite, EntityFilter, PurgeCounts, PurgeWrite, PurgedRecord};

use super::types::{
    BlockedPurge, BulkSoftDelete, DeletedContent, ExpiryReport, LifecycleState, PurgePlan,
    PurgeReport,
};

/// Lifecycle operations scoped to a single world.
pub struct LifecycleManager<'a> {
    engine: &'a WeaveEngine,
    world: WorldId,
}

impl<'a> LifecycleManager<'a> {
    pub fn new(engine: &'a WeaveEngine, world: WorldId) -> Self {
        Self { engine, world }
    }

    /// Current lifecycle state, including purged tombstones
    pub fn state(&self, target: &ContentRef) -> WeaveResult<LifecycleState> {
        match self.engine.resolve_or_tombstone(&self.world, target) {
            Ok(entity) => Ok(match entity.deleted_at() {
                Some(deleted_at) => LifecycleState::SoftDeleted { deleted_at },
                None => LifecycleState::Active,
            }),
            Err(WeaveError::AlreadyPurged(_)) => {
                let record = self.tombstone(target)?;
                Ok(LifecycleState::Purged {
                    purged_at: record.purged_at,
                })
            }
            Err(e) => Err(e),
        }
    }

    // === Soft delete / restore ===

    /// Hide an entity from default views
    ///
    /// Idempotent: soft-deleting an already soft-deleted entity returns it
    /// unchanged. Its tags and links stay in place.
    pub fn soft_delete(&self, actor: &Actor, target: &ContentRef) -> WeaveResult<ContentEntity> {
        let entity = self.engine.resolve_or_tombstone(&self.world, target)?;
        ImmutabilityGuard::check(actor, Operation::SoftDelete, *target, Some(&entity))?;
        self.apply_soft_delete(actor, entity)
    }

    /// Soft-delete several entities; every target passes the guard before
    /// any of them is changed
    pub fn soft_delete_many(&self, actor: &Actor, targets: &[ContentRef]) -> WeaveResult<BulkSoftDelete> {
        let mut entities = Vec::with_capacity(targets.len());
        for target in targets {
            let entity = self.engine.resolve_or_tombstone(&self.world, target)?;
            ImmutabilityGuard::check(actor, Operation::SoftDelete, *target, Some(&entity))?;
            if !entities.iter().any(|e: &ContentEntity| e.content_ref() == *target) {
                entities.push(entity);
            }
        }

        let mut outcome = BulkSoftDelete::default();
        for entity in entities {
            let target = entity.content_ref();
            if entity.is_deleted() {
                outcome.already_deleted.push(target);
            } else {
                self.apply_soft_delete(actor, entity)?;
                outcome.soft_deleted.push(target);
            }
        }
        Ok(outcome)
    }

    /// Return a soft-deleted entity to the active state
    ///
    /// Restoring an active entity is a no-op. A purged entity cannot be
    /// restored and fails with `AlreadyPurged`. Restore is refused with a
    /// `title` validation error while another active entity of the same kind
    /// holds the title.
    pub fn restore(&self, actor: &Actor, target: &ContentRef) -> WeaveResult<ContentEntity> {
        let entity = self.engine.resolve_or_tombstone(&self.world, target)?;
        ImmutabilityGuard::check(actor, Operation::Restore, *target, Some(&entity))?;
        if !entity.is_deleted() {
            debug!(target = %target, "restore of active content ignored");
            return Ok(entity);
        }

        match self.engine.store().set_lifecycle(target, &Lifecycle::Active)? {
            ContentWrite::Written => {}
            ContentWrite::TitleTaken => {
                warn!(target = %target, title = entity.title(), "restore refused: title in use");
                return Err(WeaveError::title_taken(entity.kind(), entity.title()));
            }
            ContentWrite::Unchanged => return Err(self.vanished(target)),
        }
        self.engine.invalidate(&self.world);
        info!(world = %self.world, target = %target, actor = %actor.user, "content restored");
        self.engine.resolve(&self.world, target)
    }

    // === Purge ===

    /// Irreversibly remove a soft-deleted entity and its associations
    pub fn purge(&self, actor: &Actor, target: &ContentRef) -> WeaveResult<PurgeReport> {
        self.purge_at(actor, target, Utc::now())
    }

    /// [`purge`](Self::purge) evaluated at a given instant
    pub fn purge_at(&self, actor: &Actor, target: &ContentRef, now: DateTime<Utc>) -> WeaveResult<PurgeReport> {
        self.require_admin(actor, "purge")?;
        let entity = self.engine.resolve_or_tombstone(&self.world, target)?;

        match self.purge_entity(actor, &entity, now)? {
            Ok(report) => Ok(report),
            Err(reason) => Err(WeaveError::PurgeBlocked {
                target: *target,
                reason,
            }),
        }
    }

    /// Dry run: what a purge would remove and whether it would be refused
    pub fn purge_plan(&self, target: &ContentRef) -> WeaveResult<PurgePlan> {
        self.purge_plan_at(target, Utc::now())
    }

    /// [`purge_plan`](Self::purge_plan) evaluated at a given instant
    pub fn purge_plan_at(&self, target: &ContentRef, now: DateTime<Utc>) -> WeaveResult<PurgePlan> {
        let entity = self.engine.resolve_or_tombstone(&self.world, target)?;
        let store = self.engine.store();

        let outbound = store.links_from(target)?;
        let inbound = store.links_to(target)?;
        let would_remove = PurgeCounts {
            tag_associations: store.tags_for(target)?.len(),
            outbound_links: outbound.len(),
            inbound_links: inbound.len(),
        };

        let (state, eligible_at) = match entity.deleted_at() {
            Some(deleted_at) => (
                LifecycleState::SoftDeleted { deleted_at },
                Some(self.engine.config().purge_eligible_at(deleted_at)),
            ),
            None => (LifecycleState::Active, None),
        };

        let blocked_by = match eligible_at {
            None => Some(PurgeBlockReason::NotSoftDeleted),
            Some(at) if at > now => Some(PurgeBlockReason::RetentionPending { eligible_at: at }),
            Some(_) => {
                let mut referrers = Vec::new();
                for link in &inbound {
                    let active = store
                        .load_entity(&link.source)?
                        .is_some_and(|e| !e.is_deleted());
                    if active {
                        referrers.push(link.source);
                    }
                }
                if referrers.is_empty() {
                    None
                } else {
                    Some(PurgeBlockReason::Referenced { referrers })
                }
            }
        };

        Ok(PurgePlan {
            target: *target,
            title: entity.title().to_string(),
            state,
            eligible_at,
            blocked_by,
            would_remove,
        })
    }

    /// Purge every soft-deleted entity whose retention window has closed
    ///
    /// Entities still protected by active references are reported, not
    /// skipped silently.
    pub fn purge_expired(&self, actor: &Actor) -> WeaveResult<ExpiryReport> {
        self.purge_expired_at(actor, Utc::now())
    }

    /// [`purge_expired`](Self::purge_expired) evaluated at a given instant
    pub fn purge_expired_at(&self, actor: &Actor, now: DateTime<Utc>) -> WeaveResult<ExpiryReport> {
        self.require_admin(actor, "purge")?;
        let config = self.engine.config();

        let candidates: Vec<ContentEntity> = self
            .engine
            .list_content(&self.world, &EntityFilter::deleted_only())?
            .into_iter()
            .filter(|e| e.deleted_at().is_some_and(|at| config.purge_eligible_at(at) <= now))
            .collect();

        let mut report = ExpiryReport::default();
        for entity in candidates {
            match self.purge_entity(actor, &entity, now)? {
                Ok(purged) => report.purged.push(purged),
                Err(reason) => report.blocked.push(BlockedPurge {
                    target: entity.content_ref(),
                    title: entity.title().to_string(),
                    reason,
                }),
            }
        }
        info!(
            world = %self.world,
            purged = report.purged.len(),
            blocked = report.blocked.len(),
            "expired content purged"
        );
        Ok(report)
    }

    // === Listings ===

    /// Soft-deleted entities, optionally of one kind, newest first
    pub fn list_deleted(&self, kind: Option<ContentKind>) -> WeaveResult<Vec<DeletedContent>> {
        let mut filter = EntityFilter::deleted_only();
        if let Some(kind) = kind {
            filter = filter.with_kind(kind);
        }
        let config = self.engine.config();
        Ok(self
            .engine
            .list_content(&self.world, &filter)?
            .into_iter()
            .filter_map(|entity| {
                let at = entity.deleted_at()?;
                Some(DeletedContent {
                    entity,
                    purge_eligible_at: config.purge_eligible_at(at),
                })
            })
            .collect())
    }

    /// Tombstones of purged content
    pub fn list_purged(&self) -> WeaveResult<Vec<PurgedRecord>> {
        self.engine.world(&self.world)?;
        Ok(self.engine.store().list_purged(&self.world)?)
    }

    // === Internals ===

    fn apply_soft_delete(&self, actor: &Actor, entity: ContentEntity) -> WeaveResult<ContentEntity> {
        let target = entity.content_ref();
        if entity.is_deleted() {
            debug!(target = %target, "soft delete of deleted content ignored");
            return Ok(entity);
        }

        let lifecycle = Lifecycle::SoftDeleted {
            at: crate::graph::now(),
            by: Some(actor.user),
        };
        if self.engine.store().set_lifecycle(&target, &lifecycle)? == ContentWrite::Unchanged {
            return Err(self.vanished(&target));
        }
        self.engine.invalidate(&self.world);
        info!(world = %self.world, target = %target, actor = %actor.user, "content soft-deleted");
        self.engine.resolve(&self.world, &target)
    }

    /// Run the atomic purge; the inner `Err` is a refusal, not a failure
    fn purge_entity(
        &self,
        actor: &Actor,
        entity: &ContentEntity,
        now: DateTime<Utc>,
    ) -> WeaveResult<Result<PurgeReport, PurgeBlockReason>> {
        let target = entity.content_ref();
        let retention = self.engine.config().retention();

        match self.engine.store().purge_entity(&target, retention, now, &actor.user)? {
            PurgeWrite::Purged(removed) => {
                self.engine.invalidate(&self.world);
                info!(
                    world = %self.world,
                    target = %target,
                    admin = %actor.user,
                    tags = removed.tag_associations,
                    links = removed.outbound_links + removed.inbound_links,
                    "content purged"
                );
                Ok(Ok(PurgeReport {
                    target,
                    title: entity.title().to_string(),
                    author: entity.author(),
                    removed,
                    purged_at: now,
                }))
            }
            PurgeWrite::Blocked(reason) => {
                warn!(target = %target, %reason, "purge blocked");
                Ok(Err(reason))
            }
            PurgeWrite::Missing => Err(self.vanished(&target)),
        }
    }

    fn require_admin(&self, actor: &Actor, operation: &str) -> WeaveResult<()> {
        if actor.is_admin() {
            Ok(())
        } else {
            warn!(user = %actor.user, operation, "administrative operation refused");
            Err(WeaveError::PermissionDenied(format!(
                "{} requires the administrative capability",
                operation
            )))
        }
    }

    fn tombstone(&self, target: &ContentRef) -> WeaveResult<PurgedRecord> {
        self.engine
            .store()
            .purged_record(target)?
            .ok_or_else(|| WeaveError::NotFound(target.to_string()))
    }

    /// Error for an entity that disappeared between resolve and write
    fn vanished(&self, target: &ContentRef) -> WeaveError {
        match self.engine.store().purged_record(target) {
            Ok(Some(_)) => WeaveError::AlreadyPurged(*target),
            Ok(None) => WeaveError::NotFound(target.to_string()),
            Err(e) => WeaveError::Storage(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::graph::{ContentDraft, UserId, Visibility};
    use crate::storage::{OpenStore, SqliteStore};
    use std::sync::Arc;
    use crate::linking::LinkGraph;
    use crate::tagging::TagGraph;
    use chrono::Duration;

    struct Setup {
        engine: WeaveEngine,
        alice: Actor,
        bob: Actor,
        admin: Actor,
        world: WorldId,
    }

    fn setup() -> Setup {
        let engine = WeaveEngine::in_memory().unwrap();
        let alice = Actor::user(engine.create_user("alice").unwrap().id);
        let bob = Actor::user(engine.create_user("bob").unwrap().id);
        let admin = Actor::admin(engine.create_user("root").unwrap().id);
        let world = engine.create_world(&alice, "Eldoria", "Misty isles", true).unwrap().id;
        Setup {
            engine,
            alice,
            bob,
            admin,
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

        fn lifecycle(&self) -> LifecycleManager<'_> {
            LifecycleManager::new(&self.engine, self.world)
        }
    }

    fn after_retention() -> DateTime<Utc> {
        Utc::now() + Duration::days(31)
    }

    #[test]
    fn test_soft_delete_is_idempotent_and_reversible() {
        let s = setup();
        let a = s.page(&s.alice, "Harbor");
        let b = s.page(&s.bob, "Lighthouse");
        LinkGraph::new(&s.engine, s.world).link(&a, &b).unwrap();
        TagGraph::new(&s.engine, s.world).tag_content(&a, &["coast"]).unwrap();
        let before = s.engine.resolve(&s.world, &a).unwrap();

        let deleted = s.lifecycle().soft_delete(&s.alice, &a).unwrap();
        assert!(deleted.is_deleted());
        let again = s.lifecycle().soft_delete(&s.alice, &a).unwrap();
        assert_eq!(again.deleted_at(), deleted.deleted_at());

        let restored = s.lifecycle().restore(&s.alice, &a).unwrap();
        assert_eq!(restored, before);
        assert_eq!(LinkGraph::new(&s.engine, s.world).links_from(&a, Visibility::Active).unwrap().len(), 1);
        assert_eq!(TagGraph::new(&s.engine, s.world).tags_for(&a).unwrap().len(), 1);
    }

    #[test]
    fn test_restore_refused_while_title_reused() {
        let s = setup();
        let first = s.page(&s.alice, "Harbor");
        s.lifecycle().soft_delete(&s.alice, &first).unwrap();
        let second = s.page(&s.bob, "harbor");

        let err = s.lifecycle().restore(&s.alice, &first).unwrap_err();
        assert!(matches!(err, WeaveError::Validation { ref field, .. } if field == "title"));
        assert!(matches!(s.lifecycle().state(&first).unwrap(), LifecycleState::SoftDeleted { .. }));

        let active = s
            .engine
            .list_content(&s.world, &EntityFilter::new().with_kind(ContentKind::Page))
            .unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].content_ref(), second);

        // Once the newer page steps aside the original comes back
        s.lifecycle().soft_delete(&s.bob, &second).unwrap();
        assert!(!s.lifecycle().restore(&s.alice, &first).unwrap().is_deleted());
    }

    #[test]
    fn test_unbounded_retention_never_overflows() {
        let mut config = EngineConfig::default();
        config.retention_days = i64::MAX;
        let engine = WeaveEngine::with_config(Arc::new(SqliteStore::open_in_memory().unwrap()), config);
        let admin = Actor::admin(engine.create_user("root").unwrap().id);
        let world = engine.create_world(&admin, "Eldoria", "Misty isles", true).unwrap().id;
        let page = engine
            .create_content(&admin, &world, ContentDraft::page("Harbor", "Some descriptive body text."))
            .unwrap()
            .content_ref();
        let lifecycle = LifecycleManager::new(&engine, world);
        lifecycle.soft_delete(&admin, &page).unwrap();

        let deleted = lifecycle.list_deleted(None).unwrap();
        assert_eq!(deleted.len(), 1);
        assert_eq!(deleted[0].purge_eligible_at, DateTime::<Utc>::MAX_UTC);

        let plan = lifecycle.purge_plan_at(&page, after_retention()).unwrap();
        assert!(matches!(plan.blocked_by, Some(PurgeBlockReason::RetentionPending { .. })));
        assert!(lifecycle.purge_expired_at(&admin, after_retention()).unwrap().purged.is_empty());
        let err = lifecycle.purge_at(&admin, &page, after_retention()).unwrap_err();
        assert!(matches!(
            err,
            WeaveError::PurgeBlocked {
                reason: PurgeBlockReason::RetentionPending { .. },
                ..
            }
        ));
    }

    #[test]
    fn test_soft_delete_requires_author_or_admin() {
        let s = setup();
        let a = s.page(&s.alice, "Harbor");

        let err = s.lifecycle().soft_delete(&s.bob, &a).unwrap_err();
        assert!(matches!(err, WeaveError::PermissionDenied(_)));
        assert!(s.lifecycle().soft_delete(&s.admin, &a).is_ok());
    }

    #[test]
    fn test_purge_requires_admin_soft_delete_and_retention() {
        let s = setup();
        let a = s.page(&s.alice, "Harbor");

        let err = s.lifecycle().purge_at(&s.alice, &a, after_retention()).unwrap_err();
        assert!(matches!(err, WeaveError::PermissionDenied(_)));

        let err = s.lifecycle().purge_at(&s.admin, &a, after_retention()).unwrap_err();
        assert!(matches!(
            err,
            WeaveError::PurgeBlocked {
                reason: PurgeBlockReason::NotSoftDeleted,
                ..
            }
        ));

        s.lifecycle().soft_delete(&s.alice, &a).unwrap();
        let err = s.lifecycle().purge(&s.admin, &a).unwrap_err();
        assert!(matches!(
            err,
            WeaveError::PurgeBlocked {
                reason: PurgeBlockReason::RetentionPending { .. },
                ..
            }
        ));

        let report = s.lifecycle().purge_at(&s.admin, &a, after_retention()).unwrap();
        assert_eq!(report.target, a);
        assert!(matches!(s.lifecycle().state(&a).unwrap(), LifecycleState::Purged { .. }));
    }

    #[test]
    fn test_referenced_entity_is_protected() {
        let s = setup();
        let a = s.page(&s.alice, "Harbor");
        let b = s.page(&s.bob, "Lighthouse");
        LinkGraph::new(&s.engine, s.world).link(&a, &b).unwrap();
        s.lifecycle().soft_delete(&s.bob, &b).unwrap();

        let err = s.lifecycle().purge_at(&s.admin, &b, after_retention()).unwrap_err();
        assert_eq!(err.protecting_references(), Some(1));

        s.lifecycle().soft_delete(&s.alice, &a).unwrap();
        let report = s.lifecycle().purge_at(&s.admin, &b, after_retention()).unwrap();
        assert_eq!(report.removed.inbound_links, 1);
    }

    #[test]
    fn test_restore_after_purge_fails() {
        let s = setup();
        let a = s.page(&s.alice, "Harbor");
        s.lifecycle().soft_delete(&s.alice, &a).unwrap();
        s.lifecycle().purge_at(&s.admin, &a, after_retention()).unwrap();

        let err = s.lifecycle().restore(&s.admin, &a).unwrap_err();
        assert!(matches!(err, WeaveError::AlreadyPurged(r) if r == a));
        let err = s.lifecycle().purge_at(&s.admin, &a, after_retention()).unwrap_err();
        assert!(matches!(err, WeaveError::AlreadyPurged(_)));
    }

    #[test]
    fn test_purge_plan_is_dry_run() {
        let s = setup();
        let a = s.page(&s.alice, "Harbor");
        let b = s.page(&s.bob, "Lighthouse");
        LinkGraph::new(&s.engine, s.world).link(&a, &b).unwrap();
        TagGraph::new(&s.engine, s.world).tag_content(&b, &["coast", "fog"]).unwrap();
        s.lifecycle().soft_delete(&s.bob, &b).unwrap();

        let plan = s.lifecycle().purge_plan_at(&b, after_retention()).unwrap();
        assert!(!plan.is_purgeable());
        assert_eq!(plan.would_remove.tag_associations, 2);
        assert_eq!(plan.would_remove.inbound_links, 1);
        assert!(matches!(plan.blocked_by, Some(PurgeBlockReason::Referenced { .. })));

        // Nothing changed
        assert!(matches!(s.lifecycle().state(&b).unwrap(), LifecycleState::SoftDeleted { .. }));
    }

    #[test]
    fn test_purge_expired_reports_blocked() {
        let s = setup();
        let a = s.page(&s.alice, "Harbor");
        let b = s.page(&s.bob, "Lighthouse");
        let c = s.page(&s.bob, "Reef");
        LinkGraph::new(&s.engine, s.world).link(&a, &b).unwrap();
        s.lifecycle().soft_delete_many(&s.bob, &[b, c]).unwrap();

        let report = s.lifecycle().purge_expired_at(&s.admin, after_retention()).unwrap();
        assert_eq!(report.purged.len(), 1);
        assert_eq!(report.purged[0].target, c);
        assert_eq!(report.blocked.len(), 1);
        assert_eq!(report.blocked[0].target, b);
        assert_eq!(s.lifecycle().list_purged().unwrap().len(), 1);
        assert_eq!(s.lifecycle().list_deleted(None).unwrap().len(), 1);
    }

    #[test]
    fn test_bulk_soft_delete_is_all_or_nothing() {
        let s = setup();
        let a = s.page(&s.alice, "Harbor");
        let b = s.page(&s.bob, "Lighthouse");

        let err = s.lifecycle().soft_delete_many(&s.alice, &[a, b]).unwrap_err();
        assert!(matches!(err, WeaveError::PermissionDenied(_)));
        assert!(matches!(s.lifecycle().state(&a).unwrap(), LifecycleState::Active));

        let outcome = s.lifecycle().soft_delete_many(&s.admin, &[a, b, a]).unwrap();
        assert_eq!(outcome.soft_deleted.len(), 2);
        let outcome = s.lifecycle().soft_delete_many(&s.admin, &[a]).unwrap();
        assert_eq!(outcome.already_deleted, vec![a]);
    }

    #[test]
    fn test_missing_target_not_found() {
        let s = setup();
        let ghost = ContentRef::new(ContentKind::Page, crate::graph::EntityId::new());
        let err = s.lifecycle().soft_delete(&Actor::admin(UserId::new()), &ghost).unwrap_err();
        assert!(matches!(err, WeaveError::NotFound(_)));
    }
}
