//! Immutability guard: the single decision point for every content mutation
//!
//! The engine, the lifecycle manager and the bulk paths all call
//! [`ImmutabilityGuard::check`] before touching a stored entity, so there is
//! no alternate route that skips it.

use super::entity::{ContentEntity, ContentRef};
use super::error::{WeaveError, WeaveResult};
use super::ids::UserId;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// A requested mutation of a content entity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Create,
    Update,
    Delete,
    SoftDelete,
    Restore,
    ForceUpdate,
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Operation::Create => "create",
            Operation::Update => "update",
            Operation::Delete => "delete",
            Operation::SoftDelete => "soft_delete",
            Operation::Restore => "restore",
            Operation::ForceUpdate => "force_update",
        };
        f.write_str(name)
    }
}

/// Capability level of the caller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Contributor,
    Administrator,
}

/// Who is asking
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub user: UserId,
    pub role: Role,
}

impl Actor {
    /// A normal contributor
    pub fn user(user: UserId) -> Self {
        Self {
            user,
            role: Role::Contributor,
        }
    }

    /// A caller holding the administrative capability
    pub fn admin(user: UserId) -> Self {
        Self {
            user,
            role: Role::Administrator,
        }
    }

    pub fn is_admin(&self) -> bool {
        self.role == Role::Administrator
    }
}

/// Allow/deny decisions for content mutations
pub struct ImmutabilityGuard;

impl ImmutabilityGuard {
    /// Decide whether `actor` may perform `operation` on `target`
    ///
    /// `existing` is the currently stored entity, if any.
    ///
    /// - `create` is allowed once per identity
    /// - `update` and `delete` are always denied
    /// - `force_update` requires the administrative capability
    /// - `soft_delete` and `restore` require the author or an administrator
    pub fn check(
        actor: &Actor,
        operation: Operation,
        target: ContentRef,
        existing: Option<&ContentEntity>,
    ) -> WeaveResult<()> {
        let entity = match (operation, existing) {
            (Operation::Create, None) => return Ok(()),
            (Operation::Create, Some(_)) => return Err(Self::deny(actor, operation, target)),
            (_, None) => return Err(WeaveError::NotFound(target.to_string())),
            (_, Some(entity)) => entity,
        };

        match operation {
            Operation::Create => Ok(()),
            Operation::Update | Operation::Delete => Err(Self::deny(actor, operation, target)),
            Operation::ForceUpdate => {
                if actor.is_admin() {
                    Ok(())
                } else {
                    Err(Self::deny(actor, operation, target))
                }
            }
            Operation::SoftDelete | Operation::Restore => {
                if actor.is_admin() || actor.user == entity.author() {
                    Ok(())
                } else {
                    warn!(%target, user = %actor.user, %operation, "non-author lifecycle change refused");
                    Err(WeaveError::PermissionDenied(format!(
                        "only the author or an administrator may {} {}",
                        operation, target
                    )))
                }
            }
        }
    }

    fn deny(actor: &Actor, operation: Operation, target: ContentRef) -> WeaveError {
        warn!(%target, user = %actor.user, %operation, "immutability guard denied mutation");
        WeaveError::ImmutableContent { target, operation }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{ContentDraft, WorldId};

    fn entity(author: UserId) -> ContentEntity {
        ContentEntity::create(
            WorldId::new(),
            author,
            ContentDraft::page("Lighthouse", "It has not been lit in a century."),
        )
    }

    #[test]
    fn test_create_only_once() {
        let author = UserId::new();
        let e = entity(author);
        let actor = Actor::user(author);

        assert!(ImmutabilityGuard::check(&actor, Operation::Create, e.content_ref(), None).is_ok());
        let err = ImmutabilityGuard::check(&actor, Operation::Create, e.content_ref(), Some(&e))
            .unwrap_err();
        assert!(matches!(err, WeaveError::ImmutableContent { operation: Operation::Create, .. }));
    }

    #[test]
    fn test_update_and_delete_always_denied() {
        let author = UserId::new();
        let e = entity(author);

        for actor in [Actor::user(author), Actor::admin(UserId::new())] {
            for op in [Operation::Update, Operation::Delete] {
                let err = ImmutabilityGuard::check(&actor, op, e.content_ref(), Some(&e)).unwrap_err();
                assert!(matches!(err, WeaveError::ImmutableContent { .. }), "{op} as {actor:?}");
            }
        }
    }

    #[test]
    fn test_force_update_requires_admin() {
        let author = UserId::new();
        let e = entity(author);

        let err = ImmutabilityGuard::check(&Actor::user(author), Operation::ForceUpdate, e.content_ref(), Some(&e))
            .unwrap_err();
        assert!(matches!(err, WeaveError::ImmutableContent { .. }));
        assert!(ImmutabilityGuard::check(
            &Actor::admin(UserId::new()),
            Operation::ForceUpdate,
            e.content_ref(),
            Some(&e)
        )
        .is_ok());
    }

    #[test]
    fn test_soft_delete_author_or_admin() {
        let author = UserId::new();
        let e = entity(author);
        let r = e.content_ref();

        assert!(ImmutabilityGuard::check(&Actor::user(author), Operation::SoftDelete, r, Some(&e)).is_ok());
        assert!(ImmutabilityGuard::check(&Actor::admin(UserId::new()), Operation::SoftDelete, r, Some(&e)).is_ok());
        let err = ImmutabilityGuard::check(&Actor::user(UserId::new()), Operation::SoftDelete, r, Some(&e))
            .unwrap_err();
        assert!(matches!(err, WeaveError::PermissionDenied(_)));
    }

    #[test]
    fn test_missing_target_is_not_found() {
        let r = entity(UserId::new()).content_ref();
        let err = ImmutabilityGuard::check(&Actor::admin(UserId::new()), Operation::SoftDelete, r, None)
            .unwrap_err();
        assert!(matches!(err, WeaveError::NotFound(_)));
    }
}
