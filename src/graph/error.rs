//! Typed outcomes of engine operations

use super::entity::{ContentKind, ContentRef};
use super::ids::WorldId;
use super::guard::Operation;
use crate::storage::StorageError;
use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

/// Why a purge was refused
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum PurgeBlockReason {
    /// Only soft-deleted entities can be purged
    NotSoftDeleted,
    /// The retention window has not elapsed since the soft delete
    RetentionPending { eligible_at: DateTime<Utc> },
    /// Active entities still link to this one
    Referenced { referrers: Vec<ContentRef> },
}

impl std::fmt::Display for PurgeBlockReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PurgeBlockReason::NotSoftDeleted => write!(f, "entity is not soft-deleted"),
            PurgeBlockReason::RetentionPending { eligible_at } => {
                write!(f, "retention window open until {}", eligible_at.to_rfc3339())
            }
            PurgeBlockReason::Referenced { referrers } => {
                write!(f, "{} active entities link to it", referrers.len())
            }
        }
    }
}

/// Errors that can occur in engine operations
///
/// Every variant except `Storage` is an expected outcome that callers are
/// meant to translate (see `api::status_code`).
#[derive(Debug, Error)]
pub enum WeaveError {
    #[error("{operation} denied: {target} is immutable")]
    ImmutableContent {
        target: ContentRef,
        operation: Operation,
    },

    #[error("Cross-world reference: expected world {expected}, found {actual}")]
    CrossWorldReference { expected: WorldId, actual: WorldId },

    #[error("Content cannot link to itself: {0}")]
    SelfLink(ContentRef),

    #[error("Link already exists: {from} -> {to}")]
    DuplicateLink { from: ContentRef, to: ContentRef },

    #[error("Tag limit exceeded: {requested} new tags requested, {available} of {limit} slots available")]
    TagLimitExceeded {
        limit: usize,
        available: usize,
        requested: usize,
    },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Purge of {target} blocked: {reason}")]
    PurgeBlocked {
        target: ContentRef,
        reason: PurgeBlockReason,
    },

    #[error("Already purged: {0}")]
    AlreadyPurged(ContentRef),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Invalid {field}: {message}")]
    Validation { field: String, message: String },

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

impl WeaveError {
    pub(crate) fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        WeaveError::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    pub(crate) fn title_taken(kind: ContentKind, title: &str) -> Self {
        Self::validation(
            "title",
            format!("an active {} titled '{}' already exists in this world", kind, title.trim()),
        )
    }

    /// Whether callers should treat this outcome as success
    pub fn is_benign(&self) -> bool {
        matches!(self, WeaveError::DuplicateLink { .. })
    }

    /// Number of active references protecting a blocked purge, if any
    pub fn protecting_references(&self) -> Option<usize> {
        match self {
            WeaveError::PurgeBlocked {
                reason: PurgeBlockReason::Referenced { referrers },
                ..
            } => Some(referrers.len()),
            _ => None,
        }
    }
}

/// Result type for engine operations
pub type WeaveResult<T> = Result<T, WeaveError>;
