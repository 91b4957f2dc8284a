//! Content lifecycle: soft delete, restore and purge.

pub mod api;
pub mod types;

pub use api::LifecycleManager;
pub use types::{
    BlockedPurge, BulkSoftDelete, DeletedContent, ExpiryReport, LifecycleState, PurgePlan,
    PurgeReport,
};
