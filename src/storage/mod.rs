//! Storage backends for worldweave
//!
//! The engine talks to storage only through the `ContentStore` trait.
//! The shipped implementation is `SqliteStore`.

mod sqlite;
mod traits;

pub use sqlite::SqliteStore;
pub use traits::{
    ContentStore, ContentWrite, EntityFilter, LinkWrite, OpenStore, PurgeCounts, PurgeWrite, PurgedRecord,
    StorageError, StorageResult, TagWrite,
};
