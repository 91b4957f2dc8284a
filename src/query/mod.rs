//! Derived read views over a world
//!
//! Timelines, attribution reports and statistics are computed from stored
//! content and links on demand; none of them is a second source of truth.

mod attribution;
mod statistics;
mod timeline;
mod types;

pub use attribution::{AttributionReport, AuthorAttribution, Collaboration, CollaborationStrength};
pub use statistics::WorldStatistics;
pub use timeline::{TimelineQuery, DEFAULT_LIMIT, MAX_LIMIT};
pub use types::{TagMatch, TimelineEntry, TimelinePage};
