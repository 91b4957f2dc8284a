//! Query types and result structures

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::graph::{ContentRef, UserId};

/// How a set of tag names filters content
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TagMatch {
    /// Content carrying at least one of the tags
    #[default]
    Any,
    /// Content carrying every tag
    All,
}

impl std::str::FromStr for TagMatch {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "any" => Ok(Self::Any),
            "all" => Ok(Self::All),
            _ => Err(format!("unknown tag match mode: {}", s)),
        }
    }
}

/// One row of a timeline
#[derive(Debug, Clone, Serialize)]
pub struct TimelineEntry {
    pub target: ContentRef,
    pub title: String,
    pub author: UserId,
    pub author_name: String,
    pub created_at: DateTime<Utc>,
    /// Excerpt of the summary, abstract or body
    pub summary: String,
    /// Display names of the entity's tags
    pub tags: Vec<String>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub deleted: bool,
}

/// Result of a timeline query
#[derive(Debug, Clone, Serialize)]
pub struct TimelinePage {
    /// Entries in this page, newest first
    pub entries: Vec<TimelineEntry>,
    /// Total matches before pagination
    pub total_count: usize,
    pub limit: usize,
    pub offset: usize,
}

impl TimelinePage {
    pub fn empty(limit: usize, offset: usize) -> Self {
        Self {
            entries: Vec::new(),
            total_count: 0,
            limit,
            offset,
        }
    }

    /// Whether entries exist beyond this page
    pub fn has_more(&self) -> bool {
        self.offset + self.entries.len() < self.total_count
    }
}
