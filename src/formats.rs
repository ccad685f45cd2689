use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::digest::FailureReason;

/// One story as reported by the listing client, before selection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListingRecord {
    pub id: String,
    pub title: String,
    pub url: String,
    pub rank: u32,
    pub posted_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub points: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comment_count: Option<u32>,
}

/// A selected story. Immutable once the selector hands it out.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoryRef {
    pub id: String,
    pub title: String,
    pub url: String,
    pub rank: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub points: Option<u32>,
}

impl From<ListingRecord> for StoryRef {
    fn from(record: ListingRecord) -> Self {
        Self {
            id: record.id,
            title: record.title,
            url: record.url,
            rank: record.rank,
            author: record.author,
            points: record.points,
        }
    }
}

/// A story left out of the book, with the reason it was dropped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkipRecord {
    pub id: String,
    pub title: String,
    pub url: String,
    pub rank: u32,
    pub reason: FailureReason,
    pub detail: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkipManifest {
    pub date: String,
    pub chapters: usize,
    pub skipped: Vec<SkipRecord>,
}
