use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{MarketError, Result};

pub const MAX_QUALITY: i64 = 100;
/// Score at which an entry becomes GOLD
pub const GOLD_THRESHOLD: i64 = 90;
pub const MAX_TAGS: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum EntryStatus {
    Pending,
    Gold,
}

impl EntryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryStatus::Pending => "PENDING",
            EntryStatus::Gold => "GOLD",
        }
    }

    pub fn for_score(score: i64) -> EntryStatus {
        if score >= GOLD_THRESHOLD {
            EntryStatus::Gold
        } else {
            EntryStatus::Pending
        }
    }
}

impl TryFrom<&str> for EntryStatus {
    type Error = String;

    fn try_from(s: &str) -> std::result::Result<Self, Self::Error> {
        match s.to_uppercase().as_str() {
            "PENDING" => Ok(EntryStatus::Pending),
            "GOLD" => Ok(EntryStatus::Gold),
            _ => Err(format!("Invalid entry status: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum VoteDirection {
    Up,
    Down,
}

impl VoteDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            VoteDirection::Up => "UP",
            VoteDirection::Down => "DOWN",
        }
    }
}

impl TryFrom<&str> for VoteDirection {
    type Error = String;

    fn try_from(s: &str) -> std::result::Result<Self, Self::Error> {
        match s.to_uppercase().as_str() {
            "UP" | "UPVOTE" => Ok(VoteDirection::Up),
            "DOWN" | "DOWNVOTE" => Ok(VoteDirection::Down),
            _ => Err(format!("Invalid vote direction: {}", s)),
        }
    }
}

/// An entry in the shared knowledge pool
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KnowledgeEntry {
    pub id: String,
    pub contributor: String,
    pub title: String,
    pub content: String,
    pub category: String,
    pub tags: Vec<String>,
    pub quality_score: i64,
    pub query_count: i64,
    pub earnings: i64,
    pub status: EntryStatus,
    pub created_at: DateTime<Utc>,
}

impl KnowledgeEntry {
    pub fn is_gold(&self) -> bool {
        self.status == EntryStatus::Gold
    }
}

/// Summary without the content, for listings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KnowledgeSummary {
    pub id: String,
    pub contributor: String,
    pub title: String,
    pub category: String,
    pub tags: Vec<String>,
    pub quality_score: i64,
    pub query_count: i64,
    pub status: EntryStatus,
    pub created_at: DateTime<Utc>,
}

impl From<KnowledgeEntry> for KnowledgeSummary {
    fn from(e: KnowledgeEntry) -> Self {
        Self {
            id: e.id,
            contributor: e.contributor,
            title: e.title,
            category: e.category,
            tags: e.tags,
            quality_score: e.quality_score,
            query_count: e.query_count,
            status: e.status,
            created_at: e.created_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewKnowledgeEntry {
    pub title: String,
    pub content: String,
    pub category: String,
    #[serde(default)]
    pub tags: Vec<String>,
}

impl NewKnowledgeEntry {
    pub fn validate(&self) -> Result<()> {
        if self.title.trim().is_empty() || self.title.len() > 200 {
            return Err(MarketError::Validation(
                "title must be 1-200 characters".to_string(),
            ));
        }
        if self.content.trim().is_empty() {
            return Err(MarketError::Validation("content is required".to_string()));
        }
        if self.category.trim().is_empty() {
            return Err(MarketError::Validation("category is required".to_string()));
        }
        if self.tags.len() > MAX_TAGS {
            return Err(MarketError::Validation(format!(
                "at most {} tags allowed",
                MAX_TAGS
            )));
        }
        Ok(())
    }

    /// Lowercased, trimmed, deduplicated tags
    pub fn normalized_tags(&self) -> Vec<String> {
        let mut tags: Vec<String> = self
            .tags
            .iter()
            .map(|t| t.trim().to_lowercase())
            .filter(|t| !t.is_empty())
            .collect();
        tags.sort();
        tags.dedup();
        tags
    }
}

/// Quality score after applying a vote delta, clamped to [0, 100]
pub fn apply_vote(score: i64, delta: i64) -> i64 {
    score.saturating_add(delta).clamp(0, MAX_QUALITY)
}
