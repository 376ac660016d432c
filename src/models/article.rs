use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A feed entry after canonicalization, ready for dedupe and ranking.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NormalizedItem {
    pub title: String,
    pub canonical_url: String,
    /// Lowercased hostname of the canonical URL.
    pub source: String,
    pub published_at: Option<DateTime<Utc>>,
    /// HTML-stripped description snippet, at most 220 characters.
    pub description: String,
    /// SHA-256 over (normalized title, canonical URL, UTC date, host).
    pub content_hash: String,
}

/// A stored article row. Created on first sighting, never mutated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Article {
    pub id: i64,
    pub content_hash: String,
    pub source: String,
    pub title: String,
    pub canonical_url: String,
    pub published_at: Option<DateTime<Utc>>,
}

/// A selected item with its rank within a run.
#[derive(Debug, Clone)]
pub struct RankedItem {
    pub item: NormalizedItem,
    pub article_id: i64,
    /// 1-based position within the run.
    pub rank: u32,
    pub score: f64,
}
