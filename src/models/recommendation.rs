use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::{normalize_message, Category};

/// Once fewer unseen records than this remain, callers should start the next set
pub const REFILL_THRESHOLD: i64 = 3;

/// Only candidates scoring strictly above this are persisted
pub const MIN_PERSIST_SCORE: u8 = 5;

/// Tag as returned by the upstream recommendation API
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct UpstreamTag {
    #[serde(default, alias = "tag_id")]
    pub id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default, rename = "type")]
    pub tag_type: Option<String>,
}

/// Tag reference served with a recommendation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagRef {
    pub id: String,
    pub name: String,
}

/// Category-specific payload of a recommendation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RecommendationPayload {
    /// Movies and TV shows
    Screen {
        release_date: Option<String>,
        genre: Option<String>,
        image: Option<serde_json::Value>,
        duration: Option<i64>,
        content_rating: Option<String>,
        #[serde(default)]
        where_to_watch: Vec<String>,
        #[serde(default)]
        external: BTreeMap<String, serde_json::Value>,
    },
    Book {
        author: Option<String>,
        publication_date: Option<String>,
        image: Option<serde_json::Value>,
        publisher: Option<String>,
        page_count: Option<i64>,
        #[serde(default)]
        external: BTreeMap<String, serde_json::Value>,
    },
    /// Places and destinations
    Place {
        address: Option<String>,
        image: Option<serde_json::Value>,
        website: Option<String>,
        phone: Option<String>,
        business_rating: Option<f64>,
        price_level: Option<i64>,
        is_closed: Option<bool>,
        location: Option<serde_json::Value>,
        #[serde(default)]
        hours: BTreeMap<String, Vec<OpeningHours>>,
        #[serde(default)]
        external: BTreeMap<String, serde_json::Value>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpeningHours {
    pub opens: Option<String>,
    pub closes: Option<String>,
}

/// Raw entity after category mapping, before scoring
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    pub entity_id: String,
    pub title: String,
    pub description: Option<String>,
    pub popularity: Option<f64>,
    #[serde(default)]
    pub tags: Vec<TagRef>,
    pub details: RecommendationPayload,
    /// Upstream tag payload, kept for storage but never served
    #[serde(default, skip_serializing)]
    pub raw_tags: Vec<UpstreamTag>,
}

/// Scoring result for one candidate
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Score {
    pub context: String,
    pub score: u8,
}

impl Score {
    pub fn is_persistable(&self) -> bool {
        self.score > MIN_PERSIST_SCORE
    }
}

/// Record persisted by the enrichment pipeline; never mutated after insert
#[derive(Debug, Clone, PartialEq)]
pub struct EnrichedRecommendation {
    pub candidate: Candidate,
    pub context: String,
    pub score: u8,
    pub session_id: String,
    pub user_message: Option<String>,
    pub cleaned_user_message: Option<String>,
    pub recommendation_category: Category,
    pub tag_id: Option<String>,
    /// Marker for a failed fetch stored in place of results
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl EnrichedRecommendation {
    pub fn new(
        candidate: Candidate,
        score: Score,
        session_id: &str,
        category: Category,
        user_message: Option<&str>,
        tag_id: Option<&str>,
    ) -> Self {
        Self {
            candidate,
            context: score.context,
            score: score.score,
            session_id: session_id.to_string(),
            user_message: user_message.map(str::to_string),
            cleaned_user_message: user_message
                .map(normalize_message)
                .filter(|m| !m.is_empty()),
            recommendation_category: category,
            tag_id: tag_id.map(str::to_string),
            error: None,
            created_at: Utc::now(),
        }
    }
}

/// Record as served to callers, with a stable string id
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecommendationView {
    pub id: String,
    pub entity_id: String,
    pub title: String,
    pub description: Option<String>,
    pub popularity: Option<f64>,
    pub tags: Vec<TagRef>,
    pub details: RecommendationPayload,
    pub context: String,
    pub score: u8,
    pub session_id: String,
    pub user_message: Option<String>,
    pub cleaned_user_message: Option<String>,
    pub recommendation_category: Category,
    pub tag_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl RecommendationView {
    pub fn from_record(id: String, record: EnrichedRecommendation) -> Self {
        let candidate = record.candidate;
        Self {
            id,
            entity_id: candidate.entity_id,
            title: candidate.title,
            description: candidate.description,
            popularity: candidate.popularity,
            tags: candidate.tags,
            details: candidate.details,
            context: record.context,
            score: record.score,
            session_id: record.session_id,
            user_message: record.user_message,
            cleaned_user_message: record.cleaned_user_message,
            recommendation_category: record.recommendation_category,
            tag_id: record.tag_id,
            error: record.error,
            created_at: record.created_at,
        }
    }
}

/// Store-side filter addressing one collection partition
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecommendationFilter {
    pub session_id: String,
    pub category: Category,
    pub cleaned_user_message: Option<String>,
    pub tag_id: Option<String>,
}

impl RecommendationFilter {
    pub fn new(
        session_id: &str,
        category: Category,
        user_message: Option<&str>,
        tag_id: Option<&str>,
    ) -> Self {
        Self {
            session_id: session_id.to_string(),
            category,
            cleaned_user_message: user_message
                .map(normalize_message)
                .filter(|m| !m.is_empty()),
            tag_id: tag_id.filter(|t| !t.is_empty()).map(str::to_string),
        }
    }

    pub fn matches(&self, record: &EnrichedRecommendation) -> bool {
        record.session_id == self.session_id
            && record.recommendation_category == self.category
            && record.cleaned_user_message == self.cleaned_user_message
            && record.tag_id == self.tag_id
    }
}

/// One page of enriched recommendations
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page {
    pub recommendations: Vec<RecommendationView>,
    pub count: usize,
    pub page: u32,
    pub has_next_page: bool,
    /// Caller should kick off the next generation round
    pub start_next_set: bool,
    #[serde(rename = "total_recommendations")]
    pub total_count: u64,
}

impl Page {
    pub fn new(recommendations: Vec<RecommendationView>, page: u32, page_size: u32, total: u64) -> Self {
        let consumed = i64::from(page_size) * i64::from(page);
        let total = total as i64;
        Self {
            count: recommendations.len(),
            recommendations,
            page,
            has_next_page: consumed < total,
            start_next_set: total - consumed < REFILL_THRESHOLD,
            total_count: total as u64,
        }
    }
}
