use chrono::{DateTime, Utc};
use std::time::Duration;

use crate::{
    error::AppResult,
    models::{
        EnrichedRecommendation, RecommendationFilter, RecommendationView, SessionFields,
        SessionKey, SessionUpdate,
    },
};

/// Keyed store of per-session pipeline state
///
/// Every mutation is a single-field upsert. Writers to different fields never
/// conflict; writers to the same field are last-write-wins.
#[async_trait::async_trait]
pub trait SessionStore: Send + Sync {
    /// Returns the field record for a key, or an empty record if nothing was written yet
    async fn get(&self, key: &SessionKey) -> AppResult<SessionFields>;

    /// Upserts one field under a key
    async fn set(&self, key: &SessionKey, update: SessionUpdate) -> AppResult<()>;

    /// Sets the status to processing unless a live processing lease exists
    ///
    /// Returns `true` when the caller now owns the round for this key.
    async fn try_claim(
        &self,
        key: &SessionKey,
        now: DateTime<Utc>,
        lease: Duration,
    ) -> AppResult<bool>;
}

/// Append-only store of enriched recommendations
#[async_trait::async_trait]
pub trait RecommendationStore: Send + Sync {
    /// Inserts a record and returns its stable string id
    async fn insert(&self, record: EnrichedRecommendation) -> AppResult<String>;

    /// Returns records in insertion order with offset/limit, plus the total match count
    async fn query(
        &self,
        filter: &RecommendationFilter,
        skip: u64,
        limit: u64,
    ) -> AppResult<(Vec<RecommendationView>, u64)>;
}
