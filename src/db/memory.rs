use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use uuid::Uuid;

use crate::{
    db::store::{RecommendationStore, SessionStore},
    error::AppResult,
    models::{
        EnrichedRecommendation, RecommendationFilter, RecommendationView, RoundStatus,
        SessionFields, SessionKey, SessionUpdate,
    },
};

/// In-process session store, used for tests and database-less local runs
#[derive(Clone, Default)]
pub struct MemorySessionStore {
    inner: Arc<RwLock<HashMap<SessionKey, SessionFields>>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl SessionStore for MemorySessionStore {
    async fn get(&self, key: &SessionKey) -> AppResult<SessionFields> {
        let inner = self.inner.read().await;
        Ok(inner.get(key).cloned().unwrap_or_default())
    }

    async fn set(&self, key: &SessionKey, update: SessionUpdate) -> AppResult<()> {
        let mut inner = self.inner.write().await;
        inner.entry(key.clone()).or_default().apply(update);
        Ok(())
    }

    async fn try_claim(
        &self,
        key: &SessionKey,
        now: DateTime<Utc>,
        lease: Duration,
    ) -> AppResult<bool> {
        // Check and set under one write lock
        let mut inner = self.inner.write().await;
        let fields = inner.entry(key.clone()).or_default();
        if fields.status.is_processing(now, lease) {
            return Ok(false);
        }
        fields.status = RoundStatus::Processing { since: now };
        Ok(true)
    }
}

/// In-process recommendation store keeping insertion order
#[derive(Clone, Default)]
pub struct MemoryRecommendationStore {
    inner: Arc<RwLock<Vec<(String, EnrichedRecommendation)>>>,
}

impl MemoryRecommendationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored records across all partitions
    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.is_empty()
    }

    /// Raw stored records, including internal fields
    pub async fn records(&self) -> Vec<EnrichedRecommendation> {
        let inner = self.inner.read().await;
        inner.iter().map(|(_, record)| record.clone()).collect()
    }
}

#[async_trait::async_trait]
impl RecommendationStore for MemoryRecommendationStore {
    async fn insert(&self, record: EnrichedRecommendation) -> AppResult<String> {
        let id = Uuid::new_v4().to_string();
        let mut inner = self.inner.write().await;
        inner.push((id.clone(), record));
        Ok(id)
    }

    async fn query(
        &self,
        filter: &RecommendationFilter,
        skip: u64,
        limit: u64,
    ) -> AppResult<(Vec<RecommendationView>, u64)> {
        let inner = self.inner.read().await;
        let matching: Vec<&(String, EnrichedRecommendation)> = inner
            .iter()
            .filter(|(_, record)| filter.matches(record))
            .collect();
        let total = matching.len() as u64;

        let page = matching
            .into_iter()
            .skip(skip as usize)
            .take(limit as usize)
            .map(|(id, record)| RecommendationView::from_record(id.clone(), record.clone()))
            .collect();

        Ok((page, total))
    }
}
