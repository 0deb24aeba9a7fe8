/// Generation rounds for one session key
///
/// A round claims its key, works out what to fetch (keyword search with
/// fallbacks, or a tag lookup), advances the page cursor once a non-empty
/// fetch succeeded, and hands the candidates to enrichment. Any failure is
/// caught here and written as the key's round status.
use std::sync::Arc;

use crate::{
    error::{AppResult, RoundError, RoundResult},
    models::{Candidate, Category, FetchIntent, LocationDetails, SessionKey, SessionUpdate},
    services::{
        enrichment::{EnrichmentBatch, EnrichmentPipeline, EnrichmentReport},
        intent::IntentExtractor,
        providers::{RecommendationProvider, SearchQuery, TagQuery},
        session_state::SessionState,
        tasks::RoundTracker,
        with_timeout,
    },
};

pub const NO_RESULTS: &str = "We could not find any recommendations for your message. Please try rephrasing it.";
pub const MISSING_INPUT: &str = "Please enter a message or select a tag to get recommendations.";

/// What a caller asked for
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoundRequest {
    pub session_id: String,
    pub category: Category,
    pub user_message: Option<String>,
    pub tag_id: Option<String>,
    pub is_tags_only: bool,
}

impl RoundRequest {
    pub fn message(&self) -> Option<&str> {
        self.user_message
            .as_deref()
            .map(str::trim)
            .filter(|m| !m.is_empty())
    }

    pub fn tag(&self) -> Option<&str> {
        self.tag_id.as_deref().map(str::trim).filter(|t| !t.is_empty())
    }

    pub fn key(&self) -> SessionKey {
        SessionKey::new(self.session_id.clone(), self.category, self.message(), self.tag())
    }

    /// Without a message there is nothing to extract intent from
    pub fn tags_only(&self) -> bool {
        self.is_tags_only || self.message().is_none()
    }
}

#[derive(Debug)]
pub enum RoundOutcome {
    /// Another round holds the key
    Skipped,
    Completed(EnrichmentReport),
    Failed(RoundError),
}

#[derive(Clone)]
pub struct FetchOrchestrator {
    provider: Arc<dyn RecommendationProvider>,
    extractor: IntentExtractor,
    enrichment: EnrichmentPipeline,
    state: SessionState,
    tracker: RoundTracker,
}

impl FetchOrchestrator {
    pub fn new(
        provider: Arc<dyn RecommendationProvider>,
        extractor: IntentExtractor,
        enrichment: EnrichmentPipeline,
        state: SessionState,
        tracker: RoundTracker,
    ) -> Self {
        Self {
            provider,
            extractor,
            enrichment,
            state,
            tracker,
        }
    }

    /// Claims the key and runs the round to completion in the caller's task
    pub async fn run_round(&self, request: RoundRequest) -> RoundOutcome {
        let key = request.key();
        match self.state.claim(&key).await {
            Ok(true) => self.execute(request).await,
            Ok(false) => {
                tracing::debug!(key = %key, "Round already in flight, skipping");
                RoundOutcome::Skipped
            }
            Err(e) => {
                tracing::error!(error = %e, key = %key, "Failed to claim round");
                RoundOutcome::Failed(e.into())
            }
        }
    }

    /// Claims the key, then runs the round in the background
    ///
    /// Returns `false` without spawning when another round holds the key.
    pub async fn spawn_round(&self, request: RoundRequest) -> AppResult<bool> {
        let key = request.key();
        if !self.state.claim(&key).await? {
            tracing::debug!(key = %key, "Round already in flight, not spawning");
            return Ok(false);
        }

        tracing::info!(key = %key, tags_only = request.tags_only(), "Spawning generation round");
        let orchestrator = self.clone();
        self.tracker
            .spawn(vec![key], self.state.clone(), async move {
                orchestrator.execute(request).await
            })
            .await;
        Ok(true)
    }

    async fn execute(&self, request: RoundRequest) -> RoundOutcome {
        let key = request.key();
        let mut release_keys = vec![key.clone()];

        match self.fetch(&request, &key, &mut release_keys).await {
            Ok(batch) => RoundOutcome::Completed(self.enrichment.enrich(batch).await),
            Err(error) => {
                match &error {
                    RoundError::User(reason) => {
                        tracing::info!(key = %key, reason = %reason, "Round ended with user-facing failure")
                    }
                    RoundError::Technical(reason) => {
                        tracing::error!(key = %key, reason = %reason, "Round failed")
                    }
                }
                self.state.mark_failed(&release_keys, &error).await;
                RoundOutcome::Failed(error)
            }
        }
    }

    async fn fetch(
        &self,
        request: &RoundRequest,
        key: &SessionKey,
        release_keys: &mut Vec<SessionKey>,
    ) -> RoundResult<EnrichmentBatch> {
        let category = request.category;

        let (candidates, tag_id, page) = if request.tags_only() {
            let tag_id = request
                .tag()
                .ok_or_else(|| RoundError::User(MISSING_INPUT.to_string()))?
                .to_string();
            let location = self.last_location(request).await?;
            let page = self.next_page(key).await?;
            let candidates = self
                .by_tag(category, &tag_id, page, location, false)
                .await?;
            (candidates, Some(tag_id), page)
        } else {
            let message = request.message().unwrap_or_default();
            let intent = self.extractor.extract(key, message).await?;

            if intent.is_specific {
                let page = self.next_page(key).await?;
                let candidates = self.search_with_backups(category, &intent, page).await?;
                (candidates, request.tag().map(str::to_string), page)
            } else {
                let tag_id = self.switch_to_tag(request, key, &intent, release_keys).await?;
                let location = match intent.location_details.clone() {
                    Some(details) => Some(details),
                    None => self.last_location(request).await?,
                };
                let page = self.next_page(key).await?;
                let candidates = self
                    .by_tag(category, &tag_id, page, location, intent.should_be_recent)
                    .await?;
                (candidates, Some(tag_id), page)
            }
        };

        if candidates.is_empty() {
            return Err(RoundError::User(NO_RESULTS.to_string()));
        }

        self.state.set(key, SessionUpdate::Page(page)).await?;
        tracing::info!(key = %key, page = page, fetched = candidates.len(), "Fetched candidates");

        Ok(EnrichmentBatch {
            session_id: request.session_id.clone(),
            category,
            user_message: request.message().map(str::to_string),
            tag_id,
            candidates,
            release_keys: release_keys.clone(),
        })
    }

    /// Keyword search, then each backup keyword in order until one finds something
    async fn search_with_backups(
        &self,
        category: Category,
        intent: &FetchIntent,
        page: u32,
    ) -> RoundResult<Vec<Candidate>> {
        let timeout = self.state.settings().external_timeout;
        let primary = intent.search_query();
        let queries = std::iter::once(primary)
            .filter(|q| !q.is_empty())
            .chain(intent.backup_keywords.iter().map(String::as_str));

        for (attempt, query) in queries.enumerate() {
            let search = SearchQuery {
                category,
                query: query.to_string(),
                location: intent.location_details.clone(),
                page,
            };
            let results = with_timeout("search", timeout, self.provider.search(&search)).await?;

            if !results.is_empty() {
                tracing::debug!(query = %query, attempt = attempt, results = results.len(), "Search matched");
                return Ok(results);
            }
            tracing::debug!(query = %query, attempt = attempt, "Search found nothing, trying next keyword");
        }

        Ok(Vec::new())
    }

    async fn by_tag(
        &self,
        category: Category,
        tag_id: &str,
        page: u32,
        location: Option<LocationDetails>,
        should_be_recent: bool,
    ) -> RoundResult<Vec<Candidate>> {
        let timeout = self.state.settings().external_timeout;
        let query = TagQuery {
            category,
            tag_id: tag_id.to_string(),
            page,
            location,
            should_be_recent,
        };
        Ok(with_timeout("tag lookup", timeout, self.provider.recommend_by_tag(&query)).await?)
    }

    /// Resolves the intent's generic term to a tag and marks the tag-keyed partition
    async fn switch_to_tag(
        &self,
        request: &RoundRequest,
        key: &SessionKey,
        intent: &FetchIntent,
        release_keys: &mut Vec<SessionKey>,
    ) -> RoundResult<String> {
        let term = intent.tag_query();
        if term.is_empty() {
            return Err(RoundError::User(NO_RESULTS.to_string()));
        }

        let timeout = self.state.settings().external_timeout;
        let tag_id = with_timeout(
            "tag resolution",
            timeout,
            self.provider.resolve_tag(request.category, term),
        )
        .await?
        .ok_or_else(|| RoundError::User(NO_RESULTS.to_string()))?;

        let switched = SessionKey::new(
            request.session_id.clone(),
            request.category,
            request.message(),
            Some(&tag_id),
        );
        if switched != *key {
            self.state
                .set(key, SessionUpdate::TagSwitched(tag_id.clone()))
                .await?;
            self.state.mark_processing(&switched).await?;
            release_keys.push(switched);
        }

        tracing::info!(key = %key, term = %term, tag_id = %tag_id, "Switched message to tag lookup");
        Ok(tag_id)
    }

    /// Most recent location for the category; country-level categories ignore it
    async fn last_location(&self, request: &RoundRequest) -> RoundResult<Option<LocationDetails>> {
        if request.category.is_country_level() {
            return Ok(None);
        }
        let scope = SessionKey::category_scope(request.session_id.clone(), request.category);
        Ok(self.state.get(&scope).await?.last_location)
    }

    async fn next_page(&self, key: &SessionKey) -> RoundResult<u32> {
        Ok(self.state.get(key).await?.page.map_or(1, |page| page + 1))
    }
}
