use std::sync::Arc;

use crate::{
    config::PipelineSettings,
    db::{RecommendationStore, SessionStore},
    error::{AppError, AppResult},
    models::{Page, RecommendationFilter, SessionFields},
    services::{
        enrichment::EnrichmentPipeline,
        geocoding::Geocoder,
        intent::IntentExtractor,
        llm::{IntentService, ScoringService},
        orchestrator::{FetchOrchestrator, RoundRequest},
        pagination::{PaginationReader, ReadOutcome},
        providers::RecommendationProvider,
        session_state::SessionState,
        tasks::RoundTracker,
    },
};

/// External services the pipeline depends on
#[derive(Clone)]
pub struct Collaborators {
    pub provider: Arc<dyn RecommendationProvider>,
    pub intents: Arc<dyn IntentService>,
    pub scorer: Arc<dyn ScoringService>,
    pub geocoder: Arc<dyn Geocoder>,
}

/// Caller-facing result of a read with polling
#[derive(Debug, Clone, PartialEq)]
pub enum RetryOutcome {
    Ready(Page),
    /// Nothing to serve; carries the user-facing failure reason when there is one
    NotFound { error: Option<String> },
}

/// Entry point for submitting requests and reading recommendation pages
///
/// Reads never wait on generation directly. Callers either get a page, or
/// poll while a background round for their key is still processing.
#[derive(Clone)]
pub struct RecommendationService {
    state: SessionState,
    reader: PaginationReader,
    orchestrator: FetchOrchestrator,
    tracker: RoundTracker,
}

impl RecommendationService {
    pub fn new(
        collaborators: Collaborators,
        sessions: Arc<dyn SessionStore>,
        recommendations: Arc<dyn RecommendationStore>,
        settings: PipelineSettings,
    ) -> Self {
        let state = SessionState::new(sessions, settings.clone());
        let tracker = RoundTracker::new();
        let extractor = IntentExtractor::new(
            collaborators.intents,
            collaborators.geocoder,
            state.clone(),
        );
        let enrichment = EnrichmentPipeline::new(
            collaborators.scorer,
            recommendations.clone(),
            state.clone(),
        );
        let orchestrator = FetchOrchestrator::new(
            collaborators.provider,
            extractor,
            enrichment,
            state.clone(),
            tracker.clone(),
        );

        Self {
            reader: PaginationReader::new(recommendations, settings.page_size),
            state,
            orchestrator,
            tracker,
        }
    }

    pub fn tracker(&self) -> &RoundTracker {
        &self.tracker
    }

    /// Serves page 1, starting a round first when nothing is cached or running
    pub async fn submit(&self, request: &RoundRequest) -> AppResult<RetryOutcome> {
        if request.message().is_none() && request.tag().is_none() {
            return Err(AppError::InvalidInput(
                "Either user_message or selected_tag_id is required".to_string(),
            ));
        }

        let (outcome, fields) = self.read_page(request, 1).await?;
        match outcome {
            ReadOutcome::Page(page) => return Ok(RetryOutcome::Ready(page)),
            ReadOutcome::Failed(error) => return Ok(RetryOutcome::NotFound { error: Some(error) }),
            ReadOutcome::Pending => {}
        }

        if !fields.is_processing(self.state.settings().processing_lease) {
            self.orchestrator.spawn_round(request.clone()).await?;
        }

        self.read_with_retry(request, 1).await
    }

    /// Reads an arbitrary page, polling while a round is in flight
    pub async fn poll(&self, request: &RoundRequest, page: u32) -> AppResult<RetryOutcome> {
        self.read_with_retry(request, page).await
    }

    /// One read of a page, plus the key's session snapshot
    ///
    /// A page that leaves fewer than the refill threshold of unseen records
    /// starts the next round for the same key in the background.
    pub async fn read_page(
        &self,
        request: &RoundRequest,
        page: u32,
    ) -> AppResult<(ReadOutcome, SessionFields)> {
        let key = request.key();
        let fields = self.state.get(&key).await?;

        // Messages converted to a tag store their records under the tag
        let tag = fields.tag_switched_id.as_deref().or(request.tag());
        let filter = RecommendationFilter::new(
            &request.session_id,
            request.category,
            request.message(),
            tag,
        );
        let outcome = self.reader.read(&filter, page).await?;

        if let ReadOutcome::Page(served) = &outcome {
            if served.start_next_set {
                let refill = RoundRequest {
                    is_tags_only: request.tags_only(),
                    ..request.clone()
                };
                match self.orchestrator.spawn_round(refill).await {
                    Ok(true) => tracing::info!(key = %key, page = page, "Started refill round"),
                    Ok(false) => {}
                    Err(e) => tracing::error!(error = %e, key = %key, "Failed to start refill round"),
                }
            }
        }

        Ok((outcome, fields))
    }

    /// Polls a page until it is ready, the key stops processing, or attempts run out
    pub async fn read_with_retry(&self, request: &RoundRequest, page: u32) -> AppResult<RetryOutcome> {
        let settings = self.state.settings();
        let mut last_error = None;

        for attempt in 1..=settings.max_poll_attempts {
            let (outcome, fields) = self.read_page(request, page).await?;
            match outcome {
                ReadOutcome::Page(page) => return Ok(RetryOutcome::Ready(page)),
                ReadOutcome::Failed(error) => return Ok(RetryOutcome::NotFound { error: Some(error) }),
                ReadOutcome::Pending => {}
            }

            last_error = fields.status.error_message().map(str::to_string);
            let processing = fields.is_processing(settings.processing_lease);
            let settled = attempt >= settings.immediate_attempts || last_error.is_some();
            if !processing && settled {
                tracing::debug!(
                    session_id = %request.session_id,
                    category = %request.category,
                    page = page,
                    attempts = attempt,
                    "No recommendations available"
                );
                return Ok(RetryOutcome::NotFound { error: last_error });
            }

            tokio::time::sleep(settings.poll_interval).await;
        }

        tracing::warn!(
            session_id = %request.session_id,
            category = %request.category,
            page = page,
            "Gave up polling for recommendations"
        );
        Ok(RetryOutcome::NotFound { error: last_error })
    }
}
