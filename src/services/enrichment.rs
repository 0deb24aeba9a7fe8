/// Parallel scoring and persistence of fetched candidates
///
/// Every candidate is scored independently. Candidates scoring above the
/// threshold are persisted with the model's context; the rest are dropped.
/// The round's keys are released only after every candidate task finished.
use std::sync::Arc;
use tokio::sync::Semaphore;

use crate::{
    db::RecommendationStore,
    models::{Candidate, Category, EnrichedRecommendation, SessionKey},
    services::{llm::ScoringService, session_state::SessionState, with_timeout},
};

/// Candidates from one successful fetch
#[derive(Debug, Clone)]
pub struct EnrichmentBatch {
    pub session_id: String,
    pub category: Category,
    pub user_message: Option<String>,
    /// Partition tag the records are stored under
    pub tag_id: Option<String>,
    pub candidates: Vec<Candidate>,
    /// Keys whose processing status is released once the batch is done
    pub release_keys: Vec<SessionKey>,
}

impl EnrichmentBatch {
    /// The user's own words, or a stand-in describing the selected tag
    pub fn context_message(&self) -> String {
        match self.user_message.as_deref().map(str::trim) {
            Some(message) if !message.is_empty() => message.to_string(),
            _ => format!(
                "The user is looking for recommendations based on the selected tag - {}",
                self.tag_id.as_deref().unwrap_or("None")
            ),
        }
    }
}

/// Tally of one enrichment pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnrichmentReport {
    pub persisted: usize,
    pub dropped: usize,
    pub skipped: usize,
}

enum CandidateOutcome {
    Persisted,
    Dropped,
    Skipped,
}

#[derive(Clone)]
pub struct EnrichmentPipeline {
    scorer: Arc<dyn ScoringService>,
    recommendations: Arc<dyn RecommendationStore>,
    state: SessionState,
}

impl EnrichmentPipeline {
    pub fn new(
        scorer: Arc<dyn ScoringService>,
        recommendations: Arc<dyn RecommendationStore>,
        state: SessionState,
    ) -> Self {
        Self {
            scorer,
            recommendations,
            state,
        }
    }

    pub async fn enrich(&self, batch: EnrichmentBatch) -> EnrichmentReport {
        let settings = self.state.settings();
        let permits = Arc::new(Semaphore::new(settings.scoring_concurrency.max(1)));
        let context_message = Arc::new(batch.context_message());
        let batch_size = batch.candidates.len();

        tracing::info!(
            session_id = %batch.session_id,
            category = %batch.category,
            candidates = batch_size,
            "Enriching candidates"
        );

        let mut tasks = Vec::with_capacity(batch_size);
        for candidate in batch.candidates {
            let pipeline = self.clone();
            let permits = permits.clone();
            let context_message = context_message.clone();
            let session_id = batch.session_id.clone();
            let user_message = batch.user_message.clone();
            let tag_id = batch.tag_id.clone();
            let category = batch.category;

            tasks.push(tokio::spawn(async move {
                let _permit = permits.acquire_owned().await.ok();
                pipeline
                    .enrich_one(
                        candidate,
                        &context_message,
                        &session_id,
                        category,
                        user_message.as_deref(),
                        tag_id.as_deref(),
                    )
                    .await
            }));
        }

        let mut report = EnrichmentReport::default();
        for task in tasks {
            match task.await {
                Ok(CandidateOutcome::Persisted) => report.persisted += 1,
                Ok(CandidateOutcome::Dropped) => report.dropped += 1,
                Ok(CandidateOutcome::Skipped) => report.skipped += 1,
                Err(e) => {
                    tracing::error!(error = %e, "Enrichment task panicked");
                    report.skipped += 1;
                }
            }
        }

        self.state.mark_succeeded(&batch.release_keys).await;

        tracing::info!(
            session_id = %batch.session_id,
            category = %batch.category,
            persisted = report.persisted,
            dropped = report.dropped,
            skipped = report.skipped,
            "Enrichment finished"
        );

        report
    }

    async fn enrich_one(
        &self,
        candidate: Candidate,
        context_message: &str,
        session_id: &str,
        category: Category,
        user_message: Option<&str>,
        tag_id: Option<&str>,
    ) -> CandidateOutcome {
        let timeout = self.state.settings().external_timeout;
        let scored = with_timeout(
            "scoring",
            timeout,
            self.scorer.score(&candidate, context_message),
        )
        .await;

        let score = match scored {
            Ok(Some(score)) => score,
            Ok(None) => {
                tracing::debug!(title = %candidate.title, "No score returned, skipping");
                return CandidateOutcome::Skipped;
            }
            Err(e) => {
                tracing::warn!(error = %e, title = %candidate.title, "Scoring failed, skipping");
                return CandidateOutcome::Skipped;
            }
        };

        if !score.is_persistable() {
            tracing::debug!(title = %candidate.title, score = score.score, "Dropping low-score candidate");
            return CandidateOutcome::Dropped;
        }

        let title = candidate.title.clone();
        let record = EnrichedRecommendation::new(
            candidate,
            score,
            session_id,
            category,
            user_message,
            tag_id,
        );
        match self.recommendations.insert(record).await {
            Ok(id) => {
                tracing::debug!(id = %id, title = %title, "Persisted recommendation");
                CandidateOutcome::Persisted
            }
            Err(e) => {
                tracing::error!(error = %e, title = %title, "Failed to persist recommendation");
                CandidateOutcome::Skipped
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        db::{MemoryRecommendationStore, MemorySessionStore},
        error::{AppError, AppResult},
        models::{RoundStatus, Score, SessionUpdate},
        services::{
            llm::MockScoringService,
            test_support::{candidate, eventually, fast_settings},
        },
    };

    fn pipeline(scorer: MockScoringService) -> (EnrichmentPipeline, MemoryRecommendationStore, SessionState) {
        let store = MemoryRecommendationStore::new();
        let state = SessionState::new(Arc::new(MemorySessionStore::new()), fast_settings());
        (
            EnrichmentPipeline::new(Arc::new(scorer), Arc::new(store.clone()), state.clone()),
            store,
            state,
        )
    }

    fn batch(candidates: Vec<Candidate>, keys: Vec<SessionKey>) -> EnrichmentBatch {
        EnrichmentBatch {
            session_id: "s1".to_string(),
            category: Category::Movies,
            user_message: Some("Movies like The Dark Knight Rises".to_string()),
            tag_id: None,
            candidates,
            release_keys: keys,
        }
    }

    #[tokio::test]
    async fn test_persists_only_scores_above_five() {
        let mut scorer = MockScoringService::new();
        scorer.expect_score().times(10).returning(|candidate, _| {
            let score: u8 = candidate.title.trim_start_matches("Film ").parse().unwrap();
            Ok(Some(Score {
                context: format!("fit {}", score),
                score,
            }))
        });

        let (pipeline, store, _) = pipeline(scorer);
        let candidates = (1..=10).map(|i| candidate(&format!("Film {}", i))).collect();

        let report = pipeline.enrich(batch(candidates, vec![])).await;
        assert_eq!(report.persisted, 5);
        assert_eq!(report.dropped, 5);

        let mut scores: Vec<u8> = store.records().await.iter().map(|r| r.score).collect();
        scores.sort_unstable();
        assert_eq!(scores, vec![6, 7, 8, 9, 10]);
    }

    #[tokio::test]
    async fn test_missing_and_failed_scores_are_soft_skips() {
        let mut scorer = MockScoringService::new();
        scorer.expect_score().returning(|candidate, _| match candidate.title.as_str() {
            "Silent" => Ok(None),
            "Broken" => Err(AppError::ExternalApi("500".to_string())),
            _ => Ok(Some(Score {
                context: "Great pick".to_string(),
                score: 9,
            })),
        });

        let (pipeline, store, _) = pipeline(scorer);
        let report = pipeline
            .enrich(batch(vec![candidate("Silent"), candidate("Broken"), candidate("Heat")], vec![]))
            .await;

        assert_eq!(report, EnrichmentReport { persisted: 1, dropped: 0, skipped: 2 });
        let records = store.records().await;
        assert_eq!(records[0].context, "Great pick");
        assert_eq!(records[0].cleaned_user_message.as_deref(), Some("movies like the dark knight rises"));
    }

    /// Holds back scoring of "D" until the gate opens
    struct GatedScorer {
        gate: Arc<tokio::sync::Notify>,
    }

    #[async_trait::async_trait]
    impl ScoringService for GatedScorer {
        async fn score(&self, candidate: &Candidate, _context_message: &str) -> AppResult<Option<Score>> {
            if candidate.title == "D" {
                self.gate.notified().await;
            }
            Ok(Some(Score {
                context: "ok".to_string(),
                score: 8,
            }))
        }
    }

    #[tokio::test]
    async fn test_release_happens_after_all_scoring() {
        let gate = Arc::new(tokio::sync::Notify::new());
        let store = MemoryRecommendationStore::new();
        let state = SessionState::new(Arc::new(MemorySessionStore::new()), fast_settings());
        let pipeline = EnrichmentPipeline::new(
            Arc::new(GatedScorer { gate: gate.clone() }),
            Arc::new(store.clone()),
            state.clone(),
        );

        let message_key = SessionKey::new("s1", Category::Movies, Some("funny"), None);
        let tag_key = SessionKey::new("s1", Category::Movies, Some("funny"), Some("urn:tag:genre:media:comedy"));
        for key in [&message_key, &tag_key] {
            state
                .set(key, SessionUpdate::Status(RoundStatus::processing_now()))
                .await
                .unwrap();
        }

        let round = tokio::spawn({
            let keys = vec![message_key.clone(), tag_key.clone()];
            async move {
                pipeline
                    .enrich(batch(
                        vec![candidate("A"), candidate("B"), candidate("C"), candidate("D")],
                        keys,
                    ))
                    .await
            }
        });

        eventually(|| {
            let store = store.clone();
            async move { store.len().await == 3 }
        })
        .await;
        for key in [&message_key, &tag_key] {
            assert!(matches!(
                state.get(key).await.unwrap().status,
                RoundStatus::Processing { .. }
            ));
        }

        gate.notify_one();
        let report = round.await.unwrap();
        assert_eq!(report.persisted, 4);
        assert_eq!(store.len().await, 4);
        for key in [message_key, tag_key] {
            assert_eq!(state.get(&key).await.unwrap().status, RoundStatus::Succeeded);
        }
    }

    #[test]
    fn test_context_message_falls_back_to_tag() {
        let mut b = batch(vec![], vec![]);
        b.user_message = None;
        b.tag_id = Some("urn:tag:genre:place:restaurant".to_string());
        assert_eq!(
            b.context_message(),
            "The user is looking for recommendations based on the selected tag - urn:tag:genre:place:restaurant"
        );
    }
}
