/// Serves fixed-size pages of persisted recommendations
use std::sync::Arc;

use crate::{
    db::RecommendationStore,
    error::AppResult,
    models::{Page, RecommendationFilter},
};

/// Result of reading one page
#[derive(Debug, Clone, PartialEq)]
pub enum ReadOutcome {
    /// Fewer records than a full page; generation may still be running
    Pending,
    /// The partition holds a single error marker; retrying will not help
    Failed(String),
    Page(Page),
}

#[derive(Clone)]
pub struct PaginationReader {
    recommendations: Arc<dyn RecommendationStore>,
    page_size: u32,
}

impl PaginationReader {
    pub fn new(recommendations: Arc<dyn RecommendationStore>, page_size: u32) -> Self {
        Self {
            recommendations,
            page_size: page_size.max(1),
        }
    }

    pub async fn read(&self, filter: &RecommendationFilter, page: u32) -> AppResult<ReadOutcome> {
        let page = page.max(1);
        let limit = u64::from(self.page_size);
        let skip = u64::from(page - 1) * limit;

        let (records, total) = self.recommendations.query(filter, skip, limit).await?;

        if page == 1 && total == 1 {
            if let Some(error) = records.first().and_then(|r| r.error.clone()) {
                return Ok(ReadOutcome::Failed(error));
            }
        }

        if (records.len() as u64) < limit {
            tracing::debug!(
                session_id = %filter.session_id,
                category = %filter.category,
                page = page,
                available = records.len(),
                total = total,
                "Page not ready"
            );
            return Ok(ReadOutcome::Pending);
        }

        Ok(ReadOutcome::Page(Page::new(records, page, self.page_size, total)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        db::MemoryRecommendationStore,
        models::{Category, EnrichedRecommendation, Score},
        services::test_support::candidate,
    };

    async fn seed(store: &MemoryRecommendationStore, count: usize, message: &str) {
        for i in 0..count {
            let record = EnrichedRecommendation::new(
                candidate(&format!("Film {}", i)),
                Score {
                    context: "fits".to_string(),
                    score: 8,
                },
                "s1",
                Category::Movies,
                Some(message),
                None,
            );
            store.insert(record).await.unwrap();
        }
    }

    fn filter(message: &str) -> RecommendationFilter {
        RecommendationFilter::new("s1", Category::Movies, Some(message), None)
    }

    #[tokio::test]
    async fn test_partial_first_page_is_pending() {
        let store = MemoryRecommendationStore::new();
        seed(&store, 2, "funny films").await;
        let reader = PaginationReader::new(Arc::new(store), 3);

        let outcome = reader.read(&filter("funny films"), 1).await.unwrap();
        assert_eq!(outcome, ReadOutcome::Pending);
    }

    #[tokio::test]
    async fn test_full_pages_carry_refill_flags() {
        let store = MemoryRecommendationStore::new();
        seed(&store, 10, "Funny films!").await;
        let reader = PaginationReader::new(Arc::new(store), 3);

        // Same partition regardless of casing and punctuation
        let ReadOutcome::Page(page) = reader.read(&filter("funny   FILMS"), 2).await.unwrap() else {
            panic!("expected a page");
        };
        assert_eq!(page.count, 3);
        assert_eq!(page.total_count, 10);
        assert!(page.has_next_page);
        assert!(!page.start_next_set);
        assert_eq!(page.recommendations[0].title, "Film 3");

        let ReadOutcome::Page(page) = reader.read(&filter("funny films"), 3).await.unwrap() else {
            panic!("expected a page");
        };
        assert!(page.start_next_set);

        assert_eq!(reader.read(&filter("funny films"), 4).await.unwrap(), ReadOutcome::Pending);
    }

    #[tokio::test]
    async fn test_single_error_marker_is_terminal() {
        let store = MemoryRecommendationStore::new();
        let mut record = EnrichedRecommendation::new(
            candidate("Placeholder"),
            Score {
                context: String::new(),
                score: 0,
            },
            "s1",
            Category::Movies,
            Some("weather"),
            None,
        );
        record.error = Some("No recommendations found".to_string());
        store.insert(record).await.unwrap();

        let reader = PaginationReader::new(Arc::new(store), 3);
        assert_eq!(
            reader.read(&filter("weather"), 1).await.unwrap(),
            ReadOutcome::Failed("No recommendations found".to_string())
        );
    }

    #[tokio::test]
    async fn test_served_records_have_string_ids_and_no_raw_tags() {
        let store = MemoryRecommendationStore::new();
        seed(&store, 3, "heist").await;
        let reader = PaginationReader::new(Arc::new(store), 3);

        let ReadOutcome::Page(page) = reader.read(&filter("heist"), 1).await.unwrap() else {
            panic!("expected a page");
        };
        let json = serde_json::to_value(&page).unwrap();
        let first = &json["recommendations"][0];
        assert!(first["id"].is_string());
        assert!(first.get("raw_tags").is_none());
        assert!(first.get("error").is_none());
        assert_eq!(json["total_recommendations"], 3);
    }
}
