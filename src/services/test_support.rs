use std::collections::BTreeMap;
use std::future::Future;
use std::time::Duration;

use crate::{
    config::PipelineSettings,
    models::{Candidate, RecommendationPayload, TagRef},
};

pub fn candidate(title: &str) -> Candidate {
    Candidate {
        entity_id: format!("entity-{}", title.to_lowercase().replace(' ', "-")),
        title: title.to_string(),
        description: Some(format!("{} description", title)),
        popularity: Some(0.9),
        tags: vec![TagRef {
            id: "urn:tag:genre:media:thriller".to_string(),
            name: "Thriller".to_string(),
        }],
        details: RecommendationPayload::Screen {
            release_date: Some("2012-07-20".to_string()),
            genre: Some("Thriller".to_string()),
            image: None,
            duration: Some(120),
            content_rating: None,
            where_to_watch: vec![],
            external: BTreeMap::new(),
        },
        raw_tags: vec![],
    }
}

pub fn candidates(titles: &[&str]) -> Vec<Candidate> {
    titles.iter().map(|t| candidate(t)).collect()
}

/// Settings with short poll intervals so retry loops finish quickly
pub fn fast_settings() -> PipelineSettings {
    PipelineSettings {
        page_size: 3,
        external_timeout: Duration::from_secs(2),
        processing_lease: Duration::from_secs(300),
        poll_interval: Duration::from_millis(5),
        immediate_attempts: 3,
        max_poll_attempts: 40,
        scoring_concurrency: 4,
        atomic_processing_guard: true,
    }
}

/// Polls until the condition holds, yielding between checks
pub async fn eventually<F, Fut>(mut check: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    for _ in 0..200 {
        if check().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
    panic!("condition never became true");
}
